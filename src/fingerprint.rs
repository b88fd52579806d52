//! Content-hash fingerprinting of a built web bundle.
//!
//! A bundle named `app` is staged as `app.js`, `app_bg.wasm`, `index.html`
//! and optionally `sw.js`. Fingerprinting renames the JS and wasm files to
//! `app-<hash>.js` and `app_bg-<hash>.wasm`, rewrites every reference to them
//! and updates the subresource-integrity digest of the JS in `index.html`.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256, Sha384};

use crate::error::{Error, Result};
use crate::manifest::AssetManifest;

/// Number of hex characters of the SHA-256 kept in a hashed filename.
pub const HASH_LEN: usize = 8;

/// Result of fingerprinting a staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintedBundle {
    /// New JS filename.
    pub js_file: String,
    /// New wasm filename.
    pub wasm_file: String,
    /// `sha384-…` integrity of the rewritten JS.
    pub js_integrity: String,
    /// Whether a `sw.js` was found and rewritten.
    pub service_worker_rewritten: bool,
}

impl FingerprintedBundle {
    /// Manifest listing the fingerprinted assets.
    #[must_use]
    pub fn manifest(&self) -> AssetManifest {
        AssetManifest::for_bundle(&self.js_file, &self.wasm_file)
    }
}

/// Short content hash used in filenames.
#[must_use]
pub fn short_hash(data: &[u8]) -> String {
    let hex = format!("{:x}", Sha256::digest(data));
    hex[..HASH_LEN].to_string()
}

/// Subresource-integrity value (`sha384-<base64>`).
#[must_use]
pub fn integrity(data: &[u8]) -> String {
    format!("sha384-{}", BASE64.encode(Sha384::digest(data)))
}

/// Fingerprints the bundle `name` inside `staging_dir`.
///
/// # Errors
///
/// Returns [`Error::Fingerprint`] if the JS, wasm or `index.html` file is
/// missing, and an I/O error if rewriting or renaming fails.
pub async fn fingerprint_bundle(staging_dir: &Path, name: &str) -> Result<FingerprintedBundle> {
    let js_path = staging_dir.join(format!("{name}.js"));
    let wasm_path = staging_dir.join(format!("{name}_bg.wasm"));
    let index_path = staging_dir.join("index.html");
    let sw_path = staging_dir.join("sw.js");

    let js = read_required(&js_path).await?;
    let wasm = read_required(&wasm_path).await?;
    let index = read_required(&index_path).await?;

    // The JS name hashes the JS as built, before its wasm reference is rewritten.
    let js_hash = short_hash(&js);
    let old_integrity = integrity(&js);
    let wasm_hash = short_hash(&wasm);

    let js_file = format!("{name}-{js_hash}.js");
    let wasm_file = format!("{name}_bg-{wasm_hash}.wasm");
    let original_js = format!("{name}.js");
    let original_wasm = format!("{name}_bg.wasm");

    let js_text = into_text(js, &js_path)?;
    let rewritten_js = js_text.replace(&original_wasm, &wasm_file);
    let js_integrity = integrity(rewritten_js.as_bytes());

    let index_text = into_text(index, &index_path)?
        .replace(&original_js, &js_file)
        .replace(&original_wasm, &wasm_file)
        .replace(&old_integrity, &js_integrity);

    tokio::fs::write(&js_path, rewritten_js).await?;
    tokio::fs::write(&index_path, index_text).await?;

    let service_worker_rewritten = match tokio::fs::read_to_string(&sw_path).await {
        Ok(sw) => {
            let sw = sw
                .replace(&original_js, &js_file)
                .replace(&original_wasm, &wasm_file);
            tokio::fs::write(&sw_path, sw).await?;
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No sw.js in {}", staging_dir.display());
            false
        }
        Err(e) => return Err(e.into()),
    };

    tokio::fs::rename(&js_path, staging_dir.join(&js_file)).await?;
    tokio::fs::rename(&wasm_path, staging_dir.join(&wasm_file)).await?;

    log::info!("Fingerprinted {name}: {js_file}, {wasm_file}");
    Ok(FingerprintedBundle {
        js_file,
        wasm_file,
        js_integrity,
        service_worker_rewritten,
    })
}

async fn read_required(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Fingerprint(format!(
            "missing {}",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn into_text(data: Vec<u8>, path: &Path) -> Result<String> {
    String::from_utf8(data)
        .map_err(|_| Error::Fingerprint(format!("{} is not UTF-8", path.display())))
}
