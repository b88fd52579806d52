//! Browser service-worker script generation and inspection.
//!
//! The script is generated as a string so the deployed `sw.js` always agrees
//! with the [`WorkerConfig`] the native side installs.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::manifest::AssetManifest;

static CACHE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:cacheName|CACHE_NAME)\s*=\s*('[^']*'|"(?:[^"\\]|\\.)*")"#)
        .expect("valid regex")
});

static FILES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:filesToCache|PRECACHE)\s*=\s*\[([^\]]*)\]").expect("valid regex")
});

static STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'[^']*'|"(?:[^"\\]|\\.)*""#).expect("valid regex"));

/// Outcome of comparing a deployed worker with its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeCheck {
    /// Same cache name, same manifest.
    Unchanged,
    /// The cache name changed; the old bucket is orphaned.
    Renamed {
        /// Previous cache name.
        from: String,
        /// New cache name.
        to: String,
    },
    /// The manifest changed under an unchanged cache name. Clients that
    /// already hold the bucket keep entries the new manifest no longer lists.
    StaleRisk {
        /// The reused cache name.
        cache_name: String,
        /// Paths only in the new manifest.
        added: Vec<String>,
        /// Paths only in the old manifest.
        removed: Vec<String>,
    },
}

/// Compares two worker versions.
#[must_use]
pub fn check_upgrade(old: &WorkerConfig, new: &WorkerConfig) -> UpgradeCheck {
    if old.cache_name != new.cache_name {
        return UpgradeCheck::Renamed {
            from: old.cache_name.clone(),
            to: new.cache_name.clone(),
        };
    }
    if old.files == new.files {
        return UpgradeCheck::Unchanged;
    }

    let only_in = |a: &AssetManifest, b: &AssetManifest| {
        a.assets()
            .iter()
            .filter(|p| !b.assets().contains(p))
            .cloned()
            .collect::<Vec<_>>()
    };
    UpgradeCheck::StaleRisk {
        cache_name: new.cache_name.clone(),
        added: only_in(&new.files, &old.files),
        removed: only_in(&old.files, &new.files),
    }
}

/// Renders the browser script for `config`.
#[must_use]
pub fn render_service_worker(config: &WorkerConfig) -> String {
    let files = config
        .files
        .assets()
        .iter()
        .map(|path| format!("  {},\n", js_string(path)))
        .collect::<String>();

    format!(
        r"var cacheName = {cache_name};
var filesToCache = [
{files}];

// Pre-cache the app shell; any failed asset fails the whole install.
self.addEventListener('install', function (e) {{
  e.waitUntil(
    caches.open(cacheName).then(function (cache) {{
      return cache.addAll(filesToCache);
    }})
  );
}});

// Cache first, network on miss.
self.addEventListener('fetch', function (e) {{
  e.respondWith(
    caches.match(e.request).then(function (response) {{
      return response || fetch(e.request);
    }})
  );
}});
",
        cache_name = js_string(&config.cache_name),
    )
}

/// Extracts the cache name and file list from a worker script.
///
/// Understands both `cacheName`/`filesToCache` and `CACHE_NAME`/`PRECACHE`
/// declarations with single- or double-quoted string literals.
///
/// # Errors
///
/// Returns [`Error::Script`] if either declaration is missing or malformed.
pub fn parse_service_worker(source: &str) -> Result<WorkerConfig> {
    let cache_name = CACHE_NAME_RE
        .captures(source)
        .and_then(|c| c.get(1))
        .ok_or_else(|| Error::Script("no cache name declaration".to_string()))
        .and_then(|m| unquote(m.as_str()))?;

    let list = FILES_RE
        .captures(source)
        .and_then(|c| c.get(1))
        .ok_or_else(|| Error::Script("no file list declaration".to_string()))?;

    let files = STRING_RE
        .find_iter(list.as_str())
        .map(|m| unquote(m.as_str()))
        .collect::<Result<Vec<_>>>()?;

    Ok(WorkerConfig::new()
        .with_cache_name(cache_name)
        .with_files(AssetManifest::new(files)))
}

fn js_string(s: &str) -> String {
    // JSON string literals are valid JavaScript string literals.
    serde_json::Value::from(s).to_string()
}

fn unquote(literal: &str) -> Result<String> {
    if let Some(inner) = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return Ok(inner.to_string());
    }
    serde_json::from_str(literal)
        .map_err(|e| Error::Script(format!("bad string literal {literal}: {e}")))
}
