//! The ordered list of assets a worker pre-caches.

use std::collections::HashSet;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Assets shipped with the spell-search app.
pub const DEFAULT_ASSETS: [&str; 4] = [
    "./",
    "./index.html",
    "./pf1_spell_search-10769b3f.js",
    "./pf1_spell_search_bg-e1555cea.wasm",
];

/// Ordered asset paths, relative to the worker scope.
///
/// Regenerated whenever the built bundle's hashed filenames change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest {
    assets: Vec<String>,
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(DEFAULT_ASSETS)
    }
}

impl AssetManifest {
    /// Creates a manifest from paths, keeping their order.
    pub fn new<I, S>(assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            assets: assets.into_iter().map(Into::into).collect(),
        }
    }

    /// Manifest for a fingerprinted bundle: the scope root, the HTML shell,
    /// the JS glue and the wasm module.
    #[must_use]
    pub fn for_bundle(js_file: &str, wasm_file: &str) -> Self {
        Self::new([
            "./".to_string(),
            "./index.html".to_string(),
            format!("./{js_file}"),
            format!("./{wasm_file}"),
        ])
    }

    /// Returns the asset paths in manifest order.
    #[must_use]
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Returns true if the manifest lists nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Resolves every path against `scope`, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] for a path that does not resolve and
    /// [`Error::DuplicateAsset`] when two paths resolve to the same URL.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>> {
        let mut seen = HashSet::new();
        self.assets
            .iter()
            .map(|path| {
                let mut url = scope.join(path).map_err(|e| Error::InvalidUrl {
                    url: path.clone(),
                    reason: e.to_string(),
                })?;
                url.set_fragment(None);
                if !seen.insert(url.clone()) {
                    return Err(Error::DuplicateAsset(url.to_string()));
                }
                Ok(url)
            })
            .collect()
    }
}
