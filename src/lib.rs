//! asset-cache - offline-first asset caching for progressive web apps.
//!
//! A worker pre-caches a fixed manifest of assets into a named cache bucket
//! when it installs, then answers every fetch from that bucket and falls back
//! to the network on a miss. Install is all-or-nothing: if any asset cannot
//! be fetched, nothing is stored and the previously active worker keeps
//! serving.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use asset_cache::{
//!     AssetRequest, DiskCacheStorage, HttpNetwork, NetworkConfig, Registration, WorkerConfig,
//! };
//!
//! # async fn example() -> asset_cache::Result<()> {
//! let scope = "https://spells.example/".parse().expect("valid URL");
//! let registration = Registration::new(
//!     scope,
//!     Arc::new(DiskCacheStorage::new("/var/cache/asset-cache")),
//!     Arc::new(HttpNetwork::new(&NetworkConfig::default())?),
//! );
//!
//! // Pre-cache the default manifest.
//! let report = registration.register(WorkerConfig::default()).await?;
//! println!("cached {} assets", report.assets);
//!
//! // Served from the cache, no network access.
//! let index = "https://spells.example/index.html".parse().expect("valid URL");
//! let response = registration.handle_fetch(&AssetRequest::get(index)).await?;
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod disk;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod message;
pub mod network;
pub mod registration;
pub mod script;
pub mod storage;
pub mod worker;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use config::{AppConfig, NetworkConfig, PathConfig, ServeConfig, WorkerConfig};
pub use disk::DiskCacheStorage;
pub use error::{Error, Result};
pub use fingerprint::{FingerprintedBundle, fingerprint_bundle};
pub use manifest::AssetManifest;
pub use message::{AssetRequest, AssetResponse};
pub use network::{HttpNetwork, Network};
pub use registration::Registration;
pub use script::{UpgradeCheck, check_upgrade, parse_service_worker, render_service_worker};
pub use storage::{CacheStorage, MemoryCacheStorage};
pub use worker::{AssetCacheWorker, InstallProgress, InstallReport, NoProgress, WorkerState};
