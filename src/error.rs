//! Error types for the asset-cache library.

use thiserror::Error;

/// Errors that can occur while installing or serving cached assets.
#[derive(Error, Debug)]
pub enum Error {
    /// A manifest asset could not be fetched or stored during install.
    ///
    /// The whole install attempt fails; nothing from it is kept.
    #[error("install failed at {url}: {reason}")]
    Install {
        /// Absolute URL of the asset that failed.
        url: String,
        /// Why it failed (network error or unsuccessful status).
        reason: String,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error from the on-disk cache storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A manifest path or request URL could not be parsed or resolved.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The manifest lists the same asset twice after resolution.
    #[error("duplicate manifest asset: {0}")]
    DuplicateAsset(String),

    /// The worker was asked to serve a fetch before it became active.
    #[error("worker for cache {0} is not active")]
    NotActive(String),

    /// The install operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A service-worker script could not be parsed.
    #[error("service worker script error: {0}")]
    Script(String),

    /// The build staging directory could not be fingerprinted.
    #[error("fingerprint failed: {0}")]
    Fingerprint(String),

    /// Stored cache data is unreadable.
    #[error("cache storage error: {0}")]
    Storage(String),
}

/// A specialized `Result` type for asset-cache operations.
pub type Result<T> = std::result::Result<T, Error>;
