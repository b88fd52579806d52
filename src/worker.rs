//! The asset cache worker: pre-caches a manifest on install and answers
//! fetches cache-first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt, stream};
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::message::{AssetRequest, AssetResponse};
use crate::network::Network;
use crate::storage::CacheStorage;

/// Lifecycle of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Cache population in progress (or not yet started).
    Installing,
    /// Install succeeded; serving fetches.
    Active,
    /// Install failed, or a newer version took over. A worker that was
    /// superseded still answers fetches already routed to it.
    Redundant,
}

/// Trait for receiving install progress updates.
///
/// All methods have default no-op implementations for convenience.
pub trait InstallProgress: Send + Sync {
    /// Called before an asset request is sent.
    fn on_asset_start(&self, _url: &Url) {}

    /// Called when an asset arrived with a successful status.
    fn on_asset_fetched(&self, _url: &Url, _bytes: u64) {}

    /// Called when an asset failed; the install will fail with it.
    fn on_asset_failed(&self, _url: &Url, _reason: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl InstallProgress for NoProgress {}

/// Summary of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Bucket that was populated.
    pub cache_name: String,
    /// Number of assets stored.
    pub assets: usize,
    /// Total body bytes stored.
    pub bytes: u64,
    /// Wall time from first request to completed store.
    pub elapsed: Duration,
}

/// One version of the worker, bound to a scope, a storage and a network.
pub struct AssetCacheWorker<S: CacheStorage, N: Network> {
    config: WorkerConfig,
    scope: Url,
    storage: Arc<S>,
    network: Arc<N>,
    state: Mutex<WorkerState>,
    /// Set once the bucket is known to be complete; never cleared.
    installed: AtomicBool,
}

impl<S: CacheStorage, N: Network> AssetCacheWorker<S, N> {
    /// Creates a worker in the [`WorkerState::Installing`] state.
    #[must_use]
    pub const fn new(config: WorkerConfig, scope: Url, storage: Arc<S>, network: Arc<N>) -> Self {
        Self {
            config,
            scope,
            storage,
            network,
            state: Mutex::new(WorkerState::Installing),
            installed: AtomicBool::new(false),
        }
    }

    /// Creates a worker that is already active, for a bucket installed by an
    /// earlier run of the same version.
    #[must_use]
    pub const fn resumed(config: WorkerConfig, scope: Url, storage: Arc<S>, network: Arc<N>) -> Self {
        Self {
            config,
            scope,
            storage,
            network,
            state: Mutex::new(WorkerState::Active),
            installed: AtomicBool::new(true),
        }
    }

    /// Returns the worker configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns the scope manifest paths are resolved against.
    #[must_use]
    pub const fn scope(&self) -> &Url {
        &self.scope
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Request URLs currently stored in this worker's bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    pub async fn cached_urls(&self) -> Result<Vec<String>> {
        self.storage.keys(&self.config.cache_name).await
    }

    /// Install handler: fetches every manifest asset and stores them as one unit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Install`] if any asset fails to fetch or answers with a
    /// non-2xx status. Nothing is stored in that case and the worker becomes
    /// redundant.
    pub async fn install(&self) -> Result<InstallReport> {
        self.install_with_cancellation(&NoProgress, CancellationToken::new())
            .await
    }

    /// Install handler with progress reporting and cancellation.
    ///
    /// Cancelling while assets are being fetched fails the install with
    /// [`Error::Cancelled`] and leaves the bucket untouched. Once every asset
    /// has arrived the store is not interrupted.
    ///
    /// # Errors
    ///
    /// See [`install`](Self::install).
    pub async fn install_with_cancellation(
        &self,
        progress: &dyn InstallProgress,
        cancellation_token: CancellationToken,
    ) -> Result<InstallReport> {
        if self.state() == WorkerState::Redundant {
            return Err(Error::NotActive(self.config.cache_name.clone()));
        }

        match self.populate(progress, &cancellation_token).await {
            Ok(report) => {
                self.installed.store(true, Ordering::Release);
                self.set_state(WorkerState::Active);
                log::info!(
                    "Installed {} assets ({} bytes) into cache {} in {:?}",
                    report.assets,
                    report.bytes,
                    report.cache_name,
                    report.elapsed
                );
                Ok(report)
            }
            Err(e) => {
                if self.state() == WorkerState::Installing {
                    self.set_state(WorkerState::Redundant);
                }
                log::error!("Install of cache {} failed: {e}", self.config.cache_name);
                Err(e)
            }
        }
    }

    async fn populate(
        &self,
        progress: &dyn InstallProgress,
        cancellation_token: &CancellationToken,
    ) -> Result<InstallReport> {
        let started = Instant::now();
        let urls = self.config.files.resolve(&self.scope)?;

        let fetch_all = async {
            self.storage.open(&self.config.cache_name).await?;
            stream::iter(urls)
                .map(|url| self.fetch_asset(url, progress))
                .buffered(self.config.install_concurrency.max(1))
                .try_collect::<Vec<(AssetRequest, AssetResponse)>>()
                .await
        };
        let entries = tokio::select! {
            biased;
            () = cancellation_token.cancelled() => Err(Error::Cancelled),
            res = fetch_all => res,
        }?;

        let assets = entries.len();
        let bytes = entries.iter().map(|(_, r)| r.body.len() as u64).sum();
        self.storage
            .put_all(&self.config.cache_name, entries)
            .await?;

        Ok(InstallReport {
            cache_name: self.config.cache_name.clone(),
            assets,
            bytes,
            elapsed: started.elapsed(),
        })
    }

    /// Fetches one manifest asset, rejecting transport errors and non-2xx statuses.
    async fn fetch_asset(
        &self,
        url: Url,
        progress: &dyn InstallProgress,
    ) -> Result<(AssetRequest, AssetResponse)> {
        progress.on_asset_start(&url);
        let request = AssetRequest::get(url);

        let outcome = match self.network.fetch(&request).await {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(format!("status {}", response.status)),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(response) => {
                progress.on_asset_fetched(request.url(), response.body.len() as u64);
                Ok((request, response))
            }
            Err(reason) => {
                progress.on_asset_failed(request.url(), &reason);
                Err(Error::Install {
                    url: request.url().to_string(),
                    reason,
                })
            }
        }
    }

    /// Fetch handler: answers from the bucket, otherwise from the network.
    ///
    /// A cache hit never touches the network. A miss issues exactly one
    /// network request whose result is returned unchanged. Nothing is
    /// written to the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotActive`] unless an install succeeded, a storage
    /// error if the lookup fails, or the network error of a miss.
    pub async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        if !self.installed.load(Ordering::Acquire) {
            return Err(Error::NotActive(self.config.cache_name.clone()));
        }

        if let Some(cached) = self
            .storage
            .match_request(&self.config.cache_name, request)
            .await?
        {
            log::debug!("cache hit {}", request.url());
            return Ok(cached);
        }

        log::debug!("cache miss {} {}", request.method(), request.url());
        self.network.fetch(request).await
    }
}
