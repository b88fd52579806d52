//! Hosting runtime for worker versions under one scope.
//!
//! A registration owns the storage and network shared by every version. New
//! versions are installed next to the active one and only replace it once
//! their install succeeds. Registrations are applied one at a time, in the
//! order they were requested.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::message::{AssetRequest, AssetResponse};
use crate::network::Network;
use crate::script::{UpgradeCheck, check_upgrade};
use crate::storage::CacheStorage;
use crate::worker::{AssetCacheWorker, InstallProgress, InstallReport, NoProgress, WorkerState};

/// Worker registration for a single scope.
pub struct Registration<S: CacheStorage, N: Network> {
    scope: Url,
    storage: Arc<S>,
    network: Arc<N>,
    active: RwLock<Option<Arc<AssetCacheWorker<S, N>>>>,
    /// Held for the whole of `register` and `resume`.
    update_lock: Mutex<()>,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
    /// Creates a registration with no active worker.
    #[must_use]
    pub fn new(scope: Url, storage: Arc<S>, network: Arc<N>) -> Self {
        Self {
            scope,
            storage,
            network,
            active: RwLock::new(None),
            update_lock: Mutex::new(()),
        }
    }

    /// Returns the scope URL.
    #[must_use]
    pub const fn scope(&self) -> &Url {
        &self.scope
    }

    /// Returns the shared cache storage.
    #[must_use]
    pub const fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Returns the currently active worker, if any.
    pub async fn active(&self) -> Option<Arc<AssetCacheWorker<S, N>>> {
        self.active.read().await.clone()
    }

    /// Installs a new worker version and activates it on success.
    ///
    /// # Errors
    ///
    /// Returns the install error; the previously active worker keeps serving.
    pub async fn register(&self, config: WorkerConfig) -> Result<InstallReport> {
        self.register_with_cancellation(config, &NoProgress, CancellationToken::new())
            .await
    }

    /// [`register`](Self::register) with progress reporting and cancellation.
    ///
    /// # Errors
    ///
    /// Returns the install error; the previously active worker keeps serving.
    pub async fn register_with_cancellation(
        &self,
        config: WorkerConfig,
        progress: &dyn InstallProgress,
        cancellation_token: CancellationToken,
    ) -> Result<InstallReport> {
        let _update = self.update_lock.lock().await;
        if let Some(current) = self.active().await {
            match check_upgrade(current.config(), &config) {
                UpgradeCheck::StaleRisk {
                    cache_name,
                    removed,
                    ..
                } => log::warn!(
                    "Manifest changed but cache name {cache_name} did not; \
                     {} dropped entries stay in the bucket and are still served",
                    removed.len()
                ),
                UpgradeCheck::Unchanged => log::info!("Re-installing unchanged worker"),
                UpgradeCheck::Renamed { from, to } => {
                    log::info!("Upgrading worker cache {from} -> {to}");
                }
            }
        }

        let worker = Arc::new(AssetCacheWorker::new(
            config,
            self.scope.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.network),
        ));

        let report = worker
            .install_with_cancellation(progress, cancellation_token)
            .await?;

        let previous = self.active.write().await.replace(worker);
        if let Some(previous) = previous {
            previous.set_state(WorkerState::Redundant);
        }
        Ok(report)
    }

    /// Activates a worker for `config` without installing, if its bucket
    /// already holds every manifest asset. Returns whether it did.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest does not resolve or storage is unreadable.
    pub async fn resume(&self, config: WorkerConfig) -> Result<bool> {
        let _update = self.update_lock.lock().await;
        let wanted = config.files.resolve(&self.scope)?;
        if !self.storage.has(&config.cache_name).await? {
            return Ok(false);
        }
        let stored: HashSet<String> = self
            .storage
            .keys(&config.cache_name)
            .await?
            .into_iter()
            .collect();
        if let Some(missing) = wanted.iter().find(|url| !stored.contains(url.as_str())) {
            log::info!(
                "Cache {} is missing {missing}; not resuming",
                config.cache_name
            );
            return Ok(false);
        }

        log::info!("Resuming worker for cache {}", config.cache_name);
        let worker = Arc::new(AssetCacheWorker::resumed(
            config,
            self.scope.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.network),
        ));
        let previous = self.active.write().await.replace(worker);
        if let Some(previous) = previous {
            previous.set_state(WorkerState::Redundant);
        }
        Ok(true)
    }

    /// Routes a request through the active worker, or straight to the
    /// network when no worker is active. A request that reached a worker
    /// is finished by it even if a newer version activates meanwhile.
    ///
    /// # Errors
    ///
    /// Returns the worker's or the network's error unchanged.
    pub async fn handle_fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        match self.active().await {
            Some(worker) => worker.fetch(request).await,
            None => self.network.fetch(request).await,
        }
    }
}
