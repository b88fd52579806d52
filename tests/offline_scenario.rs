//! End-to-end behaviour of a registration backed by the on-disk cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use asset_cache::{
    AssetManifest, AssetRequest, AssetResponse, CacheStorage, DiskCacheStorage, Error, Network,
    Registration, WorkerConfig, WorkerState,
};
use reqwest::{StatusCode, Url};
use tempfile::TempDir;

const SCOPE: &str = "https://spells.test/app/";

fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

/// Upstream that can be taken offline and counts requests per URL.
#[derive(Default)]
struct Upstream {
    files: Mutex<HashMap<String, &'static str>>,
    online: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl Upstream {
    fn with(files: &[(&str, &'static str)]) -> Self {
        let upstream = Self::default();
        *upstream.online.lock().unwrap() = true;
        for &(path, body) in files {
            upstream
                .files
                .lock()
                .unwrap()
                .insert(url(path).to_string(), body);
        }
        upstream
    }

    fn go_offline(&self) {
        *self.online.lock().unwrap() = false;
    }

    fn calls_to(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls.lock().unwrap().iter().filter(|c| **c == target).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Network for Upstream {
    async fn fetch(&self, request: &AssetRequest) -> asset_cache::Result<AssetResponse> {
        self.calls.lock().unwrap().push(request.cache_key().to_string());
        if !*self.online.lock().unwrap() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "offline",
            )));
        }
        let body = self.files.lock().unwrap().get(request.cache_key()).copied();
        Ok(match body {
            Some(body) => AssetResponse::new(request.url().clone(), StatusCode::OK, body),
            None => AssetResponse::new(request.url().clone(), StatusCode::NOT_FOUND, "not found"),
        })
    }
}

fn app() -> WorkerConfig {
    WorkerConfig::new()
        .with_cache_name("spells-v1")
        .with_files(AssetManifest::new(["./", "./index.html", "./app.js", "./app.wasm"]))
}

fn full_upstream() -> Upstream {
    Upstream::with(&[
        ("./", "<shell>"),
        ("./index.html", "<html>"),
        ("./app.js", "js"),
        ("./app.wasm", "\0asm"),
        ("./unlisted.png", "png"),
    ])
}

#[tokio::test]
async fn install_then_serve_cache_first() {
    let dir = TempDir::new().unwrap();
    let upstream = Arc::new(full_upstream());
    let registration = Registration::new(
        Url::parse(SCOPE).unwrap(),
        Arc::new(DiskCacheStorage::new(dir.path())),
        Arc::clone(&upstream),
    );

    let report = registration.register(app()).await.unwrap();
    assert_eq!(report.assets, 4);
    upstream.clear_calls();

    let index = registration
        .handle_fetch(&AssetRequest::get(url("./index.html")))
        .await
        .unwrap();
    assert_eq!(index.body.as_ref(), b"<html>");
    assert_eq!(upstream.total_calls(), 0);

    let png = registration
        .handle_fetch(&AssetRequest::get(url("./unlisted.png")))
        .await
        .unwrap();
    assert_eq!(png.body.as_ref(), b"png");
    assert_eq!(upstream.calls_to("./unlisted.png"), 1);
    assert_eq!(upstream.total_calls(), 1);
}

#[tokio::test]
async fn cached_assets_survive_going_offline() {
    let dir = TempDir::new().unwrap();
    let upstream = Arc::new(full_upstream());
    let registration = Registration::new(
        Url::parse(SCOPE).unwrap(),
        Arc::new(DiskCacheStorage::new(dir.path())),
        Arc::clone(&upstream),
    );
    registration.register(app()).await.unwrap();
    upstream.go_offline();

    for path in ["./", "./index.html", "./app.js", "./app.wasm"] {
        let response = registration
            .handle_fetch(&AssetRequest::get(url(path)))
            .await
            .unwrap();
        assert!(response.is_success(), "{path}");
    }

    let miss = registration
        .handle_fetch(&AssetRequest::get(url("./unlisted.png")))
        .await;
    assert!(matches!(miss, Err(Error::Io(_))));
}

#[tokio::test]
async fn missing_asset_aborts_install_and_keeps_old_version() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(dir.path()));
    let upstream = Arc::new(full_upstream());
    let registration = Registration::new(
        Url::parse(SCOPE).unwrap(),
        Arc::clone(&storage),
        Arc::clone(&upstream),
    );
    registration.register(app()).await.unwrap();

    let broken = WorkerConfig::new()
        .with_cache_name("spells-v2")
        .with_files(AssetManifest::new(["./", "./index.html", "./app-2.js"]));
    let err = registration.register(broken).await.unwrap_err();
    assert!(matches!(err, Error::Install { ref url, .. } if url.ends_with("/app-2.js")));

    assert!(storage.keys("spells-v2").await.unwrap().is_empty());
    let active = registration.active().await.unwrap();
    assert_eq!(active.config().cache_name, "spells-v1");
    assert_eq!(active.state(), WorkerState::Active);
}

#[tokio::test]
async fn reinstall_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(DiskCacheStorage::new(dir.path()));
    let registration = Registration::new(
        Url::parse(SCOPE).unwrap(),
        Arc::clone(&storage),
        Arc::new(full_upstream()),
    );

    registration.register(app()).await.unwrap();
    registration.register(app()).await.unwrap();

    let keys = storage.keys("spells-v1").await.unwrap();
    assert_eq!(keys.len(), 4);
    let mut expected: Vec<String> = ["./", "./index.html", "./app.js", "./app.wasm"]
        .iter()
        .map(|p| url(p).to_string())
        .collect();
    expected.sort();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn restart_resumes_from_disk() {
    let dir = TempDir::new().unwrap();
    Registration::new(
        Url::parse(SCOPE).unwrap(),
        Arc::new(DiskCacheStorage::new(dir.path())),
        Arc::new(full_upstream()),
    )
    .register(app())
    .await
    .unwrap();

    let upstream = Arc::new(full_upstream());
    upstream.go_offline();
    let restarted = Registration::new(
        Url::parse(SCOPE).unwrap(),
        Arc::new(DiskCacheStorage::new(dir.path())),
        Arc::clone(&upstream),
    );
    assert!(restarted.register(app()).await.is_err());
    assert!(restarted.resume(app()).await.unwrap());

    let index = restarted
        .handle_fetch(&AssetRequest::get(url("./index.html")))
        .await
        .unwrap();
    assert_eq!(index.body.as_ref(), b"<html>");
}
