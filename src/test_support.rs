//! Shared mocks for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::error::{Error, Result};
use crate::message::{AssetRequest, AssetResponse};
use crate::network::Network;

pub const SCOPE: &str = "https://spells.test/";

pub fn scope() -> Url {
    Url::parse(SCOPE).unwrap()
}

pub fn url(path: &str) -> Url {
    scope().join(path).unwrap()
}

/// A network that answers from a fixed table and records every call.
///
/// URLs not in the table fail with a transport error.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, (StatusCode, Vec<u8>)>>,
    calls: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` with 200 for `path` (relative to [`SCOPE`]).
    pub fn serve(self, path: &str, body: &str) -> Self {
        self.serve_status(path, StatusCode::OK, body)
    }

    pub fn serve_status(self, path: &str, status: StatusCode, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), (status, body.as_bytes().to_vec()));
        self
    }

    pub fn remove(&self, path: &str) {
        self.routes.lock().unwrap().remove(url(path).as_str());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls.lock().unwrap().iter().filter(|c| **c == target).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        let key = request.cache_key().to_string();
        self.calls.lock().unwrap().push(key.clone());
        let route = self.routes.lock().unwrap().get(&key).cloned();
        match route {
            Some((status, body)) => Ok(AssetResponse::new(request.url().clone(), status, body)),
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused: {key}"),
            ))),
        }
    }
}

/// The four-asset app used across tests.
pub fn app_network() -> MockNetwork {
    MockNetwork::new()
        .serve("./", "<shell>")
        .serve("./index.html", "<html>")
        .serve("./app.js", "js")
        .serve("./app.wasm", "\0asm")
}
