//! Network access used for install fetches and cache-miss fallbacks.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::message::{AssetRequest, AssetResponse};

/// Abstraction over the network for testability.
///
/// An HTTP error status is a successful fetch; only transport failures are
/// errors.
#[async_trait]
pub trait Network: Send + Sync {
    /// Performs the request and returns the response as received.
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse>;
}

/// Default network implementation using a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    /// Builds a client tuned by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(config.tcp_keepalive_secs))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        log::debug!("{} {}", request.method(), request.url());
        let response = self
            .client
            .request(request.method().clone(), request.url().clone())
            .send()
            .await?;

        let url = response.url().clone();
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(AssetResponse {
            url,
            status,
            headers,
            body,
        })
    }
}
