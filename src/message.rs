//! Request/response pair passed between the worker, the cache and the network.

use bytes::Bytes;
use reqwest::{Method, StatusCode, Url};

/// An intercepted request.
///
/// The URL is always absolute and never carries a fragment, so it can be used
/// directly as the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    method: Method,
    url: Url,
}

impl AssetRequest {
    /// Creates a request with the given method.
    #[must_use]
    pub fn new(method: Method, mut url: Url) -> Self {
        url.set_fragment(None);
        Self { method, url }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the absolute request URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Key under which a response to this request is stored.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }

    /// Only `GET` requests can be answered from the cache.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }
}

/// A response, either fresh from the network or read back from a cache bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    /// URL the response was fetched from.
    pub url: Url,
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers in received order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

impl AssetResponse {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the first value of a header, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn request_drops_fragment() {
        let req = AssetRequest::get(url("https://app.test/index.html#spells"));
        assert_eq!(req.cache_key(), "https://app.test/index.html");
    }

    #[test]
    fn query_is_part_of_the_key() {
        let req = AssetRequest::get(url("https://app.test/index.html?q=fire"));
        assert_eq!(req.cache_key(), "https://app.test/index.html?q=fire");
    }

    #[test]
    fn only_get_is_cacheable() {
        assert!(AssetRequest::get(url("https://app.test/")).is_cacheable());
        assert!(!AssetRequest::new(Method::POST, url("https://app.test/")).is_cacheable());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let resp = AssetResponse::new(url("https://app.test/app.js"), StatusCode::OK, "x")
            .with_header("Content-Type", "text/javascript");
        assert_eq!(resp.header("content-type"), Some("text/javascript"));
        assert_eq!(resp.header("etag"), None);
        assert!(resp.is_success());
    }
}
