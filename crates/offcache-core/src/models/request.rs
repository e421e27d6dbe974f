use bytes::Bytes;
use reqwest::Url;

use crate::error::{CacheError, Result};

/// An outbound request as seen by the intermediary.
///
/// Lookups only look at [`CacheRequest::identity`]; headers and body are
/// carried along so a cache miss can be forwarded to the network unchanged.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    method: String,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl CacheRequest {
    /// Build a request for an absolute `http`/`https` URL.
    pub fn new(method: &str, url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_url(method, parsed)
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new("GET", url)
    }

    /// Build a request for `path` (path plus optional query) relative to `origin`.
    pub fn for_path(method: &str, origin: &Url, path: &str) -> Result<Self> {
        let joined = origin.join(path).map_err(|e| CacheError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_url(method, joined)
    }

    fn from_url(method: &str, mut url: Url) -> Result<Self> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CacheError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme {}", other),
                })
            }
        }
        // Fragments never reach the server and never distinguish cache entries
        url.set_fragment(None);

        Ok(Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: None,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The key a bucket stores this request under.
    pub fn identity(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Only GET results are ever looked up or stored.
    pub fn is_cacheable(&self) -> bool {
        self.method == "GET"
    }
}
