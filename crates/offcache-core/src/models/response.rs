use bytes::Bytes;

/// Body of the synthetic response returned when both cache and network fail
pub const OFFLINE_BODY: &str = "Offline - Please connect to internet";

/// Status of the synthetic offline response
pub const OFFLINE_STATUS: u16 = 503;

/// Reason phrase of the synthetic offline response
pub const OFFLINE_STATUS_TEXT: &str = "Service Unavailable";

/// A fully buffered response.
///
/// Cloning is the duplication step of read-through population: the body is a
/// reference-counted `Bytes`, so the copy handed to the background store and
/// the copy returned to the caller share one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();

        Self {
            status,
            status_text,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// The response served when there is no cached entry and the network is unreachable.
    pub fn offline() -> Self {
        Self {
            status: OFFLINE_STATUS,
            status_text: OFFLINE_STATUS_TEXT.to_string(),
            headers: vec![(
                "content-type".to_string(),
                "text/plain;charset=UTF-8".to_string(),
            )],
            body: Bytes::from_static(OFFLINE_BODY.as_bytes()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Exactly 200: the only status the interceptor writes through to the cache.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Any 2xx: what a manifest entry must return during install.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
