use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Unsupported request method: {0}")]
    InvalidMethod(String),

    #[error("Invalid request header {name}")]
    InvalidHeader { name: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl NetworkError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
            }
        } else {
            NetworkError::Request {
                url: url.to_string(),
                source: err,
            }
        }
    }
}
