use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication rejected ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl FetchError {
    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts, connection failures, throttling and server-side errors are
    /// transient; decoding failures, rejected credentials and other client
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Timeout(_) | FetchError::RateLimited { .. } => true,
            FetchError::Api { status, .. } => *status >= 500 || *status == 408,
            FetchError::Auth { .. }
            | FetchError::Parse(_)
            | FetchError::Malformed(_)
            | FetchError::Config(_) => false,
        }
    }

    /// Map a non-success HTTP status and body to the matching variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => FetchError::Auth { status, message },
            _ => FetchError::Api { status, message },
        }
    }
}
