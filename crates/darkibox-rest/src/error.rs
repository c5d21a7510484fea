use thiserror::Error;

/// Errors produced by the paced REST transport.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection, timeout or other network-level failure.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The remote kept throttling until the retry budget ran out.
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// The remote answered with a non-2xx status.
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    /// The response body was not the JSON we expected.
    #[error("decode error: {0}")]
    Decode(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A request URL could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be constructed.
    #[error("client build error: {0}")]
    Build(String),
}

impl Error {
    /// Whether the pacer should retry a call that failed with this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Error::Remote { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// HTTP status of a remote failure, if there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            Error::RateLimitExceeded { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Statuses the remote uses to signal a condition worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Result type for darkibox-rest operations.
pub type Result<T> = std::result::Result<T, Error>;
