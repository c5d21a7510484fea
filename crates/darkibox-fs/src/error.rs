use thiserror::Error;

/// Errors surfaced by the remote filesystem adapter.
///
/// Each variant carries the remote path it concerns so a host can report
/// the failure per path.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote reports the path absent.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// A directory operation addressed a file.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// The remote refused to remove a non-empty directory.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// The uploaded object does not have the declared size.
    #[error("size mismatch for {path}: expected {expected} bytes, remote has {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// The configured protocol has no such operation.
    #[error("{operation} is not supported by the {protocol} protocol")]
    Unsupported {
        operation: &'static str,
        protocol: &'static str,
    },

    /// The filesystem a handle belongs to has been dropped.
    #[error("filesystem closed")]
    Closed,

    /// Invalid or incomplete configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Local I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport, throttling, remote or decode failure for a path.
    #[error("{path}: {source}")]
    Rest {
        path: String,
        #[source]
        source: darkibox_rest::Error,
    },
}

impl Error {
    /// Attach a path to a transport error.
    pub fn rest(path: impl Into<String>, source: darkibox_rest::Error) -> Self {
        Error::Rest {
            path: path.into(),
            source,
        }
    }

    /// Whether the error says the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Rest {
                source: darkibox_rest::Error::Cancelled,
                ..
            }
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for darkibox-fs operations.
pub type Result<T> = std::result::Result<T, Error>;
