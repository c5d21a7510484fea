//! Wire protocols spoken by darkibox deployments.
//!
//! Two API shapes exist. The path-addressed API is the complete one and
//! supports directories; the key-addressed API only knows flat files and
//! account information. The adapter picks one at construction time and
//! talks to it through [`Protocol`].

mod key_addressed;
mod path_addressed;

pub use key_addressed::KeyProtocol;
pub use path_addressed::PathProtocol;

use crate::metadata::FileInfo;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use darkibox_rest::multipart::Part;
use darkibox_rest::{Body, CancellationToken, RequestBody, RestClient};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Which API shape the remote speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// `/list/{path}`, `/fileinfo/{path}`, `/upload/{path}`, ...
    #[default]
    Path,
    /// `/api/upload/server?key=`, `/api/file/info?key=&file_code=`, ...
    Key,
}

impl ProtocolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolKind::Path => "path",
            ProtocolKind::Key => "key",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content checksums a remote can report. darkibox reports none, so the
/// type has no values and [`Features::hashes`] is always empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {}

/// Optional capabilities exposed to the host framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    /// Directories can exist without any files in them.
    pub can_have_empty_directories: bool,
    /// Checksums the remote reports; empty means no hash-based change
    /// detection.
    pub hashes: HashSet<HashType>,
}

/// Content to upload, with its declared size.
pub struct Upload {
    body: UploadBody,
    size: u64,
    mime_type: Option<String>,
}

enum UploadBody {
    Bytes(Bytes),
    Reader(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

impl Upload {
    /// In-memory content. The transport may retry these uploads.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            size: data.len() as u64,
            body: UploadBody::Bytes(data),
            mime_type: None,
        }
    }

    /// Streamed content of `size` bytes. Sent once; a transient failure is
    /// reported rather than retried.
    pub fn from_reader<R>(reader: R, size: u64) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        Self {
            body: UploadBody::Reader(Box::new(reader)),
            size,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub(crate) fn into_request_body(self) -> RequestBody {
        match self.body {
            UploadBody::Bytes(data) => RequestBody::Bytes(data),
            UploadBody::Reader(reader) => {
                RequestBody::Stream(Body::wrap_stream(ReaderStream::new(reader)))
            }
        }
    }

    pub(crate) fn into_part(self, file_name: &str) -> Part {
        let body = match self.body {
            UploadBody::Bytes(data) => Body::from(data),
            UploadBody::Reader(reader) => Body::wrap_stream(ReaderStream::new(reader)),
        };
        Part::stream_with_length(body, self.size).file_name(file_name.to_string())
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self.body {
            UploadBody::Bytes(_) => "bytes",
            UploadBody::Reader(_) => "reader",
        };
        f.debug_struct("Upload")
            .field("body", &body)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Operations every protocol offers. Paths are canonical absolute paths
/// produced by [`crate::path::normalize`].
#[async_trait]
pub trait Protocol: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProtocolKind;

    fn features(&self) -> Features;

    /// Entries directly inside `path`.
    async fn list(&self, cancel: &CancellationToken, path: &str) -> Result<Vec<FileInfo>>;

    /// Metadata of a single entry.
    async fn stat(&self, cancel: &CancellationToken, path: &str) -> Result<FileInfo>;

    /// Upload new content. Returns the record when the upload response
    /// already describes the stored object.
    async fn put(
        &self,
        cancel: &CancellationToken,
        path: &str,
        upload: Upload,
    ) -> Result<Option<FileInfo>>;

    /// Replace the content of an existing object.
    async fn update(
        &self,
        cancel: &CancellationToken,
        path: &str,
        upload: Upload,
    ) -> Result<Option<FileInfo>>;

    async fn mkdir(&self, cancel: &CancellationToken, path: &str) -> Result<()>;

    async fn rmdir(&self, cancel: &CancellationToken, path: &str) -> Result<()>;

    async fn remove(&self, cancel: &CancellationToken, path: &str) -> Result<()>;

    /// Account information, when the API exposes it.
    async fn about(&self, cancel: &CancellationToken) -> Result<serde_json::Value>;
}

/// Build the protocol implementation for `kind` on a shared client.
pub fn build(
    kind: ProtocolKind,
    client: Arc<RestClient>,
    api_key: Option<SecretString>,
) -> Result<Arc<dyn Protocol>> {
    match kind {
        ProtocolKind::Path => Ok(Arc::new(PathProtocol::new(client))),
        ProtocolKind::Key => {
            let key = api_key.ok_or_else(|| {
                Error::Config("the key protocol requires an api_key".to_string())
            })?;
            Ok(Arc::new(KeyProtocol::new(client, key)))
        }
    }
}

/// Map a transport failure to the adapter's taxonomy: 404 becomes
/// `NotFound`, everything else keeps its transport error with the path.
pub(crate) fn classify(path: &str, err: darkibox_rest::Error) -> Error {
    match err {
        darkibox_rest::Error::Remote { status: 404, .. } => Error::NotFound {
            path: path.to_string(),
        },
        err => Error::rest(path, err),
    }
}
