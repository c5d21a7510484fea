use super::{classify, Features, Protocol, ProtocolKind, Upload};
use crate::metadata::FileInfo;
use crate::path::segments;
use crate::{Error, Result};
use async_trait::async_trait;
use darkibox_rest::{CancellationToken, Opts, RestClient};
use log::trace;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// The path-addressed API: every endpoint takes the remote path as the
/// trailing URL segments.
#[derive(Debug, Clone)]
pub struct PathProtocol {
    client: Arc<RestClient>,
}

impl PathProtocol {
    pub fn new(client: Arc<RestClient>) -> Self {
        Self { client }
    }

    async fn send_upload(
        &self,
        cancel: &CancellationToken,
        opts: Opts,
        path: &str,
        upload: Upload,
    ) -> Result<Option<FileInfo>> {
        let mut opts = opts
            .path(segments(path))
            .content_length(upload.size());
        if let Some(mime) = upload.mime_type() {
            opts = opts.content_type(mime);
        }
        let opts = opts.body(upload.into_request_body());
        self.client
            .call(cancel, opts)
            .await
            .map_err(|err| classify(path, err))?;
        Ok(None)
    }
}

#[async_trait]
impl Protocol for PathProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Path
    }

    fn features(&self) -> Features {
        Features {
            can_have_empty_directories: true,
            hashes: HashSet::new(),
        }
    }

    async fn list(&self, cancel: &CancellationToken, path: &str) -> Result<Vec<FileInfo>> {
        trace!("list({})", path);
        let opts = Opts::get().path(["list"]).path(segments(path));
        let value: Value = self
            .client
            .call_json(cancel, opts)
            .await
            .map_err(|err| match err.status() {
                Some(409) => Error::NotADirectory {
                    path: path.to_string(),
                },
                _ => classify(path, err),
            })?;

        match value {
            Value::Array(_) => serde_json::from_value(value)
                .map_err(|err| Error::rest(path, darkibox_rest::Error::from(err))),
            // A single entry object means the path names a file.
            Value::Object(_) => Err(Error::NotADirectory {
                path: path.to_string(),
            }),
            other => Err(Error::rest(
                path,
                darkibox_rest::Error::Decode(format!("expected a list of entries, got {}", other)),
            )),
        }
    }

    async fn stat(&self, cancel: &CancellationToken, path: &str) -> Result<FileInfo> {
        trace!("stat({})", path);
        let opts = Opts::get().path(["fileinfo"]).path(segments(path));
        self.client
            .call_json(cancel, opts)
            .await
            .map_err(|err| classify(path, err))
    }

    async fn put(
        &self,
        cancel: &CancellationToken,
        path: &str,
        upload: Upload,
    ) -> Result<Option<FileInfo>> {
        trace!("put({}, {} bytes)", path, upload.size());
        self.send_upload(cancel, Opts::post().path(["upload"]), path, upload)
            .await
    }

    async fn update(
        &self,
        cancel: &CancellationToken,
        path: &str,
        upload: Upload,
    ) -> Result<Option<FileInfo>> {
        trace!("update({}, {} bytes)", path, upload.size());
        self.send_upload(cancel, Opts::put().path(["update"]), path, upload)
            .await
    }

    async fn mkdir(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        trace!("mkdir({})", path);
        let opts = Opts::post().path(["mkdir"]).path(segments(path));
        self.client
            .call(cancel, opts)
            .await
            .map_err(|err| classify(path, err))?;
        Ok(())
    }

    async fn rmdir(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        trace!("rmdir({})", path);
        let opts = Opts::delete().path(["rmdir"]).path(segments(path));
        self.client
            .call(cancel, opts)
            .await
            .map_err(|err| {
                let not_empty = matches!(
                    &err,
                    darkibox_rest::Error::Remote { status, message }
                        if *status == 409 || mentions_not_empty(message)
                );
                if not_empty {
                    Error::DirectoryNotEmpty {
                        path: path.to_string(),
                    }
                } else {
                    classify(path, err)
                }
            })?;
        Ok(())
    }

    async fn remove(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        trace!("remove({})", path);
        let opts = Opts::delete().path(["remove"]).path(segments(path));
        self.client
            .call(cancel, opts)
            .await
            .map_err(|err| classify(path, err))?;
        Ok(())
    }

    async fn about(&self, _cancel: &CancellationToken) -> Result<Value> {
        Err(Error::Unsupported {
            operation: "about",
            protocol: ProtocolKind::Path.name(),
        })
    }
}

fn mentions_not_empty(message: &str) -> bool {
    message.to_ascii_lowercase().contains("not empty")
}
