use crate::fs::{FsInner, Record, RemoteFs};
use crate::metadata::FileInfo;
use crate::protocol::Upload;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use darkibox_rest::CancellationToken;
use log::{debug, warn};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// A file or directory on a [`RemoteFs`].
///
/// The handle keeps the record it was created with; reading it never
/// touches the network. It holds only a weak reference to its filesystem,
/// so operations on it fail with [`Error::Closed`] once the filesystem is
/// dropped.
#[derive(Debug, Clone)]
pub struct Object {
    fs: Weak<FsInner>,
    remote: String,
    info: FileInfo,
    fetched_at: Instant,
}

impl Object {
    pub(crate) fn new(fs: &Arc<FsInner>, remote: String, info: FileInfo) -> Self {
        Self {
            fs: Arc::downgrade(fs),
            remote,
            info,
            fetched_at: Instant::now(),
        }
    }

    /// Path relative to the filesystem root.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn is_dir(&self) -> bool {
        self.info.is_dir
    }

    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        self.info.mod_time
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.info.mime_type.as_deref()
    }

    pub(crate) fn record(&self) -> Record {
        Record {
            info: self.info.clone(),
            fetched_at: self.fetched_at,
        }
    }

    fn fs(&self) -> Result<RemoteFs> {
        self.fs
            .upgrade()
            .map(RemoteFs::from_inner)
            .ok_or(Error::Closed)
    }

    /// Modification time, re-fetched when the handle's record is older
    /// than the metadata TTL.
    ///
    /// A newer record already held by the filesystem is used without a
    /// call. When the re-fetch fails the last known value is returned.
    pub async fn mod_time_fresh(&self, cancel: &CancellationToken) -> Option<DateTime<Utc>> {
        let fs = match self.fs() {
            Ok(fs) => fs,
            Err(_) => return self.info.mod_time,
        };
        let ttl = fs.metadata_ttl();
        if self.fetched_at.elapsed() < ttl {
            return self.info.mod_time;
        }

        let absolute = fs.absolute(&self.remote);
        let known = fs.cached_record(&absolute);
        if let Some(record) = &known {
            if record.fetched_at.elapsed() < ttl {
                return record.info.mod_time;
            }
        }

        match fs.refresh(cancel, &self.remote).await {
            Ok(info) => info.mod_time,
            Err(err) => {
                warn!("{}: keeping last known mod time: {}", absolute, err);
                known
                    .filter(|record| record.fetched_at >= self.fetched_at)
                    .map(|record| record.info.mod_time)
                    .unwrap_or(self.info.mod_time)
            }
        }
    }

    /// Fetch a new record. The handle itself keeps its old one.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<FileInfo> {
        self.fs()?.refresh(cancel, &self.remote).await
    }

    /// Replace the object's content. The record is replaced on success and
    /// left as it was on failure.
    pub async fn update(&mut self, cancel: &CancellationToken, upload: Upload) -> Result<()> {
        let fs = self.fs()?;
        let info = fs.update_path(cancel, &self.remote, upload).await?;
        debug!("updated {} ({} bytes)", self.remote, info.size);
        self.info = info;
        self.fetched_at = Instant::now();
        Ok(())
    }

    /// Remove the object from the remote.
    pub async fn remove(&self, cancel: &CancellationToken) -> Result<()> {
        self.fs()?.remove(cancel, &self.remote).await
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.remote.is_empty() {
            f.write_str("/")
        } else {
            f.write_str(&self.remote)
        }
    }
}
