use crate::config::RemoteConfig;
use crate::metadata::FileInfo;
use crate::object::Object;
use crate::path;
use crate::protocol::{self, Features, HashType, Protocol, ProtocolKind, Upload};
use crate::{Error, Result};
use darkibox_rest::{CancellationToken, RestClient};
use log::{debug, trace, warn};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Last-known metadata of one canonical path.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub(crate) info: FileInfo,
    pub(crate) fetched_at: Instant,
}

pub(crate) struct FsInner {
    name: String,
    root: String,
    protocol: Arc<dyn Protocol>,
    metadata_ttl: Duration,
    records: RwLock<HashMap<String, Record>>,
}

/// A darkibox remote exposed as a filesystem.
///
/// Every path argument is relative to the configured root; `..` cannot
/// climb above it. Cloning is cheap and clones share the protocol, the
/// transport and the metadata map.
#[derive(Clone)]
pub struct RemoteFs {
    inner: Arc<FsInner>,
}

impl RemoteFs {
    /// Build a remote, constructing its own transport from `config`.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(config.rest_client()?);
        Self::with_client(config, client)
    }

    /// Build a remote on an existing transport. Remotes built on the same
    /// client share its pacing budget.
    pub fn with_client(config: &RemoteConfig, client: Arc<RestClient>) -> Result<Self> {
        let protocol = protocol::build(config.protocol, client, config.api_key.clone())?;
        Ok(Self::with_protocol(
            &config.name,
            &config.root,
            protocol,
            config.metadata_ttl,
        ))
    }

    /// Build a remote on an explicit protocol implementation.
    pub fn with_protocol(
        name: &str,
        root: &str,
        protocol: Arc<dyn Protocol>,
        metadata_ttl: Duration,
    ) -> Self {
        let root = path::normalize("", root);
        debug!(
            "remote {} rooted at {} ({} protocol)",
            name,
            root,
            protocol.kind()
        );
        Self {
            inner: Arc::new(FsInner {
                name: name.to_string(),
                root,
                protocol,
                metadata_ttl,
                records: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<FsInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Canonical absolute root.
    pub fn root(&self) -> &str {
        &self.inner.root
    }

    pub fn protocol_kind(&self) -> ProtocolKind {
        self.inner.protocol.kind()
    }

    pub fn features(&self) -> Features {
        self.inner.protocol.features()
    }

    /// Content checksums the remote reports. Always empty for darkibox.
    pub fn hashes(&self) -> HashSet<HashType> {
        self.features().hashes
    }

    pub(crate) fn metadata_ttl(&self) -> Duration {
        self.inner.metadata_ttl
    }

    /// Resolve a caller path to the canonical absolute remote path.
    pub fn absolute(&self, path: &str) -> String {
        path::normalize(&self.inner.root, path)
    }

    /// Path of `absolute` relative to the root, without a leading `/`.
    fn relative(&self, absolute: &str) -> String {
        let root_len = path::segments(&self.inner.root).len();
        path::segments(absolute)
            .into_iter()
            .skip(root_len)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Entries directly inside `dir`.
    pub async fn list(&self, cancel: &CancellationToken, dir: &str) -> Result<Vec<Object>> {
        let absolute = self.absolute(dir);
        trace!("{}: list {}", self.inner.name, absolute);
        let entries = self.inner.protocol.list(cancel, &absolute).await?;
        let relative_dir = self.relative(&absolute);

        let mut objects = Vec::with_capacity(entries.len());
        let mut records = self.write_records();
        for info in entries {
            let remote = path::join(&relative_dir, &info.name);
            if remote == relative_dir {
                warn!("{}: skipping unnamed entry in {}", self.inner.name, absolute);
                continue;
            }
            let object = Object::new(&self.inner, remote, info);
            records.insert(self.absolute(object.remote()), object.record());
            objects.push(object);
        }
        debug!("{}: {} entries in {}", self.inner.name, objects.len(), absolute);
        Ok(objects)
    }

    /// Fetch the metadata of `path`.
    pub async fn stat(&self, cancel: &CancellationToken, path: &str) -> Result<Object> {
        let absolute = self.absolute(path);
        let info = self.fetch(cancel, &absolute).await?;
        Ok(Object::new(&self.inner, self.relative(&absolute), info))
    }

    /// Fetch a new record for `path` and remember it as the last known one.
    pub async fn refresh(&self, cancel: &CancellationToken, path: &str) -> Result<FileInfo> {
        let absolute = self.absolute(path);
        self.fetch(cancel, &absolute).await
    }

    /// Last record seen for `path`, without any network call.
    pub fn cached(&self, path: &str) -> Option<FileInfo> {
        self.cached_record(&self.absolute(path))
            .map(|record| record.info)
    }

    /// Upload `upload` to `path`.
    ///
    /// Returns a handle only when the remote object has the declared size;
    /// otherwise fails with `SizeMismatch`. The remote may keep a partial
    /// object after a failure.
    pub async fn put(&self, cancel: &CancellationToken, path: &str, upload: Upload) -> Result<Object> {
        let absolute = self.absolute(path);
        let expected = upload.size();
        trace!("{}: put {} ({} bytes)", self.inner.name, absolute, expected);

        let reported = self.inner.protocol.put(cancel, &absolute, upload).await?;
        let (absolute, info) = match reported {
            // The key-addressed API names the stored file by its code.
            Some(info) => match (self.protocol_kind(), info.id.clone()) {
                (ProtocolKind::Key, Some(code)) => (self.sibling(&absolute, &code), info),
                _ => (absolute, info),
            },
            None => {
                let info = self.inner.protocol.stat(cancel, &absolute).await?;
                (absolute, info)
            }
        };

        self.check_size(&absolute, expected, &info)?;
        self.remember(&absolute, &info);
        debug!("{}: uploaded {} ({} bytes)", self.inner.name, absolute, info.size);
        Ok(Object::new(&self.inner, self.relative(&absolute), info))
    }

    /// Replace the content at `path`. Used by [`Object::update`].
    pub(crate) async fn update_path(
        &self,
        cancel: &CancellationToken,
        path: &str,
        upload: Upload,
    ) -> Result<FileInfo> {
        let absolute = self.absolute(path);
        let expected = upload.size();
        trace!("{}: update {} ({} bytes)", self.inner.name, absolute, expected);

        let info = match self.inner.protocol.update(cancel, &absolute, upload).await? {
            Some(info) => info,
            None => self.inner.protocol.stat(cancel, &absolute).await?,
        };
        self.check_size(&absolute, expected, &info)?;
        self.remember(&absolute, &info);
        Ok(info)
    }

    /// Create a directory. Creating an existing directory is whatever the
    /// remote makes of it.
    pub async fn mkdir(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        let absolute = self.absolute(path);
        trace!("{}: mkdir {}", self.inner.name, absolute);
        self.inner.protocol.mkdir(cancel, &absolute).await?;
        self.forget(&absolute);
        Ok(())
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        let absolute = self.absolute(path);
        trace!("{}: rmdir {}", self.inner.name, absolute);
        self.inner.protocol.rmdir(cancel, &absolute).await?;
        self.forget(&absolute);
        Ok(())
    }

    /// Remove a file. Fails with `NotFound` when it is already gone.
    pub async fn remove(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        let absolute = self.absolute(path);
        trace!("{}: remove {}", self.inner.name, absolute);
        let result = self.inner.protocol.remove(cancel, &absolute).await;
        if matches!(result, Ok(()) | Err(Error::NotFound { .. })) {
            self.forget(&absolute);
        }
        result
    }

    /// Account information reported by the remote.
    pub async fn about(&self, cancel: &CancellationToken) -> Result<serde_json::Value> {
        self.inner.protocol.about(cancel).await
    }

    async fn fetch(&self, cancel: &CancellationToken, absolute: &str) -> Result<FileInfo> {
        trace!("{}: stat {}", self.inner.name, absolute);
        match self.inner.protocol.stat(cancel, absolute).await {
            Ok(info) => {
                self.remember(absolute, &info);
                Ok(info)
            }
            Err(err) => {
                if err.is_not_found() {
                    self.forget(absolute);
                }
                Err(err)
            }
        }
    }

    fn check_size(&self, absolute: &str, expected: u64, info: &FileInfo) -> Result<()> {
        if info.size == expected {
            return Ok(());
        }
        warn!(
            "{}: {} has {} bytes after upload, expected {}",
            self.inner.name, absolute, info.size, expected
        );
        self.forget(absolute);
        Err(Error::SizeMismatch {
            path: absolute.to_string(),
            expected,
            actual: info.size,
        })
    }

    /// `absolute` with its last segment replaced by `name`.
    fn sibling(&self, absolute: &str, name: &str) -> String {
        let mut parts = path::segments(absolute);
        parts.pop();
        parts.push(name.to_string());
        path::normalize(&self.inner.root, &format!("/{}", parts.join("/")))
    }

    pub(crate) fn cached_record(&self, absolute: &str) -> Option<Record> {
        self.read_records().get(absolute).cloned()
    }

    fn remember(&self, absolute: &str, info: &FileInfo) {
        self.write_records().insert(
            absolute.to_string(),
            Record {
                info: info.clone(),
                fetched_at: Instant::now(),
            },
        );
    }

    fn forget(&self, absolute: &str) {
        self.write_records().remove(absolute);
    }

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<String, Record>> {
        self.inner
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<String, Record>> {
        self.inner
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for RemoteFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFs")
            .field("name", &self.inner.name)
            .field("root", &self.inner.root)
            .field("protocol", &self.inner.protocol.kind())
            .finish()
    }
}

impl fmt::Display for RemoteFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "darkibox {} at {}", self.inner.name, self.inner.root)
    }
}
