use super::{classify, Features, Protocol, ProtocolKind, Upload};
use crate::metadata::{deserialize_mod_time, deserialize_size, FileInfo};
use crate::path::base_name;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use darkibox_rest::multipart::Form;
use darkibox_rest::{CancellationToken, Credential, Opts, RequestBody, RestClient};
use log::{debug, trace};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// The key-addressed API: flat files named by a service-assigned file
/// code, authenticated with `?key=`.
///
/// Files are addressed by the last segment of their path, which must be
/// the file code. Uploads go through a two-step exchange: ask for an
/// upload server, then post a multipart form to it.
///
/// Every call carries this protocol's own key, whatever credential the
/// shared client was built with.
#[derive(Debug, Clone)]
pub struct KeyProtocol {
    client: Arc<RestClient>,
    key: SecretString,
}

/// Common `{status, msg, result}` wrapper of the key-addressed API.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "ok_status")]
    status: u16,
    #[serde(default)]
    msg: String,
    result: Option<T>,
}

fn ok_status() -> u16 {
    200
}

/// Entry in a `file/info` result.
#[derive(Debug, Deserialize)]
struct KeyFileInfo {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    file_code: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    file_title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    size: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_size")]
    file_size: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_mod_time")]
    uploaded: Option<DateTime<Utc>>,
}

impl KeyFileInfo {
    fn into_file_info(self, code: &str) -> FileInfo {
        let name = self
            .name
            .or(self.file_title)
            .unwrap_or_else(|| code.to_string());
        FileInfo {
            name,
            size: self.size.or(self.file_size).unwrap_or(0),
            mod_time: self.uploaded,
            mime_type: None,
            is_dir: false,
            id: Some(self.file_code.unwrap_or_else(|| code.to_string())),
        }
    }
}

impl KeyProtocol {
    pub fn new(client: Arc<RestClient>, key: SecretString) -> Self {
        Self { client, key }
    }

    fn unsupported(operation: &'static str) -> Error {
        Error::Unsupported {
            operation,
            protocol: ProtocolKind::Key.name(),
        }
    }

    fn keyed(&self, opts: Opts) -> Opts {
        opts.credential(Credential::QueryKey(self.key.clone()))
    }

    async fn call_envelope<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        opts: Opts,
    ) -> Result<T> {
        let envelope: Envelope<T> = self
            .client
            .call_json(cancel, self.keyed(opts))
            .await
            .map_err(|err| classify(path, err))?;
        match envelope.status {
            200 => envelope.result.ok_or_else(|| {
                Error::rest(
                    path,
                    darkibox_rest::Error::Decode("response has no result".to_string()),
                )
            }),
            404 => Err(Error::NotFound {
                path: path.to_string(),
            }),
            status => Err(Error::rest(
                path,
                darkibox_rest::Error::Remote {
                    status,
                    message: envelope.msg,
                },
            )),
        }
    }

    /// Metadata of the file stored under `code`; `path` names it in errors.
    async fn file_info(
        &self,
        cancel: &CancellationToken,
        path: &str,
        code: &str,
    ) -> Result<FileInfo> {
        if code.is_empty() {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }
        let opts = Opts::get()
            .path(["api", "file", "info"])
            .query("file_code", code);
        let result: Value = self.call_envelope(cancel, path, opts).await?;
        let entry = match result {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            Value::Array(_) => {
                return Err(Error::NotFound {
                    path: path.to_string(),
                })
            }
            other => other,
        };
        let info: KeyFileInfo = serde_json::from_value(entry)
            .map_err(|err| Error::rest(path, darkibox_rest::Error::from(err)))?;
        if info.status == Some(404) {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }
        Ok(info.into_file_info(code))
    }

    /// Ask the service which server takes the next upload.
    async fn upload_server(&self, cancel: &CancellationToken, path: &str) -> Result<String> {
        let opts = Opts::get().path(["api", "upload", "server"]);
        let url: String = self.call_envelope(cancel, path, opts).await?;
        debug!("upload server for {}: {}", path, url);
        Ok(url)
    }
}

#[async_trait]
impl Protocol for KeyProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Key
    }

    fn features(&self) -> Features {
        Features {
            can_have_empty_directories: false,
            hashes: HashSet::new(),
        }
    }

    async fn list(&self, _cancel: &CancellationToken, _path: &str) -> Result<Vec<FileInfo>> {
        Err(Self::unsupported("list"))
    }

    async fn stat(&self, cancel: &CancellationToken, path: &str) -> Result<FileInfo> {
        let code = base_name(path);
        trace!("stat({}) as file code {:?}", path, code);
        self.file_info(cancel, path, code).await
    }

    async fn put(
        &self,
        cancel: &CancellationToken,
        path: &str,
        upload: Upload,
    ) -> Result<Option<FileInfo>> {
        let title = base_name(path).to_string();
        let size = upload.size();
        trace!("put({}, {} bytes)", path, size);

        let server = self.upload_server(cancel, path).await?;
        let form = Form::new()
            .text("key", self.key.expose_secret().clone())
            .text("file_title", title.clone())
            .text("file_descr", String::new())
            .part("file", upload.into_part(&title));
        let opts = self.keyed(
            Opts::post()
                .root_url(server)
                .body(RequestBody::Form(form)),
        );
        let response: Value = self
            .client
            .call_json(cancel, opts)
            .await
            .map_err(|err| classify(path, err))?;

        let code = find_file_code(&response).ok_or_else(|| {
            Error::rest(
                path,
                darkibox_rest::Error::Decode(format!("upload response has no file_code: {}", response)),
            )
        })?;
        debug!("{} stored as file code {}", path, code);

        // Size and upload time as stored by the service.
        let info = self.file_info(cancel, path, &code).await?;
        Ok(Some(info))
    }

    async fn update(
        &self,
        _cancel: &CancellationToken,
        _path: &str,
        _upload: Upload,
    ) -> Result<Option<FileInfo>> {
        Err(Self::unsupported("update"))
    }

    async fn mkdir(&self, _cancel: &CancellationToken, _path: &str) -> Result<()> {
        Err(Self::unsupported("mkdir"))
    }

    async fn rmdir(&self, _cancel: &CancellationToken, _path: &str) -> Result<()> {
        Err(Self::unsupported("rmdir"))
    }

    async fn remove(&self, _cancel: &CancellationToken, _path: &str) -> Result<()> {
        Err(Self::unsupported("remove"))
    }

    async fn about(&self, cancel: &CancellationToken) -> Result<Value> {
        let opts = Opts::get().path(["api", "account", "info"]);
        self.call_envelope(cancel, "/", opts).await
    }
}

/// Locate the file code in an upload response. Deployments answer with a
/// bare entry, an array of entries, or an object wrapping them in
/// `files` / `result`.
fn find_file_code(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(code)) = map.get("file_code") {
                return Some(code.clone());
            }
            ["files", "result"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(find_file_code)
        }
        Value::Array(items) => items.iter().find_map(find_file_code),
        _ => None,
    }
}
