//! In-memory darkibox server speaking both API shapes over real HTTP.

#![allow(dead_code)]

use bytes::Bytes;
use darkibox_fs::{PacerSettings, RemoteConfig};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::TcpListener;

pub const MOD_TIME: &str = "2024-01-02 03:04:05";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub size: u64,
    pub is_dir: bool,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub at: Instant,
    pub method: String,
    pub path: String,
}

#[derive(Default)]
pub struct State {
    /// Path-addressed tree, keyed by canonical absolute path.
    pub files: Mutex<BTreeMap<String, Entry>>,
    /// Key-addressed files: code -> (title, size).
    pub coded: Mutex<HashMap<String, (String, u64)>>,
    pub next_code: AtomicU32,
    /// Number of upcoming requests answered with 429.
    pub throttle: AtomicU32,
    /// Store one byte less than received.
    pub truncate: AtomicBool,
    /// Required bearer token on the path API.
    pub token: Mutex<Option<String>>,
    /// Required `key` on the key API.
    pub key: Mutex<Option<String>>,
    pub hits: Mutex<Vec<Hit>>,
}

impl State {
    pub fn entry(&self, path: &str) -> Option<Entry> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hits_for(&self, method: &str, prefix: &str) -> Vec<Hit> {
        self.hits()
            .into_iter()
            .filter(|hit| hit.method == method && hit.path.starts_with(prefix))
            .collect()
    }
}

pub struct FakeDarkibox {
    pub addr: SocketAddr,
    pub state: Arc<State>,
}

impl FakeDarkibox {
    pub async fn start() -> Self {
        let state = Arc::new(State::default());
        state
            .files
            .lock()
            .unwrap()
            .insert("/".to_string(), dir_entry());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(handle(state, addr, req).await) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Path-protocol config with fast pacing.
    pub fn config(&self, root: &str) -> RemoteConfig {
        RemoteConfig::new("test", self.endpoint())
            .with_root(root)
            .with_pacer(fast_pacer(5))
    }

    pub fn seed_dir(&self, path: &str) {
        let mut files = self.state.files.lock().unwrap();
        for ancestor in ancestors(path) {
            files.entry(ancestor).or_insert_with(dir_entry);
        }
    }

    pub fn seed_file(&self, path: &str, size: u64) {
        self.seed_dir(&parent(path));
        self.state.files.lock().unwrap().insert(
            path.to_string(),
            Entry {
                size,
                is_dir: false,
                mime_type: "text/plain".to_string(),
            },
        );
    }
}

pub fn fast_pacer(retries: u32) -> PacerSettings {
    PacerSettings {
        min_sleep_ms: 1,
        max_sleep_ms: 20,
        decay_constant: 2,
        retries,
        jitter_ms: 0,
    }
}

fn dir_entry() -> Entry {
    Entry {
        size: 0,
        is_dir: true,
        mime_type: String::new(),
    }
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// `/a/b/c` -> `/`, `/a`, `/a/b`, `/a/b/c`.
fn ancestors(path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    let mut current = String::new();
    for part in path.split('/').filter(|part| !part.is_empty()) {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn query_map(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (percent_decode(k), percent_decode(v)))
        .collect()
}

fn json_reply(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn text_reply(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

fn entry_json(path: &str, entry: &Entry) -> Value {
    json!({
        "name": name_of(path),
        "size": entry.size,
        "mod_time": MOD_TIME,
        "mime_type": entry.mime_type,
        "is_dir": entry.is_dir,
    })
}

fn not_found() -> Response<Full<Bytes>> {
    json_reply(StatusCode::NOT_FOUND, json!({"message": "no such file or directory"}))
}

async fn handle(state: Arc<State>, addr: SocketAddr, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let raw_path = req.uri().path().to_string();
    let query = query_map(req.uri().query());
    state.hits.lock().unwrap().push(Hit {
        at: Instant::now(),
        method: method.to_string(),
        path: raw_path.clone(),
    });

    let throttled = state
        .throttle
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if throttled {
        return text_reply(StatusCode::TOO_MANY_REQUESTS, "slow down");
    }

    if raw_path.starts_with("/api/") || raw_path == "/kupload" {
        return handle_key_api(&state, addr, req, &raw_path, &query).await;
    }

    if let Some(token) = state.token.lock().unwrap().clone() {
        let expected = format!("Bearer {}", token);
        let given = req
            .headers()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if given != expected {
            return json_reply(StatusCode::UNAUTHORIZED, json!({"message": "invalid token"}));
        }
    }

    let (endpoint, rest) = match raw_path[1..].split_once('/') {
        Some((endpoint, rest)) => (endpoint.to_string(), format!("/{}", percent_decode(rest))),
        None => (raw_path[1..].to_string(), "/".to_string()),
    };
    let path = if rest.len() > 1 {
        rest.trim_end_matches('/').to_string()
    } else {
        rest
    };

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return text_reply(StatusCode::BAD_REQUEST, "bad body"),
    };

    match (method, endpoint.as_str()) {
        (Method::GET, "list") => {
            let files = state.files.lock().unwrap();
            match files.get(&path) {
                None => not_found(),
                // A file answers with its own entry.
                Some(entry) if !entry.is_dir => json_reply(StatusCode::OK, entry_json(&path, entry)),
                Some(_) => {
                    let children: Vec<Value> = files
                        .iter()
                        .filter(|(p, _)| p.as_str() != "/" && parent(p) == path)
                        .map(|(p, entry)| entry_json(p, entry))
                        .collect();
                    json_reply(StatusCode::OK, Value::Array(children))
                }
            }
        }
        (Method::GET, "fileinfo") => {
            if path.contains("garbage") {
                return text_reply(StatusCode::OK, "<html>not json</html>");
            }
            match state.entry(&path) {
                Some(entry) => json_reply(StatusCode::OK, entry_json(&path, &entry)),
                None => not_found(),
            }
        }
        (Method::POST, "upload") | (Method::PUT, "update") => {
            let mut files = state.files.lock().unwrap();
            if endpoint == "update" && !files.contains_key(&path) {
                return not_found();
            }
            let mut size = body.len() as u64;
            if state.truncate.load(Ordering::SeqCst) {
                size = size.saturating_sub(1);
            }
            for ancestor in ancestors(&parent(&path)) {
                files.entry(ancestor).or_insert_with(dir_entry);
            }
            files.insert(
                path.clone(),
                Entry {
                    size,
                    is_dir: false,
                    mime_type: "application/octet-stream".to_string(),
                },
            );
            json_reply(StatusCode::OK, json!({"status": "ok"}))
        }
        (Method::POST, "mkdir") => {
            let mut files = state.files.lock().unwrap();
            if files.get(&path).map(|entry| !entry.is_dir).unwrap_or(false) {
                return json_reply(StatusCode::CONFLICT, json!({"message": "file exists"}));
            }
            for ancestor in ancestors(&path) {
                files.entry(ancestor).or_insert_with(dir_entry);
            }
            json_reply(StatusCode::OK, json!({"status": "ok"}))
        }
        (Method::DELETE, "rmdir") => {
            let mut files = state.files.lock().unwrap();
            match files.get(&path) {
                None => not_found(),
                Some(entry) if !entry.is_dir => {
                    json_reply(StatusCode::BAD_REQUEST, json!({"message": "not a directory"}))
                }
                Some(_) => {
                    if files.keys().any(|p| p != "/" && parent(p) == path) {
                        return json_reply(
                            StatusCode::CONFLICT,
                            json!({"message": "directory not empty"}),
                        );
                    }
                    files.remove(&path);
                    json_reply(StatusCode::OK, json!({"status": "ok"}))
                }
            }
        }
        (Method::DELETE, "remove") => {
            let mut files = state.files.lock().unwrap();
            match files.get(&path) {
                Some(entry) if !entry.is_dir => {
                    files.remove(&path);
                    json_reply(StatusCode::OK, json!({"status": "ok"}))
                }
                _ => not_found(),
            }
        }
        _ => text_reply(StatusCode::METHOD_NOT_ALLOWED, "unknown endpoint"),
    }
}

async fn handle_key_api(
    state: &State,
    addr: SocketAddr,
    req: Request<Incoming>,
    path: &str,
    query: &HashMap<String, String>,
) -> Response<Full<Bytes>> {
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return text_reply(StatusCode::BAD_REQUEST, "bad body"),
    };

    let expected_key = state.key.lock().unwrap().clone();
    if path != "/kupload" && expected_key.as_deref() != query.get("key").map(String::as_str) {
        return json_reply(StatusCode::OK, json!({"status": 403, "msg": "Wrong key"}));
    }

    match path {
        "/api/upload/server" => json_reply(
            StatusCode::OK,
            json!({"status": 200, "msg": "OK", "result": format!("http://{}/kupload", addr)}),
        ),
        "/kupload" => {
            let fields = parse_multipart(&content_type, &body);
            if expected_key.as_deref() != fields.get("key").map(|v| v.as_str()) {
                return json_reply(StatusCode::FORBIDDEN, json!({"msg": "Wrong key"}));
            }
            let title = fields.get("file_title").cloned().unwrap_or_default();
            let mut size = fields.get("file").map(|data| data.len() as u64).unwrap_or(0);
            if state.truncate.load(Ordering::SeqCst) {
                size = size.saturating_sub(1);
            }
            let code = format!("code{}", state.next_code.fetch_add(1, Ordering::SeqCst) + 1);
            state
                .coded
                .lock()
                .unwrap()
                .insert(code.clone(), (title, size));
            json_reply(
                StatusCode::OK,
                json!([{"file_code": code, "file_status": "OK"}]),
            )
        }
        "/api/file/info" => {
            let code = query.get("file_code").cloned().unwrap_or_default();
            match state.coded.lock().unwrap().get(&code) {
                Some((title, size)) => json_reply(
                    StatusCode::OK,
                    json!({"status": 200, "msg": "OK", "result": [{
                        "file_code": code,
                        "name": title,
                        "size": size.to_string(),
                        "uploaded": MOD_TIME,
                    }]}),
                ),
                None => json_reply(
                    StatusCode::OK,
                    json!({"status": 200, "msg": "OK", "result": [{"file_code": code, "status": 404}]}),
                ),
            }
        }
        "/api/account/info" => {
            let used: u64 = state.coded.lock().unwrap().values().map(|(_, size)| size).sum();
            json_reply(
                StatusCode::OK,
                json!({"status": 200, "msg": "OK", "result": {
                    "email": "user@example.com",
                    "storage_used": used,
                }}),
            )
        }
        _ => json_reply(StatusCode::NOT_FOUND, json!({"status": 404, "msg": "no such endpoint"})),
    }
}

/// Fields of a `multipart/form-data` body, file parts included as raw text.
fn parse_multipart(content_type: &str, body: &[u8]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let boundary = match content_type.split("boundary=").nth(1) {
        Some(boundary) => format!("--{}", boundary.trim_matches('"')),
        None => return fields,
    };
    let text = String::from_utf8_lossy(body);
    for part in text.split(boundary.as_str()) {
        let part = part.strip_prefix("\r\n").unwrap_or(part);
        let Some((headers, content)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let Some(name) = headers
            .split("name=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
        else {
            continue;
        };
        let content = content.strip_suffix("\r\n").unwrap_or(content);
        fields.insert(name.to_string(), content.to_string());
    }
    fields
}
