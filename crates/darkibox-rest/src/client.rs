//! The single choke point for outbound calls.

use crate::error::is_transient_status;
use crate::opts::{Opts, RequestBody};
use crate::pacer::{Pacer, PacerConfig};
use crate::{Error, Result};
use bytes::Bytes;
use log::{trace, warn};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest remote message kept in an error.
const MAX_MESSAGE_LEN: usize = 512;

/// How the API key travels with each request.
#[derive(Debug, Clone)]
pub enum Credential {
    /// No authentication.
    None,
    /// `Authorization: Bearer <key>`.
    Bearer(SecretString),
    /// `?key=<key>` on every request.
    QueryKey(SecretString),
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            Error::Decode(format!("{} (body: {})", err, snippet(&self.body)))
        })
    }

    /// Human-readable message for a failed call.
    fn message(&self) -> String {
        if let Ok(serde_json::Value::Object(map)) =
            serde_json::from_slice::<serde_json::Value>(&self.body)
        {
            for key in ["message", "msg", "error"] {
                if let Some(serde_json::Value::String(text)) = map.get(key) {
                    return text.clone();
                }
            }
        }
        let text = snippet(&self.body);
        if text.is_empty() {
            reqwest::StatusCode::from_u16(self.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("unknown status")
                .to_string()
        } else {
            text
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Paced, retrying REST client for one remote endpoint.
#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    credential: Credential,
    pacer: Pacer,
}

impl RestClient {
    /// Build a client for `base_url` with its own HTTP connection pool.
    pub fn new(
        base_url: &str,
        credential: Credential,
        pacer: PacerConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("darkibox-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::Build(err.to_string()))?;
        Self::with_http(http, base_url, credential, pacer)
    }

    /// Build a client around an existing `reqwest::Client`.
    pub fn with_http(
        http: reqwest::Client,
        base_url: &str,
        credential: Credential,
        pacer: PacerConfig,
    ) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|err| Error::InvalidUrl(format!("{base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http,
            base_url,
            credential,
            pacer: Pacer::new(pacer),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Issue a call, retrying transient failures within the pacer's budget.
    ///
    /// Calls with a streamed or multipart body get a single attempt.
    pub async fn call(&self, cancel: &CancellationToken, mut opts: Opts) -> Result<Response> {
        let url = self.url_for(&opts)?;
        let budget = if opts.is_replayable() {
            self.pacer.config().retries.max(1)
        } else {
            1
        };
        let mut body = opts.body.take();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.pacer.acquire(cancel).await?;
            trace!("{} {} (attempt {}/{})", opts.method, url, attempt, budget);

            let request = self.request(&opts, url.clone(), next_body(&mut body));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = send(request) => outcome,
            };

            match outcome {
                Ok(response) if (200..300).contains(&response.status) => {
                    self.pacer.on_success();
                    return Ok(response);
                }
                Ok(response) if is_transient_status(response.status) => {
                    self.pacer.on_retry(response.retry_after());
                    if attempt >= budget {
                        if response.status == 429 {
                            return Err(Error::RateLimitExceeded { attempts: attempt });
                        }
                        return Err(Error::Remote {
                            status: response.status,
                            message: response.message(),
                        });
                    }
                    warn!(
                        "{} {} returned {}, retrying ({}/{})",
                        opts.method, url, response.status, attempt, budget
                    );
                }
                Ok(response) => {
                    self.pacer.on_success();
                    return Err(Error::Remote {
                        status: response.status,
                        message: response.message(),
                    });
                }
                Err(err) if err.is_transient() => {
                    self.pacer.on_retry(None);
                    if attempt >= budget {
                        return Err(err);
                    }
                    warn!(
                        "{} {} failed: {}, retrying ({}/{})",
                        opts.method, url, err, attempt, budget
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Issue a call and decode its body as JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        opts: Opts,
    ) -> Result<T> {
        self.call(cancel, opts).await?.json()
    }

    fn url_for(&self, opts: &Opts) -> Result<Url> {
        let mut url = match &opts.root_url {
            Some(root) => {
                Url::parse(root).map_err(|err| Error::InvalidUrl(format!("{root}: {err}")))?
            }
            None => self.base_url.clone(),
        };
        if !opts.path.is_empty() {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().extend(opts.path.iter());
        }
        Ok(url)
    }

    fn request(&self, opts: &Opts, url: Url, body: Option<RequestBody>) -> RequestBuilder {
        let mut builder = self.http.request(opts.method.clone(), url);
        if !opts.query.is_empty() {
            builder = builder.query(&opts.query);
        }
        builder = match opts.credential.as_ref().unwrap_or(&self.credential) {
            Credential::None => builder,
            Credential::Bearer(key) => builder.bearer_auth(key.expose_secret()),
            Credential::QueryKey(key) => builder.query(&[("key", key.expose_secret().as_str())]),
        };
        if let Some(len) = opts.content_length {
            builder = builder.header(CONTENT_LENGTH, len);
        }
        if let Some(content_type) = &opts.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        match body {
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
            Some(RequestBody::Stream(stream)) => builder.body(stream),
            Some(RequestBody::Form(form)) => builder.multipart(form),
            None => builder,
        }
    }
}

fn next_body(body: &mut Option<RequestBody>) -> Option<RequestBody> {
    match body {
        Some(RequestBody::Bytes(bytes)) => Some(RequestBody::Bytes(bytes.clone())),
        _ => body.take(),
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(Error::Transport)?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(Error::Transport)?;
    Ok(Response {
        status,
        headers,
        body,
    })
}

fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
