use crate::client::Credential;
use bytes::Bytes;
use reqwest::Method;

/// Body of an outbound request.
#[derive(Debug)]
pub enum RequestBody {
    /// In-memory content; cheap to clone, so the call may be retried.
    Bytes(Bytes),
    /// Streamed content; consumed by the first attempt.
    Stream(reqwest::Body),
    /// Multipart form; consumed by the first attempt.
    Form(reqwest::multipart::Form),
}

impl RequestBody {
    /// Whether the body can be sent again after a transient failure.
    pub fn is_replayable(&self) -> bool {
        matches!(self, RequestBody::Bytes(_))
    }
}

/// Options describing a single logical call.
#[derive(Debug, Default)]
pub struct Opts {
    pub method: Method,
    /// Path segments appended to the client's base URL.
    pub path: Vec<String>,
    /// Absolute URL used instead of the base URL (e.g. an assigned upload
    /// server).
    pub root_url: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    /// Used instead of the client's credential for this call.
    pub credential: Option<Credential>,
}

impl Opts {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Append path segments. Empty segments are skipped.
    pub fn path<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path.extend(
            segments
                .into_iter()
                .map(Into::into)
                .filter(|segment: &String| !segment.is_empty()),
        );
        self
    }

    pub fn root_url(mut self, url: impl Into<String>) -> Self {
        self.root_url = Some(url.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub(crate) fn is_replayable(&self) -> bool {
        self.body.as_ref().map_or(true, RequestBody::is_replayable)
    }
}
