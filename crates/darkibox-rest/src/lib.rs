//! # darkibox-rest
//!
//! Rate-limited REST transport for the darkibox file-hosting API.
//!
//! This crate provides:
//! - A shared request [`Pacer`] enforcing minimum spacing between calls
//! - Exponential backoff with bounded retries on HTTP 429/5xx and network failures
//! - A [`RestClient`] that decodes JSON responses and maps failures into [`Error`]
//! - Cancellation of in-flight calls through a `CancellationToken`
//!
//! ## Example
//!
//! ```ignore
//! use darkibox_rest::{Credential, Opts, PacerConfig, RestClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = RestClient::new(
//!     "https://darkibox.example/",
//!     Credential::None,
//!     PacerConfig::default(),
//!     std::time::Duration::from_secs(60),
//! )?;
//! let cancel = CancellationToken::new();
//! let entries: serde_json::Value = client
//!     .call_json(&cancel, Opts::get().path(["list", "docs"]))
//!     .await?;
//! ```

mod client;
mod error;
mod opts;
mod pacer;

pub use client::{Credential, Response, RestClient};
pub use error::{is_transient_status, Error, Result};
pub use opts::{Opts, RequestBody};
pub use pacer::{Pacer, PacerConfig};

// Re-exported so callers can build methods, bodies and forms without
// depending on reqwest directly.
pub use reqwest::{multipart, Body, Method};
pub use tokio_util::sync::CancellationToken;
