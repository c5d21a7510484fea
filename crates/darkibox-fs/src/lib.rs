//! # darkibox-fs
//!
//! Exposes a darkibox file-hosting account as a virtual filesystem.
//!
//! This crate provides:
//! - Path normalization that keeps every call under the configured root
//! - Decoding of the service's entry records into [`FileInfo`]
//! - A [`RemoteFs`] adapter for list / stat / put / mkdir / rmdir / remove
//! - [`Object`] handles with cached metadata, `update` and `remove`
//! - Both API shapes of the service, picked through [`ProtocolKind`]
//! - TOML configuration ([`RemoteConfig`])
//!
//! All requests go through one paced, retrying `darkibox_rest::RestClient`.
//!
//! ## Example
//!
//! ```ignore
//! use darkibox_fs::{CancellationToken, RemoteConfig, RemoteFs, Upload};
//!
//! let config = RemoteConfig::from_file("darkibox.toml")?;
//! let fs = RemoteFs::new(&config)?;
//! let cancel = CancellationToken::new();
//!
//! let object = fs.put(&cancel, "notes/today.txt", Upload::from_bytes("hello")).await?;
//! println!("{} ({} bytes)", object, object.size());
//!
//! for entry in fs.list(&cancel, "notes").await? {
//!     println!("{} dir={}", entry.remote(), entry.is_dir());
//! }
//! ```
//!
//! ## Command line
//!
//! Enable the `cli` feature for the `darkibox` binary, which runs one
//! operation against a configured remote:
//!
//! ```bash
//! darkibox --config darkibox.toml ls notes
//! darkibox --config darkibox.toml put ./report.pdf docs/report.pdf
//! ```

mod config;
mod error;
mod fs;
mod metadata;
mod object;
pub mod path;
pub mod protocol;

pub use config::{PacerSettings, RemoteConfig, API_KEY_ENV};
pub use error::{Error, Result};
pub use fs::RemoteFs;
pub use metadata::{parse_mod_time, FileInfo};
pub use object::Object;
pub use protocol::{Features, HashType, Protocol, ProtocolKind, Upload};

// Re-export transport types for convenience
pub use darkibox_rest::{CancellationToken, RestClient};
