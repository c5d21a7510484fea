use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Metadata of a remote file or directory as reported by the service.
///
/// For directories `size` carries no meaning for transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Entry name (not the full path).
    pub name: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Last modification time, if the service reported one.
    #[serde(default, deserialize_with = "deserialize_mod_time")]
    pub mod_time: Option<DateTime<Utc>>,
    /// MIME type; an empty string from the service decodes as `None`.
    #[serde(default, deserialize_with = "deserialize_mime_type")]
    pub mime_type: Option<String>,
    /// Whether the entry is a directory.
    #[serde(default)]
    pub is_dir: bool,
    /// Service-assigned identifier (the file code of the key-addressed API).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl FileInfo {
    /// A file entry with no optional metadata.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mod_time: None,
            mime_type: None,
            is_dir: false,
            id: None,
        }
    }

    /// A directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            is_dir: true,
            ..Self::file(name, 0)
        }
    }
}

/// Parse the timestamp forms the service is known to emit.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) and integer
/// epoch seconds. An empty string means "no timestamp".
pub fn parse_mod_time(text: &str) -> Result<Option<DateTime<Utc>>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(parsed.and_utc()));
    }
    if let Ok(seconds) = text.parse::<i64>() {
        return from_epoch(seconds).map(Some);
    }
    Err(format!("unrecognised timestamp {:?}", text))
}

fn from_epoch(seconds: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| format!("timestamp {} out of range", seconds))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Number(i64),
    Text(String),
}

pub(crate) fn deserialize_mod_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawScalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawScalar::Number(seconds)) => from_epoch(seconds).map(Some).map_err(D::Error::custom),
        Some(RawScalar::Text(text)) => parse_mod_time(&text).map_err(D::Error::custom),
    }
}

fn deserialize_mime_type<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|mime| !mime.trim().is_empty()))
}

/// Sizes sometimes arrive as strings (`"1024"`).
pub(crate) fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawScalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawScalar::Number(n)) => u64::try_from(n)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("negative size {}", n))),
        Some(RawScalar::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid size {:?}", text))),
    }
}
