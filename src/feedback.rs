//! Analyst feedback, kept as a JSON array in a single file.
//!
//! The whole file is read, extended and rewritten on every save. That is fine
//! for the handful of entries a team produces; there is no locking between
//! concurrent writers.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::storage;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback text is empty")]
    EmptyFeedback,

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed feedback file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub page: String,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

pub struct FeedbackStore {
    path: PathBuf,
}

impl FeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Blank text is rejected; surrounding whitespace is
    /// trimmed. An empty metadata map is stored as absent.
    pub fn save(
        &self,
        page: &str,
        text: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedbackError::EmptyFeedback);
        }

        let entry = FeedbackEntry {
            timestamp: Utc::now(),
            page: page.to_string(),
            feedback: text.to_string(),
            metadata: metadata.filter(|m| !m.is_empty()),
        };

        let mut entries = self.load_for_append();
        entries.push(serde_json::to_value(&entry).map_err(|source| FeedbackError::Json {
            path: self.path.clone(),
            source,
        })?);

        storage::write_atomic(&self.path, |file| {
            let mut out = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut out, &entries).map_err(std::io::Error::from)?;
            out.flush()
        })
        .map_err(|source| FeedbackError::Io {
            path: self.path.clone(),
            source,
        })?;

        info!(page, total = entries.len(), "feedback saved");
        Ok(entry)
    }

    /// All stored entries, oldest first. A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(FeedbackError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| FeedbackError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// The last `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        let entries = self.load()?;
        Ok(entries.into_iter().rev().take(n).collect())
    }

    // Existing entries are carried over verbatim. Only a file that is not a
    // JSON array is replaced with a fresh list.
    fn load_for_append(&self) -> Vec<Value> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "feedback file unreadable, starting a new list");
                }
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Value>>(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "feedback file is not a list, starting a new list");
                Vec::new()
            }
        }
    }
}
