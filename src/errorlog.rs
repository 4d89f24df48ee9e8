//! Append-only record of failed runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};

pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one block with the timestamp, the failing context and the
    /// full cause chain of `err`.
    pub fn record(&self, context: &str, err: &anyhow::Error) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut block = format!(
            "\n--- {} ---\n[Context] {}\n[Error] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            context,
            err
        );
        for cause in err.chain().skip(1) {
            block.push_str(&format!("[Cause] {}\n", cause));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open error log {}", self.path.display()))?;
        file.write_all(block.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}
