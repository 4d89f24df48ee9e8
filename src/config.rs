//! TOML configuration for the anomaly scorer.
//!
//! Every option has a compiled-in default, so an empty file (or no file at
//! all) yields a working configuration. CLI flags are applied on top of
//! whatever was loaded.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "NETSCORE_CONFIG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a scoring run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScorerConfig {
    /// Delimited log file to score.
    pub input_path: PathBuf,
    /// Where the result table is written. Replaced atomically on success.
    pub output_path: PathBuf,
    /// Expected fraction of outliers, in `(0, 1)`.
    pub contamination: f64,
    /// Fixed RNG seed. `None` draws a fresh seed from the OS.
    pub seed: Option<u64>,
    /// Field delimiter for both input and output.
    pub delimiter: char,
    pub forest: ForestConfig,
    pub logging: LoggingConfig,
    pub feedback: FeedbackConfig,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/input/suricata_logs.csv"),
            output_path: PathBuf::from("data/output/anomaly_results.csv"),
            contamination: 0.01,
            seed: None,
            delimiter: ',',
            forest: ForestConfig::default(),
            logging: LoggingConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl ScorerConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded scorer configuration");
        Ok(config)
    }

    /// Resolve the configuration for a run:
    /// 1. An explicit path (from `--config`) must load, or the run fails.
    /// 2. The path in `NETSCORE_CONFIG`, if set and loadable.
    /// 3. Compiled-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "NETSCORE_CONFIG set but file could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file given, using compiled-in defaults");
        Ok(Self::default())
    }

    /// The delimiter as the single byte the CSV reader/writer expects, or
    /// `None` if it is not ASCII.
    pub fn delimiter_byte(&self) -> Option<u8> {
        u8::try_from(self.delimiter).ok().filter(u8::is_ascii)
    }

    /// Serialize back to TOML, e.g. for `netscore config`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Forest
// ---------------------------------------------------------------------------

/// Isolation forest sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of isolation trees in the ensemble.
    pub n_trees: usize,
    /// Rows drawn (without replacement) to grow each tree. Capped at the row count.
    pub max_samples: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Append-only log of failed runs.
    pub error_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            error_log_path: PathBuf::from("logs/error.log"),
        }
    }
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedbackConfig {
    pub path: PathBuf,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs/feedback.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
