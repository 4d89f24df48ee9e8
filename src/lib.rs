//! netscore -- isolation-forest anomaly scoring for network monitoring logs.
//!
//! This crate loads a delimited log export, fits an isolation forest over its
//! numeric columns, and writes the table back with a trailing `anomaly`
//! column (`-1` outlier, `1` inlier). Export, analyst feedback and an error
//! log round out the batch tooling.

pub mod config;
pub mod detect;
pub mod error;
pub mod errorlog;
pub mod export;
pub mod feedback;
pub mod pipeline;
pub mod storage;
pub mod table;

pub use config::ScorerConfig;
pub use detect::{AnomalyLabel, ModelError};
pub use error::ScoreError;
pub use pipeline::{detect_anomalies, ScoreReport};

/// Score the default input with default settings, as a plain library call.
pub fn run_default() -> Result<ScoreReport, ScoreError> {
    detect_anomalies(&ScorerConfig::default())
}
