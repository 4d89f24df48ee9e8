//! Isolation-forest outlier detection over numeric feature vectors.

pub mod features;
pub mod forest;
pub mod threshold;

pub use features::FeatureMatrix;
pub use forest::{ForestParams, IsolationForest, IsolationNode, IsolationTree};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("no numeric columns to build features from")]
    NoNumericColumns,

    #[error("insufficient samples: need {needed} rows, have {have}")]
    InsufficientSamples { needed: usize, have: usize },

    #[error("contamination must be in (0, 1), got {0}")]
    InvalidContamination(f64),

    #[error("invalid forest parameters: {0}")]
    InvalidParams(String),

    #[error("missing or non-finite value in column `{column}` at row {row}")]
    NonFiniteValue { row: usize, column: String },

    #[error("row {row} has {got} features, expected {expected}")]
    RaggedRow { row: usize, expected: usize, got: usize },

    #[error("feature width mismatch: model expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Per-row verdict. Serialized as `-1` (outlier) / `1` (inlier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum AnomalyLabel {
    Outlier,
    Inlier,
}

impl AnomalyLabel {
    /// Name of the column the label is written to.
    pub const COLUMN: &'static str = "anomaly";

    pub fn as_i8(self) -> i8 {
        match self {
            AnomalyLabel::Outlier => -1,
            AnomalyLabel::Inlier => 1,
        }
    }

    pub fn is_outlier(self) -> bool {
        self == AnomalyLabel::Outlier
    }

    /// Parse a label cell as written by the scorer.
    pub fn parse(cell: &str) -> Option<Self> {
        match cell.trim() {
            "-1" => Some(AnomalyLabel::Outlier),
            "1" => Some(AnomalyLabel::Inlier),
            _ => None,
        }
    }
}

impl fmt::Display for AnomalyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

impl From<AnomalyLabel> for i8 {
    fn from(label: AnomalyLabel) -> i8 {
        label.as_i8()
    }
}

impl TryFrom<i8> for AnomalyLabel {
    type Error = String;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(AnomalyLabel::Outlier),
            1 => Ok(AnomalyLabel::Inlier),
            other => Err(format!("anomaly label must be -1 or 1, got {}", other)),
        }
    }
}
