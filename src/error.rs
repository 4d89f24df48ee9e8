use std::path::PathBuf;

use thiserror::Error;

use crate::detect::ModelError;

/// Failure of a scoring run. Every variant is fatal to the run; nothing is
/// retried and no partial output is written.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed table in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("input {} already has an `anomaly` column", path.display())]
    LabelColumnExists { path: PathBuf },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ScoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Split a CSV error into the I/O or parse side of the taxonomy.
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        let path = path.into();
        if !matches!(source.kind(), csv::ErrorKind::Io(_)) {
            return Self::Parse { path, source };
        }
        match source.into_kind() {
            csv::ErrorKind::Io(source) => Self::Io { path, source },
            other => Self::Io {
                path,
                source: std::io::Error::other(format!("{:?}", other)),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoreError>;
