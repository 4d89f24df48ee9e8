//! The batch scoring job: load -> select features -> fit -> label -> write.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::config::ScorerConfig;
use crate::detect::forest::MIN_SAMPLES;
use crate::detect::{AnomalyLabel, ForestParams, IsolationForest, ModelError};
use crate::error::{Result, ScoreError};
use crate::table::Table;

impl From<&ScorerConfig> for ForestParams {
    fn from(cfg: &ScorerConfig) -> Self {
        Self {
            n_trees: cfg.forest.n_trees,
            max_samples: cfg.forest.max_samples,
            contamination: cfg.contamination,
            seed: cfg.seed,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub run_id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub rows: usize,
    pub outliers: usize,
    pub feature_columns: Vec<String>,
    pub contamination: f64,
    pub seed: Option<u64>,
    pub threshold: f64,
    /// Per-row labels, in input order.
    #[serde(skip)]
    pub labels: Vec<AnomalyLabel>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScoreReport {
    /// Outlier indices (0-based data rows).
    pub fn outlier_rows(&self) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_outlier())
            .map(|(i, _)| i)
            .collect()
    }
}

/// Labels for a loaded table plus the fitted model that produced them.
pub struct Scored {
    pub labels: Vec<AnomalyLabel>,
    pub feature_columns: Vec<String>,
    pub model: IsolationForest,
}

/// Fit a forest over the numeric columns of `table` and label every row.
pub fn score_table(table: &Table, params: &ForestParams) -> Result<Scored> {
    params.validate()?;
    // Row count is checked before typing: an empty table has no numeric
    // columns either, and "not enough rows" is the more useful report.
    if table.len() < MIN_SAMPLES {
        return Err(ModelError::InsufficientSamples {
            needed: MIN_SAMPLES,
            have: table.len(),
        }
        .into());
    }

    let features = table.feature_matrix()?;
    let model = IsolationForest::fit(&features, params)?;
    let labels = model.predict(&features)?;

    Ok(Scored {
        labels,
        feature_columns: features.columns().to_vec(),
        model,
    })
}

/// Run the whole job described by `config`.
///
/// Any failure aborts the run before the output is touched; a previous
/// result at `output_path` survives unchanged.
pub fn detect_anomalies(config: &ScorerConfig) -> Result<ScoreReport> {
    let run_id = Uuid::new_v4();
    let span = info_span!("score", %run_id);
    let _guard = span.enter();
    let started_at = Utc::now();

    let delimiter = config.delimiter_byte().ok_or_else(|| {
        ScoreError::InvalidConfig(format!(
            "delimiter {:?} is not a single ASCII byte",
            config.delimiter
        ))
    })?;
    let params = ForestParams::from(config);

    info!(
        input = %config.input_path.display(),
        contamination = params.contamination,
        seed = ?params.seed,
        n_trees = params.n_trees,
        "starting anomaly scoring"
    );

    let table = Table::load(&config.input_path, delimiter)?;
    if table.column_index(AnomalyLabel::COLUMN).is_some() {
        return Err(ScoreError::LabelColumnExists {
            path: config.input_path.clone(),
        });
    }

    let scored = score_table(&table, &params)?;
    table.write_labeled(&config.output_path, &scored.labels, delimiter)?;

    let outliers = scored.labels.iter().filter(|l| l.is_outlier()).count();
    if outliers == 0 {
        warn!("no rows scored above the contamination cutoff");
    }
    info!(
        rows = table.len(),
        outliers,
        output = %config.output_path.display(),
        "anomaly scoring complete"
    );

    Ok(ScoreReport {
        run_id,
        input_path: config.input_path.clone(),
        output_path: config.output_path.clone(),
        rows: table.len(),
        outliers,
        feature_columns: scored.feature_columns,
        contamination: params.contamination,
        seed: params.seed,
        threshold: scored.model.threshold(),
        labels: scored.labels,
        started_at,
        finished_at: Utc::now(),
    })
}
