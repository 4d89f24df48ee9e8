//! Score-to-label cutoff derived from the contamination ratio.

use super::{AnomalyLabel, ModelError};

/// Reject contamination ratios outside the open interval `(0, 1)`.
pub fn validate_contamination(contamination: f64) -> Result<(), ModelError> {
    if contamination.is_finite() && contamination > 0.0 && contamination < 1.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidContamination(contamination))
    }
}

/// `q`-quantile of `values` with linear interpolation between closest ranks.
/// Returns `None` for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Cutoff above which roughly `contamination` of `scores` fall.
pub fn contamination_threshold(scores: &[f64], contamination: f64) -> Result<f64, ModelError> {
    validate_contamination(contamination)?;
    quantile(scores, 1.0 - contamination).ok_or(ModelError::InsufficientSamples {
        needed: 1,
        have: 0,
    })
}

/// Higher scores are more anomalous; only scores strictly above the cutoff
/// are outliers.
pub fn label(score: f64, threshold: f64) -> AnomalyLabel {
    if score > threshold {
        AnomalyLabel::Outlier
    } else {
        AnomalyLabel::Inlier
    }
}
