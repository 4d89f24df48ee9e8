//! Isolation forest.
//!
//! Anomalies are few and different, so random axis-aligned splits separate
//! them from the rest after only a handful of cuts. Each tree is grown on a
//! random subsample; a point's score is derived from its average isolation
//! depth across the ensemble.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::threshold::{self, validate_contamination};
use super::{AnomalyLabel, FeatureMatrix, ModelError};

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Fewest rows that can be fitted: isolation needs something to isolate from.
pub const MIN_SAMPLES: usize = 2;

/// Training parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: Option<u64>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: 0.01,
            seed: None,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        validate_contamination(self.contamination)?;
        if self.n_trees == 0 {
            return Err(ModelError::InvalidParams("n_trees must be at least 1".into()));
        }
        if self.max_samples < MIN_SAMPLES {
            return Err(ModelError::InvalidParams(format!(
                "max_samples must be at least {}, got {}",
                MIN_SAMPLES, self.max_samples
            )));
        }
        Ok(())
    }
}

/// Average path length of an unsuccessful BST search over `n` points,
/// used both to normalize depths and to credit leaves holding several rows.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// A fitted ensemble together with its contamination cutoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    threshold: f64,
}

impl IsolationForest {
    /// Grow `params.n_trees` trees over `data` and calibrate the cutoff so
    /// that roughly `contamination` of the training rows score above it.
    pub fn fit(data: &FeatureMatrix, params: &ForestParams) -> Result<Self, ModelError> {
        params.validate()?;
        if data.n_rows() < MIN_SAMPLES {
            return Err(ModelError::InsufficientSamples {
                needed: MIN_SAMPLES,
                have: data.n_rows(),
            });
        }

        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let sample_size = params.max_samples.min(data.n_rows());
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        debug!(
            n_trees = params.n_trees,
            sample_size,
            max_depth,
            n_features = data.n_features(),
            "growing isolation forest"
        );

        let trees = (0..params.n_trees)
            .map(|_| {
                let mut rows = index::sample(&mut rng, data.n_rows(), sample_size).into_vec();
                IsolationTree::grow(data, &mut rows, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features: data.n_features(),
            threshold: f64::INFINITY,
        };

        let scores = forest.score_samples(data)?;
        forest.threshold = threshold::contamination_threshold(&scores, params.contamination)?;
        info!(
            threshold = forest.threshold,
            contamination = params.contamination,
            "isolation forest fitted"
        );

        Ok(forest)
    }

    /// Assemble a model from pre-built trees and an explicit cutoff.
    pub fn from_trees(
        trees: Vec<IsolationTree>,
        sample_size: usize,
        n_features: usize,
        threshold: f64,
    ) -> Result<Self, ModelError> {
        if trees.is_empty() {
            return Err(ModelError::InvalidParams("forest needs at least one tree".into()));
        }
        if sample_size < MIN_SAMPLES {
            return Err(ModelError::InvalidParams(format!(
                "sample_size must be at least {}, got {}",
                MIN_SAMPLES, sample_size
            )));
        }
        if n_features == 0 {
            return Err(ModelError::NoNumericColumns);
        }
        if let Some(max) = trees.iter().filter_map(IsolationTree::max_feature).max() {
            if max >= n_features {
                return Err(ModelError::DimensionMismatch {
                    expected: max + 1,
                    got: n_features,
                });
            }
        }
        Ok(Self {
            trees,
            sample_size,
            n_features,
            threshold,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Anomaly score in `(0, 1]` for one feature vector; higher is more anomalous.
    pub fn score(&self, sample: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(sample)).sum();
        let mean_depth = total / self.trees.len() as f64;
        2f64.powf(-mean_depth / average_path_length(self.sample_size))
    }

    pub fn score_samples(&self, data: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        self.check_width(data)?;
        Ok(data.rows().map(|row| self.score(row)).collect())
    }

    /// Label every row of `data`, in row order.
    pub fn predict(&self, data: &FeatureMatrix) -> Result<Vec<AnomalyLabel>, ModelError> {
        Ok(self
            .score_samples(data)?
            .into_iter()
            .map(|s| threshold::label(s, self.threshold))
            .collect())
    }

    fn check_width(&self, data: &FeatureMatrix) -> Result<(), ModelError> {
        if data.n_features() != self.n_features {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features,
                got: data.n_features(),
            });
        }
        Ok(())
    }
}

/// One randomized partition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    root: IsolationNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IsolationNode {
    /// Rows that were not separated further; `size` of them ended here.
    Leaf { size: usize },
    /// Values `< split` go left, everything else right.
    Split {
        feature: usize,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
}

impl IsolationNode {
    pub fn leaf(size: usize) -> Self {
        IsolationNode::Leaf { size }
    }

    pub fn split(feature: usize, split: f64, left: IsolationNode, right: IsolationNode) -> Self {
        IsolationNode::Split {
            feature,
            split,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl IsolationTree {
    pub fn new(root: IsolationNode) -> Self {
        Self { root }
    }

    fn grow(data: &FeatureMatrix, rows: &mut [usize], max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::grow_node(data, rows, 0, max_depth, rng),
        }
    }

    fn grow_node(
        data: &FeatureMatrix,
        rows: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> IsolationNode {
        if depth >= max_depth || rows.len() <= 1 {
            return IsolationNode::leaf(rows.len());
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..data.n_features())
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = data.row(r)[f];
                    (lo.min(v), hi.max(v))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return IsolationNode::leaf(rows.len());
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let split = draw_split(lo, hi, rng);

        // In-place partition: [0, mid) goes left.
        let mut mid = 0;
        for i in 0..rows.len() {
            if data.row(rows[i])[feature] < split {
                rows.swap(i, mid);
                mid += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(mid);

        IsolationNode::split(
            feature,
            split,
            Self::grow_node(data, left_rows, depth + 1, max_depth, rng),
            Self::grow_node(data, right_rows, depth + 1, max_depth, rng),
        )
    }

    /// Depth at which `sample` lands, plus the expected remaining depth for
    /// the rows sharing its leaf.
    pub fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Leaf { size } => {
                    return depth as f64 + average_path_length(*size);
                }
                IsolationNode::Split {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *split { &**left } else { &**right };
                    depth += 1;
                }
            }
        }
    }

    fn max_feature(&self) -> Option<usize> {
        fn walk(node: &IsolationNode) -> Option<usize> {
            match node {
                IsolationNode::Leaf { .. } => None,
                IsolationNode::Split {
                    feature, left, right, ..
                } => [Some(*feature), walk(left), walk(right)].into_iter().flatten().max(),
            }
        }
        walk(&self.root)
    }
}

/// Uniform split in `[lo, hi)`. Convex combination: `hi - lo` overflows for
/// columns spanning most of the f64 range.
fn draw_split(lo: f64, hi: f64, rng: &mut StdRng) -> f64 {
    let u: f64 = rng.gen();
    let split = lo * (1.0 - u) + hi * u;
    if split.is_finite() && split >= lo && split < hi {
        split
    } else {
        lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: Vec<Vec<f64>>) -> FeatureMatrix {
        let width = rows.first().map(|r| r.len()).unwrap_or(1);
        let columns = (0..width).map(|i| format!("f{}", i)).collect();
        FeatureMatrix::from_rows(columns, rows).unwrap()
    }

    /// Tight cluster around (10, 10) plus one far point at (100, 100).
    fn cluster_with_outlier() -> FeatureMatrix {
        let mut rows: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![10.0 + (i % 5) as f64 * 0.1, 10.0 + (i % 7) as f64 * 0.1])
            .collect();
        rows.push(vec![100.0, 100.0]);
        matrix(rows)
    }

    fn params(seed: u64) -> ForestParams {
        ForestParams {
            n_trees: 50,
            max_samples: 256,
            contamination: 0.05,
            seed: Some(seed),
        }
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c_10 = average_path_length(10);
        let c_256 = average_path_length(256);
        assert!(c_256 > c_10, "c(256)={} should be > c(10)={}", c_256, c_10);
        // Known value for the default subsample size.
        assert!((c_256 - 10.2448).abs() < 1e-3, "c(256)={}", c_256);
    }

    #[test]
    fn test_prefit_model_scores_far_point_higher() {
        // One stump: anything >= 50 on feature 0 is isolated after one cut,
        // the rest sit in a leaf of 9.
        let tree = IsolationTree::new(IsolationNode::split(
            0,
            50.0,
            IsolationNode::leaf(9),
            IsolationNode::leaf(1),
        ));
        let forest = IsolationForest::from_trees(vec![tree], 10, 2, 0.6).unwrap();

        let data = matrix(vec![vec![1.0, 1.0], vec![2.0, 1.5], vec![99.0, 1.0]]);
        let scores = forest.score_samples(&data).unwrap();

        // Far point: depth 1 -> 2^(-1/c(10)).
        let expected_far = 2f64.powf(-1.0 / average_path_length(10));
        assert!((scores[2] - expected_far).abs() < 1e-12);
        assert!(scores[2] > scores[0]);
        assert_eq!(scores[0], scores[1]);

        let labels = forest.predict(&data).unwrap();
        assert_eq!(
            labels,
            vec![AnomalyLabel::Inlier, AnomalyLabel::Inlier, AnomalyLabel::Outlier]
        );
    }

    #[test]
    fn test_from_trees_rejects_out_of_range_feature() {
        let tree = IsolationTree::new(IsolationNode::split(
            3,
            1.0,
            IsolationNode::leaf(1),
            IsolationNode::leaf(1),
        ));
        let err = IsolationForest::from_trees(vec![tree], 2, 2, 0.5).unwrap_err();
        assert_eq!(err, ModelError::DimensionMismatch { expected: 4, got: 2 });
    }

    #[test]
    fn test_fit_isolates_far_point() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, &params(7)).unwrap();

        assert_eq!(forest.n_trees(), 50);
        assert_eq!(forest.sample_size(), 41);

        let scores = forest.score_samples(&data).unwrap();
        let (argmax, _) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(argmax, 40);

        let labels = forest.predict(&data).unwrap();
        assert_eq!(labels[40], AnomalyLabel::Outlier);
        assert!(scores.iter().all(|&s| s > 0.0 && s <= 1.0));
    }

    #[test]
    fn test_same_seed_same_model() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, &params(11)).unwrap();
        let b = IsolationForest::fit(&data, &params(11)).unwrap();
        assert_eq!(a.score_samples(&data).unwrap(), b.score_samples(&data).unwrap());
        assert_eq!(a.predict(&data).unwrap(), b.predict(&data).unwrap());
    }

    #[test]
    fn test_constant_features_never_split() {
        let data = matrix(vec![vec![5.0, 5.0]; 20]);
        let forest = IsolationForest::fit(&data, &params(3)).unwrap();
        let labels = forest.predict(&data).unwrap();
        // Every row is indistinguishable, so nobody scores above the cutoff.
        assert!(labels.iter().all(|l| !l.is_outlier()));
    }

    #[test]
    fn test_insufficient_samples() {
        let data = matrix(vec![vec![1.0]]);
        let err = IsolationForest::fit(&data, &params(1)).unwrap_err();
        assert_eq!(err, ModelError::InsufficientSamples { needed: 2, have: 1 });
    }

    #[test]
    fn test_invalid_params() {
        let data = cluster_with_outlier();
        let mut p = params(1);
        p.n_trees = 0;
        assert!(matches!(
            IsolationForest::fit(&data, &p),
            Err(ModelError::InvalidParams(_))
        ));

        let mut p = params(1);
        p.contamination = 0.0;
        assert_eq!(
            IsolationForest::fit(&data, &p).unwrap_err(),
            ModelError::InvalidContamination(0.0)
        );
    }

    #[test]
    fn test_extreme_magnitudes_fit_without_overflow() {
        let mut rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 1.0]).collect();
        rows.push(vec![-1.7e308, 1.0]);
        rows.push(vec![1.7e308, 1.0]);
        let data = matrix(rows);

        let forest = IsolationForest::fit(&data, &params(1)).unwrap();
        let scores = forest.score_samples(&data).unwrap();
        assert!(scores.iter().all(|s| s.is_finite() && *s > 0.0 && *s <= 1.0));
        assert_eq!(forest.predict(&data).unwrap().len(), 22);
    }

    #[test]
    fn test_draw_split_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..1000 {
            let s = draw_split(-f64::MAX, f64::MAX, &mut rng);
            assert!(s.is_finite() && s < f64::MAX);
            let s = draw_split(1.0, 1.0 + f64::EPSILON, &mut rng);
            assert!((1.0..1.0 + f64::EPSILON).contains(&s));
        }
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let forest = IsolationForest::fit(&cluster_with_outlier(), &params(5)).unwrap();
        let narrow = matrix(vec![vec![1.0], vec![2.0]]);
        assert_eq!(
            forest.predict(&narrow).unwrap_err(),
            ModelError::DimensionMismatch { expected: 2, got: 1 }
        );
    }
}
