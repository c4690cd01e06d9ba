//! Modeling configuration, fact rows and evaluation records

use crate::error::{AppError, Result};
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Modeling configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ModelingConfig {
    /// Held-out fraction of the stratified split
    #[serde(default = "default_test_size")]
    #[validate(range(min = 0.01, max = 0.99))]
    pub test_size: f64,

    /// Seed for the split and every seeded estimator
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Claim amount at or above which a claim is severe
    #[serde(default = "default_severe_threshold")]
    #[validate(range(min = 0.0))]
    pub severe_threshold: f64,

    /// Number of features listed in the importance ranking
    #[serde(default = "default_top_features")]
    pub top_features: usize,

    #[serde(default)]
    #[validate(nested)]
    pub logistic_regression: LogisticRegressionParams,

    #[serde(default)]
    #[validate(nested)]
    pub random_forest: RandomForestParams,

    #[serde(default)]
    #[validate(nested)]
    pub gradient_boosting: GradientBoostingParams,
}

impl Default for ModelingConfig {
    fn default() -> Self {
        Self {
            test_size: default_test_size(),
            seed: default_seed(),
            severe_threshold: default_severe_threshold(),
            top_features: default_top_features(),
            logistic_regression: LogisticRegressionParams::default(),
            random_forest: RandomForestParams::default(),
            gradient_boosting: GradientBoostingParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogisticRegressionParams {
    /// Inverse L2 regularization strength; 0 disables the penalty
    #[validate(range(min = 0.0))]
    pub c: f64,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self { c: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RandomForestParams {
    #[validate(range(min = 1))]
    pub n_trees: usize,
    #[validate(range(min = 1))]
    pub max_depth: usize,
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradientBoostingParams {
    #[validate(range(min = 1))]
    pub n_estimators: usize,
    #[validate(range(min = 1))]
    pub max_depth: usize,
    #[validate(range(min = 0.0))]
    pub learning_rate: f64,
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 5,
            learning_rate: 0.1,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

fn default_test_size() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_severe_threshold() -> f64 {
    50_000.0
}

fn default_top_features() -> usize {
    15
}

/// Four-level claim grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Minor,
    Moderate,
    Significant,
    Severe,
}

impl Severity {
    pub fn from_amount(amount: f64, severe_threshold: f64) -> Self {
        if amount >= severe_threshold {
            Severity::Severe
        } else if amount >= 10_000.0 {
            Severity::Significant
        } else if amount >= 1_000.0 {
            Severity::Moderate
        } else {
            Severity::Minor
        }
    }

    pub fn is_severe(&self) -> bool {
        matches!(self, Severity::Severe)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Minor => write!(f, "Minor"),
            Severity::Moderate => write!(f, "Moderate"),
            Severity::Significant => write!(f, "Significant"),
            Severity::Severe => write!(f, "Severe"),
        }
    }
}

/// One row of the claims fact view, as read by the modeling path.
///
/// Flags derived with `CASE WHEN` in the view query are never null; the
/// remaining numeric fields are optional and imputed later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimFact {
    pub total_claim_amount: f64,

    // Demographics
    pub age: Option<f64>,
    pub is_male: f64,
    pub is_married: f64,
    pub education_level: Option<String>,
    pub occupation: Option<String>,

    // Vehicle
    pub vehicle_age: Option<f64>,
    pub vehicle_year: Option<f64>,
    pub vehicle_make: Option<String>,
    pub vehicle_type: Option<String>,
    pub is_red_car: f64,

    // Policy
    pub policy_annual_premium: Option<f64>,
    pub policy_deductible: Option<f64>,
    pub coverage_limit_bi: Option<f64>,
    pub months_as_customer: Option<f64>,

    // Incident
    pub incident_month: Option<f64>,
    pub incident_day_of_week: Option<f64>,
    pub incident_hour: Option<f64>,
    pub is_weekend: Option<f64>,
    pub incident_type: Option<String>,
    pub collision_type: Option<String>,
    pub incident_severity: Option<String>,
    pub vehicles_involved: Option<f64>,
    pub bodily_injuries_count: Option<f64>,
    pub witnesses_count: Option<f64>,
    pub has_police_report: f64,
    pub has_property_damage: f64,

    // Prior history
    pub prior_claim_count: Option<f64>,
    pub prior_claim_total: Option<f64>,
    pub mvr_points: Option<f64>,
    pub license_revoked: f64,

    // Financial
    pub income_annual: Option<f64>,
    pub home_value: Option<f64>,

    pub is_fraud: f64,
}

/// Claims at or above this amount are treated as outliers
pub const CLAIM_AMOUNT_CEILING: f64 = 1_000_000.0;

impl ClaimFact {
    pub fn severity(&self, severe_threshold: f64) -> Severity {
        Severity::from_amount(self.total_claim_amount, severe_threshold)
    }

    /// Positive amount below the outlier ceiling, with a known age
    pub fn in_modeling_scope(&self) -> bool {
        self.age.is_some()
            && self.total_claim_amount > 0.0
            && self.total_claim_amount < CLAIM_AMOUNT_CEILING
    }
}

/// Model type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Logistic regression
    LogisticRegression,

    /// Random forest
    RandomForest,

    /// Gradient boosting
    GradientBoosting,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::LogisticRegression => write!(f, "Logistic Regression"),
            ModelType::RandomForest => write!(f, "Random Forest"),
            ModelType::GradientBoosting => write!(f, "Gradient Boosting"),
        }
    }
}

/// Held-out evaluation of one binary classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Area under the ROC curve
    pub auc: f64,

    /// Accuracy
    pub accuracy: f64,

    /// Confusion matrix, rows are actual and columns predicted
    pub confusion_matrix: [[usize; 2]; 2],

    /// Per-class metrics, negative class first
    pub per_class_metrics: Vec<ClassMetrics>,

    pub macro_avg: ClassMetrics,

    pub weighted_avg: ClassMetrics,
}

/// Per-class evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Feature matrix with binary labels
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// 0 = not severe, 1 = severe
    pub labels: Vec<usize>,

    /// Column names, in matrix order
    pub feature_names: Vec<String>,

    /// Number of samples
    pub n_samples: usize,

    /// Number of features
    pub n_features: usize,
}

/// Train and test partitions plus the source row of each partition row
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: TrainingDataset,
    pub test: TrainingDataset,
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

impl TrainingDataset {
    pub fn new(
        features: Array2<f64>,
        labels: Vec<usize>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(AppError::Model(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        if features.ncols() != feature_names.len() {
            return Err(AppError::Model(format!(
                "{} feature columns but {} names",
                features.ncols(),
                feature_names.len()
            )));
        }
        Ok(Self {
            n_samples: features.nrows(),
            n_features: features.ncols(),
            features,
            labels,
            feature_names,
        })
    }

    pub fn positive_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    /// Rows at the given positions, in that order
    pub fn select(&self, indices: &[usize]) -> TrainingDataset {
        TrainingDataset {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            feature_names: self.feature_names.clone(),
            n_samples: indices.len(),
            n_features: self.n_features,
        }
    }

    /// Seeded split that keeps the class ratio in both partitions.
    ///
    /// The test partition holds `ceil(test_size * n)` rows. Each class
    /// contributes in proportion to its size; leftover rows go to the classes
    /// with the largest remainders.
    pub fn stratified_split(&self, test_size: f64, seed: u64) -> Result<DatasetSplit> {
        let n = self.n_samples;
        let n_test = (test_size * n as f64).ceil() as usize;
        if n_test == 0 || n_test >= n {
            return Err(AppError::Model(format!(
                "cannot hold out {} of {} rows",
                n_test, n
            )));
        }

        let mut by_class: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        for (idx, &label) in self.labels.iter().enumerate() {
            match label {
                0 | 1 => by_class[label].push(idx),
                other => {
                    return Err(AppError::Model(format!("label {} is not binary", other)))
                }
            }
        }
        if by_class.iter().any(|members| members.len() < 2) {
            return Err(AppError::Model(
                "each class needs at least two rows for a stratified split".to_string(),
            ));
        }
        // Every class keeps at least one training row
        if n_test > n - by_class.len() {
            return Err(AppError::Model(format!(
                "cannot hold out {} of {} rows",
                n_test, n
            )));
        }

        // Proportional allocation
        let exact: Vec<f64> = by_class
            .iter()
            .map(|members| n_test as f64 * members.len() as f64 / n as f64)
            .collect();
        let mut quota: Vec<usize> = exact.iter().map(|q| q.floor() as usize).collect();
        let mut remaining = n_test - quota.iter().sum::<usize>();
        let mut order: Vec<usize> = vec![0, 1];
        order.sort_by(|&a, &b| {
            let ra = exact[a] - exact[a].floor();
            let rb = exact[b] - exact[b].floor();
            rb.total_cmp(&ra)
        });
        for &class in order.iter().cycle() {
            if remaining == 0 {
                break;
            }
            if quota[class] < by_class[class].len() - 1 {
                quota[class] += 1;
                remaining -= 1;
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut train_indices = Vec::with_capacity(n - n_test);
        let mut test_indices = Vec::with_capacity(n_test);
        for (class, members) in by_class.iter().enumerate() {
            let mut shuffled = members.clone();
            shuffled.shuffle(&mut rng);
            let (test, train) = shuffled.split_at(quota[class]);
            test_indices.extend_from_slice(test);
            train_indices.extend_from_slice(train);
        }
        train_indices.sort_unstable();
        test_indices.sort_unstable();

        Ok(DatasetSplit {
            train: self.select(&train_indices),
            test: self.select(&test_indices),
            train_indices,
            test_indices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize, positives: usize) -> TrainingDataset {
        let features = Array2::from_shape_fn((n, 2), |(i, j)| (i * (j + 1)) as f64);
        let labels = (0..n).map(|i| usize::from(i < positives)).collect();
        TrainingDataset::new(features, labels, vec!["a".into(), "b".into()]).unwrap()
    }

    #[test]
    fn test_severity_grades() {
        assert_eq!(Severity::from_amount(50_000.0, 50_000.0), Severity::Severe);
        assert_eq!(Severity::from_amount(49_999.0, 50_000.0), Severity::Significant);
        assert_eq!(Severity::from_amount(1_000.0, 50_000.0), Severity::Moderate);
        assert_eq!(Severity::from_amount(999.0, 50_000.0), Severity::Minor);
        assert!(Severity::Severe.is_severe());
    }

    #[test]
    fn test_stratified_split_keeps_ratio() {
        let data = dataset(100, 30);
        let split = data.stratified_split(0.2, 42).unwrap();

        assert_eq!(split.test.n_samples, 20);
        assert_eq!(split.train.n_samples, 80);
        assert_eq!(split.test.positive_count(), 6);
        assert_eq!(split.train.positive_count(), 24);

        let mut all: Vec<usize> = split
            .train_indices
            .iter()
            .chain(split.test_indices.iter())
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_stratified_split_is_seeded() {
        let data = dataset(50, 10);
        let a = data.stratified_split(0.2, 7).unwrap();
        let b = data.stratified_split(0.2, 7).unwrap();
        let c = data.stratified_split(0.2, 8).unwrap();
        assert_eq!(a.test_indices, b.test_indices);
        assert_ne!(a.test_indices, c.test_indices);
    }

    #[test]
    fn test_stratified_split_needs_both_classes() {
        let data = dataset(20, 1);
        assert!(data.stratified_split(0.2, 42).is_err());
    }

    #[test]
    fn test_dataset_shape_mismatch() {
        let features = Array2::zeros((3, 2));
        assert!(TrainingDataset::new(features, vec![0, 1], vec!["a".into(), "b".into()]).is_err());
    }

    #[test]
    fn test_model_type_display() {
        assert_eq!(ModelType::LogisticRegression.to_string(), "Logistic Regression");
        assert_eq!(ModelType::GradientBoosting.to_string(), "Gradient Boosting");
    }

    #[test]
    fn test_modeling_config_validation() {
        let mut config = ModelingConfig::default();
        assert!(config.validate().is_ok());
        config.test_size = 1.5;
        assert!(config.validate().is_err());
    }
}
