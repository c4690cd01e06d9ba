//! Machine learning for claim severity
//!
//! This module provides:
//! - Feature derivation from the claims fact view
//! - Logistic regression, random forest and gradient boosting classifiers on smartcore
//! - Stratified evaluation and best-model selection by AUC-ROC
//! - Severe vs. non-severe profile comparison

pub mod classifier;
pub mod features;
pub mod insights;
pub mod metrics;
pub mod models;
pub mod preprocessing;
pub mod service;
pub mod trainer;

pub use classifier::{
    default_classifiers, Classifier, GradientBoostingClassifier, LogisticRegressionClassifier,
    RandomForestClassifier,
};
pub use features::{DerivedFeatures, FeatureBuilder, FeatureMatrix};
pub use insights::{ComparisonBasis, GroupProfile, RiskFactor, SeverityComparison};
pub use metrics::{evaluate, roc_auc, ClassificationReport};
pub use models::{
    ClaimFact, ClassMetrics, DatasetSplit, GradientBoostingParams, LogisticRegressionParams,
    ModelMetrics, ModelType, ModelingConfig, RandomForestParams, Severity, TrainingDataset,
};
pub use service::{ModelingReport, ModelingService, PredictionRecord};
pub use trainer::{ModelEvaluation, ModelTrainer, TrainingOutcome};
