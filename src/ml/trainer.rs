//! Model training and selection by test AUC

use crate::error::{AppError, Result};
use crate::ml::classifier::{default_classifiers, Classifier};
use crate::ml::metrics::evaluate;
use crate::ml::models::{DatasetSplit, ModelMetrics, ModelType, ModelingConfig, TrainingDataset};
use crate::ml::preprocessing::StandardScaler;
use tracing::info;

/// Held-out outputs of one fitted classifier
#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    pub model_type: ModelType,
    pub predictions: Vec<usize>,
    pub probabilities: Vec<f64>,
    pub metrics: ModelMetrics,
    /// Features ranked by importance, highest first
    pub feature_importances: Option<Vec<(String, f64)>>,
}

impl ModelEvaluation {
    pub fn top_features(&self, n: usize) -> &[(String, f64)] {
        match &self.feature_importances {
            Some(ranked) => &ranked[..n.min(ranked.len())],
            None => &[],
        }
    }
}

/// Result of fitting every configured classifier on one split
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub split: DatasetSplit,
    /// Evaluations in fitting order
    pub evaluations: Vec<ModelEvaluation>,
    best: usize,
}

impl TrainingOutcome {
    pub fn best(&self) -> &ModelEvaluation {
        &self.evaluations[self.best]
    }
}

/// Index of the highest AUC; the earliest evaluation wins a tie
pub fn select_best(evaluations: &[ModelEvaluation]) -> Option<usize> {
    evaluations
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, eval)| match best {
            Some((_, auc)) if eval.metrics.auc <= auc => best,
            _ => Some((idx, eval.metrics.auc)),
        })
        .map(|(idx, _)| idx)
}

/// Fits a line-up of classifiers on a common stratified split
pub struct ModelTrainer {
    config: ModelingConfig,
    classifiers: Vec<Box<dyn Classifier>>,
}

impl ModelTrainer {
    pub fn new(config: ModelingConfig) -> Self {
        let classifiers = default_classifiers(&config);
        Self::with_classifiers(config, classifiers)
    }

    pub fn with_classifiers(config: ModelingConfig, classifiers: Vec<Box<dyn Classifier>>) -> Self {
        Self {
            config,
            classifiers,
        }
    }

    pub fn train(&mut self, dataset: &TrainingDataset) -> Result<TrainingOutcome> {
        if self.classifiers.is_empty() {
            return Err(AppError::Model("no classifiers configured".to_string()));
        }

        let split = dataset.stratified_split(self.config.test_size, self.config.seed)?;
        info!(
            train_rows = split.train.n_samples,
            test_rows = split.test.n_samples,
            "Stratified split ready"
        );

        // Scaler sees training rows only
        let mut scaler = StandardScaler::new();
        let scaled_train = TrainingDataset {
            features: scaler.fit_transform(&split.train.features)?,
            ..split.train.clone()
        };
        let scaled_test_features = scaler.transform(&split.test.features)?;

        let mut evaluations = Vec::with_capacity(self.classifiers.len());
        for classifier in self.classifiers.iter_mut() {
            let model_type = classifier.model_type();
            let (train, test_features) = if classifier.requires_scaling() {
                (&scaled_train, &scaled_test_features)
            } else {
                (&split.train, &split.test.features)
            };

            info!(model = %model_type, "Training model");
            classifier.fit(train)?;

            let predictions = classifier.predict(test_features)?;
            let probabilities = classifier.predict_proba(test_features)?.to_vec();
            let metrics = evaluate(&split.test.labels, &predictions, &probabilities)?;
            info!(model = %model_type, auc = metrics.auc, "Model evaluated");

            let feature_importances = classifier.feature_importances().map(|importances| {
                let mut ranked: Vec<(String, f64)> = dataset
                    .feature_names
                    .iter()
                    .cloned()
                    .zip(importances)
                    .collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                ranked
            });

            evaluations.push(ModelEvaluation {
                model_type,
                predictions,
                probabilities,
                metrics,
                feature_importances,
            });
        }

        let best = select_best(&evaluations)
            .ok_or_else(|| AppError::Model("no model was evaluated".to_string()))?;
        info!(
            model = %evaluations[best].model_type,
            auc = evaluations[best].metrics.auc,
            "Best model selected"
        );

        Ok(TrainingOutcome {
            split,
            evaluations,
            best,
        })
    }
}
