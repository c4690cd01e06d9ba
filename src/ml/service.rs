//! End-to-end modeling run over the warehouse fact view

use crate::error::{AppError, Result};
use crate::ml::features::FeatureBuilder;
use crate::ml::insights::{ComparisonBasis, SeverityComparison};
use crate::ml::metrics::{ClassificationReport, CLASS_NAMES};
use crate::ml::models::{ClaimFact, ModelType, ModelingConfig, TrainingDataset};
use crate::ml::trainer::{ModelEvaluation, ModelTrainer};
use crate::warehouse::Warehouse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Held-out row scored by the best model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// 1 when the claim is severe
    pub actual_severity: usize,
    pub predicted_severity: usize,
    pub prediction_probability: f64,
    pub model_name: String,
    pub prediction_date: DateTime<Utc>,
    pub claim_amount: f64,
}

/// Everything one modeling run produces
#[derive(Debug, Clone)]
pub struct ModelingReport {
    pub n_rows: usize,
    pub n_features: usize,
    pub n_severe: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// One entry per classifier, in fitting order
    pub evaluations: Vec<ModelEvaluation>,
    pub best_model: ModelType,
    /// Empty when the best model has no importances
    pub top_features: Vec<(String, f64)>,
    pub actual_comparison: SeverityComparison,
    pub predicted_comparison: SeverityComparison,
    pub predictions: Vec<PredictionRecord>,
}

impl ModelingReport {
    pub fn best(&self) -> Option<&ModelEvaluation> {
        self.evaluations
            .iter()
            .find(|e| e.model_type == self.best_model)
    }
}

/// Reads the fact view and trains the severity classifiers
pub struct ModelingService {
    config: ModelingConfig,
    warehouse: Arc<dyn Warehouse>,
}

impl ModelingService {
    pub fn new(config: ModelingConfig, warehouse: Arc<dyn Warehouse>) -> Self {
        Self { config, warehouse }
    }

    /// Fetch in-scope facts from the warehouse and model them
    pub async fn run(&self) -> Result<ModelingReport> {
        let facts = self.warehouse.fetch_claim_facts().await?;
        info!(rows = facts.len(), "Loaded claim facts");
        self.run_on(&facts)
    }

    pub fn run_on(&self, facts: &[ClaimFact]) -> Result<ModelingReport> {
        if facts.is_empty() {
            return Err(AppError::Model("fact view returned no rows in scope".to_string()));
        }

        let matrix = FeatureBuilder::new().build(facts)?;
        let labels: Vec<usize> = facts
            .iter()
            .map(|f| usize::from(f.severity(self.config.severe_threshold).is_severe()))
            .collect();
        let dataset = TrainingDataset::new(matrix.values.clone(), labels, matrix.names.clone())?;
        info!(
            rows = dataset.n_samples,
            features = dataset.n_features,
            severe = dataset.positive_count(),
            "Feature matrix ready"
        );

        let outcome = ModelTrainer::new(self.config.clone()).train(&dataset)?;
        let best = outcome.best();
        let test_indices = &outcome.split.test_indices;

        let actual_comparison = SeverityComparison::compute(
            ComparisonBasis::Actual,
            facts
                .iter()
                .zip(matrix.derived.iter())
                .zip(dataset.labels.iter())
                .map(|((fact, derived), &label)| (fact, derived, label == 1)),
        );
        let predicted_comparison = SeverityComparison::compute(
            ComparisonBasis::Predicted,
            test_indices
                .iter()
                .zip(best.predictions.iter())
                .map(|(&idx, &pred)| (&facts[idx], &matrix.derived[idx], pred == 1)),
        );

        let prediction_date = Utc::now();
        let model_name = best.model_type.to_string();
        let predictions = test_indices
            .iter()
            .zip(best.predictions.iter().zip(best.probabilities.iter()))
            .map(|(&idx, (&predicted, &probability))| PredictionRecord {
                actual_severity: dataset.labels[idx],
                predicted_severity: predicted,
                prediction_probability: probability,
                model_name: model_name.clone(),
                prediction_date,
                claim_amount: facts[idx].total_claim_amount,
            })
            .collect::<Vec<_>>();
        info!(predictions = predictions.len(), "Prediction records assembled");

        Ok(ModelingReport {
            n_rows: dataset.n_samples,
            n_features: dataset.n_features,
            n_severe: dataset.positive_count(),
            train_rows: outcome.split.train.n_samples,
            test_rows: outcome.split.test.n_samples,
            best_model: best.model_type,
            top_features: best.top_features(self.config.top_features).to_vec(),
            actual_comparison,
            predicted_comparison,
            predictions,
            evaluations: outcome.evaluations,
        })
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

impl fmt::Display for ModelingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not_severe = self.n_rows - self.n_severe;
        writeln!(f, "Feature matrix: {} rows x {} features", self.n_rows, self.n_features)?;
        writeln!(
            f,
            "  - {}: {} ({:.1}%)",
            CLASS_NAMES[0],
            not_severe,
            pct(not_severe, self.n_rows)
        )?;
        writeln!(
            f,
            "  - {}: {} ({:.1}%)",
            CLASS_NAMES[1],
            self.n_severe,
            pct(self.n_severe, self.n_rows)
        )?;
        writeln!(f, "Training set: {} records", self.train_rows)?;
        writeln!(f, "Test set: {} records", self.test_rows)?;
        writeln!(f)?;

        for evaluation in &self.evaluations {
            writeln!(f, "{}: AUC-ROC {:.4}", evaluation.model_type, evaluation.metrics.auc)?;
        }
        writeln!(f)?;

        if let Some(best) = self.best() {
            writeln!(f, "Best Model: {}", best.model_type)?;
            writeln!(f, "AUC-ROC: {:.4}", best.metrics.auc)?;
            writeln!(f)?;
            writeln!(f, "Classification Report:")?;
            write!(f, "{}", ClassificationReport(&best.metrics))?;
            writeln!(f)?;
            let cm = best.metrics.confusion_matrix;
            writeln!(f, "Confusion Matrix:")?;
            writeln!(f, "[[{} {}]", cm[0][0], cm[0][1])?;
            writeln!(f, " [{} {}]]", cm[1][0], cm[1][1])?;
            writeln!(f)?;
        }

        if !self.top_features.is_empty() {
            writeln!(f, "Top {} features:", self.top_features.len())?;
            for (name, importance) in &self.top_features {
                writeln!(f, "  {:<28} {:.6}", name, importance)?;
            }
            writeln!(f)?;
        }

        write!(f, "{}", self.actual_comparison)?;
        writeln!(f)?;
        write!(f, "{}", self.predicted_comparison)?;
        writeln!(f)?;
        writeln!(f, "Created {} predictions", self.predictions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::InMemoryWarehouse;

    fn facts(n: usize) -> Vec<ClaimFact> {
        (0..n)
            .map(|i| {
                let severe = i % 4 == 0;
                ClaimFact {
                    total_claim_amount: if severe {
                        60_000.0 + i as f64
                    } else {
                        4_000.0 + i as f64
                    },
                    age: Some(25.0 + (i % 40) as f64),
                    vehicle_age: Some((i % 12) as f64),
                    bodily_injuries_count: Some(if severe { 2.0 } else { (i % 2) as f64 }),
                    prior_claim_count: Some((i % 3) as f64),
                    incident_hour: Some((i % 24) as f64),
                    incident_type: Some(
                        if severe {
                            "Multi-vehicle Collision"
                        } else {
                            "Parked Car"
                        }
                        .to_string(),
                    ),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn small_config() -> ModelingConfig {
        let mut config = ModelingConfig::default();
        config.random_forest.n_trees = 10;
        config.gradient_boosting.n_estimators = 10;
        config
    }

    #[tokio::test]
    async fn test_run_produces_one_prediction_per_test_row() {
        let warehouse = InMemoryWarehouse::new();
        warehouse.set_claim_facts(facts(100)).await;
        let service = ModelingService::new(small_config(), Arc::new(warehouse));

        let report = service.run().await.unwrap();
        assert_eq!(report.n_rows, 100);
        assert_eq!(report.n_severe, 25);
        assert_eq!(report.test_rows, 20);
        assert_eq!(report.predictions.len(), report.test_rows);
        assert_eq!(report.evaluations.len(), 3);
        assert!(report.best().is_some());
        assert_eq!(report.actual_comparison.severe.count, 25);
        let predicted = &report.predicted_comparison;
        assert_eq!(predicted.severe.count + predicted.other.count, 20);
        assert!(report.to_string().contains("Best Model"));
    }

    #[test]
    fn test_empty_input_is_a_model_error() {
        let service = ModelingService::new(small_config(), Arc::new(InMemoryWarehouse::new()));
        let err = service.run_on(&[]).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_ERROR");
    }
}
