//! Severity classifiers behind one training and scoring trait

use crate::error::{AppError, Result};
use crate::ml::models::{
    GradientBoostingParams, LogisticRegressionParams, ModelType, ModelingConfig,
    RandomForestParams, TrainingDataset,
};
use crate::ml::preprocessing::to_dense_matrix;
use ndarray::{Array1, Array2, Axis};
use rand::seq::{index, SliceRandom};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters, SplitCriterion,
};
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use tracing::debug;

type TreeClassifier = DecisionTreeClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;
type TreeRegressor = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Binary classifier over a fixed feature matrix
pub trait Classifier: Send + Sync {
    /// Train the classifier
    fn fit(&mut self, dataset: &TrainingDataset) -> Result<()>;

    /// Probability of the positive class per row
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>>;

    /// Predict class labels
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<usize>> {
        Ok(self
            .predict_proba(features)?
            .iter()
            .map(|&p| usize::from(p > 0.5))
            .collect())
    }

    /// Importance per feature, for models that expose one
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Get model type
    fn model_type(&self) -> ModelType;

    /// Whether the model expects standardized inputs
    fn requires_scaling(&self) -> bool {
        false
    }

    /// Check if model is trained
    fn is_trained(&self) -> bool;
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let exp_z = z.exp();
        exp_z / (1.0 + exp_z)
    }
}

fn ensure_width(expected: usize, features: &Array2<f64>) -> Result<()> {
    if features.ncols() != expected {
        return Err(AppError::Model(format!(
            "model trained on {} features, got {}",
            expected,
            features.ncols()
        )));
    }
    Ok(())
}

fn not_trained(model: ModelType) -> AppError {
    AppError::Model(format!("{} is not trained", model))
}

fn smartcore_error(model: ModelType, e: smartcore::error::Failed) -> AppError {
    AppError::Model(format!("{} failed: {}", model, e))
}

fn class_labels(dataset: &TrainingDataset) -> Vec<i32> {
    dataset.labels.iter().map(|&l| l as i32).collect()
}

fn depth_limit(depth: usize) -> u16 {
    u16::try_from(depth).unwrap_or(u16::MAX)
}

/// L2-regularized logistic regression fitted by smartcore's L-BFGS solver
pub struct LogisticRegressionClassifier {
    params: LogisticRegressionParams,
    weights: Option<Array1<f64>>,
    bias: f64,
}

impl LogisticRegressionClassifier {
    pub fn new(params: LogisticRegressionParams) -> Self {
        Self {
            params,
            weights: None,
            bias: 0.0,
        }
    }
}

impl Classifier for LogisticRegressionClassifier {
    fn fit(&mut self, dataset: &TrainingDataset) -> Result<()> {
        if dataset.n_samples == 0 {
            return Err(AppError::Model("cannot fit on zero rows".to_string()));
        }
        let x = to_dense_matrix(&dataset.features)?;
        let y = class_labels(dataset);
        // smartcore's alpha weighs 0.5 * |w|^2 against the summed loss
        let alpha = if self.params.c > 0.0 {
            1.0 / self.params.c
        } else {
            0.0
        };

        let params = LogisticRegressionParameters::default().with_alpha(alpha);
        let model = LogisticRegression::fit(&x, &y, params)
            .map_err(|e| smartcore_error(self.model_type(), e))?;
        if model.classes().len() != 2 {
            return Err(AppError::Model(
                "logistic regression needs exactly two classes".to_string(),
            ));
        }

        let coefficients = model.coefficients();
        self.weights = Some(
            (0..dataset.n_features)
                .map(|j| *coefficients.get((0, j)))
                .collect(),
        );
        self.bias = *model.intercept().get((0, 0));
        debug!(alpha = alpha, "Logistic regression fitted");
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| not_trained(self.model_type()))?;
        ensure_width(weights.len(), features)?;
        Ok((features.dot(weights) + self.bias).mapv(sigmoid))
    }

    fn model_type(&self) -> ModelType {
        ModelType::LogisticRegression
    }

    fn requires_scaling(&self) -> bool {
        true
    }

    fn is_trained(&self) -> bool {
        self.weights.is_some()
    }
}

struct SubspaceTree {
    columns: Vec<usize>,
    tree: TreeClassifier,
}

/// Bagged smartcore Gini trees. Every tree sees a class-stratified bootstrap
/// of the rows and a random half of the columns.
pub struct RandomForestClassifier {
    params: RandomForestParams,
    seed: u64,
    trees: Vec<SubspaceTree>,
    n_features: usize,
}

impl RandomForestClassifier {
    pub fn new(params: RandomForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    fn tree_params(&self) -> DecisionTreeClassifierParameters {
        let mut params = DecisionTreeClassifierParameters::default()
            .with_criterion(SplitCriterion::Gini)
            .with_max_depth(depth_limit(self.params.max_depth))
            .with_min_samples_split(self.params.min_samples_split)
            .with_min_samples_leaf(self.params.min_samples_leaf);
        params.seed = Some(self.seed);
        params
    }
}

/// Resample each class with replacement up to its own size
fn stratified_bootstrap(labels: &[usize], rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut rows = Vec::with_capacity(labels.len());
    for class in 0..2 {
        let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        for _ in 0..members.len() {
            rows.push(members[rng.gen_range(0..members.len())]);
        }
    }
    rows
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, dataset: &TrainingDataset) -> Result<()> {
        if dataset.n_samples == 0 || dataset.n_features == 0 {
            return Err(AppError::Model("cannot fit on an empty matrix".to_string()));
        }
        let subspace = dataset.n_features.div_ceil(2);
        let params = self.tree_params();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let mut trees = Vec::with_capacity(self.params.n_trees);
        for _ in 0..self.params.n_trees {
            let rows = stratified_bootstrap(&dataset.labels, &mut rng);
            let mut columns = index::sample(&mut rng, dataset.n_features, subspace).into_vec();
            columns.sort_unstable();

            let x = dataset.features.select(Axis(0), &rows).select(Axis(1), &columns);
            let y: Vec<i32> = rows.iter().map(|&i| dataset.labels[i] as i32).collect();
            let tree = DecisionTreeClassifier::fit(&to_dense_matrix(&x)?, &y, params.clone())
                .map_err(|e| smartcore_error(self.model_type(), e))?;
            trees.push(SubspaceTree { columns, tree });
        }
        self.trees = trees;
        self.n_features = dataset.n_features;

        debug!(trees = self.trees.len(), subspace = subspace, "Random forest fitted");
        Ok(())
    }

    /// Share of trees voting for the positive class
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(not_trained(self.model_type()));
        }
        ensure_width(self.n_features, features)?;

        let mut votes = Array1::<f64>::zeros(features.nrows());
        for member in &self.trees {
            let x = to_dense_matrix(&features.select(Axis(1), &member.columns))?;
            let proba = member
                .tree
                .predict_proba(&x)
                .map_err(|e| smartcore_error(self.model_type(), e))?;
            for (i, vote) in votes.iter_mut().enumerate() {
                *vote += *proba.get((i, 1));
            }
        }
        Ok(votes / self.trees.len() as f64)
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if self.trees.is_empty() {
            return None;
        }
        let mut totals = vec![0.0; self.n_features];
        for member in &self.trees {
            let tree_importances = member.tree.compute_feature_importances(false);
            let sum: f64 = tree_importances.iter().sum();
            if sum <= 0.0 {
                continue;
            }
            for (&column, imp) in member.columns.iter().zip(tree_importances) {
                totals[column] += imp / sum;
            }
        }
        Some(normalized(totals))
    }

    fn model_type(&self) -> ModelType {
        ModelType::RandomForest
    }

    fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }
}

/// Boosted smartcore regression trees on the binomial deviance.
///
/// Each stage fits the residual `y - p`, then scales the tree output by one
/// Newton step `sum(r f) / sum(p (1 - p) f^2)` over the training rows.
/// Importances are the clipped rise in training log-loss when one column is
/// shuffled.
pub struct GradientBoostingClassifier {
    params: GradientBoostingParams,
    seed: u64,
    init_score: f64,
    stages: Vec<(f64, TreeRegressor)>,
    n_features: usize,
    importances: Option<Vec<f64>>,
}

impl GradientBoostingClassifier {
    pub fn new(params: GradientBoostingParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            init_score: 0.0,
            stages: Vec::new(),
            n_features: 0,
            importances: None,
        }
    }

    fn raw_scores(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>> {
        let mut scores = vec![self.init_score; x.shape().0];
        for (step, tree) in &self.stages {
            let update = tree
                .predict(x)
                .map_err(|e| smartcore_error(ModelType::GradientBoosting, e))?;
            for (score, u) in scores.iter_mut().zip(update) {
                *score += self.params.learning_rate * step * u;
            }
        }
        Ok(scores)
    }

    fn log_loss(&self, features: &Array2<f64>, labels: &[usize]) -> Result<f64> {
        let scores = self.raw_scores(&to_dense_matrix(features)?)?;
        let total: f64 = scores
            .iter()
            .zip(labels)
            .map(|(&s, &y)| {
                let p = sigmoid(s).clamp(1e-15, 1.0 - 1e-15);
                if y == 1 {
                    -p.ln()
                } else {
                    -(1.0 - p).ln()
                }
            })
            .sum();
        Ok(total / labels.len() as f64)
    }

    fn permutation_importances(&self, dataset: &TrainingDataset) -> Result<Vec<f64>> {
        let baseline = self.log_loss(&dataset.features, &dataset.labels)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut rises = Vec::with_capacity(dataset.n_features);
        for j in 0..dataset.n_features {
            let mut shuffled = dataset.features.clone();
            let mut column: Vec<f64> = shuffled.column(j).to_vec();
            column.shuffle(&mut rng);
            shuffled.column_mut(j).assign(&Array1::from(column));
            let loss = self.log_loss(&shuffled, &dataset.labels)?;
            rises.push((loss - baseline).max(0.0));
        }
        Ok(normalized(rises))
    }
}

impl Classifier for GradientBoostingClassifier {
    fn fit(&mut self, dataset: &TrainingDataset) -> Result<()> {
        let n = dataset.n_samples;
        let positives = dataset.positive_count();
        if positives == 0 || positives == n {
            return Err(AppError::Model(
                "gradient boosting needs both classes in the training set".to_string(),
            ));
        }

        let y: Vec<f64> = dataset.labels.iter().map(|&l| l as f64).collect();
        let prior = positives as f64 / n as f64;
        self.init_score = (prior / (1.0 - prior)).ln();

        let mut params = DecisionTreeRegressorParameters::default()
            .with_max_depth(depth_limit(self.params.max_depth))
            .with_min_samples_split(self.params.min_samples_split)
            .with_min_samples_leaf(self.params.min_samples_leaf);
        params.seed = Some(self.seed);

        let x = to_dense_matrix(&dataset.features)?;
        let mut scores = vec![self.init_score; n];
        self.stages.clear();

        for _ in 0..self.params.n_estimators {
            let probs: Vec<f64> = scores.iter().map(|&s| sigmoid(s)).collect();
            let residuals: Vec<f64> = y.iter().zip(&probs).map(|(t, p)| t - p).collect();

            let tree = TreeRegressor::fit(&x, &residuals, params.clone())
                .map_err(|e| smartcore_error(self.model_type(), e))?;
            let update = tree
                .predict(&x)
                .map_err(|e| smartcore_error(self.model_type(), e))?;

            let (num, den) = residuals.iter().zip(&probs).zip(&update).fold(
                (0.0, 0.0),
                |(num, den), ((r, p), u)| (num + r * u, den + p * (1.0 - p) * u * u),
            );
            if den < 1e-150 {
                break;
            }
            let step = num / den;
            for (score, u) in scores.iter_mut().zip(&update) {
                *score += self.params.learning_rate * step * u;
            }
            self.stages.push((step, tree));
        }
        self.n_features = dataset.n_features;
        self.importances = Some(self.permutation_importances(dataset)?);

        debug!(stages = self.stages.len(), "Gradient boosting fitted");
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        if self.importances.is_none() {
            return Err(not_trained(self.model_type()));
        }
        ensure_width(self.n_features, features)?;
        let scores = self.raw_scores(&to_dense_matrix(features)?)?;
        Ok(scores.into_iter().map(sigmoid).collect())
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.importances.clone()
    }

    fn model_type(&self) -> ModelType {
        ModelType::GradientBoosting
    }

    fn is_trained(&self) -> bool {
        self.importances.is_some()
    }
}

/// Rescaled to sum to one; an all-zero vector is returned as is
fn normalized(mut values: Vec<f64>) -> Vec<f64> {
    let sum: f64 = values.iter().sum();
    if sum > 0.0 {
        for value in &mut values {
            *value /= sum;
        }
    }
    values
}

/// The default model line-up, in evaluation order
pub fn default_classifiers(config: &ModelingConfig) -> Vec<Box<dyn Classifier>> {
    vec![
        Box::new(LogisticRegressionClassifier::new(
            config.logistic_regression.clone(),
        )),
        Box::new(RandomForestClassifier::new(
            config.random_forest.clone(),
            config.seed,
        )),
        Box::new(GradientBoostingClassifier::new(
            config.gradient_boosting.clone(),
            config.seed,
        )),
    ]
}
