//! Binary classification metrics

use crate::error::{AppError, Result};
use crate::ml::models::{ClassMetrics, ModelMetrics};
use smartcore::metrics::roc_auc_score;
use std::fmt;

pub const CLASS_NAMES: [&str; 2] = ["Not Severe", "Severe"];

/// Area under the ROC curve; tied scores share their average rank
pub fn roc_auc(y_true: &[usize], scores: &[f64]) -> Result<f64> {
    if y_true.len() != scores.len() {
        return Err(AppError::Model(format!(
            "{} labels but {} scores",
            y_true.len(),
            scores.len()
        )));
    }
    let n_pos = y_true.iter().filter(|&&y| y == 1).count();
    if n_pos == 0 || n_pos == y_true.len() {
        return Err(AppError::Model(
            "AUC is undefined when only one class is present".to_string(),
        ));
    }

    // smartcore groups ties by input position, so feed it ascending scores
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let labels: Vec<f64> = order
        .iter()
        .map(|&i| if y_true[i] == 1 { 1.0 } else { 0.0 })
        .collect();
    let sorted: Vec<f64> = order.iter().map(|&i| scores[i]).collect();

    Ok(roc_auc_score(&labels, &sorted))
}

/// Rows are actual class, columns predicted class
pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize]) -> [[usize; 2]; 2] {
    let mut matrix = [[0usize; 2]; 2];
    for (&actual, &predicted) in y_true.iter().zip(y_pred) {
        if actual < 2 && predicted < 2 {
            matrix[actual][predicted] += 1;
        }
    }
    matrix
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn class_metrics(matrix: &[[usize; 2]; 2], class: usize) -> ClassMetrics {
    let other = 1 - class;
    let tp = matrix[class][class];
    let fp = matrix[other][class];
    let fn_ = matrix[class][other];
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1_score = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassMetrics {
        label: CLASS_NAMES[class].to_string(),
        precision,
        recall,
        f1_score,
        support: tp + fn_,
    }
}

/// Full held-out evaluation of one model
pub fn evaluate(y_true: &[usize], y_pred: &[usize], scores: &[f64]) -> Result<ModelMetrics> {
    if y_true.len() != y_pred.len() {
        return Err(AppError::Model(format!(
            "{} labels but {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }
    let auc = roc_auc(y_true, scores)?;
    let matrix = confusion_matrix(y_true, y_pred);
    let per_class: Vec<ClassMetrics> = (0..2).map(|c| class_metrics(&matrix, c)).collect();

    let total: usize = per_class.iter().map(|m| m.support).sum();
    let correct = matrix[0][0] + matrix[1][1];

    let average = |label: &str, weight: &dyn Fn(&ClassMetrics) -> f64| {
        let norm: f64 = per_class.iter().map(|m| weight(m)).sum();
        let mean = |field: fn(&ClassMetrics) -> f64| {
            per_class.iter().map(|m| field(m) * weight(m)).sum::<f64>() / norm
        };
        ClassMetrics {
            label: label.to_string(),
            precision: mean(|m| m.precision),
            recall: mean(|m| m.recall),
            f1_score: mean(|m| m.f1_score),
            support: total,
        }
    };
    let macro_avg = average("macro avg", &|_| 1.0);
    let weighted_avg = average("weighted avg", &|m| m.support as f64);

    Ok(ModelMetrics {
        auc,
        accuracy: ratio(correct, total),
        confusion_matrix: matrix,
        per_class_metrics: per_class,
        macro_avg,
        weighted_avg,
    })
}

/// Text rendering in the layout of a classification report
pub struct ClassificationReport<'a>(pub &'a ModelMetrics);

impl fmt::Display for ClassificationReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.0;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for m in &metrics.per_class_metrics {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                m.label, m.precision, m.recall, m.f1_score, m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", metrics.accuracy, metrics.macro_avg.support
        )?;
        for m in [&metrics.macro_avg, &metrics.weighted_avg] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                m.label, m.precision, m.recall, m.f1_score, m.support
            )?;
        }
        Ok(())
    }
}
