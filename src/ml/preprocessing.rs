//! Column transforms fitted on one matrix and applied to others

use crate::error::{AppError, Result};
use ndarray::{Array2, Axis};
use smartcore::api::{Transformer, UnsupervisedEstimator};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::preprocessing::numerical::{self, StandardScalerParameters};
use std::collections::BTreeSet;

pub(crate) fn to_dense_matrix(x: &Array2<f64>) -> Result<DenseMatrix<f64>> {
    let (rows, cols) = x.dim();
    let values: Vec<f64> = x.iter().copied().collect();
    DenseMatrix::new(rows, cols, values, false)
        .map_err(|e| AppError::Model(format!("matrix conversion failed: {}", e)))
}

pub(crate) fn from_dense_matrix(x: &DenseMatrix<f64>) -> Array2<f64> {
    let (rows, cols) = x.shape();
    Array2::from_shape_fn((rows, cols), |(i, j)| *x.get((i, j)))
}

/// Zero-mean, unit-variance scaling on top of smartcore's scaler.
/// Columns constant in the fitted matrix map to 0.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    fitted: Option<numerical::StandardScaler<f64>>,
    constant: Vec<bool>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(AppError::Model("cannot fit scaler on zero rows".to_string()));
        }
        let scaler = numerical::StandardScaler::<f64>::fit(
            &to_dense_matrix(x)?,
            StandardScalerParameters::default(),
        )
        .map_err(|e| AppError::Model(format!("scaler fit failed: {}", e)))?;
        self.constant = x
            .std_axis(Axis(0), 0.0)
            .iter()
            .map(|&s| s <= f64::EPSILON)
            .collect();
        self.fitted = Some(scaler);
        Ok(())
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let scaler = self
            .fitted
            .as_ref()
            .ok_or_else(|| AppError::Model("scaler is not fitted".to_string()))?;
        let scaled = scaler
            .transform(&to_dense_matrix(x)?)
            .map_err(|e| AppError::Model(format!("scaler transform failed: {}", e)))?;
        let mut scaled = from_dense_matrix(&scaled);
        for (mut column, &constant) in scaled.axis_iter_mut(Axis(1)).zip(&self.constant) {
            if constant {
                column.fill(0.0);
            }
        }
        Ok(scaled)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }
}

/// Maps string categories to integer codes in sorted class order
#[derive(Debug, Clone, Default)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit<S: AsRef<str>>(&mut self, values: &[S]) {
        let unique: BTreeSet<&str> = values.iter().map(|v| v.as_ref()).collect();
        self.classes = unique.into_iter().map(str::to_string).collect();
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn transform<S: AsRef<str>>(&self, values: &[S]) -> Result<Vec<f64>> {
        values
            .iter()
            .map(|v| {
                self.classes
                    .binary_search_by(|c| c.as_str().cmp(v.as_ref()))
                    .map(|code| code as f64)
                    .map_err(|_| AppError::Model(format!("unseen category '{}'", v.as_ref())))
            })
            .collect()
    }

    pub fn fit_transform<S: AsRef<str>>(&mut self, values: &[S]) -> Result<Vec<f64>> {
        self.fit(values);
        self.transform(values)
    }
}

/// Replaces NaN with the column median of the fitted matrix
#[derive(Debug, Clone, Default)]
pub struct MedianImputer {
    medians: Vec<f64>,
}

impl MedianImputer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Medians skip NaN; a column with no values at all imputes to 0
    pub fn fit(&mut self, x: &Array2<f64>) {
        self.medians = x
            .axis_iter(Axis(1))
            .map(|column| median(column.iter().copied().filter(|v| !v.is_nan())).unwrap_or(0.0))
            .collect();
    }

    pub fn medians(&self) -> &[f64] {
        &self.medians
    }

    pub fn transform(&self, x: &mut Array2<f64>) -> Result<()> {
        if x.ncols() != self.medians.len() {
            return Err(AppError::Model(format!(
                "imputer fitted on {} columns, got {}",
                self.medians.len(),
                x.ncols()
            )));
        }
        for (mut column, &fill) in x.axis_iter_mut(Axis(1)).zip(self.medians.iter()) {
            column.mapv_inplace(|v| if v.is_nan() { fill } else { v });
        }
        Ok(())
    }
}

fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_scaler_fits_on_train_only() {
        let train = array![[1.0, 5.0], [3.0, 5.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&train).unwrap();
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);

        // Constant training column stays at zero
        let test = array![[5.0, 6.0]];
        let scaled = scaler.transform(&test).unwrap();
        assert_eq!(scaled, array![[3.0, 0.0]]);
        assert!(scaler.transform(&array![[1.0, 2.0, 3.0]]).is_err());
    }

    #[test]
    fn test_scaler_requires_fit() {
        let scaler = StandardScaler::new();
        assert!(scaler.transform(&array![[1.0]]).is_err());
    }

    #[test]
    fn test_label_encoder_sorts_classes() {
        let mut encoder = LabelEncoder::new();
        let codes = encoder
            .fit_transform(&["Older", "New", "Very Old", "New", "unbinned"])
            .unwrap();
        assert_eq!(encoder.classes(), &["New", "Older", "Very Old", "unbinned"]);
        assert_eq!(codes, vec![1.0, 0.0, 2.0, 0.0, 3.0]);
        assert!(encoder.transform(&["Recent"]).is_err());
    }

    #[test]
    fn test_median_imputer() {
        let mut x = array![
            [1.0, f64::NAN, f64::NAN],
            [f64::NAN, 4.0, f64::NAN],
            [3.0, 2.0, f64::NAN],
            [4.0, 9.0, f64::NAN]
        ];
        let mut imputer = MedianImputer::new();
        imputer.fit(&x);
        assert_eq!(imputer.medians(), &[3.0, 4.0, 0.0]);

        imputer.transform(&mut x).unwrap();
        assert_eq!(x[[1, 0]], 3.0);
        assert_eq!(x[[0, 1]], 4.0);
        assert_eq!(x[[2, 2]], 0.0);
    }
}
