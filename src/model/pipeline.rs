//! Three-stage regression pipeline: median imputation → standardization → ridge
//!
//! Ridge regression is solved in closed form:
//!
//! `w = (XᵀX + αI)⁻¹ Xᵀy` on centered data, or equivalently
//! `w = Xᵀ(XXᵀ + αI)⁻¹ y` when there are fewer rows than columns.
//!
//! Both systems are symmetric positive definite for α > 0 and are solved by
//! Cholesky decomposition in f64.

use crate::error::{ForecastError, Result};
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};

/// Fixed regularization strength
pub const RIDGE_ALPHA: f64 = 1.0;

/// Replaces NaN with the per-column median seen during fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianImputer {
    medians: Vec<f64>,
}

impl MedianImputer {
    /// Columns with no observed value impute 0.0 so the width never changes
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        let medians = (0..width)
            .map(|col| {
                let mut observed: Vec<f64> = rows
                    .iter()
                    .map(|row| row[col])
                    .filter(|v| !v.is_nan())
                    .collect();
                median(&mut observed).unwrap_or(0.0)
            })
            .collect();
        Self { medians }
    }

    pub fn transform(&self, row: &mut [f64]) {
        for (value, &median) in row.iter_mut().zip(&self.medians) {
            if value.is_nan() {
                *value = median;
            }
        }
    }

    pub fn medians(&self) -> &[f64] {
        &self.medians
    }
}

/// Centers each column and scales it to unit population variance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Zero-variance columns keep a scale of 1.0
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        let n = rows.len().max(1) as f64;

        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut scale = vec![0.0; width];
        for row in rows {
            for j in 0..width {
                let diff = row[j] - mean[j];
                scale[j] += diff * diff;
            }
        }
        for s in &mut scale {
            let std = (*s / n).sqrt();
            *s = if std > f64::EPSILON { std } else { 1.0 };
        }

        Self { mean, scale }
    }

    pub fn transform(&self, row: &mut [f64]) {
        for j in 0..row.len().min(self.mean.len()) {
            row[j] = (row[j] - self.mean[j]) / self.scale[j];
        }
    }
}

/// Linear model with L2 penalty and an unpenalized intercept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegression {
    alpha: f64,
    coef: Vec<f64>,
    intercept: f64,
}

impl RidgeRegression {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], alpha: f64) -> Result<Self> {
        let n = rows.len();
        let d = rows.first().map_or(0, Vec::len);
        let n_f = n as f64;

        let mut x_mean = vec![0.0; d];
        for row in rows {
            for (m, v) in x_mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut x_mean {
            *m /= n_f;
        }
        let y_mean = targets.iter().sum::<f64>() / n_f;

        let xc: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| row.iter().zip(&x_mean).map(|(v, m)| v - m).collect())
            .collect();
        let yc: Vec<f64> = targets.iter().map(|y| y - y_mean).collect();

        let coef = if n < d {
            // Dual form: (Xc·Xcᵀ + αI)·a = yc, w = Xcᵀ·a
            let mut gram = vec![0.0; n * n];
            for i in 0..n {
                for k in i..n {
                    let value = dot(&xc[i], &xc[k]);
                    gram[i * n + k] = value;
                    gram[k * n + i] = value;
                }
                gram[i * n + i] += alpha;
            }
            let a = cholesky_solve(gram, yc, n)?;

            let mut w = vec![0.0; d];
            for (row, &ai) in xc.iter().zip(&a) {
                for (wj, xj) in w.iter_mut().zip(row) {
                    *wj += xj * ai;
                }
            }
            w
        } else {
            // Primal form: (Xcᵀ·Xc + αI)·w = Xcᵀ·yc
            let mut xtx = vec![0.0; d * d];
            let mut xty = vec![0.0; d];
            for (row, &y) in xc.iter().zip(&yc) {
                for a in 0..d {
                    // Upper triangle only (symmetric)
                    for b in a..d {
                        xtx[a * d + b] += row[a] * row[b];
                    }
                    xty[a] += row[a] * y;
                }
            }
            for a in 0..d {
                for b in (a + 1)..d {
                    xtx[b * d + a] = xtx[a * d + b];
                }
                xtx[a * d + a] += alpha;
            }
            cholesky_solve(xtx, xty, d)?
        };

        let intercept = y_mean - dot(&x_mean, &coef);
        Ok(Self {
            alpha,
            coef,
            intercept,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept + dot(row, &self.coef)
    }

    pub fn coef(&self) -> &[f64] {
        &self.coef
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

/// Fitted imputer → scaler → ridge chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePipeline {
    feature_len: usize,
    imputer: MedianImputer,
    scaler: StandardScaler,
    ridge: RidgeRegression,
}

impl ScorePipeline {
    /// Fit all three stages on the given rows
    pub fn fit(rows: &[FeatureVector], targets: &[f64]) -> Result<Self> {
        if rows.is_empty() {
            return Err(ForecastError::InvalidInput(
                "Cannot fit a pipeline on zero rows".to_string(),
            ));
        }
        if rows.len() != targets.len() {
            return Err(ForecastError::InvalidInput(format!(
                "Row count ({}) and target count ({}) differ",
                rows.len(),
                targets.len()
            )));
        }
        if let Some(bad) = targets.iter().find(|y| !y.is_finite()) {
            return Err(ForecastError::InvalidInput(format!(
                "Non-finite training target: {}",
                bad
            )));
        }

        let feature_len = rows[0].len();
        for row in rows {
            if row.len() != feature_len {
                return Err(ForecastError::FeatureShapeMismatch {
                    expected: feature_len,
                    actual: row.len(),
                });
            }
        }

        let mut matrix: Vec<Vec<f64>> = rows.iter().map(|r| r.as_slice().to_vec()).collect();

        let imputer = MedianImputer::fit(&matrix);
        for row in &mut matrix {
            imputer.transform(row);
        }

        let scaler = StandardScaler::fit(&matrix);
        for row in &mut matrix {
            scaler.transform(row);
        }

        let ridge = RidgeRegression::fit(&matrix, targets, RIDGE_ALPHA)?;

        Ok(Self {
            feature_len,
            imputer,
            scaler,
            ridge,
        })
    }

    /// Predict one score
    pub fn predict(&self, features: &FeatureVector) -> Result<f64> {
        if features.len() != self.feature_len {
            return Err(ForecastError::FeatureShapeMismatch {
                expected: self.feature_len,
                actual: features.len(),
            });
        }

        let mut row = features.as_slice().to_vec();
        self.imputer.transform(&mut row);
        self.scaler.transform(&mut row);
        Ok(self.ridge.predict(&row))
    }

    /// Mean absolute error over the given rows
    pub fn mean_absolute_error(&self, rows: &[FeatureVector], targets: &[f64]) -> Result<f64> {
        if rows.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for (row, &y) in rows.iter().zip(targets) {
            total += (self.predict(row)? - y).abs();
        }
        Ok(total / rows.len() as f64)
    }

    pub fn feature_len(&self) -> usize {
        self.feature_len
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Solve `A·x = b` for symmetric positive definite `A` (row-major, dim × dim)
fn cholesky_solve(mut a: Vec<f64>, mut b: Vec<f64>, dim: usize) -> Result<Vec<f64>> {
    // In-place lower-triangular factor L with A = L·Lᵀ
    for j in 0..dim {
        let mut diag = a[j * dim + j];
        for k in 0..j {
            diag -= a[j * dim + k] * a[j * dim + k];
        }
        if diag.is_nan() || diag <= 0.0 {
            return Err(ForecastError::Other(format!(
                "Ridge system is not positive definite (pivot {} = {})",
                j, diag
            )));
        }
        let l_jj = diag.sqrt();
        a[j * dim + j] = l_jj;

        for i in (j + 1)..dim {
            let mut sum = a[i * dim + j];
            for k in 0..j {
                sum -= a[i * dim + k] * a[j * dim + k];
            }
            a[i * dim + j] = sum / l_jj;
        }
    }

    // Forward substitution: L·z = b
    for i in 0..dim {
        let mut sum = b[i];
        for k in 0..i {
            sum -= a[i * dim + k] * b[k];
        }
        b[i] = sum / a[i * dim + i];
    }

    // Back substitution: Lᵀ·x = z
    for i in (0..dim).rev() {
        let mut sum = b[i];
        for k in (i + 1)..dim {
            sum -= a[k * dim + i] * b[k];
        }
        b[i] = sum / a[i * dim + i];
    }

    Ok(b)
}
