//! Closed-form ridge regression used for stacking model predictions.
//!
//! Minimizes ||y - Xβ||² + α||β||² on centred data, solving
//! (X'X + αI) β = X'y by Gaussian elimination with partial pivoting.

use ndarray::{Array1, Array2, Axis};

use crate::error::{EngineError, EngineResult};

const PIVOT_EPS: f64 = 1e-12;

/// Fit ridge coefficients of `y` on the columns of `x` (intercept absorbed by centring).
pub fn ridge_coefficients(x: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> EngineResult<Array1<f64>> {
    if alpha < 0.0 {
        return Err(EngineError::config(format!("ridge alpha must be >= 0, got {}", alpha)));
    }
    if x.nrows() != y.len() {
        return Err(EngineError::InvalidInput(format!(
            "ridge: {} rows vs {} targets",
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() < 2 || x.ncols() == 0 {
        return Err(EngineError::insufficient(format!(
            "ridge needs at least 2 samples and 1 feature, got {}x{}",
            x.nrows(),
            x.ncols()
        )));
    }

    let x_mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| EngineError::numerical("ridge: empty design matrix"))?;
    let y_mean = y
        .mean()
        .ok_or_else(|| EngineError::numerical("ridge: empty target"))?;
    let xc = x - &x_mean;
    let yc = y - y_mean;

    let mut xtx = xc.t().dot(&xc);
    for i in 0..xtx.nrows() {
        xtx[[i, i]] += alpha;
    }
    let xty = xc.t().dot(&yc);

    let coef = solve_linear_system(xtx, xty)?;
    if coef.iter().any(|c| !c.is_finite()) {
        return Err(EngineError::numerical("ridge: non-finite coefficients"));
    }
    Ok(coef)
}

/// Solve `a x = b` for square `a`.
pub fn solve_linear_system(mut a: Array2<f64>, mut b: Array1<f64>) -> EngineResult<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(EngineError::InvalidInput("solve: dimension mismatch".to_string()));
    }

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = a[[col, col]].abs();
        for row in (col + 1)..n {
            if a[[row, col]].abs() > pivot_val {
                pivot_val = a[[row, col]].abs();
                pivot_row = row;
            }
        }
        if pivot_val < PIVOT_EPS {
            return Err(EngineError::numerical("singular matrix"));
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap([col, k], [pivot_row, k]);
            }
            b.swap(col, pivot_row);
        }

        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[[row, k]] * x[k];
        }
        x[row] = sum / a[[row, row]];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve_linear_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve_linear_system(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-10);
        assert!((x[1] - 1.4).abs() < 1e-10);
    }

    #[test]
    fn test_singular_matrix_is_numerical_failure() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![1.0, 2.0];
        let err = solve_linear_system(a, b).unwrap_err();
        assert!(matches!(err, EngineError::NumericalFailure(_)));
    }

    #[test]
    fn test_ridge_recovers_dominant_column() {
        // y follows column 0 exactly; column 1 is noise.
        let x = array![
            [1.0, 0.3],
            [-1.0, 0.1],
            [1.0, -0.2],
            [0.0, 0.4],
            [-1.0, -0.3],
            [1.0, 0.0]
        ];
        let y = array![1.0, -1.0, 1.0, 0.0, -1.0, 1.0];
        let coef = ridge_coefficients(&x, &y, 0.01).unwrap();
        assert!(coef[0].abs() > 5.0 * coef[1].abs());
    }

    #[test]
    fn test_ridge_zero_alpha_constant_column_fails() {
        let x = array![[1.0], [1.0], [1.0]];
        let y = array![0.5, 0.2, 0.1];
        assert!(ridge_coefficients(&x, &y, 0.0).is_err());
    }
}
