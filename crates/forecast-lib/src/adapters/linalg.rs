//! Penalised least squares via the normal equations

use ndarray::{Array1, Array2};

/// Streaming accumulator for `XᵀX` and `Xᵀy`
///
/// Rows are added one at a time so the design matrix never has to be
/// materialised.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    xtx: Array2<f64>,
    xty: Array1<f64>,
    rows: usize,
}

impl NormalEquations {
    pub fn new(width: usize) -> Self {
        Self {
            xtx: Array2::zeros((width, width)),
            xty: Array1::zeros(width),
            rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn add_row(&mut self, x: &[f64], y: f64) {
        let n = self.xty.len();
        debug_assert_eq!(x.len(), n);
        for i in 0..n {
            if x[i] == 0.0 {
                continue;
            }
            self.xty[i] += x[i] * y;
            for j in 0..=i {
                self.xtx[[i, j]] += x[i] * x[j];
            }
        }
        self.rows += 1;
    }

    /// Solve `(XᵀX + diag(penalty)) β = Xᵀy`
    ///
    /// Returns `None` when the system is not positive definite.
    pub fn solve(&self, penalty: &[f64]) -> Option<Array1<f64>> {
        let n = self.xty.len();
        let mut a = self.xtx.clone();
        for i in 0..n {
            for j in 0..i {
                a[[j, i]] = a[[i, j]];
            }
            a[[i, i]] += penalty.get(i).copied().unwrap_or(0.0);
        }
        cholesky_solve(&a, &self.xty)
    }
}

/// Solve `A x = b` for symmetric positive-definite `A`
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    if n == 0 || a.nrows() != n || a.ncols() != n {
        return None;
    }

    // A = L Lᵀ
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_known_system() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![10.0, 8.0];
        let x = cholesky_solve(&a, &b).unwrap();
        assert_abs_diff_eq!(x[0], 1.75, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_not_positive_definite() {
        let a = array![[0.0, 0.0], [0.0, 1.0]];
        assert!(cholesky_solve(&a, &array![1.0, 1.0]).is_none());
    }

    #[test]
    fn test_recovers_linear_fit() {
        let mut eq = NormalEquations::new(2);
        for i in 0..50 {
            let x = i as f64;
            eq.add_row(&[1.0, x], 3.0 + 2.0 * x);
        }
        assert_eq!(eq.rows(), 50);
        let beta = eq.solve(&[0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(beta[0], 3.0, epsilon = 1e-8);
        assert_abs_diff_eq!(beta[1], 2.0, epsilon = 1e-8);
    }

    #[test]
    fn test_ridge_shrinks_towards_zero() {
        let mut eq = NormalEquations::new(1);
        for _ in 0..10 {
            eq.add_row(&[1.0], 5.0);
        }
        let free = eq.solve(&[0.0]).unwrap()[0];
        let shrunk = eq.solve(&[10.0]).unwrap()[0];
        assert_abs_diff_eq!(free, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(shrunk, 2.5, epsilon = 1e-12);
    }
}
