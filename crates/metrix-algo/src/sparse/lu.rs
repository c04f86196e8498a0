//! LU factorization with partial pivoting.
//!
//! The factors are stored dense: SCOPF networks keep |N| in the thousands
//! and the factorization is reused across every micro-iteration of a
//! topology group, so the O(n²) solve is the cost that matters, not the
//! storage. The same type factors the |N|×|N| B′ matrix, the k×k Woodbury
//! systems and the margin-variation basis.

use sprs::CsMatView;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LuError {
    #[error("Singular matrix: pivot {pivot:.3e} below {min_pivot:.3e} at column {column}")]
    Singular {
        column: usize,
        pivot: f64,
        min_pivot: f64,
    },

    #[error("Dimension mismatch: matrix is {n}x{n}, rhs has {got} entries")]
    Dimension { n: usize, got: usize },

    #[error("Matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
}

/// LU factors of a square matrix, row-major, L below the unit diagonal.
#[derive(Debug, Clone)]
pub struct DenseLu {
    n: usize,
    lu: Vec<f64>,
    pivots: Vec<usize>,
}

impl DenseLu {
    /// Factor a sparse matrix (densified internally).
    pub fn from_sparse(matrix: CsMatView<'_, f64>, min_pivot: f64) -> Result<Self, LuError> {
        let (rows, cols) = (matrix.rows(), matrix.cols());
        if rows != cols {
            return Err(LuError::NotSquare { rows, cols });
        }
        let mut dense = vec![0.0; rows * cols];
        for (&value, (i, j)) in matrix.iter() {
            dense[i * cols + j] += value;
        }
        Self::from_dense(dense, rows, min_pivot)
    }

    /// Factor a dense row-major matrix in place.
    pub fn from_dense(mut lu: Vec<f64>, n: usize, min_pivot: f64) -> Result<Self, LuError> {
        debug_assert_eq!(lu.len(), n * n);
        let mut pivots = vec![0usize; n];

        for k in 0..n {
            let mut max_val = lu[k * n + k].abs();
            let mut max_row = k;
            for i in (k + 1)..n {
                let val = lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val < min_pivot {
                return Err(LuError::Singular {
                    column: k,
                    pivot: max_val,
                    min_pivot,
                });
            }

            pivots[k] = max_row;
            if max_row != k {
                for j in 0..n {
                    lu.swap(k * n + j, max_row * n + j);
                }
            }

            let pivot = lu[k * n + k];
            for i in (k + 1)..n {
                let factor = lu[i * n + k] / pivot;
                lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    lu[i * n + j] -= factor * lu[k * n + j];
                }
            }
        }

        Ok(Self { n, lu, pivots })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Solve A·x = b.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>, LuError> {
        if b.len() != self.n {
            return Err(LuError::Dimension {
                n: self.n,
                got: b.len(),
            });
        }
        let n = self.n;
        let mut x = b.to_vec();

        for k in 0..n {
            if self.pivots[k] != k {
                x.swap(k, self.pivots[k]);
            }
        }
        // Forward substitution (unit-diagonal L)
        for i in 1..n {
            let mut sum = x[i];
            for j in 0..i {
                sum -= self.lu[i * n + j] * x[j];
            }
            x[i] = sum;
        }
        // Back substitution (U)
        for i in (0..n).rev() {
            let mut sum = x[i];
            for j in (i + 1)..n {
                sum -= self.lu[i * n + j] * x[j];
            }
            x[i] = sum / self.lu[i * n + i];
        }
        Ok(x)
    }

    /// Solve Aᵀ·x = b (used for sensitivity rows of the rank-k systems).
    pub fn solve_transposed(&self, b: &[f64]) -> Result<Vec<f64>, LuError> {
        if b.len() != self.n {
            return Err(LuError::Dimension {
                n: self.n,
                got: b.len(),
            });
        }
        let n = self.n;
        let mut x = b.to_vec();

        // Uᵀ is lower triangular with U's diagonal
        for i in 0..n {
            let mut sum = x[i];
            for j in 0..i {
                sum -= self.lu[j * n + i] * x[j];
            }
            x[i] = sum / self.lu[i * n + i];
        }
        // Lᵀ is upper triangular with unit diagonal
        for i in (0..n).rev() {
            let mut sum = x[i];
            for j in (i + 1)..n {
                sum -= self.lu[j * n + i] * x[j];
            }
            x[i] = sum;
        }
        // Undo the row permutation (applied in reverse)
        for k in (0..n).rev() {
            if self.pivots[k] != k {
                x.swap(k, self.pivots[k]);
            }
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residual(a: &[f64], n: usize, x: &[f64], b: &[f64]) -> f64 {
        (0..n)
            .map(|i| {
                let ax: f64 = (0..n).map(|j| a[i * n + j] * x[j]).sum();
                (ax - b[i]).abs()
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_solve_3x3() {
        // Needs pivoting: zero on the leading diagonal
        let a = vec![0.0, 2.0, 1.0, 1.0, 1.0, 0.0, 3.0, 0.0, 2.0];
        let lu = DenseLu::from_dense(a.clone(), 3, 1e-12).unwrap();
        let b = vec![5.0, 3.0, 8.0];
        let x = lu.solve(&b).unwrap();
        assert!(residual(&a, 3, &x, &b) < 1e-10);
    }

    #[test]
    fn test_solve_transposed() {
        let a = vec![4.0, 1.0, 0.0, 2.0, 5.0, 1.0, 0.0, 3.0, 6.0];
        let lu = DenseLu::from_dense(a.clone(), 3, 1e-12).unwrap();
        let b = vec![1.0, -2.0, 3.0];
        let x = lu.solve_transposed(&b).unwrap();
        // Residual against Aᵀ
        let at: Vec<f64> = (0..9).map(|k| a[(k % 3) * 3 + k / 3]).collect();
        assert!(residual(&at, 3, &x, &b) < 1e-10);
    }

    #[test]
    fn test_singular_rejected_with_column() {
        let a = vec![1.0, 2.0, 2.0, 4.0];
        let err = DenseLu::from_dense(a, 2, 1e-9).unwrap_err();
        match err {
            LuError::Singular { column, .. } => assert_eq!(column, 1),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let lu = DenseLu::from_dense(vec![2.0], 1, 1e-12).unwrap();
        assert!(matches!(
            lu.solve(&[1.0, 2.0]),
            Err(LuError::Dimension { .. })
        ));
    }
}
