//! Numeric kernels for dense mixing matrices and estimate vectors.
//!
//! This module contains the dense matrix type used by the matrix-based
//! engines, a cyclic Jacobi eigenvalue solver for symmetric matrices, and the
//! summary statistics recorded after every update. Optimized paths are always
//! feature-gated and threshold-gated.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::engine::errors::ConsensusError;

/// Minimum dimension before the row-parallel matrix-vector product is used.
pub const PARALLEL_MATVEC_MIN_DIM: usize = 256;

/// Equivalence epsilon for optimized-vs-reference numerical checks.
pub const KERNEL_EQUIVALENCE_EPSILON: f64 = 1e-12;

/// Upper bound on Jacobi sweeps before the solver reports failure.
const MAX_JACOBI_SWEEPS: usize = 100;

/// Relative off-diagonal mass below which a Jacobi iteration has converged.
const JACOBI_RELATIVE_THRESHOLD: f64 = 1e-22;

/// Backend selector for numeric kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelBackend {
    /// Always use scalar reference implementation.
    Scalar,
    /// Use the row-parallel implementation when available and the matrix is
    /// large enough, otherwise scalar.
    Auto,
}

/// Square row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    dim: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; dim * dim],
        }
    }

    pub fn identity(dim: usize) -> Self {
        let mut m = Self::zeros(dim);
        for i in 0..dim {
            m.data[i * dim + i] = 1.0;
        }
        m
    }

    /// Builds a matrix from row-major data. Fails if `data.len() != dim * dim`.
    pub fn from_row_major(dim: usize, data: Vec<f64>) -> Result<Self, ConsensusError> {
        if data.len() != dim * dim {
            return Err(ConsensusError::Internal(format!(
                "matrix data has {} entries, expected {}",
                data.len(),
                dim * dim
            )));
        }
        Ok(Self { dim, data })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.dim + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.dim + col] = value;
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }

    /// Returns `self - scale * other`. Dimensions must agree.
    pub fn sub_scaled(&self, scale: f64, other: &DenseMatrix) -> Result<Self, ConsensusError> {
        if self.dim != other.dim {
            return Err(ConsensusError::Internal(format!(
                "dimension mismatch: {} vs {}",
                self.dim, other.dim
            )));
        }
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a - scale * b)
            .collect();
        Ok(Self {
            dim: self.dim,
            data,
        })
    }

    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.dim).map(|i| kahan_sum(self.row(i))).collect()
    }

    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.dim];
        for i in 0..self.dim {
            for (sum, value) in sums.iter_mut().zip(self.row(i)) {
                *sum += value;
            }
        }
        sums
    }

    /// Largest `|W[i][j] - W[j][i]|` over all pairs.
    pub fn max_asymmetry(&self) -> f64 {
        let mut worst = 0.0_f64;
        for i in 0..self.dim {
            for j in (i + 1)..self.dim {
                worst = worst.max((self.get(i, j) - self.get(j, i)).abs());
            }
        }
        worst
    }

    /// Smallest entry together with its position, `None` for an empty matrix.
    pub fn min_entry(&self) -> Option<(usize, usize, f64)> {
        self.data
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, &v)| (idx / self.dim, idx % self.dim, v))
    }

    /// Matrix-vector product with automatic backend selection.
    pub fn mul_vec(&self, x: &[f64]) -> Result<Vec<f64>, ConsensusError> {
        self.mul_vec_with_backend(x, KernelBackend::Auto)
    }

    /// Matrix-vector product with explicit backend selection.
    pub fn mul_vec_with_backend(
        &self,
        x: &[f64],
        backend: KernelBackend,
    ) -> Result<Vec<f64>, ConsensusError> {
        if x.len() != self.dim {
            return Err(ConsensusError::Internal(format!(
                "vector of length {} multiplied by {}x{} matrix",
                x.len(),
                self.dim,
                self.dim
            )));
        }
        match backend {
            KernelBackend::Scalar => Ok(self.mul_vec_scalar(x)),
            KernelBackend::Auto => {
                #[cfg(feature = "parallel")]
                {
                    if self.dim >= PARALLEL_MATVEC_MIN_DIM {
                        return Ok(self.mul_vec_parallel(x));
                    }
                }
                Ok(self.mul_vec_scalar(x))
            }
        }
    }

    fn mul_vec_scalar(&self, x: &[f64]) -> Vec<f64> {
        (0..self.dim).map(|i| dot(self.row(i), x)).collect()
    }

    #[cfg(feature = "parallel")]
    fn mul_vec_parallel(&self, x: &[f64]) -> Vec<f64> {
        self.data
            .par_chunks(self.dim)
            .map(|row| dot(row, x))
            .collect()
    }
}

#[inline]
fn dot(row: &[f64], x: &[f64]) -> f64 {
    row.iter().zip(x).map(|(a, b)| a * b).sum()
}

/// Eigenvalues of a symmetric matrix, sorted in descending order.
///
/// Uses cyclic Jacobi rotations. Only the symmetric part of the input is
/// meaningful; callers check symmetry separately.
pub fn symmetric_eigenvalues(matrix: &DenseMatrix) -> Result<Vec<f64>, ConsensusError> {
    let n = matrix.dim();
    let mut a = matrix.data.clone();
    if n == 0 {
        return Ok(Vec::new());
    }

    let total: f64 = a.iter().map(|v| v * v).sum();
    let threshold = JACOBI_RELATIVE_THRESHOLD * total.max(f64::MIN_POSITIVE);

    let mut converged = false;
    for _ in 0..MAX_JACOBI_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += 2.0 * a[p * n + q] * a[p * n + q];
            }
        }
        if off <= threshold {
            converged = true;
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq == 0.0 {
                    continue;
                }
                let app = a[p * n + p];
                let aqq = a[q * n + q];
                let theta = (aqq - app) / (2.0 * apq);
                let t = if theta.abs() > 1e150 {
                    0.5 / theta
                } else {
                    theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
            }
        }
    }

    if !converged {
        return Err(ConsensusError::Numerical(format!(
            "Jacobi eigen solver did not converge within {} sweeps ({}x{})",
            MAX_JACOBI_SWEEPS, n, n
        )));
    }

    let mut eigenvalues: Vec<f64> = (0..n).map(|i| a[i * n + i]).collect();
    if eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(ConsensusError::Numerical(
            "non-finite eigenvalue in mixing analysis".into(),
        ));
    }
    eigenvalues.sort_by(|x, y| y.total_cmp(x));
    Ok(eigenvalues)
}

/// Compensated (Kahan) summation.
pub fn kahan_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &v in values {
        let y = v - compensation;
        let t = sum + y;
        compensation = (t - sum) - y;
        sum = t;
    }
    sum
}

/// Arithmetic mean; zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    kahan_sum(values) / values.len() as f64
}

/// Population standard deviation; zero for an empty slice.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mu = mean(values);
    let var = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// `||values - target * 1||^2`.
pub fn squared_distance_to(values: &[f64], target: f64) -> f64 {
    values.iter().map(|v| (v - target) * (v - target)).sum()
}
