use super::sparse_matrix::{csr_diagonal, csr_mul};

use log::trace;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stabilized bi-conjugate gradient solver with a Jacobi (diagonal) preconditioner
///
/// Suitable for the non-symmetric Jacobians of nonlinear forms as well as for symmetric systems
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiCGStab {
    /// Convergence is declared once `|b - A x| <= tolerance * |b|`
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BiCGStab {
    fn default() -> Self {
        Self {
            tolerance: 1e-11,
            max_iterations: 5000,
        }
    }
}

/// Iteration counts of a successful solve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub soft_restarts: usize,
    pub hard_restarts: usize,
    /// Relative residual of the returned solution
    pub residual: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LinearSolveError {
    DimensionMismatch { rows: usize, rhs: usize },
    /// The iteration limit was reached. The last iterate is left in `x`.
    NotConverged { iterations: usize, residual: f64 },
}

impl fmt::Display for LinearSolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DimensionMismatch { rows, rhs } => write!(
                f,
                "Matrix has {} rows but the right hand side has {} entries; Cannot solve linear system!",
                rows, rhs
            ),
            Self::NotConverged {
                iterations,
                residual,
            } => write!(
                f,
                "BiCGStab reached a relative residual of {:.3e} after {} iterations; Cannot solve linear system!",
                residual, iterations
            ),
        }
    }
}

impl std::error::Error for LinearSolveError {}

impl BiCGStab {
    /// Solve `A x = b` starting from the current contents of `x`
    pub fn solve(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
    ) -> Result<SolveStats, LinearSolveError> {
        let n = a.nrows();
        if b.len() != n || x.len() != n {
            return Err(LinearSolveError::DimensionMismatch {
                rows: n,
                rhs: b.len(),
            });
        }

        let b_norm = b.norm();
        let mut stats = SolveStats {
            iterations: 0,
            soft_restarts: 0,
            hard_restarts: 0,
            residual: 0.0,
        };
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(stats);
        }

        let inv_diag = csr_diagonal(a).map(|d| if d != 0.0 { 1.0 / d } else { 1.0 });
        let threshold = self.tolerance * b_norm;

        let mut r = b - csr_mul(a, x);
        let mut r_hat = r.clone();
        let mut p = r.clone();
        let mut rho = r.dot(&r_hat);

        while stats.iterations < self.max_iterations {
            let r_norm = r.norm();
            if r_norm <= threshold {
                // the recursive residual can drift away from the true one
                let true_r = b - csr_mul(a, x);
                let true_norm = true_r.norm();
                if true_norm <= threshold {
                    stats.residual = true_norm / b_norm;
                    trace!(
                        "bicgstab converged in {} iterations ({} restarts): {:.3e}",
                        stats.iterations,
                        stats.soft_restarts + stats.hard_restarts,
                        stats.residual
                    );
                    return Ok(stats);
                }
                stats.hard_restarts += 1;
                r = true_r;
                r_hat = r.clone();
                p = r.clone();
                rho = r.dot(&r_hat);
            }

            stats.iterations += 1;

            let p_hat = p.component_mul(&inv_diag);
            let v = csr_mul(a, &p_hat);
            let r_hat_v = r_hat.dot(&v);
            if r_hat_v.abs() < f64::MIN_POSITIVE {
                stats.soft_restarts += 1;
                r_hat = r.clone();
                p = r.clone();
                rho = r.dot(&r_hat);
                continue;
            }
            let alpha = rho / r_hat_v;

            let s = &r - &v * alpha;
            let s_hat = s.component_mul(&inv_diag);
            let t = csr_mul(a, &s_hat);
            let t_norm_sq = t.norm_squared();
            let omega = if t_norm_sq > 0.0 { t.dot(&s) / t_norm_sq } else { 0.0 };

            x.axpy(alpha, &p_hat, 1.0);
            x.axpy(omega, &s_hat, 1.0);
            r = &s - &t * omega;

            let rho_next = r.dot(&r_hat);
            if omega == 0.0 || rho_next.abs() < f64::EPSILON * f64::EPSILON * rho.abs().max(f64::MIN_POSITIVE) {
                // reset the reference direction to avoid a singular `1 / rho`
                stats.soft_restarts += 1;
                r_hat = r.clone();
                p = r.clone();
                rho = r.dot(&r_hat);
                continue;
            }

            let beta = (rho_next / rho) * (alpha / omega);
            p = &r + (&p - &v * omega) * beta;
            rho = rho_next;
        }

        let residual = (b - csr_mul(a, x)).norm() / b_norm;
        if residual <= self.tolerance {
            stats.residual = residual;
            return Ok(stats);
        }

        Err(LinearSolveError::NotConverged {
            iterations: stats.iterations,
            residual,
        })
    }
}
