/// Stabilized bi-conjugate gradient iteration for sparse systems
pub mod bicgstab;
/// Sparsely Packed Matrix
pub mod sparse_matrix;

use bicgstab::{BiCGStab, LinearSolveError, SolveStats};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use sparse_matrix::SparseMatrix;
use std::sync::mpsc::channel;

/// Systems up to this size are factored directly
const DIRECT_SOLVE_LIMIT: usize = 150;

/// Contribution of a single Elem to a [LinearSystem] in global indices
#[derive(Debug, Clone, Default)]
pub struct ElemContribution {
    pub entries: Vec<([usize; 2], f64)>,
    pub rhs: Vec<(usize, f64)>,
}

/// Sparse linear system
///
/// Ax = b
#[derive(Clone, Debug)]
pub struct LinearSystem {
    /// A Matrix
    pub a: SparseMatrix,
    /// b Vector
    pub b: DVector<f64>,
}

impl LinearSystem {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            a: SparseMatrix::new(num_dofs),
            b: DVector::zeros(num_dofs),
        }
    }

    pub fn dimension(&self) -> usize {
        self.a.dimension
    }

    /// Solve the system starting from the current contents of `x`
    ///
    /// Small systems are solved with a dense LU factorization. Larger ones use [BiCGStab]. On failure, `x` is left
    /// at the last iterate.
    pub fn solve(&self, solver: &BiCGStab, x: &mut DVector<f64>) -> Result<SolveStats, LinearSolveError> {
        if self.dimension() <= DIRECT_SOLVE_LIMIT && x.len() == self.dimension() {
            if let Some(direct) = DMatrix::from(&self.a).lu().solve(&self.b) {
                x.copy_from(&direct);
                return Ok(SolveStats {
                    iterations: 1,
                    soft_restarts: 0,
                    hard_restarts: 0,
                    residual: 0.0,
                });
            }
        }

        solver.solve(&self.a.to_csr(), &self.b, x)
    }
}

impl ParallelExtend<ElemContribution> for LinearSystem {
    fn par_extend<I>(&mut self, elem_contributions: I)
    where
        I: IntoParallelIterator<Item = ElemContribution>,
    {
        let (sender, receiver) = channel();

        elem_contributions
            .into_par_iter()
            .for_each_with(sender, |s, contribution| {
                // the receiver outlives every sender
                let _ = s.send(contribution);
            });

        receiver.iter().for_each(|contribution| {
            self.a.insert_group(contribution.entries);
            for (row, value) in contribution.rhs {
                self.b[row] += value;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian_contributions(n: usize) -> Vec<ElemContribution> {
        // 1D linear elements between consecutive DoFs plus a unit load
        (0..n - 1)
            .map(|e| ElemContribution {
                entries: vec![([e, e], 1.0), ([e, e + 1], -1.0), ([e + 1, e], -1.0), ([e + 1, e + 1], 1.0)],
                rhs: vec![(e, 0.5), (e + 1, 0.5)],
            })
            .collect()
    }

    #[test]
    fn parallel_assembly() {
        let mut system = LinearSystem::new(4);
        system.par_extend(laplacian_contributions(4));
        assert_eq!(system.a.num_entries(), 12);

        let dense = DMatrix::from(&system.a);
        assert_eq!(dense[(1, 1)], 2.0);
        assert_eq!(dense[(0, 0)], 1.0);
        assert_eq!(system.b.as_slice(), &[0.5, 1.0, 1.0, 0.5]);
    }

    #[test]
    fn direct_and_iterative_solves_agree() {
        for n in [20, 200] {
            let mut system = LinearSystem::new(n);
            system.par_extend(laplacian_contributions(n));
            // pin the first DoF
            system.a.insert([0, 0], 1.0);

            let mut x = DVector::zeros(n);
            system.solve(&BiCGStab::default(), &mut x).unwrap();

            let residual = DMatrix::from(&system.a) * &x - &system.b;
            assert!(residual.norm() < 1e-7 * system.b.norm(), "n = {}", n);
        }
    }
}
