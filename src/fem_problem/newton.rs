use super::{
    galerkin::{elem_setups, newton_system},
    weak_form::WeakForm,
    SolveError, SolveOutcome, SolveProvider,
};
use crate::adapt::config::ConfigError;
use crate::domain::{fields::ScalarField, Domain};
use crate::linalg::bicgstab::BiCGStab;

use log::{debug, trace};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stopping criteria for Newton's method
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Iteration stops once the residual norm (or the norm of the update) falls below this value
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Solver for the linearized system of each iteration
    pub linear_solver: BiCGStab,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 20,
            linear_solver: BiCGStab::default(),
        }
    }
}

impl NewtonConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance > 0.0) {
            return Err(ConfigError::NewtonTolerance(self.tolerance));
        }
        if self.max_iterations == 0 || self.linear_solver.max_iterations == 0 {
            return Err(ConfigError::ZeroNewtonIterations);
        }
        Ok(())
    }
}

/// Solves a stationary (possibly nonlinear) [WeakForm] with Newton's method
///
/// The form is assembled over the continuous space of the Domain (boundary conditions included) and each
/// linearized system is solved globally. Iteration starts from the boundary lift.
pub struct NewtonSolver {
    form: WeakForm,
    config: NewtonConfig,
    time: f64,
}

impl NewtonSolver {
    pub fn new(form: WeakForm, config: NewtonConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            form,
            config,
            time: 0.0,
        })
    }

    /// Time passed to time dependent source terms
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn form(&self) -> &WeakForm {
        &self.form
    }
}

impl SolveProvider for NewtonSolver {
    fn solve(
        &mut self,
        domain: &Arc<Domain>,
        _previous: Option<&dyn ScalarField>,
    ) -> Result<SolveOutcome, SolveError> {
        let initial = vec![0.0; domain.num_dofs()?];
        solve_global(domain, &self.form, &self.config, self.time, None, initial)
    }
}

/// Run Newton's method over the global DoFs of a Domain starting from `initial`
///
/// `history` holds the previous time level and the time step for backward Euler problems
pub(crate) fn solve_global(
    domain: &Arc<Domain>,
    form: &WeakForm,
    config: &NewtonConfig,
    time: f64,
    history: Option<(&dyn ScalarField, f64)>,
    initial: Vec<f64>,
) -> Result<SolveOutcome, SolveError> {
    let num_dofs = domain.num_dofs()?;
    let setups = elem_setups(domain, history.map(|(field, _)| field))?;
    let inv_time_step = history.map(|(_, time_step)| 1.0 / time_step);

    let mut x = if initial.len() == num_dofs {
        DVector::from_vec(initial)
    } else {
        DVector::zeros(num_dofs)
    };
    let mut residual_norm = f64::MAX;
    let mut linear_iterations = 0;

    for iteration in 0..=config.max_iterations {
        let system = newton_system(&setups, form, x.as_slice(), time, inv_time_step, num_dofs);
        residual_norm = system.b.norm();
        trace!("newton iteration {}: |R| = {:.3e}", iteration, residual_norm);

        if residual_norm < config.tolerance {
            debug!(
                "newton converged on {} elems ({} dofs) in {} iterations ({} linear iterations)",
                setups.len(),
                num_dofs,
                iteration,
                linear_iterations
            );
            return Ok(SolveOutcome::Converged(x.as_slice().to_vec()));
        }
        if iteration == config.max_iterations {
            break;
        }

        let mut update = DVector::zeros(num_dofs);
        let stats = match system.solve(&config.linear_solver, &mut update) {
            Ok(stats) => stats,
            Err(err) => {
                return Ok(SolveOutcome::Degraded {
                    coefficients: x.as_slice().to_vec(),
                    reason: format!("{} (Newton iteration {})", err, iteration),
                })
            }
        };
        linear_iterations += stats.iterations;

        let update_norm = update.norm();
        x += update;
        if update_norm < config.tolerance * (1.0 + x.norm()) * 1e-3 {
            debug!(
                "newton stalled at |R| = {:.3e} with a negligible update after {} iterations",
                residual_norm,
                iteration + 1
            );
            return Ok(SolveOutcome::Converged(x.as_slice().to_vec()));
        }
    }

    Ok(SolveOutcome::Degraded {
        coefficients: x.as_slice().to_vec(),
        reason: format!(
            "Newton's method did not converge on {} dofs within {} iterations (residual {:.3e})",
            num_dofs, config.max_iterations, residual_norm
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::super::{weak_form::FormTerm, SolveStatus};
    use super::*;
    use crate::domain::{
        dof::Boundary,
        fields::Solution,
        mesh::{
            h_refinement::HRef,
            space::{Point, Rect},
            Mesh,
        },
        DomainError,
    };

    fn domain(orders: [u8; 2]) -> Arc<Domain> {
        let mut mesh =
            Mesh::rectangular(Rect::new(Point::new(-1.0, -1.0), Point::new(1.0, 1.0)), [2, 2]);
        mesh.set_global_expansion_orders(orders).unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        Arc::new(Domain::from_mesh(mesh).unwrap())
    }

    #[test]
    fn linear_projection_of_polynomial_source() {
        let dom = domain([2, 2]);
        let form = WeakForm::new()
            .with(FormTerm::mass(1.0))
            .with(FormTerm::source(|p, _| p.x * p.x - 0.5 * p.y));

        let mut solver = NewtonSolver::new(form, NewtonConfig::default()).unwrap();
        let outcome = solver.solve(&dom, None).unwrap();
        assert_eq!(outcome.status(), SolveStatus::Converged);

        let solution = Solution::new(dom, outcome.into_coefficients()).unwrap();
        for p in [Point::new(-0.3, 0.8), Point::new(0.9, -0.9), Point::new(-0.75, -0.2)] {
            assert!((solution.value(&p) - (p.x * p.x - 0.5 * p.y)).abs() < 1e-10);
        }
    }

    #[test]
    fn poisson_with_dirichlet_boundary() {
        // -Δu = 2π² sin(πx) sin(πy) with u = 0 on the boundary of the unit square
        let mut mesh = Mesh::rectangular(Rect::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0)), [2, 2]);
        mesh.set_global_expansion_orders([5, 5]).unwrap();
        mesh.h_refine_elems(vec![3], HRef::T).unwrap();
        let dom = Arc::new(Domain::with_boundary(mesh, Boundary::homogeneous()).unwrap());
        assert!(dom.dof_map().num_hanging() > 0);

        let pi = std::f64::consts::PI;
        let form = WeakForm::new()
            .with(FormTerm::diffusion(1.0))
            .with(FormTerm::source(move |p, _| {
                2.0 * pi * pi * (pi * p.x).sin() * (pi * p.y).sin()
            }));

        let mut solver = NewtonSolver::new(form, NewtonConfig::default()).unwrap();
        let outcome = solver.solve(&dom, None).unwrap();
        assert_eq!(outcome.status(), SolveStatus::Converged);

        let solution = Solution::new(dom, outcome.into_coefficients()).unwrap();
        for p in [Point::new(0.5, 0.5), Point::new(0.2, 0.7), Point::new(0.9, 0.1), Point::new(0.05, 0.4)] {
            let exact = (pi * p.x).sin() * (pi * p.y).sin();
            assert!((solution.value(&p) - exact).abs() < 1e-3, "{:?}", p);
        }

        // continuous across the hanging edge at y = 0.5
        for x in [0.55, 0.7, 0.95] {
            let below = solution.value(&Point::new(x, 0.5 - 1e-12));
            let above = solution.value(&Point::new(x, 0.5 + 1e-12));
            assert!((below - above).abs() < 1e-9);
        }
    }

    #[test]
    fn nonlinear_reaction_converges() {
        let dom = domain([1, 1]);
        // u + u^3 = 2  =>  u = 1
        let form = WeakForm::new()
            .with(FormTerm::mass(1.0))
            .with(FormTerm::reaction(|u| u.powi(3), |u| 3.0 * u * u))
            .with(FormTerm::source(|_, _| 2.0));

        let mut solver = NewtonSolver::new(form, NewtonConfig::default()).unwrap();
        let outcome = solver.solve(&dom, None).unwrap();
        assert_eq!(outcome.status(), SolveStatus::Converged);

        let solution = Solution::new(dom, outcome.into_coefficients()).unwrap();
        assert!((solution.value(&Point::new(0.3, 0.3)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn too_few_iterations_degrades() {
        let dom = domain([1, 1]);
        let form = WeakForm::new()
            .with(FormTerm::mass(1.0))
            .with(FormTerm::reaction(|u| u.powi(3), |u| 3.0 * u * u))
            .with(FormTerm::source(|_, _| 2.0));

        let config = NewtonConfig {
            tolerance: 1e-10,
            max_iterations: 1,
            ..NewtonConfig::default()
        };
        let mut solver = NewtonSolver::new(form, config).unwrap();
        let outcome = solver.solve(&dom, None).unwrap();

        assert!(outcome.status().is_degraded());
        assert_eq!(outcome.coefficients().len(), dom.num_dofs().unwrap());
    }

    #[test]
    fn invalid_configuration() {
        let bad_tol = NewtonConfig {
            tolerance: -1.0,
            ..NewtonConfig::default()
        };
        assert!(NewtonSolver::new(WeakForm::new(), bad_tol).is_err());

        let no_iterations = NewtonConfig {
            max_iterations: 0,
            ..NewtonConfig::default()
        };
        assert_eq!(no_iterations.validate(), Err(ConfigError::ZeroNewtonIterations));
    }

    #[test]
    fn stale_dofs_fail() {
        let mut mesh = Mesh::unit();
        let mut dom = Domain::from_mesh(mesh.clone()).unwrap();
        mesh.global_h_refinement(HRef::T).unwrap();
        dom.mesh = mesh;

        let mut solver = NewtonSolver::new(
            WeakForm::new().with(FormTerm::mass(1.0)),
            NewtonConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            solver.solve(&Arc::new(dom), None),
            Err(SolveError::Domain(DomainError::DofDesync { .. }))
        ));
    }
}
