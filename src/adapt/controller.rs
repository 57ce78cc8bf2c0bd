use super::{
    config::{AdaptivityConfig, ConfigError},
    estimator::ErrorEstimator,
    history::{ConvergenceHistory, Decision, StepRecord},
    selector::Selector,
};
use crate::domain::{
    fields::{ScalarField, Solution},
    Domain, DomainError,
};
use crate::fem_problem::{SolveError, SolveProvider, SolveStatus};
use crate::projection::project_global;

use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;

/// Why the adaptivity loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The error estimate fell below the tolerance
    Converged,
    /// The DoF ceiling was reached before the tolerance
    DofCeiling,
    /// The selector could not refine anything
    Stagnated,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::DofCeiling => write!(f, "dof ceiling reached"),
            Self::Stagnated => write!(f, "stagnated"),
        }
    }
}

/// Stages of one adaptivity step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptStage {
    BuildingReference,
    Solving,
    Projecting,
    Estimating,
    Deciding,
    Refining,
}

impl fmt::Display for AdaptStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::BuildingReference => "building reference",
            Self::Solving => "solving",
            Self::Projecting => "projecting",
            Self::Estimating => "estimating",
            Self::Deciding => "deciding",
            Self::Refining => "refining",
        };
        write!(f, "{}", name)
    }
}

/// Output of a completed adaptivity run
#[derive(Clone, Debug)]
pub struct AdaptivityResult {
    pub termination: Termination,
    /// Number of adaptivity steps taken (each with its own reference solve)
    pub steps: usize,
    /// The reference solution of the final step
    pub reference: Solution,
    /// The reference solution projected onto the working Domain of the final step
    pub coarse: Solution,
    /// Relative error estimate of the final step, in percent
    pub error_estimate: f64,
    /// Number of steps whose solve did not converge
    pub degraded_steps: usize,
}

/// Drives the adaptivity loop for one stationary problem (or one time step of a transient problem)
///
/// Each step builds a reference Domain from the working Domain, solves on it, projects the reference solution back
/// onto the working Domain and estimates the error. If the error is too large (and the DoF ceiling has not been
/// reached) the working Domain is refined and the loop continues.
#[derive(Clone, Debug)]
pub struct Adaptivity {
    config: AdaptivityConfig,
    estimator: ErrorEstimator,
    selector: Selector,
}

impl Adaptivity {
    pub fn new(config: AdaptivityConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            estimator: ErrorEstimator::new(config.error_norm, config.error_measure),
            selector: Selector::from_config(&config),
        })
    }

    pub fn config(&self) -> &AdaptivityConfig {
        &self.config
    }

    /// Run the adaptivity loop on `domain`, refining it in place
    ///
    /// * `previous`: the solution of the previous time level (passed through to the solver)
    /// * `exact`: an exact solution; only used to record the true error alongside the estimate
    /// * `history`: receives one [StepRecord] per step
    ///
    /// `domain`'s DoFs must be in sync with its Mesh.
    pub fn run<S: SolveProvider + ?Sized>(
        &self,
        domain: &mut Domain,
        solver: &mut S,
        previous: Option<&dyn ScalarField>,
        exact: Option<&dyn ScalarField>,
        history: &mut ConvergenceHistory,
    ) -> Result<AdaptivityResult, AdaptError> {
        let mut step = 0;
        let mut degraded_steps = 0;

        loop {
            step += 1;
            debug!("---- adaptivity step {} ----", step);

            stage(step, AdaptStage::BuildingReference);
            let reference = Arc::new(domain.reference(self.config.reference)?);
            let working = Arc::new(domain.clone());
            let ndof_coarse = working.num_dofs()?;
            let ndof_reference = reference.num_dofs()?;

            stage(step, AdaptStage::Solving);
            let outcome = solver.solve(&reference, previous)?;
            let status = outcome.status();
            if let SolveStatus::Degraded(reason) = &status {
                warn!("step {}: solve did not converge ({}); continuing with the last iterate", step, reason);
                degraded_steps += 1;
            }
            let reference_solution = Solution::new(reference, outcome.into_coefficients())?;

            stage(step, AdaptStage::Projecting);
            let coarse_solution = project_global(&working, &reference_solution, self.config.error_norm)?;

            stage(step, AdaptStage::Estimating);
            let errors = self.estimator.estimate(&coarse_solution, &reference_solution)?;
            let error_estimate = errors.rel_error_percent();
            let exact_error = match exact {
                Some(exact) => Some(
                    self.estimator
                        .exact_error(&coarse_solution, exact)?
                        .rel_error_percent(),
                ),
                None => None,
            };

            info!(
                "ndof_coarse: {}, ndof_ref: {}, err_est_rel: {:.6}%",
                ndof_coarse, ndof_reference, error_estimate
            );
            if let Some(exact_error) = exact_error {
                info!("err_exact_rel: {:.6}%", exact_error);
            }

            stage(step, AdaptStage::Deciding);
            let decision = if error_estimate < self.config.tolerance {
                Decision::Converged
            } else if ndof_coarse >= self.config.dof_ceiling {
                Decision::DofCeiling
            } else {
                stage(step, AdaptStage::Refining);
                let selection = self.selector.adapt(domain, &reference_solution, &errors)?;
                if selection.done() {
                    Decision::Stagnated
                } else if domain.num_dofs()? >= self.config.dof_ceiling {
                    Decision::DofCeiling
                } else {
                    Decision::Refined {
                        elems: selection.refinements.len(),
                    }
                }
            };
            debug!("step {}: {}", step, decision);

            history.push(StepRecord {
                step,
                ndof_coarse,
                ndof_reference,
                error_estimate,
                exact_error,
                elapsed: history.elapsed(),
                status,
                decision,
            });

            let termination = match decision {
                Decision::Converged => Termination::Converged,
                Decision::DofCeiling => Termination::DofCeiling,
                Decision::Stagnated => Termination::Stagnated,
                Decision::Refined { .. } => continue,
            };

            return Ok(AdaptivityResult {
                termination,
                steps: step,
                reference: reference_solution,
                coarse: coarse_solution,
                error_estimate,
                degraded_steps,
            });
        }
    }
}

fn stage(step: usize, stage: AdaptStage) {
    debug!("step {}: {}", step, stage);
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdaptError {
    Config(ConfigError),
    Domain(DomainError),
    Solve(SolveError),
}

impl fmt::Display for AdaptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{}", err),
            Self::Domain(err) => write!(f, "{}", err),
            Self::Solve(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AdaptError {}

impl From<ConfigError> for AdaptError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<DomainError> for AdaptError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<SolveError> for AdaptError {
    fn from(err: SolveError) -> Self {
        match err {
            SolveError::Domain(err) => Self::Domain(err),
            other => Self::Solve(other),
        }
    }
}
