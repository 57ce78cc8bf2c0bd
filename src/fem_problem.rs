/// Tagged, closure-backed contributions to a weak formulation
pub mod weak_form;

/// Global assembly of Elem-local systems over the continuous space
pub(crate) mod galerkin;

/// Newton iteration over the global DoFs
pub mod newton;

/// Backward Euler time stepping with a Newton solve at each step
pub mod implicit_euler;

use crate::domain::{fields::ScalarField, Domain, DomainError};

use std::fmt;
use std::sync::Arc;

/// Result of a solve that produced coefficients
#[derive(Clone, Debug, PartialEq)]
pub enum SolveOutcome {
    /// The solver met its convergence criterion
    Converged(Vec<f64>),
    /// The solver gave up; `coefficients` is its last iterate
    Degraded { coefficients: Vec<f64>, reason: String },
}

impl SolveOutcome {
    pub fn status(&self) -> SolveStatus {
        match self {
            Self::Converged(_) => SolveStatus::Converged,
            Self::Degraded { reason, .. } => SolveStatus::Degraded(reason.clone()),
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        match self {
            Self::Converged(coefficients) => coefficients,
            Self::Degraded { coefficients, .. } => coefficients,
        }
    }

    pub fn into_coefficients(self) -> Vec<f64> {
        match self {
            Self::Converged(coefficients) => coefficients,
            Self::Degraded { coefficients, .. } => coefficients,
        }
    }
}

/// Whether a solve converged, recorded alongside each adaptivity step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    Degraded(String),
}

impl SolveStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::Degraded(reason) => write!(f, "degraded ({})", reason),
        }
    }
}

/// Failures which prevent a solver from producing any coefficients
#[derive(Debug, Clone, PartialEq)]
pub enum SolveError {
    Domain(DomainError),
    MissingPreviousField,
    InvalidTimeStep(f64),
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Domain(err) => write!(f, "{}", err),
            Self::MissingPreviousField => write!(
                f,
                "Transient problems need the previous time level; Cannot take time step!"
            ),
            Self::InvalidTimeStep(dt) => {
                write!(f, "Time step {} is not positive; Cannot take time step!", dt)
            }
        }
    }
}

impl std::error::Error for SolveError {}

impl From<DomainError> for SolveError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

/// Something that can compute a discrete solution over a Domain
///
/// The returned coefficients refer to the DoFs of `domain`.
pub trait SolveProvider {
    fn solve(
        &mut self,
        domain: &Arc<Domain>,
        previous: Option<&dyn ScalarField>,
    ) -> Result<SolveOutcome, SolveError>;
}

/// A [SolveProvider] which advances a transient problem by one time step
pub trait TransientSolveProvider: SolveProvider {
    /// Time at the start of the next step
    fn set_time(&mut self, time: f64);

    fn set_time_step(&mut self, time_step: f64);
}
