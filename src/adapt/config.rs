use super::{candidates::CandList, estimator::ErrorMeasure};
use crate::domain::{
    mesh::{h_refinement::HRef, Mesh, MAX_POLYNOMIAL_ORDER},
    DomainError, ReferenceRefinement,
};
use crate::projection::Norm;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Settings of the adaptivity loop
///
/// The defaults follow the usual hp-adaptive setup: quadratic elements with one uniform pre-refinement, a
/// threshold of 0.3, a 1% stopping tolerance and a 100,000 DoF ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptivityConfig {
    /// Expansion order given to every Elem before adaptivity starts
    pub initial_order: u8,
    /// Number of uniform (T-type) refinements applied before adaptivity starts
    pub initial_refinements: usize,
    /// An Elem is refined when its error exceeds `threshold` times the largest Elem error
    pub threshold: f64,
    /// Stopping tolerance on the relative error estimate (in percent)
    pub tolerance: f64,
    /// Adaptivity stops once the working Domain reaches this many DoFs
    pub dof_ceiling: usize,
    pub candidates: CandList,
    /// Norm in which the error estimate is computed
    pub error_norm: Norm,
    pub error_measure: ErrorMeasure,
    /// Norm used to project the reference solution onto candidate spaces
    pub selector_norm: Norm,
    pub reference: ReferenceRefinement,
    /// Candidates with an expansion order above this value are discarded
    pub max_order: u8,
}

impl Default for AdaptivityConfig {
    fn default() -> Self {
        Self {
            initial_order: 2,
            initial_refinements: 1,
            threshold: 0.3,
            tolerance: 1.0,
            dof_ceiling: 100_000,
            candidates: CandList::HpAniso,
            error_norm: Norm::H1,
            error_measure: ErrorMeasure::RelativeToGlobalNorm,
            selector_norm: Norm::H1,
            reference: ReferenceRefinement::default(),
            max_order: 10,
        }
    }
}

impl AdaptivityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance >= 0.0) {
            return Err(ConfigError::NegativeTolerance(self.tolerance));
        }
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.threshold));
        }
        if self.initial_order == 0 {
            return Err(ConfigError::ZeroInitialOrder);
        }
        if self.dof_ceiling == 0 {
            return Err(ConfigError::ZeroDofCeiling);
        }
        if self.max_order > MAX_POLYNOMIAL_ORDER {
            return Err(ConfigError::MaxOrderTooHigh(self.max_order));
        }
        if self.initial_order > self.max_order {
            return Err(ConfigError::InitialOrderAboveMax {
                initial: self.initial_order,
                max: self.max_order,
            });
        }
        Ok(())
    }

    /// Parse (and validate) a configuration from TOML. Missing keys take their default values.
    ///
    /// ```
    /// use hp_adapt::adapt::config::AdaptivityConfig;
    /// use hp_adapt::projection::Norm;
    ///
    /// let config = AdaptivityConfig::from_toml_str(r#"
    ///     initial_order = 3
    ///     tolerance = 0.5
    ///     error_norm = "L2"
    /// "#).unwrap();
    ///
    /// assert_eq!(config.initial_order, 3);
    /// assert_eq!(config.error_norm, Norm::L2);
    /// assert_eq!(config.dof_ceiling, 100_000);
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the initial orders and uniform refinements to a Mesh, then mark its state as initial
    pub fn prepare_mesh(&self, mesh: &mut Mesh) -> Result<(), DomainError> {
        mesh.set_global_expansion_orders([self.initial_order; 2])?;
        for _ in 0..self.initial_refinements {
            mesh.global_h_refinement(HRef::T)?;
        }
        mesh.mark_as_initial();
        Ok(())
    }
}

/// How the working Domain is coarsened between time steps
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerefinementPolicy {
    /// Restore the base Mesh (with its orders) exactly
    ResetToBase,
    /// Undo one layer of h-refinement and return every active Elem to the initial order
    ///
    /// Collapsing continues until the Mesh is at most one layer finer than the base Mesh
    UnrefineResetOrders,
    /// Undo one layer of h-refinement (as above) and lower every active Elem's orders by one, never below the
    /// initial order
    UnrefineDecrementOrders,
}

impl fmt::Display for DerefinementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ResetToBase => write!(f, "reset to base mesh"),
            Self::UnrefineResetOrders => write!(f, "unrefine, reset orders"),
            Self::UnrefineDecrementOrders => write!(f, "unrefine, decrement orders"),
        }
    }
}

/// Settings of the outer time stepping loop
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSteppingConfig {
    pub time_step: f64,
    pub final_time: f64,
    /// Derefine before every `derefinement_frequency`'th time step
    pub derefinement_frequency: usize,
    pub derefinement: DerefinementPolicy,
}

impl Default for TimeSteppingConfig {
    fn default() -> Self {
        Self {
            time_step: 0.05,
            final_time: 2.0,
            derefinement_frequency: 1,
            derefinement: DerefinementPolicy::UnrefineDecrementOrders,
        }
    }
}

impl TimeSteppingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.time_step > 0.0) {
            return Err(ConfigError::NonPositiveTimeStep(self.time_step));
        }
        if !(self.final_time > 0.0) {
            return Err(ConfigError::NonPositiveFinalTime(self.final_time));
        }
        if self.derefinement_frequency == 0 {
            return Err(ConfigError::ZeroDerefinementFrequency);
        }
        Ok(())
    }

    /// Parse (and validate) a configuration from TOML. Missing keys take their default values.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Number of time steps needed to reach the final time
    pub fn num_steps(&self) -> usize {
        (self.final_time / self.time_step - 1e-9).ceil() as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NegativeTolerance(f64),
    ThresholdOutOfRange(f64),
    ZeroInitialOrder,
    ZeroDofCeiling,
    MaxOrderTooHigh(u8),
    InitialOrderAboveMax { initial: u8, max: u8 },
    NonPositiveTimeStep(f64),
    NonPositiveFinalTime(f64),
    ZeroDerefinementFrequency,
    NewtonTolerance(f64),
    ZeroNewtonIterations,
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NegativeTolerance(tol) => {
                write!(f, "Error tolerance ({}) must be non-negative; Cannot configure adaptivity!", tol)
            }
            Self::ThresholdOutOfRange(theta) => write!(
                f,
                "Refinement threshold ({}) must be in [0, 1); Cannot configure adaptivity!",
                theta
            ),
            Self::ZeroInitialOrder => {
                write!(f, "Initial expansion order must be at least 1; Cannot configure adaptivity!")
            }
            Self::ZeroDofCeiling => write!(f, "DoF ceiling must be positive; Cannot configure adaptivity!"),
            Self::MaxOrderTooHigh(max) => write!(
                f,
                "Maximum order ({}) exceeds the largest supported order ({}); Cannot configure adaptivity!",
                max, MAX_POLYNOMIAL_ORDER
            ),
            Self::InitialOrderAboveMax { initial, max } => write!(
                f,
                "Initial order ({}) exceeds the maximum order ({}); Cannot configure adaptivity!",
                initial, max
            ),
            Self::NonPositiveTimeStep(dt) => {
                write!(f, "Time step ({}) must be positive; Cannot configure time stepping!", dt)
            }
            Self::NonPositiveFinalTime(t) => {
                write!(f, "Final time ({}) must be positive; Cannot configure time stepping!", t)
            }
            Self::ZeroDerefinementFrequency => write!(
                f,
                "Derefinement frequency must be at least 1; Cannot configure time stepping!"
            ),
            Self::NewtonTolerance(tol) => {
                write!(f, "Newton tolerance ({}) must be positive; Cannot configure solver!", tol)
            }
            Self::ZeroNewtonIterations => {
                write!(f, "Newton's method needs at least one iteration; Cannot configure solver!")
            }
            Self::Parse(msg) => write!(f, "Failed to parse configuration ({}); Cannot configure!", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
