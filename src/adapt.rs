/// Adaptivity and time stepping parameters (deserializable from TOML)
pub mod config;
/// Element-wise error estimation against a reference solution
pub mod estimator;
/// Refinement candidate lists
pub mod candidates;
/// Choosing and applying refinements to a working Domain
pub mod selector;
/// Per-step diagnostics and convergence graph output
pub mod history;
/// The adaptivity loop
pub mod controller;
/// Adaptivity nested in a time stepping loop, with derefinement between steps
pub mod time_stepping;

pub use candidates::CandList;
pub use config::{AdaptivityConfig, ConfigError, DerefinementPolicy, TimeSteppingConfig};
pub use controller::{AdaptError, Adaptivity, AdaptivityResult, Termination};
pub use estimator::{ErrorEstimator, ErrorMeasure, ErrorRecord};
pub use history::{ConvergenceHistory, Decision, StepRecord};
pub use selector::{SelectionOutcome, Selector};
pub use time_stepping::{TimeStepRecord, TimeStepper, TimeSteppingReport};
