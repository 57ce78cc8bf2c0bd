use super::{
    newton::{solve_global, NewtonConfig},
    weak_form::WeakForm,
    SolveError, SolveOutcome, SolveProvider, TransientSolveProvider,
};
use crate::adapt::config::ConfigError;
use crate::domain::{fields::ScalarField, Domain};
use crate::projection::{project_field, Norm};

use log::{trace, warn};
use std::sync::Arc;

/// Backward Euler time integration of `du/dt + R(u, t) = 0`
///
/// Each call to [SolveProvider::solve] advances the previous time level by one step: the stationary form is
/// augmented with the mass term `(u - u_prev) / dt` and evaluated at `t + dt`. The resulting nonlinear system
/// is solved with [NewtonConfig]'s criteria, starting from the projection of the previous time level.
pub struct ImplicitEuler {
    form: WeakForm,
    config: NewtonConfig,
    time: f64,
    time_step: f64,
}

impl ImplicitEuler {
    pub fn new(form: WeakForm, config: NewtonConfig, time_step: f64) -> Result<Self, ConfigError> {
        config.validate()?;
        if !(time_step > 0.0) {
            return Err(ConfigError::NonPositiveTimeStep(time_step));
        }

        Ok(Self {
            form,
            config,
            time: 0.0,
            time_step,
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn form(&self) -> &WeakForm {
        &self.form
    }
}

impl SolveProvider for ImplicitEuler {
    fn solve(
        &mut self,
        domain: &Arc<Domain>,
        previous: Option<&dyn ScalarField>,
    ) -> Result<SolveOutcome, SolveError> {
        if !(self.time_step > 0.0) {
            return Err(SolveError::InvalidTimeStep(self.time_step));
        }
        let previous = previous.ok_or(SolveError::MissingPreviousField)?;

        trace!(
            "implicit euler step {:.4} -> {:.4}",
            self.time,
            self.time + self.time_step
        );
        let initial = match project_field(domain, previous, Norm::H1) {
            Ok(projected) => projected.into_coefficients(),
            Err(err) => {
                warn!("starting Newton's method from the boundary lift: {}", err);
                vec![0.0; domain.num_dofs()?]
            }
        };

        solve_global(
            domain,
            &self.form,
            &self.config,
            self.time + self.time_step,
            Some((previous, self.time_step)),
            initial,
        )
    }
}

impl TransientSolveProvider for ImplicitEuler {
    fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    fn set_time_step(&mut self, time_step: f64) {
        self.time_step = time_step;
    }
}
