use super::{
    config::{AdaptivityConfig, ConfigError, DerefinementPolicy, TimeSteppingConfig},
    controller::{AdaptError, Adaptivity, Termination},
    history::ConvergenceHistory,
};
use crate::domain::{
    fields::{ScalarField, Solution},
    mesh::{p_refinement::PolyOrders, Mesh},
    Domain,
};
use crate::fem_problem::TransientSolveProvider;

use log::{debug, info};

/// Summary of one time step
#[derive(Clone, Debug)]
pub struct TimeStepRecord {
    /// 1-based index of the time step
    pub step: usize,
    /// Time at the end of the step
    pub time: f64,
    /// Whether the working Domain was derefined before the step
    pub derefined: bool,
    /// Working DoFs after derefinement (at the start of the step)
    pub ndof_after_derefinement: usize,
    /// Largest h-refinement depth after derefinement
    pub max_depth_after_derefinement: usize,
    /// Smallest expansion order of any active Elem after derefinement
    pub min_order_after_derefinement: u8,
    /// Largest expansion order of any active Elem after derefinement
    pub max_order_after_derefinement: u8,
    pub termination: Termination,
    pub adaptivity_steps: usize,
    pub error_estimate: f64,
    /// Working DoFs at the end of the step
    pub ndof_final: usize,
    /// Largest expansion order of any active Elem at the end of the step
    pub max_order_final: u8,
    pub degraded_steps: usize,
    pub history: ConvergenceHistory,
}

/// Output of a transient run
#[derive(Clone, Debug)]
pub struct TimeSteppingReport {
    pub records: Vec<TimeStepRecord>,
    /// Reference solution at the final time
    pub solution: Option<Solution>,
}

impl TimeSteppingReport {
    pub fn final_time(&self) -> f64 {
        self.records.last().map_or(0.0, |r| r.time)
    }
}

/// Nests the adaptivity loop inside a time stepping loop, coarsening the working Domain between steps
pub struct TimeStepper {
    adaptivity: Adaptivity,
    config: TimeSteppingConfig,
}

impl TimeStepper {
    pub fn new(adaptivity_config: AdaptivityConfig, config: TimeSteppingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            adaptivity: Adaptivity::new(adaptivity_config)?,
            config,
        })
    }

    pub fn config(&self) -> &TimeSteppingConfig {
        &self.config
    }

    /// Advance from `t = 0` to the final time
    ///
    /// The state of `domain` on entry is the base state that derefinement returns to. At each time step the
    /// adaptivity loop is run with the previous time level (`initial` for the first step, the previous step's
    /// reference solution afterwards).
    pub fn run<S: TransientSolveProvider + ?Sized>(
        &self,
        domain: &mut Domain,
        solver: &mut S,
        initial: &dyn ScalarField,
    ) -> Result<TimeSteppingReport, AdaptError> {
        let base = domain.mesh.clone();
        let base_orders = PolyOrders::uniform(self.adaptivity.config().initial_order);
        let time_step = self.config.time_step;
        let num_steps = self.config.num_steps();

        let mut records = Vec::with_capacity(num_steps);
        let mut previous: Option<Solution> = None;

        for ts in 1..=num_steps {
            let start_time = (ts - 1) as f64 * time_step;

            let derefined = ts > 1 && ts % self.config.derefinement_frequency == 0;
            if derefined {
                derefine(&mut domain.mesh, &base, base_orders, self.config.derefinement)?;
            }
            domain.assign_dofs()?;

            let ndof_after_derefinement = domain.num_dofs()?;
            let max_depth_after_derefinement = domain.mesh.max_depth();
            let min_order_after_derefinement = domain
                .mesh
                .shell_elems()
                .map(|elem| std::cmp::min(elem.poly_orders.ni, elem.poly_orders.nj))
                .min()
                .unwrap_or(0);
            let max_order_after_derefinement = max_order(&domain.mesh);

            info!(
                "---- time step {} (t = {:.4}), ndof = {} ----",
                ts, start_time, ndof_after_derefinement
            );

            solver.set_time(start_time);
            solver.set_time_step(time_step);

            let prev_field: &dyn ScalarField = match &previous {
                Some(solution) => solution,
                None => initial,
            };
            let mut history = ConvergenceHistory::new();
            let result = self
                .adaptivity
                .run(domain, solver, Some(prev_field), None, &mut history)?;

            debug!(
                "time step {}: {} after {} steps ({:.4}%)",
                ts, result.termination, result.steps, result.error_estimate
            );

            records.push(TimeStepRecord {
                step: ts,
                time: ts as f64 * time_step,
                derefined,
                ndof_after_derefinement,
                max_depth_after_derefinement,
                min_order_after_derefinement,
                max_order_after_derefinement,
                termination: result.termination,
                adaptivity_steps: result.steps,
                error_estimate: result.error_estimate,
                ndof_final: domain.num_dofs()?,
                max_order_final: max_order(&domain.mesh),
                degraded_steps: result.degraded_steps,
                history,
            });

            previous = Some(result.reference);
        }

        Ok(TimeSteppingReport {
            records,
            solution: previous,
        })
    }
}

fn max_order(mesh: &Mesh) -> u8 {
    let [ni, nj] = mesh.max_expansion_orders();
    std::cmp::max(ni, nj)
}

/// Undo one layer of h-refinement, then keep collapsing until no active Elem is more than one layer finer than `base`
///
/// Collapsed Elems take the largest orders of the Elems they replace
fn unrefine_layers(mesh: &mut Mesh, base: &Mesh) -> usize {
    let limit = base.max_depth() + 1;
    let mut collapsed = mesh.unrefine_all_elems();
    while mesh.max_depth() > limit {
        match mesh.unrefine_all_elems() {
            0 => break,
            n => collapsed += n,
        }
    }
    collapsed
}

fn derefine(
    mesh: &mut Mesh,
    base: &Mesh,
    base_orders: PolyOrders,
    policy: DerefinementPolicy,
) -> Result<(), AdaptError> {
    match policy {
        DerefinementPolicy::ResetToBase => mesh.reset_to(base),
        DerefinementPolicy::UnrefineResetOrders => {
            unrefine_layers(mesh, base);
            let shell_ids: Vec<usize> = mesh.shell_elems().map(|elem| elem.id).collect();
            mesh.set_expansion_on_elems(shell_ids, [base_orders.ni, base_orders.nj])
                .map_err(crate::domain::DomainError::from)?;
        }
        DerefinementPolicy::UnrefineDecrementOrders => {
            unrefine_layers(mesh, base);
            mesh.adjust_shell_orders(-1, base_orders);
        }
    }
    debug!("derefined ({}): {} active elems", policy, mesh.shell_elems().count());
    Ok(())
}
