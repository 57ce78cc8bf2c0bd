use super::{
    candidates::{CandList, Candidate, ScoredCandidate},
    config::AdaptivityConfig,
    estimator::ErrorRecord,
};
use crate::domain::{
    fields::Solution,
    mesh::{elem::Elem, h_refinement::HRef, space::Rect},
    Domain, DomainError,
};
use crate::projection::{LocalField, Norm};

use log::{debug, trace};

/// Squared errors below this fraction of the squared reference norm are round-off, not refinement targets
const NOISE_FLOOR: f64 = 1e-20;

/// A candidate must reduce an Elem's error by at least this fraction to be considered
const MIN_RELATIVE_IMPROVEMENT: f64 = 1e-10;

/// The refinement chosen for one Elem of the working Domain
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElemRefinement {
    pub elem_id: usize,
    /// Scaled error of the Elem that qualified it for refinement
    pub error: f64,
    pub choice: ScoredCandidate,
}

/// The result of one selection pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionOutcome {
    /// Chosen refinements, ordered by decreasing Elem error
    pub refinements: Vec<ElemRefinement>,
    /// Number of Elems whose error exceeded the threshold
    pub qualified: usize,
}

impl SelectionOutcome {
    /// True when no Elem was refined
    pub fn done(&self) -> bool {
        self.refinements.is_empty()
    }

    /// Number of Elem-local functions the chosen refinements add
    ///
    /// Shared vertex and edge functions are counted once per Elem, so the global DoF count grows by less
    pub fn added_dofs(&self) -> usize {
        self.refinements.iter().map(|r| r.choice.dof_cost).sum()
    }
}

/// Chooses how to refine the Elems of a working Domain given a reference solution and an error estimate
///
/// An Elem qualifies for refinement if its scaled error exceeds `threshold` times the largest scaled error. For
/// each qualifying Elem, every candidate from the [CandList] is scored by projecting the reference solution onto
/// the candidate's space: `(current error - candidate error) / added DoFs`. The best candidate wins (ties go to
/// the cheaper one). Elems where no candidate reduces the error are left alone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Selector {
    threshold: f64,
    candidates: CandList,
    norm: Norm,
    max_order: u8,
}

impl Selector {
    pub fn new(threshold: f64, candidates: CandList, norm: Norm, max_order: u8) -> Self {
        Self {
            threshold,
            candidates,
            norm,
            max_order,
        }
    }

    pub fn from_config(config: &AdaptivityConfig) -> Self {
        Self::new(
            config.threshold,
            config.candidates,
            config.selector_norm,
            config.max_order,
        )
    }

    /// Choose refinements without modifying the working Domain
    pub fn select(
        &self,
        working: &Domain,
        reference: &Solution,
        errors: &ErrorRecord,
    ) -> Result<SelectionOutcome, DomainError> {
        let max_error = errors.max_scaled_error();
        let noise = NOISE_FLOOR * errors.global_norm_sq;
        if errors.global_error_sq <= noise || !max_error.is_finite() {
            debug!(
                "error ({:.3e}) is at the round-off level; nothing to refine",
                errors.abs_error()
            );
            return Ok(SelectionOutcome::default());
        }

        let mut outcome = SelectionOutcome::default();
        for (elem_error, scaled) in errors.ranked() {
            if scaled <= self.threshold * max_error {
                break;
            }
            if elem_error.error_sq <= noise {
                continue;
            }
            outcome.qualified += 1;

            let elem = working.mesh.elem(elem_error.elem_id)?;
            match self.best_candidate(working, elem, reference)? {
                Some(choice) => {
                    trace!(
                        "elem {} (err {:.3e}): {} (score {:.3e}, +{} dofs)",
                        elem.id,
                        scaled,
                        choice.candidate,
                        choice.score,
                        choice.dof_cost
                    );
                    outcome.refinements.push(ElemRefinement {
                        elem_id: elem.id,
                        error: scaled,
                        choice,
                    });
                }
                None => trace!("elem {} (err {:.3e}): no improving candidate", elem.id, scaled),
            }
        }

        debug!(
            "{} of {} elems qualified; refining {} (+{} local functions)",
            outcome.qualified,
            errors.elem_errors.len(),
            outcome.refinements.len(),
            outcome.added_dofs()
        );
        Ok(outcome)
    }

    /// Choose refinements and apply them to the working Domain
    ///
    /// DoFs are reassigned if anything was refined
    pub fn adapt(
        &self,
        working: &mut Domain,
        reference: &Solution,
        errors: &ErrorRecord,
    ) -> Result<SelectionOutcome, DomainError> {
        let outcome = self.select(working, reference, errors)?;
        for refinement in outcome.refinements.iter() {
            working.apply_candidate(refinement.elem_id, &refinement.choice.candidate)?;
        }
        if !outcome.done() {
            working.assign_dofs()?;
        }
        Ok(outcome)
    }

    fn best_candidate(
        &self,
        working: &Domain,
        elem: &Elem,
        reference: &Solution,
    ) -> Result<Option<ScoredCandidate>, DomainError> {
        let rect = elem.rect();
        let local = LocalField::restrict(reference, &rect)?;

        let mut splits = Vec::with_capacity(3);
        for split in [HRef::T, HRef::U, HRef::V] {
            if working.mesh.elem_can_split(elem.id, split)? {
                splits.push(split);
            }
        }
        let candidates = self
            .candidates
            .generate(elem.poly_orders, self.max_order, |split| splits.contains(&split));

        let current = Candidate {
            split: None,
            orders: elem.poly_orders,
        };
        let current_error = self.candidate_error(&local, &rect, &current, elem.id)?;
        let current_dofs = current.num_dofs();

        let mut best: Option<ScoredCandidate> = None;
        for candidate in candidates {
            let error = self.candidate_error(&local, &rect, &candidate, elem.id)?;
            let dof_cost = candidate.num_dofs() - current_dofs;
            let score = (current_error - error) / dof_cost as f64;

            if !(current_error - error > MIN_RELATIVE_IMPROVEMENT * current_error) {
                continue;
            }

            let better = match &best {
                None => true,
                Some(b) => {
                    let tie = (score - b.score).abs() <= 1e-12 * b.score.abs();
                    (!tie && score > b.score) || (tie && dof_cost < b.dof_cost)
                }
            };
            if better {
                best = Some(ScoredCandidate {
                    candidate,
                    score,
                    dof_cost,
                    error,
                });
            }
        }

        Ok(best)
    }

    /// Error (in the selector's norm) of the reference solution's best approximation in a candidate's space
    fn candidate_error(
        &self,
        local: &LocalField,
        rect: &Rect,
        candidate: &Candidate,
        elem_id: usize,
    ) -> Result<f64, DomainError> {
        let mut error_sq = 0.0;
        for region in candidate.regions(rect) {
            let restricted = local.within(&region);
            let coefficients = restricted
                .project(&region, candidate.orders, self.norm)
                .ok_or(DomainError::SingularProjection(elem_id))?;
            error_sq += restricted.distance_sq(&region, candidate.orders, &coefficients, self.norm);
        }
        Ok(error_sq.sqrt())
    }
}
