use crate::basis::ElemBasis;
use crate::domain::{
    fields::{ScalarField, Solution},
    DomainError,
};
use crate::integration::RectQuadrature;
use crate::projection::{LocalField, Norm};

use serde::{Deserialize, Serialize};
use std::fmt;

/// How per-Elem errors are scaled before they are compared against each other
///
/// The global relative error is not affected by this setting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorMeasure {
    /// Raw squared error of each Elem
    Absolute,
    /// Squared error of each Elem divided by the squared norm of the whole reference solution
    #[default]
    RelativeToGlobalNorm,
    /// Squared error of each Elem divided by the squared norm of the reference solution on that Elem
    RelativeToElementNorm,
}

impl fmt::Display for ErrorMeasure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Absolute => write!(f, "absolute"),
            Self::RelativeToGlobalNorm => write!(f, "relative to global norm"),
            Self::RelativeToElementNorm => write!(f, "relative to element norm"),
        }
    }
}

/// Error contribution of one active Elem of the working Domain
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElemError {
    pub elem_id: usize,
    /// Squared norm of the difference between the two solutions over the Elem
    pub error_sq: f64,
    /// Squared norm of the reference (or exact) solution over the Elem
    pub norm_sq: f64,
}

/// Result of comparing a coarse solution against a reference (or exact) solution
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    pub norm: Norm,
    pub measure: ErrorMeasure,
    pub elem_errors: Vec<ElemError>,
    pub global_error_sq: f64,
    pub global_norm_sq: f64,
}

impl ErrorRecord {
    fn from_elem_errors(norm: Norm, measure: ErrorMeasure, elem_errors: Vec<ElemError>) -> Self {
        let global_error_sq = elem_errors.iter().map(|e| e.error_sq).sum();
        let global_norm_sq = elem_errors.iter().map(|e| e.norm_sq).sum();
        Self {
            norm,
            measure,
            elem_errors,
            global_error_sq,
            global_norm_sq,
        }
    }

    /// Global relative error in percent
    ///
    /// Zero when both the error and the reference norm vanish, infinite when only the reference norm vanishes
    pub fn rel_error_percent(&self) -> f64 {
        if self.global_norm_sq > 0.0 {
            (self.global_error_sq / self.global_norm_sq).sqrt() * 100.0
        } else if self.global_error_sq > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    /// Global error in the record's norm
    pub fn abs_error(&self) -> f64 {
        self.global_error_sq.sqrt()
    }

    /// The error of an Elem scaled according to the record's [ErrorMeasure]
    pub fn scaled_error(&self, elem_error: &ElemError) -> f64 {
        let scale = match self.measure {
            ErrorMeasure::Absolute => 1.0,
            ErrorMeasure::RelativeToGlobalNorm => self.global_norm_sq,
            ErrorMeasure::RelativeToElementNorm => elem_error.norm_sq,
        };
        if scale > 0.0 {
            elem_error.error_sq / scale
        } else {
            elem_error.error_sq
        }
    }

    pub fn max_scaled_error(&self) -> f64 {
        self.elem_errors
            .iter()
            .map(|e| self.scaled_error(e))
            .fold(0.0, f64::max)
    }

    pub fn elem_error(&self, elem_id: usize) -> Option<&ElemError> {
        self.elem_errors.iter().find(|e| e.elem_id == elem_id)
    }

    /// Elem errors with their scaled values, largest first
    pub fn ranked(&self) -> Vec<(ElemError, f64)> {
        let mut ranked: Vec<(ElemError, f64)> = self
            .elem_errors
            .iter()
            .map(|e| (*e, self.scaled_error(e)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Computes global and per-Elem error estimates by comparing a coarse solution against a reference solution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorEstimator {
    norm: Norm,
    measure: ErrorMeasure,
}

impl ErrorEstimator {
    pub fn new(norm: Norm, measure: ErrorMeasure) -> Self {
        Self { norm, measure }
    }

    pub fn norm(&self) -> Norm {
        self.norm
    }

    /// Estimate the error of `coarse` using `reference`
    ///
    /// `reference` must be defined over a reference Domain derived from the current state of `coarse`'s Domain
    pub fn estimate(&self, coarse: &Solution, reference: &Solution) -> Result<ErrorRecord, DomainError> {
        let working = coarse.domain();
        working.check_reference(reference.domain())?;

        let elem_errors = working
            .mesh
            .shell_elems()
            .map(|elem| {
                let rect = elem.rect();
                let local = LocalField::restrict(reference, &rect)?;
                Ok(ElemError {
                    elem_id: elem.id,
                    error_sq: local.distance_sq(
                        &rect,
                        elem.poly_orders,
                        coarse.elem_coefficients(elem.id)?,
                        self.norm,
                    ),
                    norm_sq: local.norm_sq(self.norm),
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        Ok(ErrorRecord::from_elem_errors(self.norm, self.measure, elem_errors))
    }

    /// Compute the true error of `coarse` against a known exact solution
    pub fn exact_error(&self, coarse: &Solution, exact: &dyn ScalarField) -> Result<ErrorRecord, DomainError> {
        let domain = coarse.domain();
        let elem_errors = domain
            .mesh
            .shell_elems()
            .map(|elem| {
                let rect = elem.rect();
                let coefficients = coarse.elem_coefficients(elem.id)?;
                let quad = RectQuadrature::new(elem.poly_orders.max() as usize + 6);
                let basis = ElemBasis::new(elem.poly_orders, &rect, quad.parametric_points());

                let mut error_sq = 0.0;
                let mut norm_sq = 0.0;
                quad.for_each_point(&rect, |index, location, weight| {
                    let (ev, [ex, ey]) = exact.value_and_gradient(&location);
                    let (cv, [cx, cy]) = basis.expand(coefficients, index);
                    error_sq += weight * self.norm.density(cv - ev, [cx - ex, cy - ey]);
                    norm_sq += weight * self.norm.density(ev, [ex, ey]);
                });

                Ok(ElemError {
                    elem_id: elem.id,
                    error_sq,
                    norm_sq,
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        Ok(ErrorRecord::from_elem_errors(self.norm, self.measure, elem_errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        fields::AnalyticField,
        mesh::{p_refinement::PolyOrders, Mesh},
        Domain, ReferenceRefinement,
    };
    use crate::projection::{project_field, project_global};
    use std::sync::Arc;

    fn setup() -> (Arc<Domain>, Arc<Domain>) {
        let mut mesh = Mesh::from_json_str(
            r#"{ "Elements": [ { "min": [0.0, 0.0], "max": [0.5, 1.0] }, { "min": [0.5, 0.0], "max": [2.0, 1.0] } ] }"#,
        )
        .unwrap();
        mesh.set_global_expansion_orders([1, 1]).unwrap();
        let working = Domain::from_mesh(mesh).unwrap();
        let reference = working.reference(ReferenceRefinement::default()).unwrap();
        (Arc::new(working), Arc::new(reference))
    }

    fn squared_x() -> AnalyticField {
        AnalyticField::new(|p| p.x * p.x, |p| [2.0 * p.x, 0.0])
    }

    // u = x^2 is exactly represented on the reference Domain (orders >= 2)
    fn reference_solution(reference: Arc<Domain>) -> Solution {
        project_field(&reference, &squared_x(), Norm::L2).unwrap()
    }

    #[test]
    fn estimate_against_reference() {
        let (working, reference) = setup();
        let fine = reference_solution(reference);
        let coarse = project_global(&working, &fine, Norm::H1).unwrap();

        let estimator = ErrorEstimator::new(Norm::H1, ErrorMeasure::RelativeToGlobalNorm);
        let record = estimator.estimate(&coarse, &fine).unwrap();

        assert_eq!(record.elem_errors.len(), 2);
        assert!(record.rel_error_percent() > 0.0);
        // the wider Elem has the larger error
        assert!(record.elem_errors[1].error_sq > record.elem_errors[0].error_sq);

        // the reference is exact, so the estimate matches the exact error
        let exact_record = estimator.exact_error(&coarse, &squared_x()).unwrap();
        assert!((exact_record.rel_error_percent() - record.rel_error_percent()).abs() < 1e-8);

        // repeated estimation reproduces the same record
        assert_eq!(estimator.estimate(&coarse, &fine).unwrap(), record);
    }

    #[test]
    fn measures_only_scale_elem_errors() {
        let (working, reference) = setup();
        let fine = reference_solution(reference);
        let coarse = project_global(&working, &fine, Norm::L2).unwrap();

        let records: Vec<ErrorRecord> = [
            ErrorMeasure::Absolute,
            ErrorMeasure::RelativeToGlobalNorm,
            ErrorMeasure::RelativeToElementNorm,
        ]
        .iter()
        .map(|measure| {
            ErrorEstimator::new(Norm::L2, *measure)
                .estimate(&coarse, &fine)
                .unwrap()
        })
        .collect();

        let global = records[0].rel_error_percent();
        assert!(records.iter().all(|r| (r.rel_error_percent() - global).abs() < 1e-14));

        let e0 = records[0].elem_errors[0];
        assert_eq!(records[0].scaled_error(&e0), e0.error_sq);
        assert!((records[1].scaled_error(&e0) - e0.error_sq / records[1].global_norm_sq).abs() < 1e-14);
        assert!((records[2].scaled_error(&e0) - e0.error_sq / e0.norm_sq).abs() < 1e-14);

        let ranked = records[0].ranked();
        assert_eq!(ranked[0].0.elem_id, 1);
        assert_eq!(ranked[0].1, records[0].max_scaled_error());
    }

    #[test]
    fn zero_fields() {
        let (working, reference) = setup();
        let fine = Solution::zero(reference).unwrap();
        let coarse = Solution::zero(working).unwrap();

        let record = ErrorEstimator::new(Norm::H1, ErrorMeasure::RelativeToElementNorm)
            .estimate(&coarse, &fine)
            .unwrap();
        assert_eq!(record.rel_error_percent(), 0.0);
        assert_eq!(record.max_scaled_error(), 0.0);
    }

    #[test]
    fn stale_reference_is_rejected() {
        let (working, reference) = setup();
        let fine = Solution::zero(reference).unwrap();

        let mut changed = (*working).clone();
        changed.apply_refinement(0, None, PolyOrders::from(2, 2)).unwrap();
        changed.assign_dofs().unwrap();
        let coarse = Solution::zero(Arc::new(changed)).unwrap();

        assert!(matches!(
            ErrorEstimator::new(Norm::H1, ErrorMeasure::Absolute).estimate(&coarse, &fine),
            Err(DomainError::IncompatibleReference { .. })
        ));
    }
}
