use super::weak_form::{TimeHistory, WeakForm};
use crate::basis::LobattoBasis;
use crate::domain::{dof::LocalDof, fields::ScalarField, mesh::elem::Elem, Domain, DomainError};
use crate::integration::{QuadPoint, RectQuadrature};
use crate::linalg::{ElemContribution, LinearSystem};

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Quadrature data of one active Elem, reused over the iterations of a solve
pub(crate) struct ElemSetup<'d> {
    pub elem: &'d Elem,
    pub local: &'d [LocalDof],
    basis: LobattoBasis,
    points: Vec<QuadPoint>,
    /// Values of the previous time level at `points`
    previous: Option<Vec<f64>>,
}

impl<'d> ElemSetup<'d> {
    /// Local Lobatto coefficients for a vector of global DoFs
    pub fn local_coefficients(&self, dofs: &[f64]) -> Vec<f64> {
        self.local.iter().map(|local| local.eval(dofs)).collect()
    }
}

/// Sample the Lobatto basis (and the previous time level, if any) on every active Elem
pub(crate) fn elem_setups<'d>(
    domain: &'d Domain,
    previous: Option<&dyn ScalarField>,
) -> Result<Vec<ElemSetup<'d>>, DomainError> {
    let elems: Vec<(&Elem, &[LocalDof])> = domain
        .mesh
        .shell_elems()
        .map(|elem| Ok((elem, domain.local_dofs(elem.id)?)))
        .collect::<Result<_, DomainError>>()?;

    Ok(elems
        .into_par_iter()
        .map(|(elem, local)| {
            let rect = elem.rect();
            let quad = RectQuadrature::for_order(elem.poly_orders.max() as usize);
            let points = quad.points_in(&rect);
            let previous = previous.map(|field| {
                points
                    .iter()
                    .map(|qp| field.value(&qp.location))
                    .collect()
            });

            ElemSetup {
                elem,
                local,
                basis: LobattoBasis::sampled(elem.poly_orders, &rect, quad.parametric_points()),
                points,
                previous,
            }
        })
        .collect())
}

/// Map the Elem-local system `K y = r` onto the global DoFs, where the local coefficients are `y = A x + b`
///
/// Contributes `Aᵀ K A` to the matrix and `Aᵀ (r - K b)` to the right hand side. The lifts `b` are skipped
/// when `lifted` is false, i.e. when the unknown is an increment of a field that already meets the boundary condition.
pub(crate) fn scatter(local: &[LocalDof], k: &DMatrix<f64>, r: &DVector<f64>, lifted: bool) -> ElemContribution {
    let rhs = if lifted {
        let lifts = DVector::from_iterator(local.len(), local.iter().map(|dof| dof.lift));
        r - k * lifts
    } else {
        r.clone()
    };

    let mut contribution = ElemContribution::default();
    for (a, dof_a) in local.iter().enumerate() {
        for (row, ca) in dof_a.terms.iter() {
            contribution.rhs.push((*row, ca * rhs[a]));

            for (b, dof_b) in local.iter().enumerate() {
                let kab = k[(a, b)];
                if kab == 0.0 {
                    continue;
                }
                for (col, cb) in dof_b.terms.iter() {
                    contribution.entries.push(([*row, *col], ca * kab * cb));
                }
            }
        }
    }

    contribution
}

/// The Newton system `J Δx = -R(x)` of a [WeakForm] at the global DoFs `x`
///
/// `inv_time_step` adds the backward Euler mass term against the previous time level stored in `setups`
pub(crate) fn newton_system(
    setups: &[ElemSetup],
    form: &WeakForm,
    x: &[f64],
    time: f64,
    inv_time_step: Option<f64>,
    num_dofs: usize,
) -> LinearSystem {
    let mut system = LinearSystem::new(num_dofs);

    system.par_extend(setups.par_iter().map(|setup| {
        let coefficients = setup.local_coefficients(x);
        let history = inv_time_step
            .zip(setup.previous.as_deref())
            .map(|(inv_time_step, values)| TimeHistory { inv_time_step, values });

        let (residual, jacobian) = form.assemble_elem(
            &setup.basis,
            &setup.points,
            &coefficients,
            time,
            history.as_ref(),
        );
        scatter(setup.local, &jacobian, &(-residual), false)
    }));

    system
}
