use crate::basis::{legendre_mass, legendre_stiffness, lobatto_to_legendre, ElemBasis};
use crate::domain::{
    dof::LocalDof,
    fields::{ScalarField, Solution},
    mesh::{elem::Elem, p_refinement::PolyOrders, space::Rect},
    Domain, DomainError,
};
use crate::fem_problem::galerkin::scatter;
use crate::integration::RectQuadrature;
use crate::linalg::{
    bicgstab::{BiCGStab, LinearSolveError},
    LinearSystem,
};

use log::trace;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The norm used for projections and error measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Norm {
    L2,
    #[default]
    H1,
}

impl Norm {
    /// Integrand of the squared norm, given a value and a gradient
    #[inline]
    pub fn density(&self, value: f64, [gx, gy]: [f64; 2]) -> f64 {
        match self {
            Self::L2 => value * value,
            Self::H1 => value * value + gx * gx + gy * gy,
        }
    }
}

impl fmt::Display for Norm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::L2 => write!(f, "L2"),
            Self::H1 => write!(f, "H1"),
        }
    }
}

/// The expansion of one active Elem, restricted to a `region` of that Elem
#[derive(Clone, Debug)]
pub struct FieldPiece<'a> {
    pub region: Rect,
    source: Rect,
    orders: PolyOrders,
    coefficients: &'a [f64],
}

impl<'a> FieldPiece<'a> {
    pub fn orders(&self) -> PolyOrders {
        self.orders
    }

    fn sampled_over(&self, region: &Rect, quad: &RectQuadrature) -> ElemBasis {
        ElemBasis::over_region(self.orders, &self.source, region, quad.parametric_points())
    }
}

/// The restriction of a discrete [Solution] to some region of real space
///
/// The restricted field is stored as a list of pieces over which it is a polynomial, so integrals over the
/// region are exact (up to the chosen quadrature order)
#[derive(Clone, Debug)]
pub struct LocalField<'a> {
    pieces: Vec<FieldPiece<'a>>,
}

impl<'a> LocalField<'a> {
    /// Restrict a Solution to `region`
    pub fn restrict(solution: &'a Solution, region: &Rect) -> Result<Self, DomainError> {
        let mesh = &solution.domain().mesh;
        let pieces = mesh
            .shell_elems_overlapping(region)
            .into_iter()
            .map(|(elem_id, overlap)| {
                let elem = mesh.elem(elem_id)?;
                Ok(FieldPiece {
                    region: overlap,
                    source: elem.rect(),
                    orders: elem.poly_orders,
                    coefficients: solution.elem_coefficients(elem_id)?,
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        Ok(Self { pieces })
    }

    pub fn pieces(&self) -> &[FieldPiece<'a>] {
        &self.pieces
    }

    /// The part of this field within `region`
    pub fn within(&self, region: &Rect) -> Self {
        Self {
            pieces: self
                .pieces
                .iter()
                .filter_map(|piece| {
                    piece.region.intersection(region).map(|overlap| FieldPiece {
                        region: overlap,
                        ..piece.clone()
                    })
                })
                .collect(),
        }
    }

    /// Squared norm of this field
    pub fn norm_sq(&self, norm: Norm) -> f64 {
        self.pieces
            .iter()
            .map(|piece| {
                let quad = RectQuadrature::for_order(piece.orders.max() as usize);
                let basis = piece.sampled_over(&piece.region, &quad);

                let mut total = 0.0;
                quad.for_each_point(&piece.region, |index, _, weight| {
                    let (value, gradient) = basis.expand(piece.coefficients, index);
                    total += weight * norm.density(value, gradient);
                });
                total
            })
            .sum()
    }

    /// Squared distance between this field and an expansion with `orders` over `rect`
    ///
    /// Only the parts of this field within `rect` are considered
    pub fn distance_sq(&self, rect: &Rect, orders: PolyOrders, coefficients: &[f64], norm: Norm) -> f64 {
        self.pieces
            .iter()
            .filter_map(|piece| piece.region.intersection(rect).map(|overlap| (piece, overlap)))
            .map(|(piece, overlap)| {
                let quad = RectQuadrature::for_order(std::cmp::max(piece.orders.max(), orders.max()) as usize);
                let field_basis = piece.sampled_over(&overlap, &quad);
                let local_basis = ElemBasis::over_region(orders, rect, &overlap, quad.parametric_points());

                let mut total = 0.0;
                quad.for_each_point(&overlap, |index, _, weight| {
                    let (fv, [fx, fy]) = field_basis.expand(piece.coefficients, index);
                    let (lv, [lx, ly]) = local_basis.expand(coefficients, index);
                    total += weight * norm.density(fv - lv, [fx - lx, fy - ly]);
                });
                total
            })
            .sum()
    }

    /// Orthogonal projection of this field onto the space of polynomials with `orders` over `rect`
    ///
    /// Returns `None` if the Gram matrix could not be factored
    pub fn project(&self, rect: &Rect, orders: PolyOrders, norm: Norm) -> Option<Vec<f64>> {
        gram_matrix(orders, rect, norm)
            .cholesky()
            .map(|chol| chol.solve(&self.load_vector(rect, orders, norm)).as_slice().to_vec())
    }

    /// Inner products of this field with the Legendre basis with `orders` over `rect`
    pub fn load_vector(&self, rect: &Rect, orders: PolyOrders, norm: Norm) -> DVector<f64> {
        let mut rhs = DVector::zeros(orders.num_dofs());

        for piece in self.pieces.iter() {
            let overlap = match piece.region.intersection(rect) {
                Some(overlap) => overlap,
                None => continue,
            };

            let quad = RectQuadrature::for_order(std::cmp::max(piece.orders.max(), orders.max()) as usize);
            let field_basis = piece.sampled_over(&overlap, &quad);
            let local_basis = ElemBasis::over_region(orders, rect, &overlap, quad.parametric_points());

            quad.for_each_point(&overlap, |index, _, weight| {
                let (fv, [fx, fy]) = field_basis.expand(piece.coefficients, index);
                for k in 0..local_basis.num_functions() {
                    let mut entry = fv * local_basis.value(k, index);
                    if let Norm::H1 = norm {
                        let [dx, dy] = local_basis.gradient(k, index);
                        entry += fx * dx + fy * dy;
                    }
                    rhs[k] += weight * entry;
                }
            });
        }

        rhs
    }
}

/// Gram matrix of the tensor-product Legendre basis with `orders` over `rect` in the given norm
///
/// Computed analytically from the one dimensional Legendre mass and stiffness integrals
pub fn gram_matrix(orders: PolyOrders, rect: &Rect, norm: Norm) -> DMatrix<f64> {
    let n = orders.num_dofs();
    let jacobian = rect.area() / 4.0;
    let [su, sv] = rect.parametric_scale();

    let mut gram = DMatrix::zeros(n, n);
    for (a, [i, j]) in orders.permutations().enumerate() {
        for (b, [k, l]) in orders.permutations().enumerate() {
            let mass_u = legendre_mass(i, k);
            let mass_v = legendre_mass(j, l);
            let mut entry = mass_u * mass_v;
            if let Norm::H1 = norm {
                entry += su * su * legendre_stiffness(i, k) * mass_v
                    + sv * sv * mass_u * legendre_stiffness(j, l);
            }
            gram[(a, b)] = entry * jacobian;
        }
    }
    gram
}

/// Change of basis from an Elem's Lobatto coefficients to its Legendre coefficients
fn lobatto_conversion(orders: PolyOrders) -> DMatrix<f64> {
    let n = orders.num_dofs();
    let mut conversion = DMatrix::zeros(n, n);
    let mut unit = vec![0.0; n];
    for c in 0..n {
        unit[c] = 1.0;
        for (r, value) in lobatto_to_legendre(&orders, &unit).into_iter().enumerate() {
            conversion[(r, c)] = value;
        }
        unit[c] = 0.0;
    }
    conversion
}

/// Solve for the member of `target`'s continuous space nearest to some field
///
/// `legendre_load` gives the inner products of the field with an Elem's Legendre basis
fn solve_projection<F>(target: &Domain, norm: Norm, legendre_load: F) -> Result<Vec<f64>, DomainError>
where
    F: Fn(&Elem) -> Result<DVector<f64>, DomainError> + Sync,
{
    let num_dofs = target.num_dofs()?;
    let elems: Vec<(&Elem, &[LocalDof])> = target
        .mesh
        .shell_elems()
        .map(|elem| Ok((elem, target.local_dofs(elem.id)?)))
        .collect::<Result<_, DomainError>>()?;

    let contributions = elems
        .par_iter()
        .map(|(elem, local)| {
            let conversion = lobatto_conversion(elem.poly_orders);
            let gram = conversion.transpose() * gram_matrix(elem.poly_orders, &elem.rect(), norm) * &conversion;
            let load = conversion.transpose() * legendre_load(elem)?;
            Ok(scatter(local, &gram, &load, true))
        })
        .collect::<Result<Vec<_>, DomainError>>()?;

    let mut system = LinearSystem::new(num_dofs);
    system.par_extend(contributions);

    let mut x = DVector::zeros(num_dofs);
    let stats = system
        .solve(&BiCGStab::default(), &mut x)
        .map_err(|err| match err {
            LinearSolveError::NotConverged { iterations, .. } => {
                DomainError::ProjectionNotConverged { iterations }
            }
            LinearSolveError::DimensionMismatch { .. } => {
                DomainError::ProjectionNotConverged { iterations: 0 }
            }
        })?;
    trace!("{} projection onto {} dofs: {} iterations", norm, num_dofs, stats.iterations);

    Ok(x.as_slice().to_vec())
}

/// Project a discrete field onto the continuous space of `target`
///
/// The field's Domain can be any Mesh over the same region of real space. Its integrals are evaluated exactly
/// over the pieces where both expansions are polynomials. The result meets `target`'s boundary condition.
pub fn project_global(target: &Arc<Domain>, field: &Solution, norm: Norm) -> Result<Solution, DomainError> {
    let dofs = solve_projection(target, norm, |elem| {
        let rect = elem.rect();
        Ok(LocalField::restrict(field, &rect)?.load_vector(&rect, elem.poly_orders, norm))
    })?;

    Solution::new(target.clone(), dofs)
}

/// Project any [ScalarField] onto the continuous space of `target`
///
/// Integrals are evaluated with a few more quadrature points than the local expansions need
pub fn project_field(target: &Arc<Domain>, field: &dyn ScalarField, norm: Norm) -> Result<Solution, DomainError> {
    let dofs = solve_projection(target, norm, |elem| {
        let rect = elem.rect();
        let quad = RectQuadrature::for_order(elem.poly_orders.max() as usize + 4);
        let basis = ElemBasis::new(elem.poly_orders, &rect, quad.parametric_points());

        let mut rhs = DVector::zeros(basis.num_functions());
        quad.for_each_point(&rect, |index, p, weight| {
            let (fv, [fx, fy]) = field.value_and_gradient(&p);
            for k in 0..basis.num_functions() {
                let mut entry = fv * basis.value(k, index);
                if let Norm::H1 = norm {
                    let [dx, dy] = basis.gradient(k, index);
                    entry += fx * dx + fy * dy;
                }
                rhs[k] += weight * entry;
            }
        });
        Ok(rhs)
    })?;

    Solution::new(target.clone(), dofs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dof::Boundary;
    use crate::domain::fields::AnalyticField;
    use crate::domain::mesh::{h_refinement::HRef, space::Point, Mesh};
    use crate::domain::ReferenceRefinement;

    fn working_mesh() -> Mesh {
        let mut mesh = Mesh::rectangular(Rect::new(Point::new(0.0, 0.0), Point::new(2.0, 1.0)), [2, 1]);
        mesh.set_global_expansion_orders([2, 2]).unwrap();
        mesh.h_refine_elems(vec![1], HRef::U).unwrap();
        mesh
    }

    fn working_domain() -> Domain {
        Domain::from_mesh(working_mesh()).unwrap()
    }

    fn quadratic() -> AnalyticField {
        AnalyticField::new(|p| p.x * p.x * p.y - p.x, |p| [2.0 * p.x * p.y - 1.0, p.x * p.x])
    }

    #[test]
    fn gram_matrix_matches_quadrature() {
        let rect = Rect::new(Point::new(0.5, -1.0), Point::new(1.0, 0.5));
        let orders = PolyOrders::from(3, 2);
        let gram = gram_matrix(orders, &rect, Norm::H1);

        let quad = RectQuadrature::for_order(3);
        let basis = ElemBasis::new(orders, &rect, quad.parametric_points());
        for a in 0..orders.num_dofs() {
            for b in 0..orders.num_dofs() {
                let mut entry = 0.0;
                quad.for_each_point(&rect, |index, _, w| {
                    let [ax, ay] = basis.gradient(a, index);
                    let [bx, by] = basis.gradient(b, index);
                    entry += w * (basis.value(a, index) * basis.value(b, index) + ax * bx + ay * by);
                });
                assert!((entry - gram[(a, b)]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn projection_reproduces_contained_polynomials() {
        let working = Arc::new(working_domain());
        let reference = Arc::new(working.reference(ReferenceRefinement::default()).unwrap());

        let fine = project_field(&reference, &quadratic(), Norm::L2).unwrap();
        let coarse = project_global(&working, &fine, Norm::H1).unwrap();

        for p in [Point::new(0.1, 0.9), Point::new(1.3, 0.2), Point::new(1.8, 0.6)] {
            let exact = p.x * p.x * p.y - p.x;
            assert!((fine.value(&p) - exact).abs() < 1e-10);
            assert!((coarse.value(&p) - exact).abs() < 1e-10);
        }

        // the error of an exact projection is zero
        for elem in working.mesh.shell_elems() {
            let rect = elem.rect();
            let local = LocalField::restrict(&fine, &rect).unwrap();
            let err = local.distance_sq(
                &rect,
                elem.poly_orders,
                coarse.elem_coefficients(elem.id).unwrap(),
                Norm::H1,
            );
            assert!(err < 1e-18);
        }
    }

    #[test]
    fn projection_onto_lower_orders() {
        let working = Arc::new(working_domain());
        let fine = project_field(&working, &quadratic(), Norm::L2).unwrap();

        let mut coarse_mesh = working.mesh.clone();
        coarse_mesh.set_global_expansion_orders([1, 1]).unwrap();
        let coarse_domain = Arc::new(Domain::from_mesh(coarse_mesh).unwrap());
        let coarse = project_global(&coarse_domain, &fine, Norm::L2).unwrap();

        // the L2 projection error is orthogonal to the (continuous) coarse space
        let whole = Rect::new(Point::new(0.0, 0.0), Point::new(2.0, 1.0));
        let local = LocalField::restrict(&fine, &whole).unwrap();
        let total = local.norm_sq(Norm::L2);
        let err: f64 = coarse_domain
            .mesh
            .shell_elems()
            .map(|elem| {
                local.distance_sq(
                    &elem.rect(),
                    elem.poly_orders,
                    coarse.elem_coefficients(elem.id).unwrap(),
                    Norm::L2,
                )
            })
            .sum();
        let proj = LocalField::restrict(&coarse, &whole).unwrap().norm_sq(Norm::L2);
        assert!(err > 1e-6);
        assert!((total - (err + proj)).abs() < 1e-10);
    }

    #[test]
    fn projection_keeps_the_boundary_condition() {
        let target = Arc::new(Domain::with_boundary(working_mesh(), Boundary::homogeneous()).unwrap());
        let projected = project_field(&target, &AnalyticField::constant(1.0), Norm::H1).unwrap();

        for p in [Point::new(0.0, 0.5), Point::new(1.2, 1.0), Point::new(2.0, 0.3)] {
            assert!(projected.value(&p).abs() < 1e-12);
        }
        assert!(projected.value(&Point::new(1.0, 0.5)) > 0.02);

        // a field which meets the condition is reproduced
        let bubble = AnalyticField::new(
            |p| p.x * (2.0 - p.x) * p.y * (1.0 - p.y),
            |p| [(2.0 - 2.0 * p.x) * p.y * (1.0 - p.y), p.x * (2.0 - p.x) * (1.0 - 2.0 * p.y)],
        );
        let reproduced = project_field(&target, &bubble, Norm::L2).unwrap();
        let p = Point::new(0.7, 0.4);
        assert!((reproduced.value(&p) - bubble.value(&p)).abs() < 1e-10);
    }

    #[test]
    fn restricted_fields() {
        let working = working_domain();
        let solution = Solution::zero(Arc::new(working)).unwrap();

        let region = Rect::new(Point::new(0.5, 0.0), Point::new(1.5, 1.0));
        let local = LocalField::restrict(&solution, &region).unwrap();
        assert_eq!(local.pieces().len(), 2);

        let narrower = local.within(&Rect::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0)));
        assert_eq!(narrower.pieces().len(), 1);
        assert!((narrower.pieces()[0].region.area() - 0.5).abs() < 1e-14);
    }
}
