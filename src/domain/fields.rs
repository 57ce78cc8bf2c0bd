use super::{mesh::space::Point, Domain, DomainError};
use crate::basis::expand_at;

use std::fmt;
use std::sync::Arc;

/// A scalar function over real space which can be evaluated along with its gradient
pub trait ScalarField: Sync {
    fn value(&self, point: &Point) -> f64;

    fn gradient(&self, point: &Point) -> [f64; 2];

    fn value_and_gradient(&self, point: &Point) -> (f64, [f64; 2]) {
        (self.value(point), self.gradient(point))
    }
}

type PointFn<T> = Arc<dyn Fn(&Point) -> T + Send + Sync>;

/// A [ScalarField] defined by closures
#[derive(Clone)]
pub struct AnalyticField {
    value: PointFn<f64>,
    gradient: PointFn<[f64; 2]>,
}

impl AnalyticField {
    pub fn new<V, G>(value: V, gradient: G) -> Self
    where
        V: Fn(&Point) -> f64 + Send + Sync + 'static,
        G: Fn(&Point) -> [f64; 2] + Send + Sync + 'static,
    {
        Self {
            value: Arc::new(value),
            gradient: Arc::new(gradient),
        }
    }

    /// A field with the same value everywhere
    pub fn constant(c: f64) -> Self {
        Self::new(move |_| c, |_| [0.0; 2])
    }
}

impl ScalarField for AnalyticField {
    fn value(&self, point: &Point) -> f64 {
        (self.value)(point)
    }

    fn gradient(&self, point: &Point) -> [f64; 2] {
        (self.gradient)(point)
    }
}

impl fmt::Debug for AnalyticField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AnalyticField")
    }
}

/// A discrete solution: a vector of global DoFs attached to the [Domain] they refer to
///
/// The DoFs are expanded once into Elem-local Legendre coefficients, which is what evaluation, projection and
/// error estimation work with.
#[derive(Clone, Debug)]
pub struct Solution {
    domain: Arc<Domain>,
    dofs: Vec<f64>,
    expansion: Vec<f64>,
}

impl Solution {
    /// Attach DoFs to a Domain
    ///
    /// Returns an `Err` if the Domain's DoFs are out of date or the number of values doesn't match
    pub fn new(domain: Arc<Domain>, dofs: Vec<f64>) -> Result<Self, DomainError> {
        let expected = domain.num_dofs()?;
        if dofs.len() != expected {
            return Err(DomainError::CoefficientLength {
                expected,
                found: dofs.len(),
            });
        }

        let expansion = domain.dof_map().expand(&domain.mesh, &dofs);
        Ok(Self {
            domain,
            dofs,
            expansion,
        })
    }

    /// The zero function over a Domain (plus the boundary lift, if the boundary condition is essential)
    pub fn zero(domain: Arc<Domain>) -> Result<Self, DomainError> {
        let num_dofs = domain.num_dofs()?;
        Self::new(domain, vec![0.0; num_dofs])
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Values of the global DoFs
    pub fn coefficients(&self) -> &[f64] {
        &self.dofs
    }

    pub fn into_coefficients(self) -> Vec<f64> {
        self.dofs
    }

    /// Legendre expansion coefficients of the solution restricted to an active Elem
    pub fn elem_coefficients(&self, elem_id: usize) -> Result<&[f64], DomainError> {
        let range = self.domain.elem_expansion(elem_id)?;
        Ok(&self.expansion[range])
    }

    /// Value and gradient of the solution at a point, using the expansion on a specific active Elem
    pub fn eval_in_elem(&self, elem_id: usize, point: &Point) -> Result<(f64, [f64; 2]), DomainError> {
        let coefficients = self.elem_coefficients(elem_id)?;
        let elem = self.domain.mesh.elem(elem_id)?;
        Ok(expand_at(&elem.poly_orders, &elem.rect(), coefficients, point))
    }
}

/// Points outside the Domain evaluate to zero
impl ScalarField for Solution {
    fn value(&self, point: &Point) -> f64 {
        self.value_and_gradient(point).0
    }

    fn gradient(&self, point: &Point) -> [f64; 2] {
        self.value_and_gradient(point).1
    }

    fn value_and_gradient(&self, point: &Point) -> (f64, [f64; 2]) {
        self.domain
            .mesh
            .locate_shell_elem(point)
            .and_then(|elem_id| self.eval_in_elem(elem_id, point).ok())
            .unwrap_or((0.0, [0.0; 2]))
    }
}
