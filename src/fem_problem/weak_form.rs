use crate::basis::{ElemBasis, ShapeFn};
use crate::domain::mesh::space::Point;
use crate::integration::QuadPoint;

use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::sync::Arc;

/// A scalar nonlinearity `g(u)` (or its derivative)
pub type Nonlinearity = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// A source term `f(x, t)`
pub type SourceFn = Arc<dyn Fn(&Point, f64) -> f64 + Send + Sync>;

/// The different contributions a [WeakForm] can be built from
///
/// Every contribution adds to the residual `R(u)_i` tested against basis function `v_i`:
/// * `Mass`: `∫ c u v_i`
/// * `Diffusion`: `∫ λ(u) ∇u · ∇v_i`
/// * `Reaction`: `∫ g(u) v_i`
/// * `Source`: `-∫ f(x, t) v_i`
#[derive(Clone)]
pub enum FormKind {
    Mass { coeff: f64 },
    Diffusion { lambda: Nonlinearity, dlambda: Nonlinearity },
    Reaction { g: Nonlinearity, dg: Nonlinearity },
    Source { f: SourceFn },
}

/// One tagged contribution to a [WeakForm]
#[derive(Clone)]
pub struct FormTerm {
    pub tag: String,
    pub kind: FormKind,
}

impl FormTerm {
    pub fn mass(coeff: f64) -> Self {
        Self {
            tag: String::from("mass"),
            kind: FormKind::Mass { coeff },
        }
    }

    /// Diffusion with a constant coefficient
    pub fn diffusion(coeff: f64) -> Self {
        Self::nonlinear_diffusion(move |_| coeff, |_| 0.0)
    }

    /// Diffusion with a solution dependent coefficient `λ(u)` (and its derivative `λ'(u)`)
    pub fn nonlinear_diffusion<L, DL>(lambda: L, dlambda: DL) -> Self
    where
        L: Fn(f64) -> f64 + Send + Sync + 'static,
        DL: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            tag: String::from("diffusion"),
            kind: FormKind::Diffusion {
                lambda: Arc::new(lambda),
                dlambda: Arc::new(dlambda),
            },
        }
    }

    /// A pointwise reaction term `g(u)` (and its derivative `g'(u)`)
    pub fn reaction<G, DG>(g: G, dg: DG) -> Self
    where
        G: Fn(f64) -> f64 + Send + Sync + 'static,
        DG: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            tag: String::from("reaction"),
            kind: FormKind::Reaction {
                g: Arc::new(g),
                dg: Arc::new(dg),
            },
        }
    }

    /// A source term `f(x, t)` on the right hand side
    pub fn source<F>(f: F) -> Self
    where
        F: Fn(&Point, f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            tag: String::from("source"),
            kind: FormKind::Source { f: Arc::new(f) },
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

impl fmt::Debug for FormTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match &self.kind {
            FormKind::Mass { coeff } => format!("Mass({})", coeff),
            FormKind::Diffusion { .. } => String::from("Diffusion"),
            FormKind::Reaction { .. } => String::from("Reaction"),
            FormKind::Source { .. } => String::from("Source"),
        };
        write!(f, "FormTerm[{}: {}]", self.tag, kind)
    }
}

/// A weak formulation: an explicit list of contributions to the residual
#[derive(Clone, Debug, Default)]
pub struct WeakForm {
    pub terms: Vec<FormTerm>,
}

/// The previous time level of a transient problem, sampled at the quadrature points of one Elem
pub(crate) struct TimeHistory<'a> {
    pub inv_time_step: f64,
    pub values: &'a [f64],
}

impl WeakForm {
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn with(mut self, term: FormTerm) -> Self {
        self.terms.push(term);
        self
    }

    pub fn push(&mut self, term: FormTerm) {
        self.terms.push(term);
    }

    /// Find a term by its tag
    pub fn term(&self, tag: &str) -> Option<&FormTerm> {
        self.terms.iter().find(|term| term.tag == tag)
    }

    /// Residual vector and Jacobian matrix of this form on one Elem, evaluated at `coefficients`
    pub(crate) fn assemble_elem<SF: ShapeFn>(
        &self,
        basis: &ElemBasis<SF>,
        points: &[QuadPoint],
        coefficients: &[f64],
        time: f64,
        history: Option<&TimeHistory>,
    ) -> (DVector<f64>, DMatrix<f64>) {
        let nf = basis.num_functions();
        let mut residual = DVector::zeros(nf);
        let mut jacobian = DMatrix::zeros(nf, nf);

        let mut phi = vec![0.0; nf];
        let mut dphi = vec![[0.0; 2]; nf];

        for (q, qp) in points.iter().enumerate() {
            for k in 0..nf {
                phi[k] = basis.value(k, qp.index);
                dphi[k] = basis.gradient(k, qp.index);
            }
            let (u, grad_u) = basis.expand(coefficients, qp.index);
            let w = qp.weight;

            // coefficient of (φ_j φ_i) and the reaction-like residual contribution
            let mut mass_coeff = 0.0;
            let mut mass_residual = 0.0;

            for term in self.terms.iter() {
                match &term.kind {
                    FormKind::Mass { coeff } => {
                        mass_coeff += coeff;
                        mass_residual += coeff * u;
                    }
                    FormKind::Reaction { g, dg } => {
                        mass_coeff += dg(u);
                        mass_residual += g(u);
                    }
                    FormKind::Source { f } => {
                        mass_residual -= f(&qp.location, time);
                    }
                    FormKind::Diffusion { lambda, dlambda } => {
                        let l = lambda(u);
                        let dl = dlambda(u);
                        for i in 0..nf {
                            let grad_u_dot_dphi_i = dot(&grad_u, &dphi[i]);
                            residual[i] += w * l * grad_u_dot_dphi_i;
                            for j in 0..nf {
                                jacobian[(i, j)] += w
                                    * (l * dot(&dphi[j], &dphi[i]) + dl * phi[j] * grad_u_dot_dphi_i);
                            }
                        }
                    }
                }
            }

            if let Some(hist) = history {
                mass_coeff += hist.inv_time_step;
                mass_residual += hist.inv_time_step * (u - hist.values[q]);
            }

            for i in 0..nf {
                residual[i] += w * mass_residual * phi[i];
                if mass_coeff != 0.0 {
                    for j in 0..nf {
                        jacobian[(i, j)] += w * mass_coeff * phi[j] * phi[i];
                    }
                }
            }
        }

        (residual, jacobian)
    }
}

#[inline]
fn dot(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}
