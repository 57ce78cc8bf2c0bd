/// Tensor-product Legendre and Lobatto basis functions
pub mod basis;
/// Structures to define the geometric characteristics and refinement state of a Domain
pub mod domain;
/// Gauss-Legendre quadrature over rectangular regions
pub mod integration;
/// Weak forms and the solvers which produce reference solutions
pub mod fem_problem;
/// Sparse linear systems and their iterative solution
pub mod linalg;
/// Orthogonal projection of solutions between Domains
pub mod projection;
/// hp-adaptivity: error estimation, refinement selection and the adaptive solution loop
pub mod adapt;

/// Commonly used structures and traits
pub mod prelude {
    pub use crate::adapt::{
        AdaptError, Adaptivity, AdaptivityConfig, CandList, ConfigError, ConvergenceHistory, DerefinementPolicy,
        ErrorMeasure, Termination, TimeStepper, TimeSteppingConfig,
    };
    pub use crate::domain::{
        dof::Boundary,
        fields::{AnalyticField, ScalarField, Solution},
        mesh::{
            h_refinement::HRef,
            p_refinement::PolyOrders,
            space::{Point, Rect},
            Mesh,
        },
        Domain, DomainError, ReferenceRefinement,
    };
    pub use crate::fem_problem::{
        implicit_euler::ImplicitEuler,
        newton::{NewtonConfig, NewtonSolver},
        weak_form::{FormTerm, WeakForm},
        SolveError, SolveOutcome, SolveProvider, SolveStatus, TransientSolveProvider,
    };
    pub use crate::linalg::bicgstab::BiCGStab;
    pub use crate::projection::{project_field, Norm};
}
