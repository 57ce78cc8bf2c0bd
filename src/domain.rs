/// Degrees of Freedom
pub mod dof;
/// Structures used to evaluate solution fields over a Domain
pub mod fields;
/// The internal geometric structure of a Domain
pub mod mesh;

use crate::adapt::candidates::Candidate;
use dof::{Boundary, DofMap, LocalDof};
use mesh::{
    h_refinement::{HRef, HRefError},
    p_refinement::{PRefError, PolyOrders},
    Mesh, MeshAccessError,
};

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// How a reference Domain is derived from a working Domain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceRefinement {
    /// Split every active Elem isotropically (where the minimum Elem size allows it)
    pub h_refine: bool,
    /// Raise the expansion orders of every active Elem by this amount (in both directions)
    pub order_increase: u8,
}

impl Default for ReferenceRefinement {
    fn default() -> Self {
        Self {
            h_refine: true,
            order_increase: 1,
        }
    }
}

/// High Level Description of an FEM Domain: a [Mesh], its [Boundary] condition and the continuous Degrees of
/// Freedom assigned over it
///
/// The DoF assignment is not updated automatically when the Mesh changes. After any refinement or derefinement
/// [Domain::assign_dofs] must be called again; until then, any operation that depends on the DoFs returns
/// [DomainError::DofDesync].
#[derive(Debug, Clone)]
pub struct Domain {
    pub mesh: Mesh,
    boundary: Boundary,
    dofs: DofMap,
    derived_from: Option<usize>,
}

impl Domain {
    /// Construct a Domain with a natural boundary over a Mesh, assigning DoFs to its current state
    pub fn from_mesh(mesh: Mesh) -> Result<Self, DomainError> {
        Self::with_boundary(mesh, Boundary::Natural)
    }

    /// Construct a Domain over a Mesh with the given boundary condition
    ///
    /// Returns an `Err` if the base Elements of the Mesh don't tile a rectangular grid
    pub fn with_boundary(mesh: Mesh, boundary: Boundary) -> Result<Self, DomainError> {
        let dofs = DofMap::assign(&mesh, &boundary)?;
        Ok(Self {
            mesh,
            boundary,
            dofs,
            derived_from: None,
        })
    }

    /// (Re)assign Degrees of Freedom according to the current state of the Mesh
    pub fn assign_dofs(&mut self) -> Result<(), DomainError> {
        self.dofs = DofMap::assign(&self.mesh, &self.boundary)?;
        debug!("assigned {} over {} active elems", self.dofs, self.mesh.shell_elems().count());
        Ok(())
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// The current DoF assignment (which may be out of date)
    pub fn dof_map(&self) -> &DofMap {
        &self.dofs
    }

    /// Return an `Err` if the DoFs are out of date with the Mesh
    pub fn check_sync(&self) -> Result<(), DomainError> {
        if self.dofs.in_sync_with(&self.mesh) {
            Ok(())
        } else {
            Err(DomainError::DofDesync {
                mesh_revision: self.mesh.revision(),
                dof_revision: self.dofs.revision(),
            })
        }
    }

    /// Total number of (free) Degrees of Freedom
    pub fn num_dofs(&self) -> Result<usize, DomainError> {
        self.check_sync()?;
        Ok(self.dofs.num_dofs())
    }

    /// Position of an active Elem's block of local expansion coefficients
    pub fn elem_expansion(&self, elem_id: usize) -> Result<Range<usize>, DomainError> {
        self.check_sync()?;
        self.mesh.elem(elem_id)?;
        self.dofs
            .elem_range(elem_id)
            .ok_or(DomainError::InactiveElem(elem_id))
    }

    /// The local basis functions of an active Elem written in terms of the global DoFs
    pub fn local_dofs(&self, elem_id: usize) -> Result<&[LocalDof], DomainError> {
        self.check_sync()?;
        self.mesh.elem(elem_id)?;
        self.dofs
            .local_dofs(elem_id)
            .ok_or(DomainError::InactiveElem(elem_id))
    }

    /// Construct a reference Domain: a strict refinement of this one
    ///
    /// Elem IDs of this Domain remain valid in the reference Domain; new Elems are appended.
    pub fn reference(&self, refinement: ReferenceRefinement) -> Result<Domain, DomainError> {
        self.check_sync()?;

        let mut ref_mesh = self.mesh.clone();
        if refinement.h_refine {
            ref_mesh.global_h_refinement(HRef::T)?;
        }
        if refinement.order_increase > 0 {
            ref_mesh.adjust_shell_orders(refinement.order_increase as i8, PolyOrders::from(1, 1));
        }

        let mut reference = Domain::with_boundary(ref_mesh, self.boundary.clone())?;
        reference.derived_from = Some(self.mesh.revision());
        Ok(reference)
    }

    /// Mesh revision of the working Domain this Domain was derived from (if it is a reference Domain)
    pub fn derived_from(&self) -> Option<usize> {
        self.derived_from
    }

    /// Return an `Err` unless `reference` was derived from the current state of this Domain
    pub fn check_reference(&self, reference: &Domain) -> Result<(), DomainError> {
        self.check_sync()?;
        reference.check_sync()?;
        if reference.derived_from == Some(self.mesh.revision()) {
            Ok(())
        } else {
            Err(DomainError::IncompatibleReference {
                working_revision: self.mesh.revision(),
                derived_from: reference.derived_from,
            })
        }
    }

    /// Apply a refinement to an active Elem: optionally split it, and give it (or its new children) the orders
    pub fn apply_refinement(
        &mut self,
        elem_id: usize,
        split: Option<HRef>,
        orders: PolyOrders,
    ) -> Result<(), DomainError> {
        if orders.max() > mesh::MAX_POLYNOMIAL_ORDER {
            return Err(PRefError::ExceededMaxExpansion.into());
        }
        if orders.ni < 1 || orders.nj < 1 {
            return Err(PRefError::NegExpansion.into());
        }
        self.mesh.refine_elem(elem_id, split, orders)?;
        Ok(())
    }

    /// Apply a selected refinement [Candidate] to an active Elem
    pub fn apply_candidate(&mut self, elem_id: usize, candidate: &Candidate) -> Result<(), DomainError> {
        self.apply_refinement(elem_id, candidate.split, candidate.orders)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    DofDesync {
        mesh_revision: usize,
        dof_revision: usize,
    },
    ElemDoesNotExist(usize),
    InactiveElem(usize),
    IncompatibleReference {
        working_revision: usize,
        derived_from: Option<usize>,
    },
    CoefficientLength {
        expected: usize,
        found: usize,
    },
    SingularProjection(usize),
    ProjectionNotConverged {
        iterations: usize,
    },
    NonConformingMesh(String),
    CircularConstraint(usize),
    HRef(HRefError),
    PRef(PRefError),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DofDesync {
                mesh_revision,
                dof_revision,
            } => write!(
                f,
                "DoFs were assigned at Mesh revision {} but the Mesh is at revision {}; Cannot use stale DoFs!",
                dof_revision, mesh_revision
            ),
            Self::ElemDoesNotExist(elem_id) => {
                write!(f, "Elem {} does not exist; Cannot access its DoFs!", elem_id)
            }
            Self::InactiveElem(elem_id) => write!(
                f,
                "Elem {} has children and no DoFs of its own; Cannot access its DoFs!",
                elem_id
            ),
            Self::IncompatibleReference {
                working_revision,
                derived_from,
            } => match derived_from {
                Some(rev) => write!(
                    f,
                    "Reference Domain was derived from Mesh revision {}, not {}; Cannot compare solutions!",
                    rev, working_revision
                ),
                None => write!(
                    f,
                    "Domain is not a reference Domain; Cannot compare solutions!"
                ),
            },
            Self::CoefficientLength { expected, found } => write!(
                f,
                "Expected {} coefficients, found {}; Cannot construct Solution!",
                expected, found
            ),
            Self::SingularProjection(elem_id) => write!(
                f,
                "Projection system on Elem {} is singular; Cannot project field!",
                elem_id
            ),
            Self::ProjectionNotConverged { iterations } => write!(
                f,
                "Projection system did not converge in {} iterations; Cannot project field!",
                iterations
            ),
            Self::NonConformingMesh(reason) => {
                write!(f, "{}; Cannot assign continuous DoFs!", reason)
            }
            Self::CircularConstraint(elem_id) => write!(
                f,
                "Hanging vertex constraints around Elem {} refer back to themselves; Cannot assign DoFs!",
                elem_id
            ),
            Self::HRef(err) => write!(f, "{}", err),
            Self::PRef(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DomainError {}

impl From<HRefError> for DomainError {
    fn from(err: HRefError) -> Self {
        Self::HRef(err)
    }
}

impl From<PRefError> for DomainError {
    fn from(err: PRefError) -> Self {
        Self::PRef(err)
    }
}

impl From<MeshAccessError> for DomainError {
    fn from(err: MeshAccessError) -> Self {
        match err {
            MeshAccessError::ElemDoesntExist(elem_id) => Self::ElemDoesNotExist(elem_id),
        }
    }
}
