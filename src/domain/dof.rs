/// Continuity constraints across Elem boundaries: edge ownership, hanging vertices and boundary lifts
mod conformity;

use super::mesh::{space::Point, Mesh};
use super::DomainError;
use crate::basis::lobatto_to_legendre;

use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Prescribed values on the outer boundary of a Mesh
pub type BoundaryFn = Arc<dyn Fn(&Point) -> f64 + Send + Sync>;

/// Boundary condition applied over the whole outer boundary of a Domain
#[derive(Clone, Default)]
pub enum Boundary {
    /// No constraint. Fluxes are left to the weak form (zero flux unless it says otherwise).
    #[default]
    Natural,
    /// The solution is fixed to a given function on the boundary
    Essential(BoundaryFn),
}

impl Boundary {
    /// Fix the solution to `g` on the boundary
    pub fn essential<G>(g: G) -> Self
    where
        G: Fn(&Point) -> f64 + Send + Sync + 'static,
    {
        Self::Essential(Arc::new(g))
    }

    /// Fix the solution to zero on the boundary
    pub fn homogeneous() -> Self {
        Self::essential(|_| 0.0)
    }

    pub fn is_essential(&self) -> bool {
        matches!(self, Self::Essential(_))
    }

    /// The prescribed value at a boundary point (if any)
    pub fn value(&self, point: &Point) -> Option<f64> {
        match self {
            Self::Natural => None,
            Self::Essential(g) => Some(g(point)),
        }
    }
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Natural => write!(f, "Natural"),
            Self::Essential(_) => write!(f, "Essential"),
        }
    }
}

/// The coefficient of one Elem-local basis function written in terms of the global DoFs
///
/// `y = lift + Σ c * x[g]` over the `(g, c)` pairs in `terms`. Free functions have a single unit term. Constrained
/// functions (on hanging edges and vertices) combine several. Functions fixed by the boundary condition only carry a lift.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalDof {
    pub terms: SmallVec<[(usize, f64); 4]>,
    pub lift: f64,
}

impl LocalDof {
    pub(crate) fn free(index: usize) -> Self {
        Self {
            terms: smallvec![(index, 1.0)],
            lift: 0.0,
        }
    }

    pub(crate) fn fixed(lift: f64) -> Self {
        Self {
            terms: SmallVec::new(),
            lift,
        }
    }

    /// `self += a * other`
    pub(crate) fn add_scaled(&mut self, a: f64, other: &Self) {
        if a == 0.0 {
            return;
        }
        self.lift += a * other.lift;
        for (index, c) in other.terms.iter() {
            match self.terms.iter_mut().find(|(existing, _)| existing == index) {
                Some((_, existing_c)) => *existing_c += a * c,
                None => self.terms.push((*index, a * c)),
            }
        }
    }

    /// Value of the local coefficient for a vector of global DoFs
    #[inline]
    pub fn eval(&self, dofs: &[f64]) -> f64 {
        self.terms
            .iter()
            .fold(self.lift, |acc, (index, c)| acc + c * dofs[*index])
    }

    /// The global index of an unconstrained function
    pub fn free_index(&self) -> Option<usize> {
        match self.terms.as_slice() {
            [(index, c)] if *c == 1.0 && self.lift == 0.0 => Some(*index),
            _ => None,
        }
    }
}

/// Assignment of Degrees of Freedom over the active Elems of a [Mesh]
///
/// The space is continuous (H1 conforming). Every active Elem carries a tensor-product Lobatto basis with
/// `(ni + 1) * (nj + 1)` functions; the local index of the function with orders `[i, j]` is `i * (nj + 1) + j`.
/// Vertex and edge functions are shared with the neighboring Elems. Functions on hanging edges and vertices are
/// constrained by the larger neighbor, and functions on the boundary are fixed under an essential [Boundary].
///
/// Each local function is described by a [LocalDof]. Local blocks are laid out in order of Elem ID.
#[derive(Debug, Clone)]
pub struct DofMap {
    elem_ranges: Vec<Option<(usize, usize)>>,
    local: Vec<LocalDof>,
    num_dofs: usize,
    num_hanging: usize,
    revision: usize,
}

impl DofMap {
    /// Assign DoFs over the current state of the Mesh
    ///
    /// Returns an `Err` if the base Elements don't form a conforming grid
    pub fn assign(mesh: &Mesh, boundary: &Boundary) -> Result<Self, DomainError> {
        let space = conformity::ConformingSpace::build(mesh, boundary)?;

        Ok(Self {
            elem_ranges: space.elem_ranges,
            local: space.local,
            num_dofs: space.num_dofs,
            num_hanging: space.num_hanging,
            revision: mesh.revision(),
        })
    }

    /// Number of global (free) DoFs
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    /// Number of constrained vertices in the interior of a larger neighbor's edge
    pub fn num_hanging(&self) -> usize {
        self.num_hanging
    }

    /// The Mesh revision these DoFs were assigned against
    pub fn revision(&self) -> usize {
        self.revision
    }

    /// Total size of the Elem-local blocks
    pub fn expansion_len(&self) -> usize {
        self.local.len()
    }

    /// Position of an Elem's local block. Returns `None` for inactive or unknown Elems.
    pub fn elem_range(&self, elem_id: usize) -> Option<Range<usize>> {
        self.elem_ranges
            .get(elem_id)
            .copied()
            .flatten()
            .map(|(start, end)| start..end)
    }

    /// The local basis functions of an Elem in terms of the global DoFs
    pub fn local_dofs(&self, elem_id: usize) -> Option<&[LocalDof]> {
        self.elem_range(elem_id).map(|range| &self.local[range])
    }

    /// Is this assignment up to date with the Mesh
    pub fn in_sync_with(&self, mesh: &Mesh) -> bool {
        self.revision == mesh.revision()
    }

    /// Evaluate the Elem-local Legendre expansions described by a vector of global DoFs
    pub fn expand(&self, mesh: &Mesh, dofs: &[f64]) -> Vec<f64> {
        let mut expansion = vec![0.0; self.local.len()];

        for elem in mesh.shell_elems() {
            if let Some(range) = self.elem_range(elem.id) {
                let lobatto: Vec<f64> = self.local[range.clone()]
                    .iter()
                    .map(|local| local.eval(dofs))
                    .collect();
                expansion[range].copy_from_slice(&lobatto_to_legendre(&elem.poly_orders, &lobatto));
            }
        }

        expansion
    }
}

impl fmt::Display for DofMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} DoFs, {} hanging vertices (rev {})",
            self.num_dofs, self.num_hanging, self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::mesh::{h_refinement::HRef, space::Rect, Mesh};
    use super::*;
    use crate::basis::basis_index;
    use crate::domain::mesh::p_refinement::PolyOrders;

    #[test]
    fn shared_vertices_and_edges() {
        let mut mesh = Mesh::unit();
        mesh.set_global_expansion_orders([2, 3]).unwrap();
        mesh.h_refine_elems(vec![0], HRef::U).unwrap();
        mesh.set_expansion_on_elems(vec![2], [1, 1]).unwrap();

        let dofs = DofMap::assign(&mesh, &Boundary::Natural).unwrap();
        // 6 vertices, 4 bubbles on the left Elem's edges (the shared edge is reduced to order 1), 2 interior bubbles
        assert_eq!(dofs.num_dofs(), 6 + 4 + 2);
        assert_eq!(dofs.num_hanging(), 0);
        assert_eq!(dofs.elem_range(0), None);
        assert_eq!(dofs.elem_range(1), Some(0..12));
        assert_eq!(dofs.elem_range(2), Some(12..16));
        assert!(dofs.in_sync_with(&mesh));

        // the right-hand vertices of the left Elem are the left-hand vertices of the right Elem
        let left = dofs.local_dofs(1).unwrap();
        let right = dofs.local_dofs(2).unwrap();
        let orders = PolyOrders::from(2, 3);
        assert_eq!(left[basis_index(&orders, [1, 0])], right[0]);
        assert_eq!(left[basis_index(&orders, [1, 1])], right[1]);

        // the shared edge only carries the lowest order
        assert_eq!(left[basis_index(&orders, [1, 2])], LocalDof::default());

        mesh.h_refine_elems(vec![1], HRef::V).unwrap();
        assert!(!dofs.in_sync_with(&mesh));
    }

    #[test]
    fn hanging_vertex_is_constrained() {
        let mut mesh = Mesh::rectangular(Rect::new(Point::new(0.0, 0.0), Point::new(2.0, 1.0)), [2, 1]);
        mesh.set_global_expansion_orders([2, 2]).unwrap();
        mesh.h_refine_elems(vec![1], HRef::V).unwrap();

        let dofs = DofMap::assign(&mesh, &Boundary::Natural).unwrap();
        assert_eq!(dofs.num_hanging(), 1);

        // lower-left vertex function of the upper-right Elem sits at the middle of the left Elem's right edge
        let hanging = &dofs.local_dofs(3).unwrap()[basis_index(&PolyOrders::uniform(2), [0, 0])];
        assert!(hanging.free_index().is_none());
        assert_eq!(hanging.terms.len(), 3);

        let left = dofs.local_dofs(0).unwrap();
        let corner_weight = |local: usize| {
            let index = left[local].free_index().unwrap();
            hanging.terms.iter().find(|(g, _)| *g == index).map(|(_, c)| *c).unwrap()
        };
        assert!((corner_weight(basis_index(&PolyOrders::uniform(2), [1, 0])) - 0.5).abs() < 1e-14);
        assert!((corner_weight(basis_index(&PolyOrders::uniform(2), [1, 1])) - 0.5).abs() < 1e-14);
    }

    #[test]
    fn essential_boundary_lifts() {
        let mut mesh = Mesh::rectangular(Rect::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0)), [2, 2]);
        mesh.set_global_expansion_orders([2, 2]).unwrap();

        let natural = DofMap::assign(&mesh, &Boundary::Natural).unwrap();
        assert_eq!(natural.num_dofs(), 9 + 12 + 4);

        let dofs = DofMap::assign(&mesh, &Boundary::essential(|p| p.x + 2.0 * p.y)).unwrap();
        assert_eq!(dofs.num_dofs(), 1 + 4 + 4);

        // the lower-left corner of the first Elem sits at the origin, its upper-left corner at (0, 0.5)
        let first = dofs.local_dofs(0).unwrap();
        assert_eq!(first[0], LocalDof::fixed(0.0));
        assert!((first[basis_index(&PolyOrders::uniform(2), [0, 1])].lift - 1.0).abs() < 1e-12);

        // linear boundary data needs no edge bubbles
        assert!(first[basis_index(&PolyOrders::uniform(2), [2, 0])].lift.abs() < 1e-12);
    }

    #[test]
    fn detached_elements_are_rejected() {
        let mesh = Mesh::from_json_str(
            r#"{ "Elements": [ { "min": [0.0, 0.0], "max": [1.0, 1.0] }, { "min": [1.0, 1.0], "max": [2.0, 2.0] } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            DofMap::assign(&mesh, &Boundary::Natural),
            Err(DomainError::NonConformingMesh(_))
        ));
    }
}
