/// A Finite Element in Parametric Space
pub mod elem;
/// A Finite Element in Real Space
pub mod element;
/// Structures and Functions to facilitate anisotropic h-refinement
pub mod h_refinement;
/// Structures and Functions to facilitate anisotropic p-refinement
pub mod p_refinement;
/// Structures to describe the 2D real and parametric spaces defining a Mesh
pub mod space;

use elem::Elem;
use element::Element;
use h_refinement::{HRef, HRefError};
use p_refinement::{PRefError, PolyOrders};
use space::{Point, Rect};

use json::{object, JsonValue};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::fs::{read_to_string, File};
use std::io::BufWriter;
use std::sync::Arc;

/// Minimum Elem size in parametric space. h-Refinements will fail after Elems are narrower than this value.
pub const MIN_EDGE_LENGTH: f64 = 3.0518e-5; // 15ish refinement layers

/// The expected "h-Refinement" depth. This determines the stack allocation size of some `SmallVec`s related to h-Refinement
pub const EXPECTED_NUM_H_REFINEMENTS: usize = 8;

/// Maximum Polynomial expansion. p-Refinements will fail when Elem's expansion orders exceed this value.
pub const MAX_POLYNOMIAL_ORDER: u8 = 20;

/// Information used to Define the geometric structure and refinement state of a Domain.
///
/// Every mutation of the refinement state bumps the Mesh's revision number. A [DofMap](super::dof::DofMap)
/// remembers the revision it was assigned against, which is how stale degree-of-freedom assignments are detected.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elements: Vec<Arc<Element>>,
    elems: Vec<Elem>,
    revision: usize,
}

impl Mesh {
    /// Construct a Mesh by dividing `bounds` into an `nx` by `ny` grid of equally sized Elements
    ///
    /// All Elems start with expansion orders of `(1, 1)`
    ///
    /// ```
    /// use hp_adapt::domain::mesh::{Mesh, space::{Point, Rect}};
    ///
    /// let mesh = Mesh::rectangular(Rect::new(Point::new(-1.0, -1.0), Point::new(1.0, 1.0)), [2, 3]);
    /// assert_eq!(mesh.elems().len(), 6);
    /// assert_eq!(mesh.shell_elems().count(), 6);
    /// ```
    pub fn rectangular(bounds: Rect, [nx, ny]: [usize; 2]) -> Self {
        assert!(
            nx > 0 && ny > 0,
            "Mesh must have at least one Element in each direction; Cannot construct rectangular Mesh!"
        );

        let dx = bounds.width() / nx as f64;
        let dy = bounds.height() / ny as f64;

        let elements: Vec<Arc<Element>> = (0..ny)
            .flat_map(|j| (0..nx).map(move |i| (i, j)))
            .enumerate()
            .map(|(element_id, (i, j))| {
                let min = Point::new(bounds.min.x + dx * i as f64, bounds.min.y + dy * j as f64);
                let max = Point::new(min.x + dx, min.y + dy);
                Arc::new(Element::new(element_id, Rect::new(min, max)))
            })
            .collect();

        Self::from_elements(elements)
    }

    /// Construct a Mesh with a single Element spanning `[0, 1] x [0, 1]`
    pub fn unit() -> Self {
        Self::rectangular(Rect::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0)), [1, 1])
    }

    fn from_elements(elements: Vec<Arc<Element>>) -> Self {
        let elems = elements
            .iter()
            .map(|element| Elem::new(element.id, element.clone(), PolyOrders::default()))
            .collect();

        Self {
            elements,
            elems,
            revision: 0,
        }
    }

    /// Construct a Mesh from a JSON file with the following format
    ///
    /// Each Element is an axis-aligned rectangle described by its lower-left and upper-right corners:
    ///
    /// ```JSON
    /// {
    ///     "Elements": [
    ///         { "min": [0.0, 0.0], "max": [1.0, 0.5] },
    ///         { "min": [1.0, 0.0], "max": [2.0, 0.5] }
    ///     ]
    /// }
    /// ```
    pub fn from_file(path: impl AsRef<str>) -> std::io::Result<Self> {
        let mesh_file_contents = read_to_string(path.as_ref())?;
        Self::from_json_str(&mesh_file_contents)
    }

    /// Construct a Mesh from a string with the format described in [Mesh::from_file]
    pub fn from_json_str(contents: &str) -> std::io::Result<Self> {
        let mesh_json = json::parse(contents).map_err(|err| invalid_mesh_data(err.to_string()))?;

        if !mesh_json["Elements"].is_array() {
            return Err(invalid_mesh_data("Elements must be an Array"));
        }

        let mut elements = Vec::new();
        for (element_id, json_element) in mesh_json["Elements"].members().enumerate() {
            let min = parse_point(&json_element["min"])?;
            let max = parse_point(&json_element["max"])?;

            if !(max.x > min.x && max.y > min.y) {
                return Err(invalid_mesh_data(format!(
                    "Element {} has unordered corners",
                    element_id
                )));
            }

            elements.push(Arc::new(Element::new(element_id, Rect::new(min, max))));
        }

        if elements.is_empty() {
            return Err(invalid_mesh_data("Mesh must have at least one Element"));
        }

        Ok(Self::from_elements(elements))
    }

    /// Print the mesh to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let mesh_object = object! {
            "revision": self.revision,
            "Elements": JsonValue::from(self.elements.iter().map(|element| element.to_json()).collect::<Vec<_>>()),
            "Elems": JsonValue::from(self.elems.iter().map(|elem| elem.to_json()).collect::<Vec<_>>()),
        };

        mesh_object.write_pretty(&mut w, 4)?;

        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    /// Revision number of the Mesh's refinement state
    pub fn revision(&self) -> usize {
        self.revision
    }

    /// All [Elem]s in the Mesh (active or not). An Elem's ID is its index in this slice.
    pub fn elems(&self) -> &[Elem] {
        &self.elems
    }

    pub fn elem(&self, elem_id: usize) -> Result<&Elem, MeshAccessError> {
        self.elems
            .get(elem_id)
            .ok_or(MeshAccessError::ElemDoesntExist(elem_id))
    }

    /// Iterate over the active [Elem]s (those without children) in order of ID
    pub fn shell_elems(&self) -> impl Iterator<Item = &Elem> + '_ {
        self.elems.iter().filter(|elem| !elem.has_children())
    }

    /// Get a list of an [`Elem`]s descendant's IDs
    pub fn descendant_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, MeshAccessError> {
        self.elem(elem_id)?;
        let mut descendants = Vec::new();
        self.rec_descendant_elems(elem_id, include_starting_elem, &mut descendants);
        Ok(descendants)
    }

    fn rec_descendant_elems(&self, elem_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(elem_id);
        }
        if let Some(child_elem_ids) = self.elems[elem_id].child_ids() {
            for cei in child_elem_ids {
                self.rec_descendant_elems(cei, true, desc);
            }
        }
    }

    /// Get the IDs of the active Elems that descend from an [`Elem`] (or the Elem itself if it is active)
    pub fn shell_descendants(&self, elem_id: usize) -> Result<Vec<usize>, MeshAccessError> {
        Ok(self
            .descendant_elems(elem_id, true)?
            .into_iter()
            .filter(|desc_id| !self.elems[*desc_id].has_children())
            .collect())
    }

    /// Get a list of an [`Elem`]s ancestors's IDs
    pub fn ancestor_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, MeshAccessError> {
        let elem = self.elem(elem_id)?;
        let mut ancestors = Vec::with_capacity(elem.depth() + 1);
        if include_starting_elem {
            ancestors.push(elem_id);
        }
        ancestors.extend(elem.loc_stack().iter().rev().map(|(id, _)| *id));
        Ok(ancestors)
    }

    /// Find the active [Elem] containing a point in real space
    ///
    /// Points on shared boundaries resolve to the first matching Elem. Returns `None` if the point is outside the Mesh.
    pub fn locate_shell_elem(&self, point: &Point) -> Option<usize> {
        let base_elem_id = self
            .elems
            .iter()
            .filter(|elem| elem.parent_id().is_none())
            .find(|elem| elem.element.contains(point))?
            .id;

        let mut current = base_elem_id;
        while let Some(child_ids) = self.elems[current].child_ids() {
            current = child_ids
                .iter()
                .copied()
                .find(|child_id| self.elems[*child_id].rect().contains(point))?;
        }

        Some(current)
    }

    /// Find the active [Elem]s that overlap `region` (with non-zero area) along with the overlapping sub-rects
    pub fn shell_elems_overlapping(&self, region: &Rect) -> Vec<(usize, Rect)> {
        let mut overlaps = Vec::new();
        let mut stack: Vec<usize> = self
            .elems
            .iter()
            .filter(|elem| elem.parent_id().is_none())
            .map(|elem| elem.id)
            .collect();
        stack.reverse();

        while let Some(elem_id) = stack.pop() {
            let elem = &self.elems[elem_id];
            let overlap = match elem.rect().intersection(region) {
                Some(overlap) => overlap,
                None => continue,
            };

            match elem.child_ids() {
                Some(child_ids) => stack.extend(child_ids.iter().rev().copied()),
                None => overlaps.push((elem_id, overlap)),
            }
        }

        overlaps
    }

    /// Maximum polynomial expansion orders represented among the active `Elem`s in the `Mesh`
    pub fn max_expansion_orders(&self) -> [u8; 2] {
        self.shell_elems()
            .fold([0; 2], |acc, elem| elem.poly_orders.max_with(acc))
    }

    /// Largest number of h-refinements separating an active `Elem` from the base layer
    pub fn max_depth(&self) -> usize {
        self.shell_elems().map(|elem| elem.depth()).max().unwrap_or(0)
    }

    /// Determine if this Elem can be split with the given type of h-Refinement
    ///
    /// Only the directions affected by the refinement are checked against [MIN_EDGE_LENGTH]
    pub fn elem_can_split(&self, elem_id: usize, refinement: HRef) -> Result<bool, HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;

        let [[u_min, u_max], [v_min, v_max]] = elem.parametric_range();
        let (check_u, check_v) = match refinement {
            HRef::T => (true, true),
            HRef::U => (true, false),
            HRef::V => (false, true),
        };

        Ok(!elem.has_children()
            && (!check_u || (u_max - u_min) / 2.0 > MIN_EDGE_LENGTH)
            && (!check_v || (v_max - v_min) / 2.0 > MIN_EDGE_LENGTH))
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Apply an [HRef] to all active [Elem]s in the Mesh that are eligible for h-refinement
    pub fn global_h_refinement(&mut self, refinement: HRef) -> Result<(), HRefError> {
        let mut targets = Vec::new();
        for elem in self.shell_elems() {
            if self.elem_can_split(elem.id, refinement)? {
                targets.push((elem.id, refinement));
            }
        }

        self.execute_h_refinements(targets)
    }

    /// Apply an [HRef] to a list of [Elem]s by their ID
    pub fn h_refine_elems(&mut self, elems: Vec<usize>, refinement: HRef) -> Result<(), HRefError> {
        self.execute_h_refinements(elems.iter().map(|elem_id| (*elem_id, refinement)).collect())
    }

    /// Execute a series of [HRef]s on [Elem]s specified by their id
    ///
    /// All refinements are validated before any of them are applied
    pub fn execute_h_refinements(
        &mut self,
        refinements: Vec<(usize, HRef)>,
    ) -> Result<(), HRefError> {
        let mut refinements_map: BTreeMap<usize, HRef> = BTreeMap::new();
        for (elem_id, h_ref) in refinements {
            if elem_id >= self.elems.len() {
                return Err(HRefError::ElemDoesntExist(elem_id));
            }
            if self.elems[elem_id].has_children() {
                return Err(HRefError::ElemHasChildren(elem_id));
            }
            if !self.elem_can_split(elem_id, h_ref)? {
                return Err(HRefError::MinEdgeLengthExceeded(elem_id));
            }
            if refinements_map.insert(elem_id, h_ref).is_some() {
                return Err(HRefError::DoubleRefinement(elem_id));
            }
        }

        if refinements_map.is_empty() {
            return Ok(());
        }

        let mut elem_id_tracker = self.elems.len();
        for (elem_id, refinement) in refinements_map {
            let new_elems = self.elems[elem_id].h_refine(refinement, &mut elem_id_tracker)?;
            self.elems.extend(new_elems);
        }

        self.revision += 1;
        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // p-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Set the expansion orders on all [Elem]s
    pub fn set_global_expansion_orders(&mut self, orders: [u8; 2]) -> Result<(), PRefError> {
        self.set_expansion_orders(self.elems.iter().map(|elem| (elem.id, orders)).collect())
    }

    /// Set the expansion orders on a list of [Elem]s by their ID
    pub fn set_expansion_on_elems(
        &mut self,
        elems: Vec<usize>,
        orders: [u8; 2],
    ) -> Result<(), PRefError> {
        self.set_expansion_orders(elems.iter().map(|elem_id| (*elem_id, orders)).collect())
    }

    pub fn set_expansion_orders(
        &mut self,
        poly_orders: Vec<(usize, [u8; 2])>,
    ) -> Result<(), PRefError> {
        let mut poly_orders_map: BTreeMap<usize, [u8; 2]> = BTreeMap::new();
        for (elem_id, orders) in poly_orders {
            if elem_id >= self.elems.len() {
                return Err(PRefError::ElemDoesntExist(elem_id));
            }
            if poly_orders_map.insert(elem_id, orders).is_some() {
                return Err(PRefError::DoubleRefinement(elem_id));
            }
        }

        let mut updated = Vec::with_capacity(poly_orders_map.len());
        for (elem_id, orders) in poly_orders_map {
            let mut new_orders = self.elems[elem_id].poly_orders;
            new_orders.set(orders)?;
            updated.push((elem_id, new_orders));
        }

        self.commit_orders(updated);
        Ok(())
    }

    fn commit_orders(&mut self, orders: Vec<(usize, PolyOrders)>) {
        if orders.is_empty() {
            return;
        }
        for (elem_id, new_orders) in orders {
            self.elems[elem_id].poly_orders = new_orders;
        }
        self.revision += 1;
    }

    // ----------------------------------------------------------------------------------------------------
    // derefinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Mark every Elem currently in the Mesh as part of its initial state
    ///
    /// [Mesh::unrefine_all_elems] never removes Elems marked this way
    pub fn mark_as_initial(&mut self) {
        for elem in self.elems.iter_mut() {
            elem.mark_initial();
        }
    }

    /// Undo one layer of h-refinement everywhere it is possible
    ///
    /// An Elem is collapsed when all of its children are active and none of them are initial. The collapsed Elem
    /// takes the maximum expansion orders of its children. Elem IDs are reassigned. Returns the number of Elems
    /// that were collapsed.
    pub fn unrefine_all_elems(&mut self) -> usize {
        let collapsible: Vec<bool> = self
            .elems
            .iter()
            .map(|elem| match elem.child_ids() {
                Some(child_ids) => child_ids.iter().all(|child_id| {
                    let child = &self.elems[*child_id];
                    !child.has_children() && !child.is_initial()
                }),
                None => false,
            })
            .collect();

        let num_collapsed = collapsible.iter().filter(|c| **c).count();
        if num_collapsed == 0 {
            return 0;
        }

        let mut rebuilt: Vec<Elem> = Vec::with_capacity(self.elems.len());
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

        for base_elem in self.elems.iter().filter(|elem| elem.parent_id().is_none()) {
            let mut elem = Elem::new(rebuilt.len(), base_elem.element.clone(), base_elem.poly_orders);
            if base_elem.is_initial() {
                elem.mark_initial();
            }
            queue.push_back((base_elem.id, elem.id));
            rebuilt.push(elem);
        }

        while let Some((old_id, new_id)) = queue.pop_front() {
            let old_elem = &self.elems[old_id];
            let (child_ids, refinement) = match (old_elem.child_ids(), old_elem.refinement()) {
                (Some(child_ids), Some(refinement)) => (child_ids, refinement),
                _ => continue,
            };

            if collapsible[old_id] {
                let orders = child_ids.iter().fold([1, 1], |acc, child_id| {
                    self.elems[*child_id].poly_orders.max_with(acc)
                });
                rebuilt[new_id].poly_orders = PolyOrders::from(orders[0], orders[1]);
                continue;
            }

            let mut id_counter = rebuilt.len();
            let new_children = match rebuilt[new_id].h_refine(refinement, &mut id_counter) {
                Ok(children) => children,
                Err(_) => unreachable!("rebuilt Elem {} already has children", new_id),
            };

            for (old_child_id, mut new_child) in child_ids.iter().zip(new_children) {
                let old_child = &self.elems[*old_child_id];
                new_child.poly_orders = old_child.poly_orders;
                if old_child.is_initial() {
                    new_child.mark_initial();
                }
                queue.push_back((*old_child_id, new_child.id));
                rebuilt.push(new_child);
            }
        }

        self.elems = rebuilt;
        self.revision += 1;
        num_collapsed
    }

    /// Replace the refinement state of this Mesh with that of `base`
    ///
    /// The revision still advances so that previously assigned degrees of freedom are recognized as stale
    pub fn reset_to(&mut self, base: &Mesh) {
        let revision = std::cmp::max(self.revision, base.revision) + 1;
        *self = base.clone();
        self.revision = revision;
    }

    /// Shift the expansion orders of every active Elem by `delta`, never falling below `min`
    pub fn adjust_shell_orders(&mut self, delta: i8, min: PolyOrders) {
        let adjusted: Vec<(usize, PolyOrders)> = self
            .shell_elems()
            .map(|elem| (elem.id, elem.poly_orders.adjusted(delta, min)))
            .collect();

        self.commit_orders(adjusted);
    }

    /// Replace an active Elem's expansion orders and (optionally) split it
    ///
    /// When split, the children receive `orders` and the parent keeps its own
    pub fn refine_elem(
        &mut self,
        elem_id: usize,
        split: Option<HRef>,
        orders: PolyOrders,
    ) -> Result<(), HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;
        if elem.has_children() {
            return Err(HRefError::ElemHasChildren(elem_id));
        }

        match split {
            Some(refinement) => {
                self.execute_h_refinements(vec![(elem_id, refinement)])?;
                let child_ids = self.elems[elem_id].child_ids().unwrap_or_default();
                for child_id in child_ids {
                    self.elems[child_id].poly_orders = orders;
                }
            }
            None => {
                self.elems[elem_id].poly_orders = orders;
                self.revision += 1;
            }
        }

        Ok(())
    }
}

impl fmt::Display for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "Mesh (rev {}): {} Elements, {} Elems ({} active)",
            self.revision,
            self.elements.len(),
            self.elems.len(),
            self.shell_elems().count()
        )?;
        for elem in self.shell_elems() {
            writeln!(f, "\t{}: {} {}", elem.id, elem.rect(), elem.poly_orders)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshAccessError {
    ElemDoesntExist(usize),
}

impl fmt::Display for MeshAccessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ElemDoesntExist(elem_id) => {
                write!(f, "Elem {} doesn't exist; Cannot access Elem!", elem_id)
            }
        }
    }
}

impl std::error::Error for MeshAccessError {}

// ----------------------------------------------------------------------------------------------------
// Mesh construction from JSON Utility functions
// ----------------------------------------------------------------------------------------------------

fn invalid_mesh_data(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("{}; Cannot construct Mesh from file!", msg.into()),
    )
}

fn parse_point(json_point: &JsonValue) -> std::io::Result<Point> {
    if !json_point.is_array() || json_point.members().count() != 2 {
        return Err(invalid_mesh_data("Element corners must be arrays of length 2"));
    }

    let coord = |idx: usize| {
        json_point[idx]
            .as_f64()
            .ok_or_else(|| invalid_mesh_data("Element corners must be composed of numerical values"))
    };

    Ok(Point::new(coord(0)?, coord(1)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mesh() -> Mesh {
        Mesh::rectangular(Rect::new(Point::new(0.0, 0.0), Point::new(2.0, 2.0)), [2, 2])
    }

    #[test]
    fn rectangular_layout() {
        let mesh = square_mesh();
        assert_eq!(mesh.elements.len(), 4);
        let r3 = mesh.elements[3].bounds;
        assert!((r3.min.x - 1.0).abs() < 1e-14);
        assert!((r3.min.y - 1.0).abs() < 1e-14);
        assert_eq!(mesh.revision(), 0);
    }

    #[test]
    fn mesh_from_json() {
        let mesh = Mesh::from_json_str(
            r#"{ "Elements": [ { "min": [0.0, 0.0], "max": [1.0, 0.5] }, { "min": [1.0, 0.0], "max": [2.0, 0.5] } ] }"#,
        )
        .unwrap();
        assert_eq!(mesh.elems().len(), 2);
        assert_eq!(mesh.locate_shell_elem(&Point::new(1.5, 0.25)), Some(1));

        assert!(Mesh::from_json_str(r#"{ "Elements": [ { "min": [1.0, 0.0], "max": [0.0, 0.5] } ] }"#).is_err());
        assert!(Mesh::from_json_str(r#"{ "Nodes": [] }"#).is_err());
    }

    #[test]
    fn basic_h_refinements() {
        let mut mesh = square_mesh();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        mesh.h_refine_elems(vec![1, 2], HRef::U).unwrap();
        mesh.h_refine_elems(vec![3], HRef::V).unwrap();

        assert_eq!(mesh.elems().len(), 4 + 4 + 2 + 2 + 2);
        assert_eq!(mesh.shell_elems().count(), 4 + 2 + 2 + 2);
        assert_eq!(mesh.revision(), 3);
        assert_eq!(mesh.shell_descendants(1).unwrap(), vec![8, 9]);
        assert_eq!(mesh.ancestor_elems(8, false).unwrap(), vec![1]);
        assert_eq!(mesh.max_depth(), 1);
    }

    #[test]
    fn bad_h_refinements() {
        let mut mesh = square_mesh();
        assert_eq!(
            mesh.h_refine_elems(vec![7], HRef::T),
            Err(HRefError::ElemDoesntExist(7))
        );
        assert_eq!(
            mesh.execute_h_refinements(vec![(0, HRef::T), (1, HRef::T), (0, HRef::U)]),
            Err(HRefError::DoubleRefinement(0))
        );
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        assert_eq!(
            mesh.h_refine_elems(vec![0], HRef::T),
            Err(HRefError::ElemHasChildren(0))
        );
    }

    #[test]
    fn minimum_edge_length_exceeded() {
        let mut mesh = Mesh::unit();
        let mut result = Ok(());
        for _ in 0..20 {
            let corner = mesh
                .shell_elems()
                .find(|elem| elem.rect().min == Point::new(0.0, 0.0))
                .map(|elem| elem.id)
                .unwrap();
            result = mesh.h_refine_elems(vec![corner], HRef::T);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(HRefError::MinEdgeLengthExceeded(_))));
    }

    #[test]
    fn basic_p_refinements() {
        let mut mesh = square_mesh();
        mesh.set_global_expansion_orders([2, 2]).unwrap();
        mesh.set_expansion_on_elems(vec![0], [3, 3]).unwrap();
        mesh.set_expansion_orders(vec![(1, [3, 2])]).unwrap();

        assert_eq!(mesh.elems()[0].poly_orders, PolyOrders::from(3, 3));
        assert_eq!(mesh.elems()[1].poly_orders, PolyOrders::from(3, 2));
        assert_eq!(mesh.max_expansion_orders(), [3, 3]);

        let rev = mesh.revision();
        assert_eq!(
            mesh.set_expansion_orders(vec![(2, [4, 4]), (3, [0, 2])]),
            Err(PRefError::NegExpansion)
        );
        assert_eq!(
            mesh.set_expansion_orders(vec![(2, [4, 4]), (2, [3, 3])]),
            Err(PRefError::DoubleRefinement(2))
        );
        assert_eq!(mesh.revision(), rev);
        assert_eq!(mesh.elems()[2].poly_orders, PolyOrders::from(2, 2));
    }

    #[test]
    fn locate_points_in_refined_mesh() {
        let mut mesh = square_mesh();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        mesh.h_refine_elems(vec![7], HRef::U).unwrap();

        let id = mesh.locate_shell_elem(&Point::new(0.9, 0.9)).unwrap();
        assert_eq!(id, 9);
        assert!(mesh.elems()[id].rect().contains(&Point::new(0.9, 0.9)));
        assert_eq!(mesh.locate_shell_elem(&Point::new(3.0, 0.5)), None);

        let region = Rect::new(Point::new(0.25, 0.25), Point::new(1.5, 0.75));
        let overlaps = mesh.shell_elems_overlapping(&region);
        let ids: Vec<usize> = overlaps.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![4, 5, 6, 8, 9, 1]);

        let covered: f64 = overlaps.iter().map(|(_, overlap)| overlap.area()).sum();
        assert!((covered - region.area()).abs() < 1e-14);
    }

    #[test]
    fn unrefinement_respects_initial_elems() {
        let mut mesh = square_mesh();
        mesh.global_h_refinement(HRef::T).unwrap();
        mesh.mark_as_initial();
        let initial_count = mesh.shell_elems().count();

        let first_fine = mesh.shell_elems().next().unwrap().id;
        mesh.refine_elem(first_fine, Some(HRef::T), PolyOrders::from(3, 4))
            .unwrap();
        assert_eq!(mesh.max_depth(), 2);

        let rev = mesh.revision();
        assert_eq!(mesh.unrefine_all_elems(), 1);
        assert!(mesh.revision() > rev);
        assert_eq!(mesh.shell_elems().count(), initial_count);
        assert_eq!(mesh.max_depth(), 1);
        assert_eq!(mesh.max_expansion_orders(), [3, 4]);

        // nothing below the initial refinements is removed
        assert_eq!(mesh.unrefine_all_elems(), 0);
        assert_eq!(mesh.shell_elems().count(), initial_count);

        for (idx, elem) in mesh.elems().iter().enumerate() {
            assert_eq!(elem.id, idx);
        }
    }

    #[test]
    fn reset_and_adjust() {
        let mut base = square_mesh();
        base.set_global_expansion_orders([2, 2]).unwrap();

        let mut mesh = base.clone();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        mesh.set_global_expansion_orders([4, 3]).unwrap();

        mesh.adjust_shell_orders(-1, PolyOrders::uniform(2));
        assert!(mesh
            .shell_elems()
            .all(|elem| elem.poly_orders == PolyOrders::from(3, 2)));

        let rev = mesh.revision();
        mesh.reset_to(&base);
        assert!(mesh.revision() > rev);
        assert_eq!(mesh.shell_elems().count(), 4);
        assert_eq!(mesh.max_expansion_orders(), [2, 2]);
    }

    #[cfg(feature = "json_export")]
    #[test]
    fn json_export() {
        let mut mesh = square_mesh();
        mesh.h_refine_elems(vec![3], HRef::U).unwrap();

        let path = std::env::temp_dir().join(format!("hp_adapt_mesh_{}.json", std::process::id()));
        let path = path.to_string_lossy().to_string();
        mesh.export_to_json(&path).unwrap();

        let exported = json::parse(&read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(exported["revision"], mesh.revision());
        assert_eq!(exported["Elements"].len(), 4);
        assert_eq!(exported["Elems"].len(), 6);
        assert_eq!(exported["Elems"][3]["active"], false);
        assert_eq!(exported["Elems"][4]["parent"], 3);
    }
}
