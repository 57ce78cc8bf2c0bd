use super::{
    element::Element,
    h_refinement::{HLevels, HRef, HRefError, HRefLoc},
    p_refinement::PolyOrders,
    space::Rect,
    EXPECTED_NUM_H_REFINEMENTS,
};
use json::{object, JsonValue};
use smallvec::SmallVec;
use std::sync::Arc;

/// `Elem`s are the basic geometric unit in the `Mesh` in Parametric Space
///
/// `Elem`s are responsible for keeping track of:
/// * Connections to their parent `Elem` (and their own h-refinement state)
/// * Connections to their child `Elem`s (if h-refined)
/// * Polynomial expansion orders (p-refinement state)
///
/// `Elem`s also maintain a connection to their associated [`Element`] for mappings to Real Space
///
/// ## h-Refinement
///
/// Three variants of h-refinements are supported. The relative indices of the child `Elem`s are shown below for each type:
///
/// ```text
///        T-Type                 U-Type                 V-Type
///   -------------          -------------          -------------
///   |  2  |  3  |          |     |     |          |     1     |
///   |-----|-----|          |  0  |  1  |          |-----------|
///   |  0  |  1  |          |     |     |          |     0     |
///   -------------          -------------          -------------
/// ```
///
/// Child `Elem`s inherit the expansion orders of their parent unless the refinement specifies otherwise.
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub element: Arc<Element>,
    pub h_levels: HLevels,
    pub poly_orders: PolyOrders,
    children: Option<SmallVec<[usize; 4]>>,
    ancestors: SmallVec<[(usize, HRefLoc); EXPECTED_NUM_H_REFINEMENTS]>,
    refinement: Option<HRef>,
    initial: bool,
}

impl Elem {
    /// Construct a new base-layer Elem covering the whole of its `Element`
    pub fn new(id: usize, element: Arc<Element>, poly_orders: PolyOrders) -> Self {
        Self {
            id,
            element,
            children: None,
            ancestors: SmallVec::new(),
            refinement: None,
            h_levels: HLevels::default(),
            poly_orders,
            initial: false,
        }
    }

    /// Construct 2 or 4 child Elems from an [HRef] of this Elem
    pub(crate) fn h_refine(
        &mut self,
        refinement: HRef,
        id_counter: &mut usize,
    ) -> Result<Vec<Elem>, HRefError> {
        if self.children.is_some() {
            return Err(HRefError::ElemHasChildren(self.id));
        }

        let children: Vec<Elem> = refinement
            .indices_and_ids(id_counter)
            .map(|(idx, id)| {
                let mut ancestors = self.ancestors.clone();
                ancestors.push((self.id, refinement.loc(idx)));

                Elem {
                    id,
                    element: self.element.clone(),
                    children: None,
                    ancestors,
                    refinement: None,
                    h_levels: self.h_levels.refined(refinement),
                    poly_orders: self.poly_orders,
                    initial: false,
                }
            })
            .collect();

        self.children = Some(children.iter().map(|child| child.id).collect());
        self.refinement = Some(refinement);
        Ok(children)
    }

    /// Id of the Parent Elem if this Elem has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.ancestors.last().map(|(id, _)| *id)
    }

    /// Get the stack of [HRefLoc]s and Elem-IDs back to this `Elem`s ancestor on the base layer of the mesh
    pub fn loc_stack(&self) -> &[(usize, HRefLoc)] {
        &self.ancestors
    }

    /// Number of h-refinements separating this Elem from the base layer
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Get the bounds of this `Elem` in parametric space relative to its associated `Element`
    pub fn parametric_range(&self) -> [[f64; 2]; 2] {
        self.ancestors
            .iter()
            .fold([[-1.0, 1.0], [-1.0, 1.0]], |acc, (_, href_loc)| {
                href_loc.sub_range(acc)
            })
    }

    /// The region of Real Space covered by this Elem
    pub fn rect(&self) -> Rect {
        self.element.region(self.parametric_range())
    }

    /// Returns a vector of ids for this Elem's children. Returns `None` if this Elem has no children.
    pub fn child_ids(&self) -> Option<SmallVec<[usize; 4]>> {
        self.children.clone()
    }

    /// Has this `Elem` been h-Refined
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// The type of h-Refinement applied to this Elem (if any)
    pub fn refinement(&self) -> Option<HRef> {
        self.refinement
    }

    /// Was this Elem produced by the initial (pre-adaptivity) refinements of the Mesh
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub(crate) fn mark_initial(&mut self) {
        self.initial = true;
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "element_id": self.element.id,
            "parent": self.parent_id(),
            "active": self.children.is_none(),
            "expansion": self.poly_orders,
            "h_levels": self.h_levels,
            "rect": self.rect().to_json(),
            "children": JsonValue::from(
                match &self.children {
                    Some(ids) => ids.to_vec(),
                    None => Vec::new(),
                }
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::space::Point;
    use super::*;

    fn unit_elem() -> Elem {
        let element = Arc::new(Element::new(
            0,
            Rect::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0)),
        ));
        Elem::new(0, element, PolyOrders::from(2, 3))
    }

    #[test]
    fn children_cover_parent() {
        let mut parent = unit_elem();
        let mut counter = 1;
        let children = parent.h_refine(HRef::T, &mut counter).unwrap();

        assert_eq!(children.len(), 4);
        assert_eq!(counter, 5);
        let total_area: f64 = children.iter().map(|c| c.rect().area()).sum();
        assert!((total_area - 1.0).abs() < 1e-14);

        let ne = &children[3];
        assert_eq!(ne.parent_id(), Some(0));
        assert_eq!(ne.poly_orders, PolyOrders::from(2, 3));
        assert!((ne.rect().min.x - 0.5).abs() < 1e-14);
        assert!((ne.rect().min.y - 0.5).abs() < 1e-14);
        assert_eq!(parent.refinement(), Some(HRef::T));
    }

    #[test]
    fn nested_refinement_ranges() {
        let mut parent = unit_elem();
        let mut counter = 1;
        let mut halves = parent.h_refine(HRef::U, &mut counter).unwrap();
        let quarters = halves[1].h_refine(HRef::V, &mut counter).unwrap();

        let top_right = quarters[1].rect();
        assert!((top_right.min.x - 0.5).abs() < 1e-14);
        assert!((top_right.min.y - 0.5).abs() < 1e-14);
        assert_eq!(quarters[1].depth(), 2);
        assert_eq!(quarters[1].h_levels, HLevels::from(1, 1));

        assert_eq!(
            halves[1].h_refine(HRef::T, &mut counter).unwrap_err(),
            HRefError::ElemHasChildren(halves[1].id)
        );
    }
}
