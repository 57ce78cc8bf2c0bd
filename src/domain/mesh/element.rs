use super::space::{Point, Rect};
use json::{object, JsonValue};

/// The `Element`s are the basic geometric unit of the Mesh in Real Space.
///
/// Each `Element` is an axis-aligned rectangle. It keeps the mapping between Real Space and the
/// parametric coordinates of every `Elem` that descends from it.
///
/// Upon `Mesh` construction, each `Element` has one associated `Elem`, but more can be added through h-Refinements
#[derive(Debug)]
pub struct Element {
    pub id: usize,
    pub bounds: Rect,
}

impl Element {
    pub fn new(id: usize, bounds: Rect) -> Self {
        Self { id, bounds }
    }

    /// Real Space region covered by the parametric range `[[u_min, u_max], [v_min, v_max]]` of this Element
    pub fn region(&self, parametric_range: [[f64; 2]; 2]) -> Rect {
        self.bounds.sub_rect(parametric_range)
    }

    pub fn contains(&self, point: &Point) -> bool {
        self.bounds.contains(point)
    }

    /// Produce a Json Object that describes this Element
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "bounds": self.bounds.to_json(),
        }
    }
}
