use json::{object, JsonValue};
use std::fmt;

/// Tolerance used when deciding whether a point lies on the boundary of a [Rect]
const CONTAINMENT_ACCURACY: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq)]
/// Point in 2D Real Space
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// The point half way between `a` and `b`
    pub fn between(a: &Self, b: &Self) -> Self {
        Self {
            x: (a.x + b.x) / 2.0,
            y: (a.y + b.y) / 2.0,
        }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.x, self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Parametric Coordinate Directions
pub enum ParaDir {
    U,
    V,
}

/// An axis-aligned rectangle in Real Space
///
/// Every [Elem](super::elem::Elem) in the mesh covers one of these. The parametric coordinates `(u, v) ∈ [-1, 1]²`
/// of a `Rect` map linearly onto `x ∈ [x_min, x_max]` and `y ∈ [y_min, y_max]` respectively.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn new(min: Point, max: Point) -> Self {
        assert!(
            max.x > min.x && max.y > min.y,
            "Rect corners {} and {} are not ordered; Cannot construct Rect!",
            min,
            max
        );
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// The length of the rect in the given parametric direction
    pub fn length(&self, dir: ParaDir) -> f64 {
        match dir {
            ParaDir::U => self.width(),
            ParaDir::V => self.height(),
        }
    }

    /// Does this rect contain the point (boundaries included)
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min.x - CONTAINMENT_ACCURACY
            && point.x <= self.max.x + CONTAINMENT_ACCURACY
            && point.y >= self.min.y - CONTAINMENT_ACCURACY
            && point.y <= self.max.y + CONTAINMENT_ACCURACY
    }

    /// The overlapping region of two rects. Returns `None` if the overlap has no area.
    ///
    /// ```
    /// use hp_adapt::domain::mesh::space::{Point, Rect};
    ///
    /// let a = Rect::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0));
    /// let b = Rect::new(Point::new(0.5, -1.0), Point::new(2.0, 0.5));
    ///
    /// let overlap = a.intersection(&b).unwrap();
    /// assert!((overlap.area() - 0.25).abs() < 1e-14);
    ///
    /// let c = Rect::new(Point::new(1.0, 0.0), Point::new(2.0, 1.0));
    /// assert!(a.intersection(&c).is_none());
    /// ```
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let min = Point::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y));
        let max = Point::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y));

        let min_extent = CONTAINMENT_ACCURACY * self.width().max(self.height());
        if max.x - min.x > min_extent && max.y - min.y > min_extent {
            Some(Self { min, max })
        } else {
            None
        }
    }

    /// The sub-rect covering the parametric range `[[u_min, u_max], [v_min, v_max]]` of this rect
    pub fn sub_rect(&self, [[u_min, u_max], [v_min, v_max]]: [[f64; 2]; 2]) -> Self {
        Self::new(
            Point::new(
                map_range(u_min, -1.0, 1.0, self.min.x, self.max.x),
                map_range(v_min, -1.0, 1.0, self.min.y, self.max.y),
            ),
            Point::new(
                map_range(u_max, -1.0, 1.0, self.min.x, self.max.x),
                map_range(v_max, -1.0, 1.0, self.min.y, self.max.y),
            ),
        )
    }

    /// Map a real x-coordinate into this rect's parametric u-coordinate
    #[inline]
    pub fn u_of(&self, x: f64) -> f64 {
        map_range(x, self.min.x, self.max.x, -1.0, 1.0)
    }

    /// Map a real y-coordinate into this rect's parametric v-coordinate
    #[inline]
    pub fn v_of(&self, y: f64) -> f64 {
        map_range(y, self.min.y, self.max.y, -1.0, 1.0)
    }

    /// `[du/dx, dv/dy]`: the scale applied to parametric derivatives to get real derivatives
    #[inline]
    pub fn parametric_scale(&self) -> [f64; 2] {
        [2.0 / self.width(), 2.0 / self.height()]
    }

    /// Produce a Json Object that describes this Rect
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "min": [self.min.x, self.min.y],
            "max": [self.max.x, self.max.y],
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{} -- {}]", self.min, self.max)
    }
}

pub(crate) fn map_range(val: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    (val - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}
