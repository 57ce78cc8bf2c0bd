use json::{object, JsonValue};
use std::fmt;

/// Description of an h-Refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HRef {
    /// isotropic (four children)
    T,
    /// anisotropic about the u-direction (two children side by side)
    U,
    /// anisotropic about the v-direction (two children stacked on top of each other)
    V,
}

impl HRef {
    /// Number of child Elems produced by this refinement
    pub fn num_children(&self) -> usize {
        match self {
            Self::T => 4,
            Self::U | Self::V => 2,
        }
    }

    /// Location of the `idx`'th child relative to its parent
    pub fn loc(&self, idx: usize) -> HRefLoc {
        match self {
            Self::T => HRefLoc::T(match idx {
                0 => Quadrant::SW,
                1 => Quadrant::SE,
                2 => Quadrant::NW,
                3 => Quadrant::NE,
                _ => panic!("T-Type h-Refinements only have 4 children; Cannot get location of child {}!", idx),
            }),
            Self::U => HRefLoc::U(Bisection::from_index(idx)),
            Self::V => HRefLoc::V(Bisection::from_index(idx)),
        }
    }

    /// Pair each child index with a new Elem ID, pulled from the counter
    pub(crate) fn indices_and_ids(&self, id_counter: &mut usize) -> impl Iterator<Item = (usize, usize)> {
        let first_id = *id_counter;
        let n = self.num_children();
        *id_counter += n;
        (0..n).map(move |idx| (idx, first_id + idx))
    }
}

impl fmt::Display for HRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::T => write!(f, "T"),
            Self::U => write!(f, "U"),
            Self::V => write!(f, "V"),
        }
    }
}

/// Quadrant of a child Elem following a T-Type h-Refinement (from the parent Elem's perspective)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quadrant {
    /// south west
    SW,
    /// south east
    SE,
    /// north west
    NW,
    /// north east
    NE,
}

impl Quadrant {
    pub fn index(&self) -> usize {
        match self {
            Self::SW => 0,
            Self::SE => 1,
            Self::NW => 2,
            Self::NE => 3,
        }
    }
}

/// Location of a child Elem following a U-Type or V-Type h-refinement (from the parent Elem's perspective).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bisection {
    /// Bottom (V-type) or Left (U-type)
    BL,
    /// Top (V-Type) or Right (U-type)
    TR,
}

impl Bisection {
    pub fn index(&self) -> usize {
        match self {
            Self::BL => 0,
            Self::TR => 1,
        }
    }

    fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::BL,
            1 => Self::TR,
            _ => panic!("U- and V-Type h-Refinements only have 2 children; Cannot get location of child {}!", idx),
        }
    }

    fn sub_range([min, max]: [f64; 2], bi: Self) -> [f64; 2] {
        let mid = (min + max) / 2.0;
        match bi {
            Self::BL => [min, mid],
            Self::TR => [mid, max],
        }
    }
}

/// The location of an [Elem](super::elem::Elem) relative to its parent following an h-refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HRefLoc {
    T(Quadrant),
    U(Bisection),
    V(Bisection),
}

impl HRefLoc {
    pub fn index(&self) -> usize {
        match self {
            Self::T(quad) => quad.index(),
            Self::U(bi) | Self::V(bi) => bi.index(),
        }
    }

    /// Narrow a parent's parametric range down to the range covered by this child
    pub fn sub_range(&self, [u_range, v_range]: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
        match self {
            Self::T(quad) => {
                let (u_bi, v_bi) = match quad {
                    Quadrant::SW => (Bisection::BL, Bisection::BL),
                    Quadrant::SE => (Bisection::TR, Bisection::BL),
                    Quadrant::NW => (Bisection::BL, Bisection::TR),
                    Quadrant::NE => (Bisection::TR, Bisection::TR),
                };
                [
                    Bisection::sub_range(u_range, u_bi),
                    Bisection::sub_range(v_range, v_bi),
                ]
            }
            Self::U(bi) => [Bisection::sub_range(u_range, *bi), v_range],
            Self::V(bi) => [u_range, Bisection::sub_range(v_range, *bi)],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Description of an Elem's h-Refinement levels in the u and v directions
pub struct HLevels {
    pub u: u8,
    pub v: u8,
}

impl HLevels {
    pub fn from(u: u8, v: u8) -> Self {
        Self { u, v }
    }

    pub fn refined(&self, refinement: HRef) -> Self {
        match refinement {
            HRef::T => Self::from(self.u + 1, self.v + 1),
            HRef::U => Self::from(self.u + 1, self.v),
            HRef::V => Self::from(self.u, self.v + 1),
        }
    }

    pub fn max(&self) -> u8 {
        std::cmp::max(self.u, self.v)
    }
}

impl Default for HLevels {
    fn default() -> Self {
        Self { u: 0, v: 0 }
    }
}

#[cfg(feature = "json_export")]
impl From<HLevels> for JsonValue {
    fn from(levels: HLevels) -> Self {
        object! {
            "u": levels.u,
            "v": levels.v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HRefError {
    ElemDoesntExist(usize),
    ElemHasChildren(usize),
    DoubleRefinement(usize),
    MinEdgeLengthExceeded(usize),
}

impl fmt::Display for HRefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ElemDoesntExist(elem_id) => {
                write!(f, "Elem {} does not exist; Cannot apply h-Refinement!", elem_id)
            }
            Self::ElemHasChildren(elem_id) => write!(
                f,
                "Elem {} has already been h-Refined; Cannot apply h-Refinement!",
                elem_id
            ),
            Self::DoubleRefinement(elem_id) => write!(
                f,
                "Multiple h-Refinements were specified for Elem {}; Cannot apply h-Refinements!",
                elem_id
            ),
            Self::MinEdgeLengthExceeded(elem_id) => write!(
                f,
                "Elem {} is too small to be split; Cannot apply h-Refinement!",
                elem_id
            ),
        }
    }
}

impl std::error::Error for HRefError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_ranges_cover_parent() {
        let parent = [[-1.0, 1.0], [-1.0, 1.0]];

        let ne = HRef::T.loc(3).sub_range(parent);
        assert_eq!(ne, [[0.0, 1.0], [0.0, 1.0]]);

        let right = HRef::U.loc(1).sub_range(parent);
        assert_eq!(right, [[0.0, 1.0], [-1.0, 1.0]]);

        let bottom = HRef::V.loc(0).sub_range(parent);
        assert_eq!(bottom, [[-1.0, 1.0], [-1.0, 0.0]]);
    }

    #[test]
    fn id_allocation() {
        let mut counter = 10;
        let ids: Vec<(usize, usize)> = HRef::U.indices_and_ids(&mut counter).collect();
        assert_eq!(ids, vec![(0, 10), (1, 11)]);
        assert_eq!(counter, 12);
    }

    #[test]
    fn h_levels() {
        let levels = HLevels::default().refined(HRef::T).refined(HRef::U);
        assert_eq!(levels, HLevels::from(2, 1));
        assert_eq!(levels.max(), 2);
    }
}
