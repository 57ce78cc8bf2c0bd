use super::MAX_POLYNOMIAL_ORDER;
use json::{object, JsonValue};
use std::fmt;

/// The record of polynomial expansion orders associated with an Elem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PolyOrders {
    /// Maximum u-directed polynomial expansion order
    pub ni: u8,
    /// Maximum v-directed polynomial expansion order
    pub nj: u8,
}

impl PolyOrders {
    pub const fn from(i: u8, j: u8) -> Self {
        Self { ni: i, nj: j }
    }

    /// Equal expansion orders in both directions
    pub const fn uniform(n: u8) -> Self {
        Self { ni: n, nj: n }
    }

    /// Directly update the u- and v-directed expansion orders to the given values
    ///
    /// Return an `Err` if the given values are out of the valid range
    pub fn set(&mut self, [ni, nj]: [u8; 2]) -> Result<(), PRefError> {
        if ni > MAX_POLYNOMIAL_ORDER || nj > MAX_POLYNOMIAL_ORDER {
            return Err(PRefError::ExceededMaxExpansion);
        }
        if ni < 1 || nj < 1 {
            return Err(PRefError::NegExpansion);
        }

        self.ni = ni;
        self.nj = nj;

        Ok(())
    }

    /// Shift both expansion orders by `delta`, never falling below `min` (in either direction)
    pub fn adjusted(&self, delta: i8, min: Self) -> Self {
        let shift = |n: u8, floor: u8| -> u8 {
            let shifted = (n as i16 + delta as i16).clamp(1, MAX_POLYNOMIAL_ORDER as i16) as u8;
            std::cmp::max(shifted, floor)
        };

        Self {
            ni: shift(self.ni, min.ni),
            nj: shift(self.nj, min.nj),
        }
    }

    /// Number of tensor-product basis functions (and degrees of freedom) supported by these orders
    ///
    /// ```
    /// use hp_adapt::domain::mesh::p_refinement::PolyOrders;
    /// assert_eq!(PolyOrders::from(2, 3).num_dofs(), 12);
    /// ```
    pub fn num_dofs(&self) -> usize {
        (self.ni as usize + 1) * (self.nj as usize + 1)
    }

    /// Get the permutations of [i, j] for the tensor-product basis functions, with i ∈ [0, Ni] and j ∈ [0, Nj]
    ///
    /// The position of a permutation in this iterator is the local index of the associated basis function
    pub fn permutations(&self) -> impl Iterator<Item = [usize; 2]> + '_ {
        (0..=self.ni as usize)
            .flat_map(move |i_order| (0..=self.nj as usize).map(move |j_order| [i_order, j_order]))
    }

    /// The maximum orders from self and the given orders
    pub fn max_with(&self, orders: [u8; 2]) -> [u8; 2] {
        [
            std::cmp::max(self.ni, orders[0]),
            std::cmp::max(self.nj, orders[1]),
        ]
    }

    /// The larger of the two expansion orders
    pub fn max(&self) -> u8 {
        std::cmp::max(self.ni, self.nj)
    }
}

impl Default for PolyOrders {
    fn default() -> Self {
        Self { ni: 1, nj: 1 }
    }
}

impl fmt::Display for PolyOrders {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.ni, self.nj)
    }
}

#[cfg(feature = "json_export")]
impl From<PolyOrders> for JsonValue {
    fn from(orders: PolyOrders) -> Self {
        object! {
            "u": orders.ni,
            "v": orders.nj,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PRefError {
    NegExpansion,
    ExceededMaxExpansion,
    ElemDoesntExist(usize),
    DoubleRefinement(usize),
}

impl fmt::Display for PRefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NegExpansion => write!(
                f,
                "Negative p-Refinement results in 0 or negative expansion order; Cannot p-Refine!"
            ),
            Self::ExceededMaxExpansion => write!(
                f,
                "Positive p-Refinement results in expansion order over maximum; Cannot p-Refine!"
            ),
            Self::ElemDoesntExist(elem_id) => {
                write!(f, "Elem {} does not exist; Cannot apply p-Refinement!", elem_id)
            }
            Self::DoubleRefinement(elem_id) => write!(
                f,
                "Multiple p-refinements were specified for Elem {}; Cannot apply p-Refinements!",
                elem_id
            ),
        }
    }
}

impl std::error::Error for PRefError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_refinement_bounds() {
        let mut orders = PolyOrders::from(2, 3);
        orders.set([3, 2]).unwrap();
        assert_eq!(orders, PolyOrders::from(3, 2));

        assert_eq!(orders.set([3, 0]), Err(PRefError::NegExpansion));
        assert_eq!(
            orders.set([MAX_POLYNOMIAL_ORDER + 1, 2]),
            Err(PRefError::ExceededMaxExpansion)
        );
        // failed refinements leave the orders untouched
        assert_eq!(orders, PolyOrders::from(3, 2));
    }

    #[test]
    fn adjusted_respects_floor() {
        let base = PolyOrders::uniform(2);
        assert_eq!(PolyOrders::from(5, 2).adjusted(-1, base), PolyOrders::from(4, 2));
        assert_eq!(PolyOrders::from(1, 3).adjusted(-1, base), PolyOrders::from(2, 2));
        assert_eq!(PolyOrders::from(3, 3).adjusted(1, base), PolyOrders::from(4, 4));
    }

    #[test]
    fn permutation_count_matches_dofs() {
        let orders = PolyOrders::from(4, 1);
        assert_eq!(orders.permutations().count(), orders.num_dofs());
        assert_eq!(orders.permutations().nth(2), Some([1, 0]));
    }
}
