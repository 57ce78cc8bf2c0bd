use crate::domain::mesh::{
    h_refinement::HRef,
    p_refinement::PolyOrders,
    space::Rect,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of refinement candidates considered for each Elem
///
/// `P*` lists only raise expansion orders, `H*` lists only split Elems (children keep the parent's orders) and
/// `Hp*` lists consider both, giving split children roughly half of the parent's orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CandList {
    /// isotropic p-refinement
    PIso,
    /// isotropic and anisotropic p-refinement
    PAniso,
    /// isotropic h-refinement
    HIso,
    /// isotropic and anisotropic h-refinement
    HAniso,
    /// isotropic h- and p-refinement
    HpIso,
    /// isotropic p-refinement, isotropic and anisotropic h-refinement
    HpAnisoH,
    /// isotropic and anisotropic p-refinement, isotropic h-refinement
    HpAnisoP,
    /// isotropic and anisotropic h- and p-refinement
    #[default]
    HpAniso,
}

impl CandList {
    fn p_refinement(&self) -> bool {
        !matches!(self, Self::HIso | Self::HAniso)
    }

    fn h_refinement(&self) -> bool {
        !matches!(self, Self::PIso | Self::PAniso)
    }

    fn anisotropic_p(&self) -> bool {
        matches!(self, Self::PAniso | Self::HpAnisoP | Self::HpAniso)
    }

    fn anisotropic_h(&self) -> bool {
        matches!(self, Self::HAniso | Self::HpAnisoH | Self::HpAniso)
    }

    fn is_hp(&self) -> bool {
        self.p_refinement() && self.h_refinement()
    }

    /// Candidate refinements of an Elem with `orders`
    ///
    /// Candidates are discarded if their orders exceed `max_order`, if they use a split that `can_split` rejects,
    /// or if they would not add any DoFs.
    ///
    /// ```
    /// use hp_adapt::adapt::candidates::CandList;
    /// use hp_adapt::domain::mesh::p_refinement::PolyOrders;
    ///
    /// let candidates = CandList::PAniso.generate(PolyOrders::uniform(2), 10, |_| true);
    /// assert_eq!(candidates.len(), 4);
    /// assert!(candidates.iter().all(|c| c.split.is_none()));
    /// ```
    pub fn generate<F>(&self, orders: PolyOrders, max_order: u8, can_split: F) -> Vec<Candidate>
    where
        F: Fn(HRef) -> bool,
    {
        let mut candidates = Vec::new();
        let PolyOrders { ni, nj } = orders;

        if self.p_refinement() {
            candidates.push(Candidate::p(ni + 1, nj + 1));
            candidates.push(Candidate::p(ni + 2, nj + 2));
            if self.anisotropic_p() {
                candidates.push(Candidate::p(ni + 1, nj));
                candidates.push(Candidate::p(ni, nj + 1));
            }
        }

        if self.h_refinement() {
            let mut splits = vec![HRef::T];
            if self.anisotropic_h() {
                splits.push(HRef::U);
                splits.push(HRef::V);
            }

            let child_orders: Vec<PolyOrders> = if self.is_hp() {
                let (hi, hj) = (std::cmp::max(1, (ni + 1) / 2), std::cmp::max(1, (nj + 1) / 2));
                let mut child_orders = vec![PolyOrders::from(hi, hj), PolyOrders::from(hi + 1, hj + 1)];
                if self.anisotropic_p() {
                    child_orders.push(PolyOrders::from(hi + 1, hj));
                    child_orders.push(PolyOrders::from(hi, hj + 1));
                }
                child_orders
            } else {
                vec![orders]
            };

            for split in splits.into_iter().filter(|split| can_split(*split)) {
                for child in child_orders.iter() {
                    candidates.push(Candidate {
                        split: Some(split),
                        orders: *child,
                    });
                }
            }
        }

        let current_dofs = orders.num_dofs();
        let mut unique: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.orders.max() <= max_order
                && candidate.num_dofs() > current_dofs
                && !unique.contains(&candidate)
            {
                unique.push(candidate);
            }
        }
        unique
    }
}

impl fmt::Display for CandList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::PIso => "p-iso",
            Self::PAniso => "p-aniso",
            Self::HIso => "h-iso",
            Self::HAniso => "h-aniso",
            Self::HpIso => "hp-iso",
            Self::HpAnisoH => "hp-aniso-h",
            Self::HpAnisoP => "hp-aniso-p",
            Self::HpAniso => "hp-aniso",
        };
        write!(f, "{}", name)
    }
}

/// A possible refinement of one Elem: an optional split, and the orders given to the Elem (or its new children)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub split: Option<HRef>,
    pub orders: PolyOrders,
}

impl Candidate {
    fn p(ni: u8, nj: u8) -> Self {
        Self {
            split: None,
            orders: PolyOrders::from(ni, nj),
        }
    }

    pub fn num_children(&self) -> usize {
        self.split.map_or(1, |split| split.num_children())
    }

    /// Number of DoFs the refined Elem (or its children) would have
    pub fn num_dofs(&self) -> usize {
        self.num_children() * self.orders.num_dofs()
    }

    /// The regions of real space covered by the refined Elem (or its children), in child order
    pub fn regions(&self, rect: &Rect) -> Vec<Rect> {
        match self.split {
            None => vec![*rect],
            Some(split) => (0..split.num_children())
                .map(|idx| rect.sub_rect(split.loc(idx).sub_range([[-1.0, 1.0], [-1.0, 1.0]])))
                .collect(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.split {
            Some(split) => write!(f, "h{}-split {}", split, self.orders),
            None => write!(f, "p {}", self.orders),
        }
    }
}

/// A [Candidate] along with the quantities used to rank it
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    /// Reduction of the Elem's error per added DoF
    pub score: f64,
    /// Number of DoFs added by the candidate
    pub dof_cost: usize,
    /// Error of the reference solution's projection onto the candidate space
    pub error: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::space::Point;

    #[test]
    fn candidate_lists() {
        let orders = PolyOrders::uniform(3);
        let all = |_| true;

        assert_eq!(CandList::PIso.generate(orders, 10, all).len(), 2);
        assert_eq!(CandList::HIso.generate(orders, 10, all).len(), 1);
        assert_eq!(CandList::HAniso.generate(orders, 10, all).len(), 3);
        // 2 p + T with 2 child orders
        assert_eq!(CandList::HpIso.generate(orders, 10, all).len(), 4);
        // 4 p + (T, U, V) with 4 child orders
        assert_eq!(CandList::HpAniso.generate(orders, 10, all).len(), 4 + 12);

        let h = CandList::HIso.generate(orders, 10, all);
        assert_eq!(h[0].split, Some(HRef::T));
        assert_eq!(h[0].orders, orders);
    }

    #[test]
    fn candidates_are_filtered() {
        // orders above the maximum are dropped
        let limited = CandList::PAniso.generate(PolyOrders::from(4, 3), 4, |_| true);
        assert_eq!(limited, vec![Candidate::p(4, 4)]);

        // splits that the mesh rejects are dropped
        let no_splits = CandList::HpAniso.generate(PolyOrders::uniform(2), 10, |_| false);
        assert!(no_splits.iter().all(|c| c.split.is_none()));

        // anisotropic splits of high order Elems with halved orders would remove DoFs
        let high = CandList::HpAnisoH.generate(PolyOrders::uniform(6), 10, |_| true);
        let base = PolyOrders::uniform(6).num_dofs();
        assert!(high.iter().all(|c| c.num_dofs() > base));
        assert!(!high.iter().any(|c| c.split == Some(HRef::U) && c.orders == PolyOrders::uniform(3)));
    }

    #[test]
    fn candidate_regions() {
        let rect = Rect::new(Point::new(0.0, 0.0), Point::new(2.0, 1.0));
        let candidate = Candidate {
            split: Some(HRef::U),
            orders: PolyOrders::uniform(1),
        };
        let regions = candidate.regions(&rect);
        assert_eq!(regions.len(), 2);
        assert!((regions[0].max.x - 1.0).abs() < 1e-14);
        assert!((regions[1].min.x - 1.0).abs() < 1e-14);
        assert_eq!(candidate.num_dofs(), 8);
    }
}
