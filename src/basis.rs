use crate::domain::mesh::{
    p_refinement::PolyOrders,
    space::{map_range, Point, Rect},
};
use smallvec::{smallvec, SmallVec};

/// A family of 1D polynomials sampled over a fixed set of points in `[-1, 1]`
///
/// These form the factors of the tensor-product basis functions defined on each Elem
pub trait ShapeFn: Clone + Send + Sync {
    /// Sample polynomials of order `0..=n_max` at each of the `points`
    fn with(n_max: usize, points: &[f64]) -> Self;

    fn poly(&self, n: usize, p: usize) -> f64;

    fn poly_d1(&self, n: usize, p: usize) -> f64;
}

/// Legendre polynomials (and their first derivatives)
///
/// Orthogonal on each Elem, so local projections and Gram matrices are cheap. Solutions are stored in this basis.
#[derive(Clone, Debug)]
pub struct LegendreShapeFn {
    polys: Vec<Vec<f64>>,
    polys_d1: Vec<Vec<f64>>,
}

impl ShapeFn for LegendreShapeFn {
    fn with(n_max: usize, points: &[f64]) -> Self {
        Self::sample(n_max, points)
    }

    #[inline]
    fn poly(&self, n: usize, p: usize) -> f64 {
        self.polys[n][p]
    }

    #[inline]
    fn poly_d1(&self, n: usize, p: usize) -> f64 {
        self.polys_d1[n][p]
    }
}

impl LegendreShapeFn {
    fn sample(n_max: usize, points: &[f64]) -> Self {
        let mut polys: Vec<Vec<f64>> = Vec::with_capacity(n_max + 1);
        let mut polys_d1: Vec<Vec<f64>> = Vec::with_capacity(n_max + 1);

        let num_points = points.len();

        for n in 0..=n_max {
            match n {
                0 => {
                    polys.push(vec![1.0; num_points]);
                    polys_d1.push(vec![0.0; num_points]);
                }
                1 => {
                    polys.push(points.to_vec());
                    polys_d1.push(vec![1.0; num_points]);
                }
                _ => {
                    // (n) P_n = (2n - 1) x P_n-1 - (n - 1) P_n-2
                    let n_ = n as f64;
                    let next: Vec<f64> = points
                        .iter()
                        .enumerate()
                        .map(|(p, x)| {
                            ((2.0 * n_ - 1.0) * x * polys[n - 1][p] - (n_ - 1.0) * polys[n - 2][p]) / n_
                        })
                        .collect();

                    // P'_n = P'_n-2 + (2n - 1) P_n-1
                    let next_d1: Vec<f64> = (0..num_points)
                        .map(|p| polys_d1[n - 2][p] + (2.0 * n_ - 1.0) * polys[n - 1][p])
                        .collect();

                    polys.push(next);
                    polys_d1.push(next_d1);
                }
            }
        }

        Self { polys, polys_d1 }
    }

    /// Highest order sampled
    pub fn n_max(&self) -> usize {
        self.polys.len() - 1
    }
}

/// Integrated Legendre (Lobatto) polynomials
///
/// * `l_0 = (1 - x) / 2` and `l_1 = (1 + x) / 2` are the vertex functions
/// * `l_k = (P_k - P_k-2) / sqrt(2 (2k - 1))` for `k >= 2` vanish at both ends of the interval
///
/// The bubbles are orthonormal in the `H1` seminorm. Tensor products of these functions can be glued together
/// across Elem boundaries, which makes them the basis of the conforming space.
#[derive(Clone, Debug)]
pub struct LobattoShapeFn {
    polys: Vec<Vec<f64>>,
    polys_d1: Vec<Vec<f64>>,
}

impl ShapeFn for LobattoShapeFn {
    fn with(n_max: usize, points: &[f64]) -> Self {
        let legendre = LegendreShapeFn::sample(n_max.max(1), points);
        let num_points = points.len();

        let mut polys = Vec::with_capacity(n_max + 1);
        let mut polys_d1 = Vec::with_capacity(n_max + 1);

        for k in 0..=n_max {
            let (values, derivs): (Vec<f64>, Vec<f64>) = (0..num_points)
                .map(|p| {
                    lobatto_in_legendre(k).iter().fold((0.0, 0.0), |(v, d), (n, w)| {
                        (v + w * legendre.polys[*n][p], d + w * legendre.polys_d1[*n][p])
                    })
                })
                .unzip();
            polys.push(values);
            polys_d1.push(derivs);
        }

        Self { polys, polys_d1 }
    }

    #[inline]
    fn poly(&self, n: usize, p: usize) -> f64 {
        self.polys[n][p]
    }

    #[inline]
    fn poly_d1(&self, n: usize, p: usize) -> f64 {
        self.polys_d1[n][p]
    }
}

/// The Lobatto function `l_k` written as a combination of Legendre polynomials: `(n, weight)` pairs
#[inline]
pub fn lobatto_in_legendre(k: usize) -> SmallVec<[(usize, f64); 2]> {
    match k {
        0 => smallvec![(0, 0.5), (1, -0.5)],
        1 => smallvec![(0, 0.5), (1, 0.5)],
        _ => {
            let c = 1.0 / (2.0 * (2 * k - 1) as f64).sqrt();
            smallvec![(k, c), (k - 2, -c)]
        }
    }
}

/// Values and first derivatives of the Lobatto polynomials `l_0..=l_n_max` at a single point
pub fn lobatto_at(n_max: usize, x: f64) -> (Vec<f64>, Vec<f64>) {
    let table = LobattoShapeFn::with(n_max, &[x]);
    (
        table.polys.into_iter().map(|samples| samples[0]).collect(),
        table.polys_d1.into_iter().map(|samples| samples[0]).collect(),
    )
}

/// Convert the coefficients of an Elem-local tensor-product Lobatto expansion into Legendre coefficients
///
/// Both expansions use the local index layout of [basis_index]
pub fn lobatto_to_legendre(orders: &PolyOrders, lobatto: &[f64]) -> Vec<f64> {
    let nj = orders.nj as usize + 1;
    let mut legendre = vec![0.0; orders.num_dofs()];

    for ([i, j], y) in orders.permutations().zip(lobatto.iter()) {
        if *y == 0.0 {
            continue;
        }
        for (n, wi) in lobatto_in_legendre(i) {
            for (m, wj) in lobatto_in_legendre(j) {
                legendre[n * nj + m] += y * wi * wj;
            }
        }
    }

    legendre
}

/// Values and first derivatives of the Legendre polynomials `P_0..=P_n_max` at a single point
///
/// ```
/// use hp_adapt::basis::legendre_at;
///
/// let (p, p_d1) = legendre_at(3, 0.5);
/// assert!((p[2] - (3.0 * 0.25 - 1.0) / 2.0).abs() < 1e-14);
/// assert!((p_d1[3] - (15.0 * 0.25 - 3.0) / 2.0).abs() < 1e-14);
/// ```
pub fn legendre_at(n_max: usize, x: f64) -> (Vec<f64>, Vec<f64>) {
    let table = LegendreShapeFn::with(n_max, &[x]);
    (
        table.polys.into_iter().map(|samples| samples[0]).collect(),
        table.polys_d1.into_iter().map(|samples| samples[0]).collect(),
    )
}

/// `∫ P_i P_k` over `[-1, 1]`
#[inline]
pub fn legendre_mass(i: usize, k: usize) -> f64 {
    if i == k {
        2.0 / (2 * i + 1) as f64
    } else {
        0.0
    }
}

/// `∫ P_i' P_k'` over `[-1, 1]`
#[inline]
pub fn legendre_stiffness(i: usize, k: usize) -> f64 {
    if (i + k) % 2 == 0 {
        let m = std::cmp::min(i, k) as f64;
        m * (m + 1.0)
    } else {
        0.0
    }
}

/// Local index of the tensor-product basis function with orders `[i, j]`
#[inline]
pub fn basis_index(orders: &PolyOrders, [i, j]: [usize; 2]) -> usize {
    i * (orders.nj as usize + 1) + j
}

/// Tensor-product basis functions of an Elem sampled at the points of a tensor-product rule
///
/// Gradients are returned in real space
pub struct ElemBasis<SF: ShapeFn = LegendreShapeFn> {
    orders: PolyOrders,
    scale: [f64; 2],
    u_shape_fn: SF,
    v_shape_fn: SF,
}

/// The conforming (Lobatto) basis of an Elem
pub type LobattoBasis = ElemBasis<LobattoShapeFn>;

impl ElemBasis {
    /// Sample the Legendre basis of an Elem with the given orders (covering `rect`) at the parametric `points`
    /// (used in both directions)
    pub fn new(orders: PolyOrders, rect: &Rect, points: &[f64]) -> Self {
        Self::sampled(orders, rect, points)
    }

    /// Sample the basis of an Elem covering `rect` at a tensor-product rule mapped into `region` (a sub-rect of
    /// `rect`) instead of `rect` itself
    ///
    /// Quadrature point `[m, n]` of the rule then refers to the same location as it does in
    /// [RectQuadrature::point_in](crate::integration::RectQuadrature::point_in) with `region`
    pub fn over_region(orders: PolyOrders, rect: &Rect, region: &Rect, points: &[f64]) -> Self {
        let u_points: Vec<f64> = points
            .iter()
            .map(|t| rect.u_of(map_range(*t, -1.0, 1.0, region.min.x, region.max.x)))
            .collect();
        let v_points: Vec<f64> = points
            .iter()
            .map(|t| rect.v_of(map_range(*t, -1.0, 1.0, region.min.y, region.max.y)))
            .collect();

        Self {
            orders,
            scale: rect.parametric_scale(),
            u_shape_fn: LegendreShapeFn::with(orders.ni as usize, &u_points),
            v_shape_fn: LegendreShapeFn::with(orders.nj as usize, &v_points),
        }
    }
}

impl<SF: ShapeFn> ElemBasis<SF> {
    /// Sample the basis of an Elem from any [ShapeFn] family
    pub fn sampled(orders: PolyOrders, rect: &Rect, points: &[f64]) -> Self {
        Self {
            orders,
            scale: rect.parametric_scale(),
            u_shape_fn: SF::with(orders.ni as usize, points),
            v_shape_fn: SF::with(orders.nj as usize, points),
        }
    }

    pub fn orders(&self) -> PolyOrders {
        self.orders
    }

    pub fn num_functions(&self) -> usize {
        self.orders.num_dofs()
    }

    /// Value of the basis function with local index `idx` at quadrature point `[m, n]`
    #[inline]
    pub fn value(&self, idx: usize, [m, n]: [usize; 2]) -> f64 {
        let [i, j] = self.ij(idx);
        self.u_shape_fn.poly(i, m) * self.v_shape_fn.poly(j, n)
    }

    /// Real space gradient of the basis function with local index `idx` at quadrature point `[m, n]`
    #[inline]
    pub fn gradient(&self, idx: usize, [m, n]: [usize; 2]) -> [f64; 2] {
        let [i, j] = self.ij(idx);
        [
            self.u_shape_fn.poly_d1(i, m) * self.v_shape_fn.poly(j, n) * self.scale[0],
            self.u_shape_fn.poly(i, m) * self.v_shape_fn.poly_d1(j, n) * self.scale[1],
        ]
    }

    /// Value and gradient of the expansion described by `coefficients` at quadrature point `[m, n]`
    pub fn expand(&self, coefficients: &[f64], point: [usize; 2]) -> (f64, [f64; 2]) {
        coefficients.iter().enumerate().fold(
            (0.0, [0.0; 2]),
            |(value, [gx, gy]), (idx, c)| {
                let [dx, dy] = self.gradient(idx, point);
                (value + c * self.value(idx, point), [gx + c * dx, gy + c * dy])
            },
        )
    }

    #[inline]
    fn ij(&self, idx: usize) -> [usize; 2] {
        let nj = self.orders.nj as usize + 1;
        [idx / nj, idx % nj]
    }
}

/// Value and real space gradient of an Elem-local expansion at an arbitrary point in `rect`
pub fn expand_at(orders: &PolyOrders, rect: &Rect, coefficients: &[f64], point: &Point) -> (f64, [f64; 2]) {
    let (pu, pu_d1) = legendre_at(orders.ni as usize, rect.u_of(point.x));
    let (pv, pv_d1) = legendre_at(orders.nj as usize, rect.v_of(point.y));
    let [su, sv] = rect.parametric_scale();

    orders
        .permutations()
        .zip(coefficients.iter())
        .fold((0.0, [0.0; 2]), |(value, [gx, gy]), ([i, j], c)| {
            (
                value + c * pu[i] * pv[j],
                [gx + c * pu_d1[i] * pv[j] * su, gy + c * pu[i] * pv_d1[j] * sv],
            )
        })
}
