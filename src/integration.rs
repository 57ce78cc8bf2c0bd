/// Methods to assist in Gauss-Legendre-Quadrature integration
pub mod glq;

use crate::domain::mesh::space::{Point, Rect};
use glq::{cached_gauss_quadrature_points, real_gauss_quad};

/// A quadrature point mapped into Real Space
#[derive(Clone, Copy, Debug)]
pub struct QuadPoint {
    /// Index of the point in the tensor-product rule
    pub index: [usize; 2],
    pub location: Point,
    /// Quadrature weight, scaled by the area of the Rect
    pub weight: f64,
}

/// A tensor-product Gauss-Legendre rule that can be mapped onto any [Rect]
#[derive(Clone, Debug)]
pub struct RectQuadrature {
    points: Vec<f64>,
    weights: Vec<f64>,
}

impl RectQuadrature {
    /// An `n` x `n` point rule
    pub fn new(n: usize) -> Self {
        let (points, weights) = cached_gauss_quadrature_points(n);
        Self { points, weights }
    }

    /// A rule able to integrate products of two polynomials of order `max_order` (plus some headroom for
    /// non-polynomial coefficients) exactly
    pub fn for_order(max_order: usize) -> Self {
        Self::new(max_order + 3)
    }

    /// Number of points in each direction
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Points in the parametric range `(-1, 1)`
    pub fn parametric_points(&self) -> &[f64] {
        &self.points
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// The real space location of the quadrature point `[m, n]` in `rect`
    #[inline]
    pub fn point_in(&self, rect: &Rect, [m, n]: [usize; 2]) -> Point {
        Point::new(
            rect.min.x + (self.points[m] + 1.0) * rect.width() / 2.0,
            rect.min.y + (self.points[n] + 1.0) * rect.height() / 2.0,
        )
    }

    /// Integrate a function of real space over `rect`
    ///
    /// ```
    /// use hp_adapt::integration::RectQuadrature;
    /// use hp_adapt::domain::mesh::space::{Point, Rect};
    ///
    /// let rect = Rect::new(Point::new(0.0, 1.0), Point::new(2.0, 2.0));
    /// let quad = RectQuadrature::new(4);
    ///
    /// // ∫∫ x*y dx dy over [0, 2] x [1, 2]
    /// let solution = quad.integrate(&rect, |p| p.x * p.y);
    /// assert!((solution - 3.0).abs() < 1e-12);
    /// ```
    pub fn integrate<F>(&self, rect: &Rect, integrand: F) -> f64
    where
        F: Fn(Point) -> f64,
    {
        let jacobian = rect.area() / 4.0;
        real_gauss_quad(&self.weights, &self.weights, |m, n| {
            integrand(self.point_in(rect, [m, n]))
        }) * jacobian
    }

    /// All quadrature points of the rule mapped into `rect`
    pub fn points_in(&self, rect: &Rect) -> Vec<QuadPoint> {
        let mut points = Vec::with_capacity(self.points.len() * self.points.len());
        self.for_each_point(rect, |index, location, weight| {
            points.push(QuadPoint {
                index,
                location,
                weight,
            })
        });
        points
    }

    /// Visit every quadrature point in `rect` with its real space location and its (scaled) weight
    pub fn for_each_point<F>(&self, rect: &Rect, mut visit: F)
    where
        F: FnMut([usize; 2], Point, f64),
    {
        let jacobian = rect.area() / 4.0;
        for (m, u_w) in self.weights.iter().enumerate() {
            for (n, v_w) in self.weights.iter().enumerate() {
                visit([m, n], self.point_in(rect, [m, n]), u_w * v_w * jacobian);
            }
        }
    }
}
