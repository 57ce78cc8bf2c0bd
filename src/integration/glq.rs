use nalgebra::{DMatrix, SymmetricEigen};
use std::sync::OnceLock;

/// Largest Gauss-Legendre rule kept in the shared cache
pub const MAX_CACHED_GLQ_POINTS: usize = 32;

static GLQ_RULES: OnceLock<Vec<(Vec<f64>, Vec<f64>)>> = OnceLock::new();

/// 2D Gauss Legendre Quadrature integral of some function F defined over an m by n rectangular region.
/// ```
/// use hp_adapt::integration::glq::*;
///
/// // define glq points over `(-1, 1)` in both directions
/// let (u_points, u_weights) = gauss_quadrature_points(10);
/// let (v_points, v_weights) = gauss_quadrature_points(10);
///
/// // compute the integral of (u^2 * v^2)
/// let solution = real_gauss_quad(&u_weights, &v_weights, |m, n| {
///    u_points[m].powi(2) * v_points[n].powi(2)
/// });
///
/// assert!((solution - 4.0 / 9.0).abs() < 1e-12);
///
/// ```
pub fn real_gauss_quad<F>(u_weights: &[f64], v_weights: &[f64], integrand: F) -> f64
where
    F: Fn(usize, usize) -> f64,
{
    let mut solution = 0.0;
    for (m, u_w) in u_weights.iter().enumerate() {
        let mut inner_solution = 0.0;
        for (n, v_w) in v_weights.iter().enumerate() {
            inner_solution += integrand(m, n) * v_w;
        }
        solution += inner_solution * u_w;
    }
    solution
}

/// Get a set of n Gauss-Legendre-Quadrature Integration points and weights over the range `(-1, 1)`
///
/// ```
/// use hp_adapt::integration::glq::*;
///
/// let (points, weights) = gauss_quadrature_points(10);
/// assert_eq!(points.len(), 10);
/// assert_eq!(weights.len(), 10);
/// assert!(points.iter().sum::<f64>().abs() < 1e-12);
/// assert!((weights.iter().sum::<f64>() - 2.0).abs() < 1e-12);
/// ```
// https://en.wikipedia.org/wiki/Gaussian_quadrature#Gauss%E2%80%93Legendre_quadrature
pub fn gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n > 0, "GLQ rules need at least one point; Cannot generate GLQ points!");

    let betas: Vec<f64> = (1..n)
        .map(|i| 0.5 / (1.0 - (2.0 * i as f64).powi(-2)).sqrt())
        .collect();

    let polymat: DMatrix<f64> = DMatrix::from_fn(n, n, |r, c| {
        if r == c + 1 {
            betas[r - 1]
        } else if c == r + 1 {
            betas[c - 1]
        } else {
            0.0
        }
    });

    let eigen_decomp = SymmetricEigen::new(polymat);

    let mut xw: Vec<(f64, f64)> = eigen_decomp
        .eigenvalues
        .iter()
        .cloned()
        .zip(
            eigen_decomp
                .eigenvectors
                .row(0)
                .iter()
                .map(|weight| (*weight).powi(2) * 2.0),
        )
        .collect();

    xw.sort_by(|a, b| a.0.total_cmp(&b.0));

    xw.drain(0..).unzip()
}

/// Get the n point Gauss-Legendre rule from a shared cache (computing it if `n` is larger than the cache)
pub fn cached_gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    let rules = GLQ_RULES.get_or_init(|| {
        (1..=MAX_CACHED_GLQ_POINTS)
            .map(gauss_quadrature_points)
            .collect()
    });

    match rules.get(n.wrapping_sub(1)) {
        Some(rule) => rule.clone(),
        None => gauss_quadrature_points(n),
    }
}
