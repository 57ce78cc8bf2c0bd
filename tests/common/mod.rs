//! Shared setup for the adaptivity scenario tests
#![allow(dead_code)]

use hp_adapt::prelude::*;
use simplelog::{Config, LevelFilter, TestLogger};

/// Route `log` output through the test harness (repeated calls are harmless)
pub fn init_logging() {
    let _ = TestLogger::init(LevelFilter::Info, Config::default());
}

/// A Gaussian bump centered in the unit square
pub fn gaussian(p: &Point, width: f64) -> f64 {
    (-width * ((p.x - 0.5).powi(2) + (p.y - 0.5).powi(2))).exp()
}

pub fn gaussian_gradient(p: &Point, width: f64) -> [f64; 2] {
    let g = gaussian(p, width);
    [-2.0 * width * (p.x - 0.5) * g, -2.0 * width * (p.y - 0.5) * g]
}

/// `-Δ` of the Gaussian bump
pub fn gaussian_laplacian_source(p: &Point, width: f64) -> f64 {
    let r_sq = (p.x - 0.5).powi(2) + (p.y - 0.5).powi(2);
    (4.0 * width - 4.0 * width * width * r_sq) * gaussian(p, width)
}

pub fn gaussian_field(width: f64) -> AnalyticField {
    AnalyticField::new(move |p| gaussian(p, width), move |p| gaussian_gradient(p, width))
}

/// The unit square, prepared with the configuration's initial orders and refinements
pub fn unit_domain(config: &AdaptivityConfig, boundary: Boundary) -> Domain {
    let mut mesh = Mesh::unit();
    config
        .prepare_mesh(&mut mesh)
        .expect("initial refinements should be valid on the unit square");
    Domain::with_boundary(mesh, boundary).expect("the unit square is a conforming grid")
}

/// Poisson's equation `-Δu = f` whose exact solution is the Gaussian bump
///
/// Pair with [gaussian_boundary] so the boundary values match the exact solution
pub fn gaussian_poisson_form(width: f64) -> WeakForm {
    WeakForm::new()
        .with(FormTerm::diffusion(1.0))
        .with(FormTerm::source(move |p, _| gaussian_laplacian_source(p, width)))
}

pub fn gaussian_boundary(width: f64) -> Boundary {
    Boundary::essential(move |p| gaussian(p, width))
}

/// Boundary values (and initial condition) of the heat transfer problem on `(-10, 10)^2`
pub fn heat_boundary_value(p: &Point) -> f64 {
    (p.x + 10.0) * (p.y + 10.0) / 100.0
}

pub fn heat_initial_condition() -> AnalyticField {
    AnalyticField::new(heat_boundary_value, |p| {
        [(p.y + 10.0) / 100.0, (p.x + 10.0) / 100.0]
    })
}

/// The square `(-10, 10)^2` as a single base Element, prepared by the configuration, with the heat boundary values
pub fn heat_domain(config: &AdaptivityConfig) -> Domain {
    let mut mesh = Mesh::rectangular(Rect::new(Point::new(-10.0, -10.0), Point::new(10.0, 10.0)), [1, 1]);
    config
        .prepare_mesh(&mut mesh)
        .expect("initial refinements should be valid on the square");
    Domain::with_boundary(mesh, Boundary::essential(heat_boundary_value))
        .expect("the square is a conforming grid")
}

/// Nonlinear heat transfer: `du/dt - ∇·(λ(u) ∇u) = 1` with `λ(u) = 1 + u^4`
pub fn nonlinear_heat_form() -> WeakForm {
    WeakForm::new()
        .with(FormTerm::nonlinear_diffusion(
            |u| 1.0 + u.powi(4),
            |u| 4.0 * u.powi(3),
        ))
        .with(FormTerm::source(|_, _| 1.0))
}
