mod common;

use common::*;
use hp_adapt::adapt::ErrorEstimator;
use hp_adapt::prelude::*;

#[test]
fn gaussian_poisson_adaptivity() {
    init_logging();

    // quadratic elems, one pre-refinement, θ = 0.3, 1% tolerance, 100,000 DoF ceiling
    let config = AdaptivityConfig::default();
    let adaptivity = Adaptivity::new(config).unwrap();
    let width = 50.0;
    let mut domain = unit_domain(&config, gaussian_boundary(width));
    // the 3 x 3 interior nodes of the 2 x 2 quadratic grid
    assert_eq!(domain.num_dofs().unwrap(), 9);

    let mut solver = NewtonSolver::new(gaussian_poisson_form(width), NewtonConfig::default()).unwrap();
    let exact = gaussian_field(width);
    let mut history = ConvergenceHistory::new();

    let result = adaptivity
        .run(&mut domain, &mut solver, None, Some(&exact), &mut history)
        .unwrap();

    assert_eq!(result.termination, Termination::Converged);
    assert!(result.error_estimate < 1.0);
    assert_eq!(result.degraded_steps, 0);
    assert_eq!(result.steps, history.len());

    let records = history.records();
    assert!(records.len() > 1);
    assert!(records[0].error_estimate > 1.0);
    assert!(records.last().unwrap().error_estimate < records[0].error_estimate);
    assert!(records.last().unwrap().exact_error.unwrap() < 3.0);

    // the working space only grows, and the reference space is always richer
    assert!(records.windows(2).all(|w| w[0].ndof_coarse < w[1].ndof_coarse));
    assert!(records.iter().all(|r| r.ndof_reference > r.ndof_coarse));

    // re-estimating the returned pair reproduces the error the decision was based on
    let reestimated = ErrorEstimator::new(config.error_norm, config.error_measure)
        .estimate(&result.coarse, &result.reference)
        .unwrap()
        .rel_error_percent();
    assert!((reestimated - result.error_estimate).abs() < 1e-9 * (1.0 + result.error_estimate));
}

#[test]
fn adapted_solutions_stay_continuous() {
    init_logging();

    let width = 50.0;
    let config = AdaptivityConfig {
        tolerance: 2.0,
        ..Default::default()
    };
    let mut domain = unit_domain(&config, gaussian_boundary(width));
    let mut solver = NewtonSolver::new(gaussian_poisson_form(width), NewtonConfig::default()).unwrap();

    let result = Adaptivity::new(config)
        .unwrap()
        .run(&mut domain, &mut solver, None, None, &mut ConvergenceHistory::new())
        .unwrap();

    // the adapted Mesh is irregular
    assert!(result.coarse.domain().dof_map().num_hanging() > 0);

    for solution in [&result.coarse, &result.reference] {
        for line in [0.25, 0.375, 0.5, 0.625, 0.75] {
            for k in 0..40 {
                let along = (k as f64 + 0.5) / 40.0;
                let across = |a: f64| Point::new(a, along);
                let jump_x = solution.value(&across(line - 1e-12)) - solution.value(&across(line + 1e-12));
                let jump_y = solution.value(&Point::new(along, line - 1e-12))
                    - solution.value(&Point::new(along, line + 1e-12));
                assert!(jump_x.abs() < 1e-8 && jump_y.abs() < 1e-8, "jump at {} / {}", line, along);
            }
        }

        // boundary values come from the exact solution
        for p in [Point::new(0.0, 0.3), Point::new(0.7, 1.0)] {
            assert!((solution.value(&p) - gaussian(&p, width)).abs() < 1e-3);
        }
    }
}

#[test]
fn readme_poisson_problem() {
    init_logging();

    let config = AdaptivityConfig::default();
    let mut mesh = Mesh::unit();
    config.prepare_mesh(&mut mesh).unwrap();
    let mut domain = Domain::with_boundary(mesh, Boundary::homogeneous()).unwrap();

    let form = WeakForm::new()
        .with(FormTerm::diffusion(1.0))
        .with(FormTerm::source(|p, _| (p.x * p.y).exp()));
    let mut solver = NewtonSolver::new(form, NewtonConfig::default()).unwrap();

    let mut history = ConvergenceHistory::new();
    let result = Adaptivity::new(config)
        .unwrap()
        .run(&mut domain, &mut solver, None, None, &mut history)
        .unwrap();

    assert_eq!(result.termination, Termination::Converged);
    assert_eq!(result.degraded_steps, 0);
    // the base space cannot resolve the solution, so a single step is not enough
    assert!(history.records()[0].error_estimate > 1.0);
    assert!(result.steps > 1);

    // -Δu ≈ 1.1 with zero boundary values peaks near 0.08 in the center
    let center = result.reference.value(&Point::new(0.5, 0.5));
    assert!(center > 0.06 && center < 0.11, "u(0.5, 0.5) = {}", center);
    assert!(result.reference.value(&Point::new(0.0, 0.5)).abs() < 1e-12);
}

#[test]
fn exact_error_decreases() {
    init_logging();

    let width = 30.0;
    let exact = gaussian_field(width);

    let config = AdaptivityConfig {
        tolerance: 2.0,
        ..Default::default()
    };
    let adaptivity = Adaptivity::new(config).unwrap();
    let mut domain = unit_domain(&config, gaussian_boundary(width));
    let mut solver = NewtonSolver::new(gaussian_poisson_form(width), NewtonConfig::default()).unwrap();
    let mut history = ConvergenceHistory::new();

    let result = adaptivity
        .run(&mut domain, &mut solver, None, Some(&exact), &mut history)
        .unwrap();

    assert_eq!(result.termination, Termination::Converged);
    assert!(result.error_estimate < 2.0);

    let exact_errors: Vec<f64> = history
        .records()
        .iter()
        .map(|r| r.exact_error.unwrap())
        .collect();
    assert!(exact_errors.len() > 1);
    assert!(exact_errors.last().unwrap() < &exact_errors[0]);

    // graph data is available for every step
    assert_eq!(history.dof_est().len(), history.len());
    assert_eq!(history.cpu_exact().len(), history.len());
}

#[test]
fn unreachable_tolerance_hits_the_ceiling() {
    init_logging();

    let width = 50.0;
    let config = AdaptivityConfig {
        tolerance: 0.0,
        dof_ceiling: 400,
        ..Default::default()
    };
    let adaptivity = Adaptivity::new(config).unwrap();
    let mut domain = unit_domain(&config, gaussian_boundary(width));
    let mut solver = NewtonSolver::new(gaussian_poisson_form(width), NewtonConfig::default()).unwrap();
    let mut history = ConvergenceHistory::new();

    let result = adaptivity
        .run(&mut domain, &mut solver, None, None, &mut history)
        .unwrap();

    assert_eq!(result.termination, Termination::DofCeiling);
    assert!(domain.num_dofs().unwrap() >= 400);
    assert!(result.error_estimate > 0.0);
}

#[test]
fn configuration_from_toml() {
    let config = AdaptivityConfig::from_toml_str(
        r#"
        initial_order = 3
        threshold = 0.25
        candidates = "HpIso"
        "#,
    )
    .unwrap();

    assert_eq!(config.initial_order, 3);
    assert_eq!(config.candidates, CandList::HpIso);
    assert_eq!(config.tolerance, 1.0);

    // a 2 x 2 grid of cubic Elems has 7 x 7 nodes
    let domain = unit_domain(&config, Boundary::Natural);
    assert_eq!(domain.num_dofs().unwrap(), 49);
    let fixed = unit_domain(&config, Boundary::homogeneous());
    assert_eq!(fixed.num_dofs().unwrap(), 25);

    assert!(matches!(
        AdaptivityConfig::from_toml_str("threshold = 1.5"),
        Err(ConfigError::ThresholdOutOfRange(_))
    ));
}
