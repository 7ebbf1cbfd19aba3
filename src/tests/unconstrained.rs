use faer::Col;
use rstest::rstest;

use crate::settings::HessianEval;
use crate::tests::fixtures::rosenbrock_problem;
use crate::{E, Settings, Solver, Status};

#[test]
fn test_rosenbrock_solve() {
    let problem = rosenbrock_problem();

    let mut solver = Solver::new(problem, Settings::default(), Col::zeros(2), None).unwrap();

    // 100 iterations should be plenty
    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 1.).abs() < 1e-6);
    assert!((solution.primal()[1] - 1.).abs() < 1e-6);
}

#[rstest]
fn test_rosenbrock_quasi_newton(
    #[values(HessianEval::SimpleBfgs, HessianEval::DampedBfgs, HessianEval::Sr1)]
    hessian_eval: HessianEval,
) {
    let problem = rosenbrock_problem();

    let mut settings = Settings::default();
    settings.hessian_eval = hessian_eval;
    settings.quasi_newton_num_iterates = 10;

    let mut solver = Solver::new(problem, settings, Col::zeros(2), None).unwrap();

    solver.solve(Some(2000), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 1.).abs() < 1e-4);
    assert!((solution.primal()[1] - 1.).abs() < 1e-4);
}

#[test]
fn test_quadratic_without_newton_step() {
    let problem = crate::tests::fixtures::quad_problem();

    let mut settings = Settings::default();
    settings.perform_newton_step = false;

    let start = Col::from_fn(2, |i| [5., 3.][i]);

    let mut solver = Solver::new(problem, settings, start, None).unwrap();

    solver.solve(Some(5000), None).unwrap();

    // Cauchy-only steps converge, if considerably slower
    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!(solution.primal()[0].abs() < 1e-4);
    assert!(solution.primal()[1].abs() < 1e-4);
}

#[rstest]
fn test_rosenbrock_parametric_cauchy(
    #[values(
        crate::settings::ParametricCauchy::Coarse,
        crate::settings::ParametricCauchy::Fine
    )]
    parametric_cauchy: crate::settings::ParametricCauchy,
) {
    let problem = rosenbrock_problem();

    let mut settings = Settings::default();
    settings.parametric_cauchy = parametric_cauchy;

    let mut solver = Solver::new(problem, settings, Col::zeros(2), None).unwrap();

    solver.solve(Some(200), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 1.).abs() < 1e-6);
    assert!((solution.primal()[1] - 1.).abs() < 1e-6);
}

#[test]
fn test_rosenbrock_with_deriv_check() {
    let problem = rosenbrock_problem();

    let mut settings = Settings::default();
    settings.deriv_check = crate::settings::DERIV_CHECK_FIRST;
    settings.deriv_tol = 1e-2;

    let mut solver = Solver::new(problem, settings, Col::zeros(2), None).unwrap();

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);
}

#[test]
fn test_iteration_limit() {
    let problem = rosenbrock_problem();

    let mut solver = Solver::new(problem, Settings::default(), Col::zeros(2), None).unwrap();

    solver.solve(Some(1), None).unwrap();

    assert_eq!(solver.status(), Status::AbortIter);
    assert_eq!(solver.iterations(), 1);
}

#[test]
fn test_abort_from_callback() {
    use crate::callback::SolverEvent;

    let problem = rosenbrock_problem();

    let mut solver = Solver::new(problem, Settings::default(), Col::zeros(2), None).unwrap();

    solver.add_callback(
        SolverEvent::PerformedIteration,
        Box::new(|context| {
            if context.iteration >= 2 {
                context.abort.abort();
            }
        }),
    );

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::AbortManual);
}

#[test]
fn test_trust_radii_stay_above_deadpoint() {
    use crate::callback::SolverEvent;
    use crate::solver::SolverStateReal;
    use std::cell::Cell;
    use std::rc::Rc;

    let problem = rosenbrock_problem();

    let settings = Settings::default();
    let deadpoint_bound = settings.deadpoint_bound;

    let mut solver = Solver::new(problem, settings, Col::zeros(2), None).unwrap();

    let valid = Rc::new(Cell::new(true));

    {
        let valid = valid.clone();

        solver.add_callback(
            SolverEvent::PerformedIteration,
            Box::new(move |context| {
                if context.trust_radius <= deadpoint_bound
                    || context.lp_trust_radius <= deadpoint_bound
                {
                    valid.set(false);
                }
            }),
        );
    }

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);
    assert!(valid.get());

    assert!(solver.real_state(SolverStateReal::TrustRadius) > deadpoint_bound);
    assert!(solver.real_state(SolverStateReal::LpTrustRadius) > deadpoint_bound);
}

#[test]
fn test_unbounded_detection() {
    use crate::func::ClosureFunc;
    use crate::problem::Problem;

    // An affine objective decreasing without bound
    let func = ClosureFunc::new(
        1,
        0,
        |x| -x[0],
        |_| Col::from_fn(1, |_| -1.),
        None,
        None,
        |_, _, _, _| Col::zeros(1),
    )
    .into_shared();

    let problem = Problem::new_simple(
        func,
        Col::from_fn(1, |_| E::NEG_INFINITY),
        Col::from_fn(1, |_| E::INFINITY),
        Col::zeros(0),
        Col::zeros(0),
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.obj_lower = -1e6;

    let mut solver = Solver::new(problem, settings, Col::zeros(1), None).unwrap();

    solver.solve(None, Some(10.)).unwrap();

    assert_eq!(solver.status(), Status::Unbounded);
}
