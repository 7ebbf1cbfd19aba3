use faer::Col;

use crate::tests::fixtures::{wachbieg_initial, wachbieg_optimal, wachbieg_problem};
use crate::{Settings, Solver, Status};

#[test]
fn test_wachbieg_with_restoration() {
    let problem = wachbieg_problem();

    let mut settings = Settings::default();
    settings.enable_restoration_phase = true;

    let mut solver = Solver::new(problem, settings, wachbieg_initial(), None).unwrap();

    solver.solve(None, Some(30.)).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();
    let optimal = wachbieg_optimal();

    for j in 0..3 {
        assert!(
            (solution.primal()[j] - optimal[j]).abs() < 1e-6,
            "variable {} is {}, expected {}",
            j,
            solution.primal()[j],
            optimal[j]
        );
    }

    assert!(solver.violated_constraints(&solution).unwrap().is_empty());
}

#[test]
fn test_wachbieg_from_feasible_start() {
    let problem = wachbieg_problem();

    // A feasible starting point satisfying both equalities
    let initial = Col::from_fn(3, |i| [1., 2., 0.5][i]);

    let mut solver = Solver::new(problem, Settings::default(), initial, None).unwrap();

    solver.solve(None, Some(30.)).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();
    let optimal = wachbieg_optimal();

    for j in 0..3 {
        assert!((solution.primal()[j] - optimal[j]).abs() < 1e-6);
    }
}

#[test]
fn test_restoration_problem_reduces_violation() {
    use crate::func::ValueReason;
    use crate::solver::restoration::restoration_problem;
    use crate::SolverPhase;

    let problem = wachbieg_problem();

    let restoration = restoration_problem(&problem).unwrap();

    // Solve the restoration problem directly from the infeasible start
    let callbacks = std::rc::Rc::new(std::cell::RefCell::new(
        crate::callback::CallbackHandler::new(),
    ));

    let mut settings = Settings::default();
    settings.tr_solver = crate::settings::TrSolver::Lsqr;

    let mut restoration_solver = crate::problem_solver::ProblemSolver::new(
        restoration,
        &settings,
        SolverPhase::Restoration,
        wachbieg_initial(),
        callbacks,
        crate::callback::AbortHandle::new(),
        None,
    )
    .unwrap();

    restoration_solver
        .evaluate_iterate(ValueReason::Restoration)
        .unwrap();

    let initial_violation = restoration_solver.iterate().obj_val();
    assert!(initial_violation > 0.);

    restoration_solver.solve(Some(200), None, false).unwrap();

    assert_eq!(restoration_solver.status(), Status::Optimal);

    // The restoration phase drives the violation below the feasibility
    // tolerance
    let final_violation = restoration_solver.iterate().obj_val();

    assert!((2. * final_violation).sqrt() <= settings.feas_tol);

    // The restored point respects the variable bounds
    let primal = restoration_solver.iterate().primal();
    assert!(primal[1] >= 0.);
    assert!(primal[2] >= 0.);
}
