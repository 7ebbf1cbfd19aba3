use std::cell::Cell;
use std::rc::Rc;

use faer::Col;
use rstest::rstest;

use crate::callback::SolverEvent;
use crate::settings::{DualEstimationType, LineSearchType, StepRuleType};
use crate::solver::SolverStateReal;
use crate::tests::fixtures::equality_qp_problem;
use crate::{Settings, Solver, Status};

#[rstest]
fn test_equality_qp(
    #[values(DualEstimationType::Lp, DualEstimationType::Lsq, DualEstimationType::Mixed)]
    dual_estimation_type: DualEstimationType,
) {
    let problem = equality_qp_problem();

    let mut settings = Settings::default();
    settings.dual_estimation_type = dual_estimation_type;

    let mut solver = Solver::new(problem, settings, Col::zeros(2), None).unwrap();

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 0.5).abs() < 1e-6);
    assert!((solution.primal()[1] - 0.5).abs() < 1e-6);

    // Stationarity fixes the constraint dual at minus one
    assert!((solution.cons_dual()[0] + 1.).abs() < 1e-4);

    assert!(solver.real_state(SolverStateReal::FeasRes) < 1e-6);
    assert!(solver.real_state(SolverStateReal::StatRes) < 1e-6);
    assert!(solver.real_state(SolverStateReal::SlackRes) < 1e-6);
}

#[rstest]
fn test_equality_qp_step_rules(
    #[values(StepRuleType::Direct, StepRuleType::Window, StepRuleType::Minstep)]
    step_rule: StepRuleType,
    #[values(LineSearchType::Exact, LineSearchType::Approx)] linesearch: LineSearchType,
) {
    let problem = equality_qp_problem();

    let mut settings = Settings::default();
    settings.step_rule = step_rule;
    settings.linesearch = linesearch;

    let mut solver = Solver::new(problem, settings, Col::zeros(2), None).unwrap();

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 0.5).abs() < 1e-6);
    assert!((solution.primal()[1] - 0.5).abs() < 1e-6);
}

#[test]
fn test_penalty_is_monotone() {
    let problem = equality_qp_problem();

    let mut solver = Solver::new(
        problem,
        Settings::default(),
        Col::from_fn(2, |_| 5.),
        None,
    )
    .unwrap();

    let last_penalty = Rc::new(Cell::new(0.));
    let monotone = Rc::new(Cell::new(true));

    {
        let last_penalty = last_penalty.clone();
        let monotone = monotone.clone();

        solver.add_callback(
            SolverEvent::PerformedIteration,
            Box::new(move |context| {
                if context.penalty < last_penalty.get() {
                    monotone.set(false);
                }

                last_penalty.set(context.penalty);
            }),
        );
    }

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);
    assert!(monotone.get());
}

#[test]
fn test_accepted_iterate_callbacks_fire() {
    let problem = equality_qp_problem();

    let mut solver = Solver::new(problem, Settings::default(), Col::zeros(2), None).unwrap();

    let accepted = Rc::new(Cell::new(0usize));
    let finished = Rc::new(Cell::new(0usize));

    {
        let accepted = accepted.clone();
        solver.add_callback(
            SolverEvent::AcceptedIterate,
            Box::new(move |_| accepted.set(accepted.get() + 1)),
        );
    }

    {
        let finished = finished.clone();
        solver.add_callback(
            SolverEvent::Finished,
            Box::new(move |_| finished.set(finished.get() + 1)),
        );
    }

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);
    assert!(accepted.get() > 0);
    assert_eq!(finished.get(), 1);
}

#[test]
fn test_inequality_qp_with_linear_row() {
    use faer::sparse::{SparseColMat, Triplet};

    use crate::func::ClosureFunc;
    use crate::problem::Problem;
    use crate::E;

    // min (x0 - 2)^2 + (x1 - 2)^2 subject to the linear row x0 + x1 <= 2:
    // optimum at (1, 1)
    let func = ClosureFunc::new(
        2,
        0,
        |x| (x[0] - 2.).powi(2) + (x[1] - 2.).powi(2),
        |x| Col::from_fn(2, |i| 2. * (x[i] - 2.)),
        None,
        None,
        |_, obj_dual, d, _| Col::from_fn(2, |i| 2. * obj_dual * d[i]),
    )
    .into_shared();

    let linear = SparseColMat::try_new_from_triplets(
        1,
        2,
        &[Triplet::new(0usize, 0usize, 1.), Triplet::new(0, 1, 1.)],
    )
    .unwrap();

    let problem = Problem::new(
        func,
        Col::from_fn(2, |_| E::NEG_INFINITY),
        Col::from_fn(2, |_| E::INFINITY),
        Col::zeros(0),
        Col::zeros(0),
        linear,
        Col::from_fn(1, |_| E::NEG_INFINITY),
        Col::from_fn(1, |_| 2.),
    )
    .unwrap();

    let mut solver = Solver::new(problem, Settings::default(), Col::zeros(2), None).unwrap();

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 1.).abs() < 1e-6);
    assert!((solution.primal()[1] - 1.).abs() < 1e-6);

    // The row is active at its upper bound with a positive dual
    assert!(solution.cons_dual()[0] > 0.);
}

#[test]
fn test_solve_with_scaling() {
    use crate::scaling::Scaling;

    let problem = equality_qp_problem();

    let scaling = Scaling::new(1, vec![1, -1], vec![2]);

    let mut solver = Solver::new(
        problem,
        Settings::default(),
        Col::zeros(2),
        Some(scaling),
    )
    .unwrap();

    solver.solve(Some(200), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    // The solution is reported in the original space
    assert!((solution.primal()[0] - 0.5).abs() < 1e-5);
    assert!((solution.primal()[1] - 0.5).abs() < 1e-5);
}
