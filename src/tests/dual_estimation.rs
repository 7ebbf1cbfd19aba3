use faer::Col;

use crate::aug_jac::{AugJac, StandardAugJac};
use crate::dual_estimation::DualEstimation;
use crate::func::ValueReason;
use crate::iterate::Iterate;
use crate::linalg::lu::SimplicialSparseLu;
use crate::settings::DualEstimationType;
use crate::tests::fixtures::quad_problem;
use crate::working_set::ActiveState;
use crate::Settings;

#[test]
fn test_simply_constrained_dual_estimation() {
    let problem = quad_problem();

    let x = Col::zeros(2);
    problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

    let mut iterate = Iterate::new(&problem, x);
    iterate.evaluate(&problem).unwrap();

    // Gradient at the origin
    assert_eq!(iterate.obj_grad()[0], 2.);
    assert_eq!(iterate.obj_grad()[1], 4.);

    // Both variables rest at their lower bounds
    iterate
        .working_set_mut()
        .add_variable(0, ActiveState::ActiveLower);
    iterate
        .working_set_mut()
        .add_variable(1, ActiveState::ActiveLower);

    let mut aug_jac = StandardAugJac::<SimplicialSparseLu>::new(problem.clone());
    aug_jac.set_iterate(&iterate).unwrap();

    let mut settings = Settings::default();
    settings.dual_estimation_type = DualEstimationType::Lsq;

    let estimation = DualEstimation::new(problem.clone(), &settings);

    let cauchy = crate::cauchy::box_constrained::BoxCauchy::new(problem.clone());

    estimation
        .compute(&mut iterate, &aug_jac, &cauchy)
        .unwrap();

    let tolerance = 1e-8;

    assert!((iterate.vars_dual()[0] + 2.).abs() < tolerance);
    assert!((iterate.vars_dual()[1] + 4.).abs() < tolerance);

    // The estimates respect the KKT sign convention of the working set
    assert!(estimation.signs_consistent(&iterate, 1e-8));
}

#[test]
fn test_lsq_estimation_splits_gradient() {
    // With only one active bound, the projection splits the gradient into
    // the active-row multiplier and the null-space residual.
    let problem = quad_problem();

    let x = Col::zeros(2);
    problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

    let mut iterate = Iterate::new(&problem, x);
    iterate.evaluate(&problem).unwrap();

    iterate
        .working_set_mut()
        .add_variable(0, ActiveState::ActiveLower);

    let mut aug_jac = StandardAugJac::<SimplicialSparseLu>::new(problem.clone());
    aug_jac.set_iterate(&iterate).unwrap();

    let mut settings = Settings::default();
    settings.dual_estimation_type = DualEstimationType::Lsq;

    let estimation = DualEstimation::new(problem.clone(), &settings);

    let cauchy = crate::cauchy::box_constrained::BoxCauchy::new(problem.clone());

    estimation
        .compute(&mut iterate, &aug_jac, &cauchy)
        .unwrap();

    assert!((iterate.vars_dual()[0] + 2.).abs() < 1e-8);
    assert_eq!(iterate.vars_dual()[1], 0.);
}
