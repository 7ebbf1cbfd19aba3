//! The initial feasibility correction onto the working-set manifold.
//!
//! The minimum-norm solution of the active rows seeds every EQP solve:
//! the CG or LSQR core searches within the ball of reduced radius around
//! it, inside the null space of the active constraints.

use faer::Col;

use crate::aug_jac::{self, AugJac};
use crate::direction::Direction;
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::{E, Result, Settings};

const NORM_RATIO: E = 0.8;

pub struct WorkingStep {
    problem: SharedProblem,
    eps: E,

    step_direction: Direction,

    /// Linearized constraint values at the initial step.
    initial_cons_val: Col<E>,

    /// Signed multipliers of constraints violated at the initial step.
    violated_cons_multipliers: Col<E>,

    reduced_trust_radius: E,
    initial_step_in_working_set: bool,
}

impl WorkingStep {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Self {
        let num_cons = problem.num_cons();
        let step_direction = Direction::zeros(&problem);

        Self {
            problem,
            eps: settings.eps,
            step_direction,
            initial_cons_val: Col::zeros(num_cons),
            violated_cons_multipliers: Col::zeros(num_cons),
            reduced_trust_radius: 0.,
            initial_step_in_working_set: true,
        }
    }

    /// Computes the initial step for the given iterate, augmented
    /// Jacobian, trust radius, and penalty.
    pub fn set_iterate(
        &mut self,
        iterate: &Iterate,
        jacobian: &dyn AugJac,
        trust_radius: E,
        penalty: E,
    ) -> Result<()> {
        let rhs = aug_jac::active_bound_rhs(&self.problem, iterate, iterate.working_set());

        let initial_direction = jacobian.solve_min_norm(&rhs)?;

        self.compute_initial_step(iterate, initial_direction, trust_radius)?;

        // Linearized constraint values at the initial direction
        self.initial_cons_val = iterate.cons_val() + self.step_direction.cons_jac_prod();

        self.violated_cons_multipliers = Iterate::violated_cons_multipliers(
            &self.problem,
            &self.initial_cons_val,
            iterate.working_set(),
            penalty,
        );

        Ok(())
    }

    fn compute_initial_step(
        &mut self,
        iterate: &Iterate,
        initial_direction: Col<E>,
        trust_radius: E,
    ) -> Result<()> {
        let initial_norm = initial_direction.norm_l2();

        self.step_direction.set_primal(initial_direction);
        self.initial_step_in_working_set = true;

        if initial_norm != 0. {
            let alpha = ((NORM_RATIO * trust_radius) / initial_norm).min(1.);

            if (alpha - 1.).abs() <= self.eps {
                // no scaling required
                let initial_norm_sq = initial_norm * initial_norm;
                let trust_radius_sq = trust_radius * trust_radius;

                self.reduced_trust_radius = (trust_radius_sq - initial_norm_sq).max(0.).sqrt();
            } else {
                self.initial_step_in_working_set = false;

                let mut primal = self.step_direction.primal().clone();
                primal = alpha * primal;
                self.step_direction.set_primal(primal);

                // the scaled initial step has norm norm_ratio * trust_radius
                self.reduced_trust_radius =
                    trust_radius * (1. - NORM_RATIO * NORM_RATIO).sqrt();
            }
        } else {
            self.reduced_trust_radius = trust_radius;
        }

        // Fill the products tied to the step (Hessian product is set once
        // multipliers are known).
        let zero_duals = Col::zeros(self.problem.num_cons());
        self.step_direction
            .reset(&self.problem, iterate, zero_duals.as_ref())?;

        Ok(())
    }

    /// Recomputes the Hessian product of the initial step once multipliers
    /// are available.
    pub fn set_multipliers(
        &mut self,
        iterate: &Iterate,
        multipliers: &Col<E>,
    ) -> Result<()> {
        self.step_direction
            .reset(&self.problem, iterate, multipliers.as_ref())?;

        Ok(())
    }

    pub fn direction(&self) -> &Direction {
        &self.step_direction
    }

    pub fn reduced_trust_radius(&self) -> E {
        self.reduced_trust_radius
    }

    pub fn in_working_set(&self) -> bool {
        self.initial_step_in_working_set
    }

    pub fn violated_cons_multipliers(&self) -> &Col<E> {
        &self.violated_cons_multipliers
    }

    /// The objective offset of the EQP model at the initial step: current
    /// objective plus the penalized violation of the linearized
    /// constraints there.
    pub fn newton_obj_offset(&self, iterate: &Iterate, penalty: E) -> E {
        iterate.obj_val() + penalty * self.problem.total_violation(&self.initial_cons_val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aug_jac::StandardAugJac;
    use crate::func::{ClosureFunc, ValueReason};
    use crate::linalg::lu::SimplicialSparseLu;
    use crate::problem::Problem;
    use crate::working_set::ActiveState;

    #[test]
    fn test_initial_step_reaches_active_bound() {
        let func = ClosureFunc::new(
            2,
            0,
            |x| x[0] + x[1],
            |_| Col::from_fn(2, |_| 1.),
            None,
            None,
            |_, _, _, _| Col::zeros(2),
        )
        .into_shared();

        let problem = Problem::new_simple(
            func,
            Col::zeros(2),
            Col::from_fn(2, |_| 2.),
            Col::zeros(0),
            Col::zeros(0),
        )
        .unwrap();

        let x = Col::from_fn(2, |i| [0.5, 1.][i]);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        iterate
            .working_set_mut()
            .add_variable(0, ActiveState::ActiveLower);

        let mut jacobian = StandardAugJac::<SimplicialSparseLu>::new(problem.clone());
        jacobian.set_iterate(&iterate).unwrap();

        let settings = Settings::default();
        let mut step = WorkingStep::new(problem.clone(), &settings);

        let trust_radius = 10.;
        step.set_iterate(&iterate, &jacobian, trust_radius, 1.)
            .unwrap();

        // min-norm step onto x0 = 0 is (-0.5, 0)
        let primal = step.direction().primal();
        assert!((primal[0] + 0.5).abs() < 1e-10);
        assert!(primal[1].abs() < 1e-10);

        assert!(step.in_working_set());

        let expected = (trust_radius * trust_radius - 0.25).sqrt();
        assert!((step.reduced_trust_radius() - expected).abs() < 1e-10);
    }

    #[test]
    fn test_initial_step_is_scaled_to_norm_ratio() {
        let func = ClosureFunc::new(
            1,
            0,
            |x| x[0],
            |_| Col::from_fn(1, |_| 1.),
            None,
            None,
            |_, _, _, _| Col::zeros(1),
        )
        .into_shared();

        let problem = Problem::new_simple(
            func,
            Col::zeros(1),
            Col::from_fn(1, |_| 10.),
            Col::zeros(0),
            Col::zeros(0),
        )
        .unwrap();

        let x = Col::from_fn(1, |_| 5.);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        iterate
            .working_set_mut()
            .add_variable(0, ActiveState::ActiveLower);

        let mut jacobian = StandardAugJac::<SimplicialSparseLu>::new(problem.clone());
        jacobian.set_iterate(&iterate).unwrap();

        let settings = Settings::default();
        let mut step = WorkingStep::new(problem.clone(), &settings);

        // The min-norm correction (-5) exceeds 0.8 * radius = 0.8
        let trust_radius = 1.;
        step.set_iterate(&iterate, &jacobian, trust_radius, 1.)
            .unwrap();

        assert!(!step.in_working_set());

        let norm = step.direction().primal().norm_l2();
        assert!((norm - 0.8).abs() < 1e-10);

        let expected = trust_radius * (1. - 0.64 as E).sqrt();
        assert!((step.reduced_trust_radius() - expected).abs() < 1e-10);
    }
}
