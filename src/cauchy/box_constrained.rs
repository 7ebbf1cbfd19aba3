//! Cauchy variant for problems with variable bounds only: the LP is
//! separable and solved in closed form, without slack columns.

use faer::Col;

use crate::cauchy::{Cauchy, CauchyObjectiveType};
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::working_set::{ActiveState, WorkingSet};
use crate::{E, Result, SleqpError};

pub struct BoxCauchy {
    problem: SharedProblem,
    trust_radius: E,
    base_obj: E,
    obj_val: E,
    primal: Col<E>,
    gradient: Option<Col<E>>,
    direction: Col<E>,
    /// The gradient used in the most recent solve.
    solved_gradient: Col<E>,
}

impl BoxCauchy {
    pub fn new(problem: SharedProblem) -> Self {
        let num_vars = problem.num_vars();

        Self {
            problem,
            trust_radius: 0.,
            base_obj: 0.,
            obj_val: 0.,
            primal: Col::zeros(num_vars),
            gradient: None,
            direction: Col::zeros(num_vars),
            solved_gradient: Col::zeros(num_vars),
        }
    }
}

impl Cauchy for BoxCauchy {
    fn set_iterate(&mut self, iterate: &Iterate, trust_radius: E) -> Result<()> {
        debug_assert!(trust_radius > 0.);

        self.trust_radius = trust_radius;
        self.base_obj = iterate.obj_val();
        self.obj_val = iterate.obj_val();
        self.primal = iterate.primal().clone();
        self.gradient = Some(iterate.obj_grad().clone());

        Ok(())
    }

    fn set_trust_radius(&mut self, trust_radius: E) -> Result<()> {
        debug_assert!(trust_radius > 0.);

        self.trust_radius = trust_radius;

        Ok(())
    }

    fn solve(
        &mut self,
        gradient: Option<&Col<E>>,
        _penalty: E,
        _objective_type: CauchyObjectiveType,
    ) -> Result<()> {
        let gradient = gradient
            .cloned()
            .or_else(|| self.gradient.clone())
            .ok_or_else(|| SleqpError::internal("Cauchy solver has no gradient"))?;

        let num_vars = self.problem.num_vars();
        let trust_radius = self.trust_radius;

        let mut objective = self.base_obj;

        for j in 0..num_vars {
            let x = self.primal[j];
            let lb = self.problem.var_lb()[j];
            let ub = self.problem.var_ub()[j];

            let lower = if lb.is_finite() {
                (lb - x).max(-trust_radius)
            } else {
                -trust_radius
            };

            let upper = if ub.is_finite() {
                (ub - x).min(trust_radius)
            } else {
                trust_radius
            };

            let step = if gradient[j] > 0. {
                lower
            } else if gradient[j] < 0. {
                upper
            } else {
                0.
            };

            self.direction[j] = step;
            objective += step * gradient[j];
        }

        self.obj_val = objective;
        self.solved_gradient = gradient;

        Ok(())
    }

    fn obj_val(&self) -> Result<E> {
        Ok(self.obj_val)
    }

    fn working_set(&self, iterate: &mut Iterate) -> Result<()> {
        let num_vars = self.problem.num_vars();
        let trust_radius = self.trust_radius;

        let primal = self.primal.clone();
        let gradient = self.solved_gradient.clone();

        let working_set = iterate.working_set_mut();
        working_set.reset();

        for j in 0..num_vars {
            let x = primal[j];
            let lb = self.problem.var_lb()[j];
            let ub = self.problem.var_ub()[j];

            if lb == ub {
                working_set.add_variable(j, ActiveState::ActiveBoth);
            } else if gradient[j] > 0. && lb.is_finite() && (x - lb) < trust_radius {
                working_set.add_variable(j, ActiveState::ActiveLower);
            } else if gradient[j] < 0. && ub.is_finite() && (ub - x) < trust_radius {
                working_set.add_variable(j, ActiveState::ActiveUpper);
            }
        }

        debug_assert!(working_set.valid());

        Ok(())
    }

    fn lp_step(&self) -> Result<Col<E>> {
        Ok(self.direction.clone())
    }

    fn locally_infeasible(&self) -> Result<bool> {
        Ok(false)
    }

    fn estimate_duals(
        &self,
        working_set: &WorkingSet,
        cons_dual: &mut Col<E>,
        vars_dual: &mut Col<E>,
    ) -> Result<()> {
        debug_assert_eq!(cons_dual.nrows(), 0);

        for j in 0..vars_dual.nrows() {
            vars_dual[j] = if working_set.var_state(j).is_active() {
                -self.solved_gradient[j]
            } else {
                0.
            };
        }

        Ok(())
    }

    fn violation(&self) -> Result<E> {
        Ok(0.)
    }

    fn basis_condition(&self) -> Result<(bool, Option<E>)> {
        Ok((true, Some(1.)))
    }
}
