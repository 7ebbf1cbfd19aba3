//! Cauchy variant for fully unconstrained problems: the LP degenerates to
//! a sign pattern on the gradient.

use faer::Col;

use crate::cauchy::{Cauchy, CauchyObjectiveType};
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::working_set::WorkingSet;
use crate::{E, Result, SleqpError};

pub struct UnconstrainedCauchy {
    problem: SharedProblem,
    trust_radius: E,
    base_obj: E,
    obj_val: E,
    gradient: Option<Col<E>>,
    direction: Col<E>,
}

impl UnconstrainedCauchy {
    pub fn new(problem: SharedProblem) -> Self {
        let num_vars = problem.num_vars();

        Self {
            problem,
            trust_radius: 0.,
            base_obj: 0.,
            obj_val: 0.,
            gradient: None,
            direction: Col::zeros(num_vars),
        }
    }
}

impl Cauchy for UnconstrainedCauchy {
    fn set_iterate(&mut self, iterate: &Iterate, trust_radius: E) -> Result<()> {
        debug_assert!(trust_radius > 0.);

        self.trust_radius = trust_radius;
        self.base_obj = iterate.obj_val();
        self.obj_val = iterate.obj_val();
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
            let step = if -gradient[j] >= 0. {
                trust_radius
            } else {
                -trust_radius
            };

            self.direction[j] = step;
            objective += step * gradient[j];
        }

        self.obj_val = objective;

        Ok(())
    }

    fn obj_val(&self) -> Result<E> {
        Ok(self.obj_val)
    }

    fn working_set(&self, iterate: &mut Iterate) -> Result<()> {
        iterate.working_set_mut().reset();

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
        _working_set: &WorkingSet,
        cons_dual: &mut Col<E>,
        vars_dual: &mut Col<E>,
    ) -> Result<()> {
        for i in 0..cons_dual.nrows() {
            cons_dual[i] = 0.;
        }

        for j in 0..vars_dual.nrows() {
            vars_dual[j] = 0.;
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
