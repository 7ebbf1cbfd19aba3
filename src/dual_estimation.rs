//! Dual estimation strategies: LP duals, least-squares estimates from the
//! augmented Jacobian, or a mixture of both.

use faer::Col;

use crate::aug_jac::AugJac;
use crate::cauchy::Cauchy;
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::settings::DualEstimationType;
use crate::working_set::{ActiveState, WorkingSetEntry};
use crate::{E, Result, Settings};

pub struct DualEstimation {
    problem: SharedProblem,
    estimation_type: DualEstimationType,
}

impl DualEstimation {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Self {
        Self {
            problem,
            estimation_type: settings.dual_estimation_type,
        }
    }

    /// Fills the iterate's dual estimates from the working set identified
    /// by the Cauchy solve.
    pub fn compute(
        &self,
        iterate: &mut Iterate,
        aug_jac: &dyn AugJac,
        cauchy: &dyn Cauchy,
    ) -> Result<()> {
        match self.estimation_type {
            DualEstimationType::Lp => self.compute_lp(iterate, cauchy),
            DualEstimationType::Lsq => self.compute_lsq(iterate, aug_jac),
            DualEstimationType::Mixed => self.compute_mixed(iterate, aug_jac, cauchy),
        }
    }

    fn compute_lp(&self, iterate: &mut Iterate, cauchy: &dyn Cauchy) -> Result<()> {
        let working_set = iterate.working_set().clone();

        let mut cons_dual = Col::zeros(self.problem.num_cons());
        let mut vars_dual = Col::zeros(self.problem.num_vars());

        cauchy.estimate_duals(&working_set, &mut cons_dual, &mut vars_dual)?;

        *iterate.cons_dual_mut() = cons_dual;
        *iterate.vars_dual_mut() = vars_dual;

        Ok(())
    }

    /// Least-squares estimation: projecting the objective gradient through
    /// the augmented Jacobian yields the multipliers minimizing the
    /// stationarity residual `||g + A^T λ||`, i.e. `λ = -μ` with
    /// `g = N g + A^T μ`.
    fn compute_lsq(&self, iterate: &mut Iterate, aug_jac: &dyn AugJac) -> Result<()> {
        let (_, multipliers) = aug_jac.project(iterate.obj_grad())?;

        let working_set = iterate.working_set().clone();

        let mut cons_dual = Col::zeros(self.problem.num_cons());
        let mut vars_dual = Col::zeros(self.problem.num_vars());

        for (position, entry) in working_set.entries().iter().enumerate() {
            match entry {
                WorkingSetEntry::Variable(j) => vars_dual[*j] = -multipliers[position],
                WorkingSetEntry::Constraint(i) => cons_dual[*i] = -multipliers[position],
            }
        }

        *iterate.cons_dual_mut() = cons_dual;
        *iterate.vars_dual_mut() = vars_dual;

        Ok(())
    }

    /// LP duals for inequality-active rows, least-squares estimates for
    /// equality (both-active) rows.
    fn compute_mixed(
        &self,
        iterate: &mut Iterate,
        aug_jac: &dyn AugJac,
        cauchy: &dyn Cauchy,
    ) -> Result<()> {
        let working_set = iterate.working_set().clone();

        let mut lp_cons_dual = Col::zeros(self.problem.num_cons());
        let mut lp_vars_dual = Col::zeros(self.problem.num_vars());

        cauchy.estimate_duals(&working_set, &mut lp_cons_dual, &mut lp_vars_dual)?;

        let (_, multipliers) = aug_jac.project(iterate.obj_grad())?;

        let mut cons_dual = lp_cons_dual;
        let mut vars_dual = lp_vars_dual;

        for (position, entry) in working_set.entries().iter().enumerate() {
            match entry {
                WorkingSetEntry::Variable(j) => {
                    if working_set.var_state(*j) == ActiveState::ActiveBoth {
                        vars_dual[*j] = -multipliers[position];
                    }
                }
                WorkingSetEntry::Constraint(i) => {
                    if working_set.cons_state(*i) == ActiveState::ActiveBoth {
                        cons_dual[*i] = -multipliers[position];
                    }
                }
            }
        }

        *iterate.cons_dual_mut() = cons_dual;
        *iterate.vars_dual_mut() = vars_dual;

        Ok(())
    }

    /// Checks the KKT sign convention of the estimates against the working
    /// set: nonnegative at upper-active entries, nonpositive at
    /// lower-active ones, zero at inactive ones.
    pub fn signs_consistent(&self, iterate: &Iterate, zero_eps: E) -> bool {
        let working_set = iterate.working_set();

        for j in 0..self.problem.num_vars() {
            let dual = iterate.vars_dual()[j];

            let ok = match working_set.var_state(j) {
                ActiveState::Inactive => dual.abs() <= zero_eps,
                ActiveState::ActiveLower => dual <= zero_eps,
                ActiveState::ActiveUpper => dual >= -zero_eps,
                ActiveState::ActiveBoth => true,
            };

            if !ok {
                return false;
            }
        }

        for i in 0..self.problem.num_cons() {
            let dual = iterate.cons_dual()[i];

            let ok = match working_set.cons_state(i) {
                ActiveState::Inactive => dual.abs() <= zero_eps,
                ActiveState::ActiveLower => dual <= zero_eps,
                ActiveState::ActiveUpper => dual >= -zero_eps,
                ActiveState::ActiveBoth => true,
            };

            if !ok {
                return false;
            }
        }

        true
    }
}
