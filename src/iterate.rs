//! The iterate: primal point, cached evaluations, duals, and working set.

use faer::sparse::SparseColMat;
use faer::Col;

use crate::problem::Problem;
use crate::sparse;
use crate::working_set::{ActiveState, WorkingSet};
use crate::{E, I, Result};

#[derive(Clone)]
pub struct Iterate {
    primal: Col<E>,
    obj_val: E,
    obj_grad: Col<E>,
    cons_val: Col<E>,
    cons_jac: SparseColMat<I, E>,
    cons_dual: Col<E>,
    vars_dual: Col<E>,
    working_set: WorkingSet,
}

impl Iterate {
    pub fn new(problem: &Problem, primal: Col<E>) -> Self {
        let num_vars = problem.num_vars();
        let num_cons = problem.num_cons();

        Self {
            primal,
            obj_val: 0.,
            obj_grad: Col::zeros(num_vars),
            cons_val: Col::zeros(num_cons),
            cons_jac: SparseColMat::try_new_from_triplets(num_cons, num_vars, &[])
                .expect("empty Jacobian"),
            cons_dual: Col::zeros(num_cons),
            vars_dual: Col::zeros(num_vars),
            working_set: WorkingSet::new(num_vars, num_cons),
        }
    }

    pub fn primal(&self) -> &Col<E> {
        &self.primal
    }

    pub fn set_primal(&mut self, primal: Col<E>) {
        self.primal = primal;
    }

    pub fn obj_val(&self) -> E {
        self.obj_val
    }

    pub fn set_obj_val(&mut self, value: E) {
        self.obj_val = value;
    }

    pub fn obj_grad(&self) -> &Col<E> {
        &self.obj_grad
    }

    pub fn set_obj_grad(&mut self, grad: Col<E>) {
        self.obj_grad = grad;
    }

    pub fn cons_val(&self) -> &Col<E> {
        &self.cons_val
    }

    pub fn set_cons_val(&mut self, values: Col<E>) {
        self.cons_val = values;
    }

    pub fn cons_jac(&self) -> &SparseColMat<I, E> {
        &self.cons_jac
    }

    pub fn set_cons_jac(&mut self, jac: SparseColMat<I, E>) {
        self.cons_jac = jac;
    }

    pub fn cons_dual(&self) -> &Col<E> {
        &self.cons_dual
    }

    pub fn cons_dual_mut(&mut self) -> &mut Col<E> {
        &mut self.cons_dual
    }

    pub fn vars_dual(&self) -> &Col<E> {
        &self.vars_dual
    }

    pub fn vars_dual_mut(&mut self) -> &mut Col<E> {
        &mut self.vars_dual
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub fn working_set_mut(&mut self) -> &mut WorkingSet {
        &mut self.working_set
    }

    /// Maximum violation of the stacked constraints at this iterate.
    pub fn feasibility_residuum(&self, problem: &Problem) -> E {
        problem.max_violation(&self.cons_val)
    }

    /// Infinity norm of the stationarity residual
    /// `∇f(x) + J(x)^T λ_c + λ_x`.
    pub fn stationarity_residuum(&self, _problem: &Problem) -> E {
        let jac_prod = sparse::mat_t_vec(self.cons_jac.as_ref(), self.cons_dual.as_ref());

        let mut residuum: E = 0.;

        for j in 0..self.primal.nrows() {
            let value = self.obj_grad[j] + jac_prod[j] + self.vars_dual[j];
            residuum = residuum.max(value.abs());
        }

        residuum
    }

    /// Maximum complementary-slackness product over variables and
    /// constraints: for each entry, the dual magnitude times the slack to
    /// the bound indicated by the dual's sign.
    pub fn slackness_residuum(&self, problem: &Problem) -> E {
        let mut residuum: E = 0.;

        for j in 0..problem.num_vars() {
            let dual = self.vars_dual[j];

            if dual == 0. {
                continue;
            }

            let slack = if dual > 0. {
                problem.var_ub()[j] - self.primal[j]
            } else {
                self.primal[j] - problem.var_lb()[j]
            };

            if slack.is_finite() {
                residuum = residuum.max((dual * slack).abs());
            }
        }

        for i in 0..problem.num_cons() {
            let dual = self.cons_dual[i];

            if dual == 0. {
                continue;
            }

            let slack = if dual > 0. {
                problem.cons_ub()[i] - self.cons_val[i]
            } else {
                self.cons_val[i] - problem.cons_lb()[i]
            };

            if slack.is_finite() {
                residuum = residuum.max((dual * slack).abs());
            }
        }

        residuum
    }

    pub fn is_feasible(&self, feas_res: E, feas_tol: E) -> bool {
        feas_res <= feas_tol
    }

    pub fn is_optimal(&self, feas_res: E, slack_res: E, stat_res: E, settings: &crate::Settings) -> bool {
        feas_res <= settings.feas_tol
            && slack_res <= settings.slack_tol
            && stat_res <= settings.stat_tol
    }

    /// Indices of constraints violated beyond `feas_tol`.
    pub fn violated_constraints(&self, problem: &Problem, feas_tol: E) -> Vec<I> {
        let mut violated = Vec::new();

        for i in 0..problem.num_cons() {
            let below = problem.cons_lb()[i] - self.cons_val[i];
            let above = self.cons_val[i] - problem.cons_ub()[i];

            if below > feas_tol || above > feas_tol {
                violated.push(i);
            }
        }

        violated
    }

    /// Signed multipliers (`±penalty`) of constraints violated by
    /// `cons_val`, skipping rows contained in the working set.
    pub fn violated_cons_multipliers(
        problem: &Problem,
        cons_val: &Col<E>,
        working_set: &WorkingSet,
        penalty: E,
    ) -> Col<E> {
        let mut multipliers = Col::zeros(problem.num_cons());

        for i in 0..problem.num_cons() {
            if working_set.cons_state(i) != ActiveState::Inactive {
                continue;
            }

            if cons_val[i] > problem.cons_ub()[i] {
                multipliers[i] = penalty;
            } else if cons_val[i] < problem.cons_lb()[i] {
                multipliers[i] = -penalty;
            }
        }

        multipliers
    }

    /// Evaluates the function at the primal point and fills objective,
    /// gradient, constraint values, and Jacobian.
    pub fn evaluate(&mut self, problem: &Problem) -> Result<()> {
        self.obj_val = problem.obj_val()?;
        self.obj_grad = problem.obj_grad()?;
        self.cons_val = problem.cons_val(self.primal.as_ref())?;
        self.cons_jac = problem.cons_jac()?;

        Ok(())
    }
}
