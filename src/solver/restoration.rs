//! The feasibility-restoration problem.
//!
//! Restoration minimizes the constraint violation of the original problem
//! over the original variable box. The violation is expressed in residual
//! form and solved as a least-squares function through the Gauss-Newton
//! adapter, with the trust region anchoring the iterates to the switch
//! point.

use std::cell::RefCell;
use std::rc::Rc;

use faer::sparse::SparseColMat;
use faer::{Col, ColRef};

use crate::func::lsq::{LsqAdapter, LsqFunc, SharedLsqFunc};
use crate::func::ValueReason;
use crate::problem::{Problem, SharedProblem};
use crate::sparse;
use crate::{E, I, Result};

/// Residual form of the constraint violation:
/// `r_i(x) = c_i(x) - clamp(c_i(x), lb_i, ub_i)`.
pub struct RestorationFunc {
    problem: SharedProblem,

    x: Col<E>,
    cons_val: Col<E>,
    cons_jac: SparseColMat<I, E>,
}

impl RestorationFunc {
    pub fn new(problem: SharedProblem) -> Self {
        let num_vars = problem.num_vars();
        let num_cons = problem.num_cons();

        Self {
            problem,
            x: Col::zeros(num_vars),
            cons_val: Col::zeros(num_cons),
            cons_jac: SparseColMat::try_new_from_triplets(num_cons, num_vars, &[])
                .expect("empty Jacobian"),
        }
    }

    /// Whether row `i` contributes to the violation at the current point.
    fn violated(&self, i: I) -> bool {
        self.cons_val[i] < self.problem.cons_lb()[i]
            || self.cons_val[i] > self.problem.cons_ub()[i]
    }
}

impl LsqFunc for RestorationFunc {
    fn num_vars(&self) -> I {
        self.problem.num_vars()
    }

    fn num_residuals(&self) -> I {
        self.problem.num_cons()
    }

    fn set_value(&mut self, x: ColRef<'_, E>, _reason: ValueReason) -> Result<bool> {
        let reject = self
            .problem
            .set_value(x, ValueReason::Restoration)?;

        if reject {
            return Ok(true);
        }

        self.x = x.to_owned();
        self.cons_val = self.problem.cons_val(x)?;
        self.cons_jac = self.problem.cons_jac()?;

        Ok(false)
    }

    fn residuals(&self) -> Result<Col<E>> {
        Ok(Col::from_fn(self.num_residuals(), |i| {
            let value = self.cons_val[i];

            let clamped = value
                .max(self.problem.cons_lb()[i])
                .min(self.problem.cons_ub()[i]);

            value - clamped
        }))
    }

    fn jac_forward(&self, direction: ColRef<'_, E>) -> Result<Col<E>> {
        let mut product = sparse::mat_vec(self.cons_jac.as_ref(), direction);

        for i in 0..self.num_residuals() {
            if !self.violated(i) {
                product[i] = 0.;
            }
        }

        Ok(product)
    }

    fn jac_adjoint(&self, adjoint: ColRef<'_, E>) -> Result<Col<E>> {
        let mut masked = adjoint.to_owned();

        for i in 0..self.num_residuals() {
            if !self.violated(i) {
                masked[i] = 0.;
            }
        }

        Ok(sparse::mat_t_vec(self.cons_jac.as_ref(), masked.as_ref()))
    }
}

/// Builds the restoration problem over the original variable box.
pub fn restoration_problem(problem: &SharedProblem) -> Result<SharedProblem> {
    let restoration_func: SharedLsqFunc =
        Rc::new(RefCell::new(RestorationFunc::new(problem.clone())));

    let adapter = Rc::new(RefCell::new(LsqAdapter::new(restoration_func)));

    Problem::new_simple(
        adapter,
        problem.var_lb().clone(),
        problem.var_ub().clone(),
        Col::zeros(0),
        Col::zeros(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{ClosureFunc, Func};
    use faer::sparse::Triplet;

    #[test]
    fn test_restoration_residuals() {
        // c(x) = x0 + x1 with bounds [1, 2]
        let func = ClosureFunc::new(
            2,
            1,
            |x| x[0],
            |_| Col::from_fn(2, |i| [1., 0.][i]),
            Some(Box::new(|x| Col::from_fn(1, |_| x[0] + x[1]))),
            Some(Box::new(|_| {
                let triplets = [Triplet::new(0, 0, 1.), Triplet::new(0, 1, 1.)];
                SparseColMat::try_new_from_triplets(1, 2, &triplets).unwrap()
            })),
            |_, _, _, _| Col::zeros(2),
        )
        .into_shared();

        let problem = Problem::new_simple(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |_| E::INFINITY),
            Col::from_fn(1, |_| 1.),
            Col::from_fn(1, |_| 2.),
        )
        .unwrap();

        let restoration = restoration_problem(&problem).unwrap();

        assert_eq!(restoration.num_cons(), 0);

        // At (3, 1): c = 4, violation above ub = 2 by 2, objective 1/2 * 4
        let x = Col::from_fn(2, |i| [3., 1.][i]);
        restoration
            .set_value(x.as_ref(), ValueReason::Init)
            .unwrap();

        assert!((restoration.obj_val().unwrap() - 2.).abs() < 1e-14);

        // gradient = J^T r = (2, 2)
        let grad = restoration.obj_grad().unwrap();
        assert!((grad[0] - 2.).abs() < 1e-14);
        assert!((grad[1] - 2.).abs() < 1e-14);

        // At a feasible point the objective vanishes
        let x = Col::from_fn(2, |i| [1., 0.5][i]);
        restoration
            .set_value(x.as_ref(), ValueReason::Init)
            .unwrap();

        assert_eq!(restoration.obj_val().unwrap(), 0.);

        assert_eq!(
            restoration.func().borrow().func_type(),
            crate::func::FuncType::Lsq
        );
    }
}
