//! Problem data: bounds, linear constraints, and the function callback.

use std::rc::Rc;

use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, ColRef};

use crate::func::{SharedFunc, ValueReason};
use crate::sparse;
use crate::{E, I, Result, SleqpError};

/// An optimization problem
///
/// ```text
///   min  f(x)
///   s.t. cons_lb <= c(x) <= cons_ub
///        lin_lb  <= L x  <= lin_ub
///        var_lb  <=   x  <= var_ub
/// ```
///
/// where `f` and the general constraints `c` are supplied by a
/// [`crate::func::Func`] and `L` is a fixed coefficient matrix. General and
/// linear constraints are presented to the solver as a single stacked block
/// of `num_cons = num_general + num_linear` rows.
pub struct Problem {
    func: SharedFunc,

    var_lb: Col<E>,
    var_ub: Col<E>,

    general_lb: Col<E>,
    general_ub: Col<E>,

    linear_coeffs: SparseColMat<I, E>,
    linear_lb: Col<E>,
    linear_ub: Col<E>,

    cons_lb: Col<E>,
    cons_ub: Col<E>,
}

pub type SharedProblem = Rc<Problem>;

impl Problem {
    pub fn new(
        func: SharedFunc,
        var_lb: Col<E>,
        var_ub: Col<E>,
        general_lb: Col<E>,
        general_ub: Col<E>,
        linear_coeffs: SparseColMat<I, E>,
        linear_lb: Col<E>,
        linear_ub: Col<E>,
    ) -> Result<SharedProblem> {
        let num_vars = func.borrow().num_vars();
        let num_general = func.borrow().num_cons();
        let num_linear = linear_coeffs.nrows();

        if var_lb.nrows() != num_vars || var_ub.nrows() != num_vars {
            return Err(SleqpError::illegal_argument("variable bound dimensions"));
        }

        if general_lb.nrows() != num_general || general_ub.nrows() != num_general {
            return Err(SleqpError::illegal_argument("constraint bound dimensions"));
        }

        if linear_coeffs.ncols() != num_vars
            || linear_lb.nrows() != num_linear
            || linear_ub.nrows() != num_linear
        {
            return Err(SleqpError::illegal_argument("linear constraint dimensions"));
        }

        for j in 0..num_vars {
            if var_lb[j] > var_ub[j] {
                return Err(SleqpError::illegal_argument("inverted variable bounds"));
            }
        }

        let num_cons = num_general + num_linear;

        let mut cons_lb = Col::zeros(num_cons);
        let mut cons_ub = Col::zeros(num_cons);

        for i in 0..num_general {
            if general_lb[i] > general_ub[i] {
                return Err(SleqpError::illegal_argument("inverted constraint bounds"));
            }

            cons_lb[i] = general_lb[i];
            cons_ub[i] = general_ub[i];
        }

        for i in 0..num_linear {
            if linear_lb[i] > linear_ub[i] {
                return Err(SleqpError::illegal_argument("inverted linear bounds"));
            }

            cons_lb[num_general + i] = linear_lb[i];
            cons_ub[num_general + i] = linear_ub[i];
        }

        Ok(Rc::new(Self {
            func,
            var_lb,
            var_ub,
            general_lb,
            general_ub,
            linear_coeffs,
            linear_lb,
            linear_ub,
            cons_lb,
            cons_ub,
        }))
    }

    /// Creates a problem without separate linear constraints.
    pub fn new_simple(
        func: SharedFunc,
        var_lb: Col<E>,
        var_ub: Col<E>,
        general_lb: Col<E>,
        general_ub: Col<E>,
    ) -> Result<SharedProblem> {
        let num_vars = func.borrow().num_vars();

        let linear_coeffs = SparseColMat::try_new_from_triplets(0, num_vars, &[])
            .map_err(|_| SleqpError::internal("empty linear coefficients"))?;

        Self::new(
            func,
            var_lb,
            var_ub,
            general_lb,
            general_ub,
            linear_coeffs,
            Col::zeros(0),
            Col::zeros(0),
        )
    }

    pub fn func(&self) -> &SharedFunc {
        &self.func
    }

    pub fn num_vars(&self) -> I {
        self.var_lb.nrows()
    }

    pub fn num_general(&self) -> I {
        self.general_lb.nrows()
    }

    pub fn num_linear(&self) -> I {
        self.linear_lb.nrows()
    }

    pub fn num_cons(&self) -> I {
        self.num_general() + self.num_linear()
    }

    pub fn var_lb(&self) -> &Col<E> {
        &self.var_lb
    }

    pub fn var_ub(&self) -> &Col<E> {
        &self.var_ub
    }

    pub fn general_lb(&self) -> &Col<E> {
        &self.general_lb
    }

    pub fn general_ub(&self) -> &Col<E> {
        &self.general_ub
    }

    pub fn linear_coeffs(&self) -> &SparseColMat<I, E> {
        &self.linear_coeffs
    }

    pub fn linear_lb(&self) -> &Col<E> {
        &self.linear_lb
    }

    pub fn linear_ub(&self) -> &Col<E> {
        &self.linear_ub
    }

    /// Stacked lower bounds of general and linear constraints.
    pub fn cons_lb(&self) -> &Col<E> {
        &self.cons_lb
    }

    /// Stacked upper bounds of general and linear constraints.
    pub fn cons_ub(&self) -> &Col<E> {
        &self.cons_ub
    }

    /// A problem with neither constraints nor finite variable bounds.
    pub fn is_unconstrained(&self) -> bool {
        self.num_cons() == 0
            && (0..self.num_vars())
                .all(|j| self.var_lb[j] == E::NEG_INFINITY && self.var_ub[j] == E::INFINITY)
    }

    pub fn set_value(&self, x: ColRef<'_, E>, reason: ValueReason) -> Result<bool> {
        self.func.borrow_mut().set_value(x, reason)
    }

    pub fn obj_val(&self) -> Result<E> {
        self.func.borrow().obj_val()
    }

    pub fn obj_grad(&self) -> Result<Col<E>> {
        Ok(self.func.borrow().obj_grad()?.to_col())
    }

    /// Stacked constraint values `[c(x); L x]` at the point previously set.
    pub fn cons_val(&self, x: ColRef<'_, E>) -> Result<Col<E>> {
        let num_general = self.num_general();
        let num_linear = self.num_linear();

        let mut values = Col::zeros(num_general + num_linear);

        if num_general > 0 {
            let general = self.func.borrow().cons_val()?;

            for (i, value) in general.iter() {
                values[i] = value;
            }
        }

        if num_linear > 0 {
            let linear = sparse::mat_vec(self.linear_coeffs.as_ref(), x);

            for i in 0..num_linear {
                values[num_general + i] = linear[i];
            }
        }

        Ok(values)
    }

    /// Stacked constraint Jacobian `[J(x); L]`.
    pub fn cons_jac(&self) -> Result<SparseColMat<I, E>> {
        let num_general = self.num_general();
        let num_linear = self.num_linear();
        let num_vars = self.num_vars();

        if num_linear == 0 {
            if num_general == 0 {
                return SparseColMat::try_new_from_triplets(0, num_vars, &[])
                    .map_err(|_| SleqpError::internal("empty Jacobian"));
            }

            return self.func.borrow().cons_jac();
        }

        let mut triplets: Vec<Triplet<I, I, E>> = Vec::new();

        if num_general > 0 {
            let jac = self.func.borrow().cons_jac()?;

            let symbolic = jac.symbolic();
            let col_ptr = symbolic.col_ptr();
            let row_idx = symbolic.row_idx();
            let values = jac.val();

            for j in 0..jac.ncols() {
                for k in col_ptr[j]..col_ptr[j + 1] {
                    triplets.push(Triplet::new(row_idx[k], j, values[k]));
                }
            }
        }

        {
            let symbolic = self.linear_coeffs.symbolic();
            let col_ptr = symbolic.col_ptr();
            let row_idx = symbolic.row_idx();
            let values = self.linear_coeffs.val();

            for j in 0..self.linear_coeffs.ncols() {
                for k in col_ptr[j]..col_ptr[j + 1] {
                    triplets.push(Triplet::new(num_general + row_idx[k], j, values[k]));
                }
            }
        }

        SparseColMat::try_new_from_triplets(num_general + num_linear, num_vars, &triplets)
            .map_err(|_| SleqpError::internal("stacked Jacobian assembly"))
    }

    /// Hessian product of the Lagrangian. Linear rows contribute nothing;
    /// only the general part of `cons_duals` reaches the function.
    pub fn hess_prod(
        &self,
        obj_dual: E,
        direction: ColRef<'_, E>,
        cons_duals: ColRef<'_, E>,
    ) -> Result<Col<E>> {
        let num_general = self.num_general();

        let general_duals = Col::from_fn(num_general, |i| cons_duals[i]);

        self.func
            .borrow()
            .hess_prod(obj_dual, direction, general_duals.as_ref())
    }

    /// Total (one-norm) violation of the stacked constraint bounds.
    pub fn total_violation(&self, cons_val: &Col<E>) -> E {
        let mut violation = 0.;

        for i in 0..self.num_cons() {
            violation += (self.cons_lb[i] - cons_val[i]).max(0.);
            violation += (cons_val[i] - self.cons_ub[i]).max(0.);
        }

        violation
    }

    /// Maximum violation of the stacked constraint bounds.
    pub fn max_violation(&self, cons_val: &Col<E>) -> E {
        let mut violation: E = 0.;

        for i in 0..self.num_cons() {
            violation = violation.max(self.cons_lb[i] - cons_val[i]);
            violation = violation.max(cons_val[i] - self.cons_ub[i]);
        }

        violation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::ClosureFunc;

    #[test]
    fn test_stacked_constraints() {
        // One general constraint c(x) = x0 * x1, one linear row x0 + 2 x1
        let func = ClosureFunc::new(
            2,
            1,
            |x| x[0] + x[1],
            |_| Col::from_fn(2, |_| 1.),
            Some(Box::new(|x| Col::from_fn(1, |_| x[0] * x[1]))),
            Some(Box::new(|x| {
                let triplets = [Triplet::new(0, 0, x[1]), Triplet::new(0, 1, x[0])];
                SparseColMat::try_new_from_triplets(1, 2, &triplets).unwrap()
            })),
            |_, _, _, _| Col::zeros(2),
        )
        .into_shared();

        let linear = SparseColMat::try_new_from_triplets(
            1,
            2,
            &[Triplet::new(0usize, 0usize, 1.), Triplet::new(0, 1, 2.)],
        )
        .unwrap();

        let problem = Problem::new(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |_| E::INFINITY),
            Col::from_fn(1, |_| 0.),
            Col::from_fn(1, |_| 1.),
            linear,
            Col::from_fn(1, |_| -1.),
            Col::from_fn(1, |_| 1.),
        )
        .unwrap();

        assert_eq!(problem.num_cons(), 2);

        let x = Col::from_fn(2, |i| [2., 3.][i]);
        problem
            .set_value(x.as_ref(), ValueReason::Init)
            .unwrap();

        let cons = problem.cons_val(x.as_ref()).unwrap();
        assert_eq!(cons[0], 6.);
        assert_eq!(cons[1], 8.);

        let jac = problem.cons_jac().unwrap();
        assert_eq!(jac.nrows(), 2);

        let jd = crate::sparse::mat_vec(jac.as_ref(), x.as_ref());
        // J rows: [3, 2] and [1, 2] applied to (2, 3)
        assert_eq!(jd[0], 12.);
        assert_eq!(jd[1], 8.);

        // violation of [0,1] x [-1,1] at (6, 8): 5 + 7
        assert_eq!(problem.total_violation(&cons), 12.);
        assert_eq!(problem.max_violation(&cons), 7.);
    }
}
