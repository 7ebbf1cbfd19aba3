//! Problem scaling by powers of two.
//!
//! Weights are integer exponents; scaling multiplies by exact powers of
//! two, so it never introduces rounding error. A [`ScaledFunc`] wraps the
//! user function to present the scaled problem, and the driver translates
//! points and iterates between the two spaces.

use std::cell::RefCell;
use std::rc::Rc;

use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, ColRef};

use crate::func::{Func, FuncType, SharedFunc, ValueReason};
use crate::iterate::Iterate;
use crate::sparse::SparseVec;
use crate::{E, I, Result};

#[derive(Debug, Clone)]
pub struct Scaling {
    obj_weight: i32,
    var_weights: Vec<i32>,
    cons_weights: Vec<i32>,
}

fn pow2(weight: i32) -> E {
    (2.0 as E).powi(weight)
}

impl Scaling {
    pub fn new(obj_weight: i32, var_weights: Vec<i32>, cons_weights: Vec<i32>) -> Self {
        Self {
            obj_weight,
            var_weights,
            cons_weights,
        }
    }

    pub fn identity(num_vars: I, num_cons: I) -> Self {
        Self {
            obj_weight: 0,
            var_weights: vec![0; num_vars],
            cons_weights: vec![0; num_cons],
        }
    }

    pub fn num_vars(&self) -> I {
        self.var_weights.len()
    }

    pub fn num_cons(&self) -> I {
        self.cons_weights.len()
    }

    pub fn obj_factor(&self) -> E {
        pow2(self.obj_weight)
    }

    pub fn var_factor(&self, j: I) -> E {
        pow2(self.var_weights[j])
    }

    pub fn cons_factor(&self, i: I) -> E {
        pow2(self.cons_weights[i])
    }

    /// Maps an original-space point into the scaled space.
    pub fn scale_point(&self, point: &mut Col<E>) {
        for j in 0..self.num_vars() {
            point[j] *= self.var_factor(j);
        }
    }

    /// Maps a scaled-space point back into the original space.
    pub fn unscale_point(&self, point: &mut Col<E>) {
        for j in 0..self.num_vars() {
            point[j] /= self.var_factor(j);
        }
    }

    pub fn scale_bounds(&self, lb: &Col<E>, ub: &Col<E>) -> (Col<E>, Col<E>) {
        let scaled_lb = Col::from_fn(lb.nrows(), |j| lb[j] * self.var_factor(j));
        let scaled_ub = Col::from_fn(ub.nrows(), |j| ub[j] * self.var_factor(j));

        (scaled_lb, scaled_ub)
    }

    pub fn scale_cons_bounds(&self, lb: &Col<E>, ub: &Col<E>) -> (Col<E>, Col<E>) {
        let scaled_lb = Col::from_fn(lb.nrows(), |i| lb[i] * self.cons_factor(i));
        let scaled_ub = Col::from_fn(ub.nrows(), |i| ub[i] * self.cons_factor(i));

        (scaled_lb, scaled_ub)
    }

    /// Maps a scaled-space iterate (primal and duals) back into the
    /// original space.
    pub fn unscale_iterate(&self, iterate: &mut Iterate) {
        let obj_factor = self.obj_factor();

        let mut primal = iterate.primal().clone();
        self.unscale_point(&mut primal);
        iterate.set_primal(primal);

        iterate.set_obj_val(iterate.obj_val() / obj_factor);

        for j in 0..self.num_vars() {
            iterate.vars_dual_mut()[j] *= self.var_factor(j) / obj_factor;
        }

        for i in 0..self.num_cons().min(iterate.cons_dual().nrows()) {
            iterate.cons_dual_mut()[i] *= self.cons_factor(i) / obj_factor;
        }
    }
}

/// Presents the scaled problem through the [`Func`] interface.
///
/// With variable factors `D`, constraint factors `C`, and objective factor
/// `f`, the scaled function evaluates `f * obj(D^{-1} x)`,
/// `C * cons(D^{-1} x)`, and correspondingly transformed derivatives.
pub struct ScaledFunc {
    inner: SharedFunc,
    scaling: Scaling,
}

impl ScaledFunc {
    pub fn new(inner: SharedFunc, scaling: Scaling) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self { inner, scaling }))
    }
}

impl Func for ScaledFunc {
    fn num_vars(&self) -> I {
        self.inner.borrow().num_vars()
    }

    fn num_cons(&self) -> I {
        self.inner.borrow().num_cons()
    }

    fn set_value(&mut self, x: ColRef<'_, E>, reason: ValueReason) -> Result<bool> {
        let mut unscaled = x.to_owned();
        self.scaling.unscale_point(&mut unscaled);

        self.inner.borrow_mut().set_value(unscaled.as_ref(), reason)
    }

    fn obj_val(&self) -> Result<E> {
        let value = self.inner.borrow().obj_val()?;

        crate::error::math_check(value * self.scaling.obj_factor(), "scaled objective")
    }

    fn obj_grad(&self) -> Result<SparseVec> {
        let grad = self.inner.borrow().obj_grad()?;

        let obj_factor = self.scaling.obj_factor();

        let mut scaled = SparseVec::empty(grad.dim());

        for (j, value) in grad.iter() {
            scaled.push(j, value * obj_factor / self.scaling.var_factor(j));
        }

        Ok(scaled)
    }

    fn cons_val(&self) -> Result<SparseVec> {
        let values = self.inner.borrow().cons_val()?;

        let mut scaled = SparseVec::empty(values.dim());

        for (i, value) in values.iter() {
            scaled.push(i, value * self.scaling.cons_factor(i));
        }

        Ok(scaled)
    }

    fn cons_jac(&self) -> Result<SparseColMat<I, E>> {
        let jac = self.inner.borrow().cons_jac()?;

        let symbolic = jac.symbolic();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        let values = jac.val();

        let mut triplets: Vec<Triplet<I, I, E>> = Vec::with_capacity(jac.compute_nnz());

        for j in 0..jac.ncols() {
            for k in col_ptr[j]..col_ptr[j + 1] {
                let i = row_idx[k];

                triplets.push(Triplet::new(
                    i,
                    j,
                    values[k] * self.scaling.cons_factor(i) / self.scaling.var_factor(j),
                ));
            }
        }

        SparseColMat::try_new_from_triplets(jac.nrows(), jac.ncols(), &triplets)
            .map_err(|_| crate::SleqpError::internal("scaled Jacobian assembly"))
    }

    fn hess_prod(
        &self,
        obj_dual: E,
        direction: ColRef<'_, E>,
        cons_duals: ColRef<'_, E>,
    ) -> Result<Col<E>> {
        let obj_factor = self.scaling.obj_factor();

        // Translate the scaled-space multipliers and direction into the
        // original space
        let inner_obj_dual = obj_dual * obj_factor;

        let inner_duals = Col::from_fn(cons_duals.nrows(), |i| {
            cons_duals[i] * self.scaling.cons_factor(i)
        });

        let inner_direction = Col::from_fn(direction.nrows(), |j| {
            direction[j] / self.scaling.var_factor(j)
        });

        let product = self.inner.borrow().hess_prod(
            inner_obj_dual,
            inner_direction.as_ref(),
            inner_duals.as_ref(),
        )?;

        Ok(Col::from_fn(product.nrows(), |j| {
            product[j] / self.scaling.var_factor(j)
        }))
    }

    fn func_type(&self) -> FuncType {
        self.inner.borrow().func_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::ClosureFunc;

    #[test]
    fn test_scaled_gradient_chain_rule() {
        // f(x) = x^2, scaled with var weight 1 (factor 2), obj weight 3
        let func = ClosureFunc::new(
            1,
            0,
            |x| x[0] * x[0],
            |x| Col::from_fn(1, |_| 2. * x[0]),
            None,
            None,
            |_, obj_dual, d, _| Col::from_fn(1, |_| 2. * obj_dual * d[0]),
        )
        .into_shared();

        let scaling = Scaling::new(3, vec![1], vec![]);

        let scaled = ScaledFunc::new(func, scaling);

        // scaled x = 4 corresponds to original x = 2
        let x = Col::from_fn(1, |_| 4.);
        scaled
            .borrow_mut()
            .set_value(x.as_ref(), ValueReason::Init)
            .unwrap();

        // f_scaled(x) = 8 * (x/2)^2 = 2 x^2 = 32
        assert!((scaled.borrow().obj_val().unwrap() - 32.).abs() < 1e-14);

        // grad = 4 x = 16
        let grad = scaled.borrow().obj_grad().unwrap().to_col();
        assert!((grad[0] - 16.).abs() < 1e-14);

        // hess = 4
        let d = Col::from_fn(1, |_| 1.);
        let product = scaled
            .borrow()
            .hess_prod(1., d.as_ref(), Col::zeros(0).as_ref())
            .unwrap();
        assert!((product[0] - 4.).abs() < 1e-14);
    }
}
