//! A primal step bundled with its precomputed products.
//!
//! Whenever the primal part changes, the gradient product, the Jacobian
//! product, and the Hessian product are kept consistent: scaling and
//! scaled addition update them linearly, [`Direction::reset`] recomputes
//! them from scratch.

use faer::{Col, ColRef};

use crate::iterate::Iterate;
use crate::linalg::vector_ops;
use crate::problem::Problem;
use crate::sparse;
use crate::{E, Result};

#[derive(Clone)]
pub struct Direction {
    primal: Col<E>,
    /// `∇f · d`
    obj_dot: E,
    /// `J d`
    cons_jac_prod: Col<E>,
    /// `H d`
    hess_prod: Col<E>,
}

impl Direction {
    pub fn zeros(problem: &Problem) -> Self {
        Self {
            primal: Col::zeros(problem.num_vars()),
            obj_dot: 0.,
            cons_jac_prod: Col::zeros(problem.num_cons()),
            hess_prod: Col::zeros(problem.num_vars()),
        }
    }

    pub fn primal(&self) -> &Col<E> {
        &self.primal
    }

    pub fn set_primal(&mut self, primal: Col<E>) {
        self.primal = primal;
    }

    pub fn obj_dot(&self) -> E {
        self.obj_dot
    }

    pub fn cons_jac_prod(&self) -> &Col<E> {
        &self.cons_jac_prod
    }

    pub fn hess_prod(&self) -> &Col<E> {
        &self.hess_prod
    }

    pub fn norm(&self) -> E {
        self.primal.norm_l2()
    }

    pub fn inf_norm(&self) -> E {
        self.primal.norm_max()
    }

    /// `d^T H d` from the cached Hessian product.
    pub fn quadratic_term(&self) -> E {
        vector_ops::dot(self.primal.as_ref(), self.hess_prod.as_ref())
    }

    /// Recomputes all products from the primal part.
    pub fn reset(
        &mut self,
        problem: &Problem,
        iterate: &Iterate,
        cons_duals: ColRef<'_, E>,
    ) -> Result<()> {
        self.obj_dot = vector_ops::dot(iterate.obj_grad().as_ref(), self.primal.as_ref());

        self.cons_jac_prod =
            sparse::mat_vec(iterate.cons_jac().as_ref(), self.primal.as_ref());

        self.hess_prod = problem.hess_prod(1., self.primal.as_ref(), cons_duals)?;

        Ok(())
    }

    /// Scales the primal part and all products by `factor`.
    pub fn scale(&mut self, factor: E) {
        self.primal = factor * &self.primal;
        self.obj_dot *= factor;
        self.cons_jac_prod = factor * &self.cons_jac_prod;
        self.hess_prod = factor * &self.hess_prod;
    }

    /// Sets `self <- self + factor * other`, updating products linearly.
    pub fn add_scaled(&mut self, other: &Direction, factor: E) {
        self.primal += factor * &other.primal;
        self.obj_dot += factor * other.obj_dot;
        self.cons_jac_prod += factor * &other.cons_jac_prod;
        self.hess_prod += factor * &other.hess_prod;
    }

    /// Sets `self <- a + factor * (b - a)`, staying on the segment between
    /// two directions.
    pub fn interpolate(&mut self, a: &Direction, b: &Direction, factor: E) {
        self.primal = &a.primal + factor * (&b.primal - &a.primal);
        self.obj_dot = a.obj_dot + factor * (b.obj_dot - a.obj_dot);
        self.cons_jac_prod = &a.cons_jac_prod + factor * (&b.cons_jac_prod - &a.cons_jac_prod);
        self.hess_prod = &a.hess_prod + factor * (&b.hess_prod - &a.hess_prod);
    }

    pub fn copy_from(&mut self, other: &Direction) {
        self.primal = other.primal.clone();
        self.obj_dot = other.obj_dot;
        self.cons_jac_prod = other.cons_jac_prod.clone();
        self.hess_prod = other.hess_prod.clone();
    }

    /// Checks that the cached products match a recomputation within `eps`.
    pub fn check(
        &self,
        problem: &Problem,
        iterate: &Iterate,
        cons_duals: ColRef<'_, E>,
        eps: E,
    ) -> Result<bool> {
        let mut reference = self.clone();
        reference.reset(problem, iterate, cons_duals)?;

        let obj_ok = (reference.obj_dot - self.obj_dot).abs() <= eps;
        let jac_ok = (&reference.cons_jac_prod - &self.cons_jac_prod).norm_max() <= eps;
        let hess_ok = (&reference.hess_prod - &self.hess_prod).norm_max() <= eps;

        Ok(obj_ok && jac_ok && hess_ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::ClosureFunc;
    use crate::func::ValueReason;
    use crate::problem::Problem;
    use faer::sparse::{SparseColMat, Triplet};

    fn make_problem() -> std::rc::Rc<Problem> {
        let func = ClosureFunc::new(
            2,
            1,
            |x| x[0] * x[0] + x[1],
            |x| Col::from_fn(2, |i| [2. * x[0], 1.][i]),
            Some(Box::new(|x| Col::from_fn(1, |_| x[0] + x[1]))),
            Some(Box::new(|_| {
                let triplets = [Triplet::new(0, 0, 1.), Triplet::new(0, 1, 1.)];
                SparseColMat::try_new_from_triplets(1, 2, &triplets).unwrap()
            })),
            |_, obj_dual, d, _| Col::from_fn(2, |i| [2. * obj_dual * d[0], 0.][i]),
        )
        .into_shared();

        Problem::new_simple(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |_| E::INFINITY),
            Col::from_fn(1, |_| 0.),
            Col::from_fn(1, |_| 1.),
        )
        .unwrap()
    }

    #[test]
    fn test_scaling_consistency() {
        let problem = make_problem();

        let x = Col::from_fn(2, |i| [1., 2.][i]);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        let mut direction = Direction::zeros(&problem);
        direction.set_primal(Col::from_fn(2, |i| [1., -1.][i]));

        let duals = Col::zeros(1);
        direction.reset(&problem, &iterate, duals.as_ref()).unwrap();

        let obj_dot = direction.obj_dot();
        let jac_prod = direction.cons_jac_prod().clone();
        let hess_prod = direction.hess_prod().clone();

        let sigma = -2.5;
        direction.scale(sigma);

        let scaled_jac = sigma * jac_prod;
        let scaled_hess = sigma * hess_prod;

        assert!((direction.obj_dot() - sigma * obj_dot).abs() < 1e-14);
        assert!((direction.cons_jac_prod() - &scaled_jac).norm_max() < 1e-14);
        assert!((direction.hess_prod() - &scaled_hess).norm_max() < 1e-14);

        assert!(direction
            .check(&problem, &iterate, duals.as_ref(), 1e-12)
            .unwrap());
    }
}
