//! Limited-memory quasi-Newton Hessian approximations.
//!
//! [`QuasiNewtonFunc`] wraps an inner [`Func`] and serves `hess_prod` from
//! a limited-memory BFGS (plain or damped) or SR1 approximation built from
//! accepted steps. All other operations delegate to the inner function.

use std::cell::RefCell;
use std::rc::Rc;

use faer::{Col, ColRef};
use tracing::debug;

use crate::func::{Func, FuncType, SharedFunc, ValueReason};
use crate::linalg::vector_ops::dot;
use crate::settings::HessianEval;
use crate::sparse::SparseVec;
use crate::{E, I, Result, Settings};

const DAMPING_FACTOR: E = 0.2;
const SR1_SKIP_TOL: E = 1e-8;

struct MemoryPair {
    step: Col<E>,
    grad_diff: Col<E>,
    /// `B_prev * step`, with `B_prev` the approximation before this pair.
    prod: Col<E>,
    /// `step . grad_diff` (after damping for BFGS).
    step_dot_diff: E,
    /// `step . prod`.
    step_dot_prod: E,
}

/// Wraps an inner function, replacing its Hessian product by a
/// limited-memory quasi-Newton approximation.
pub struct QuasiNewtonFunc {
    inner: SharedFunc,
    variant: HessianEval,
    num_iterates: I,
    initial_scale: E,
    pairs: Vec<MemoryPair>,
}

pub type SharedQuasiNewton = Rc<RefCell<QuasiNewtonFunc>>;

impl QuasiNewtonFunc {
    pub fn new(inner: SharedFunc, settings: &Settings) -> Self {
        assert!(settings.hessian_eval != HessianEval::Exact);

        Self {
            inner,
            variant: settings.hessian_eval,
            num_iterates: settings.quasi_newton_num_iterates.max(1),
            initial_scale: 1.,
            pairs: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.pairs.clear();
        self.initial_scale = 1.;
    }

    /// Product of the current approximation with `d`.
    fn product(&self, d: ColRef<'_, E>) -> Col<E> {
        let mut result = self.initial_scale * d.to_owned();

        for pair in &self.pairs {
            match self.variant {
                HessianEval::Sr1 => {
                    // B += v v^T / (v . s) with v = y - B_prev s
                    let v = &pair.grad_diff - &pair.prod;
                    let denom = pair.step_dot_diff - pair.step_dot_prod;

                    if denom.abs() > SR1_SKIP_TOL * pair.step.norm_l2() * v.norm_l2() {
                        let factor = dot(v.as_ref(), d) / denom;
                        result += factor * v;
                    }
                }
                _ => {
                    // B += y y^T / (y . s) - (B_prev s)(B_prev s)^T / (s . B_prev s)
                    let diff_factor = dot(pair.grad_diff.as_ref(), d) / pair.step_dot_diff;
                    let prod_factor = dot(pair.prod.as_ref(), d) / pair.step_dot_prod;

                    result += diff_factor * &pair.grad_diff;
                    result -= prod_factor * &pair.prod;
                }
            }
        }

        result
    }

    /// Records an accepted step and the corresponding difference of
    /// Lagrangian gradients.
    pub fn push(&mut self, step: Col<E>, grad_diff: Col<E>) {
        let step_dot_diff = dot(step.as_ref(), grad_diff.as_ref());
        let step_norm_sq = step.squared_norm_l2();

        if step_norm_sq == 0. {
            return;
        }

        if self.pairs.len() == self.num_iterates {
            self.pairs.remove(0);
            self.recompute_products();
        }

        // Scale B_0 from the most recent pair
        if step_dot_diff > 0. {
            self.initial_scale = grad_diff.squared_norm_l2() / step_dot_diff;
            self.recompute_products();
        }

        let prod = self.product(step.as_ref());
        let step_dot_prod = dot(step.as_ref(), prod.as_ref());

        let (grad_diff, step_dot_diff) = match self.variant {
            HessianEval::DampedBfgs if step_dot_diff < DAMPING_FACTOR * step_dot_prod => {
                let theta =
                    (1. - DAMPING_FACTOR) * step_dot_prod / (step_dot_prod - step_dot_diff);

                debug!("Damping quasi-Newton update with factor {}", theta);

                let damped = theta * &grad_diff + (1. - theta) * &prod;
                let damped_dot = dot(step.as_ref(), damped.as_ref());

                (damped, damped_dot)
            }
            HessianEval::SimpleBfgs | HessianEval::DampedBfgs if step_dot_diff <= 0. => {
                debug!("Skipping quasi-Newton update with negative curvature");
                return;
            }
            _ => (grad_diff, step_dot_diff),
        };

        self.pairs.push(MemoryPair {
            step,
            grad_diff,
            prod,
            step_dot_diff,
            step_dot_prod,
        });
    }

    fn recompute_products(&mut self) {
        for k in 0..self.pairs.len() {
            let (head, tail) = self.pairs.split_at_mut(k);
            let pair = &mut tail[0];

            let mut prod = self.initial_scale * pair.step.to_owned();

            for prev in head.iter() {
                match self.variant {
                    HessianEval::Sr1 => {
                        let v = &prev.grad_diff - &prev.prod;
                        let denom = prev.step_dot_diff - prev.step_dot_prod;

                        if denom.abs() > SR1_SKIP_TOL * prev.step.norm_l2() * v.norm_l2() {
                            let factor = dot(v.as_ref(), pair.step.as_ref()) / denom;
                            prod += factor * v;
                        }
                    }
                    _ => {
                        let diff_factor =
                            dot(prev.grad_diff.as_ref(), pair.step.as_ref()) / prev.step_dot_diff;
                        let prod_factor =
                            dot(prev.prod.as_ref(), pair.step.as_ref()) / prev.step_dot_prod;

                        prod += diff_factor * &prev.grad_diff;
                        prod -= prod_factor * &prev.prod;
                    }
                }
            }

            pair.step_dot_prod = dot(pair.step.as_ref(), prod.as_ref());
            pair.prod = prod;
        }
    }
}

impl Func for QuasiNewtonFunc {
    fn num_vars(&self) -> I {
        self.inner.borrow().num_vars()
    }

    fn num_cons(&self) -> I {
        self.inner.borrow().num_cons()
    }

    fn set_value(&mut self, x: ColRef<'_, E>, reason: ValueReason) -> Result<bool> {
        self.inner.borrow_mut().set_value(x, reason)
    }

    fn obj_val(&self) -> Result<E> {
        self.inner.borrow().obj_val()
    }

    fn obj_grad(&self) -> Result<SparseVec> {
        self.inner.borrow().obj_grad()
    }

    fn cons_val(&self) -> Result<SparseVec> {
        self.inner.borrow().cons_val()
    }

    fn cons_jac(&self) -> Result<faer::sparse::SparseColMat<I, E>> {
        self.inner.borrow().cons_jac()
    }

    fn hess_prod(
        &self,
        obj_dual: E,
        direction: ColRef<'_, E>,
        _cons_duals: ColRef<'_, E>,
    ) -> Result<Col<E>> {
        let mut product = self.product(direction);

        if obj_dual != 1. {
            product = obj_dual * product;
        }

        Ok(product)
    }

    fn func_type(&self) -> FuncType {
        self.inner.borrow().func_type()
    }

    fn lsq_func(&self) -> Option<crate::func::lsq::SharedLsqFunc> {
        self.inner.borrow().lsq_func()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::ClosureFunc;

    fn quadratic_inner() -> SharedFunc {
        // f(x) = x0^2 + 2 x1^2
        ClosureFunc::new(
            2,
            0,
            |x| x[0] * x[0] + 2. * x[1] * x[1],
            |x| Col::from_fn(2, |i| [2. * x[0], 4. * x[1]][i]),
            None,
            None,
            |_, _, d, _| Col::from_fn(2, |i| [2. * d[0], 4. * d[1]][i]),
        )
        .into_shared()
    }

    #[test]
    fn test_bfgs_matches_quadratic_curvature() {
        let mut settings = Settings::default();
        settings.hessian_eval = HessianEval::DampedBfgs;

        let mut func = QuasiNewtonFunc::new(quadratic_inner(), &settings);

        // Feed exact curvature pairs of the quadratic: y = H s
        let s1 = Col::from_fn(2, |i| [1., 0.][i]);
        let y1 = Col::from_fn(2, |i| [2., 0.][i]);
        func.push(s1, y1);

        let s2 = Col::from_fn(2, |i| [0., 1.][i]);
        let y2 = Col::from_fn(2, |i| [0., 4.][i]);
        func.push(s2, y2);

        // After two exact pairs, products along the pair directions match H
        let d = Col::from_fn(2, |i| [1., 1.][i]);
        let product = func
            .hess_prod(1., d.as_ref(), Col::zeros(0).as_ref())
            .unwrap();

        assert!((product[0] - 2.).abs() < 1e-8, "got {}", product[0]);
        assert!((product[1] - 4.).abs() < 1e-8, "got {}", product[1]);
    }

    #[test]
    fn test_sr1_skips_degenerate_pairs() {
        let mut settings = Settings::default();
        settings.hessian_eval = HessianEval::Sr1;
        settings.quasi_newton_num_iterates = 2;

        let mut func = QuasiNewtonFunc::new(quadratic_inner(), &settings);

        let s = Col::from_fn(2, |i| [1., 0.][i]);
        // y = B_0 s makes v = 0; the update must be skipped without panicking
        let y = Col::from_fn(2, |i| [1., 0.][i]);
        func.push(s, y);

        let d = Col::from_fn(2, |i| [1., 2.][i]);
        let product = func
            .hess_prod(1., d.as_ref(), Col::zeros(0).as_ref())
            .unwrap();

        assert!(product[0].is_finite());
        assert!(product[1].is_finite());
    }
}
