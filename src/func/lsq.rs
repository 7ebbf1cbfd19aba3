//! Least-squares functions and their Gauss-Newton adapter.

use std::cell::RefCell;
use std::rc::Rc;

use faer::{Col, ColRef};

use crate::func::{Func, FuncType, ValueReason};
use crate::sparse::SparseVec;
use crate::{E, I, Result};

/// A function given in residual form `f(x) = 1/2 ||r(x)||^2`.
///
/// Only the residuals and matrix-free Jacobian products are required; the
/// LSQR trust-region solver operates directly on the forward/adjoint
/// products, while [`LsqAdapter`] serves the plain [`Func`] contract
/// through the Gauss-Newton approximation.
pub trait LsqFunc {
    fn num_vars(&self) -> I;

    fn num_residuals(&self) -> I;

    fn set_value(&mut self, x: ColRef<'_, E>, reason: ValueReason) -> Result<bool>;

    fn residuals(&self) -> Result<Col<E>>;

    /// Computes `J_r(x) * d`.
    fn jac_forward(&self, direction: ColRef<'_, E>) -> Result<Col<E>>;

    /// Computes `J_r(x)^T * w`.
    fn jac_adjoint(&self, adjoint: ColRef<'_, E>) -> Result<Col<E>>;
}

pub type SharedLsqFunc = Rc<RefCell<dyn LsqFunc>>;

/// Presents an [`LsqFunc`] through the [`Func`] interface.
///
/// The objective is `1/2 ||r||^2`, the gradient `J^T r`, and the Hessian
/// product the Gauss-Newton approximation `J^T J d`.
pub struct LsqAdapter {
    inner: SharedLsqFunc,
    residuals: Col<E>,
}

impl LsqAdapter {
    pub fn new(inner: SharedLsqFunc) -> Self {
        let num_residuals = inner.borrow().num_residuals();

        Self {
            inner,
            residuals: Col::zeros(num_residuals),
        }
    }

    pub fn inner(&self) -> &SharedLsqFunc {
        &self.inner
    }
}

impl Func for LsqAdapter {
    fn num_vars(&self) -> I {
        self.inner.borrow().num_vars()
    }

    fn num_cons(&self) -> I {
        0
    }

    fn set_value(&mut self, x: ColRef<'_, E>, reason: ValueReason) -> Result<bool> {
        let reject = self.inner.borrow_mut().set_value(x, reason)?;

        if !reject {
            self.residuals = self.inner.borrow().residuals()?;
        }

        Ok(reject)
    }

    fn obj_val(&self) -> Result<E> {
        let norm_sq = self.residuals.squared_norm_l2();
        crate::error::math_check(0.5 * norm_sq, "least-squares objective")
    }

    fn obj_grad(&self) -> Result<SparseVec> {
        let grad = self.inner.borrow().jac_adjoint(self.residuals.as_ref())?;
        Ok(SparseVec::from_col(grad.as_ref(), 0.))
    }

    fn hess_prod(
        &self,
        obj_dual: E,
        direction: ColRef<'_, E>,
        _cons_duals: ColRef<'_, E>,
    ) -> Result<Col<E>> {
        let inner = self.inner.borrow();

        let forward = inner.jac_forward(direction)?;
        let mut product = inner.jac_adjoint(forward.as_ref())?;

        if obj_dual != 1. {
            product = obj_dual * product;
        }

        Ok(product)
    }

    fn func_type(&self) -> FuncType {
        FuncType::Lsq
    }

    fn lsq_func(&self) -> Option<SharedLsqFunc> {
        Some(self.inner.clone())
    }
}
