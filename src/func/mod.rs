//! The function-callback capability interface.
//!
//! A [`Func`] supplies objective, gradient, constraint, Jacobian, and
//! Hessian-product evaluations at a point previously fixed by
//! [`Func::set_value`]. Wrappers (quasi-Newton, scaling, least-squares,
//! dynamic accuracy) implement the same interface and delegate to an inner
//! function, so every consumer goes through a single contract.

pub mod lsq;
pub mod quasi_newton;

use std::cell::RefCell;
use std::rc::Rc;

use faer::sparse::SparseColMat;
use faer::{Col, ColRef};

use crate::sparse::SparseVec;
use crate::{E, I, Result};

/// Why a point is being fixed via [`Func::set_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueReason {
    Init,
    Checking,
    TryingIterate,
    AcceptedIterate,
    Restoration,
}

/// Variant tag used by the solver to select specialized code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FuncType {
    #[default]
    Exact,
    Lsq,
    Dynamic,
}

pub type SharedFunc = Rc<RefCell<dyn Func>>;

/// User-supplied problem functions.
///
/// `set_value` precedes any evaluation; it may reject the point, forcing
/// the solver to treat it as infeasible. `cons_val`/`cons_jac` are only
/// called when `num_cons() > 0`.
pub trait Func {
    fn num_vars(&self) -> I;

    fn num_cons(&self) -> I;

    /// Fixes the evaluation point. Returns `true` to reject the point.
    fn set_value(&mut self, x: ColRef<'_, E>, reason: ValueReason) -> Result<bool>;

    fn obj_val(&self) -> Result<E>;

    fn obj_grad(&self) -> Result<SparseVec>;

    fn cons_val(&self) -> Result<SparseVec> {
        Ok(SparseVec::empty(self.num_cons()))
    }

    fn cons_jac(&self) -> Result<SparseColMat<I, E>> {
        SparseColMat::try_new_from_triplets(self.num_cons(), self.num_vars(), &[])
            .map_err(|_| crate::SleqpError::internal("empty Jacobian"))
    }

    /// Computes `(obj_dual * ∇²f + Σ λ_i ∇²c_i) * d`.
    fn hess_prod(&self, obj_dual: E, direction: ColRef<'_, E>, cons_duals: ColRef<'_, E>)
    -> Result<Col<E>>;

    fn func_type(&self) -> FuncType {
        FuncType::Exact
    }

    /// The underlying least-squares function, for functions in residual
    /// form.
    fn lsq_func(&self) -> Option<lsq::SharedLsqFunc> {
        None
    }

    /// Current evaluation accuracy of a dynamic-accuracy function.
    fn dyn_accuracy(&self) -> Option<E> {
        None
    }

    /// Tightens the evaluation accuracy of a dynamic-accuracy function.
    fn set_dyn_accuracy(&mut self, _accuracy: E) -> Result<()> {
        Ok(())
    }
}

/// A [`Func`] built from closures, for problems without internal state.
///
/// Constraint callbacks may be omitted for unconstrained problems.
pub struct ClosureFunc {
    num_vars: I,
    num_cons: I,
    x: Col<E>,
    obj: Box<dyn Fn(ColRef<'_, E>) -> E>,
    grad: Box<dyn Fn(ColRef<'_, E>) -> Col<E>>,
    cons: Option<Box<dyn Fn(ColRef<'_, E>) -> Col<E>>>,
    jac: Option<Box<dyn Fn(ColRef<'_, E>) -> SparseColMat<I, E>>>,
    hess: Box<dyn Fn(ColRef<'_, E>, E, ColRef<'_, E>, ColRef<'_, E>) -> Col<E>>,
}

impl ClosureFunc {
    pub fn new(
        num_vars: I,
        num_cons: I,
        obj: impl Fn(ColRef<'_, E>) -> E + 'static,
        grad: impl Fn(ColRef<'_, E>) -> Col<E> + 'static,
        cons: Option<Box<dyn Fn(ColRef<'_, E>) -> Col<E>>>,
        jac: Option<Box<dyn Fn(ColRef<'_, E>) -> SparseColMat<I, E>>>,
        hess: impl Fn(ColRef<'_, E>, E, ColRef<'_, E>, ColRef<'_, E>) -> Col<E> + 'static,
    ) -> Self {
        Self {
            num_vars,
            num_cons,
            x: Col::zeros(num_vars),
            obj: Box::new(obj),
            grad: Box::new(grad),
            cons,
            jac,
            hess: Box::new(hess),
        }
    }

    pub fn into_shared(self) -> SharedFunc {
        Rc::new(RefCell::new(self))
    }
}

impl Func for ClosureFunc {
    fn num_vars(&self) -> I {
        self.num_vars
    }

    fn num_cons(&self) -> I {
        self.num_cons
    }

    fn set_value(&mut self, x: ColRef<'_, E>, _reason: ValueReason) -> Result<bool> {
        self.x = x.to_owned();
        Ok(false)
    }

    fn obj_val(&self) -> Result<E> {
        Ok((self.obj)(self.x.as_ref()))
    }

    fn obj_grad(&self) -> Result<SparseVec> {
        let grad = (self.grad)(self.x.as_ref());
        Ok(SparseVec::from_col(grad.as_ref(), 0.))
    }

    fn cons_val(&self) -> Result<SparseVec> {
        match &self.cons {
            Some(cons) => {
                let val = (cons)(self.x.as_ref());
                Ok(SparseVec::from_col(val.as_ref(), 0.))
            }
            None => Ok(SparseVec::empty(self.num_cons)),
        }
    }

    fn cons_jac(&self) -> Result<SparseColMat<I, E>> {
        match &self.jac {
            Some(jac) => Ok((jac)(self.x.as_ref())),
            None => SparseColMat::try_new_from_triplets(self.num_cons, self.num_vars, &[])
                .map_err(|_| crate::SleqpError::internal("empty Jacobian")),
        }
    }

    fn hess_prod(
        &self,
        obj_dual: E,
        direction: ColRef<'_, E>,
        cons_duals: ColRef<'_, E>,
    ) -> Result<Col<E>> {
        Ok((self.hess)(self.x.as_ref(), obj_dual, direction, cons_duals))
    }
}
