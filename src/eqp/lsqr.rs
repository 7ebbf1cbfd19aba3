//! LSQR trust-region solver for least-squares functions.
//!
//! Minimizes `||r + J_r (d0 + z)||` over steps `z` in the null space of
//! the active rows, using Golub-Kahan bidiagonalization with a Givens
//! sweep, truncated at convergence or at the trust-region boundary.

use faer::Col;
use tracing::debug;

use crate::aug_jac::AugJac;
use crate::direction::Direction;
use crate::eqp::{boundary_intersection, EqpSolve};
use crate::func::lsq::SharedLsqFunc;
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::working_step::WorkingStep;
use crate::{E, Result, Settings, SleqpError};

pub struct LsqrSolver {
    problem: SharedProblem,
    lsq_func: SharedLsqFunc,

    rel_tol: E,
    time_limit: Option<E>,
}

impl LsqrSolver {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Result<Self> {
        let lsq_func = problem.func().borrow().lsq_func().ok_or_else(|| {
            SleqpError::illegal_argument(
                "the LSQR solver is only available for least-squares functions",
            )
        })?;

        Ok(Self {
            problem,
            lsq_func,
            rel_tol: settings.newton_relative_tol,
            time_limit: None,
        })
    }

    fn forward(&self, aug_jac: &dyn AugJac, v: &Col<E>) -> Result<Col<E>> {
        let (projected, _) = aug_jac.project(v)?;

        Ok(self.lsq_func.borrow().jac_forward(projected.as_ref())?)
    }

    fn adjoint(&self, aug_jac: &dyn AugJac, u: &Col<E>) -> Result<Col<E>> {
        let pulled = self.lsq_func.borrow().jac_adjoint(u.as_ref())?;

        let (projected, _) = aug_jac.project(&pulled)?;

        Ok(projected)
    }

    fn solve_lsqr(
        &self,
        aug_jac: &dyn AugJac,
        rhs: &Col<E>,
        radius: E,
    ) -> Result<Col<E>> {
        let forward_dim = self.problem.num_vars();

        let mut x: Col<E> = Col::zeros(forward_dim);

        let mut u = rhs.clone();
        let mut beta = normalize(&mut u);

        if beta == 0. {
            return Ok(x);
        }

        let mut v = self.adjoint(aug_jac, &u)?;
        let mut alpha = normalize(&mut v);

        if alpha == 0. {
            return Ok(x);
        }

        let mut w = v.clone();

        let mut phi_bar = beta;
        let mut rho_bar = alpha;

        for iteration in 1..=forward_dim {
            // Continue the bidiagonalization
            let p = self.forward(aug_jac, &v)?;
            u = &p - alpha * &u;
            beta = normalize(&mut u);

            let q = self.adjoint(aug_jac, &u)?;
            v = &q - beta * &v;
            alpha = normalize(&mut v);

            // Next orthogonal transformation (Givens rotation)
            let rho = (rho_bar * rho_bar + beta * beta).sqrt();
            let c = rho_bar / rho;
            let s = beta / rho;
            let theta = s * alpha;
            rho_bar = -c * alpha;
            let phi = c * phi_bar;
            phi_bar = s * phi_bar;

            let candidate = &x + (phi / rho) * &w;

            if candidate.norm_l2() > radius {
                let step = &candidate - &x;

                let tau = boundary_intersection(&x, &step, radius);

                x += tau * &step;

                debug!(
                    "LSQR terminated with a boundary solution after {} steps",
                    iteration
                );

                return Ok(x);
            }

            x = candidate;

            w = &v - (theta / rho) * &w;

            let opt_res = phi_bar * alpha * c.abs();

            debug!(
                "LSQR iteration {}, residuum {:.3e}, optimality {:.3e}",
                iteration, phi_bar, opt_res
            );

            if opt_res <= self.rel_tol {
                break;
            }
        }

        Ok(x)
    }
}

fn normalize(vec: &mut Col<E>) -> E {
    let norm = vec.norm_l2();

    if norm != 0. {
        *vec = (1. / norm) * &*vec;
    }

    norm
}

impl EqpSolve for LsqrSolver {
    fn set_time_limit(&mut self, time_limit: Option<E>) {
        self.time_limit = time_limit;
    }

    fn compute_direction(
        &mut self,
        iterate: &Iterate,
        aug_jac: &dyn AugJac,
        working_step: &WorkingStep,
        multipliers: &Col<E>,
        direction: &mut Direction,
    ) -> Result<()> {
        if let Some(limit) = self.time_limit {
            if limit <= 0. {
                return Err(SleqpError::AbortTime);
            }
        }

        let radius = working_step.reduced_trust_radius();

        // rhs = -(r + J_r d0)
        let residuals = self.lsq_func.borrow().residuals()?;

        let forward_offset = self
            .lsq_func
            .borrow()
            .jac_forward(working_step.direction().primal().as_ref())?;

        let rhs = -1. * (&residuals + &forward_offset);

        let step = self.solve_lsqr(aug_jac, &rhs, radius)?;

        // The LSQR iterates are built from projected vectors; project once
        // more to guard against drift out of the null space.
        let (projected_step, _) = aug_jac.project(&step)?;

        direction.set_primal(working_step.direction().primal() + &projected_step);

        direction.reset(&self.problem, iterate, multipliers.as_ref())?;

        Ok(())
    }

    fn rayleigh(&self) -> Option<(E, E)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aug_jac::UnconstrainedAugJac;
    use crate::func::lsq::{LsqAdapter, LsqFunc};
    use crate::func::ValueReason;
    use crate::problem::Problem;
    use crate::working_step::WorkingStep;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct AffineResiduals {
        x: Col<E>,
    }

    impl LsqFunc for AffineResiduals {
        fn num_vars(&self) -> crate::I {
            2
        }

        fn num_residuals(&self) -> crate::I {
            2
        }

        fn set_value(&mut self, x: faer::ColRef<'_, E>, _reason: ValueReason) -> Result<bool> {
            self.x = x.to_owned();
            Ok(false)
        }

        fn residuals(&self) -> Result<Col<E>> {
            // r(x) = (x0 - 3, x1 + 1)
            Ok(Col::from_fn(2, |i| {
                [self.x[0] - 3., self.x[1] + 1.][i]
            }))
        }

        fn jac_forward(&self, d: faer::ColRef<'_, E>) -> Result<Col<E>> {
            Ok(d.to_owned())
        }

        fn jac_adjoint(&self, w: faer::ColRef<'_, E>) -> Result<Col<E>> {
            Ok(w.to_owned())
        }
    }

    #[test]
    fn test_lsqr_solves_affine_least_squares() {
        let inner: SharedLsqFunc = Rc::new(RefCell::new(AffineResiduals { x: Col::zeros(2) }));

        let func = Rc::new(RefCell::new(LsqAdapter::new(inner)));

        let problem = Problem::new_simple(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |_| E::INFINITY),
            Col::zeros(0),
            Col::zeros(0),
        )
        .unwrap();

        let x = Col::zeros(2);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        let aug_jac = UnconstrainedAugJac::new(problem.clone());

        let settings = Settings::default();
        let mut working_step = WorkingStep::new(problem.clone(), &settings);
        working_step
            .set_iterate(&iterate, &aug_jac, 100., 1.)
            .unwrap();

        let mut solver = LsqrSolver::new(problem.clone(), &settings).unwrap();

        let multipliers = Col::zeros(0);
        let mut direction = Direction::zeros(&problem);

        solver
            .compute_direction(&iterate, &aug_jac, &working_step, &multipliers, &mut direction)
            .unwrap();

        // The residuals vanish at (3, -1)
        assert!((direction.primal()[0] - 3.).abs() < 1e-8);
        assert!((direction.primal()[1] + 1.).abs() < 1e-8);
    }
}
