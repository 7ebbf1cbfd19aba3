//! Trust-region EQP solvers operating in the null space of the active
//! constraints.

pub mod lsqr;
pub mod steihaug;

use enum_dispatch::enum_dispatch;
use faer::Col;

use crate::aug_jac::AugJac;
use crate::direction::Direction;
use crate::iterate::Iterate;
use crate::working_step::WorkingStep;
use crate::{E, Result};

/// Contract of the EQP step computation: refine the working step into a
/// second-order direction within the reduced trust region.
#[enum_dispatch]
pub trait EqpSolve {
    fn set_time_limit(&mut self, time_limit: Option<E>);

    /// Computes the EQP direction starting from the working step. The
    /// returned [`Direction`] has all products consistent with its primal.
    fn compute_direction(
        &mut self,
        iterate: &Iterate,
        aug_jac: &dyn AugJac,
        working_step: &WorkingStep,
        multipliers: &Col<E>,
        direction: &mut Direction,
    ) -> Result<()>;

    /// Min/max Rayleigh quotient sampled in the most recent solve, if the
    /// solver tracks curvature.
    fn rayleigh(&self) -> Option<(E, E)>;
}

#[enum_dispatch(EqpSolve)]
pub enum EqpSolver {
    Steihaug(steihaug::SteihaugSolver),
    Lsqr(lsqr::LsqrSolver),
}

/// The nonnegative `tau` with `||z + tau * d|| = radius`, given
/// `||z|| <= radius` and `d != 0`.
pub(crate) fn boundary_intersection(z: &Col<E>, d: &Col<E>, radius: E) -> E {
    let d_nrm_sq = d.squared_norm_l2();

    debug_assert!(d_nrm_sq > 0.);

    let z_dot_d = crate::linalg::vector_ops::dot(z.as_ref(), d.as_ref());

    -z_dot_d / d_nrm_sq
        + ((z_dot_d / d_nrm_sq).powi(2) + (radius * radius - z.squared_norm_l2()) / d_nrm_sq)
            .max(0.)
            .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_intersection() {
        let z = Col::from_fn(2, |i| [1., 0.][i]);
        let d = Col::from_fn(2, |i| [0., 1.][i]);

        let tau = boundary_intersection(&z, &d, 2.);

        let boundary = &z + tau * &d;
        assert!((boundary.norm_l2() - 2.).abs() < 1e-12);
        assert!(tau >= 0.);
    }
}
