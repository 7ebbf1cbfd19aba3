//! An iterative solver for the trust-region subproblem using projected
//! conjugate gradients with Steihaug's modification for the boundary
//! case. The augmented Jacobian system projects onto the null space of
//! the active set identified by the LP step.

use faer::Col;
use tracing::debug;

use crate::aug_jac::AugJac;
use crate::direction::Direction;
use crate::eqp::{boundary_intersection, EqpSolve};
use crate::iterate::Iterate;
use crate::linalg::vector_ops::dot;
use crate::problem::SharedProblem;
use crate::sparse;
use crate::working_step::WorkingStep;
use crate::{E, I, Result, Settings, SleqpError};

pub struct SteihaugSolver {
    problem: SharedProblem,

    rel_tol: E,
    max_iter: Option<I>,
    time_limit: Option<E>,

    min_rayleigh: E,
    max_rayleigh: E,
}

impl SteihaugSolver {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Self {
        Self {
            problem,
            rel_tol: settings.newton_relative_tol,
            max_iter: settings.max_newton_iterations,
            time_limit: None,
            min_rayleigh: 0.,
            max_rayleigh: 0.,
        }
    }

    /// The gradient of the EQP objective at the initial step: the
    /// objective gradient plus the curvature along the initial step plus
    /// the penalty contribution of constraints violated there.
    fn eqp_gradient(&self, iterate: &Iterate, working_step: &WorkingStep) -> Col<E> {
        let mut gradient = iterate.obj_grad() + working_step.direction().hess_prod();

        let violated = working_step.violated_cons_multipliers();

        if violated.norm_max() > 0. {
            gradient += sparse::mat_t_vec(iterate.cons_jac().as_ref(), violated.as_ref());
        }

        gradient
    }

    /// Projected CG on `min g^T z + 1/2 z^T H z` over the null space of
    /// the active rows, `||z|| <= radius`. Returns the step `z`.
    fn solve_cg(
        &mut self,
        aug_jac: &dyn AugJac,
        multipliers: &Col<E>,
        gradient: &Col<E>,
        radius: E,
    ) -> Result<Col<E>> {
        let num_vars = self.problem.num_vars();

        self.min_rayleigh = 0.;
        self.max_rayleigh = 0.;

        let mut z: Col<E> = Col::zeros(num_vars);

        // r0 = g, g0 = P[r0], d0 = -g0
        let mut r = gradient.clone();

        let (mut g, _) = aug_jac.project(&r)?;

        let mut d = -1. * &g;

        let d_nrm_sq = d.squared_norm_l2();

        if d_nrm_sq < self.rel_tol * self.rel_tol {
            return Ok(z);
        }

        let mut r_dot_g = dot(r.as_ref(), g.as_ref());

        let threshold = self.rel_tol * r_dot_g.abs().max(1.);

        let mut iteration = 0;

        loop {
            if let Some(max_iter) = self.max_iter {
                if iteration >= max_iter {
                    break;
                }
            }

            iteration += 1;

            if r_dot_g.abs() < threshold {
                break;
            }

            let hess_d = self.problem.hess_prod(1., d.as_ref(), multipliers.as_ref())?;

            let d_hess_d = dot(d.as_ref(), hess_d.as_ref());

            // Curvature bookkeeping
            {
                let rayleigh = d_hess_d / d.squared_norm_l2();

                if iteration == 1 {
                    self.min_rayleigh = rayleigh;
                    self.max_rayleigh = rayleigh;
                } else {
                    self.min_rayleigh = self.min_rayleigh.min(rayleigh);
                    self.max_rayleigh = self.max_rayleigh.max(rayleigh);
                }
            }

            if d_hess_d <= 0. {
                // Negative curvature: pick the boundary intersection with
                // the smaller quadratic model value
                let d_nrm_sq = d.squared_norm_l2();
                let z_dot_d = dot(z.as_ref(), d.as_ref());

                let offset = -z_dot_d / d_nrm_sq;
                let radius_term = ((z_dot_d / d_nrm_sq).powi(2)
                    + (radius * radius - z.squared_norm_l2()) / d_nrm_sq)
                    .max(0.)
                    .sqrt();

                let tau_1 = offset + radius_term;
                let tau_2 = offset - radius_term;

                let g_dot_d = dot(gradient.as_ref(), d.as_ref());
                let z_hess_d = dot(z.as_ref(), hess_d.as_ref());

                let model = |tau: E| tau * ((g_dot_d + z_hess_d) + 0.5 * tau * d_hess_d);

                let tau = if model(tau_1) < model(tau_2) { tau_1 } else { tau_2 };

                z += tau * &d;

                debug!("CG terminated with a negative-curvature boundary step");

                break;
            }

            let alpha = r_dot_g / d_hess_d;

            z += alpha * &d;

            if z.squared_norm_l2() >= radius * radius {
                // Move back to the boundary along d
                let tau = boundary_intersection(&(&z - alpha * &d), &d, radius);

                z += (tau - alpha) * &d;

                debug!("CG terminated with a boundary step");

                break;
            }

            r += alpha * &hess_d;

            let (g_next, _) = aug_jac.project(&r)?;
            g = g_next;

            let beta = {
                let previous = r_dot_g;
                r_dot_g = dot(r.as_ref(), g.as_ref());
                r_dot_g / previous
            };

            d = beta * &d - &g;
        }

        Ok(z)
    }
}

impl EqpSolve for SteihaugSolver {
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

        let gradient = self.eqp_gradient(iterate, working_step);

        let radius = working_step.reduced_trust_radius();

        let cg_step = self.solve_cg(aug_jac, multipliers, &gradient, radius)?;

        direction.set_primal(working_step.direction().primal() + &cg_step);

        direction.reset(&self.problem, iterate, multipliers.as_ref())?;

        Ok(())
    }

    fn rayleigh(&self) -> Option<(E, E)> {
        Some((self.min_rayleigh, self.max_rayleigh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aug_jac::UnconstrainedAugJac;
    use crate::func::{ClosureFunc, ValueReason};
    use crate::problem::Problem;
    use crate::working_step::WorkingStep;

    fn quadratic_problem() -> SharedProblem {
        // f(x) = 1/2 (x0^2 + x1^2) - x0 - 2 x1, minimizer (1, 2)
        let func = ClosureFunc::new(
            2,
            0,
            |x| 0.5 * (x[0] * x[0] + x[1] * x[1]) - x[0] - 2. * x[1],
            |x| Col::from_fn(2, |i| [x[0] - 1., x[1] - 2.][i]),
            None,
            None,
            |_, _, d, _| d.to_owned(),
        )
        .into_shared();

        Problem::new_simple(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |_| E::INFINITY),
            Col::zeros(0),
            Col::zeros(0),
        )
        .unwrap()
    }

    #[test]
    fn test_interior_newton_step() {
        let problem = quadratic_problem();

        let x = Col::zeros(2);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        let aug_jac = UnconstrainedAugJac::new(problem.clone());

        let settings = Settings::default();
        let mut working_step = WorkingStep::new(problem.clone(), &settings);
        working_step
            .set_iterate(&iterate, &aug_jac, 10., 1.)
            .unwrap();

        let mut solver = SteihaugSolver::new(problem.clone(), &settings);

        let multipliers = Col::zeros(0);
        let mut direction = Direction::zeros(&problem);

        solver
            .compute_direction(&iterate, &aug_jac, &working_step, &multipliers, &mut direction)
            .unwrap();

        // Full Newton step of the strictly convex quadratic
        assert!((direction.primal()[0] - 1.).abs() < 1e-6);
        assert!((direction.primal()[1] - 2.).abs() < 1e-6);

        // Identity Hessian: unit Rayleigh quotients
        let (min_rayleigh, max_rayleigh) = solver.rayleigh().unwrap();
        assert!((min_rayleigh - 1.).abs() < 1e-10);
        assert!((max_rayleigh - 1.).abs() < 1e-10);
    }

    #[test]
    fn test_boundary_step_respects_radius() {
        let problem = quadratic_problem();

        let x = Col::zeros(2);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        let aug_jac = UnconstrainedAugJac::new(problem.clone());

        let settings = Settings::default();
        let mut working_step = WorkingStep::new(problem.clone(), &settings);

        let radius = 0.5;
        working_step
            .set_iterate(&iterate, &aug_jac, radius, 1.)
            .unwrap();

        let mut solver = SteihaugSolver::new(problem.clone(), &settings);

        let multipliers = Col::zeros(0);
        let mut direction = Direction::zeros(&problem);

        solver
            .compute_direction(&iterate, &aug_jac, &working_step, &multipliers, &mut direction)
            .unwrap();

        assert!(direction.norm() <= radius + 1e-10);
    }
}
