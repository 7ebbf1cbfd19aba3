//! Line searches over the quadratic merit model.
//!
//! The Cauchy step is scaled along the LP direction; the trial step is
//! found on the segment between the Cauchy and Newton directions, either
//! by Armijo backtracking or by exact minimization over the piecewise
//! quadratic model.

use faer::Col;
use tracing::debug;

use crate::direction::Direction;
use crate::iterate::Iterate;
use crate::merit::Merit;
use crate::problem::SharedProblem;
use crate::{E, Result, Settings, SleqpError};

const MAX_BACKTRACKS: usize = 10_000;

pub struct LineSearch {
    problem: SharedProblem,

    cauchy_tau: E,
    cauchy_eta: E,
    linesearch_tau: E,
    linesearch_eta: E,
    linesearch_cutoff: E,

    penalty: E,
    trust_radius: E,
}

impl LineSearch {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Self {
        Self {
            problem,
            cauchy_tau: settings.cauchy_tau,
            cauchy_eta: settings.cauchy_eta,
            linesearch_tau: settings.linesearch_tau,
            linesearch_eta: settings.linesearch_eta,
            linesearch_cutoff: settings.linesearch_cutoff,
            penalty: 0.,
            trust_radius: 0.,
        }
    }

    /// Installs the penalty parameter and the EQP trust radius used by
    /// subsequent searches.
    pub fn set_iterate(&mut self, penalty: E, trust_radius: E) {
        self.penalty = penalty;
        self.trust_radius = trust_radius;
    }

    /// Scales the LP direction by a backtracking search on the quadratic
    /// merit model. Returns the quadratic merit value of the scaled step
    /// and whether the full step was kept.
    pub fn cauchy_step(
        &self,
        merit: &Merit,
        iterate: &Iterate,
        direction: &mut Direction,
    ) -> Result<(E, bool)> {
        let merit_value = merit.func(iterate, self.penalty);

        // Clamp the step into the EQP trust region first
        let norm = direction.norm();

        if norm > self.trust_radius {
            direction.scale(self.trust_radius / norm);
        }

        let linear_value = merit.linear(iterate, direction, self.penalty);

        // The directional derivative of the merit model at zero
        let derivative = linear_value - merit_value;

        let mut alpha = 1.;

        for _ in 0..MAX_BACKTRACKS {
            let quadratic_value = merit.quadratic(iterate, direction, self.penalty);

            if quadratic_value <= merit_value + self.cauchy_eta * alpha * derivative {
                let full_step = alpha == 1.;

                return Ok((quadratic_value, full_step));
            }

            if alpha <= self.linesearch_cutoff {
                direction.scale(0.);

                return Ok((merit_value, false));
            }

            direction.scale(self.cauchy_tau);
            alpha *= self.cauchy_tau;
        }

        Err(SleqpError::internal("Cauchy line search failed to converge"))
    }

    /// Armijo backtracking over the segment from the Cauchy to the Newton
    /// direction. Returns the step length and the quadratic merit value of
    /// the produced trial direction.
    pub fn trial_step(
        &self,
        merit: &Merit,
        iterate: &Iterate,
        cauchy: &Direction,
        cauchy_quadratic_value: E,
        newton: &Direction,
        trial: &mut Direction,
    ) -> Result<(E, E)> {
        let mut segment = newton.clone();
        segment.add_scaled(cauchy, -1.);

        // Directional derivative of the quadratic merit at the Cauchy step
        // along the segment, taken from the linear model
        let derivative =
            merit.linear_directional_derivative(iterate, cauchy, &segment, self.penalty);

        let zero_value = cauchy_quadratic_value;

        let mut alpha = self.max_step_length(iterate, cauchy, &segment);

        let mut iteration = 0;

        loop {
            iteration += 1;

            if iteration > MAX_BACKTRACKS {
                return Err(SleqpError::internal("trial line search failed to converge"));
            }

            trial.interpolate(cauchy, newton, alpha);

            let quadratic_value = merit.quadratic(iterate, trial, self.penalty);

            if quadratic_value <= zero_value + self.linesearch_eta * alpha * derivative {
                debug!(
                    "Cauchy-Newton line search converged after {} iterations (step length {:.3e})",
                    iteration, alpha
                );

                return Ok((alpha, quadratic_value));
            }

            if alpha <= self.linesearch_cutoff {
                trial.copy_from(cauchy);

                return Ok((0., zero_value));
            }

            alpha *= self.linesearch_tau;
        }
    }

    /// Exact minimization of the piecewise quadratic merit model over the
    /// segment. The violation term is piecewise linear in the step length,
    /// so the model is quadratic between breakpoints; every segment
    /// minimizer and breakpoint is a candidate.
    pub fn trial_step_exact(
        &self,
        merit: &Merit,
        iterate: &Iterate,
        cauchy: &Direction,
        cauchy_quadratic_value: E,
        newton: &Direction,
        trial: &mut Direction,
    ) -> Result<(E, E)> {
        let mut segment = newton.clone();
        segment.add_scaled(cauchy, -1.);

        let alpha_max = self.max_step_length(iterate, cauchy, &segment);

        let mut candidates = self.violation_breakpoints(iterate, cauchy, &segment, alpha_max);

        // Segment minimizers of the smooth part between breakpoints
        let curvature = segment.quadratic_term();

        if curvature > 0. {
            let mut boundaries = vec![0.];
            boundaries.extend(candidates.iter().copied());
            boundaries.push(alpha_max);
            boundaries.sort_by(E::total_cmp);

            for window in boundaries.windows(2) {
                let midpoint = 0.5 * (window[0] + window[1]);

                let mut probe = Direction::zeros(&self.problem);
                probe.interpolate(cauchy, newton, midpoint);

                let slope = merit.linear_directional_derivative(
                    iterate,
                    &probe,
                    &segment,
                    self.penalty,
                ) + midpoint * curvature
                    + crate::linalg::vector_ops::dot(
                        cauchy.primal().as_ref(),
                        segment.hess_prod().as_ref(),
                    );

                let minimizer = midpoint - slope / curvature;

                if minimizer > window[0] && minimizer < window[1] {
                    candidates.push(minimizer);
                }
            }
        }

        candidates.push(0.);
        candidates.push(alpha_max);

        let mut best_alpha = 0.;
        let mut best_value = cauchy_quadratic_value;

        for &alpha in &candidates {
            if !(0. ..=alpha_max).contains(&alpha) {
                continue;
            }

            trial.interpolate(cauchy, newton, alpha);

            let value = merit.quadratic(iterate, trial, self.penalty);

            if value < best_value {
                best_value = value;
                best_alpha = alpha;
            }
        }

        trial.interpolate(cauchy, newton, best_alpha);

        Ok((best_alpha, best_value))
    }

    /// Step lengths at which a linearized constraint crosses one of its
    /// bounds along the segment.
    fn violation_breakpoints(
        &self,
        iterate: &Iterate,
        cauchy: &Direction,
        segment: &Direction,
        alpha_max: E,
    ) -> Vec<E> {
        let base: Col<E> = iterate.cons_val() + cauchy.cons_jac_prod();

        let mut breakpoints = Vec::new();

        for i in 0..self.problem.num_cons() {
            let rate = segment.cons_jac_prod()[i];

            if rate == 0. {
                continue;
            }

            for bound in [self.problem.cons_lb()[i], self.problem.cons_ub()[i]] {
                if !bound.is_finite() {
                    continue;
                }

                let crossing = (bound - base[i]) / rate;

                if crossing > 0. && crossing < alpha_max {
                    breakpoints.push(crossing);
                }
            }
        }

        breakpoints.sort_by(E::total_cmp);
        breakpoints.dedup();

        breakpoints
    }

    /// The largest step length keeping `x + cauchy + alpha * segment`
    /// inside the variable box, capped at one.
    fn max_step_length(&self, iterate: &Iterate, cauchy: &Direction, segment: &Direction) -> E {
        let mut max_step: E = 1.;

        for j in 0..self.problem.num_vars() {
            let base = iterate.primal()[j] + cauchy.primal()[j];
            let rate = segment.primal()[j];

            if rate == 0. {
                continue;
            }

            let upper_diff = self.problem.var_ub()[j] - base;
            let lower_diff = self.problem.var_lb()[j] - base;

            if rate > 0. && upper_diff.is_finite() && upper_diff > 0. {
                max_step = max_step.min(upper_diff / rate);
            } else if rate > 0. && upper_diff.is_finite() && upper_diff <= 0. {
                max_step = 0.;
            }

            if rate < 0. && lower_diff.is_finite() && lower_diff < 0. {
                max_step = max_step.min(lower_diff / rate);
            } else if rate < 0. && lower_diff.is_finite() && lower_diff >= 0. {
                max_step = 0.;
            }
        }

        max_step.max(0.)
    }
}
