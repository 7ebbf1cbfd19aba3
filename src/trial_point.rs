//! The trial-point solver: composes the Cauchy subsystem, the augmented
//! Jacobian, the working step, the EQP solver, and the line search into
//! the next trial iterate and its model merit value.

use faer::Col;
use tracing::debug;

use crate::aug_jac::{self, AugJac};
use crate::cauchy::{self, Cauchy, CauchyObjectiveType};
use crate::direction::Direction;
use crate::dual_estimation::DualEstimation;
use crate::eqp::{lsqr::LsqrSolver, steihaug::SteihaugSolver, EqpSolve, EqpSolver};
use crate::func::{FuncType, ValueReason};
use crate::iterate::Iterate;
use crate::linesearch::LineSearch;
use crate::merit::Merit;
use crate::penalty;
use crate::problem::SharedProblem;
use crate::settings::{LineSearchType, ParametricCauchy, TrSolver};
use crate::soc::Soc;
use crate::{clip_col, E, Result, Settings, SleqpError};

/// Outcome of a trial point computation.
pub struct TrialPointOutput {
    /// The model merit value of the trial step.
    pub model_merit: E,
    /// Whether the full Cauchy step was kept (step length one).
    pub full_step: bool,
    /// Whether the line search fell back to the Cauchy step.
    pub failed_eqp_step: bool,
    /// Whether the function rejected the trial point.
    pub reject: bool,
}

pub struct TrialPointSolver {
    problem: SharedProblem,
    settings: Settings,

    merit: Merit,
    cauchy: Box<dyn Cauchy>,
    aug_jac: Box<dyn AugJac>,
    dual_estimation: DualEstimation,
    working_step: crate::working_step::WorkingStep,
    eqp_solver: EqpSolver,
    linesearch: LineSearch,
    soc: Soc,

    cauchy_direction: Direction,
    newton_direction: Direction,
    soc_direction: Direction,
    trial_direction: Direction,

    multipliers: Col<E>,

    penalty: E,
    trust_radius: E,
    lp_trust_radius: E,

    feasibility_residuum: E,
    allow_global_reset: bool,
    performed_global_reset: bool,

    locally_infeasible: bool,
    full_cauchy_step: bool,
}

impl TrialPointSolver {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Result<Self> {
        let eqp_solver = match settings.tr_solver {
            TrSolver::SteihaugCg => {
                EqpSolver::Steihaug(SteihaugSolver::new(problem.clone(), settings))
            }
            TrSolver::Lsqr => EqpSolver::Lsqr(LsqrSolver::new(problem.clone(), settings)?),
        };

        Ok(Self {
            merit: Merit::new(problem.clone()),
            cauchy: cauchy::create_cauchy(problem.clone(), settings),
            aug_jac: aug_jac::create_aug_jac(problem.clone()),
            dual_estimation: DualEstimation::new(problem.clone(), settings),
            working_step: crate::working_step::WorkingStep::new(problem.clone(), settings),
            eqp_solver,
            linesearch: LineSearch::new(problem.clone(), settings),
            soc: Soc::new(problem.clone()),
            cauchy_direction: Direction::zeros(&problem),
            newton_direction: Direction::zeros(&problem),
            soc_direction: Direction::zeros(&problem),
            trial_direction: Direction::zeros(&problem),
            multipliers: Col::zeros(problem.num_cons()),
            penalty: 0.,
            trust_radius: 0.,
            lp_trust_radius: 0.,
            feasibility_residuum: 0.,
            allow_global_reset: false,
            performed_global_reset: false,
            locally_infeasible: false,
            full_cauchy_step: false,
            settings: settings.clone(),
            problem,
        })
    }

    pub fn set_penalty(&mut self, penalty: E) {
        debug_assert!(penalty > 0.);
        self.penalty = penalty;
    }

    pub fn penalty(&self) -> E {
        self.penalty
    }

    pub fn set_trust_radius(&mut self, trust_radius: E) {
        debug_assert!(trust_radius > 0.);
        self.trust_radius = trust_radius;
    }

    pub fn set_lp_trust_radius(&mut self, lp_trust_radius: E) {
        debug_assert!(lp_trust_radius > 0.);
        self.lp_trust_radius = lp_trust_radius;
    }

    pub fn set_penalty_info(&mut self, feasibility_residuum: E, allow_global_reset: bool) {
        self.feasibility_residuum = feasibility_residuum;
        self.allow_global_reset = allow_global_reset;
        self.performed_global_reset = false;
    }

    pub fn set_time_limit(&mut self, time_limit: Option<E>) {
        self.cauchy.set_time_limit(time_limit);
        self.eqp_solver.set_time_limit(time_limit);
    }

    pub fn locally_infeasible(&self) -> bool {
        self.locally_infeasible
    }

    pub fn performed_global_reset(&self) -> bool {
        self.performed_global_reset
    }

    /// Whether the most recent Cauchy step kept the full LP direction.
    pub fn full_cauchy_step(&self) -> bool {
        self.full_cauchy_step
    }

    pub fn multipliers(&self) -> &Col<E> {
        &self.multipliers
    }

    pub fn cauchy_step(&self) -> &Direction {
        &self.cauchy_direction
    }

    pub fn trial_step(&self) -> &Direction {
        &self.trial_direction
    }

    pub fn soc_step(&self) -> &Direction {
        &self.soc_direction
    }

    pub fn rayleigh(&self) -> Option<(E, E)> {
        self.eqp_solver.rayleigh()
    }

    /// Updates the penalty parameter through the Cauchy oracle. Must be
    /// called after a trial point computation, while the LP still holds
    /// the solution at the current iterate.
    pub fn update_penalty(&mut self, iterate: &Iterate) -> Result<()> {
        let update = penalty::update_penalty(
            &self.problem,
            iterate.obj_grad(),
            self.cauchy.as_mut(),
            self.penalty,
            self.allow_global_reset,
            self.feasibility_residuum,
        )?;

        self.penalty = update.penalty;
        self.performed_global_reset |= update.performed_global_reset;

        Ok(())
    }

    pub fn lp_trust_radius(&self) -> E {
        self.lp_trust_radius
    }

    /// Probes scaled LP trust radii around the current one and keeps the
    /// radius whose scaled Cauchy step attains the lowest model merit.
    /// The LP is left solved at the chosen radius.
    fn parametric_radius_search(&mut self, iterate: &Iterate) -> Result<()> {
        let factors: &[E] = match self.settings.parametric_cauchy {
            ParametricCauchy::Disabled => return Ok(()),
            ParametricCauchy::Coarse => &[0.5, 2.],
            ParametricCauchy::Fine => &[0.25, 0.5, 2., 4.],
        };

        self.linesearch.set_iterate(self.penalty, self.trust_radius);

        let mut probe = |solver: &mut Self, radius: E| -> Result<E> {
            solver.cauchy.set_trust_radius(radius)?;

            solver.cauchy.solve(
                Some(iterate.obj_grad()),
                solver.penalty,
                CauchyObjectiveType::Default,
            )?;

            let mut direction = Direction::zeros(&solver.problem);
            direction.set_primal(solver.cauchy.lp_step()?);
            direction.reset(&solver.problem, iterate, solver.multipliers.as_ref())?;

            if solver.settings.use_quadratic_model {
                let (value, _) =
                    solver
                        .linesearch
                        .cauchy_step(&solver.merit, iterate, &mut direction)?;

                Ok(value)
            } else {
                Ok(solver.merit.linear(iterate, &direction, solver.penalty))
            }
        };

        let mut best_radius = self.lp_trust_radius;
        let mut best_value = probe(self, best_radius)?;

        for &factor in factors {
            let radius = factor * self.lp_trust_radius;

            let value = probe(self, radius)?;

            if value < best_value {
                best_value = value;
                best_radius = radius;
            }
        }

        debug!(
            "Parametric radius search selected {:.4e} (model merit {:.6e})",
            best_radius, best_value
        );

        // Leave the LP solved at the chosen radius
        self.cauchy.set_trust_radius(best_radius)?;
        self.cauchy.solve(
            Some(iterate.obj_grad()),
            self.penalty,
            CauchyObjectiveType::Default,
        )?;

        self.lp_trust_radius = best_radius;

        Ok(())
    }

    /// Runs the Cauchy subsystem: LP solve, working set, duals, and the
    /// scaled Cauchy step. Returns its quadratic merit value and whether
    /// the full LP step was kept.
    fn compute_cauchy_step(&mut self, iterate: &mut Iterate) -> Result<(E, bool)> {
        self.cauchy.set_iterate(iterate, self.lp_trust_radius)?;

        self.cauchy.solve(
            Some(iterate.obj_grad()),
            self.penalty,
            CauchyObjectiveType::Default,
        )?;

        if self.settings.parametric_cauchy != ParametricCauchy::Disabled {
            self.parametric_radius_search(iterate)?;
        }

        self.locally_infeasible = self.cauchy.locally_infeasible()?;

        if self.locally_infeasible {
            debug!("Current linearization is locally infeasible");
        }

        self.cauchy.working_set(iterate)?;

        self.aug_jac.set_iterate(iterate)?;

        self.dual_estimation
            .compute(iterate, self.aug_jac.as_ref(), self.cauchy.as_ref())?;

        self.multipliers = iterate.cons_dual().clone();

        self.cauchy_direction.set_primal(self.cauchy.lp_step()?);
        self.cauchy_direction
            .reset(&self.problem, iterate, self.multipliers.as_ref())?;

        self.linesearch.set_iterate(self.penalty, self.trust_radius);

        if self.settings.use_quadratic_model {
            let (value, full_step) =
                self.linesearch
                    .cauchy_step(&self.merit, iterate, &mut self.cauchy_direction)?;

            self.full_cauchy_step = full_step;

            Ok((value, full_step))
        } else {
            self.full_cauchy_step = true;

            let value = self
                .merit
                .linear(iterate, &self.cauchy_direction, self.penalty);

            Ok((value, true))
        }
    }

    fn compute_trial_point_newton(
        &mut self,
        iterate: &mut Iterate,
        trial_iterate: &mut Iterate,
    ) -> Result<TrialPointOutput> {
        let (cauchy_merit_value, full_step) = self.compute_cauchy_step(iterate)?;

        self.working_step
            .set_iterate(iterate, self.aug_jac.as_ref(), self.trust_radius, self.penalty)?;

        self.working_step
            .set_multipliers(iterate, &self.multipliers)?;

        self.eqp_solver.compute_direction(
            iterate,
            self.aug_jac.as_ref(),
            &self.working_step,
            &self.multipliers,
            &mut self.newton_direction,
        )?;

        debug_assert!(self
            .newton_direction
            .check(&self.problem, iterate, self.multipliers.as_ref(), 1e-8)?);

        let (step_length, trial_merit) = match self.settings.linesearch {
            LineSearchType::Exact => self.linesearch.trial_step_exact(
                &self.merit,
                iterate,
                &self.cauchy_direction,
                cauchy_merit_value,
                &self.newton_direction,
                &mut self.trial_direction,
            )?,
            LineSearchType::Approx => self.linesearch.trial_step(
                &self.merit,
                iterate,
                &self.cauchy_direction,
                cauchy_merit_value,
                &self.newton_direction,
                &mut self.trial_direction,
            )?,
        };

        let reject = self.set_trial_primal(iterate, trial_iterate)?;

        Ok(TrialPointOutput {
            model_merit: trial_merit,
            full_step,
            failed_eqp_step: step_length == 0.,
            reject,
        })
    }

    fn compute_trial_point_simple(
        &mut self,
        iterate: &mut Iterate,
        trial_iterate: &mut Iterate,
    ) -> Result<TrialPointOutput> {
        let (_, full_step) = self.compute_cauchy_step(iterate)?;

        self.trial_direction.copy_from(&self.cauchy_direction);

        let model_merit = if self.settings.use_quadratic_model {
            self.merit
                .quadratic(iterate, &self.trial_direction, self.penalty)
        } else {
            self.merit
                .linear(iterate, &self.trial_direction, self.penalty)
        };

        let reject = self.set_trial_primal(iterate, trial_iterate)?;

        Ok(TrialPointOutput {
            model_merit,
            full_step,
            failed_eqp_step: false,
            reject,
        })
    }

    fn compute_trial_point_deterministic(
        &mut self,
        iterate: &mut Iterate,
        trial_iterate: &mut Iterate,
    ) -> Result<TrialPointOutput> {
        let perform_newton_step =
            self.settings.use_quadratic_model && self.settings.perform_newton_step;

        if perform_newton_step {
            self.compute_trial_point_newton(iterate, trial_iterate)
        } else {
            self.compute_trial_point_simple(iterate, trial_iterate)
        }
    }

    fn required_accuracy(&self, model_reduction: E) -> E {
        // must be positive and below half the accepted reduction
        0.4 * self.settings.accepted_reduction * model_reduction
    }

    /// Computes the next trial iterate. For dynamic-accuracy functions the
    /// computation is repeated with tightened accuracy until the model
    /// reduction dominates the evaluation error.
    pub fn compute_trial_point(
        &mut self,
        iterate: &mut Iterate,
        trial_iterate: &mut Iterate,
    ) -> Result<TrialPointOutput> {
        debug_assert!(self.trust_radius > 0.);
        debug_assert!(self.lp_trust_radius > 0.);
        debug_assert!(self.penalty > 0.);

        let mut output = self.compute_trial_point_deterministic(iterate, trial_iterate)?;

        if self.problem.func().borrow().func_type() != FuncType::Dynamic {
            return Ok(output);
        }

        loop {
            let Some(current_accuracy) = self.problem.func().borrow().dyn_accuracy() else {
                break;
            };

            let current_merit = self.merit.func(iterate, self.penalty);
            let model_reduction = current_merit - output.model_merit;

            let required_accuracy = self.required_accuracy(model_reduction);

            if current_accuracy <= required_accuracy {
                break;
            }

            debug!(
                "Current accuracy of {:.3e} is insufficient, reducing to {:.3e}",
                current_accuracy, required_accuracy
            );

            self.problem
                .func()
                .borrow_mut()
                .set_dyn_accuracy(required_accuracy)?;

            self.problem
                .set_value(iterate.primal().as_ref(), ValueReason::AcceptedIterate)?;

            iterate.evaluate(&self.problem)?;

            output = self.compute_trial_point_deterministic(iterate, trial_iterate)?;
        }

        Ok(output)
    }

    /// Computes a second-order correction of the rejected trial step,
    /// returning the model merit of the corrected direction.
    pub fn compute_trial_point_soc(
        &mut self,
        iterate: &Iterate,
        trial_iterate: &mut Iterate,
    ) -> Result<E> {
        let correction = self
            .soc
            .compute_step(self.aug_jac.as_ref(), iterate, trial_iterate)?;

        let max_step_length = self
            .soc
            .max_step_length(trial_iterate.primal(), &correction)
            .min(1.);

        self.soc_direction.copy_from(&self.trial_direction);

        let mut soc_primal = self.soc_direction.primal().clone();
        soc_primal += max_step_length * &correction;
        self.soc_direction.set_primal(soc_primal);

        self.soc_direction
            .reset(&self.problem, iterate, self.multipliers.as_ref())?;

        let model_merit = if self.settings.use_quadratic_model {
            self.merit
                .quadratic(iterate, &self.soc_direction, self.penalty)
        } else {
            self.merit
                .linear(iterate, &self.soc_direction, self.penalty)
        };

        let initial = iterate.primal() + self.soc_direction.primal();

        trial_iterate.set_primal(clip_col(
            &initial,
            self.problem.var_lb(),
            self.problem.var_ub(),
        ));

        Ok(model_merit)
    }

    fn set_trial_primal(
        &mut self,
        iterate: &Iterate,
        trial_iterate: &mut Iterate,
    ) -> Result<bool> {
        let initial = iterate.primal() + self.trial_direction.primal();

        trial_iterate.set_primal(clip_col(
            &initial,
            self.problem.var_lb(),
            self.problem.var_ub(),
        ));

        Ok(false)
    }
}

impl TrialPointSolver {
    /// Propagates an error kind for a missing LSQR function; exposed for
    /// driver construction diagnostics.
    pub fn check_eqp_settings(problem: &SharedProblem, settings: &Settings) -> Result<()> {
        if settings.tr_solver == TrSolver::Lsqr
            && problem.func().borrow().lsq_func().is_none()
        {
            return Err(SleqpError::illegal_argument(
                "the LSQR solver is only available for least-squares functions",
            ));
        }

        Ok(())
    }
}
