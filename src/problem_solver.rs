//! The outer trust-region loop for a single phase (optimization or
//! restoration).

use std::rc::Rc;
use std::cell::RefCell;
use std::time::Instant;

use faer::Col;
use tracing::{debug, info, warn};

use crate::callback::{AbortHandle, CallbackContext, CallbackHandler, SolverEvent};
use crate::deriv_check::DerivChecker;
use crate::func::quasi_newton::SharedQuasiNewton;
use crate::func::ValueReason;
use crate::iterate::Iterate;
use crate::merit::Merit;
use crate::problem::SharedProblem;
use crate::sparse;
use crate::step_rule::{StepRule, StepRuleOps};
use crate::trial_point::TrialPointSolver;
use crate::{clip_col, E, I, Result, Settings, SleqpError, SolverPhase, Status, StepType};

const INITIAL_TRUST_RADIUS: E = 1.;
const INITIAL_PENALTY: E = 10.;

const NORM_INCREASE_FACTOR: E = 1.2;

pub struct ProblemSolver {
    problem: SharedProblem,
    settings: Settings,
    phase: SolverPhase,

    iterate: Iterate,
    trial_iterate: Iterate,

    trial_point_solver: TrialPointSolver,
    step_rule: StepRule,
    deriv_checker: DerivChecker,
    merit: Merit,

    callbacks: Rc<RefCell<CallbackHandler>>,
    abort: AbortHandle,

    quasi_newton: Option<SharedQuasiNewton>,

    status: Status,
    last_step_type: StepType,

    feas_res: E,
    stat_res: E,
    slack_res: E,

    trust_radius: E,
    lp_trust_radius: E,

    iteration: I,
    elapsed_iterations: I,
    num_accepted_steps: I,
    num_soc_accepted_steps: I,
    num_rejected_steps: I,
    num_failed_eqp_steps: I,

    boundary_step: bool,
    current_merit_value: E,

    elapsed_seconds: E,

    abort_on_local_infeasibility: bool,
}

impl ProblemSolver {
    pub fn new(
        problem: SharedProblem,
        settings: &Settings,
        phase: SolverPhase,
        primal: Col<E>,
        callbacks: Rc<RefCell<CallbackHandler>>,
        abort: AbortHandle,
        quasi_newton: Option<SharedQuasiNewton>,
    ) -> Result<Self> {
        let clipped = clip_col(&primal, problem.var_lb(), problem.var_ub());

        let iterate = Iterate::new(&problem, clipped);
        let trial_iterate = iterate.clone();

        let trial_point_solver = TrialPointSolver::new(problem.clone(), settings)?;

        let mut solver = Self {
            merit: Merit::new(problem.clone()),
            deriv_checker: DerivChecker::new(problem.clone(), settings),
            step_rule: StepRule::from_settings(settings),
            trial_point_solver,
            iterate,
            trial_iterate,
            callbacks,
            abort,
            quasi_newton,
            status: Status::Unknown,
            last_step_type: StepType::None,
            feas_res: 0.,
            stat_res: 0.,
            slack_res: 0.,
            trust_radius: 0.,
            lp_trust_radius: 0.,
            iteration: 0,
            elapsed_iterations: 0,
            num_accepted_steps: 0,
            num_soc_accepted_steps: 0,
            num_rejected_steps: 0,
            num_failed_eqp_steps: 0,
            boundary_step: false,
            current_merit_value: 0.,
            elapsed_seconds: 0.,
            abort_on_local_infeasibility: false,
            settings: settings.clone(),
            phase,
            problem,
        };

        solver.reset()?;

        Ok(solver)
    }

    /// Resets trust radii, penalty, and adaptive state to their initial
    /// configuration.
    pub fn reset(&mut self) -> Result<()> {
        let num_vars = self.problem.num_vars();

        // initial trust region radii and penalty parameter as suggested
        self.trust_radius = INITIAL_TRUST_RADIUS;
        self.lp_trust_radius = 0.8 * INITIAL_TRUST_RADIUS * (num_vars.max(1) as E).sqrt();

        self.trial_point_solver.set_penalty(INITIAL_PENALTY);

        self.step_rule.reset();

        if let Some(quasi_newton) = &self.quasi_newton {
            quasi_newton.borrow_mut().reset();
        }

        Ok(())
    }

    pub fn iterate(&self) -> &Iterate {
        &self.iterate
    }

    pub fn iterate_mut(&mut self) -> &mut Iterate {
        &mut self.iterate
    }

    pub fn set_primal(&mut self, primal: Col<E>) {
        let clipped = clip_col(&primal, self.problem.var_lb(), self.problem.var_ub());

        self.iterate.set_primal(clipped);
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    pub fn set_iteration(&mut self, iteration: I) {
        self.iteration = iteration;
    }

    pub fn elapsed_iterations(&self) -> I {
        self.elapsed_iterations
    }

    pub fn elapsed_seconds(&self) -> E {
        self.elapsed_seconds
    }

    pub fn penalty(&self) -> E {
        self.trial_point_solver.penalty()
    }

    pub fn trust_radius(&self) -> E {
        self.trust_radius
    }

    pub fn lp_trust_radius(&self) -> E {
        self.lp_trust_radius
    }

    pub fn feasibility_residuum(&self) -> E {
        self.feas_res
    }

    pub fn stationarity_residuum(&self) -> E {
        self.stat_res
    }

    pub fn slackness_residuum(&self) -> E {
        self.slack_res
    }

    pub fn current_merit_value(&self) -> E {
        self.current_merit_value
    }

    pub fn boundary_step(&self) -> bool {
        self.boundary_step
    }

    pub fn last_step_type(&self) -> StepType {
        self.last_step_type
    }

    pub fn rayleigh(&self) -> Option<(E, E)> {
        self.trial_point_solver.rayleigh()
    }

    /// Evaluates the function at the current iterate and fills its caches.
    pub fn evaluate_iterate(&mut self, reason: ValueReason) -> Result<()> {
        let reject = self
            .problem
            .set_value(self.iterate.primal().as_ref(), reason)?;

        if reject {
            return Err(SleqpError::callback(
                "function rejected the initial iterate",
            ));
        }

        self.iterate.evaluate(&self.problem)
    }

    fn set_residua(&mut self) {
        self.feas_res = self.iterate.feasibility_residuum(&self.problem);
        self.stat_res = self.iterate.stationarity_residuum(&self.problem);
        self.slack_res = self.iterate.slackness_residuum(&self.problem);
    }

    fn print_header(&self) {
        info!(
            "{:>6} | {:>14} | {:>14} | {:>14} | {:>12} | {:>12} | {:>12}",
            "iter", "obj val", "merit val", "feas res", "penalty", "LP radius", "EQP radius"
        );
    }

    fn print_line(&self) {
        info!(
            "{:>6} | {:>14.6e} | {:>14.6e} | {:>14.6e} | {:>12.4e} | {:>12.4e} | {:>12.4e}",
            self.iteration,
            self.iterate.obj_val(),
            self.current_merit_value,
            self.feas_res,
            self.trial_point_solver.penalty(),
            self.lp_trust_radius,
            self.trust_radius
        );
    }

    fn update_trust_radius(&mut self, reduction_ratio: E, accepted: bool, direction_norm: E) {
        if reduction_ratio >= 0.9 {
            self.trust_radius = self.trust_radius.max(7. * direction_norm);
        } else if reduction_ratio >= 0.3 {
            self.trust_radius = self.trust_radius.max(2. * direction_norm);
        } else if accepted {
            // stays the same
        } else {
            self.trust_radius = (0.5 * self.trust_radius).min(0.5 * direction_norm);
        }
    }

    fn update_lp_trust_radius(
        &mut self,
        accepted: bool,
        trial_step_infnorm: E,
        cauchy_step_infnorm: E,
        full_cauchy_step: bool,
    ) {
        if accepted {
            let trial_norm = NORM_INCREASE_FACTOR * trial_step_infnorm;
            let cauchy_norm = NORM_INCREASE_FACTOR * cauchy_step_infnorm;

            let scaled_radius = 0.1 * self.lp_trust_radius;

            let update = trial_norm.max(cauchy_norm).max(scaled_radius);

            if full_cauchy_step {
                self.lp_trust_radius *= 7.;
            }

            self.lp_trust_radius = update.min(self.lp_trust_radius);
        } else {
            let reduced = (0.5 * trial_step_infnorm).max(0.1 * self.lp_trust_radius);

            self.lp_trust_radius = reduced.min(self.lp_trust_radius);
        }
    }

    /// Feasibility of the restoration objective: the restoration function
    /// value is half the squared violation norm.
    fn restoration_feasible(&self) -> bool {
        let residual_norm = (2. * self.iterate.obj_val()).max(0.).sqrt();

        residual_norm <= self.settings.feas_tol
    }

    fn execute_callbacks(&self, event: SolverEvent) {
        let context = CallbackContext {
            iterate: &self.iterate,
            iteration: self.iteration,
            status: self.status,
            penalty: self.trial_point_solver.penalty(),
            trust_radius: self.trust_radius,
            lp_trust_radius: self.lp_trust_radius,
            abort: self.abort.clone(),
        };

        self.callbacks.borrow_mut().execute(event, &context);
    }

    fn accept_step(&mut self) -> Result<()> {
        // fill the remaining data of the trial iterate
        let reject = self.problem.set_value(
            self.trial_iterate.primal().as_ref(),
            ValueReason::AcceptedIterate,
        )?;

        if reject {
            return Err(SleqpError::callback("function rejected an accepted iterate"));
        }

        self.trial_iterate.evaluate(&self.problem)?;

        // Carry the most recent dual estimates and working set over to the
        // accepted iterate
        *self.trial_iterate.cons_dual_mut() = self.iterate.cons_dual().clone();
        *self.trial_iterate.vars_dual_mut() = self.iterate.vars_dual().clone();
        *self.trial_iterate.working_set_mut() = self.iterate.working_set().clone();

        if let Some(quasi_newton) = &self.quasi_newton {
            let multipliers = self.trial_point_solver.multipliers().clone();

            let step = self.trial_iterate.primal() - self.iterate.primal();

            let new_grad = self.trial_iterate.obj_grad()
                + sparse::mat_t_vec(
                    self.trial_iterate.cons_jac().as_ref(),
                    multipliers.as_ref(),
                );

            let old_grad = self.iterate.obj_grad()
                + sparse::mat_t_vec(self.iterate.cons_jac().as_ref(), multipliers.as_ref());

            quasi_newton
                .borrow_mut()
                .push(step, &new_grad - &old_grad);
        }

        std::mem::swap(&mut self.iterate, &mut self.trial_iterate);

        self.num_accepted_steps += 1;

        self.execute_callbacks(SolverEvent::AcceptedIterate);

        Ok(())
    }

    fn reject_step(&mut self) -> Result<()> {
        self.num_rejected_steps += 1;

        // restore the function to the current iterate
        self.problem.set_value(
            self.iterate.primal().as_ref(),
            ValueReason::AcceptedIterate,
        )?;

        Ok(())
    }

    /// Evaluates objective and constraints at the trial iterate. Returns
    /// `true` if the function rejected the point.
    fn evaluate_trial_iterate(&mut self) -> Result<bool> {
        let reject = self.problem.set_value(
            self.trial_iterate.primal().as_ref(),
            ValueReason::TryingIterate,
        )?;

        if reject {
            debug!("Function rejected the trial iterate");
            return Ok(true);
        }

        self.trial_iterate.set_obj_val(self.problem.obj_val()?);

        let cons_val = self
            .problem
            .cons_val(self.trial_iterate.primal().as_ref())?;
        self.trial_iterate.set_cons_val(cons_val);

        Ok(false)
    }

    fn perform_iteration(&mut self) -> Result<()> {
        let penalty = self.trial_point_solver.penalty();

        let exact_iterate_value = self.merit.func(&self.iterate, penalty);
        self.current_merit_value = exact_iterate_value;

        self.set_residua();

        if self.iteration % 25 == 0 {
            self.print_header();
        }

        self.print_line();

        // Derivative check
        self.deriv_checker
            .check(&self.iterate, self.settings.deriv_check)?;

        // Unboundedness
        if self.iterate.obj_val() <= self.settings.obj_lower {
            if self
                .iterate
                .is_feasible(self.feas_res, self.settings.feas_tol)
            {
                self.status = Status::Unbounded;
                return Ok(());
            }
        }

        // Optimality
        if self.phase == SolverPhase::Restoration && self.restoration_feasible() {
            self.status = Status::Optimal;
            return Ok(());
        }

        if self
            .iterate
            .is_optimal(self.feas_res, self.slack_res, self.stat_res, &self.settings)
        {
            self.status = Status::Optimal;
            return Ok(());
        }

        // Step computation
        self.trial_point_solver.set_penalty_info(
            self.feas_res,
            self.phase == SolverPhase::Optimization,
        );
        self.trial_point_solver.set_trust_radius(self.trust_radius);
        self.trial_point_solver
            .set_lp_trust_radius(self.lp_trust_radius);

        let output = self
            .trial_point_solver
            .compute_trial_point(&mut self.iterate, &mut self.trial_iterate)?;

        // The parametric radius search may have adjusted the LP radius
        self.lp_trust_radius = self.trial_point_solver.lp_trust_radius();

        if output.failed_eqp_step {
            self.num_failed_eqp_steps += 1;
        }

        if self.trial_point_solver.locally_infeasible() && self.abort_on_local_infeasibility {
            warn!("Local infeasibility detected");
            self.status = Status::LocallyInfeasible;
            return Ok(());
        }

        let trial_rejected = self.evaluate_trial_iterate()? || output.reject;

        let exact_trial_value = if trial_rejected {
            E::INFINITY
        } else {
            self.merit.func(&self.trial_iterate, penalty)
        };

        debug!(
            "Current merit function value: {:.6e}, trial merit function value: {:.6e}",
            exact_iterate_value, exact_trial_value
        );

        let result = self.step_rule.apply(
            exact_iterate_value,
            exact_trial_value,
            output.model_merit,
        )?;

        let mut step_accepted = result.accept_step;
        let reduction_ratio = result.reduction_ratio;

        debug!("Reduction ratio: {:.6e}", reduction_ratio);

        let trial_step_norm = self.trial_point_solver.trial_step().norm();
        let trial_step_infnorm = self.trial_point_solver.trial_step().inf_norm();
        let cauchy_step_infnorm = self.trial_point_solver.cauchy_step().inf_norm();

        self.boundary_step = trial_step_norm >= self.trust_radius - self.settings.eps;

        self.last_step_type = StepType::Rejected;

        if step_accepted {
            debug!("Trial step accepted");

            self.last_step_type = if output.full_step {
                StepType::AcceptedFull
            } else {
                StepType::Accepted
            };
        } else {
            debug!("Trial step rejected");

            let perform_soc = self.settings.perform_soc && self.problem.num_cons() > 0;

            if perform_soc {
                debug!("Computing second-order correction");

                let soc_model_value = self
                    .trial_point_solver
                    .compute_trial_point_soc(&self.iterate, &mut self.trial_iterate)?;

                // a quadratic reduction is not guaranteed for the corrected step
                if exact_iterate_value - soc_model_value > 0. {
                    let soc_rejected = self.evaluate_trial_iterate()?;

                    let soc_exact_value = if soc_rejected {
                        E::INFINITY
                    } else {
                        self.merit.func(&self.trial_iterate, penalty)
                    };

                    let soc_result = self.step_rule.apply(
                        exact_iterate_value,
                        soc_exact_value,
                        soc_model_value,
                    )?;

                    debug!("SOC reduction ratio: {:.6e}", soc_result.reduction_ratio);

                    if soc_result.accept_step {
                        step_accepted = true;
                        self.last_step_type = StepType::AcceptedSoc;
                        self.num_soc_accepted_steps += 1;

                        self.boundary_step = self.trial_point_solver.soc_step().norm()
                            >= self.trust_radius - self.settings.eps;

                        debug!("Second-order correction accepted");
                    } else {
                        debug!("Second-order correction rejected");
                    }
                }
            }
        }

        // update trust radii, penalty parameter
        {
            let perform_newton_step =
                self.settings.use_quadratic_model && self.settings.perform_newton_step;

            if perform_newton_step {
                self.update_trust_radius(reduction_ratio, step_accepted, trial_step_norm);
            }

            self.update_lp_trust_radius(
                step_accepted,
                trial_step_infnorm,
                cauchy_step_infnorm,
                output.full_step,
            );

            self.trial_point_solver.update_penalty(&self.iterate)?;
        }

        // update the current iterate
        if step_accepted {
            self.accept_step()?;
        } else {
            self.reject_step()?;
        }

        self.iteration += 1;
        self.elapsed_iterations += 1;

        self.execute_callbacks(SolverEvent::PerformedIteration);

        Ok(())
    }

    /// Runs the trust-region loop with the given budgets. Assumes the
    /// iterate has been evaluated.
    pub fn solve(
        &mut self,
        max_iterations: Option<I>,
        time_limit: Option<E>,
        abort_on_local_infeasibility: bool,
    ) -> Result<()> {
        self.status = Status::Running;
        self.abort_on_local_infeasibility = abort_on_local_infeasibility;

        self.elapsed_iterations = 0;
        self.elapsed_seconds = 0.;
        self.last_step_type = StepType::None;

        let start = Instant::now();

        if self.problem.num_vars() == 0 {
            // A fully reduced problem is optimal as it stands
            self.set_residua();
            self.status = Status::Optimal;
            return Ok(());
        }

        let deadpoint_bound = self.settings.deadpoint_bound;

        loop {
            self.elapsed_seconds = start.elapsed().as_secs_f64();

            if let Some(limit) = time_limit {
                if self.elapsed_seconds >= limit {
                    info!("Exhausted time limit, terminating");
                    self.status = Status::AbortTime;
                    break;
                }

                self.trial_point_solver
                    .set_time_limit(Some(limit - self.elapsed_seconds));
            }

            if let Some(max_iterations) = max_iterations {
                if self.elapsed_iterations >= max_iterations {
                    info!("Reached iteration limit, terminating");
                    self.status = Status::AbortIter;
                    break;
                }
            }

            if self.abort.aborted() {
                info!("Abortion requested, terminating");
                self.status = Status::AbortManual;
                break;
            }

            match self.perform_iteration() {
                Ok(()) => {}
                Err(SleqpError::AbortTime) => {
                    info!("Exhausted time limit, terminating");
                    self.status = Status::AbortTime;
                    break;
                }
                Err(other) => return Err(other),
            }

            if self.lp_trust_radius <= deadpoint_bound || self.trust_radius <= deadpoint_bound {
                warn!("Reached dead point");
                self.status = Status::AbortDeadpoint;
                break;
            }

            if self.status != Status::Running {
                break;
            }
        }

        self.elapsed_seconds = start.elapsed().as_secs_f64();

        debug_assert!(self.status != Status::Running);

        Ok(())
    }

    pub fn stats(&self) -> ProblemSolverStats {
        ProblemSolverStats {
            accepted_steps: self.num_accepted_steps,
            soc_accepted_steps: self.num_soc_accepted_steps,
            rejected_steps: self.num_rejected_steps,
            failed_eqp_steps: self.num_failed_eqp_steps,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProblemSolverStats {
    pub accepted_steps: I,
    pub soc_accepted_steps: I,
    pub rejected_steps: I,
    pub failed_eqp_steps: I,
}
