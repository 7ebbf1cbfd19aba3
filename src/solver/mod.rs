//! The solver driver: two-phase orchestration, scaling, preprocessing,
//! callbacks, and state queries.

pub mod restoration;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use faer::sparse::{SparseColMat, Triplet};
use faer::Col;
use tracing::{debug, info, warn};

use crate::callback::{AbortHandle, Callback, CallbackHandler, CallbackId, SolverEvent};
use crate::func::quasi_newton::{QuasiNewtonFunc, SharedQuasiNewton};
use crate::func::{SharedFunc, ValueReason};
use crate::iterate::Iterate;
use crate::preprocessor::{Preprocessor, PreprocessingResult};
use crate::problem::{Problem, SharedProblem};
use crate::problem_solver::ProblemSolver;
use crate::scaling::{ScaledFunc, Scaling};
use crate::settings::{HessianEval, PolishingType, TrSolver};
use crate::sparse::SparseVec;
use crate::working_set::ActiveState;
use crate::{E, I, Result, Settings, SleqpError, SolverPhase, Status, StepType};

/// Real-valued solver state tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStateReal {
    TrustRadius,
    LpTrustRadius,
    FuncVal,
    MeritVal,
    FeasRes,
    StatRes,
    SlackRes,
    PenaltyParam,
    MinRayleigh,
    MaxRayleigh,
}

/// Integer-valued solver state tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStateInt {
    LastStepOnBoundary,
    Iteration,
    LastStepType,
}

/// Vector-valued solver state tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStateVec {
    StatResiduals,
    FeasResiduals,
    ConsSlackResiduals,
    VarSlackResiduals,
}

pub struct Solver {
    original_problem: SharedProblem,
    problem: SharedProblem,

    settings: Settings,

    scaling: Option<Scaling>,
    preprocessor: Option<Preprocessor>,
    quasi_newton: Option<SharedQuasiNewton>,

    callbacks: Rc<RefCell<CallbackHandler>>,
    abort: AbortHandle,

    problem_solver: ProblemSolver,
    restoration_solver: Option<ProblemSolver>,

    phase: SolverPhase,
    status: Status,

    detected_infeasible: bool,

    iterations: I,
    elapsed_seconds: E,
}

impl Solver {
    /// Creates a solver for the given problem, settings, and initial
    /// point. An optional scaling is applied to the problem before
    /// preprocessing.
    pub fn new(
        problem: SharedProblem,
        settings: Settings,
        primal: Col<E>,
        scaling: Option<Scaling>,
    ) -> Result<Self> {
        if primal.nrows() != problem.num_vars() {
            return Err(SleqpError::illegal_argument("initial point dimension"));
        }

        let original_problem = problem.clone();

        let scaled_problem = match &scaling {
            Some(scaling) => scale_problem(&problem, scaling)?,
            None => problem,
        };

        // Quasi-Newton approximations wrap the (scaled) function
        let (work_problem, quasi_newton) = match settings.hessian_eval {
            HessianEval::Exact => (scaled_problem, None),
            _ => {
                let wrapper = Rc::new(RefCell::new(QuasiNewtonFunc::new(
                    scaled_problem.func().clone(),
                    &settings,
                )));

                let func: SharedFunc = wrapper.clone();

                let problem = Problem::new(
                    func,
                    scaled_problem.var_lb().clone(),
                    scaled_problem.var_ub().clone(),
                    scaled_problem.general_lb().clone(),
                    scaled_problem.general_ub().clone(),
                    scaled_problem.linear_coeffs().clone(),
                    scaled_problem.linear_lb().clone(),
                    scaled_problem.linear_ub().clone(),
                )?;

                (problem, Some(wrapper))
            }
        };

        let mut detected_infeasible = false;

        let (solve_problem, preprocessor) = if settings.enable_preprocessor {
            let preprocessor = Preprocessor::new(work_problem.clone(), &settings)?;

            match preprocessor.result() {
                PreprocessingResult::Success => {
                    let transformed = preprocessor
                        .transformed_problem()
                        .expect("transformed problem after successful preprocessing");

                    (transformed, Some(preprocessor))
                }
                PreprocessingResult::Infeasible => {
                    detected_infeasible = true;
                    (work_problem, Some(preprocessor))
                }
                PreprocessingResult::Failure => (work_problem, None),
            }
        } else {
            (work_problem, None)
        };

        crate::trial_point::TrialPointSolver::check_eqp_settings(&solve_problem, &settings)?;

        // Translate the initial point into the solver space
        let mut scaled_primal = primal;

        if let Some(scaling) = &scaling {
            scaling.scale_point(&mut scaled_primal);
        }

        let solve_primal = match &preprocessor {
            Some(preprocessor) if preprocessor.result() == PreprocessingResult::Success => {
                preprocessor.transform_primal(&scaled_primal)
            }
            _ => scaled_primal,
        };

        let callbacks = Rc::new(RefCell::new(CallbackHandler::new()));
        let abort = AbortHandle::new();

        let problem_solver = ProblemSolver::new(
            solve_problem.clone(),
            &settings,
            SolverPhase::Optimization,
            solve_primal,
            callbacks.clone(),
            abort.clone(),
            quasi_newton.clone(),
        )?;

        Ok(Self {
            original_problem,
            problem: solve_problem,
            settings,
            scaling,
            preprocessor,
            quasi_newton,
            callbacks,
            abort,
            problem_solver,
            restoration_solver: None,
            phase: SolverPhase::Optimization,
            status: Status::Unknown,
            detected_infeasible,
            iterations: 0,
            elapsed_seconds: 0.,
        })
    }

    fn toggle_phase(&mut self) -> Result<()> {
        match self.phase {
            SolverPhase::Optimization => {
                debug!("Switching to the restoration phase");

                let primal = self.problem_solver.iterate().primal().clone();

                let restoration_problem = restoration::restoration_problem(&self.problem)?;

                let mut restoration_settings = self.settings.clone();
                restoration_settings.tr_solver = TrSolver::Lsqr;
                restoration_settings.hessian_eval = HessianEval::Exact;
                restoration_settings.enable_restoration_phase = false;
                // The Gauss-Newton model is not the exact Hessian of the
                // violation, so second-order checks do not apply here
                restoration_settings.deriv_check = crate::settings::DERIV_CHECK_SKIP;

                let mut restoration_solver = ProblemSolver::new(
                    restoration_problem,
                    &restoration_settings,
                    SolverPhase::Restoration,
                    primal,
                    self.callbacks.clone(),
                    self.abort.clone(),
                    None,
                )?;

                restoration_solver.evaluate_iterate(ValueReason::Restoration)?;

                self.restoration_solver = Some(restoration_solver);
                self.phase = SolverPhase::Restoration;
            }
            SolverPhase::Restoration => {
                debug!("Switching back to the optimization phase");

                let restoration_solver = self
                    .restoration_solver
                    .as_ref()
                    .expect("restoration solver in restoration phase");

                let primal = restoration_solver.iterate().primal().clone();

                self.problem_solver.set_primal(primal);

                self.phase = SolverPhase::Optimization;
            }
        }

        Ok(())
    }

    /// Re-evaluates the optimization iterate after restoration and tests
    /// its feasibility.
    fn check_feasibility(&mut self) -> Result<bool> {
        let reject = self.problem.set_value(
            self.problem_solver.iterate().primal().as_ref(),
            ValueReason::TryingIterate,
        )?;

        if reject {
            debug!("Function rejected the restoration solution");
            return Ok(false);
        }

        self.problem_solver.iterate_mut().evaluate(&self.problem)?;

        let feas_res = self
            .problem_solver
            .iterate()
            .feasibility_residuum(&self.problem);

        Ok(feas_res <= self.settings.feas_tol)
    }

    fn run_solving_loop(
        &mut self,
        max_iterations: Option<I>,
        time_limit: Option<E>,
        start: Instant,
    ) -> Result<()> {
        self.iterations = 0;

        let mut enable_restoration = self.settings.enable_restoration_phase;

        let mut remaining_iterations = max_iterations;

        loop {
            let mut continue_loop = true;

            if let Some(limit) = time_limit {
                if start.elapsed().as_secs_f64() >= limit {
                    self.status = Status::AbortTime;
                    break;
                }
            }

            if remaining_iterations == Some(0) {
                self.status = Status::AbortIter;
                break;
            }

            let remaining_time = time_limit.map(|limit| limit - start.elapsed().as_secs_f64());

            let phase = self.phase;

            let solver = match phase {
                SolverPhase::Optimization => &mut self.problem_solver,
                SolverPhase::Restoration => self
                    .restoration_solver
                    .as_mut()
                    .expect("restoration solver in restoration phase"),
            };

            solver.set_iteration(self.iterations);

            solver.solve(remaining_iterations, remaining_time, enable_restoration)?;

            let status = solver.status();

            debug_assert!(status != Status::Unknown);
            debug_assert!(status != Status::Running);

            self.iterations += solver.elapsed_iterations();

            if let Some(remaining) = &mut remaining_iterations {
                *remaining = remaining.saturating_sub(solver.elapsed_iterations());
            }

            // Propagate abort codes
            match status {
                Status::AbortIter
                | Status::AbortTime
                | Status::AbortManual
                | Status::AbortDeadpoint => {
                    self.status = status;
                    continue_loop = false;
                }
                _ => {}
            }

            if phase == SolverPhase::Optimization {
                match status {
                    Status::Optimal => {
                        self.status = Status::Optimal;
                        continue_loop = false;
                    }
                    Status::Unbounded => {
                        self.status = Status::Unbounded;
                        continue_loop = false;
                    }
                    Status::LocallyInfeasible => {
                        if enable_restoration {
                            self.toggle_phase()?;
                        } else {
                            self.status = Status::LocallyInfeasible;
                            continue_loop = false;
                        }
                    }
                    _ => {}
                }
            } else if status == Status::Optimal {
                self.toggle_phase()?;

                let feasible = self.check_feasibility()?;

                if !feasible {
                    warn!("Restoration failed");

                    enable_restoration = false;
                }
            }

            if !continue_loop {
                break;
            }
        }

        debug_assert!(self.status != Status::Unknown);

        if self.phase == SolverPhase::Restoration {
            self.toggle_phase()?;

            // Leave the optimization iterate evaluated
            let _ = self.check_feasibility()?;
        }

        Ok(())
    }

    /// Solves the problem within the given iteration and time budgets.
    pub fn solve(&mut self, max_iterations: Option<I>, time_limit: Option<E>) -> Result<()> {
        if self.detected_infeasible {
            debug!("Problem is infeasible, aborting");
            self.status = Status::LocallyInfeasible;
            return Ok(());
        }

        let start = Instant::now();

        self.status = Status::Running;
        self.abort.reset();

        self.problem_solver.evaluate_iterate(ValueReason::Init)?;

        info!(
            "Solving a problem with {} variables, {} constraints",
            self.problem.num_vars(),
            self.problem.num_cons()
        );

        // Scaling warning
        {
            let iterate = self.problem_solver.iterate();

            let total_violation = self.problem.total_violation(iterate.cons_val());
            let obj_val = iterate.obj_val();

            if total_violation > 10. * obj_val.abs() && total_violation > 1. {
                warn!(
                    "Problem is badly scaled, constraint violation {:.3e} significantly exceeds objective value {:.3e}",
                    total_violation, obj_val
                );
            }
        }

        self.run_solving_loop(max_iterations, time_limit, start)?;

        self.elapsed_seconds = start.elapsed().as_secs_f64();

        self.polish();

        let iterate = self.solution();

        let context = crate::callback::CallbackContext {
            iterate: &iterate,
            iteration: self.iterations,
            status: self.status,
            penalty: self.problem_solver.penalty(),
            trust_radius: self.problem_solver.trust_radius(),
            lp_trust_radius: self.problem_solver.lp_trust_radius(),
            abort: self.abort.clone(),
        };

        self.callbacks
            .borrow_mut()
            .execute(SolverEvent::Finished, &context);

        info!(
            "Solved with status {:?} after {} iterations ({:.3}s), feasibility residuum {:.3e}",
            self.status,
            self.iterations,
            self.elapsed_seconds,
            self.problem_solver.feasibility_residuum()
        );

        Ok(())
    }

    /// Drops working-set entries according to the configured polishing
    /// policy.
    fn polish(&mut self) {
        let polishing = self.settings.polishing_type;

        if polishing == PolishingType::None {
            return;
        }

        let zero_eps = self.settings.zero_eps;

        let problem = self.problem.clone();
        let iterate = self.problem_solver.iterate_mut();

        let primal = iterate.primal().clone();
        let cons_val = iterate.cons_val().clone();
        let vars_dual = iterate.vars_dual().clone();
        let cons_dual = iterate.cons_dual().clone();

        let working_set = iterate.working_set_mut();

        let keep_var = |j: usize| -> bool {
            let dual = vars_dual[j];

            match polishing {
                PolishingType::ZeroDual => dual.abs() > zero_eps,
                PolishingType::LowerSlack => {
                    let slack = (primal[j] - problem.var_lb()[j])
                        .min(problem.var_ub()[j] - primal[j]);

                    slack <= dual.abs()
                }
                PolishingType::None => true,
            }
        };

        let keep_cons = |i: usize| -> bool {
            let dual = cons_dual[i];

            match polishing {
                PolishingType::ZeroDual => dual.abs() > zero_eps,
                PolishingType::LowerSlack => {
                    let slack = (cons_val[i] - problem.cons_lb()[i])
                        .min(problem.cons_ub()[i] - cons_val[i]);

                    slack <= dual.abs()
                }
                PolishingType::None => true,
            }
        };

        let old_set = working_set.clone();
        working_set.reset();

        for j in 0..problem.num_vars() {
            let state = old_set.var_state(j);

            if state == ActiveState::ActiveBoth || (state.is_active() && keep_var(j)) {
                working_set.add_variable(j, state);
            }
        }

        for i in 0..problem.num_cons() {
            let state = old_set.cons_state(i);

            if state == ActiveState::ActiveBoth || (state.is_active() && keep_cons(i)) {
                working_set.add_constraint(i, state);
            }
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The current solution, translated back into the original problem
    /// space.
    pub fn solution(&self) -> Iterate {
        let iterate = self.problem_solver.iterate().clone();

        let mut restored = match &self.preprocessor {
            Some(preprocessor) if preprocessor.result() == PreprocessingResult::Success => {
                preprocessor.restore_iterate(&iterate)
            }
            _ => iterate,
        };

        if let Some(scaling) = &self.scaling {
            scaling.unscale_iterate(&mut restored);
        }

        restored
    }

    /// Indices of constraints of the original problem violated at the
    /// given iterate.
    pub fn violated_constraints(&self, iterate: &Iterate) -> Result<Vec<I>> {
        self.original_problem
            .set_value(iterate.primal().as_ref(), ValueReason::Checking)?;

        let cons_val = self
            .original_problem
            .cons_val(iterate.primal().as_ref())?;

        let mut probe = Iterate::new(&self.original_problem, iterate.primal().clone());
        probe.set_cons_val(cons_val);

        Ok(probe.violated_constraints(&self.original_problem, self.settings.feas_tol))
    }

    pub fn iterations(&self) -> I {
        self.iterations
    }

    pub fn elapsed_seconds(&self) -> E {
        self.elapsed_seconds
    }

    pub fn real_state(&self, state: SolverStateReal) -> E {
        match state {
            SolverStateReal::TrustRadius => self.problem_solver.trust_radius(),
            SolverStateReal::LpTrustRadius => self.problem_solver.lp_trust_radius(),
            SolverStateReal::FuncVal => self.problem_solver.iterate().obj_val(),
            SolverStateReal::MeritVal => self.problem_solver.current_merit_value(),
            SolverStateReal::FeasRes => self.problem_solver.feasibility_residuum(),
            SolverStateReal::StatRes => self.problem_solver.stationarity_residuum(),
            SolverStateReal::SlackRes => self.problem_solver.slackness_residuum(),
            SolverStateReal::PenaltyParam => self.problem_solver.penalty(),
            SolverStateReal::MinRayleigh => {
                self.problem_solver.rayleigh().map_or(0., |(min, _)| min)
            }
            SolverStateReal::MaxRayleigh => {
                self.problem_solver.rayleigh().map_or(0., |(_, max)| max)
            }
        }
    }

    pub fn int_state(&self, state: SolverStateInt) -> I {
        match state {
            SolverStateInt::LastStepOnBoundary => self.problem_solver.boundary_step() as I,
            SolverStateInt::Iteration => self.iterations,
            SolverStateInt::LastStepType => match self.problem_solver.last_step_type() {
                StepType::None => 0,
                StepType::AcceptedFull => 1,
                StepType::Accepted => 2,
                StepType::AcceptedSoc => 3,
                StepType::Rejected => 4,
            },
        }
    }

    pub fn vec_state(&self, state: SolverStateVec) -> SparseVec {
        let iterate = self.problem_solver.iterate();
        let problem = &self.problem;
        let zero_eps = self.settings.zero_eps;

        match state {
            SolverStateVec::StatResiduals => {
                let jac_prod = crate::sparse::mat_t_vec(
                    iterate.cons_jac().as_ref(),
                    iterate.cons_dual().as_ref(),
                );

                let residuals = Col::from_fn(problem.num_vars(), |j| {
                    iterate.obj_grad()[j] + jac_prod[j] + iterate.vars_dual()[j]
                });

                SparseVec::from_col(residuals.as_ref(), zero_eps)
            }
            SolverStateVec::FeasResiduals => {
                let residuals = Col::from_fn(problem.num_cons(), |i| {
                    (problem.cons_lb()[i] - iterate.cons_val()[i])
                        .max(iterate.cons_val()[i] - problem.cons_ub()[i])
                        .max(0.)
                });

                SparseVec::from_col(residuals.as_ref(), zero_eps)
            }
            SolverStateVec::ConsSlackResiduals => {
                let residuals = Col::from_fn(problem.num_cons(), |i| {
                    slack_residual(
                        iterate.cons_dual()[i],
                        iterate.cons_val()[i],
                        problem.cons_lb()[i],
                        problem.cons_ub()[i],
                    )
                });

                SparseVec::from_col(residuals.as_ref(), zero_eps)
            }
            SolverStateVec::VarSlackResiduals => {
                let residuals = Col::from_fn(problem.num_vars(), |j| {
                    slack_residual(
                        iterate.vars_dual()[j],
                        iterate.primal()[j],
                        problem.var_lb()[j],
                        problem.var_ub()[j],
                    )
                });

                SparseVec::from_col(residuals.as_ref(), zero_eps)
            }
        }
    }

    pub fn add_callback(&mut self, event: SolverEvent, callback: Callback) -> CallbackId {
        self.callbacks.borrow_mut().add(event, callback)
    }

    pub fn remove_callback(&mut self, callback_id: CallbackId) -> bool {
        self.callbacks.borrow_mut().remove(callback_id)
    }

    /// Resets the solver's internal state.
    pub fn reset(&mut self) -> Result<()> {
        self.status = Status::Unknown;
        self.phase = SolverPhase::Optimization;
        self.restoration_solver = None;
        self.abort.reset();

        if let Some(quasi_newton) = &self.quasi_newton {
            quasi_newton.borrow_mut().reset();
        }

        self.problem_solver.reset()
    }

    /// Requests an abort; polled between iterations.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// A handle that may be used to abort the solver from callbacks or
    /// signal handlers.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

fn slack_residual(dual: E, value: E, lb: E, ub: E) -> E {
    if dual == 0. {
        return 0.;
    }

    let slack = if dual > 0. { ub - value } else { value - lb };

    if slack.is_finite() {
        (dual * slack).abs()
    } else {
        E::INFINITY
    }
}

/// Applies a scaling to a problem: scaled bounds, scaled linear
/// coefficients, and the function wrapper.
fn scale_problem(problem: &SharedProblem, scaling: &Scaling) -> Result<SharedProblem> {
    if scaling.num_vars() != problem.num_vars() || scaling.num_cons() != problem.num_cons() {
        return Err(SleqpError::illegal_argument("scaling dimensions"));
    }

    let func = ScaledFunc::new(problem.func().clone(), scaling.clone());

    let (var_lb, var_ub) = scaling.scale_bounds(problem.var_lb(), problem.var_ub());

    let num_general = problem.num_general();

    let general_lb = Col::from_fn(num_general, |i| {
        problem.general_lb()[i] * scaling.cons_factor(i)
    });
    let general_ub = Col::from_fn(num_general, |i| {
        problem.general_ub()[i] * scaling.cons_factor(i)
    });

    let coeffs = problem.linear_coeffs();
    let symbolic = coeffs.symbolic();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    let values = coeffs.val();

    let mut triplets: Vec<Triplet<I, I, E>> = Vec::with_capacity(coeffs.compute_nnz());

    for j in 0..coeffs.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            let i = row_idx[k];

            triplets.push(Triplet::new(
                i,
                j,
                values[k] * scaling.cons_factor(num_general + i) / scaling.var_factor(j),
            ));
        }
    }

    let linear_coeffs =
        SparseColMat::try_new_from_triplets(coeffs.nrows(), coeffs.ncols(), &triplets)
            .map_err(|_| SleqpError::internal("scaled linear coefficients"))?;

    let num_linear = problem.num_linear();

    let linear_lb = Col::from_fn(num_linear, |i| {
        problem.linear_lb()[i] * scaling.cons_factor(num_general + i)
    });
    let linear_ub = Col::from_fn(num_linear, |i| {
        problem.linear_ub()[i] * scaling.cons_factor(num_general + i)
    });

    Problem::new(
        func,
        var_lb,
        var_ub,
        general_lb,
        general_ub,
        linear_coeffs,
        linear_lb,
        linear_ub,
    )
}
