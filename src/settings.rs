use serde::{Deserialize, Serialize};

use crate::{E, I};

/// Derivative checks to perform at each iterate, combinable as a bitmask.
pub const DERIV_CHECK_SKIP: u8 = 0;
pub const DERIV_CHECK_FIRST: u8 = 1 << 0;
pub const DERIV_CHECK_SECOND_EXHAUSTIVE: u8 = 1 << 1;
pub const DERIV_CHECK_SECOND_SIMPLE: u8 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HessianEval {
    #[default]
    Exact,
    Sr1,
    SimpleBfgs,
    DampedBfgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DualEstimationType {
    #[default]
    Lp,
    Lsq,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrSolver {
    #[default]
    SteihaugCg,
    Lsqr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParametricCauchy {
    #[default]
    Disabled,
    Coarse,
    Fine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepRuleType {
    #[default]
    Direct,
    Window,
    Minstep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineSearchType {
    Exact,
    #[default]
    Approx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolishingType {
    #[default]
    None,
    ZeroDual,
    LowerSlack,
}

/// Solver settings: enumerated options and real-valued tolerances.
///
/// The defaults reproduce the standard configuration of the method; every
/// field can be adjusted before constructing a [`crate::Solver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Bitmask of derivative checks ([`DERIV_CHECK_FIRST`], ...).
    pub deriv_check: u8,
    pub hessian_eval: HessianEval,
    pub dual_estimation_type: DualEstimationType,
    /// Number of iterate pairs stored by the quasi-Newton approximations.
    pub quasi_newton_num_iterates: I,
    pub tr_solver: TrSolver,
    pub parametric_cauchy: ParametricCauchy,
    pub step_rule: StepRuleType,
    pub linesearch: LineSearchType,
    pub polishing_type: PolishingType,
    pub enable_preprocessor: bool,
    pub enable_restoration_phase: bool,
    pub use_quadratic_model: bool,
    pub perform_newton_step: bool,
    pub perform_soc: bool,
    pub always_warm_start_lp: bool,
    /// Thread count forwarded to the LP solver (`None` leaves its default).
    pub num_threads: Option<I>,
    /// Maximum number of CG iterations in the EQP solver (`None` = unlimited).
    pub max_newton_iterations: Option<I>,

    pub eps: E,
    pub zero_eps: E,
    pub stat_tol: E,
    pub feas_tol: E,
    pub slack_tol: E,
    pub deriv_tol: E,
    pub deriv_perturbation: E,
    pub cauchy_tau: E,
    pub cauchy_eta: E,
    pub linesearch_tau: E,
    pub linesearch_eta: E,
    pub linesearch_cutoff: E,
    pub newton_relative_tol: E,
    pub accepted_reduction: E,
    pub deadpoint_bound: E,
    pub obj_lower: E,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            deriv_check: DERIV_CHECK_SKIP,
            hessian_eval: HessianEval::Exact,
            dual_estimation_type: DualEstimationType::Lsq,
            quasi_newton_num_iterates: 5,
            tr_solver: TrSolver::SteihaugCg,
            parametric_cauchy: ParametricCauchy::Disabled,
            step_rule: StepRuleType::Direct,
            linesearch: LineSearchType::Approx,
            polishing_type: PolishingType::None,
            enable_preprocessor: false,
            enable_restoration_phase: false,
            use_quadratic_model: true,
            perform_newton_step: true,
            perform_soc: true,
            always_warm_start_lp: true,
            num_threads: None,
            max_newton_iterations: Some(100),

            eps: 1e-10,
            zero_eps: 1e-20,
            stat_tol: 1e-6,
            feas_tol: 1e-6,
            slack_tol: 1e-6,
            deriv_tol: 1e-4,
            deriv_perturbation: 1e-8,
            cauchy_tau: 0.5,
            cauchy_eta: 0.1,
            linesearch_tau: 0.5,
            linesearch_eta: 1e-4,
            linesearch_cutoff: 1e-6,
            newton_relative_tol: 1e-6,
            accepted_reduction: 1e-4,
            deadpoint_bound: 1e-12,
            obj_lower: -1e20,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }
}
