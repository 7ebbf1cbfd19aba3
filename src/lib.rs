use faer::Col;

pub type E = f64;
pub type I = usize;

pub mod aug_jac;
pub mod callback;
pub mod cauchy;
pub mod deriv_check;
pub mod direction;
pub mod dual_estimation;
pub mod eqp;
pub mod error;
pub mod func;
pub mod iterate;
pub mod linalg;
pub mod linesearch;
pub mod lp;
pub mod merit;
pub mod penalty;
pub mod preprocessor;
pub mod problem;
pub mod problem_solver;
pub mod scaling;
pub mod settings;
pub mod soc;
pub mod solver;
pub mod sparse;
pub mod step_rule;
pub mod terminators;
pub mod trial_point;
pub mod working_set;
pub mod working_step;

#[cfg(test)]
pub mod tests;

pub use error::{Result, SleqpError};
pub use settings::Settings;
pub use solver::Solver;

/// Status codes reported after a call to [`Solver::solve`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    /// The solver has not finished (or not started) solving.
    Running,
    /// A KKT point satisfying the tolerances was found.
    Optimal,
    /// The linearized constraints admit no feasible direction.
    LocallyInfeasible,
    /// The objective fell below its lower bound at a feasible point.
    Unbounded,
    /// The solver stopped due to the iteration limit.
    AbortIter,
    /// The solver stopped due to the time limit.
    AbortTime,
    /// Both trust radii collapsed below the dead-point bound.
    AbortDeadpoint,
    /// The solver was aborted manually (e.g. from a callback or signal).
    AbortManual,
    /// The status is unknown or not determined.
    Unknown,
}

/// The kind of step taken in the most recent iteration.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum StepType {
    #[default]
    None,
    /// The full Cauchy step was accepted.
    AcceptedFull,
    /// A (partial) trial step was accepted.
    Accepted,
    /// The trial step was accepted after a second-order correction.
    AcceptedSoc,
    /// The trial step was rejected.
    Rejected,
}

/// Phase of the two-phase scheduler.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum SolverPhase {
    #[default]
    Optimization,
    Restoration,
}

pub(crate) fn clip_col(x: &Col<E>, lb: &Col<E>, ub: &Col<E>) -> Col<E> {
    Col::from_fn(x.nrows(), |i| x[i].max(lb[i]).min(ub[i]))
}
