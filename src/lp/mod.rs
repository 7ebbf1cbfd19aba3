//! The uniform contract over simplex-based LP solvers.
//!
//! The Cauchy subsystem drives an LP with `n` step columns plus `2 m`
//! penalty slack columns through this interface. Implementations must
//! produce basic solutions: primal and dual values together with basis
//! statuses for columns and rows, and support saving and restoring bases
//! in indexed slots for warm starts.

pub mod simplex;

use derive_more::{Display, Error};
use faer::sparse::SparseColMatRef;

use crate::{E, I};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    InfeasibleOrUnbounded,
    Unbounded,
    TimeLimit,
    Unknown,
}

/// Basis status of a column or row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseStat {
    Basic,
    #[default]
    Lower,
    Upper,
    /// A free column or row at value zero.
    Zero,
}

#[derive(Debug, Display, Error, PartialEq)]
pub enum LpError {
    #[display("LP has not been solved")]
    NotSolved,

    #[display("Invalid basis: {message}")]
    InvalidBasis { message: String },

    #[display("Dimension mismatch in LP data")]
    DimensionMismatch,

    #[display("Iteration limit exceeded in LP solve")]
    IterationLimit,
}

pub type LpResult<T> = std::result::Result<T, LpError>;

pub trait LpSolver {
    fn num_cols(&self) -> I;

    fn num_rows(&self) -> I;

    fn set_bounds(
        &mut self,
        cons_lb: &[E],
        cons_ub: &[E],
        vars_lb: &[E],
        vars_ub: &[E],
    ) -> LpResult<()>;

    /// Replaces the coefficient matrix. Invalidates all saved bases.
    fn set_coefficients(&mut self, coeffs: SparseColMatRef<'_, I, E>) -> LpResult<()>;

    fn set_objective(&mut self, objective: &[E]) -> LpResult<()>;

    fn set_time_limit(&mut self, time_limit: Option<E>);

    /// Forwards a thread count to the backend; single-threaded backends
    /// ignore it.
    fn set_num_threads(&mut self, _num_threads: Option<I>) {}

    fn solve(&mut self) -> LpResult<LpStatus>;

    /// Primal solution: objective value and column values.
    fn primal_sol(&self) -> LpResult<(E, Vec<E>)>;

    /// Dual solution: reduced costs per column and duals per row.
    fn dual_sol(&self) -> LpResult<(Vec<E>, Vec<E>)>;

    fn vars_stats(&self) -> LpResult<Vec<BaseStat>>;

    fn cons_stats(&self) -> LpResult<Vec<BaseStat>>;

    /// Saves the current basis into the given slot.
    fn save_basis(&mut self, slot: usize) -> LpResult<()>;

    /// Restores a previously saved basis; a no-op if the slot is empty.
    fn restore_basis(&mut self, slot: usize) -> LpResult<()>;

    /// Stores an externally provided basis into the given slot.
    fn set_basis(
        &mut self,
        slot: usize,
        col_stats: &[BaseStat],
        row_stats: &[BaseStat],
    ) -> LpResult<()>;

    /// Condition estimate of the basis matrix; `None` if unavailable.
    fn basis_condition(&self) -> LpResult<(bool, Option<E>)> {
        Ok((false, None))
    }

    /// Writes a diagnostic dump of the LP to the given path.
    fn write(&self, path: &std::path::Path) -> LpResult<()>;
}
