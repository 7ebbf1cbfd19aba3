use derive_more::{Display, Error};
use faer::sparse::SparseColMatRef;
use faer::{Mat, MatMut, MatRef};

use crate::{E, I};

#[derive(Debug, Display, Error, PartialEq)]
pub enum LinearSolverError {
    #[display("Symbolic factorization error")]
    SymbolicFactorization,

    #[display("Cholesky factorization error")]
    CholeskyFactorization,

    #[display("LU factorization error")]
    LuFactorization,

    #[display("Numeric factorization error")]
    NumericFactorization,

    #[display("Uninitialized error")]
    Uninitialized,

    #[display("Memory reservation failed")]
    MemoryReservation,

    #[display("Memory allocation failed")]
    MemoryAllocation,

    #[display("Unable to solve linear system")]
    SolveFailed,
}

/// Trait for sparse linear solvers supporting matrix analysis,
/// factorization, and solving linear systems.
///
/// This trait provides a standard interface for working with sparse
/// matrices and right-hand side vectors. Implementors must call `analyze`
/// and `factorize` before solving systems.
pub trait Solver {
    fn new() -> Self
    where
        Self: Sized;

    /// Performs symbolic analysis of the given sparse matrix and prepares
    /// for factorization.
    fn analyze(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError>;

    /// Performs numeric factorization of the matrix after symbolic analysis.
    fn factorize(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError>;

    /// Refactorizes the matrix, typically used when the matrix structure
    /// remains but values change.
    fn refactorize(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError>;

    /// Solves the linear system in place for the given right-hand side.
    fn solve_in_place(&self, b: &mut MatMut<E>) -> Result<(), LinearSolverError>;

    /// Solves the linear system for the given right-hand side and returns
    /// the solution matrix.
    fn solve(&self, b: MatRef<E>) -> Result<Mat<E>, LinearSolverError>;
}

/// Marker for solvers applicable to general (possibly indefinite) systems.
pub trait LinearSolver: Solver {}
