use derive_more::{Display, Error};

use crate::linalg::solver::LinearSolverError;
use crate::lp::LpError;

/// Errors surfaced by the solver and its subsystems.
#[derive(Debug, Display, Error, PartialEq)]
pub enum SleqpError {
    #[display("Illegal argument: {message}")]
    IllegalArgument { message: String },

    #[display("Invalid derivative: {message}")]
    InvalidDerivative { message: String },

    #[display("Math error: {message}")]
    MathError { message: String },

    #[display("Internal error: {message}")]
    InternalError { message: String },

    #[display("Singular factorization of the augmented system")]
    SingularFactorization,

    #[display("Out of memory")]
    OutOfMemory,

    #[display("Time limit exhausted")]
    AbortTime,

    #[display("Function callback failed: {message}")]
    Callback { message: String },
}

pub type Result<T> = std::result::Result<T, SleqpError>;

impl SleqpError {
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        SleqpError::IllegalArgument {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SleqpError::InternalError {
            message: message.into(),
        }
    }

    pub fn callback(message: impl Into<String>) -> Self {
        SleqpError::Callback {
            message: message.into(),
        }
    }

    pub fn math(message: impl Into<String>) -> Self {
        SleqpError::MathError {
            message: message.into(),
        }
    }
}

impl From<LinearSolverError> for SleqpError {
    fn from(err: LinearSolverError) -> Self {
        match err {
            LinearSolverError::NumericFactorization
            | LinearSolverError::LuFactorization
            | LinearSolverError::CholeskyFactorization => SleqpError::SingularFactorization,
            LinearSolverError::MemoryReservation | LinearSolverError::MemoryAllocation => {
                SleqpError::OutOfMemory
            }
            other => SleqpError::internal(format!("linear solver: {other}")),
        }
    }
}

impl From<LpError> for SleqpError {
    fn from(err: LpError) -> Self {
        SleqpError::internal(format!("LP solver: {err}"))
    }
}

/// Checks that a scalar produced by a numerically sensitive region is finite,
/// converting non-finite results into a [`SleqpError::MathError`].
pub fn math_check(value: crate::E, context: &str) -> Result<crate::E> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SleqpError::math(format!(
            "non-finite value encountered in {context}"
        )))
    }
}
