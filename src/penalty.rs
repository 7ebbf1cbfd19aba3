//! Penalty parameter updates using the Cauchy LP as oracle.

use faer::Col;
use tracing::debug;

use crate::cauchy::{Cauchy, CauchyObjectiveType};
use crate::problem::SharedProblem;
use crate::{E, Result};

const VIOLATION_TOL: E = 1e-8;
const MIN_DECREASE: E = 0.1;
const MAX_INCREASES: usize = 100;
const PENALTY_INCREASE: E = 10.;

const INITIAL_PENALTY: E = 10.;

/// Outcome of a penalty update.
pub struct PenaltyUpdate {
    pub penalty: E,
    pub performed_global_reset: bool,
}

/// Increases the penalty parameter until the linearized penalty acts as a
/// genuine exact penalty, comparing the attainable infeasibility of the
/// current Cauchy solve against the feasibility-only bound.
///
/// The Cauchy LP must have been solved with the default objective; on
/// return, it again holds a solution for the default objective with the
/// returned penalty.
pub fn update_penalty(
    problem: &SharedProblem,
    gradient: &Col<E>,
    cauchy: &mut dyn Cauchy,
    penalty: E,
    allow_global_reset: bool,
    feasibility_residuum: E,
) -> Result<PenaltyUpdate> {
    let num_cons = problem.num_cons();

    let mut result = PenaltyUpdate {
        penalty,
        performed_global_reset: false,
    };

    if num_cons == 0 {
        return Ok(result);
    }

    let current_violation = cauchy.violation()? / num_cons as E;

    if current_violation <= VIOLATION_TOL {
        // A global reset may recover from an unnecessarily large penalty
        // when the iterate is essentially feasible.
        if allow_global_reset
            && penalty > INITIAL_PENALTY
            && feasibility_residuum <= VIOLATION_TOL
        {
            debug!("Performing global penalty reset");

            result.penalty = INITIAL_PENALTY;
            result.performed_global_reset = true;

            cauchy.solve(Some(gradient), result.penalty, CauchyObjectiveType::Default)?;
        }

        return Ok(result);
    }

    // Feasibility-only solve yields the attainable infeasibility bound
    cauchy.solve(None, result.penalty, CauchyObjectiveType::Feasibility)?;

    let inf_violation = cauchy.violation()? / num_cons as E;

    debug!(
        "Updating penalty: current violation {:.3e}, attainable {:.3e}",
        current_violation, inf_violation
    );

    if inf_violation <= VIOLATION_TOL {
        for _ in 0..MAX_INCREASES {
            result.penalty *= PENALTY_INCREASE;

            cauchy.solve(Some(gradient), result.penalty, CauchyObjectiveType::Default)?;

            let next_violation = cauchy.violation()? / num_cons as E;

            if next_violation <= VIOLATION_TOL {
                return Ok(result);
            }
        }
    } else {
        if current_violation - inf_violation <= VIOLATION_TOL {
            // no progress in feasibility attainable, no need for an increase
            cauchy.solve(Some(gradient), result.penalty, CauchyObjectiveType::Default)?;

            return Ok(result);
        }

        for _ in 0..MAX_INCREASES {
            result.penalty *= PENALTY_INCREASE;

            cauchy.solve(Some(gradient), result.penalty, CauchyObjectiveType::Default)?;

            let next_violation = cauchy.violation()? / num_cons as E;

            if current_violation - next_violation
                >= MIN_DECREASE * (current_violation - inf_violation)
            {
                return Ok(result);
            }
        }
    }

    // Leave the LP in a consistent state for the default objective
    cauchy.solve(Some(gradient), result.penalty, CauchyObjectiveType::Default)?;

    Ok(result)
}
