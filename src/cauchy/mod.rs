//! The Cauchy subsystem: LP-based minimization of the linearized ℓ1
//! penalty, working-set identification, and dual estimation.

pub mod box_constrained;
pub mod standard;
pub mod unconstrained;

use faer::Col;

use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::working_set::WorkingSet;
use crate::{E, Result, Settings};

/// Objective types of the Cauchy LP, each retaining its own warm-start
/// basis slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauchyObjectiveType {
    /// Objective gradient plus penalties.
    Default = 0,
    /// Penalties only.
    Feasibility = 1,
    /// A combination used by the parametric solver.
    Mixed = 2,
}

pub trait Cauchy {
    /// Installs the iterate and assembles the LP for the given trust
    /// radius.
    fn set_iterate(&mut self, iterate: &Iterate, trust_radius: E) -> Result<()>;

    /// Updates the trust radius, keeping the current iterate.
    fn set_trust_radius(&mut self, trust_radius: E) -> Result<()>;

    /// Solves the linearized penalty problem. Passing no gradient yields
    /// the feasibility-only objective.
    fn solve(
        &mut self,
        gradient: Option<&Col<E>>,
        penalty: E,
        objective_type: CauchyObjectiveType,
    ) -> Result<()>;

    /// Objective estimate `f(x) + g^T d` of the last solve.
    fn obj_val(&self) -> Result<E>;

    /// Reads the working set off the most recent basic solution.
    fn working_set(&self, iterate: &mut Iterate) -> Result<()>;

    /// The primal step of the most recent solve.
    fn lp_step(&self) -> Result<Col<E>>;

    /// Whether the linearization admits no feasible direction inside the
    /// trust region.
    fn locally_infeasible(&self) -> Result<bool>;

    /// Dual estimates in the KKT sign convention, clamped to the working
    /// set: entries inactive in `working_set` are zero.
    fn estimate_duals(
        &self,
        working_set: &WorkingSet,
        cons_dual: &mut Col<E>,
        vars_dual: &mut Col<E>,
    ) -> Result<()>;

    /// Total slack violation of the most recent solve.
    fn violation(&self) -> Result<E>;

    fn basis_condition(&self) -> Result<(bool, Option<E>)> {
        Ok((false, None))
    }

    fn set_time_limit(&mut self, _time_limit: Option<E>) {}
}

/// Creates the Cauchy variant matching the problem shape.
pub fn create_cauchy(problem: SharedProblem, settings: &Settings) -> Box<dyn Cauchy> {
    if problem.is_unconstrained() {
        Box::new(unconstrained::UnconstrainedCauchy::new(problem))
    } else if problem.num_cons() == 0 {
        Box::new(box_constrained::BoxCauchy::new(problem))
    } else {
        Box::new(standard::StandardCauchy::new(problem, settings))
    }
}
