//! The standard Cauchy variant for problems with general constraints.
//!
//! Assembles the LP
//!
//! ```text
//!   min  g^T d + v 1^T (s+ + s-)
//!   s.t. c(x) + J(x) d + s+ - s- ∈ [c_lb, c_ub]
//!        max(x_lb - x, -Δ) <= d <= min(x_ub - x, Δ)
//!        s+, s- >= 0
//! ```
//!
//! translated to the origin at the current constraint values. The
//! coefficient matrix seen by the LP is `[J | I | -I]`; the iterate's
//! Jacobian itself is never modified.

use faer::sparse::Triplet;
use faer::Col;
use tracing::debug;

use crate::cauchy::{Cauchy, CauchyObjectiveType};
use crate::iterate::Iterate;
use crate::lp::simplex::{coeffs_from_triplets, BoundedSimplex};
use crate::lp::{BaseStat, LpSolver, LpStatus};
use crate::problem::SharedProblem;
use crate::working_set::{ActiveState, WorkingSet};
use crate::{E, I, Result, Settings, SleqpError};

pub struct StandardCauchy {
    problem: SharedProblem,

    num_lp_cols: I,
    num_lp_rows: I,

    lp: Box<dyn LpSolver>,

    trust_radius: E,
    iterate: Option<Iterate>,

    has_basis: [bool; 3],
    current_objective: Option<CauchyObjectiveType>,

    objective: Vec<E>,
    cons_lb: Vec<E>,
    cons_ub: Vec<E>,
    vars_lb: Vec<E>,
    vars_ub: Vec<E>,

    always_warm_start: bool,
    eps: E,
    zero_eps: E,
}

impl StandardCauchy {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Self {
        let num_vars = problem.num_vars();
        let num_cons = problem.num_cons();

        let num_lp_cols = num_vars + 2 * num_cons;
        let num_lp_rows = num_cons;

        let mut lp: Box<dyn LpSolver> = Box::new(BoundedSimplex::new(num_lp_cols, num_lp_rows));

        lp.set_num_threads(settings.num_threads);

        let mut vars_lb = vec![0.; num_lp_cols];
        let mut vars_ub = vec![0.; num_lp_cols];

        for j in num_vars..num_lp_cols {
            vars_lb[j] = 0.;
            vars_ub[j] = E::INFINITY;
        }

        Self {
            problem,
            num_lp_cols,
            num_lp_rows,
            lp,
            trust_radius: 0.,
            iterate: None,
            has_basis: [false; 3],
            current_objective: None,
            objective: vec![0.; num_lp_cols],
            cons_lb: vec![0.; num_lp_rows],
            cons_ub: vec![0.; num_lp_rows],
            vars_lb,
            vars_ub,
            always_warm_start: settings.always_warm_start_lp,
            eps: settings.eps,
            zero_eps: settings.zero_eps,
        }
    }

    fn iterate(&self) -> Result<&Iterate> {
        self.iterate
            .as_ref()
            .ok_or_else(|| SleqpError::internal("Cauchy solver has no iterate"))
    }

    fn create_var_bounds(&mut self, iterate: &Iterate) {
        let num_vars = self.problem.num_vars();
        let trust_radius = self.trust_radius;

        debug_assert!(trust_radius > 0.);

        for j in 0..num_vars {
            let x = iterate.primal()[j];
            let lb = self.problem.var_lb()[j];
            let ub = self.problem.var_ub()[j];

            self.vars_ub[j] = if ub.is_finite() {
                (ub - x).min(trust_radius)
            } else {
                trust_radius
            };

            self.vars_lb[j] = if lb.is_finite() {
                (lb - x).max(-trust_radius)
            } else {
                -trust_radius
            };

            debug_assert!(self.vars_lb[j] <= self.vars_ub[j]);
        }
    }

    fn create_cons_bounds(&mut self, iterate: &Iterate) {
        for i in 0..self.num_lp_rows {
            let value = iterate.cons_val()[i];
            let lb = self.problem.cons_lb()[i];
            let ub = self.problem.cons_ub()[i];

            self.cons_ub[i] = if ub.is_finite() { ub - value } else { E::INFINITY };
            self.cons_lb[i] = if lb.is_finite() {
                lb - value
            } else {
                E::NEG_INFINITY
            };

            debug_assert!(self.cons_lb[i] <= self.cons_ub[i]);
        }
    }

    fn set_lp_coefficients(&mut self, iterate: &Iterate) -> Result<()> {
        let num_vars = self.problem.num_vars();
        let num_cons = self.num_lp_rows;

        let jac = iterate.cons_jac();
        let symbolic = jac.symbolic();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        let values = jac.val();

        let mut triplets: Vec<Triplet<I, I, E>> =
            Vec::with_capacity(jac.compute_nnz() + 2 * num_cons);

        for j in 0..num_vars {
            for k in col_ptr[j]..col_ptr[j + 1] {
                triplets.push(Triplet::new(row_idx[k], j, values[k]));
            }
        }

        for i in 0..num_cons {
            triplets.push(Triplet::new(i, num_vars + i, 1.));
            triplets.push(Triplet::new(i, num_vars + num_cons + i, -1.));
        }

        let coeffs = coeffs_from_triplets(num_cons, self.num_lp_cols, &triplets);

        self.lp.set_coefficients(coeffs.as_ref())?;

        Ok(())
    }

    fn restore_basis(&mut self, objective_type: CauchyObjectiveType) -> Result<()> {
        if self.current_objective != Some(objective_type)
            && self.has_basis[objective_type as usize]
        {
            self.lp.restore_basis(objective_type as usize)?;
        }

        Ok(())
    }

    fn check_basis(&self) -> Result<()> {
        let mut basis_size = 0;

        for stat in self.lp.vars_stats()? {
            if stat != BaseStat::Basic {
                basis_size += 1;
            }
        }

        for stat in self.lp.cons_stats()? {
            if stat != BaseStat::Basic {
                basis_size += 1;
            }
        }

        if basis_size != self.num_lp_cols {
            return Err(SleqpError::internal(format!(
                "LP returned a super-basic solution ({basis_size} nonbasic entries for {} columns)",
                self.num_lp_cols
            )));
        }

        Ok(())
    }
}

impl Cauchy for StandardCauchy {
    fn set_iterate(&mut self, iterate: &Iterate, trust_radius: E) -> Result<()> {
        debug_assert!(trust_radius > 0.);

        self.trust_radius = trust_radius;

        self.create_var_bounds(iterate);
        self.create_cons_bounds(iterate);

        self.lp.set_bounds(
            &self.cons_lb,
            &self.cons_ub,
            &self.vars_lb,
            &self.vars_ub,
        )?;

        self.set_lp_coefficients(iterate)?;

        // Coefficients changed, so saved bases no longer apply
        self.has_basis = [false; 3];
        self.current_objective = None;

        self.iterate = Some(iterate.clone());

        Ok(())
    }

    fn set_trust_radius(&mut self, trust_radius: E) -> Result<()> {
        debug_assert!(trust_radius > 0.);

        self.trust_radius = trust_radius;

        let iterate = self.iterate()?.clone();

        self.create_var_bounds(&iterate);

        self.lp.set_bounds(
            &self.cons_lb,
            &self.cons_ub,
            &self.vars_lb,
            &self.vars_ub,
        )?;

        Ok(())
    }

    fn solve(
        &mut self,
        gradient: Option<&Col<E>>,
        penalty: E,
        objective_type: CauchyObjectiveType,
    ) -> Result<()> {
        let num_vars = self.problem.num_vars();

        for j in 0..num_vars {
            self.objective[j] = 0.;
        }

        for j in num_vars..self.num_lp_cols {
            self.objective[j] = penalty;
        }

        if let Some(gradient) = gradient {
            debug_assert_eq!(gradient.nrows(), num_vars);

            for j in 0..num_vars {
                self.objective[j] = gradient[j];
            }
        }

        self.lp.set_objective(&self.objective)?;

        if self.always_warm_start {
            match objective_type {
                CauchyObjectiveType::Default | CauchyObjectiveType::Feasibility => {
                    self.restore_basis(objective_type)?;
                }
                CauchyObjectiveType::Mixed => {
                    if self.current_objective != Some(CauchyObjectiveType::Mixed) {
                        // restart from the default, this should be closer
                        // to the initial mixed one
                        self.restore_basis(CauchyObjectiveType::Default)?;
                    }
                }
            }
        }

        self.current_objective = Some(objective_type);

        match self.lp.solve()? {
            LpStatus::Optimal => {}
            LpStatus::TimeLimit => return Err(SleqpError::AbortTime),
            other => {
                return Err(SleqpError::internal(format!(
                    "Cauchy LP terminated with status {other:?}"
                )));
            }
        }

        self.check_basis()?;

        if self.always_warm_start {
            self.lp.save_basis(objective_type as usize)?;
        }

        self.has_basis[objective_type as usize] = true;

        Ok(())
    }

    fn obj_val(&self) -> Result<E> {
        let (lp_objective, _) = self.lp.primal_sol()?;

        Ok(lp_objective + self.iterate()?.obj_val())
    }

    fn working_set(&self, iterate: &mut Iterate) -> Result<()> {
        let num_vars = self.problem.num_vars();
        let num_cons = self.num_lp_rows;

        let var_stats = self.lp.vars_stats()?;
        let cons_stats = self.lp.cons_stats()?;

        let trust_radius = self.trust_radius;
        debug_assert!(trust_radius > 0.);

        let eps = self.eps;

        let primal = iterate.primal().clone();

        let working_set = iterate.working_set_mut();
        working_set.reset();

        for j in 0..num_vars {
            let x = primal[j];
            let lb = self.problem.var_lb()[j];
            let ub = self.problem.var_ub()[j];

            debug_assert!(var_stats[j] != BaseStat::Zero || !lb.is_finite());

            if (lb - ub).abs() <= eps {
                working_set.add_variable(j, ActiveState::ActiveBoth);
            } else if var_stats[j] == BaseStat::Lower && (x - lb) < trust_radius {
                working_set.add_variable(j, ActiveState::ActiveLower);
            } else if var_stats[j] == BaseStat::Upper && (ub - x) < trust_radius {
                working_set.add_variable(j, ActiveState::ActiveUpper);
            }
        }

        let lower_slack_stats = &var_stats[num_vars..num_vars + num_cons];
        let upper_slack_stats = &var_stats[num_vars + num_cons..];

        for i in 0..num_cons {
            let cons_stat = cons_stats[i];

            if cons_stat == BaseStat::Basic {
                continue;
            }

            let lb = self.problem.cons_lb()[i];
            let ub = self.problem.cons_ub()[i];

            debug_assert!(
                lower_slack_stats[i] != BaseStat::Basic
                    || upper_slack_stats[i] != BaseStat::Basic
            );

            let zero_slack = lower_slack_stats[i] == BaseStat::Lower
                && upper_slack_stats[i] == BaseStat::Lower;

            if cons_stat == BaseStat::Zero {
                // free row, both bounds infinite
                continue;
            }

            if (lb - ub).abs() <= eps {
                if zero_slack {
                    working_set.add_constraint(i, ActiveState::ActiveBoth);
                }
            } else if cons_stat == BaseStat::Upper {
                if zero_slack {
                    // the row c(x) + J d + s+ - s- <= ub is tight at i
                    working_set.add_constraint(i, ActiveState::ActiveUpper);
                }
            } else if cons_stat == BaseStat::Lower && zero_slack {
                // the row lb <= c(x) + J d + s+ - s- is tight at i
                working_set.add_constraint(i, ActiveState::ActiveLower);
            }
        }

        debug!(
            "Created a working set with {} variables, {} constraints",
            working_set.num_active_vars(),
            working_set.num_active_cons()
        );

        debug_assert!(working_set.valid());

        Ok(())
    }

    fn lp_step(&self) -> Result<Col<E>> {
        let num_vars = self.problem.num_vars();

        let (_, values) = self.lp.primal_sol()?;

        Ok(Col::from_fn(num_vars, |j| {
            let value = values[j];

            if value.abs() > self.zero_eps { value } else { 0. }
        }))
    }

    fn locally_infeasible(&self) -> Result<bool> {
        let num_vars = self.problem.num_vars();
        let num_cons = self.num_lp_rows;

        let var_stats = self.lp.vars_stats()?;
        let cons_stats = self.lp.cons_stats()?;

        let iterate = self.iterate()?;

        let trust_radius = self.trust_radius;
        let eps = self.eps;

        let mut active_trust_region = false;

        for j in 0..num_vars {
            let x = iterate.primal()[j];
            let lb = self.problem.var_lb()[j];
            let ub = self.problem.var_ub()[j];

            if (lb - ub).abs() <= eps {
                continue;
            }

            if var_stats[j] == BaseStat::Lower && (x - lb) >= trust_radius {
                active_trust_region = true;
                break;
            }

            if var_stats[j] == BaseStat::Upper && (ub - x) >= trust_radius {
                active_trust_region = true;
                break;
            }
        }

        let lower_slack_stats = &var_stats[num_vars..num_vars + num_cons];
        let upper_slack_stats = &var_stats[num_vars + num_cons..];

        let mut feasible_direction = true;

        for i in 0..num_cons {
            if cons_stats[i] == BaseStat::Basic {
                continue;
            }

            let zero_slack = lower_slack_stats[i] == BaseStat::Lower
                && upper_slack_stats[i] == BaseStat::Lower;

            if !zero_slack {
                feasible_direction = false;
            }
        }

        debug!(
            "Trust region active: {}, feasible direction: {}",
            active_trust_region, feasible_direction
        );

        Ok(!(feasible_direction || active_trust_region))
    }

    fn estimate_duals(
        &self,
        working_set: &WorkingSet,
        cons_dual: &mut Col<E>,
        vars_dual: &mut Col<E>,
    ) -> Result<()> {
        let num_vars = self.problem.num_vars();
        let num_cons = self.num_lp_rows;

        let (reduced_costs, row_duals) = self.lp.dual_sol()?;

        // Rescale to the KKT sign convention
        for j in 0..num_vars {
            let value = -reduced_costs[j];

            vars_dual[j] = if working_set.var_state(j) == ActiveState::Inactive
                || value.abs() <= self.zero_eps
            {
                0.
            } else {
                value
            };
        }

        for i in 0..num_cons {
            let value = -row_duals[i];

            cons_dual[i] = if working_set.cons_state(i) == ActiveState::Inactive
                || value.abs() <= self.zero_eps
            {
                0.
            } else {
                value
            };
        }

        Ok(())
    }

    fn violation(&self) -> Result<E> {
        let num_vars = self.problem.num_vars();

        let (_, values) = self.lp.primal_sol()?;

        Ok(values[num_vars..].iter().sum())
    }

    fn basis_condition(&self) -> Result<(bool, Option<E>)> {
        Ok(self.lp.basis_condition()?)
    }

    fn set_time_limit(&mut self, time_limit: Option<E>) {
        self.lp.set_time_limit(time_limit);
    }
}
