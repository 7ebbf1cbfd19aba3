//! A bounded-variable primal simplex solver.
//!
//! The default LP backend: a two-phase primal simplex over variables with
//! lower and upper bounds. Each row receives a logical variable carrying
//! the row bounds, so the constraints become `A x - s = 0`. The basis
//! matrix is refactorized densely per iteration, which is adequate for the
//! moderately sized LPs produced by the Cauchy subsystem.
//!
//! Entering variables are chosen by Bland's rule, which excludes cycling.

use std::time::Instant;

use faer::linalg::solvers::FullPivLu;
use faer::prelude::Solve;
use faer::sparse::{SparseColMat, SparseColMatRef, Triplet};
use faer::{Col, Mat};

use crate::lp::{BaseStat, LpError, LpResult, LpSolver, LpStatus};
use crate::{E, I};

const REDUCED_COST_TOL: E = 1e-9;
const RATIO_TOL: E = 1e-11;
const FEAS_TOL: E = 1e-9;

const NUM_BASIS_SLOTS: usize = 4;

#[derive(Clone)]
struct Basis {
    stats: Vec<BaseStat>,
}

pub struct BoundedSimplex {
    num_cols: I,
    num_rows: I,

    coeffs: SparseColMat<I, E>,

    objective: Vec<E>,

    /// Bounds over all variables: structural columns then row logicals.
    lower: Vec<E>,
    upper: Vec<E>,

    /// Basis status over all variables.
    stats: Vec<BaseStat>,

    /// Values over all variables, valid after a solve.
    values: Vec<E>,

    /// Reduced costs over all variables, valid after a solve.
    reduced_costs: Vec<E>,

    /// Row duals, valid after a solve.
    row_duals: Vec<E>,

    saved_bases: [Option<Basis>; NUM_BASIS_SLOTS],

    time_limit: Option<E>,

    solved: bool,
}

impl BoundedSimplex {
    pub fn new(num_cols: I, num_rows: I) -> Self {
        let total = num_cols + num_rows;

        Self {
            num_cols,
            num_rows,
            coeffs: SparseColMat::try_new_from_triplets(num_rows, num_cols, &[])
                .expect("empty coefficient matrix"),
            objective: vec![0.; num_cols],
            lower: vec![E::NEG_INFINITY; total],
            upper: vec![E::INFINITY; total],
            stats: vec![BaseStat::Lower; total],
            values: vec![0.; total],
            reduced_costs: vec![0.; total],
            row_duals: vec![0.; num_rows],
            saved_bases: [None, None, None, None],
            time_limit: None,
            solved: false,
        }
    }

    fn total(&self) -> I {
        self.num_cols + self.num_rows
    }

    /// Column of the homogeneous system `[A | -I] z = 0`.
    fn system_column(&self, var: I) -> Vec<(I, E)> {
        if var < self.num_cols {
            let symbolic = self.coeffs.symbolic();
            let col_ptr = symbolic.col_ptr();
            let row_idx = symbolic.row_idx();
            let values = self.coeffs.val();

            (col_ptr[var]..col_ptr[var + 1])
                .map(|k| (row_idx[k], values[k]))
                .collect()
        } else {
            vec![(var - self.num_cols, -1.)]
        }
    }

    fn cost(&self, var: I) -> E {
        if var < self.num_cols {
            self.objective[var]
        } else {
            0.
        }
    }

    fn nonbasic_value(&self, var: I) -> E {
        match self.stats[var] {
            BaseStat::Lower => self.lower[var],
            BaseStat::Upper => self.upper[var],
            BaseStat::Zero => 0.,
            BaseStat::Basic => unreachable!(),
        }
    }

    fn basic_vars(&self) -> Vec<I> {
        (0..self.total())
            .filter(|&j| self.stats[j] == BaseStat::Basic)
            .collect()
    }

    fn reset_basis(&mut self) {
        for j in 0..self.num_cols {
            self.stats[j] = if self.lower[j].is_finite() {
                BaseStat::Lower
            } else if self.upper[j].is_finite() {
                BaseStat::Upper
            } else {
                BaseStat::Zero
            };
        }

        for i in 0..self.num_rows {
            self.stats[self.num_cols + i] = BaseStat::Basic;
        }
    }

    /// Ensures nonbasic statuses refer to finite bounds, fixing up stale
    /// statuses after bound changes.
    fn repair_nonbasic(&mut self) {
        for j in 0..self.total() {
            match self.stats[j] {
                BaseStat::Lower if !self.lower[j].is_finite() => {
                    self.stats[j] = if self.upper[j].is_finite() {
                        BaseStat::Upper
                    } else {
                        BaseStat::Zero
                    };
                }
                BaseStat::Upper if !self.upper[j].is_finite() => {
                    self.stats[j] = if self.lower[j].is_finite() {
                        BaseStat::Lower
                    } else {
                        BaseStat::Zero
                    };
                }
                _ => {}
            }
        }
    }

    fn factorize_basis(&self, basic: &[I]) -> (FullPivLu<E>, Mat<E>) {
        let m = self.num_rows;

        let mut basis_mat = Mat::zeros(m, m);

        for (k, &var) in basic.iter().enumerate() {
            for (row, value) in self.system_column(var) {
                basis_mat[(row, k)] = value;
            }
        }

        (basis_mat.as_ref().full_piv_lu(), basis_mat)
    }

    /// Values of the basic variables for the current nonbasic assignment.
    fn basic_values(&self, lu: &FullPivLu<E>) -> Col<E> {
        let m = self.num_rows;

        let mut rhs = Col::zeros(m);

        for j in 0..self.total() {
            if self.stats[j] == BaseStat::Basic {
                continue;
            }

            let value = self.nonbasic_value(j);

            if value == 0. {
                continue;
            }

            for (row, coeff) in self.system_column(j) {
                rhs[row] -= coeff * value;
            }
        }

        let solution = lu.solve(rhs.as_mat());

        Col::from_fn(m, |i| solution[(i, 0)])
    }

    fn infeasibility(&self, basic: &[I], basic_vals: &Col<E>) -> E {
        let mut total = 0.;

        for (k, &var) in basic.iter().enumerate() {
            let value = basic_vals[k];
            total += (self.lower[var] - value).max(0.);
            total += (value - self.upper[var]).max(0.);
        }

        total
    }

    fn run(&mut self) -> LpResult<LpStatus> {
        let max_iterations = 50 * (self.total()) + 200;
        let start = Instant::now();

        let mut iterations = 0;

        loop {
            if iterations > max_iterations {
                return Err(LpError::IterationLimit);
            }

            if let Some(limit) = self.time_limit {
                if start.elapsed().as_secs_f64() >= limit {
                    return Ok(LpStatus::TimeLimit);
                }
            }

            iterations += 1;

            let basic = self.basic_vars();

            if basic.len() != self.num_rows {
                return Err(LpError::InvalidBasis {
                    message: format!(
                        "basis has {} entries for {} rows",
                        basic.len(),
                        self.num_rows
                    ),
                });
            }

            let (lu, basis_mat) = self.factorize_basis(&basic);

            let basic_vals = self.basic_values(&lu);

            let phase_one = self.infeasibility(&basic, &basic_vals) > FEAS_TOL;

            // Phase cost on basic variables: the gradient of the total
            // bound violation.
            let cost_basic = Col::from_fn(self.num_rows, |k| {
                let var = basic[k];

                if phase_one {
                    if basic_vals[k] < self.lower[var] - FEAS_TOL {
                        -1.
                    } else if basic_vals[k] > self.upper[var] + FEAS_TOL {
                        1.
                    } else {
                        0.
                    }
                } else {
                    self.cost(var)
                }
            });

            // Row duals: B^T y = c_B
            let duals = {
                let bt = basis_mat.transpose().to_owned();
                let solution = bt.as_ref().full_piv_lu().solve(cost_basic.as_mat());
                Col::from_fn(self.num_rows, |i| solution[(i, 0)])
            };

            // Entering variable by Bland's rule
            let mut entering: Option<(I, E)> = None;

            for j in 0..self.total() {
                if self.stats[j] == BaseStat::Basic {
                    continue;
                }

                if self.lower[j] == self.upper[j] {
                    continue;
                }

                let phase_cost = if phase_one { 0. } else { self.cost(j) };

                let mut reduced = phase_cost;

                for (row, coeff) in self.system_column(j) {
                    reduced -= duals[row] * coeff;
                }

                let can_increase = matches!(self.stats[j], BaseStat::Lower | BaseStat::Zero);
                let can_decrease = matches!(self.stats[j], BaseStat::Upper | BaseStat::Zero);

                if can_increase && reduced < -REDUCED_COST_TOL {
                    entering = Some((j, 1.));
                    break;
                }

                if can_decrease && reduced > REDUCED_COST_TOL {
                    entering = Some((j, -1.));
                    break;
                }
            }

            let Some((enter, dir)) = entering else {
                if phase_one {
                    return Ok(LpStatus::Infeasible);
                }

                self.store_solution(&basic, &basic_vals, phase_one);
                return Ok(LpStatus::Optimal);
            };

            // Movement of the basic variables: x_B changes by -dir * w * t
            let w = {
                let mut rhs = Col::zeros(self.num_rows);

                for (row, coeff) in self.system_column(enter) {
                    rhs[row] = coeff;
                }

                let solution = lu.solve(rhs.as_mat());
                Col::from_fn(self.num_rows, |i| solution[(i, 0)])
            };

            // Ratio test
            let mut t_max = E::INFINITY;
            let mut blocking: Option<(usize, BaseStat)> = None;

            for (k, &var) in basic.iter().enumerate() {
                let delta = -dir * w[k];

                if delta.abs() <= RATIO_TOL {
                    continue;
                }

                let value = basic_vals[k];

                let below = value < self.lower[var] - FEAS_TOL;
                let above = value > self.upper[var] + FEAS_TOL;

                let (bound, target) = if below {
                    if delta > 0. {
                        (self.lower[var], BaseStat::Lower)
                    } else {
                        continue;
                    }
                } else if above {
                    if delta < 0. {
                        (self.upper[var], BaseStat::Upper)
                    } else {
                        continue;
                    }
                } else if delta > 0. {
                    if !self.upper[var].is_finite() {
                        continue;
                    }
                    (self.upper[var], BaseStat::Upper)
                } else {
                    if !self.lower[var].is_finite() {
                        continue;
                    }
                    (self.lower[var], BaseStat::Lower)
                };

                let ratio = ((bound - value) / delta).max(0.);

                if ratio < t_max - RATIO_TOL {
                    t_max = ratio;
                    blocking = Some((k, target));
                }
            }

            // Range of the entering variable itself (bound flip)
            let enter_range = match self.stats[enter] {
                BaseStat::Lower => self.upper[enter] - self.lower[enter],
                BaseStat::Upper => self.upper[enter] - self.lower[enter],
                BaseStat::Zero => E::INFINITY,
                BaseStat::Basic => unreachable!(),
            };

            if enter_range < t_max {
                // Bound flip: the basis stays, the entering variable moves
                // to its opposite bound.
                self.stats[enter] = match self.stats[enter] {
                    BaseStat::Lower => BaseStat::Upper,
                    BaseStat::Upper => BaseStat::Lower,
                    other => other,
                };
                continue;
            }

            let Some((leave_pos, leave_target)) = blocking else {
                if phase_one {
                    return Err(LpError::InvalidBasis {
                        message: "unbounded phase-one subproblem".into(),
                    });
                }

                return Ok(LpStatus::Unbounded);
            };

            let leave = basic[leave_pos];

            self.stats[leave] = leave_target;
            self.stats[enter] = BaseStat::Basic;
        }
    }

    fn store_solution(&mut self, basic: &[I], basic_vals: &Col<E>, phase_one: bool) {
        debug_assert!(!phase_one);

        for j in 0..self.total() {
            if self.stats[j] != BaseStat::Basic {
                self.values[j] = self.nonbasic_value(j);
            }
        }

        for (k, &var) in basic.iter().enumerate() {
            self.values[var] = basic_vals[k];
        }

        // Final duals from the true objective
        let (_, basis_mat) = self.factorize_basis(basic);

        let cost_basic = Col::from_fn(self.num_rows, |k| self.cost(basic[k]));

        let duals = {
            let bt = basis_mat.transpose().to_owned();
            let solution = bt.as_ref().full_piv_lu().solve(cost_basic.as_mat());
            Col::from_fn(self.num_rows, |i| solution[(i, 0)])
        };

        for i in 0..self.num_rows {
            self.row_duals[i] = duals[i];
        }

        for j in 0..self.total() {
            let mut reduced = self.cost(j);

            for (row, coeff) in self.system_column(j) {
                reduced -= duals[row] * coeff;
            }

            self.reduced_costs[j] = if self.stats[j] == BaseStat::Basic {
                0.
            } else {
                reduced
            };
        }

        self.solved = true;
    }
}

impl LpSolver for BoundedSimplex {
    fn num_cols(&self) -> I {
        self.num_cols
    }

    fn num_rows(&self) -> I {
        self.num_rows
    }

    fn set_bounds(
        &mut self,
        cons_lb: &[E],
        cons_ub: &[E],
        vars_lb: &[E],
        vars_ub: &[E],
    ) -> LpResult<()> {
        if cons_lb.len() != self.num_rows
            || cons_ub.len() != self.num_rows
            || vars_lb.len() != self.num_cols
            || vars_ub.len() != self.num_cols
        {
            return Err(LpError::DimensionMismatch);
        }

        self.lower[..self.num_cols].copy_from_slice(vars_lb);
        self.upper[..self.num_cols].copy_from_slice(vars_ub);
        self.lower[self.num_cols..].copy_from_slice(cons_lb);
        self.upper[self.num_cols..].copy_from_slice(cons_ub);

        self.solved = false;

        Ok(())
    }

    fn set_coefficients(&mut self, coeffs: SparseColMatRef<'_, I, E>) -> LpResult<()> {
        if coeffs.nrows() != self.num_rows || coeffs.ncols() != self.num_cols {
            return Err(LpError::DimensionMismatch);
        }

        let symbolic = coeffs.symbolic();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        let values = coeffs.val();

        let mut triplets: Vec<Triplet<I, I, E>> = Vec::with_capacity(coeffs.compute_nnz());

        for j in 0..coeffs.ncols() {
            for k in col_ptr[j]..col_ptr[j + 1] {
                triplets.push(Triplet::new(row_idx[k], j, values[k]));
            }
        }

        self.coeffs =
            SparseColMat::try_new_from_triplets(self.num_rows, self.num_cols, &triplets)
                .map_err(|_| LpError::DimensionMismatch)?;

        // A coefficient change invalidates all saved bases; bound changes
        // preserve them.
        for slot in &mut self.saved_bases {
            *slot = None;
        }

        self.solved = false;

        Ok(())
    }

    fn set_objective(&mut self, objective: &[E]) -> LpResult<()> {
        if objective.len() != self.num_cols {
            return Err(LpError::DimensionMismatch);
        }

        self.objective.copy_from_slice(objective);
        self.solved = false;

        Ok(())
    }

    fn set_time_limit(&mut self, time_limit: Option<E>) {
        self.time_limit = time_limit;
    }

    fn solve(&mut self) -> LpResult<LpStatus> {
        if self.basic_vars().len() != self.num_rows {
            self.reset_basis();
        }

        self.repair_nonbasic();

        self.run()
    }

    fn primal_sol(&self) -> LpResult<(E, Vec<E>)> {
        if !self.solved {
            return Err(LpError::NotSolved);
        }

        let values = self.values[..self.num_cols].to_vec();

        let objective = values
            .iter()
            .zip(self.objective.iter())
            .map(|(x, c)| x * c)
            .sum();

        Ok((objective, values))
    }

    fn dual_sol(&self) -> LpResult<(Vec<E>, Vec<E>)> {
        if !self.solved {
            return Err(LpError::NotSolved);
        }

        Ok((
            self.reduced_costs[..self.num_cols].to_vec(),
            self.row_duals.clone(),
        ))
    }

    fn vars_stats(&self) -> LpResult<Vec<BaseStat>> {
        if !self.solved {
            return Err(LpError::NotSolved);
        }

        Ok(self.stats[..self.num_cols].to_vec())
    }

    fn cons_stats(&self) -> LpResult<Vec<BaseStat>> {
        if !self.solved {
            return Err(LpError::NotSolved);
        }

        Ok(self.stats[self.num_cols..].to_vec())
    }

    fn save_basis(&mut self, slot: usize) -> LpResult<()> {
        if slot >= NUM_BASIS_SLOTS {
            return Err(LpError::InvalidBasis {
                message: format!("slot {slot} out of range"),
            });
        }

        self.saved_bases[slot] = Some(Basis {
            stats: self.stats.clone(),
        });

        Ok(())
    }

    fn restore_basis(&mut self, slot: usize) -> LpResult<()> {
        if slot >= NUM_BASIS_SLOTS {
            return Err(LpError::InvalidBasis {
                message: format!("slot {slot} out of range"),
            });
        }

        if let Some(basis) = &self.saved_bases[slot] {
            self.stats.copy_from_slice(&basis.stats);
            self.solved = false;
        }

        Ok(())
    }

    fn set_basis(
        &mut self,
        slot: usize,
        col_stats: &[BaseStat],
        row_stats: &[BaseStat],
    ) -> LpResult<()> {
        if slot >= NUM_BASIS_SLOTS {
            return Err(LpError::InvalidBasis {
                message: format!("slot {slot} out of range"),
            });
        }

        if col_stats.len() != self.num_cols || row_stats.len() != self.num_rows {
            return Err(LpError::DimensionMismatch);
        }

        let mut stats = Vec::with_capacity(self.total());
        stats.extend_from_slice(col_stats);
        stats.extend_from_slice(row_stats);

        let num_basic = stats.iter().filter(|&&s| s == BaseStat::Basic).count();

        if num_basic != self.num_rows {
            return Err(LpError::InvalidBasis {
                message: format!("{num_basic} basic entries for {} rows", self.num_rows),
            });
        }

        self.saved_bases[slot] = Some(Basis { stats });

        Ok(())
    }

    fn basis_condition(&self) -> LpResult<(bool, Option<E>)> {
        Ok((false, None))
    }

    fn write(&self, path: &std::path::Path) -> LpResult<()> {
        use std::io::Write as _;

        let mut dump = String::new();

        dump.push_str(&format!(
            "min c^T x, {} cols, {} rows\n",
            self.num_cols, self.num_rows
        ));

        dump.push_str(&format!("c = {:?}\n", self.objective));
        dump.push_str(&format!("col bounds = {:?} .. {:?}\n", &self.lower[..self.num_cols], &self.upper[..self.num_cols]));
        dump.push_str(&format!("row bounds = {:?} .. {:?}\n", &self.lower[self.num_cols..], &self.upper[self.num_cols..]));

        std::fs::File::create(path)
            .and_then(|mut file| file.write_all(dump.as_bytes()))
            .map_err(|_| LpError::InvalidBasis {
                message: "failed to write LP dump".into(),
            })
    }
}

/// Assembles a CSC matrix from triplets, for LP construction convenience.
pub fn coeffs_from_triplets(
    num_rows: I,
    num_cols: I,
    triplets: &[Triplet<I, I, E>],
) -> SparseColMat<I, E> {
    SparseColMat::try_new_from_triplets(num_rows, num_cols, triplets)
        .expect("valid LP coefficient triplets")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solve_simple() -> BoundedSimplex {
        // min -x0 - 2 x1
        // s.t. x0 + x1 <= 4, x1 <= 3, 0 <= x
        let mut lp = BoundedSimplex::new(2, 2);

        let triplets = [
            Triplet::new(0usize, 0usize, 1.),
            Triplet::new(0, 1, 1.),
            Triplet::new(1, 1, 1.),
        ];

        lp.set_coefficients(coeffs_from_triplets(2, 2, &triplets).as_ref())
            .unwrap();

        lp.set_bounds(
            &[E::NEG_INFINITY, E::NEG_INFINITY],
            &[4., 3.],
            &[0., 0.],
            &[E::INFINITY, E::INFINITY],
        )
        .unwrap();

        lp.set_objective(&[-1., -2.]).unwrap();

        assert_eq!(lp.solve().unwrap(), LpStatus::Optimal);

        lp
    }

    #[test]
    fn test_optimal_solution() {
        let lp = solve_simple();

        let (objective, values) = lp.primal_sol().unwrap();

        assert!((values[0] - 1.).abs() < 1e-9);
        assert!((values[1] - 3.).abs() < 1e-9);
        assert!((objective + 7.).abs() < 1e-9);

        // Both rows tight at their upper bounds
        let cons_stats = lp.cons_stats().unwrap();
        assert_eq!(cons_stats[0], BaseStat::Upper);
        assert_eq!(cons_stats[1], BaseStat::Upper);

        let vars_stats = lp.vars_stats().unwrap();
        assert_eq!(vars_stats[0], BaseStat::Basic);
        assert_eq!(vars_stats[1], BaseStat::Basic);
    }

    #[test]
    fn test_infeasible() {
        let mut lp = BoundedSimplex::new(1, 1);

        let triplets = [Triplet::new(0usize, 0usize, 1.)];

        lp.set_coefficients(coeffs_from_triplets(1, 1, &triplets).as_ref())
            .unwrap();

        // x >= 2 with x <= 1
        lp.set_bounds(&[2.], &[E::INFINITY], &[0.], &[1.]).unwrap();
        lp.set_objective(&[1.]).unwrap();

        assert_eq!(lp.solve().unwrap(), LpStatus::Infeasible);
    }

    #[test]
    fn test_unbounded() {
        let mut lp = BoundedSimplex::new(1, 0);

        lp.set_coefficients(coeffs_from_triplets(0, 1, &[]).as_ref())
            .unwrap();

        lp.set_bounds(&[], &[], &[E::NEG_INFINITY], &[E::INFINITY])
            .unwrap();
        lp.set_objective(&[1.]).unwrap();

        assert_eq!(lp.solve().unwrap(), LpStatus::Unbounded);
    }

    #[test]
    fn test_basis_save_restore_round_trip() {
        let mut lp = solve_simple();

        lp.save_basis(0).unwrap();

        let (objective, values) = lp.primal_sol().unwrap();
        let duals = lp.dual_sol().unwrap();

        lp.restore_basis(0).unwrap();

        assert_eq!(lp.solve().unwrap(), LpStatus::Optimal);

        let (objective_again, values_again) = lp.primal_sol().unwrap();
        let duals_again = lp.dual_sol().unwrap();

        assert!((objective - objective_again).abs() < 1e-9);

        for (a, b) in values.iter().zip(values_again.iter()) {
            assert!((a - b).abs() < 1e-9);
        }

        for (a, b) in duals.0.iter().zip(duals_again.0.iter()) {
            assert!((a - b).abs() < 1e-9);
        }

        for (a, b) in duals.1.iter().zip(duals_again.1.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_restore_empty_slot_is_noop() {
        let mut lp = solve_simple();

        lp.restore_basis(2).unwrap();

        // still solvable and unchanged
        assert_eq!(lp.solve().unwrap(), LpStatus::Optimal);
    }

    #[test]
    fn test_dual_signs() {
        let lp = solve_simple();

        let (reduced, row_duals) = lp.dual_sol().unwrap();

        // basic columns carry zero reduced cost
        assert_eq!(reduced[0], 0.);
        assert_eq!(reduced[1], 0.);

        // rows tight at their upper bound in a minimization problem carry
        // nonpositive logical reduced costs, i.e. y >= 0 ... the duals here
        // are y with A x - s = 0, so both must be negative for this LP
        assert!(row_duals[0] < 0.);
        assert!(row_duals[1] < 0.);
    }
}
