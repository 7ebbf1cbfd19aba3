//! Problem preprocessing: fixed variables and forcing linear constraints.
//!
//! A linear row whose implied activity bound coincides with one of its
//! bounds forces every participating variable to the bound achieving it;
//! such rows are removed and the variables fixed. Redundant linear rows
//! (implied activity inside the bounds) are dropped as well. The
//! transformed problem exposes the remaining variables through a function
//! wrapper; solutions are restored by re-inserting the fixed values.

use std::cell::RefCell;
use std::rc::Rc;

use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, ColRef};

use crate::func::{Func, FuncType, SharedFunc, ValueReason};
use crate::iterate::Iterate;
use crate::problem::{Problem, SharedProblem};
use crate::sparse::SparseVec;
use crate::{E, I, Result, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessingResult {
    /// The problem was reduced; solve the transformed problem.
    Success,
    /// Preprocessing proved the problem infeasible.
    Infeasible,
    /// No reduction was possible; solve the original problem.
    Failure,
}

pub struct Preprocessor {
    original: SharedProblem,
    transformed: Option<SharedProblem>,

    result: PreprocessingResult,

    /// Fixed value per original variable, `None` for kept variables.
    fixed_values: Vec<Option<E>>,

    /// Original index of each kept variable.
    var_map: Vec<I>,

    /// Kept linear rows.
    row_map: Vec<I>,
}

impl Preprocessor {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Result<Self> {
        let num_vars = problem.num_vars();
        let num_linear = problem.num_linear();

        let feas_tol = settings.feas_tol;

        let mut fixed_values: Vec<Option<E>> = vec![None; num_vars];
        let mut removed_rows = vec![false; num_linear];

        let mut infeasible = false;

        // Variables fixed by their bounds
        for j in 0..num_vars {
            if problem.var_lb()[j] == problem.var_ub()[j] {
                fixed_values[j] = Some(problem.var_lb()[j]);
            }
        }

        let entries = linear_rows(&problem);

        // Fixing variables can turn further rows into forcing ones
        loop {
            let mut changed = false;

            for (row, row_entries) in entries.iter().enumerate() {
                if removed_rows[row] {
                    continue;
                }

                let lb = problem.linear_lb()[row];
                let ub = problem.linear_ub()[row];

                let (min_activity, max_activity) =
                    implied_activity(&problem, row_entries, &fixed_values);

                if min_activity > ub + feas_tol || max_activity < lb - feas_tol {
                    infeasible = true;
                    break;
                }

                if min_activity >= lb - feas_tol && max_activity <= ub + feas_tol {
                    // Redundant row
                    removed_rows[row] = true;
                    changed = true;
                    continue;
                }

                // Forcing at the lower bound: the maximum attainable
                // activity just reaches it
                if (max_activity - lb).abs() <= feas_tol && max_activity.is_finite() {
                    for &(j, coeff) in row_entries {
                        if fixed_values[j].is_some() {
                            continue;
                        }

                        fixed_values[j] = Some(if coeff > 0. {
                            problem.var_ub()[j]
                        } else {
                            problem.var_lb()[j]
                        });
                    }

                    removed_rows[row] = true;
                    changed = true;
                    continue;
                }

                // Forcing at the upper bound
                if (min_activity - ub).abs() <= feas_tol && min_activity.is_finite() {
                    for &(j, coeff) in row_entries {
                        if fixed_values[j].is_some() {
                            continue;
                        }

                        fixed_values[j] = Some(if coeff > 0. {
                            problem.var_lb()[j]
                        } else {
                            problem.var_ub()[j]
                        });
                    }

                    removed_rows[row] = true;
                    changed = true;
                }
            }

            if infeasible || !changed {
                break;
            }
        }

        if infeasible {
            return Ok(Self {
                original: problem,
                transformed: None,
                result: PreprocessingResult::Infeasible,
                fixed_values,
                var_map: Vec::new(),
                row_map: Vec::new(),
            });
        }

        let num_fixed = fixed_values.iter().filter(|v| v.is_some()).count();
        let num_removed = removed_rows.iter().filter(|&&r| r).count();

        if num_fixed == 0 && num_removed == 0 {
            return Ok(Self {
                original: problem,
                transformed: None,
                result: PreprocessingResult::Failure,
                fixed_values,
                var_map: Vec::new(),
                row_map: Vec::new(),
            });
        }

        let var_map: Vec<I> = (0..num_vars).filter(|&j| fixed_values[j].is_none()).collect();

        let row_map: Vec<I> = (0..num_linear).filter(|&i| !removed_rows[i]).collect();

        let transformed = build_transformed(&problem, &fixed_values, &var_map, &row_map)?;

        Ok(Self {
            original: problem,
            transformed: Some(transformed),
            result: PreprocessingResult::Success,
            fixed_values,
            var_map,
            row_map,
        })
    }

    pub fn result(&self) -> PreprocessingResult {
        self.result
    }

    pub fn transformed_problem(&self) -> Option<SharedProblem> {
        self.transformed.clone()
    }

    /// Projects an original-space primal onto the kept variables.
    pub fn transform_primal(&self, primal: &Col<E>) -> Col<E> {
        Col::from_fn(self.var_map.len(), |k| primal[self.var_map[k]])
    }

    /// Re-inserts fixed values into a transformed-space primal.
    pub fn restore_primal(&self, reduced: &Col<E>) -> Col<E> {
        let mut full = Col::zeros(self.original.num_vars());

        for (j, fixed) in self.fixed_values.iter().enumerate() {
            if let Some(value) = fixed {
                full[j] = *value;
            }
        }

        for (k, &j) in self.var_map.iter().enumerate() {
            full[j] = reduced[k];
        }

        full
    }

    /// Restores a transformed-space iterate into the original space.
    /// Duals of eliminated rows and fixed variables are reported as zero.
    pub fn restore_iterate(&self, reduced: &Iterate) -> Iterate {
        let mut iterate = Iterate::new(&self.original, self.restore_primal(reduced.primal()));

        iterate.set_obj_val(reduced.obj_val());

        for (k, &j) in self.var_map.iter().enumerate() {
            iterate.vars_dual_mut()[j] = reduced.vars_dual()[k];
        }

        let num_general = self.original.num_general();

        for i in 0..num_general.min(reduced.cons_dual().nrows()) {
            iterate.cons_dual_mut()[i] = reduced.cons_dual()[i];
        }

        for (k, &row) in self.row_map.iter().enumerate() {
            iterate.cons_dual_mut()[num_general + row] =
                reduced.cons_dual()[num_general + k];
        }

        iterate
    }
}

fn linear_rows(problem: &SharedProblem) -> Vec<Vec<(I, E)>> {
    let coeffs = problem.linear_coeffs();

    let mut rows = vec![Vec::new(); problem.num_linear()];

    let symbolic = coeffs.symbolic();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    let values = coeffs.val();

    for j in 0..coeffs.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            rows[row_idx[k]].push((j, values[k]));
        }
    }

    rows
}

fn implied_activity(
    problem: &SharedProblem,
    row_entries: &[(I, E)],
    fixed_values: &[Option<E>],
) -> (E, E) {
    let mut min_activity = 0.;
    let mut max_activity = 0.;

    for &(j, coeff) in row_entries {
        if let Some(value) = fixed_values[j] {
            min_activity += coeff * value;
            max_activity += coeff * value;
            continue;
        }

        let lb = problem.var_lb()[j];
        let ub = problem.var_ub()[j];

        if coeff > 0. {
            min_activity += coeff * lb;
            max_activity += coeff * ub;
        } else {
            min_activity += coeff * ub;
            max_activity += coeff * lb;
        }
    }

    (min_activity, max_activity)
}

fn build_transformed(
    problem: &SharedProblem,
    fixed_values: &[Option<E>],
    var_map: &[I],
    row_map: &[I],
) -> Result<SharedProblem> {
    let func = Rc::new(RefCell::new(FixedVarFunc {
        inner: problem.func().clone(),
        fixed_values: fixed_values.to_vec(),
        var_map: var_map.to_vec(),
        num_full_vars: problem.num_vars(),
    }));

    let var_lb = Col::from_fn(var_map.len(), |k| problem.var_lb()[var_map[k]]);
    let var_ub = Col::from_fn(var_map.len(), |k| problem.var_ub()[var_map[k]]);

    // Linear rows restricted to the kept variables, bounds shifted by the
    // fixed contributions
    let coeffs = problem.linear_coeffs();
    let symbolic = coeffs.symbolic();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    let values = coeffs.val();

    let mut row_positions = vec![None; problem.num_linear()];
    for (position, &row) in row_map.iter().enumerate() {
        row_positions[row] = Some(position);
    }

    let mut col_positions = vec![None; problem.num_vars()];
    for (position, &j) in var_map.iter().enumerate() {
        col_positions[j] = Some(position);
    }

    let mut triplets: Vec<Triplet<I, I, E>> = Vec::new();
    let mut shift = vec![0.; row_map.len()];

    for j in 0..coeffs.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            let Some(row_position) = row_positions[row_idx[k]] else {
                continue;
            };

            match col_positions[j] {
                Some(col_position) => {
                    triplets.push(Triplet::new(row_position, col_position, values[k]));
                }
                None => {
                    shift[row_position] += values[k] * fixed_values[j].unwrap_or(0.);
                }
            }
        }
    }

    let linear_coeffs =
        SparseColMat::try_new_from_triplets(row_map.len(), var_map.len(), &triplets)
            .map_err(|_| crate::SleqpError::internal("transformed linear coefficients"))?;

    let linear_lb = Col::from_fn(row_map.len(), |k| {
        let bound = problem.linear_lb()[row_map[k]];
        if bound.is_finite() { bound - shift[k] } else { bound }
    });

    let linear_ub = Col::from_fn(row_map.len(), |k| {
        let bound = problem.linear_ub()[row_map[k]];
        if bound.is_finite() { bound - shift[k] } else { bound }
    });

    Problem::new(
        func,
        var_lb,
        var_ub,
        problem.general_lb().clone(),
        problem.general_ub().clone(),
        linear_coeffs,
        linear_lb,
        linear_ub,
    )
}

/// Presents a problem with fixed variables eliminated.
struct FixedVarFunc {
    inner: SharedFunc,
    fixed_values: Vec<Option<E>>,
    var_map: Vec<I>,
    num_full_vars: I,
}

impl FixedVarFunc {
    fn expand(&self, reduced: ColRef<'_, E>) -> Col<E> {
        let mut full = Col::zeros(self.num_full_vars);

        for (j, fixed) in self.fixed_values.iter().enumerate() {
            if let Some(value) = fixed {
                full[j] = *value;
            }
        }

        for (k, &j) in self.var_map.iter().enumerate() {
            full[j] = reduced[k];
        }

        full
    }
}

impl Func for FixedVarFunc {
    fn num_vars(&self) -> I {
        self.var_map.len()
    }

    fn num_cons(&self) -> I {
        self.inner.borrow().num_cons()
    }

    fn set_value(&mut self, x: ColRef<'_, E>, reason: ValueReason) -> Result<bool> {
        let full = self.expand(x);

        self.inner.borrow_mut().set_value(full.as_ref(), reason)
    }

    fn obj_val(&self) -> Result<E> {
        self.inner.borrow().obj_val()
    }

    fn obj_grad(&self) -> Result<SparseVec> {
        let full = self.inner.borrow().obj_grad()?;

        let mut reduced = SparseVec::empty(self.var_map.len());

        for (k, &j) in self.var_map.iter().enumerate() {
            let value = full.value_at(j);

            if value != 0. {
                reduced.push(k, value);
            }
        }

        Ok(reduced)
    }

    fn cons_val(&self) -> Result<SparseVec> {
        self.inner.borrow().cons_val()
    }

    fn cons_jac(&self) -> Result<SparseColMat<I, E>> {
        let full = self.inner.borrow().cons_jac()?;

        let symbolic = full.symbolic();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        let values = full.val();

        let mut triplets: Vec<Triplet<I, I, E>> = Vec::new();

        for (k, &j) in self.var_map.iter().enumerate() {
            for entry in col_ptr[j]..col_ptr[j + 1] {
                triplets.push(Triplet::new(row_idx[entry], k, values[entry]));
            }
        }

        SparseColMat::try_new_from_triplets(full.nrows(), self.var_map.len(), &triplets)
            .map_err(|_| crate::SleqpError::internal("reduced Jacobian assembly"))
    }

    fn hess_prod(
        &self,
        obj_dual: E,
        direction: ColRef<'_, E>,
        cons_duals: ColRef<'_, E>,
    ) -> Result<Col<E>> {
        let mut full_direction = Col::zeros(self.num_full_vars);

        for (k, &j) in self.var_map.iter().enumerate() {
            full_direction[j] = direction[k];
        }

        let full = self
            .inner
            .borrow()
            .hess_prod(obj_dual, full_direction.as_ref(), cons_duals)?;

        Ok(Col::from_fn(self.var_map.len(), |k| full[self.var_map[k]]))
    }

    fn func_type(&self) -> FuncType {
        self.inner.borrow().func_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::ClosureFunc;

    #[test]
    fn test_forcing_constraint_fixes_all_variables() {
        // x + y >= 1 with x <= 1, y <= 0 forces x = 1, y = 0
        let func = ClosureFunc::new(
            2,
            0,
            |x| x[0] + x[1],
            |_| Col::from_fn(2, |_| 1.),
            None,
            None,
            |_, _, _, _| Col::zeros(2),
        )
        .into_shared();

        let linear = SparseColMat::try_new_from_triplets(
            1,
            2,
            &[Triplet::new(0usize, 0usize, 1.), Triplet::new(0, 1, 1.)],
        )
        .unwrap();

        let problem = Problem::new(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |i| [1., 0.][i]),
            Col::zeros(0),
            Col::zeros(0),
            linear,
            Col::from_fn(1, |_| 1.),
            Col::from_fn(1, |_| E::INFINITY),
        )
        .unwrap();

        let preprocessor = Preprocessor::new(problem, &Settings::default()).unwrap();

        assert_eq!(preprocessor.result(), PreprocessingResult::Success);

        let transformed = preprocessor.transformed_problem().unwrap();

        assert_eq!(transformed.num_vars(), 0);
        assert_eq!(transformed.num_linear(), 0);

        let restored = preprocessor.restore_primal(&Col::zeros(0));

        assert_eq!(restored[0], 1.);
        assert_eq!(restored[1], 0.);
    }

    #[test]
    fn test_no_reduction() {
        let func = ClosureFunc::new(
            2,
            0,
            |x| x[0] + x[1],
            |_| Col::from_fn(2, |_| 1.),
            None,
            None,
            |_, _, _, _| Col::zeros(2),
        )
        .into_shared();

        let problem = Problem::new_simple(
            func,
            Col::zeros(2),
            Col::from_fn(2, |_| 1.),
            Col::zeros(0),
            Col::zeros(0),
        )
        .unwrap();

        let preprocessor = Preprocessor::new(problem, &Settings::default()).unwrap();

        assert_eq!(preprocessor.result(), PreprocessingResult::Failure);
    }
}
