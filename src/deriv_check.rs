//! Finite-difference validation of user-supplied derivatives.
//!
//! A failed check raises [`SleqpError::InvalidDerivative`] and aborts the
//! solve; derivative errors are never silently ignored.

use faer::Col;
use tracing::warn;

use crate::func::ValueReason;
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::settings::{DERIV_CHECK_FIRST, DERIV_CHECK_SECOND_EXHAUSTIVE, DERIV_CHECK_SECOND_SIMPLE};
use crate::{E, I, Result, Settings, SleqpError};

pub struct DerivChecker {
    problem: SharedProblem,
    perturbation: E,
    tolerance: E,
}

impl DerivChecker {
    pub fn new(problem: SharedProblem, settings: &Settings) -> Self {
        Self {
            problem,
            perturbation: settings.deriv_perturbation,
            tolerance: settings.deriv_tol,
        }
    }

    /// Runs the checks selected by the `deriv_check` bitmask.
    pub fn check(&self, iterate: &Iterate, deriv_check: u8) -> Result<()> {
        if deriv_check & DERIV_CHECK_FIRST != 0 {
            self.check_first_order(iterate)?;
        }

        if deriv_check & DERIV_CHECK_SECOND_EXHAUSTIVE != 0 {
            self.check_second_order(iterate, true)?;
        } else if deriv_check & DERIV_CHECK_SECOND_SIMPLE != 0 {
            self.check_second_order(iterate, false)?;
        }

        Ok(())
    }

    fn perturbed(&self, iterate: &Iterate, index: I, step: E) -> Col<E> {
        let mut point = iterate.primal().clone();
        point[index] += step;
        point
    }

    /// Compares the objective gradient and the Jacobian columns against
    /// forward differences.
    pub fn check_first_order(&self, iterate: &Iterate) -> Result<()> {
        let num_vars = self.problem.num_vars();
        let num_cons = self.problem.num_cons();

        let base_obj = iterate.obj_val();
        let base_cons = iterate.cons_val().clone();

        let step = self.perturbation.sqrt();

        let mut failure = None;

        for j in 0..num_vars {
            let point = self.perturbed(iterate, j, step);

            self.problem.set_value(point.as_ref(), ValueReason::Checking)?;

            let obj = self.problem.obj_val()?;
            let estimate = (obj - base_obj) / step;

            let expected = iterate.obj_grad()[j];

            if (estimate - expected).abs() > self.tolerance * (1. + expected.abs()) {
                warn!(
                    "Objective gradient entry {} is {:.6e}, finite differences suggest {:.6e}",
                    j, expected, estimate
                );

                failure = Some(format!("objective gradient entry {j}"));
            }

            if num_cons > 0 {
                let cons = self.problem.cons_val(point.as_ref())?;

                for i in 0..num_cons {
                    let estimate = (cons[i] - base_cons[i]) / step;

                    let expected = jac_entry(iterate, i, j);

                    if (estimate - expected).abs() > self.tolerance * (1. + expected.abs()) {
                        warn!(
                            "Jacobian entry ({}, {}) is {:.6e}, finite differences suggest {:.6e}",
                            i, j, expected, estimate
                        );

                        failure = Some(format!("Jacobian entry ({i}, {j})"));
                    }
                }
            }
        }

        // Restore the evaluation point
        self.problem
            .set_value(iterate.primal().as_ref(), ValueReason::Checking)?;

        if let Some(location) = failure {
            return Err(SleqpError::InvalidDerivative {
                message: format!("finite-difference mismatch at {location}"),
            });
        }

        Ok(())
    }

    /// Compares Hessian products against forward differences of the
    /// gradient of the Lagrangian. The exhaustive variant additionally
    /// probes each constraint Hessian through unit multipliers.
    pub fn check_second_order(&self, iterate: &Iterate, exhaustive: bool) -> Result<()> {
        let num_vars = self.problem.num_vars();
        let num_cons = self.problem.num_general();

        let step = self.perturbation.sqrt();

        let mut duals: Vec<Col<E>> = vec![Col::zeros(self.problem.num_cons())];

        if exhaustive {
            for i in 0..num_cons {
                let mut dual = Col::zeros(self.problem.num_cons());
                dual[i] = 1.;
                duals.push(dual);
            }
        }

        let mut failure = None;

        for dual in &duals {
            let obj_dual = if dual.norm_max() == 0. { 1. } else { 0. };

            for j in 0..num_vars {
                let mut direction = Col::zeros(num_vars);
                direction[j] = 1.;

                self.problem
                    .set_value(iterate.primal().as_ref(), ValueReason::Checking)?;

                let product =
                    self.problem
                        .hess_prod(obj_dual, direction.as_ref(), dual.as_ref())?;

                let base_grad = lagrangian_grad(&self.problem, iterate.primal(), obj_dual, dual)?;

                let point = self.perturbed(iterate, j, step);
                let pert_grad = lagrangian_grad(&self.problem, &point, obj_dual, dual)?;

                for k in 0..num_vars {
                    let estimate = (pert_grad[k] - base_grad[k]) / step;
                    let expected = product[k];

                    if (estimate - expected).abs() > self.tolerance * (1. + expected.abs()) {
                        warn!(
                            "Hessian product entry ({}, {}) is {:.6e}, finite differences suggest {:.6e}",
                            k, j, expected, estimate
                        );

                        failure = Some(format!("Hessian product entry ({k}, {j})"));
                    }
                }
            }
        }

        self.problem
            .set_value(iterate.primal().as_ref(), ValueReason::Checking)?;

        if let Some(location) = failure {
            return Err(SleqpError::InvalidDerivative {
                message: format!("finite-difference mismatch at {location}"),
            });
        }

        Ok(())
    }
}

fn jac_entry(iterate: &Iterate, row: I, col: I) -> E {
    let jac = iterate.cons_jac();
    let symbolic = jac.symbolic();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    let values = jac.val();

    for k in col_ptr[col]..col_ptr[col + 1] {
        if row_idx[k] == row {
            return values[k];
        }
    }

    0.
}

fn lagrangian_grad(
    problem: &SharedProblem,
    point: &Col<E>,
    obj_dual: E,
    cons_dual: &Col<E>,
) -> Result<Col<E>> {
    problem.set_value(point.as_ref(), ValueReason::Checking)?;

    let mut gradient = obj_dual * problem.obj_grad()?;

    if problem.num_cons() > 0 && cons_dual.norm_max() > 0. {
        let jac = problem.cons_jac()?;
        gradient += crate::sparse::mat_t_vec(jac.as_ref(), cons_dual.as_ref());
    }

    Ok(gradient)
}
