//! The second-order correction: a minimum-norm step against the
//! linearized constraint residual at a rejected trial point.

use faer::Col;

use crate::aug_jac::AugJac;
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::working_set::{ActiveState, WorkingSetEntry};
use crate::{E, Result};

pub struct Soc {
    problem: SharedProblem,
}

impl Soc {
    pub fn new(problem: SharedProblem) -> Self {
        Self { problem }
    }

    /// Computes the correction solving the min-norm problem against the
    /// residual of the active rows at the trial iterate.
    pub fn compute_step(
        &self,
        aug_jac: &dyn AugJac,
        iterate: &Iterate,
        trial_iterate: &Iterate,
    ) -> Result<Col<E>> {
        let working_set = iterate.working_set();

        let mut rhs = Col::zeros(working_set.size());

        for (position, entry) in working_set.entries().iter().enumerate() {
            rhs[position] = match entry {
                WorkingSetEntry::Variable(j) => {
                    let x = trial_iterate.primal()[*j];

                    match working_set.var_state(*j) {
                        ActiveState::ActiveUpper => self.problem.var_ub()[*j] - x,
                        ActiveState::ActiveLower | ActiveState::ActiveBoth => {
                            self.problem.var_lb()[*j] - x
                        }
                        ActiveState::Inactive => unreachable!(),
                    }
                }
                WorkingSetEntry::Constraint(i) => {
                    let value = trial_iterate.cons_val()[*i];

                    match working_set.cons_state(*i) {
                        ActiveState::ActiveUpper => self.problem.cons_ub()[*i] - value,
                        ActiveState::ActiveLower | ActiveState::ActiveBoth => {
                            self.problem.cons_lb()[*i] - value
                        }
                        ActiveState::Inactive => unreachable!(),
                    }
                }
            };
        }

        aug_jac.solve_min_norm(&rhs)
    }

    /// The largest `alpha` in `[0, 1]` keeping `x + alpha * d` inside the
    /// variable box, starting from the trial point.
    pub fn max_step_length(&self, trial_primal: &Col<E>, correction: &Col<E>) -> E {
        let mut max_step: E = 1.;

        for j in 0..self.problem.num_vars() {
            let rate = correction[j];

            if rate == 0. {
                continue;
            }

            let upper_diff = self.problem.var_ub()[j] - trial_primal[j];
            let lower_diff = self.problem.var_lb()[j] - trial_primal[j];

            if rate > 0. && upper_diff.is_finite() {
                max_step = max_step.min((upper_diff / rate).max(0.));
            }

            if rate < 0. && lower_diff.is_finite() {
                max_step = max_step.min((lower_diff / rate).max(0.));
            }
        }

        max_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aug_jac::{AugJac, StandardAugJac};
    use crate::func::{ClosureFunc, ValueReason};
    use crate::linalg::lu::SimplicialSparseLu;
    use crate::problem::Problem;
    use faer::sparse::{SparseColMat, Triplet};

    #[test]
    fn test_soc_restores_linearized_feasibility() {
        // Equality constraint x0 + x1 = 1
        let func = ClosureFunc::new(
            2,
            1,
            |x| x[0],
            |_| Col::from_fn(2, |i| [1., 0.][i]),
            Some(Box::new(|x| Col::from_fn(1, |_| x[0] + x[1]))),
            Some(Box::new(|_| {
                let triplets = [Triplet::new(0, 0, 1.), Triplet::new(0, 1, 1.)];
                SparseColMat::try_new_from_triplets(1, 2, &triplets).unwrap()
            })),
            |_, _, _, _| Col::zeros(2),
        )
        .into_shared();

        let problem = Problem::new_simple(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |_| E::INFINITY),
            Col::from_fn(1, |_| 1.),
            Col::from_fn(1, |_| 1.),
        )
        .unwrap();

        let x = Col::from_fn(2, |i| [0.5, 0.5][i]);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        iterate
            .working_set_mut()
            .add_constraint(0, ActiveState::ActiveBoth);

        let mut aug_jac = StandardAugJac::<SimplicialSparseLu>::new(problem.clone());
        aug_jac.set_iterate(&iterate).unwrap();

        // A trial point violating the constraint
        let trial_x = Col::from_fn(2, |i| [0.9, 0.4][i]);
        problem
            .set_value(trial_x.as_ref(), ValueReason::TryingIterate)
            .unwrap();

        let mut trial_iterate = Iterate::new(&problem, trial_x);
        trial_iterate.set_cons_val(
            problem
                .cons_val(trial_iterate.primal().as_ref())
                .unwrap(),
        );

        let soc = Soc::new(problem.clone());

        let correction = soc
            .compute_step(&aug_jac, &iterate, &trial_iterate)
            .unwrap();

        // The corrected point satisfies the linearization: sum of the
        // correction equals the constraint residual -0.3
        let corrected =
            trial_iterate.primal()[0] + correction[0] + trial_iterate.primal()[1] + correction[1];

        assert!((corrected - 1.).abs() < 1e-10);

        assert_eq!(soc.max_step_length(trial_iterate.primal(), &correction), 1.);
    }
}
