//! The augmented Jacobian: factorization of the KKT system
//!
//! ```text
//!   [ I   A^T ]
//!   [ A    0  ]
//! ```
//!
//! where the rows of `A` are the constraint Jacobian rows and canonical
//! basis rows of the entries in the working set. One factorization per
//! working-set change serves every min-norm solve and null-space
//! projection of the iteration.

use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, Mat};

use crate::iterate::Iterate;
use crate::linalg::solver::{LinearSolver, Solver as _};
use crate::problem::SharedProblem;
use crate::sparse;
use crate::working_set::{ActiveState, WorkingSet, WorkingSetEntry};
use crate::{E, I, Result, SleqpError};

pub trait AugJac {
    /// Rebuilds `A` from the iterate's Jacobian and working set and factors
    /// the KKT matrix.
    fn set_iterate(&mut self, iterate: &Iterate) -> Result<()>;

    /// Returns `argmin ||d||_2` subject to `A d = rhs`, where `rhs` is
    /// indexed by working-set position.
    fn solve_min_norm(&self, rhs: &Col<E>) -> Result<Col<E>>;

    /// Splits `r` into `(N r, μ)` with `r = N r + A^T μ`, where `N`
    /// projects onto the null space of `A`.
    fn project(&self, r: &Col<E>) -> Result<(Col<E>, Col<E>)>;

    /// Condition estimate of the factorization; `None` if unavailable.
    fn condition(&self) -> Result<(bool, Option<E>)> {
        Ok((false, None))
    }
}

/// Augmented Jacobian for problems with general constraints, backed by a
/// sparse factorization.
pub struct StandardAugJac<S: LinearSolver> {
    problem: SharedProblem,
    solver: S,
    working_set_size: I,
    num_vars: I,
    factorized: bool,
}

impl<S: LinearSolver> StandardAugJac<S> {
    pub fn new(problem: SharedProblem) -> Self {
        let num_vars = problem.num_vars();

        Self {
            problem,
            solver: S::new(),
            working_set_size: 0,
            num_vars,
            factorized: false,
        }
    }

    fn assemble(&self, iterate: &Iterate) -> Result<SparseColMat<I, E>> {
        let working_set = iterate.working_set();
        let num_vars = self.num_vars;
        let size = working_set.size();
        let dim = num_vars + size;

        let mut triplets: Vec<Triplet<I, I, E>> = Vec::new();

        for j in 0..num_vars {
            triplets.push(Triplet::new(j, j, 1.));
        }

        for (position, entry) in working_set.entries().iter().enumerate() {
            let row = num_vars + position;

            match entry {
                WorkingSetEntry::Variable(j) => {
                    triplets.push(Triplet::new(row, *j, 1.));
                    triplets.push(Triplet::new(*j, row, 1.));
                }
                WorkingSetEntry::Constraint(i) => {
                    for (j, value) in sparse::mat_row(iterate.cons_jac().as_ref(), *i) {
                        triplets.push(Triplet::new(row, j, value));
                        triplets.push(Triplet::new(j, row, value));
                    }
                }
            }
        }

        SparseColMat::try_new_from_triplets(dim, dim, &triplets)
            .map_err(|_| SleqpError::internal("augmented system assembly"))
    }

    fn solve_augmented(&self, upper: Option<&Col<E>>, lower: Option<&Col<E>>) -> Result<Col<E>> {
        if !self.factorized {
            return Err(SleqpError::internal("augmented system not factorized"));
        }

        let dim = self.num_vars + self.working_set_size;

        let mut rhs = Mat::zeros(dim, 1);

        if let Some(upper) = upper {
            debug_assert_eq!(upper.nrows(), self.num_vars);

            for j in 0..self.num_vars {
                rhs[(j, 0)] = upper[j];
            }
        }

        if let Some(lower) = lower {
            debug_assert_eq!(lower.nrows(), self.working_set_size);

            for p in 0..self.working_set_size {
                rhs[(self.num_vars + p, 0)] = lower[p];
            }
        }

        let sol = self.solver.solve(rhs.as_ref())?;

        Ok(Col::from_fn(dim, |i| sol[(i, 0)]))
    }
}

impl<S: LinearSolver> AugJac for StandardAugJac<S> {
    fn set_iterate(&mut self, iterate: &Iterate) -> Result<()> {
        debug_assert!(iterate.working_set().valid());

        self.working_set_size = iterate.working_set().size();

        let mat = self.assemble(iterate)?;

        self.solver.analyze(mat.as_ref())?;

        self.solver
            .factorize(mat.as_ref())
            .map_err(|_| SleqpError::SingularFactorization)?;

        self.factorized = true;

        Ok(())
    }

    fn solve_min_norm(&self, rhs: &Col<E>) -> Result<Col<E>> {
        let sol = self.solve_augmented(None, Some(rhs))?;

        Ok(Col::from_fn(self.num_vars, |j| sol[j]))
    }

    fn project(&self, r: &Col<E>) -> Result<(Col<E>, Col<E>)> {
        let sol = self.solve_augmented(Some(r), None)?;

        let primal = Col::from_fn(self.num_vars, |j| sol[j]);
        let dual = Col::from_fn(self.working_set_size, |p| sol[self.num_vars + p]);

        Ok((primal, dual))
    }
}

/// Degenerate augmented Jacobian of an unconstrained problem: the working
/// set is empty and the projector is the identity.
pub struct UnconstrainedAugJac {
    num_vars: I,
}

impl UnconstrainedAugJac {
    pub fn new(problem: SharedProblem) -> Self {
        Self {
            num_vars: problem.num_vars(),
        }
    }
}

impl AugJac for UnconstrainedAugJac {
    fn set_iterate(&mut self, iterate: &Iterate) -> Result<()> {
        debug_assert_eq!(iterate.working_set().size(), 0);

        Ok(())
    }

    fn solve_min_norm(&self, rhs: &Col<E>) -> Result<Col<E>> {
        debug_assert_eq!(rhs.nrows(), 0);

        Ok(Col::zeros(self.num_vars))
    }

    fn project(&self, r: &Col<E>) -> Result<(Col<E>, Col<E>)> {
        Ok((r.clone(), Col::zeros(0)))
    }

    fn condition(&self) -> Result<(bool, Option<E>)> {
        Ok((true, Some(1.)))
    }
}

/// Augmented Jacobian of a box-constrained problem: `A` consists of
/// canonical basis rows only, so all solves are componentwise.
pub struct BoxAugJac {
    num_vars: I,
    active_vars: Vec<I>,
}

impl BoxAugJac {
    pub fn new(problem: SharedProblem) -> Self {
        Self {
            num_vars: problem.num_vars(),
            active_vars: Vec::new(),
        }
    }
}

impl AugJac for BoxAugJac {
    fn set_iterate(&mut self, iterate: &Iterate) -> Result<()> {
        let working_set = iterate.working_set();

        debug_assert_eq!(working_set.num_active_cons(), 0);

        self.active_vars.clear();

        for entry in working_set.entries() {
            match entry {
                WorkingSetEntry::Variable(j) => self.active_vars.push(*j),
                WorkingSetEntry::Constraint(_) => {
                    return Err(SleqpError::internal(
                        "constraint in box-constrained working set",
                    ));
                }
            }
        }

        Ok(())
    }

    fn solve_min_norm(&self, rhs: &Col<E>) -> Result<Col<E>> {
        let mut sol = Col::zeros(self.num_vars);

        for (position, &j) in self.active_vars.iter().enumerate() {
            sol[j] = rhs[position];
        }

        Ok(sol)
    }

    fn project(&self, r: &Col<E>) -> Result<(Col<E>, Col<E>)> {
        let mut primal = r.clone();
        let mut dual = Col::zeros(self.active_vars.len());

        for (position, &j) in self.active_vars.iter().enumerate() {
            dual[position] = r[j];
            primal[j] = 0.;
        }

        Ok((primal, dual))
    }

    fn condition(&self) -> Result<(bool, Option<E>)> {
        Ok((true, Some(1.)))
    }
}

/// Creates the augmented Jacobian variant matching the problem shape.
pub fn create_aug_jac(problem: SharedProblem) -> Box<dyn AugJac> {
    if problem.is_unconstrained() {
        Box::new(UnconstrainedAugJac::new(problem))
    } else if problem.num_cons() == 0 {
        Box::new(BoxAugJac::new(problem))
    } else {
        Box::new(StandardAugJac::<crate::linalg::lu::SimplicialSparseLu>::new(problem))
    }
}

/// Builds the rhs of the working-set manifold: for each active row the
/// difference between the active bound and the current value.
pub fn active_bound_rhs(
    problem: &SharedProblem,
    iterate: &Iterate,
    working_set: &WorkingSet,
) -> Col<E> {
    let mut rhs = Col::zeros(working_set.size());

    for (position, entry) in working_set.entries().iter().enumerate() {
        let value = match entry {
            WorkingSetEntry::Variable(j) => {
                let x = iterate.primal()[*j];

                match working_set.var_state(*j) {
                    ActiveState::ActiveUpper => problem.var_ub()[*j] - x,
                    ActiveState::ActiveLower | ActiveState::ActiveBoth => {
                        problem.var_lb()[*j] - x
                    }
                    ActiveState::Inactive => unreachable!(),
                }
            }
            WorkingSetEntry::Constraint(i) => {
                let c = iterate.cons_val()[*i];

                match working_set.cons_state(*i) {
                    ActiveState::ActiveUpper => problem.cons_ub()[*i] - c,
                    ActiveState::ActiveLower | ActiveState::ActiveBoth => {
                        problem.cons_lb()[*i] - c
                    }
                    ActiveState::Inactive => unreachable!(),
                }
            }
        };

        rhs[position] = value;
    }

    rhs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{ClosureFunc, ValueReason};
    use crate::linalg::lu::SimplicialSparseLu;
    use crate::problem::Problem;

    fn box_problem() -> SharedProblem {
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

        Problem::new_simple(
            func,
            Col::zeros(2),
            Col::from_fn(2, |_| 1.),
            Col::zeros(0),
            Col::zeros(0),
        )
        .unwrap()
    }

    #[test]
    fn test_standard_min_norm_and_projection() {
        let problem = box_problem();

        let x = Col::from_fn(2, |_| 0.);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        iterate
            .working_set_mut()
            .add_variable(0, ActiveState::ActiveLower);

        let mut aug_jac = StandardAugJac::<SimplicialSparseLu>::new(problem.clone());
        aug_jac.set_iterate(&iterate).unwrap();

        // min-norm solution of x0 = 3 is (3, 0)
        let rhs = Col::from_fn(1, |_| 3.);
        let sol = aug_jac.solve_min_norm(&rhs).unwrap();

        assert!((sol[0] - 3.).abs() < 1e-10);
        assert!(sol[1].abs() < 1e-10);

        // projection of r = (2, 5): null-space part (0, 5), dual 2
        let r = Col::from_fn(2, |i| [2., 5.][i]);
        let (primal, dual) = aug_jac.project(&r).unwrap();

        assert!(primal[0].abs() < 1e-10);
        assert!((primal[1] - 5.).abs() < 1e-10);
        assert!((dual[0] - 2.).abs() < 1e-10);

        // r = N r + A^T mu must hold
        assert!((primal[0] + dual[0] - r[0]).abs() < 1e-10);
    }

    #[test]
    fn test_box_aug_jac_matches_standard() {
        let problem = box_problem();

        let x = Col::from_fn(2, |_| 0.);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        iterate
            .working_set_mut()
            .add_variable(1, ActiveState::ActiveLower);

        let mut box_jac = BoxAugJac::new(problem.clone());
        box_jac.set_iterate(&iterate).unwrap();

        let r = Col::from_fn(2, |i| [1., -4.][i]);
        let (primal, dual) = box_jac.project(&r).unwrap();

        assert_eq!(primal[0], 1.);
        assert_eq!(primal[1], 0.);
        assert_eq!(dual[0], -4.);

        let rhs = Col::from_fn(1, |_| 2.);
        let sol = box_jac.solve_min_norm(&rhs).unwrap();
        assert_eq!(sol[1], 2.);
    }
}
