//! The exact ℓ1 merit function and its linear and quadratic models.

use faer::Col;

use crate::direction::Direction;
use crate::iterate::Iterate;
use crate::problem::SharedProblem;
use crate::E;

/// Evaluates `φ(x; v) = f(x) + v * (total constraint violation)` and its
/// models along a direction. Iterates remain inside the variable box by
/// construction, so bound terms vanish.
pub struct Merit {
    problem: SharedProblem,
}

impl Merit {
    pub fn new(problem: SharedProblem) -> Self {
        Self { problem }
    }

    /// Exact merit value at an (evaluated) iterate.
    pub fn func(&self, iterate: &Iterate, penalty: E) -> E {
        iterate.obj_val() + penalty * self.problem.total_violation(iterate.cons_val())
    }

    /// Linear model `φ(x;v) + ∇f·d + v * viol(c + J d)`, built from the
    /// direction's precomputed Jacobian product.
    pub fn linear(&self, iterate: &Iterate, direction: &Direction, penalty: E) -> E {
        let linearized = iterate.cons_val() + direction.cons_jac_prod();

        iterate.obj_val()
            + direction.obj_dot()
            + penalty * self.problem.total_violation(&linearized)
    }

    /// Quadratic model `φ_lin(d) + 1/2 d^T H d`, built from the
    /// direction's precomputed Hessian product.
    pub fn quadratic(&self, iterate: &Iterate, direction: &Direction, penalty: E) -> E {
        self.linear(iterate, direction, penalty) + 0.5 * direction.quadratic_term()
    }

    /// Directional derivative of the linear merit model at `base` along
    /// `segment`, using the violation pattern of the linearized
    /// constraints at `base`.
    pub fn linear_directional_derivative(
        &self,
        iterate: &Iterate,
        base: &Direction,
        segment: &Direction,
        penalty: E,
    ) -> E {
        let linearized: Col<E> = iterate.cons_val() + base.cons_jac_prod();

        let mut derivative = segment.obj_dot();

        for i in 0..self.problem.num_cons() {
            if linearized[i] > self.problem.cons_ub()[i] {
                derivative += penalty * segment.cons_jac_prod()[i];
            } else if linearized[i] < self.problem.cons_lb()[i] {
                derivative -= penalty * segment.cons_jac_prod()[i];
            }
        }

        derivative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{ClosureFunc, ValueReason};
    use crate::problem::Problem;
    use faer::sparse::{SparseColMat, Triplet};

    fn constrained_problem() -> SharedProblem {
        // f(x) = x0, c(x) = x0 + x1 with bounds [1, 1] (equality)
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

        Problem::new_simple(
            func,
            Col::from_fn(2, |_| E::NEG_INFINITY),
            Col::from_fn(2, |_| E::INFINITY),
            Col::from_fn(1, |_| 1.),
            Col::from_fn(1, |_| 1.),
        )
        .unwrap()
    }

    #[test]
    fn test_merit_values() {
        let problem = constrained_problem();
        let merit = Merit::new(problem.clone());

        let x = Col::zeros(2);
        problem.set_value(x.as_ref(), ValueReason::Init).unwrap();

        let mut iterate = Iterate::new(&problem, x);
        iterate.evaluate(&problem).unwrap();

        // f = 0, violation of c = 0 against [1,1] is 1
        let penalty = 10.;
        assert!((merit.func(&iterate, penalty) - 10.).abs() < 1e-14);

        // direction d = (1, 0): linearized c = 1, violation gone,
        // linear model = 0 + 1 + 0 = 1
        let mut direction = Direction::zeros(&problem);
        direction.set_primal(Col::from_fn(2, |i| [1., 0.][i]));

        let duals = Col::zeros(1);
        direction.reset(&problem, &iterate, duals.as_ref()).unwrap();

        assert!((merit.linear(&iterate, &direction, penalty) - 1.).abs() < 1e-14);

        // quadratic term is zero for the zero Hessian
        assert!(
            (merit.quadratic(&iterate, &direction, penalty)
                - merit.linear(&iterate, &direction, penalty))
            .abs()
                < 1e-14
        );
    }
}
