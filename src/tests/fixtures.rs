//! Shared problem fixtures.

use faer::sparse::{SparseColMat, Triplet};
use faer::Col;

use crate::func::ClosureFunc;
use crate::problem::{Problem, SharedProblem};
use crate::E;

/// The Rosenbrock function `(a - x)^2 + b (y - x^2)^2` with `a = 1`,
/// `b = 100`, unconstrained.
pub fn rosenbrock_problem() -> SharedProblem {
    const A: E = 1.;
    const B: E = 100.;

    let func = ClosureFunc::new(
        2,
        0,
        |x| {
            let xsq = x[0] * x[0];
            (A - x[0]).powi(2) + B * (x[1] - xsq).powi(2)
        },
        |x| {
            let xsq = x[0] * x[0];

            Col::from_fn(2, |i| {
                [
                    4. * B * x[0] * (xsq - x[1]) + 2. * x[0] - 2. * A,
                    -2. * B * (xsq - x[1]),
                ][i]
            })
        },
        None,
        None,
        |x, obj_dual, d, _| {
            let xsq = x[0] * x[0];

            Col::from_fn(2, |i| {
                obj_dual
                    * [
                        (8. * B * xsq + 4. * B * (xsq - x[1]) + 2.) * d[0] - 4. * B * x[0] * d[1],
                        -4. * B * x[0] * d[0] + 2. * B * d[1],
                    ][i]
            })
        },
    )
    .into_shared();

    Problem::new_simple(
        func,
        Col::from_fn(2, |_| E::NEG_INFINITY),
        Col::from_fn(2, |_| E::INFINITY),
        Col::zeros(0),
        Col::zeros(0),
    )
    .unwrap()
}

/// A strictly convex quadratic `(x0 + 1)^2 + 2 (x1 + 1)^2` over the
/// nonnegative orthant, minimized at the origin where the gradient is
/// `(2, 4)`.
pub fn quad_problem() -> SharedProblem {
    let func = ClosureFunc::new(
        2,
        0,
        |x| (x[0] + 1.).powi(2) + 2. * (x[1] + 1.).powi(2),
        |x| Col::from_fn(2, |i| [2. * (x[0] + 1.), 4. * (x[1] + 1.)][i]),
        None,
        None,
        |_, obj_dual, d, _| Col::from_fn(2, |i| obj_dual * [2. * d[0], 4. * d[1]][i]),
    )
    .into_shared();

    Problem::new_simple(
        func,
        Col::zeros(2),
        Col::from_fn(2, |_| E::INFINITY),
        Col::zeros(0),
        Col::zeros(0),
    )
    .unwrap()
}

/// The Wächter-Biegler example
///
/// ```text
///   min  x0
///   s.t. x0^2 - x1 + 1   = 0
///        x0   - x2 - 1/2 = 0
///        x1, x2 >= 0
/// ```
///
/// with optimal solution `(1/2, 5/4, 0)`.
pub fn wachbieg_problem() -> SharedProblem {
    let func = ClosureFunc::new(
        3,
        2,
        |x| x[0],
        |_| Col::from_fn(3, |i| [1., 0., 0.][i]),
        Some(Box::new(|x| {
            Col::from_fn(2, |i| {
                [x[0] * x[0] - x[1] + 1., x[0] - x[2] - 0.5][i]
            })
        })),
        Some(Box::new(|x| {
            let triplets = [
                Triplet::new(0usize, 0usize, 2. * x[0]),
                Triplet::new(0, 1, -1.),
                Triplet::new(1, 0, 1.),
                Triplet::new(1, 2, -1.),
            ];
            SparseColMat::try_new_from_triplets(2, 3, &triplets).unwrap()
        })),
        |_, _, d, duals| {
            // Only the first constraint is nonlinear
            Col::from_fn(3, |i| [2. * duals[0] * d[0], 0., 0.][i])
        },
    )
    .into_shared();

    Problem::new_simple(
        func,
        Col::from_fn(3, |i| [E::NEG_INFINITY, 0., 0.][i]),
        Col::from_fn(3, |_| E::INFINITY),
        Col::zeros(2),
        Col::zeros(2),
    )
    .unwrap()
}

pub fn wachbieg_initial() -> Col<E> {
    Col::from_fn(3, |i| [-2., 3., 1.][i])
}

pub fn wachbieg_optimal() -> Col<E> {
    Col::from_fn(3, |i| [0.5, 1.25, 0.][i])
}

/// An equality-constrained quadratic: `min x0^2 + x1^2` subject to
/// `x0 + x1 = 1`, with solution `(1/2, 1/2)` and constraint dual `1`.
pub fn equality_qp_problem() -> SharedProblem {
    let func = ClosureFunc::new(
        2,
        1,
        |x| x[0] * x[0] + x[1] * x[1],
        |x| Col::from_fn(2, |i| 2. * x[i]),
        Some(Box::new(|x| Col::from_fn(1, |_| x[0] + x[1]))),
        Some(Box::new(|_| {
            let triplets = [Triplet::new(0usize, 0usize, 1.), Triplet::new(0, 1, 1.)];
            SparseColMat::try_new_from_triplets(1, 2, &triplets).unwrap()
        })),
        |_, obj_dual, d, _| Col::from_fn(2, |i| 2. * obj_dual * d[i]),
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
