use std::cell::RefCell;
use std::rc::Rc;

use faer::{Col, ColRef};

use crate::func::lsq::{LsqAdapter, LsqFunc, SharedLsqFunc};
use crate::func::ValueReason;
use crate::problem::Problem;
use crate::settings::TrSolver;
use crate::{E, I, Result, Settings, Solver, Status};

/// Fitting residuals `r_i(x) = x0 * t_i + x1 - y_i` of a line through
/// three points.
struct LineFit {
    x: Col<E>,
    t: [E; 3],
    y: [E; 3],
}

impl LineFit {
    fn new() -> Self {
        Self {
            x: Col::zeros(2),
            t: [0., 1., 2.],
            // Points on the line y = 2 t - 1
            y: [-1., 1., 3.],
        }
    }
}

impl LsqFunc for LineFit {
    fn num_vars(&self) -> I {
        2
    }

    fn num_residuals(&self) -> I {
        3
    }

    fn set_value(&mut self, x: ColRef<'_, E>, _reason: ValueReason) -> Result<bool> {
        self.x = x.to_owned();
        Ok(false)
    }

    fn residuals(&self) -> Result<Col<E>> {
        Ok(Col::from_fn(3, |i| {
            self.x[0] * self.t[i] + self.x[1] - self.y[i]
        }))
    }

    fn jac_forward(&self, d: ColRef<'_, E>) -> Result<Col<E>> {
        Ok(Col::from_fn(3, |i| d[0] * self.t[i] + d[1]))
    }

    fn jac_adjoint(&self, w: ColRef<'_, E>) -> Result<Col<E>> {
        let mut product = Col::zeros(2);

        for i in 0..3 {
            product[0] += self.t[i] * w[i];
            product[1] += w[i];
        }

        Ok(product)
    }
}

fn line_fit_problem() -> crate::problem::SharedProblem {
    let inner: SharedLsqFunc = Rc::new(RefCell::new(LineFit::new()));

    let adapter = Rc::new(RefCell::new(LsqAdapter::new(inner)));

    Problem::new_simple(
        adapter,
        Col::from_fn(2, |_| E::NEG_INFINITY),
        Col::from_fn(2, |_| E::INFINITY),
        Col::zeros(0),
        Col::zeros(0),
    )
    .unwrap()
}

#[test]
fn test_line_fit_with_lsqr() {
    let problem = line_fit_problem();

    let mut settings = Settings::default();
    settings.tr_solver = TrSolver::Lsqr;

    let mut solver = Solver::new(problem, settings, Col::zeros(2), None).unwrap();

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 2.).abs() < 1e-6);
    assert!((solution.primal()[1] + 1.).abs() < 1e-6);

    // The residuals vanish at the exact fit
    assert!(solution.obj_val() < 1e-10);
}

#[test]
fn test_line_fit_with_gauss_newton_cg() {
    // The Gauss-Newton adapter also serves the Steihaug solver
    let problem = line_fit_problem();

    let mut solver = Solver::new(problem, Settings::default(), Col::zeros(2), None).unwrap();

    solver.solve(Some(100), None).unwrap();

    assert_eq!(solver.status(), Status::Optimal);

    let solution = solver.solution();

    assert!((solution.primal()[0] - 2.).abs() < 1e-6);
    assert!((solution.primal()[1] + 1.).abs() < 1e-6);
}

#[test]
fn test_lsqr_requires_lsq_function() {
    let problem = crate::tests::fixtures::rosenbrock_problem();

    let mut settings = Settings::default();
    settings.tr_solver = TrSolver::Lsqr;

    let result = Solver::new(problem, settings, Col::zeros(2), None);

    assert!(matches!(
        result,
        Err(crate::SleqpError::IllegalArgument { .. })
    ));
}
