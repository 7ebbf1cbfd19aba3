//! # Linear Solvers for General Sparse Matrices using LU Factorization
//!
//! This module provides an implementation of the [`Solver`] trait for
//! general sparse linear systems using simplicial LU factorization with
//! the Faer library. The augmented KKT systems factored here are symmetric
//! indefinite but are treated as general matrices.

use faer::dyn_stack::{MemBuffer, MemStack};
use faer::perm::Perm;
use faer::prelude::{Reborrow, ReborrowMut};
use faer::sparse::linalg::colamd;
use faer::sparse::linalg::lu::simplicial::{self, SimplicialLu};
use faer::sparse::SparseColMatRef;
use faer::{Mat, MatMut, MatRef};

use crate::linalg::solver::{LinearSolver, LinearSolverError, Solver};
use crate::{E, I};

/// Sparse LU solver using the simplicial factorization method.
///
/// Stores symbolic analysis, numeric factorization, row and column
/// permutations. All fields are uninitialized (`None` or empty) until
/// `analyze` and `factorize` are called.
pub struct SimplicialSparseLu {
    /// Numeric LU factorization (set by `factorize`).
    lu: Option<SimplicialLu<I, E>>,
    /// Row permutation from pivoting (set by `factorize`).
    row_perm: Option<Perm<I>>,
    /// Column permutation for fill reduction (set by `analyze`).
    col_perm: Option<Perm<I>>,
}

impl Solver for SimplicialSparseLu {
    fn new() -> Self {
        Self {
            lu: None,
            row_perm: None,
            col_perm: None,
        }
    }

    /// Performs symbolic analysis of the input matrix and computes a
    /// fill-reducing column permutation.
    fn analyze(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError> {
        let nrows = mat.nrows();
        let ncols = mat.ncols();
        let nnz = mat.compute_nnz();

        // Fill reducing column permutation using COLAMD
        let (col_perm_fwd, col_perm_inv) = {
            let mut perm = Vec::new();
            let mut perm_inv = Vec::new();
            perm.try_reserve_exact(ncols)
                .map_err(|_| LinearSolverError::MemoryReservation)?;
            perm_inv
                .try_reserve_exact(ncols)
                .map_err(|_| LinearSolverError::MemoryReservation)?;
            perm.resize(ncols, 0usize);
            perm_inv.resize(ncols, 0usize);

            let mut mem = MemBuffer::try_new(colamd::order_scratch::<usize>(nrows, ncols, nnz))
                .map_err(|_| LinearSolverError::MemoryAllocation)?;

            colamd::order(
                &mut perm,
                &mut perm_inv,
                mat.symbolic(),
                colamd::Control::default(),
                MemStack::new(&mut mem),
            )
            .map_err(|_| LinearSolverError::SymbolicFactorization)?;

            (perm, perm_inv)
        };

        self.col_perm = Some(unsafe {
            Perm::new_unchecked(
                col_perm_fwd.into_boxed_slice(),
                col_perm_inv.into_boxed_slice(),
            )
        });

        Ok(())
    }

    /// Performs numeric LU factorization of the matrix after symbolic
    /// analysis.
    fn factorize(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError> {
        let col_perm = self
            .col_perm
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;

        let nrows = mat.nrows();
        let ncols = mat.ncols();

        // Initialize row permutation
        let mut row_perm = Vec::new();
        let mut row_perm_inv = Vec::new();
        row_perm
            .try_reserve_exact(nrows)
            .map_err(|_| LinearSolverError::MemoryReservation)?;
        row_perm_inv
            .try_reserve_exact(nrows)
            .map_err(|_| LinearSolverError::MemoryReservation)?;
        row_perm.resize(nrows, 0usize);
        row_perm_inv.resize(nrows, 0usize);

        // Initialize LU structure
        let mut lu = SimplicialLu::new();

        // Numeric factorization
        let mut mem = MemBuffer::try_new(simplicial::factorize_simplicial_numeric_lu_scratch::<
            I,
            E,
        >(nrows, ncols))
        .map_err(|_| LinearSolverError::MemoryAllocation)?;
        let mut stack = MemStack::new(&mut mem);

        simplicial::factorize_simplicial_numeric_lu::<I, E>(
            &mut row_perm,
            &mut row_perm_inv,
            &mut lu,
            mat.rb(),
            col_perm.as_ref(),
            &mut stack,
        )
        .map_err(|_| LinearSolverError::LuFactorization)?;

        self.row_perm = Some(unsafe {
            Perm::new_unchecked(row_perm.into_boxed_slice(), row_perm_inv.into_boxed_slice())
        });
        self.lu = Some(lu);

        Ok(())
    }

    fn refactorize(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError> {
        self.factorize(mat)
    }

    /// Solves the linear system in place for the given right-hand side.
    fn solve_in_place(&self, sol: &mut MatMut<E>) -> Result<(), LinearSolverError> {
        let lu = self.lu.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        let row_perm = self
            .row_perm
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let col_perm = self
            .col_perm
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;

        let nrows = lu.nrows();
        let nrhs = sol.ncols();

        let mut mem =
            MemBuffer::new(faer::perm::permute_rows_in_place_scratch::<I, E>(nrows, nrhs));
        let stack = MemStack::new(&mut mem);

        lu.solve_in_place_with_conj(
            row_perm.as_ref(),
            col_perm.as_ref(),
            faer::Conj::No,
            sol.rb_mut(),
            faer::Par::Seq,
            stack,
        );

        Ok(())
    }

    fn solve(&self, b: MatRef<E>) -> Result<Mat<E>, LinearSolverError> {
        let mut sol = Mat::zeros(b.nrows(), b.ncols());
        sol.copy_from(b);
        self.solve_in_place(&mut sol.as_mut())?;
        Ok(sol)
    }
}

impl LinearSolver for SimplicialSparseLu {}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::SparseColMat;

    fn test_lu_solver<T: Solver>(mat: SparseColMat<I, E>, n_count: usize) {
        let mut solver = T::new();
        solver.analyze(mat.as_ref()).unwrap();
        solver.factorize(mat.as_ref()).unwrap();

        use faer::rand::rngs::StdRng;
        use faer::rand::SeedableRng;
        use faer::stats::prelude::{CwiseMatDistribution, StandardNormal};
        use faer::stats::DistributionExt;

        let rng = &mut StdRng::seed_from_u64(0);
        let n = mat.ncols();

        // Generate several random column vectors and verify the results
        for _ in 0..n_count {
            let col = CwiseMatDistribution {
                nrows: n,
                ncols: 1,
                dist: StandardNormal,
            }
            .rand(rng);

            let result = solver.solve(col.as_ref()).expect("Unable to solve");

            assert!((&col - &mat * &result).norm_l2() < 1e-10); // Check if Ax ≈ b
        }
    }

    #[test]
    fn test_simplicial_lu_tridiagonal() {
        let n = 3;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push(faer::sparse::Triplet::new(i, i, 4.0));
            if i + 1 < n {
                triplets.push(faer::sparse::Triplet::new(i, i + 1, -1.0));
                triplets.push(faer::sparse::Triplet::new(i + 1, i, -1.0));
            }
        }
        let mat = faer::sparse::SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap();

        test_lu_solver::<SimplicialSparseLu>(mat, 10);
    }

    #[test]
    fn test_simplicial_lu_indefinite() {
        // A small saddle-point system [I A^T; A 0]
        let triplets = vec![
            faer::sparse::Triplet::new(0usize, 0usize, 1.0),
            faer::sparse::Triplet::new(1, 1, 1.0),
            faer::sparse::Triplet::new(2, 0, 1.0),
            faer::sparse::Triplet::new(0, 2, 1.0),
            faer::sparse::Triplet::new(2, 1, -1.0),
            faer::sparse::Triplet::new(1, 2, -1.0),
        ];
        let mat = faer::sparse::SparseColMat::try_new_from_triplets(3, 3, &triplets).unwrap();

        test_lu_solver::<SimplicialSparseLu>(mat, 5);
    }
}
