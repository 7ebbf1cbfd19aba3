//! Sparse vector primitives and iterator merges.
//!
//! Matrices are stored in CSC form via [`faer::sparse::SparseColMat`];
//! vectors that cross the function-callback boundary use [`SparseVec`],
//! a sorted index/value representation supporting the usual dot products,
//! norms, and merged iteration over aligned entries.

use faer::sparse::SparseColMatRef;
use faer::{Col, ColRef};

use crate::{E, I};

/// A sparse vector with sorted, unique indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVec {
    dim: I,
    indices: Vec<I>,
    data: Vec<E>,
}

impl SparseVec {
    pub fn empty(dim: I) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Creates a sparse vector from a dense slice, dropping entries with
    /// magnitude at most `zero_eps`.
    pub fn from_raw(values: &[E], zero_eps: E) -> Self {
        let mut vec = Self::empty(values.len());

        for (i, &value) in values.iter().enumerate() {
            if value.abs() > zero_eps {
                vec.indices.push(i);
                vec.data.push(value);
            }
        }

        vec
    }

    pub fn from_col(col: ColRef<'_, E>, zero_eps: E) -> Self {
        let mut vec = Self::empty(col.nrows());

        for i in 0..col.nrows() {
            if col[i].abs() > zero_eps {
                vec.indices.push(i);
                vec.data.push(col[i]);
            }
        }

        vec
    }

    pub fn dim(&self) -> I {
        self.dim
    }

    pub fn nnz(&self) -> I {
        self.indices.len()
    }

    /// Appends an entry; the index must exceed all previous indices.
    pub fn push(&mut self, index: I, value: E) {
        debug_assert!(index < self.dim);
        debug_assert!(self.indices.last().is_none_or(|&last| last < index));

        self.indices.push(index);
        self.data.push(value);
    }

    pub fn value_at(&self, index: I) -> E {
        match self.indices.binary_search(&index) {
            Ok(k) => self.data[k],
            Err(_) => 0.,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, E)> + '_ {
        self.indices.iter().copied().zip(self.data.iter().copied())
    }

    pub fn to_col(&self) -> Col<E> {
        let mut col = Col::zeros(self.dim);

        for (i, value) in self.iter() {
            col[i] = value;
        }

        col
    }

    pub fn scale(&mut self, factor: E) {
        for value in &mut self.data {
            *value *= factor;
        }
    }

    pub fn dot(&self, other: &SparseVec) -> E {
        debug_assert_eq!(self.dim, other.dim);

        let mut product = 0.;

        merge2(self, other, |_, x, y| product += x * y);

        product
    }

    pub fn norm(&self) -> E {
        self.data.iter().map(|v| v * v).sum::<E>().sqrt()
    }

    pub fn inf_norm(&self) -> E {
        self.data.iter().fold(0., |acc, v| acc.max(v.abs()))
    }

    pub fn eq_within(&self, other: &SparseVec, eps: E) -> bool {
        if self.dim != other.dim {
            return false;
        }

        let mut equal = true;

        merge2(self, other, |_, x, y| {
            if (x - y).abs() > eps {
                equal = false;
            }
        });

        equal
    }
}

/// Visits the union of the nonzero index sets of two sparse vectors in
/// ascending index order, passing aligned values (zero where absent).
pub fn merge2(a: &SparseVec, b: &SparseVec, mut visit: impl FnMut(I, E, E)) {
    let mut k_a = 0;
    let mut k_b = 0;

    while k_a < a.indices.len() || k_b < b.indices.len() {
        let i_a = a.indices.get(k_a).copied().unwrap_or(a.dim + 1);
        let i_b = b.indices.get(k_b).copied().unwrap_or(b.dim + 1);

        let i = i_a.min(i_b);

        let mut val_a = 0.;
        let mut val_b = 0.;

        if i_a == i {
            val_a = a.data[k_a];
            k_a += 1;
        }

        if i_b == i {
            val_b = b.data[k_b];
            k_b += 1;
        }

        visit(i, val_a, val_b);
    }
}

/// Computes the matrix-vector product `A * x` for a CSC matrix.
pub fn mat_vec(mat: SparseColMatRef<'_, I, E>, x: ColRef<'_, E>) -> Col<E> {
    let mut out = Col::zeros(mat.nrows());

    let symbolic = mat.symbolic();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    let values = mat.val();

    for j in 0..mat.ncols() {
        let x_j = x[j];

        if x_j == 0. {
            continue;
        }

        for k in col_ptr[j]..col_ptr[j + 1] {
            out[row_idx[k]] += values[k] * x_j;
        }
    }

    out
}

/// Computes the transposed product `A^T * y` for a CSC matrix.
pub fn mat_t_vec(mat: SparseColMatRef<'_, I, E>, y: ColRef<'_, E>) -> Col<E> {
    let mut out = Col::zeros(mat.ncols());

    let symbolic = mat.symbolic();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    let values = mat.val();

    for j in 0..mat.ncols() {
        let mut acc = 0.;

        for k in col_ptr[j]..col_ptr[j + 1] {
            acc += values[k] * y[row_idx[k]];
        }

        out[j] = acc;
    }

    out
}

/// Extracts row `i` of a CSC matrix as `(column, value)` pairs.
pub fn mat_row(mat: SparseColMatRef<'_, I, E>, row: I) -> Vec<(I, E)> {
    let symbolic = mat.symbolic();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    let values = mat.val();

    let mut entries = Vec::new();

    for j in 0..mat.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            if row_idx[k] == row {
                entries.push((j, values[k]));
            }
        }
    }

    entries
}
