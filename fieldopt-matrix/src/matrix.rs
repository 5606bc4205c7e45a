use itertools::izip;
use nalgebra::{DMatrix, DVector};
use std::error::Error;
use std::fmt;

/// How repeated insertions at the same (row, col) position are resolved
/// when triplet storage is converted to a canonical representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// The first inserted value wins.
    KeepFirst,
    /// The last inserted value wins.
    KeepLast,
    /// Duplicates are summed.
    Sum,
}

/// Identifies one of the supported storage representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Column-major dense storage.
    Dense,
    /// Compressed-row sparse storage with sorted, duplicate-free rows.
    CompressedRow,
    /// Unordered (row, col, value) triplets with a duplicate policy.
    Triplet(DuplicatePolicy),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    BlockOutOfBounds {
        start: (usize, usize),
        shape: (usize, usize),
        nrows: usize,
        ncols: usize,
    },
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// The named operation supports dense storage only.
    DenseRequired(&'static str),
    SquareRequired {
        nrows: usize,
        ncols: usize,
    },
    Singular,
    NotFactorized,
    FactorDimensionMismatch {
        factor_dimension: usize,
        system_dimension: usize,
    },
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MatrixError::IndexOutOfBounds {
                row,
                col,
                nrows,
                ncols,
            } => write!(
                f,
                "entry ({}, {}) is out of bounds for a {} x {} matrix",
                row, col, nrows, ncols
            ),
            MatrixError::BlockOutOfBounds {
                start,
                shape,
                nrows,
                ncols,
            } => write!(
                f,
                "block of shape {} x {} at ({}, {}) exceeds a {} x {} matrix",
                shape.0, shape.1, start.0, start.1, nrows, ncols
            ),
            MatrixError::ShapeMismatch { expected, found } => write!(
                f,
                "expected matrix of shape {} x {}, found {} x {}",
                expected.0, expected.1, found.0, found.1
            ),
            MatrixError::DenseRequired(op) => {
                write!(f, "operation '{}' requires dense storage", op)
            }
            MatrixError::SquareRequired { nrows, ncols } => {
                write!(f, "expected a square matrix, found {} x {}", nrows, ncols)
            }
            MatrixError::Singular => write!(f, "system is singular"),
            MatrixError::NotFactorized => write!(f, "factorisation has not been computed"),
            MatrixError::FactorDimensionMismatch {
                factor_dimension,
                system_dimension,
            } => write!(
                f,
                "factorisation of dimension {} cannot solve a system of dimension {}",
                factor_dimension, system_dimension
            ),
        }
    }
}

impl Error for MatrixError {}

#[derive(Debug, Clone)]
enum Storage {
    Dense(DMatrix<f64>),
    CompressedRow {
        row_offsets: Vec<usize>,
        column_indices: Vec<usize>,
        values: Vec<f64>,
    },
    Triplet {
        policy: DuplicatePolicy,
        rows: Vec<usize>,
        cols: Vec<usize>,
        values: Vec<f64>,
    },
}

/// A real matrix with interchangeable storage representations.
///
/// All representations share one element-level interface; conversions between
/// any two representations are supported through [`Matrix::convert`]. Dense
/// storage is column-major. Compressed-row storage keeps each row sorted by
/// column with no duplicates; element lookup is a bisection search within the
/// row. Triplet storage records insertions verbatim and resolves duplicates
/// through its [`DuplicatePolicy`] when read or converted.
#[derive(Debug, Clone)]
pub struct Matrix {
    nrows: usize,
    ncols: usize,
    storage: Storage,
}

impl Matrix {
    /// Creates a zero-filled dense matrix.
    pub fn dense(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            storage: Storage::Dense(DMatrix::zeros(nrows, ncols)),
        }
    }

    /// Creates an empty compressed-row matrix.
    pub fn compressed_row(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            storage: Storage::CompressedRow {
                row_offsets: vec![0; nrows + 1],
                column_indices: Vec::new(),
                values: Vec::new(),
            },
        }
    }

    /// Creates an empty triplet matrix with the given duplicate policy.
    pub fn triplet(nrows: usize, ncols: usize, policy: DuplicatePolicy) -> Self {
        Self {
            nrows,
            ncols,
            storage: Storage::Triplet {
                policy,
                rows: Vec::new(),
                cols: Vec::new(),
                values: Vec::new(),
            },
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn representation(&self) -> Representation {
        match &self.storage {
            Storage::Dense(_) => Representation::Dense,
            Storage::CompressedRow { .. } => Representation::CompressedRow,
            Storage::Triplet { policy, .. } => Representation::Triplet(*policy),
        }
    }

    /// Number of explicitly stored entries. For dense storage this counts the
    /// nonzero entries; for triplet storage duplicates are counted verbatim.
    pub fn nnz(&self) -> usize {
        match &self.storage {
            Storage::Dense(m) => m.iter().filter(|v| **v != 0.0).count(),
            Storage::CompressedRow { values, .. } | Storage::Triplet { values, .. } => values.len(),
        }
    }

    /// Borrows the dense backing matrix, if this matrix is dense.
    pub fn as_dense(&self) -> Option<&DMatrix<f64>> {
        match &self.storage {
            Storage::Dense(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_dense_mut(&mut self) -> Option<&mut DMatrix<f64>> {
        match &mut self.storage {
            Storage::Dense(m) => Some(m),
            _ => None,
        }
    }

    /// Resolves this matrix into a freshly allocated dense matrix.
    pub fn to_dense(&self) -> DMatrix<f64> {
        match &self.storage {
            Storage::Dense(m) => m.clone(),
            _ => {
                let (row_offsets, column_indices, values) = self.to_csr_parts();
                let mut out = DMatrix::zeros(self.nrows, self.ncols);
                for row in 0..self.nrows {
                    for k in row_offsets[row]..row_offsets[row + 1] {
                        out[(row, column_indices[k])] = values[k];
                    }
                }
                out
            }
        }
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<(), MatrixError> {
        if row >= self.nrows || col >= self.ncols {
            Err(MatrixError::IndexOutOfBounds {
                row,
                col,
                nrows: self.nrows,
                ncols: self.ncols,
            })
        } else {
            Ok(())
        }
    }

    /// Reads one entry. Absent sparse entries read as zero; triplet duplicates
    /// are resolved through the matrix's policy.
    pub fn get(&self, row: usize, col: usize) -> Result<f64, MatrixError> {
        self.check_bounds(row, col)?;
        let value = match &self.storage {
            Storage::Dense(m) => m[(row, col)],
            Storage::CompressedRow {
                row_offsets,
                column_indices,
                values,
            } => {
                let begin = row_offsets[row];
                let end = row_offsets[row + 1];
                match column_indices[begin..end].binary_search(&col) {
                    Ok(k) => values[begin + k],
                    Err(_) => 0.0,
                }
            }
            Storage::Triplet {
                policy,
                rows,
                cols,
                values,
            } => {
                let mut value = 0.0;
                let mut seen = false;
                for (&r, &c, &v) in izip!(rows, cols, values) {
                    if r == row && c == col {
                        match policy {
                            DuplicatePolicy::KeepFirst => {
                                if !seen {
                                    value = v;
                                }
                            }
                            DuplicatePolicy::KeepLast => value = v,
                            DuplicatePolicy::Sum => value += v,
                        }
                        seen = true;
                    }
                }
                value
            }
        };
        Ok(value)
    }

    /// Writes one entry. Compressed-row storage inserts absent entries in
    /// place; triplet storage records the insertion, to be resolved by the
    /// duplicate policy (with `KeepFirst`, a later `set` does not change the
    /// resolved value of an already-populated position).
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), MatrixError> {
        self.check_bounds(row, col)?;
        match &mut self.storage {
            Storage::Dense(m) => m[(row, col)] = value,
            Storage::CompressedRow {
                row_offsets,
                column_indices,
                values,
            } => {
                let begin = row_offsets[row];
                let end = row_offsets[row + 1];
                match column_indices[begin..end].binary_search(&col) {
                    Ok(k) => values[begin + k] = value,
                    Err(k) => {
                        column_indices.insert(begin + k, col);
                        values.insert(begin + k, value);
                        for offset in &mut row_offsets[row + 1..] {
                            *offset += 1;
                        }
                    }
                }
            }
            Storage::Triplet {
                rows, cols, values, ..
            } => {
                rows.push(row);
                cols.push(col);
                values.push(value);
            }
        }
        Ok(())
    }

    /// Adds `increment` to one entry. For triplet storage this records one
    /// more insertion, so the increment only accumulates under the `Sum`
    /// policy.
    pub fn add(&mut self, row: usize, col: usize, increment: f64) -> Result<(), MatrixError> {
        self.check_bounds(row, col)?;
        match &mut self.storage {
            Storage::Dense(m) => m[(row, col)] += increment,
            Storage::CompressedRow {
                row_offsets,
                column_indices,
                values,
            } => {
                let begin = row_offsets[row];
                let end = row_offsets[row + 1];
                match column_indices[begin..end].binary_search(&col) {
                    Ok(k) => values[begin + k] += increment,
                    Err(k) => {
                        column_indices.insert(begin + k, col);
                        values.insert(begin + k, increment);
                        for offset in &mut row_offsets[row + 1..] {
                            *offset += 1;
                        }
                    }
                }
            }
            Storage::Triplet {
                rows, cols, values, ..
            } => {
                rows.push(row);
                cols.push(col);
                values.push(increment);
            }
        }
        Ok(())
    }

    /// Copies `block` into this matrix with its top-left corner at
    /// `(start_row, start_col)`.
    pub fn set_block(
        &mut self,
        start_row: usize,
        start_col: usize,
        block: &DMatrix<f64>,
    ) -> Result<(), MatrixError> {
        if start_row + block.nrows() > self.nrows || start_col + block.ncols() > self.ncols {
            return Err(MatrixError::BlockOutOfBounds {
                start: (start_row, start_col),
                shape: (block.nrows(), block.ncols()),
                nrows: self.nrows,
                ncols: self.ncols,
            });
        }
        if let Storage::Dense(m) = &mut self.storage {
            m.view_mut((start_row, start_col), (block.nrows(), block.ncols()))
                .copy_from(block);
        } else {
            for i in 0..block.nrows() {
                for j in 0..block.ncols() {
                    self.set(start_row + i, start_col + j, block[(i, j)])?;
                }
            }
        }
        Ok(())
    }

    /// Extracts a dense copy of the block of the given shape with its
    /// top-left corner at `(start_row, start_col)`.
    pub fn get_block(
        &self,
        start_row: usize,
        start_col: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> Result<DMatrix<f64>, MatrixError> {
        if start_row + block_rows > self.nrows || start_col + block_cols > self.ncols {
            return Err(MatrixError::BlockOutOfBounds {
                start: (start_row, start_col),
                shape: (block_rows, block_cols),
                nrows: self.nrows,
                ncols: self.ncols,
            });
        }
        if let Storage::Dense(m) = &self.storage {
            Ok(m.view((start_row, start_col), (block_rows, block_cols))
                .into_owned())
        } else {
            let mut out = DMatrix::zeros(block_rows, block_cols);
            for i in 0..block_rows {
                for j in 0..block_cols {
                    out[(i, j)] = self.get(start_row + i, start_col + j)?;
                }
            }
            Ok(out)
        }
    }

    /// Resizes the matrix, preserving entries that lie within both the old
    /// and new shapes and zero-filling the rest.
    pub fn resize(&mut self, nrows: usize, ncols: usize) {
        match &mut self.storage {
            Storage::Dense(m) => {
                let old = std::mem::replace(m, DMatrix::zeros(0, 0));
                *m = old.resize(nrows, ncols, 0.0);
            }
            Storage::CompressedRow {
                row_offsets,
                column_indices,
                values,
            } => {
                let mut new_offsets = Vec::with_capacity(nrows + 1);
                let mut new_columns = Vec::new();
                let mut new_values = Vec::new();
                new_offsets.push(0);
                for row in 0..nrows.min(self.nrows) {
                    for k in row_offsets[row]..row_offsets[row + 1] {
                        if column_indices[k] < ncols {
                            new_columns.push(column_indices[k]);
                            new_values.push(values[k]);
                        }
                    }
                    new_offsets.push(new_columns.len());
                }
                while new_offsets.len() < nrows + 1 {
                    new_offsets.push(new_columns.len());
                }
                *row_offsets = new_offsets;
                *column_indices = new_columns;
                *values = new_values;
            }
            Storage::Triplet {
                rows, cols, values, ..
            } => {
                let mut kept_rows = Vec::new();
                let mut kept_cols = Vec::new();
                let mut kept_values = Vec::new();
                for (&r, &c, &v) in izip!(rows.iter(), cols.iter(), values.iter()) {
                    if r < nrows && c < ncols {
                        kept_rows.push(r);
                        kept_cols.push(c);
                        kept_values.push(v);
                    }
                }
                *rows = kept_rows;
                *cols = kept_cols;
                *values = kept_values;
            }
        }
        self.nrows = nrows;
        self.ncols = ncols;
    }

    /// Overwrites every stored entry with `value`. For dense storage this is
    /// every entry of the matrix; for sparse storage only stored entries are
    /// touched.
    pub fn fill(&mut self, value: f64) {
        match &mut self.storage {
            Storage::Dense(m) => m.fill(value),
            Storage::CompressedRow { values, .. } | Storage::Triplet { values, .. } => {
                for v in values {
                    *v = value;
                }
            }
        }
    }

    /// Sum of absolute values of all stored entries.
    pub fn asum(&self) -> f64 {
        match &self.storage {
            Storage::Dense(m) => m.iter().map(|v| v.abs()).sum(),
            Storage::CompressedRow { values, .. } | Storage::Triplet { values, .. } => {
                values.iter().map(|v| v.abs()).sum()
            }
        }
    }

    /// Euclidean (Frobenius) norm over all stored entries.
    pub fn norm2(&self) -> f64 {
        let sum_of_squares: f64 = match &self.storage {
            Storage::Dense(m) => m.iter().map(|v| v * v).sum(),
            Storage::CompressedRow { values, .. } | Storage::Triplet { values, .. } => {
                values.iter().map(|v| v * v).sum()
            }
        };
        sum_of_squares.sqrt()
    }

    /// Elementwise dot product of two matrices of identical shape.
    pub fn dot(&self, other: &Matrix) -> Result<f64, MatrixError> {
        if self.nrows != other.nrows || self.ncols != other.ncols {
            return Err(MatrixError::ShapeMismatch {
                expected: (self.nrows, self.ncols),
                found: (other.nrows, other.ncols),
            });
        }
        if let (Storage::Dense(a), Storage::Dense(b)) = (&self.storage, &other.storage) {
            return Ok(a.dot(b));
        }
        let mut sum = 0.0;
        for (row, col, value) in self.resolved_entries() {
            sum += value * other.get(row, col)?;
        }
        Ok(sum)
    }

    /// `self += alpha * x`, elementwise over `x`'s resolved entries.
    pub fn axpy(&mut self, alpha: f64, x: &Matrix) -> Result<(), MatrixError> {
        if self.nrows != x.nrows || self.ncols != x.ncols {
            return Err(MatrixError::ShapeMismatch {
                expected: (self.nrows, self.ncols),
                found: (x.nrows, x.ncols),
            });
        }
        if let Storage::Dense(y) = &mut self.storage {
            if let Storage::Dense(xd) = &x.storage {
                // nalgebra only provides `axpy` for vectors; this is the same
                // `y = alpha * x + 1.0 * y` update over a dense matrix.
                y.zip_apply(xd, |yi, xi| *yi = alpha * xi + *yi);
                return Ok(());
            }
        }
        for (row, col, value) in x.resolved_entries() {
            self.add(row, col, alpha * value)?;
        }
        Ok(())
    }

    /// `y = alpha * self * x + beta * y`. Requires dense storage.
    pub fn gemv(
        &self,
        y: &mut DVector<f64>,
        alpha: f64,
        x: &DVector<f64>,
        beta: f64,
    ) -> Result<(), MatrixError> {
        let a = self
            .as_dense()
            .ok_or(MatrixError::DenseRequired("gemv"))?;
        if x.len() != self.ncols || y.len() != self.nrows {
            return Err(MatrixError::ShapeMismatch {
                expected: (self.nrows, self.ncols),
                found: (y.len(), x.len()),
            });
        }
        y.gemv(alpha, a, x, beta);
        Ok(())
    }

    /// `self = alpha * a * b + beta * self`. Requires dense storage for all
    /// three matrices.
    pub fn gemm(
        &mut self,
        alpha: f64,
        a: &Matrix,
        b: &Matrix,
        beta: f64,
    ) -> Result<(), MatrixError> {
        if a.ncols != b.nrows || self.nrows != a.nrows || self.ncols != b.ncols {
            return Err(MatrixError::ShapeMismatch {
                expected: (a.nrows, b.ncols),
                found: (self.nrows, self.ncols),
            });
        }
        let a_dense = a.as_dense().ok_or(MatrixError::DenseRequired("gemm"))?;
        let b_dense = b.as_dense().ok_or(MatrixError::DenseRequired("gemm"))?;
        let c_dense = self
            .as_dense_mut()
            .ok_or(MatrixError::DenseRequired("gemm"))?;
        c_dense.gemm(alpha, a_dense, b_dense, beta);
        Ok(())
    }

    /// Converts the matrix to the target representation in place.
    ///
    /// Conversions out of dense storage drop explicit zeros; conversions out
    /// of triplet storage resolve duplicates through the triplet policy.
    /// Converting to the current representation is a no-op.
    pub fn convert(&mut self, target: Representation) {
        if self.representation() == target {
            return;
        }
        let (row_offsets, column_indices, values) = self.to_csr_parts();
        self.storage = match target {
            Representation::Dense => {
                let mut out = DMatrix::zeros(self.nrows, self.ncols);
                for row in 0..self.nrows {
                    for k in row_offsets[row]..row_offsets[row + 1] {
                        out[(row, column_indices[k])] = values[k];
                    }
                }
                Storage::Dense(out)
            }
            Representation::CompressedRow => Storage::CompressedRow {
                row_offsets,
                column_indices,
                values,
            },
            Representation::Triplet(policy) => {
                let mut rows = Vec::with_capacity(values.len());
                for row in 0..self.nrows {
                    for _ in row_offsets[row]..row_offsets[row + 1] {
                        rows.push(row);
                    }
                }
                Storage::Triplet {
                    policy,
                    rows,
                    cols: column_indices,
                    values,
                }
            }
        };
    }

    /// Canonical compressed-row form of the current contents: rows sorted by
    /// column, duplicates resolved, explicit zeros dropped only for dense
    /// sources.
    fn to_csr_parts(&self) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        match &self.storage {
            Storage::Dense(m) => {
                let mut row_offsets = Vec::with_capacity(self.nrows + 1);
                let mut column_indices = Vec::new();
                let mut values = Vec::new();
                row_offsets.push(0);
                for row in 0..self.nrows {
                    for col in 0..self.ncols {
                        let v = m[(row, col)];
                        if v != 0.0 {
                            column_indices.push(col);
                            values.push(v);
                        }
                    }
                    row_offsets.push(column_indices.len());
                }
                (row_offsets, column_indices, values)
            }
            Storage::CompressedRow {
                row_offsets,
                column_indices,
                values,
            } => (row_offsets.clone(), column_indices.clone(), values.clone()),
            Storage::Triplet {
                policy,
                rows,
                cols,
                values,
            } => triplets_to_csr(self.nrows, rows, cols, values, *policy),
        }
    }

    /// Duplicate-free (row, col, value) entries in row-major order.
    fn resolved_entries(&self) -> Vec<(usize, usize, f64)> {
        match &self.storage {
            Storage::Dense(m) => {
                let mut entries = Vec::new();
                for row in 0..self.nrows {
                    for col in 0..self.ncols {
                        let v = m[(row, col)];
                        if v != 0.0 {
                            entries.push((row, col, v));
                        }
                    }
                }
                entries
            }
            _ => {
                let (row_offsets, column_indices, values) = self.to_csr_parts();
                let mut entries = Vec::with_capacity(values.len());
                for row in 0..self.nrows {
                    for k in row_offsets[row]..row_offsets[row + 1] {
                        entries.push((row, column_indices[k], values[k]));
                    }
                }
                entries
            }
        }
    }
}

impl From<DMatrix<f64>> for Matrix {
    fn from(m: DMatrix<f64>) -> Self {
        Self {
            nrows: m.nrows(),
            ncols: m.ncols(),
            storage: Storage::Dense(m),
        }
    }
}

/// Builds compressed-row arrays from triplets: counting sort by row keeping
/// insertion order, then a per-row sort by column which breaks ties on
/// insertion order so the duplicate policy sees insertions in their original
/// sequence.
fn triplets_to_csr(
    nrows: usize,
    rows: &[usize],
    cols: &[usize],
    values: &[f64],
    policy: DuplicatePolicy,
) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let nnz = values.len();
    let mut offsets = vec![0usize; nrows + 1];
    for &r in rows {
        offsets[r + 1] += 1;
    }
    for i in 0..nrows {
        offsets[i + 1] += offsets[i];
    }

    let mut row_cols = vec![0usize; nnz];
    let mut row_values = vec![0.0f64; nnz];
    let mut cursor = offsets.clone();
    for (&r, &c, &v) in izip!(rows, cols, values) {
        row_cols[cursor[r]] = c;
        row_values[cursor[r]] = v;
        cursor[r] += 1;
    }

    let mut out_offsets = Vec::with_capacity(nrows + 1);
    let mut out_cols = Vec::with_capacity(nnz);
    let mut out_values = Vec::with_capacity(nnz);
    out_offsets.push(0);
    let mut permutation = Vec::new();
    for row in 0..nrows {
        let begin = offsets[row];
        let end = offsets[row + 1];
        permutation.clear();
        permutation.extend(0..end - begin);
        permutation.sort_unstable_by_key(|&k| (row_cols[begin + k], k));

        let mut i = 0;
        while i < permutation.len() {
            let col = row_cols[begin + permutation[i]];
            let mut j = i + 1;
            while j < permutation.len() && row_cols[begin + permutation[j]] == col {
                j += 1;
            }
            let value = match policy {
                DuplicatePolicy::KeepFirst => row_values[begin + permutation[i]],
                DuplicatePolicy::KeepLast => row_values[begin + permutation[j - 1]],
                DuplicatePolicy::Sum => permutation[i..j]
                    .iter()
                    .map(|&k| row_values[begin + k])
                    .sum(),
            };
            out_cols.push(col);
            out_values.push(value);
            i = j;
        }
        out_offsets.push(out_cols.len());
    }
    (out_offsets, out_cols, out_values)
}
