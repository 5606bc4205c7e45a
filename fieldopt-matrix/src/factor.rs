use nalgebra::linalg::LU;
use nalgebra::{DVector, Dyn};

use crate::matrix::{Matrix, MatrixError};

/// A reusable LU factorisation of a square dense matrix.
///
/// The factorisation is tied to the exact dimension of the matrix it was
/// computed from; solving with a right-hand side of any other dimension is a
/// hard failure. Factorising again replaces the previously held
/// factorisation, so one `Factor` can serve a sequence of systems.
#[derive(Debug, Default)]
pub struct Factor {
    lu: Option<LU<f64, Dyn, Dyn>>,
    dimension: usize,
}

impl Factor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the LU factorisation of `matrix` with partial pivoting.
    ///
    /// The matrix must be square and dense. An exactly zero pivot marks the
    /// system as singular; the error is [`MatrixError::Singular`] and any
    /// previously held factorisation is cleared.
    pub fn factorize(&mut self, matrix: &Matrix) -> Result<(), MatrixError> {
        let dense = matrix
            .as_dense()
            .ok_or(MatrixError::DenseRequired("factorize"))?;
        if matrix.nrows() != matrix.ncols() {
            return Err(MatrixError::SquareRequired {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
            });
        }
        let lu = LU::new(dense.clone());
        if !lu.is_invertible() {
            self.lu = None;
            self.dimension = 0;
            return Err(MatrixError::Singular);
        }
        self.dimension = matrix.nrows();
        self.lu = Some(lu);
        Ok(())
    }

    pub fn is_factorized(&self) -> bool {
        self.lu.is_some()
    }

    /// Dimension of the factorised system, zero if none is held.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Solves `A x = b` for a single right-hand side vector.
    pub fn solve_vector(&self, b: &DVector<f64>) -> Result<DVector<f64>, MatrixError> {
        let lu = self.lu.as_ref().ok_or(MatrixError::NotFactorized)?;
        if b.len() != self.dimension {
            return Err(MatrixError::FactorDimensionMismatch {
                factor_dimension: self.dimension,
                system_dimension: b.len(),
            });
        }
        lu.solve(b).ok_or(MatrixError::Singular)
    }

    /// Solves `A X = B` for every column of a dense right-hand side matrix.
    pub fn solve(&self, b: &Matrix) -> Result<Matrix, MatrixError> {
        let lu = self.lu.as_ref().ok_or(MatrixError::NotFactorized)?;
        let rhs = b.as_dense().ok_or(MatrixError::DenseRequired("solve"))?;
        if b.nrows() != self.dimension {
            return Err(MatrixError::FactorDimensionMismatch {
                factor_dimension: self.dimension,
                system_dimension: b.nrows(),
            });
        }
        let x = lu.solve(rhs).ok_or(MatrixError::Singular)?;
        Ok(Matrix::from(x))
    }
}
