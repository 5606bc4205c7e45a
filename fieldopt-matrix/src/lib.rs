//! Matrix storage and factorisation for the optimisation engine.
//!
//! The [`Matrix`] type supports dense, compressed-row and triplet storage with
//! conversions between all of them; [`Factor`] holds a reusable LU
//! factorisation of a square dense matrix.

/// Reusable LU factorisation and solves
pub mod factor;
/// Dense, compressed-row and triplet matrix storage with conversions
pub mod matrix;

pub use factor::Factor;
pub use matrix::{DuplicatePolicy, Matrix, MatrixError, Representation};
