//! Declarative optimisation of field parameters over node-based models.
//!
//! A [`Region`](fields::Region) owns nodes, meshes and fields; an
//! [`Optimization`](optimization::Optimization) describes which field
//! parameters may vary, what to minimise and how. Three methods are
//! available: quasi-Newton, least-squares quasi-Newton and a direct Newton
//! step assembled from analytic per-element derivatives.

pub mod fields;
pub mod optimization;
pub mod solvers;

pub mod matrix {
    pub use fieldopt_matrix::*;
}

pub extern crate nalgebra;
