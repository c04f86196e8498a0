//! Sparse B′ assembly and LU factorization.
//!
//! - [`susceptance`]: the reduced nodal susceptance matrix, one reference
//!   phase eliminated per synchronous zone
//! - [`lu`]: LU factorization with partial pivoting and a minimum-pivot
//!   guard, shared by the B′ solves, the small rank-k outage systems and
//!   the margin-variation basis

pub mod lu;
pub mod susceptance;

pub use lu::{DenseLu, LuError};
pub use susceptance::{SusceptanceError, SusceptanceMatrix};
