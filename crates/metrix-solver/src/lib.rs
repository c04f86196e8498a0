//! # metrix-solver: LP/MIP driver
//!
//! Thin adaptor between the constraint generator and the external LP/MIP
//! solver. The problem is described backend-agnostically ([`Problem`]:
//! columns with bounds/cost/integrality, rows as sparse coefficient lists)
//! and handed to HiGHS through the `good_lp` abstraction.
//!
//! The driver owns no state between calls: the solver-side model is built
//! inside [`driver::solve`] and dropped before it returns, so every call
//! starts and ends with all solver memory released.

pub mod driver;
pub mod problem;
pub mod solution;

pub use driver::{solve, SolverError};
pub use problem::{Column, Problem, Row, RowSense};
pub use solution::{Outcome, SolveStatus};
