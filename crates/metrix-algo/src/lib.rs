//! # metrix-algo: the SCOPF engine
//!
//! Security-constrained optimal power flow over a DC network model, solved
//! by constraint generation: the redispatch LP/MIP starts without any grid
//! constraint, and violated (monitored element × contingency) transits are
//! lazily turned into cuts until the screening pass comes back clean.
//!
//! ## Pipeline
//!
//! ```text
//! Network + Variant ──► SensitivityEngine (B′ factorization, PTDF/LODF)
//!                              │
//!                              ▼
//!       LpBuilder (variables, bilans, couplings) ──► metrix-solver
//!                              │                         │
//!                              ▼                         ▼
//!            Screener (transits vs thresholds) ◄── nodal phases θ
//!                              │
//!                   violated? ─┼─ yes ► cuts / parade activation ► re-solve
//!                              └─ no  ► losses re-estimated, results
//! ```
//!
//! Module map:
//! - [`sparse`]: B′ assembly and LU factorization
//! - [`sensitivity`]: PTDF, LODF (rank-k Woodbury), influence vectors,
//!   lost pockets
//! - [`lp`]: incremental LP/MIP construction (variables, bilans, cuts,
//!   curative and parade machinery)
//! - [`screen`]: violation screening, ranking and deduplication
//! - [`scopf`]: the per-variant outer loop with loss re-estimation
//! - [`margins`]: post-optimal marginal-variation decomposition
//! - [`report`]: per-variant result records consumed by the writers

pub mod constants;
pub mod lp;
pub mod margins;
pub mod options;
pub mod report;
pub mod scopf;
pub mod screen;
pub mod sensitivity;
pub mod sparse;

pub use options::{ComputationMode, ComputationOptions};
pub use report::VariantReport;
pub use scopf::{ScopfSolver, VariantStatus};
pub use screen::{Violation, ViolationKind};
pub use sensitivity::SensitivityEngine;
