//! Solver outcome types.

use serde::{Deserialize, Serialize};

/// Terminal status of one solve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Proven optimal
    Optimal,
    /// A feasible point was returned without an optimality proof
    /// (time or iteration capped)
    Feasible,
    Infeasible,
    Unbounded,
    /// Backend error (memory, license, internal failure)
    Error,
}

impl SolveStatus {
    pub fn has_solution(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

/// Result of one solve: status, primal point and objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: SolveStatus,
    /// Primal value per column, aligned with `Problem::columns`
    pub values: Vec<f64>,
    pub objective: f64,
}

impl Outcome {
    pub fn infeasible() -> Self {
        Self {
            status: SolveStatus::Infeasible,
            values: Vec::new(),
            objective: 0.0,
        }
    }
}
