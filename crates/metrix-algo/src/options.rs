//! Computation options.
//!
//! Everything the configuration file may tune about the solve itself.
//! Defaults reproduce the production tool's documented behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the run computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputationMode {
    /// Dispatch is taken as-is, no cuts; flows and violations are reported
    LoadFlow,
    /// Full preventive/curative optimization
    Opf,
    /// OPF where residual overloads are allowed through costed slacks
    OpfWithOverload,
    /// Dispatch frozen; only curative actions and topology may act
    OpfWithoutRedispatch,
}

impl ComputationMode {
    pub fn with_cuts(&self) -> bool {
        !matches!(self, ComputationMode::LoadFlow)
    }

    pub fn with_slacks(&self) -> bool {
        matches!(
            self,
            ComputationMode::OpfWithOverload | ComputationMode::OpfWithoutRedispatch
        )
    }

    pub fn redispatch_allowed(&self) -> bool {
        !matches!(self, ComputationMode::OpfWithoutRedispatch)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOptions {
    pub mode: ComputationMode,

    /// Cap on micro-iterations (solve → θ → screen → cut) per pass
    pub max_micro_iterations: usize,
    /// Cap on total cuts per variant
    pub max_constraints: usize,
    /// Cap on cuts added per micro-iteration
    pub max_constraints_per_iteration: usize,

    /// Loss re-estimation: maximum reruns and the MW deviation that
    /// triggers one
    pub max_loss_iterations: usize,
    pub loss_threshold_mw: f64,
    /// Assumed loss rate at the first pass (fraction of load, e.g. 0.02)
    pub initial_loss_rate: f64,
    /// Reference voltage for the quadratic branch-loss estimate (kV)
    pub nominal_voltage_kv: f64,

    /// Wall-clock budget for the whole variant (solver time included)
    pub time_limit: Option<Duration>,

    /// Cost per MW of overload slack in [`ComputationMode::OpfWithOverload`]
    pub overload_cost: f64,
    /// Floor applied to objective coefficients so zero-cost actions still
    /// order deterministically
    pub noise_cost: f64,

    /// Topological remedial actions enabled
    pub parades_enabled: bool,
    /// Drop parade cuts equivalent to a sibling's and reuse its activation
    pub equivalent_parade_detection: bool,
    /// Apply before-curative (ITAM) thresholds
    pub use_itam: bool,

    /// Threat-ranking depth per monitored element
    pub max_threats: usize,

    /// Optional cap on curative downward redispatch per zone (MW)
    pub curative_redispatch_cap_mw: Option<f64>,
    /// Optional cap on the number of curative actions a parade may use
    pub max_curative_actions_per_parade: Option<usize>,

    /// The reduced-problem solver path is not operational; it stays
    /// disabled unless explicitly requested
    pub disable_reduced_problem_solver: bool,

    /// Transit re-verification level after solve (0 = none, 1 = cuts,
    /// 2 = everything)
    pub check_constraints_level: u8,
}

impl Default for ComputationOptions {
    fn default() -> Self {
        Self {
            mode: ComputationMode::Opf,
            max_micro_iterations: 20,
            max_constraints: crate::constants::NB_MAX_CONSTRAINTS,
            max_constraints_per_iteration: crate::constants::NB_MAX_CONSTRAINTS_BY_ITERATION,
            max_loss_iterations: 5,
            loss_threshold_mw: 5.0,
            initial_loss_rate: 0.0,
            nominal_voltage_kv: 400.0,
            time_limit: None,
            overload_cost: 10.0,
            noise_cost: 0.5,
            parades_enabled: true,
            equivalent_parade_detection: true,
            use_itam: false,
            max_threats: 5,
            curative_redispatch_cap_mw: None,
            max_curative_actions_per_parade: None,
            disable_reduced_problem_solver: true,
            check_constraints_level: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_predicates() {
        assert!(!ComputationMode::LoadFlow.with_cuts());
        assert!(ComputationMode::Opf.with_cuts());
        assert!(ComputationMode::OpfWithOverload.with_slacks());
        assert!(!ComputationMode::Opf.with_slacks());
        assert!(!ComputationMode::OpfWithoutRedispatch.redispatch_allowed());
    }

    #[test]
    fn test_defaults_match_engine_constants() {
        let opts = ComputationOptions::default();
        assert_eq!(opts.max_constraints, 5000);
        assert_eq!(opts.max_constraints_per_iteration, 200);
        assert!(opts.disable_reduced_problem_solver);
    }
}
