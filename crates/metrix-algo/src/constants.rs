//! Numeric constants of the engine.
//!
//! The tunable ones are surfaced through
//! [`crate::options::ComputationOptions`]; the rest are fixed here and
//! chosen to keep results stable across runs and platforms.

/// Transit-cut detection margin (MW). Subtracted from cut RHS so the same
/// constraint is not re-detected on the next screening.
pub const ACCEPTABLE_DIFF: f64 = 1e-2;

/// Below this |denominator| in the LODF computation, the contingency is
/// declared connectivity-breaking.
pub const THRESHOLD_NOT_CONNEX: f64 = 1e-9;

/// Cut coefficients below this magnitude are dropped.
pub const EPSILON_CUT_COEFF: f64 = 1e-8;

/// Cut RHS values are snapped to this precision to stabilize numerics.
pub const CONSTRAINTS_PRECISION: f64 = 1e10;

/// Big-M multiplier attached to a binary that deactivates a constraint.
pub const FACTOR_INACTIVE_CONSTRAINT: f64 = 1e4;

/// Two parade cuts whose coefficients and RHS agree within this tolerance
/// are considered equivalent.
pub const EPSILON_CONSTRAINT_EQ: f64 = 1e-7;

/// Scale applied to curative-bound rows to keep coefficient magnitudes
/// comparable to the transit cuts.
pub const CURATIVE_ROW_SCALE: f64 = 1e-3;

/// Objective penalty per parade activation, scaled by incident probability.
pub const COST_PARADE: f64 = 1e-2;

/// Maximum cuts added over the whole variant.
pub const NB_MAX_CONSTRAINTS: usize = 5000;

/// Maximum cuts added per micro-iteration (parades included).
pub const NB_MAX_CONSTRAINTS_BY_ITERATION: usize = 200;

/// Zonal balance must close within this tolerance (MW).
pub const EPSILON_BILAN: f64 = 1.0;

/// Lost power below this threshold is treated as zero (MW).
pub const ZERO_POWER: f64 = 1e-3;

/// Floating comparisons looser than machine epsilon, to avoid spawning
/// constraints on noise.
pub const EPSILON: f64 = 1e-3;

/// Violation dedup: relative tolerance on (transit, threshold) pairs.
pub const DEDUP_RELATIVE: f64 = 0.01;

/// Violation dedup: absolute tolerance (MW).
pub const DEDUP_ABSOLUTE_MW: f64 = 1.0;

/// Minimum pivot accepted by the B′ LU factorization.
pub const LU_MIN_PIVOT: f64 = 1e-5;

/// Fallback pivot floor when the standard one rejects the matrix.
pub const LU_MIN_PIVOT_EXTREME: f64 = 1e-6;

/// Marginal variations below this are not reported.
pub const DISPLAY_MARGIN_VARIATION_THRESHOLD: f64 = 5e-6;

/// Basis detection: a variable is at a bound within this tolerance.
pub const BASIS_BOUND_TOLERANCE: f64 = 1e-6;

/// MIP activation values ≥ this count as "active".
pub const ACTIVATION_THRESHOLD: f64 = 0.5;
