//! Monitored elements and their seasonal thresholds.
//!
//! A monitored element is either a single branch or a weighted watched
//! section (linear combination of branch and HVDC flows). Thresholds exist
//! per regime (N, N-1, N-k, before-curative and its N-k variant), each with
//! an optional asymmetric extremity→origin value for flows in the reverse
//! direction.

use serde::{Deserialize, Serialize};

use crate::{BranchId, HvdcId, MonitorId};

/// Threshold table slot, used by variant edits and by the screener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdKind {
    N,
    NExOr,
    NMinusOne,
    NMinusOneExOr,
    NMinusK,
    NMinusKExOr,
    BeforeCurative,
    BeforeCurativeExOr,
    BeforeCurativeK,
    BeforeCurativeKExOr,
}

/// A limit that may differ by flow direction. Values are stored positive;
/// `None` means unmonitored in that regime.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DirectionalLimit {
    /// Limit on flows from origin to extremity (positive transit)
    pub or_to_ex: Option<f64>,
    /// Limit on flows from extremity to origin (negative transit)
    pub ex_to_or: Option<f64>,
}

impl DirectionalLimit {
    pub fn symmetric(limit: f64) -> Self {
        Self {
            or_to_ex: Some(limit),
            ex_to_or: None,
        }
    }

    /// Limit applicable to a transit of the given sign. Falls back to the
    /// origin→extremity value when no asymmetric value is defined.
    pub fn for_transit(&self, transit_mw: f64) -> Option<f64> {
        if transit_mw < 0.0 {
            self.ex_to_or.or(self.or_to_ex)
        } else {
            self.or_to_ex
        }
    }
}

/// Per-regime thresholds of a monitored element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    pub n: DirectionalLimit,
    pub n_minus_one: DirectionalLimit,
    pub n_minus_k: DirectionalLimit,
    pub before_curative: DirectionalLimit,
    pub before_curative_k: DirectionalLimit,
}

impl Thresholds {
    pub fn get(&self, kind: ThresholdKind) -> Option<f64> {
        match kind {
            ThresholdKind::N => self.n.or_to_ex,
            ThresholdKind::NExOr => self.n.ex_to_or,
            ThresholdKind::NMinusOne => self.n_minus_one.or_to_ex,
            ThresholdKind::NMinusOneExOr => self.n_minus_one.ex_to_or,
            ThresholdKind::NMinusK => self.n_minus_k.or_to_ex,
            ThresholdKind::NMinusKExOr => self.n_minus_k.ex_to_or,
            ThresholdKind::BeforeCurative => self.before_curative.or_to_ex,
            ThresholdKind::BeforeCurativeExOr => self.before_curative.ex_to_or,
            ThresholdKind::BeforeCurativeK => self.before_curative_k.or_to_ex,
            ThresholdKind::BeforeCurativeKExOr => self.before_curative_k.ex_to_or,
        }
    }

    pub fn set(&mut self, kind: ThresholdKind, value: Option<f64>) {
        let slot = match kind {
            ThresholdKind::N => &mut self.n.or_to_ex,
            ThresholdKind::NExOr => &mut self.n.ex_to_or,
            ThresholdKind::NMinusOne => &mut self.n_minus_one.or_to_ex,
            ThresholdKind::NMinusOneExOr => &mut self.n_minus_one.ex_to_or,
            ThresholdKind::NMinusK => &mut self.n_minus_k.or_to_ex,
            ThresholdKind::NMinusKExOr => &mut self.n_minus_k.ex_to_or,
            ThresholdKind::BeforeCurative => &mut self.before_curative.or_to_ex,
            ThresholdKind::BeforeCurativeExOr => &mut self.before_curative.ex_to_or,
            ThresholdKind::BeforeCurativeK => &mut self.before_curative_k.or_to_ex,
            ThresholdKind::BeforeCurativeKExOr => &mut self.before_curative_k.ex_to_or,
        };
        *slot = value;
    }
}

/// What a monitored element physically watches.
#[derive(Debug, Clone)]
pub enum MonitoredPart {
    /// A single branch
    Branch(BranchId),
    /// Weighted section: Σ wᵢ·T(branchᵢ) + Σ wⱼ·P(hvdcⱼ)
    Section {
        branch_terms: Vec<(BranchId, f64)>,
        hvdc_terms: Vec<(HvdcId, f64)>,
    },
}

#[derive(Debug, Clone)]
pub struct MonitoredElement {
    pub id: MonitorId,
    pub name: String,
    pub part: MonitoredPart,
    pub thresholds: Thresholds,
    /// Watch in base case
    pub monitored_n: bool,
    /// Watch under contingencies
    pub monitored_nk: bool,
}

impl MonitoredElement {
    pub fn single(id: MonitorId, name: impl Into<String>, branch: BranchId) -> Self {
        Self {
            id,
            name: name.into(),
            part: MonitoredPart::Branch(branch),
            thresholds: Thresholds::default(),
            monitored_n: true,
            monitored_nk: true,
        }
    }

    /// Branch terms with weights, regardless of representation.
    pub fn branch_terms(&self) -> Vec<(BranchId, f64)> {
        match &self.part {
            MonitoredPart::Branch(b) => vec![(*b, 1.0)],
            MonitoredPart::Section { branch_terms, .. } => branch_terms.clone(),
        }
    }

    pub fn hvdc_terms(&self) -> &[(HvdcId, f64)] {
        match &self.part {
            MonitoredPart::Branch(_) => &[],
            MonitoredPart::Section { hvdc_terms, .. } => hvdc_terms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directional_limit_fallback() {
        let sym = DirectionalLimit::symmetric(400.0);
        assert_eq!(sym.for_transit(100.0), Some(400.0));
        assert_eq!(sym.for_transit(-100.0), Some(400.0));

        let asym = DirectionalLimit {
            or_to_ex: Some(400.0),
            ex_to_or: Some(300.0),
        };
        assert_eq!(asym.for_transit(100.0), Some(400.0));
        assert_eq!(asym.for_transit(-100.0), Some(300.0));
    }

    #[test]
    fn test_threshold_slots_roundtrip() {
        let mut t = Thresholds::default();
        assert_eq!(t.get(ThresholdKind::NMinusK), None);
        t.set(ThresholdKind::NMinusK, Some(250.0));
        assert_eq!(t.get(ThresholdKind::NMinusK), Some(250.0));
        t.set(ThresholdKind::NMinusK, None);
        assert_eq!(t.get(ThresholdKind::NMinusK), None);
    }
}
