//! # metrix-core: DC network model for security-constrained OPF
//!
//! Provides the data structures shared by the METRIX solver stack:
//!
//! - [`Network`] - arena-allocated network (nodes, branches, phase-shifters,
//!   HVDC links, generators, loads, synchronous zones)
//! - [`MonitoredElement`] - branches and watched sections with seasonal
//!   thresholds
//! - [`Contingency`] - credible outages, their curative resources and
//!   topological parades
//! - [`Variant`] - per-scenario deltas with transactional apply/rollback
//!
//! ## Design
//!
//! Elements live in flat arenas (`Vec<T>`) and refer to each other through
//! newtype index handles ([`NodeId`], [`BranchId`], ...). The topology is
//! built once from the inputs and never re-parented; variants and
//! contingencies only flip `connected` flags and numeric attributes, and
//! every mutation is journaled so it can be rolled back bit-identically.
//!
//! The model is deliberately DC-only: branches carry an admittance, the
//! `u²y` susceptance used by the B′ matrix, and a resistance for the loss
//! estimate. Voltage magnitudes and reactive power do not exist here.

use serde::{Deserialize, Serialize};

pub mod contingency;
pub mod error;
pub mod monitored;
pub mod network;
pub mod variant;

pub use contingency::{Contingency, ContingencySet, CurativeElement, LostPocket};
pub use error::{MetrixError, MetrixResult};
pub use monitored::{DirectionalLimit, MonitoredElement, MonitoredPart, ThresholdKind, Thresholds};
pub use network::{
    Adjustability, Branch, BranchKind, CouplingGroup, CouplingReference, Generator, HvdcLink,
    HvdcMode, Load, Network, NetworkError, Node, PhaseShifter, PstMode, Zone,
};
pub use variant::{Variant, VariantDelta, VariantError, VariantOverlay};

/// Sentinel threshold meaning "not monitored" in the input tables.
pub const THRESHOLD_UNSET: f64 = 99999.0;

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PstId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HvdcId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContingencyId(usize);

macro_rules! impl_id {
    ($($name:ident),*) => {
        $(impl $name {
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        })*
    };
}

impl_id!(NodeId, ZoneId, BranchId, PstId, HvdcId, GenId, LoadId, MonitorId, ContingencyId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = BranchId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(id, BranchId::new(42));
        assert_ne!(id, BranchId::new(43));
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = NodeId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
