//! Per-variant result records.
//!
//! Plain data handed to the writers; everything the tabular result blocks
//! (generator actions, sheds, PST/HVDC positions, flows, threats, pockets,
//! bilans, objective breakdown, margin variations, status) need, resolved
//! to element names so the writers stay dumb.

use serde::Serialize;

use crate::margins::MarginVariation;
use crate::scopf::VariantStatus;

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorResult {
    pub name: String,
    pub p0_mw: f64,
    /// Net preventive redispatch (up − down)
    pub preventive_mw: f64,
    /// Curative actions: (contingency name, net MW)
    pub curative: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub name: String,
    pub value_mw: f64,
    pub shed_mw: f64,
    pub curative: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PstResult {
    pub name: String,
    pub setpoint_mw: f64,
    pub preventive_mw: f64,
    pub curative: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HvdcResult {
    pub name: String,
    pub setpoint_mw: f64,
    pub preventive_mw: f64,
    pub curative: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub monitor: String,
    pub transit_mw: f64,
    pub threshold_mw: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreatResult {
    pub monitor: String,
    /// `None` = base case
    pub contingency: Option<String>,
    pub transit_mw: f64,
    pub threshold_mw: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PocketResult {
    pub contingency: String,
    pub nodes: usize,
    pub lost_generation_mw: f64,
    pub lost_load_mw: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneBilanResult {
    pub zone: String,
    pub generation_mw: f64,
    pub load_mw: f64,
    pub shed_mw: f64,
    pub exchange_mw: f64,
    /// Residual imbalance; bounded by the bilan tolerance at optimum
    pub residual_mw: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectiveBreakdown {
    pub generation_cost: f64,
    pub load_cost: f64,
    pub curative_cost: f64,
    pub slack_cost: f64,
    pub activation_cost: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarginVariationResult {
    pub constraint: String,
    pub entries: Vec<(String, f64)>,
}

impl From<MarginVariation> for MarginVariationResult {
    fn from(v: MarginVariation) -> Self {
        Self {
            constraint: v.row_name,
            entries: v.entries,
        }
    }
}

/// Everything one variant produced.
#[derive(Debug, Clone, Serialize)]
pub struct VariantReport {
    pub variant_index: i32,
    pub status: VariantStatus,
    pub micro_iterations: usize,
    pub loss_iterations: usize,
    pub loss_rate: f64,
    pub cuts_added: usize,
    pub objective: Option<ObjectiveBreakdown>,
    pub generators: Vec<GeneratorResult>,
    pub loads: Vec<LoadResult>,
    pub phase_shifters: Vec<PstResult>,
    pub hvdc_links: Vec<HvdcResult>,
    pub flows: Vec<FlowResult>,
    pub threats: Vec<ThreatResult>,
    pub before_curative_threats: Vec<ThreatResult>,
    pub pockets: Vec<PocketResult>,
    pub zone_bilans: Vec<ZoneBilanResult>,
    pub active_parades: Vec<String>,
    pub margin_variations: Vec<MarginVariationResult>,
}

impl VariantReport {
    /// Empty report carrying only a terminal status.
    pub fn status_only(variant_index: i32, status: VariantStatus) -> Self {
        Self {
            variant_index,
            status,
            micro_iterations: 0,
            loss_iterations: 0,
            loss_rate: 0.0,
            cuts_added: 0,
            objective: None,
            generators: Vec::new(),
            loads: Vec::new(),
            phase_shifters: Vec::new(),
            hvdc_links: Vec::new(),
            flows: Vec::new(),
            threats: Vec::new(),
            before_curative_threats: Vec::new(),
            pockets: Vec::new(),
            zone_bilans: Vec::new(),
            active_parades: Vec::new(),
            margin_variations: Vec::new(),
        }
    }
}
