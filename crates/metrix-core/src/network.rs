//! Arena-allocated DC network model.
//!
//! The network is built once from the inputs and is immutable afterwards
//! except for the attributes variants are allowed to touch (`connected`
//! flags, bounds, costs, set-points). Elements refer to each other through
//! integer handles, adjacency lists are stored on the nodes.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BranchId, GenId, HvdcId, LoadId, NodeId, PstId, ZoneId};

/// Errors raised while assembling or validating the network.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Node {0} references unknown zone")]
    UnknownZone(String),

    #[error("Zone {0} has no balance node")]
    MissingBalanceNode(String),

    #[error("Zone {0} has more than one balance node")]
    DuplicateBalanceNode(String),

    #[error("Branch {0} has non-positive admittance while connected")]
    NonPositiveAdmittance(String),

    #[error("Branch {0} endpoints out of range")]
    DanglingBranch(String),

    #[error("Element {0} references unknown node")]
    UnknownNode(String),

    #[error("Coupled group {group}: follower {member} has zero reference value")]
    ZeroCouplingReference { group: String, member: String },
}

/// Kind of a branch (`Quadripole` in the original nomenclature).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchKind {
    /// A real transmission element
    Real,
    /// Support branch hosting a phase-shifting transformer
    PhaseShifterSupport,
    /// Fictitious branch carrying an HVDC link in AC-emulation mode
    HvdcEmulationSupport,
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub from: NodeId,
    pub to: NodeId,
    /// Admittance y (per unit)
    pub admittance: f64,
    /// DC susceptance u²y (MW per radian); used in B′ and flow reconstruction
    pub susceptance: f64,
    /// Resistance (for the quadratic loss estimate)
    pub resistance: f64,
    pub kind: BranchKind,
    pub connected: bool,
}

/// Operating mode of a phase-shifting transformer (`TD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PstMode {
    Off,
    ImposedAngle,
    ImposedPower,
    Optimized,
    /// Fictitious PST owned by an HVDC link in AC-emulation mode
    EmulationFictitious,
}

#[derive(Debug, Clone)]
pub struct PhaseShifter {
    pub id: PstId,
    pub name: String,
    /// Branch hosting this phase-shifter
    pub branch: BranchId,
    pub mode: PstMode,
    /// Power set-point (MW) in the imposed/optimized power modes
    pub setpoint_mw: f64,
    pub pmin_mw: f64,
    pub pmax_mw: f64,
    /// Tap table: lowest tap index, tap count, angle step per tap (degrees)
    pub low_tap: i32,
    pub nb_taps: usize,
    pub tap_step_deg: f64,
    /// True when a preventive move must be gated by an integer activation
    pub preventive_activation: bool,
    /// True iff this PST stands in for an HVDC in AC emulation
    pub fictitious: bool,
}

/// Operating mode of an HVDC link (`LigneCC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HvdcMode {
    Off,
    ImposedPower,
    Optimized,
    AcEmulation,
}

#[derive(Debug, Clone)]
pub struct HvdcLink {
    pub id: HvdcId,
    pub name: String,
    pub from: NodeId,
    pub to: NodeId,
    pub mode: HvdcMode,
    pub setpoint_mw: f64,
    pub pmin_mw: f64,
    pub pmax_mw: f64,
    /// Droop coefficient for AC emulation (MW per degree)
    pub droop_mw_per_deg: f64,
    /// Converter loss coefficients per end (fraction of transported power)
    pub loss_factor_from: f64,
    pub loss_factor_to: f64,
    /// DC voltage and cable resistance, for the cable-loss estimate
    pub dc_voltage_kv: f64,
    pub cable_resistance_ohm: f64,
    pub connected: bool,
    /// Fictitious support branch + PST owned when mode = AcEmulation
    pub emulation_branch: Option<BranchId>,
    pub emulation_pst: Option<PstId>,
}

/// How a generator may participate in redispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adjustability {
    None,
    PreventiveOnly,
    CurativeOnly,
    Both,
}

impl Adjustability {
    pub fn preventive(&self) -> bool {
        matches!(self, Adjustability::PreventiveOnly | Adjustability::Both)
    }

    pub fn curative(&self) -> bool {
        matches!(self, Adjustability::CurativeOnly | Adjustability::Both)
    }
}

#[derive(Debug, Clone)]
pub struct Generator {
    pub id: GenId,
    pub name: String,
    pub node: NodeId,
    /// Scheduled production (MW)
    pub p0_mw: f64,
    pub pmin_mw: f64,
    pub pmax_mw: f64,
    /// Half-band available for frequency compensation (MW)
    pub half_band_mw: f64,
    pub adjustable: Adjustability,
    /// Redispatch costs: up/down, before (HR) and after (AR) the grid pass
    pub cost_up_hr: f64,
    pub cost_up_ar: f64,
    pub cost_down_hr: f64,
    pub cost_down_ar: f64,
    /// Free-form type tag from the inputs (e.g. "BATTERY")
    pub kind: String,
    /// Participation factor for post-contingency compensation
    pub participation: f64,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct Load {
    pub id: LoadId,
    pub name: String,
    pub node: NodeId,
    /// Signed consumption (MW); negative = pumping
    pub value_mw: f64,
    pub shed_cost: f64,
    /// Preventive shedding cap, percent of value (0..100)
    pub shed_pct: f64,
    /// Curative effacement cap, percent of value (0..100)
    pub curative_pct: f64,
}

#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub balance_node: NodeId,
    /// Net export imposed on this zone's bilan (MW), variant-editable
    pub exchange_mw: f64,
    /// Production adjustment target for this zone's bilan (MW)
    pub production_balance_mw: f64,
}

/// Reference quantity for coupled-group proportionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouplingReference {
    Pmax,
    Pmin,
    P0,
    PmaxMinusP0,
}

/// Family of generators constrained to move proportionally:
/// P(i)/ref(i) = P(0)/ref(0) for every follower i.
#[derive(Debug, Clone)]
pub struct CouplingGroup {
    pub name: String,
    pub reference: CouplingReference,
    pub members: Vec<GenId>,
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub zone: Option<ZoneId>,
    pub is_balance: bool,
    pub branches: Vec<BranchId>,
    pub phase_shifters: Vec<PstId>,
    pub hvdc_links: Vec<HvdcId>,
    pub generators: Vec<GenId>,
    pub loads: Vec<LoadId>,
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::new(0)
    }
}

/// The network container. Arenas are append-only; handles index into them.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub name: String,
    pub nodes: Vec<Node>,
    pub zones: Vec<Zone>,
    pub branches: Vec<Branch>,
    pub phase_shifters: Vec<PhaseShifter>,
    pub hvdc_links: Vec<HvdcLink>,
    pub generators: Vec<Generator>,
    pub loads: Vec<Load>,
    pub couplings: Vec<CouplingGroup>,
}

impl Network {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.value()]
    }

    pub fn branch(&self, id: BranchId) -> &Branch {
        &self.branches[id.value()]
    }

    pub fn branch_mut(&mut self, id: BranchId) -> &mut Branch {
        &mut self.branches[id.value()]
    }

    pub fn phase_shifter(&self, id: PstId) -> &PhaseShifter {
        &self.phase_shifters[id.value()]
    }

    pub fn hvdc(&self, id: HvdcId) -> &HvdcLink {
        &self.hvdc_links[id.value()]
    }

    pub fn generator(&self, id: GenId) -> &Generator {
        &self.generators[id.value()]
    }

    pub fn generator_mut(&mut self, id: GenId) -> &mut Generator {
        &mut self.generators[id.value()]
    }

    pub fn load(&self, id: LoadId) -> &Load {
        &self.loads[id.value()]
    }

    pub fn zone(&self, id: ZoneId) -> &Zone {
        &self.zones[id.value()]
    }

    pub fn add_zone(&mut self, name: impl Into<String>, balance_node: NodeId) -> ZoneId {
        let id = ZoneId::new(self.zones.len());
        self.zones.push(Zone {
            id,
            name: name.into(),
            balance_node,
            exchange_mw: 0.0,
            production_balance_mw: 0.0,
        });
        id
    }

    pub fn add_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Node {
            id,
            name: name.into(),
            ..Default::default()
        });
        id
    }

    /// Assign a node to a zone, flagging it as that zone's balance node when
    /// it matches the zone's declared balance node.
    pub fn assign_zone(&mut self, node: NodeId, zone: ZoneId) {
        let is_balance = self.zones[zone.value()].balance_node == node;
        let n = &mut self.nodes[node.value()];
        n.zone = Some(zone);
        n.is_balance = is_balance;
    }

    pub fn add_branch(
        &mut self,
        name: impl Into<String>,
        from: NodeId,
        to: NodeId,
        admittance: f64,
        susceptance: f64,
        resistance: f64,
        kind: BranchKind,
    ) -> BranchId {
        let id = BranchId::new(self.branches.len());
        self.branches.push(Branch {
            id,
            name: name.into(),
            from,
            to,
            admittance,
            susceptance,
            resistance,
            kind,
            connected: true,
        });
        self.nodes[from.value()].branches.push(id);
        self.nodes[to.value()].branches.push(id);
        id
    }

    pub fn add_generator(&mut self, gen: Generator) -> GenId {
        let id = GenId::new(self.generators.len());
        let node = gen.node;
        self.generators.push(Generator { id, ..gen });
        self.nodes[node.value()].generators.push(id);
        id
    }

    pub fn add_load(&mut self, load: Load) -> LoadId {
        let id = LoadId::new(self.loads.len());
        let node = load.node;
        self.loads.push(Load { id, ..load });
        self.nodes[node.value()].loads.push(id);
        id
    }

    pub fn add_phase_shifter(&mut self, pst: PhaseShifter) -> PstId {
        let id = PstId::new(self.phase_shifters.len());
        let branch = pst.branch;
        self.phase_shifters.push(PhaseShifter { id, ..pst });
        let (from, to) = {
            let b = &self.branches[branch.value()];
            (b.from, b.to)
        };
        self.nodes[from.value()].phase_shifters.push(id);
        self.nodes[to.value()].phase_shifters.push(id);
        id
    }

    pub fn add_hvdc(&mut self, link: HvdcLink) -> HvdcId {
        let id = HvdcId::new(self.hvdc_links.len());
        let (from, to) = (link.from, link.to);
        self.hvdc_links.push(HvdcLink { id, ..link });
        self.nodes[from.value()].hvdc_links.push(id);
        self.nodes[to.value()].hvdc_links.push(id);
        id
    }

    /// Check the setup invariants: every non-isolated node belongs to a zone,
    /// exactly one balance node per zone, positive admittance on connected
    /// branches, coupling references non-zero.
    pub fn validate(&self) -> Result<(), NetworkError> {
        for branch in &self.branches {
            if branch.from.value() >= self.nodes.len() || branch.to.value() >= self.nodes.len() {
                return Err(NetworkError::DanglingBranch(branch.name.clone()));
            }
            if branch.connected && branch.admittance <= 0.0 {
                return Err(NetworkError::NonPositiveAdmittance(branch.name.clone()));
            }
        }

        let mut balance_count: HashMap<ZoneId, usize> = HashMap::new();
        for node in &self.nodes {
            if node.is_balance {
                let zone = node
                    .zone
                    .ok_or_else(|| NetworkError::UnknownZone(node.name.clone()))?;
                *balance_count.entry(zone).or_insert(0) += 1;
            }
            if node.zone.is_none() && !node.branches.is_empty() {
                return Err(NetworkError::UnknownZone(node.name.clone()));
            }
        }
        for zone in &self.zones {
            match balance_count.get(&zone.id) {
                None => return Err(NetworkError::MissingBalanceNode(zone.name.clone())),
                Some(1) => {}
                Some(_) => return Err(NetworkError::DuplicateBalanceNode(zone.name.clone())),
            }
        }

        for group in &self.couplings {
            for &member in &group.members {
                let gen = self.generator(member);
                let reference = match group.reference {
                    CouplingReference::Pmax => gen.pmax_mw,
                    CouplingReference::Pmin => gen.pmin_mw,
                    CouplingReference::P0 => gen.p0_mw,
                    CouplingReference::PmaxMinusP0 => gen.pmax_mw - gen.p0_mw,
                };
                if reference.abs() < 1e-12 {
                    return Err(NetworkError::ZeroCouplingReference {
                        group: group.name.clone(),
                        member: gen.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Reference value of a generator inside a coupling group.
    pub fn coupling_reference(&self, reference: CouplingReference, gen: GenId) -> f64 {
        let g = self.generator(gen);
        match reference {
            CouplingReference::Pmax => g.pmax_mw,
            CouplingReference::Pmin => g.pmin_mw,
            CouplingReference::P0 => g.p0_mw,
            CouplingReference::PmaxMinusP0 => g.pmax_mw - g.p0_mw,
        }
    }

    /// Nodes reachable from `start` over connected branches, with `opened`
    /// treated as disconnected and `closed` treated as connected.
    ///
    /// Returns a boolean mask indexed by node handle.
    pub fn reachable_from(
        &self,
        start: NodeId,
        opened: &HashSet<BranchId>,
        closed: &HashSet<BranchId>,
    ) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        seen[start.value()] = true;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            for &bid in &self.nodes[node.value()].branches {
                let branch = self.branch(bid);
                let usable = if opened.contains(&bid) {
                    false
                } else {
                    branch.connected || closed.contains(&bid)
                };
                if !usable {
                    continue;
                }
                let other = if branch.from == node {
                    branch.to
                } else {
                    branch.from
                };
                if !seen[other.value()] {
                    seen[other.value()] = true;
                    queue.push_back(other);
                }
            }
        }
        seen
    }

    /// Total consumption over all loads (signed).
    pub fn total_load_mw(&self) -> f64 {
        self.loads.iter().map(|l| l.value_mw).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Triangle: A (balance) - B - C, one zone.
    fn triangle() -> Network {
        let mut net = Network::new("triangle");
        let a = net.add_node("A");
        let b = net.add_node("B");
        let c = net.add_node("C");
        let z = net.add_zone("Z1", a);
        for n in [a, b, c] {
            net.assign_zone(n, z);
        }
        net.add_branch("A-B", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_branch("B-C", b, c, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_branch("A-C", a, c, 1.0, 1.0, 0.01, BranchKind::Real);
        net
    }

    #[test]
    fn test_validate_triangle() {
        let net = triangle();
        net.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_two_balance_nodes() {
        let mut net = triangle();
        net.nodes[1].is_balance = true;
        assert!(matches!(
            net.validate(),
            Err(NetworkError::DuplicateBalanceNode(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_admittance() {
        let mut net = triangle();
        net.branches[0].admittance = 0.0;
        assert!(matches!(
            net.validate(),
            Err(NetworkError::NonPositiveAdmittance(_))
        ));
    }

    #[test]
    fn test_adjacency_maintained() {
        let net = triangle();
        assert_eq!(net.nodes[0].branches.len(), 2);
        assert_eq!(net.nodes[1].branches.len(), 2);
        assert_eq!(net.nodes[2].branches.len(), 2);
    }

    #[test]
    fn test_reachable_with_openings() {
        let net = triangle();
        let all = net.reachable_from(NodeId::new(0), &HashSet::new(), &HashSet::new());
        assert!(all.iter().all(|&r| r));

        // Opening A-B and A-C isolates A
        let opened: HashSet<_> = [BranchId::new(0), BranchId::new(2)].into_iter().collect();
        let mask = net.reachable_from(NodeId::new(0), &opened, &HashSet::new());
        assert!(mask[0]);
        assert!(!mask[1]);
        assert!(!mask[2]);
    }
}
