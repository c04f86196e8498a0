//! Incremental LP/MIP construction.
//!
//! Columns are created once per pass (preventive variables) or lazily
//! (curative pairs, activation binaries, overload slacks); rows accumulate:
//! bilans and couplings up front, transit cuts as the screener finds
//! violations. The problem flips from LP to MIP the moment the first binary
//! column appears.
//!
//! Submodules:
//! - [`curative`]: curative variable pairs, their bound linkages, parade
//!   activation and exclusivity
//! - [`cuts`]: transit-cut assembly, big-M activation, equivalence
//!   detection

pub mod curative;
pub mod cuts;

use std::collections::{HashMap, HashSet};

use metrix_core::{
    ContingencyId, GenId, HvdcId, HvdcMode, LoadId, MonitorId, Network, PstId, PstMode,
};
use metrix_solver::{Outcome, Problem, RowSense};
use tracing::debug;

use crate::options::ComputationOptions;

pub use cuts::{CutOutcome, CutSpec};

/// Up/down column pair of one element.
#[derive(Debug, Clone, Copy)]
pub struct VarPair {
    pub up: usize,
    pub down: usize,
}

/// Which cost table preventive generator variables draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostStage {
    /// Before the grid pass (economic stacking)
    Hr,
    /// After the grid pass (redispatch)
    Ar,
}

/// Maps model elements to their columns.
#[derive(Debug, Default)]
pub struct LpRegistry {
    pub gen: HashMap<GenId, VarPair>,
    pub load_shed: HashMap<LoadId, usize>,
    pub pst: HashMap<PstId, VarPair>,
    pub hvdc: HashMap<HvdcId, VarPair>,
    pub curative_gen: HashMap<(ContingencyId, GenId), VarPair>,
    pub curative_load: HashMap<(ContingencyId, LoadId), VarPair>,
    pub curative_pst: HashMap<(ContingencyId, PstId), VarPair>,
    pub curative_hvdc: HashMap<(ContingencyId, HvdcId), VarPair>,
    /// γ binaries gating curative magnitudes
    pub curative_activation: HashMap<(ContingencyId, usize), usize>,
    /// Preventive activation binaries of PSTs that require one
    pub pst_preventive_activation: HashMap<PstId, usize>,
    /// δ binaries, one per parade
    pub parade_activation: HashMap<ContingencyId, usize>,
    pub overload_slack: HashMap<(MonitorId, Option<ContingencyId>), usize>,
}

/// Record of one added transit cut, kept for equivalence detection and
/// sibling replication.
#[derive(Debug, Clone)]
pub struct StoredCut {
    pub row: usize,
    pub monitor: MonitorId,
    pub contingency: Option<ContingencyId>,
    pub parade: Option<ContingencyId>,
    pub father: Option<ContingencyId>,
    pub upper: bool,
    /// Structural terms (activation column excluded), sorted by column
    pub terms_key: Vec<(usize, f64)>,
    /// RHS with the big-M relaxation excluded
    pub rhs_key: f64,
}

/// The incremental problem builder for one pass over one variant.
pub struct LpBuilder {
    pub problem: Problem,
    pub registry: LpRegistry,
    /// Effective schedule per generator for this pass (P0, or the
    /// without-grid dispatch during the with-grid pass)
    pub dispatch: Vec<f64>,
    pub loss_rate: f64,
    options: ComputationOptions,
    stored_cuts: Vec<StoredCut>,
    total_cuts: usize,
    cuts_by_father: HashMap<ContingencyId, usize>,
    curative_done: HashSet<ContingencyId>,
    exclusivity_rows: HashMap<ContingencyId, usize>,
    /// Columns below this index are the shared preventive block; used by
    /// the parade-cut equivalence test.
    preventive_columns: usize,
}

impl LpBuilder {
    pub fn new(options: ComputationOptions, dispatch: Vec<f64>, loss_rate: f64) -> Self {
        Self {
            problem: Problem::new(),
            registry: LpRegistry::default(),
            dispatch,
            loss_rate,
            options,
            stored_cuts: Vec::new(),
            total_cuts: 0,
            cuts_by_father: HashMap::new(),
            curative_done: HashSet::new(),
            exclusivity_rows: HashMap::new(),
            preventive_columns: 0,
        }
    }

    pub fn options(&self) -> &ComputationOptions {
        &self.options
    }

    pub fn total_cuts(&self) -> usize {
        self.total_cuts
    }

    pub fn stored_cuts(&self) -> &[StoredCut] {
        &self.stored_cuts
    }

    fn cost_floor(&self, cost: f64) -> f64 {
        cost.max(self.options.noise_cost)
    }

    /// Create the preventive variable blocks (§ generators, sheddable
    /// loads, phase-shifters, HVDC links).
    pub fn build_variables(&mut self, network: &Network, stage: CostStage) {
        let redispatch = self.options.mode.redispatch_allowed();

        for gen in &network.generators {
            if !gen.connected || !gen.adjustable.preventive() {
                continue;
            }
            let schedule = self.dispatch[gen.id.value()];
            let (up_room, down_room) = if redispatch {
                (
                    (gen.pmax_mw - schedule).max(0.0),
                    (schedule - gen.pmin_mw).max(0.0),
                )
            } else {
                (0.0, 0.0)
            };
            let (cost_up, cost_down) = match stage {
                CostStage::Hr => (gen.cost_up_hr, gen.cost_down_hr),
                CostStage::Ar => (gen.cost_up_ar, gen.cost_down_ar),
            };
            let up = self.problem.add_column(
                format!("gen_up::{}", gen.name),
                0.0,
                up_room,
                self.cost_floor(cost_up),
            );
            let down = self.problem.add_column(
                format!("gen_down::{}", gen.name),
                0.0,
                down_room,
                self.cost_floor(cost_down),
            );
            self.registry.gen.insert(gen.id, VarPair { up, down });
        }

        for load in &network.loads {
            if load.shed_pct <= 0.0 {
                continue;
            }
            let cap = load.shed_pct / 100.0 * load.value_mw.abs();
            let shed = self.problem.add_column(
                format!("load_shed::{}", load.name),
                0.0,
                cap,
                self.cost_floor(load.shed_cost),
            );
            self.registry.load_shed.insert(load.id, shed);
        }

        for pst in &network.phase_shifters {
            if pst.mode == PstMode::Off || pst.fictitious {
                continue;
            }
            let (up_room, down_room) = if pst.mode == PstMode::Optimized {
                (
                    (pst.pmax_mw - pst.setpoint_mw).max(0.0),
                    (pst.setpoint_mw - pst.pmin_mw).max(0.0),
                )
            } else {
                // Imposed modes hold the set-point
                (0.0, 0.0)
            };
            let up = self.problem.add_column(
                format!("pst_up::{}", pst.name),
                0.0,
                up_room,
                self.options.noise_cost,
            );
            let down = self.problem.add_column(
                format!("pst_down::{}", pst.name),
                0.0,
                down_room,
                self.options.noise_cost,
            );
            self.registry.pst.insert(pst.id, VarPair { up, down });

            // Some PSTs may only move preventively when explicitly
            // activated; the binary gates both directions
            if pst.preventive_activation && up_room + down_room > 0.0 {
                let act = self
                    .problem
                    .add_binary_column(format!("pst_act::{}", pst.name), self.options.noise_cost);
                self.registry.pst_preventive_activation.insert(pst.id, act);
                let bound = (up_room + down_room).max(1.0);
                self.problem.add_row(
                    format!("pst_gate::{}", pst.name),
                    vec![(up, 1.0), (down, 1.0), (act, -bound)],
                    RowSense::Le,
                    0.0,
                );
            }
        }

        for link in &network.hvdc_links {
            if !link.connected || link.mode == HvdcMode::Off {
                continue;
            }
            let (up_room, down_room) = if link.mode == HvdcMode::Optimized {
                (
                    (link.pmax_mw - link.setpoint_mw).max(0.0),
                    (link.setpoint_mw - link.pmin_mw).max(0.0),
                )
            } else {
                // Imposed-power and AC-emulation hold the set-point
                (0.0, 0.0)
            };
            let up = self.problem.add_column(
                format!("hvdc_up::{}", link.name),
                0.0,
                up_room,
                self.options.noise_cost,
            );
            let down = self.problem.add_column(
                format!("hvdc_down::{}", link.name),
                0.0,
                down_room,
                self.options.noise_cost,
            );
            self.registry.hvdc.insert(link.id, VarPair { up, down });
        }

        self.preventive_columns = self.problem.num_columns();
        debug!(
            columns = self.problem.num_columns(),
            stage = ?stage,
            "created preventive variables"
        );
    }

    /// Effective consumption of a load under the current loss assumption.
    pub fn effective_load(&self, value_mw: f64) -> f64 {
        value_mw + self.loss_rate * value_mw.max(0.0)
    }

    /// Zonal bilan rows plus the global one (multi-zone networks).
    pub fn build_bilans(&mut self, network: &Network) {
        let mut global_terms: Vec<(usize, f64)> = Vec::new();
        let mut global_rhs = 0.0;

        for zone in &network.zones {
            let mut terms: Vec<(usize, f64)> = Vec::new();
            let mut rhs = 0.0;

            for gen in &network.generators {
                if !gen.connected || network.node(gen.node).zone != Some(zone.id) {
                    continue;
                }
                rhs -= self.dispatch[gen.id.value()];
                if let Some(pair) = self.registry.gen.get(&gen.id) {
                    terms.push((pair.up, 1.0));
                    terms.push((pair.down, -1.0));
                }
            }

            for load in &network.loads {
                if network.node(load.node).zone != Some(zone.id) {
                    continue;
                }
                rhs += self.effective_load(load.value_mw);
                if let Some(&shed) = self.registry.load_shed.get(&load.id) {
                    let sign = if load.value_mw >= 0.0 { 1.0 } else { -1.0 };
                    terms.push((shed, sign));
                }
            }

            for link in &network.hvdc_links {
                if !link.connected || link.mode == HvdcMode::Off {
                    continue;
                }
                let from_in = network.node(link.from).zone == Some(zone.id);
                let to_in = network.node(link.to).zone == Some(zone.id);
                if from_in == to_in {
                    // Internal or foreign link: no boundary flow for this zone
                    continue;
                }
                // Exports count against the zone's production
                let sign = if from_in { -1.0 } else { 1.0 };
                rhs -= sign * link.setpoint_mw;
                if let Some(pair) = self.registry.hvdc.get(&link.id) {
                    terms.push((pair.up, sign));
                    terms.push((pair.down, -sign));
                }
            }

            rhs += zone.exchange_mw - zone.production_balance_mw;

            global_terms.extend(
                terms
                    .iter()
                    .filter(|(col, _)| !self.is_hvdc_column(*col))
                    .copied(),
            );
            global_rhs += rhs;

            self.problem.add_row(
                format!("bilan::{}", zone.name),
                terms,
                RowSense::Eq,
                rhs,
            );
        }

        if network.zones.len() > 1 {
            self.problem
                .add_row("bilan::global", global_terms, RowSense::Eq, global_rhs);
        }
    }

    fn is_hvdc_column(&self, col: usize) -> bool {
        self.registry
            .hvdc
            .values()
            .any(|p| p.up == col || p.down == col)
    }

    /// Coupling rows: ref(0)·P(i) = ref(i)·P(0) for every follower.
    pub fn build_couplings(&mut self, network: &Network) {
        for group in &network.couplings {
            let Some((&leader, followers)) = group.members.split_first() else {
                continue;
            };
            let Some(leader_pair) = self.registry.gen.get(&leader).copied() else {
                continue;
            };
            let ref0 = network.coupling_reference(group.reference, leader);
            let d0 = self.dispatch[leader.value()];

            for &follower in followers {
                let Some(pair) = self.registry.gen.get(&follower).copied() else {
                    continue;
                };
                let ref_i = network.coupling_reference(group.reference, follower);
                let d_i = self.dispatch[follower.value()];
                // ref0·(d_i + Δi) − ref_i·(d0 + Δ0) = 0
                let terms = vec![
                    (pair.up, ref0),
                    (pair.down, -ref0),
                    (leader_pair.up, -ref_i),
                    (leader_pair.down, ref_i),
                ];
                let rhs = ref_i * d0 - ref0 * d_i;
                self.problem.add_row(
                    format!(
                        "coupling::{}::{}",
                        group.name,
                        network.generator(follower).name
                    ),
                    terms,
                    RowSense::Eq,
                    rhs,
                );
            }
        }
    }

    /// Overload slack column for a (monitor, contingency) pair, created on
    /// first use. Only meaningful in the slack-enabled modes.
    pub fn ensure_overload_slack(
        &mut self,
        monitor: MonitorId,
        monitor_name: &str,
        contingency: Option<ContingencyId>,
    ) -> Option<usize> {
        if !self.options.mode.with_slacks() {
            return None;
        }
        if let Some(&col) = self.registry.overload_slack.get(&(monitor, contingency)) {
            return Some(col);
        }
        let suffix = match contingency {
            None => "N".to_string(),
            Some(c) => format!("inc{}", c.value()),
        };
        // Wide finite bound; backends dislike literal infinities
        let col = self.problem.add_column(
            format!("overload::{monitor_name}::{suffix}"),
            0.0,
            1e6,
            self.options.overload_cost,
        );
        self.registry
            .overload_slack
            .insert((monitor, contingency), col);
        Some(col)
    }

    /// Extract the per-element state from a solver outcome.
    pub fn dispatch_state(&self, network: &Network, outcome: Option<&Outcome>) -> DispatchState {
        let value = |col: usize| -> f64 {
            outcome
                .map(|o| o.values.get(col).copied().unwrap_or(0.0))
                .unwrap_or(0.0)
        };
        let pair_net = |pair: &VarPair| value(pair.up) - value(pair.down);

        let mut gen_p = self.dispatch.clone();
        for gen in &network.generators {
            if !gen.connected {
                gen_p[gen.id.value()] = 0.0;
                continue;
            }
            if let Some(pair) = self.registry.gen.get(&gen.id) {
                gen_p[gen.id.value()] += pair_net(pair);
            }
        }

        let mut load_shed = vec![0.0; network.loads.len()];
        for load in &network.loads {
            if let Some(&col) = self.registry.load_shed.get(&load.id) {
                load_shed[load.id.value()] = value(col);
            }
        }

        let mut pst_p = vec![0.0; network.phase_shifters.len()];
        for pst in &network.phase_shifters {
            if pst.mode == PstMode::Off || pst.fictitious {
                continue;
            }
            pst_p[pst.id.value()] = pst.setpoint_mw
                + self
                    .registry
                    .pst
                    .get(&pst.id)
                    .map(pair_net)
                    .unwrap_or(0.0);
        }

        let mut hvdc_p = vec![0.0; network.hvdc_links.len()];
        for link in &network.hvdc_links {
            if !link.connected || link.mode == HvdcMode::Off {
                continue;
            }
            hvdc_p[link.id.value()] = link.setpoint_mw
                + self
                    .registry
                    .hvdc
                    .get(&link.id)
                    .map(pair_net)
                    .unwrap_or(0.0);
        }

        let mut curative_gen = HashMap::new();
        for (&key, pair) in &self.registry.curative_gen {
            curative_gen.insert(key, pair_net(pair));
        }
        let mut curative_load = HashMap::new();
        for (&key, pair) in &self.registry.curative_load {
            curative_load.insert(key, pair_net(pair));
        }
        let mut curative_pst = HashMap::new();
        for (&key, pair) in &self.registry.curative_pst {
            curative_pst.insert(key, pair_net(pair));
        }
        let mut curative_hvdc = HashMap::new();
        for (&key, pair) in &self.registry.curative_hvdc {
            curative_hvdc.insert(key, pair_net(pair));
        }

        let mut parade_active = HashMap::new();
        for (&parade, &col) in &self.registry.parade_activation {
            parade_active.insert(
                parade,
                value(col) >= crate::constants::ACTIVATION_THRESHOLD,
            );
        }

        let mut overload = HashMap::new();
        for (&key, &col) in &self.registry.overload_slack {
            let v = value(col);
            if v > 0.0 {
                overload.insert(key, v);
            }
        }

        DispatchState {
            gen_p,
            load_shed,
            pst_p,
            hvdc_p,
            curative_gen,
            curative_load,
            curative_pst,
            curative_hvdc,
            parade_active,
            overload,
            loss_rate: self.loss_rate,
        }
    }
}

/// Snapshot of all control values at the current solver point.
#[derive(Debug, Clone)]
pub struct DispatchState {
    pub gen_p: Vec<f64>,
    pub load_shed: Vec<f64>,
    pub pst_p: Vec<f64>,
    pub hvdc_p: Vec<f64>,
    pub curative_gen: HashMap<(ContingencyId, GenId), f64>,
    pub curative_load: HashMap<(ContingencyId, LoadId), f64>,
    pub curative_pst: HashMap<(ContingencyId, PstId), f64>,
    pub curative_hvdc: HashMap<(ContingencyId, HvdcId), f64>,
    pub parade_active: HashMap<ContingencyId, bool>,
    pub overload: HashMap<(MonitorId, Option<ContingencyId>), f64>,
    pub loss_rate: f64,
}

impl DispatchState {
    /// Nodal injection vector for the base case.
    pub fn base_injections(&self, network: &Network) -> Vec<f64> {
        let mut inj = vec![0.0; network.nodes.len()];

        for gen in &network.generators {
            if gen.connected {
                inj[gen.node.value()] += self.gen_p[gen.id.value()];
            }
        }
        for load in &network.loads {
            let sign = if load.value_mw >= 0.0 { 1.0 } else { -1.0 };
            let effective =
                load.value_mw + self.loss_rate * load.value_mw.max(0.0);
            inj[load.node.value()] -= effective - sign * self.load_shed[load.id.value()];
        }
        for link in &network.hvdc_links {
            if !link.connected || link.mode == HvdcMode::Off {
                continue;
            }
            let p = self.hvdc_p[link.id.value()];
            inj[link.from.value()] -= p;
            inj[link.to.value()] += p;
        }
        for pst in &network.phase_shifters {
            let p = self.pst_p[pst.id.value()];
            if p == 0.0 {
                continue;
            }
            let branch = network.branch(pst.branch);
            inj[branch.from.value()] -= p;
            inj[branch.to.value()] += p;
        }
        inj
    }

    /// Preventive power currently shifted by PSTs hosted on a branch
    /// (added directly to the branch transit).
    pub fn pst_flow_on(&self, network: &Network, branch: metrix_core::BranchId) -> f64 {
        network
            .phase_shifters
            .iter()
            .filter(|p| p.branch == branch)
            .map(|p| self.pst_p[p.id.value()])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ComputationMode;
    use metrix_core::{Adjustability, BranchKind, Generator, Load};

    fn two_node_net() -> Network {
        let mut net = Network::new("two");
        let a = net.add_node("A");
        let b = net.add_node("B");
        let z = net.add_zone("Z1", a);
        net.assign_zone(a, z);
        net.assign_zone(b, z);
        net.add_branch("A-B", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_generator(Generator {
            id: GenId::new(0),
            name: "G1".into(),
            node: a,
            p0_mw: 50.0,
            pmin_mw: 10.0,
            pmax_mw: 120.0,
            half_band_mw: 10.0,
            adjustable: Adjustability::Both,
            cost_up_hr: 8.0,
            cost_up_ar: 16.0,
            cost_down_hr: 1.0,
            cost_down_ar: 2.0,
            kind: String::new(),
            participation: 1.0,
            connected: true,
        });
        net.add_load(Load {
            id: LoadId::new(0),
            name: "L1".into(),
            node: b,
            value_mw: 50.0,
            shed_cost: 3000.0,
            shed_pct: 50.0,
            curative_pct: 0.0,
        });
        net
    }

    fn builder_for(net: &Network) -> LpBuilder {
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let mut b = LpBuilder::new(ComputationOptions::default(), dispatch, 0.0);
        b.build_variables(net, CostStage::Hr);
        b.build_bilans(net);
        b
    }

    #[test]
    fn test_variable_bounds_follow_schedule() {
        let net = two_node_net();
        let b = builder_for(&net);
        let pair = b.registry.gen[&GenId::new(0)];
        assert!((b.problem.columns[pair.up].upper - 70.0).abs() < 1e-12);
        assert!((b.problem.columns[pair.down].upper - 40.0).abs() < 1e-12);
        // HR costs, noise-floored
        assert!((b.problem.columns[pair.up].cost - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_shed_cap_from_percentage() {
        let net = two_node_net();
        let b = builder_for(&net);
        let shed = b.registry.load_shed[&LoadId::new(0)];
        assert!((b.problem.columns[shed].upper - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_balanced_bilan_has_zero_rhs() {
        let net = two_node_net();
        let b = builder_for(&net);
        // One zone: one bilan row, generation 50 = load 50
        assert_eq!(b.problem.num_rows(), 1);
        assert!(b.problem.rows[0].rhs.abs() < 1e-12);
    }

    #[test]
    fn test_loss_rate_raises_bilan_rhs() {
        let net = two_node_net();
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let mut b = LpBuilder::new(ComputationOptions::default(), dispatch, 0.02);
        b.build_variables(&net, CostStage::Hr);
        b.build_bilans(&net);
        // RHS = 50·1.02 − 50 = 1 MW of assumed losses
        assert!((b.problem.rows[0].rhs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dispatch_state_without_outcome() {
        let net = two_node_net();
        let b = builder_for(&net);
        let state = b.dispatch_state(&net, None);
        assert_eq!(state.gen_p[0], 50.0);
        assert_eq!(state.load_shed[0], 0.0);

        let inj = state.base_injections(&net);
        assert!((inj[0] - 50.0).abs() < 1e-12);
        assert!((inj[1] + 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_without_redispatch_freezes_generators() {
        let net = two_node_net();
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let mut opts = ComputationOptions::default();
        opts.mode = ComputationMode::OpfWithoutRedispatch;
        let mut b = LpBuilder::new(opts, dispatch, 0.0);
        b.build_variables(&net, CostStage::Hr);
        let pair = b.registry.gen[&GenId::new(0)];
        assert_eq!(b.problem.columns[pair.up].upper, 0.0);
        assert_eq!(b.problem.columns[pair.down].upper, 0.0);
    }
}
