//! Curative variables, their bound linkages, and parade activation.
//!
//! Curative resources only act after their owning contingency fires, so
//! their columns are created lazily, the first time the screener brings the
//! contingency into the problem. Bound rows tie the curative magnitudes to
//! whatever room the preventive solution leaves:
//!
//! ```text
//! Pmin ≤ P_prev + ΔP_cur ≤ Pmax            generators / PSTs / HVDCs
//! ΔD_cur ≤ (value − preventive shed) × pct loads
//! ```
//!
//! All bound rows are scaled down so their coefficients stay comparable to
//! the transit-cut coefficients.
//!
//! Parades get one binary δ each, an exclusivity row `Σ δ = 1` per father,
//! and an activation-cost hint that nudges the MIP towards parades with few
//! active cuts.

use metrix_core::{Contingency, ContingencyId, ContingencySet, CurativeElement, Network, ZoneId};
use metrix_solver::RowSense;
use tracing::debug;

use crate::constants::{COST_PARADE, CURATIVE_ROW_SCALE};
use crate::lp::{LpBuilder, VarPair};

impl LpBuilder {
    /// Create the curative columns and bound rows of a contingency (father
    /// or parade). Idempotent.
    pub fn ensure_curative_variables(&mut self, network: &Network, contingency: &Contingency) {
        if !self.curative_done.insert(contingency.id) {
            return;
        }
        let cid = contingency.id;
        let scale = CURATIVE_ROW_SCALE;

        for (elem_idx, element) in contingency.curative_elements.iter().enumerate() {
            match *element {
                CurativeElement::Generator(gid) => {
                    if contingency.tripped_generators.contains(&gid) {
                        continue;
                    }
                    let gen = network.generator(gid);
                    if !gen.connected || !gen.adjustable.curative() {
                        continue;
                    }
                    let room = (gen.pmax_mw - gen.pmin_mw).max(0.0);
                    let up = self.problem.add_column(
                        format!("gen_cur_up::{}::{}", contingency.name, gen.name),
                        0.0,
                        room,
                        gen.cost_up_ar.max(self.options.noise_cost),
                    );
                    let down = self.problem.add_column(
                        format!("gen_cur_down::{}::{}", contingency.name, gen.name),
                        0.0,
                        room,
                        gen.cost_down_ar.max(self.options.noise_cost),
                    );
                    self.registry.curative_gen.insert((cid, gid), VarPair { up, down });

                    let schedule = self.dispatch[gid.value()];
                    let mut upper = vec![(up, scale)];
                    let mut lower = vec![(down, -scale)];
                    if let Some(prev) = self.registry.gen.get(&gid) {
                        upper.push((prev.up, scale));
                        upper.push((prev.down, -scale));
                        lower.push((prev.up, scale));
                        lower.push((prev.down, -scale));
                    }
                    self.problem.add_row(
                        format!("cur_max::{}::{}", contingency.name, gen.name),
                        upper,
                        RowSense::Le,
                        scale * (gen.pmax_mw - schedule),
                    );
                    self.problem.add_row(
                        format!("cur_min::{}::{}", contingency.name, gen.name),
                        lower,
                        RowSense::Ge,
                        scale * (gen.pmin_mw - schedule),
                    );
                    self.maybe_gate_activation(contingency, elem_idx, up, down, room);
                }
                CurativeElement::Load(lid) => {
                    let load = network.load(lid);
                    if load.curative_pct <= 0.0 {
                        continue;
                    }
                    let pct = load.curative_pct / 100.0;
                    let cap = pct * load.value_mw.abs();
                    let up = self.problem.add_column(
                        format!("load_cur_up::{}::{}", contingency.name, load.name),
                        0.0,
                        cap,
                        load.shed_cost.max(self.options.noise_cost),
                    );
                    let down = self.problem.add_column(
                        format!("load_cur_down::{}::{}", contingency.name, load.name),
                        0.0,
                        cap,
                        self.options.noise_cost,
                    );
                    self.registry.curative_load.insert((cid, lid), VarPair { up, down });

                    let mut terms = vec![(up, scale), (down, scale)];
                    if let Some(&shed) = self.registry.load_shed.get(&lid) {
                        terms.push((shed, scale * pct));
                    }
                    self.problem.add_row(
                        format!("cur_shed::{}::{}", contingency.name, load.name),
                        terms,
                        RowSense::Le,
                        scale * cap,
                    );
                    self.maybe_gate_activation(contingency, elem_idx, up, down, cap);
                }
                CurativeElement::PhaseShifter(pid)
                | CurativeElement::FictitiousPhaseShifter(pid) => {
                    let pst = network.phase_shifter(pid);
                    let room = (pst.pmax_mw - pst.pmin_mw).max(0.0);
                    let up = self.problem.add_column(
                        format!("pst_cur_up::{}::{}", contingency.name, pst.name),
                        0.0,
                        room,
                        self.options.noise_cost,
                    );
                    let down = self.problem.add_column(
                        format!("pst_cur_down::{}::{}", contingency.name, pst.name),
                        0.0,
                        room,
                        self.options.noise_cost,
                    );
                    self.registry.curative_pst.insert((cid, pid), VarPair { up, down });

                    let mut upper = vec![(up, scale), (down, -scale)];
                    let mut lower = vec![(up, scale), (down, -scale)];
                    if let Some(prev) = self.registry.pst.get(&pid) {
                        upper.push((prev.up, scale));
                        upper.push((prev.down, -scale));
                        lower.push((prev.up, scale));
                        lower.push((prev.down, -scale));
                    }
                    self.problem.add_row(
                        format!("cur_max::{}::{}", contingency.name, pst.name),
                        upper,
                        RowSense::Le,
                        scale * (pst.pmax_mw - pst.setpoint_mw),
                    );
                    self.problem.add_row(
                        format!("cur_min::{}::{}", contingency.name, pst.name),
                        lower,
                        RowSense::Ge,
                        scale * (pst.pmin_mw - pst.setpoint_mw),
                    );

                    // Fictitious PSTs (HVDC AC-emulation) are always gated:
                    // their binary is what keeps them out of the base case.
                    if matches!(element, CurativeElement::FictitiousPhaseShifter(_)) {
                        self.gate_activation(contingency, elem_idx, up, down, room);
                    } else {
                        self.maybe_gate_activation(contingency, elem_idx, up, down, room);
                    }
                }
                CurativeElement::Hvdc(hid) => {
                    if contingency.tripped_hvdcs.contains(&hid) {
                        continue;
                    }
                    let link = network.hvdc(hid);
                    if !link.connected {
                        continue;
                    }
                    let room = (link.pmax_mw - link.pmin_mw).max(0.0);
                    let up = self.problem.add_column(
                        format!("hvdc_cur_up::{}::{}", contingency.name, link.name),
                        0.0,
                        room,
                        self.options.noise_cost,
                    );
                    let down = self.problem.add_column(
                        format!("hvdc_cur_down::{}::{}", contingency.name, link.name),
                        0.0,
                        room,
                        self.options.noise_cost,
                    );
                    self.registry.curative_hvdc.insert((cid, hid), VarPair { up, down });

                    let mut upper = vec![(up, scale), (down, -scale)];
                    let mut lower = vec![(up, scale), (down, -scale)];
                    if let Some(prev) = self.registry.hvdc.get(&hid) {
                        upper.push((prev.up, scale));
                        upper.push((prev.down, -scale));
                        lower.push((prev.up, scale));
                        lower.push((prev.down, -scale));
                    }
                    self.problem.add_row(
                        format!("cur_max::{}::{}", contingency.name, link.name),
                        upper,
                        RowSense::Le,
                        scale * (link.pmax_mw - link.setpoint_mw),
                    );
                    self.problem.add_row(
                        format!("cur_min::{}::{}", contingency.name, link.name),
                        lower,
                        RowSense::Ge,
                        scale * (link.pmin_mw - link.setpoint_mw),
                    );
                    self.maybe_gate_activation(contingency, elem_idx, up, down, room);
                }
            }
        }

        self.build_zone_curative_caps(network, contingency);

        debug!(
            contingency = %contingency.name,
            columns = self.problem.num_columns(),
            "curative variables ready"
        );
    }

    /// γ binary gating the curative magnitudes of one element, created when
    /// the action-count cap asks for it.
    fn maybe_gate_activation(
        &mut self,
        contingency: &Contingency,
        elem_idx: usize,
        up: usize,
        down: usize,
        bound: f64,
    ) {
        if self.options.max_curative_actions_per_parade.is_some() {
            self.gate_activation(contingency, elem_idx, up, down, bound);
        }
    }

    fn gate_activation(
        &mut self,
        contingency: &Contingency,
        elem_idx: usize,
        up: usize,
        down: usize,
        bound: f64,
    ) {
        let gamma = self.problem.add_binary_column(
            format!("cur_act::{}::{}", contingency.name, elem_idx),
            0.0,
        );
        self.registry
            .curative_activation
            .insert((contingency.id, elem_idx), gamma);
        // γ = 0 forces both magnitudes to zero
        let scale = CURATIVE_ROW_SCALE;
        self.problem.add_row(
            format!("cur_gate::{}::{}", contingency.name, elem_idx),
            vec![(up, scale), (down, scale), (gamma, -scale * bound.max(1.0))],
            RowSense::Le,
            0.0,
        );
    }

    /// Optional per-zone cap on curative downward redispatch under this
    /// contingency.
    fn build_zone_curative_caps(&mut self, network: &Network, contingency: &Contingency) {
        let Some(cap) = self.options.curative_redispatch_cap_mw else {
            return;
        };
        let mut by_zone: std::collections::HashMap<ZoneId, Vec<(usize, f64)>> =
            std::collections::HashMap::new();
        for element in &contingency.curative_elements {
            if let CurativeElement::Generator(gid) = element {
                if let Some(pair) = self.registry.curative_gen.get(&(contingency.id, *gid)) {
                    if let Some(zone) = network.node(network.generator(*gid).node).zone {
                        by_zone.entry(zone).or_default().push((pair.down, 1.0));
                    }
                }
            }
        }
        for (zone, terms) in by_zone {
            self.problem.add_row(
                format!(
                    "cur_cap::{}::{}",
                    network.zone(zone).name,
                    contingency.name
                ),
                terms,
                RowSense::Le,
                cap,
            );
        }
    }

    /// Introduce a father's parade family: one binary δ per parade, its
    /// curative variables, the per-parade action-count cap, and the
    /// exclusivity row `Σ δ = 1`. Returns the parade ids. Idempotent.
    pub fn ensure_parade_family(
        &mut self,
        network: &Network,
        contingencies: &ContingencySet,
        father_id: ContingencyId,
    ) -> Vec<ContingencyId> {
        let father = contingencies.get(father_id);
        let parade_ids = father.parades.clone();
        if parade_ids.is_empty() || self.exclusivity_rows.contains_key(&father_id) {
            return parade_ids;
        }

        let probability = father.probability.unwrap_or(1.0);
        let already_active = self.cuts_by_father.get(&father_id).copied().unwrap_or(0);
        let activation_cost = COST_PARADE * probability * (1.0 + already_active as f64);

        let mut exclusivity: Vec<(usize, f64)> = Vec::with_capacity(parade_ids.len());
        for &pid in &parade_ids {
            let parade = contingencies.get(pid);
            let delta = self
                .problem
                .add_binary_column(format!("parade::{}", parade.name), activation_cost);
            self.registry.parade_activation.insert(pid, delta);
            exclusivity.push((delta, 1.0));

            self.ensure_curative_variables(network, parade);

            if let Some(cap) = self.options.max_curative_actions_per_parade {
                let gammas: Vec<(usize, f64)> = parade
                    .curative_elements
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, _)| {
                        self.registry
                            .curative_activation
                            .get(&(pid, idx))
                            .map(|&g| (g, 1.0))
                    })
                    .collect();
                if !gammas.is_empty() {
                    let n_elem = gammas.len() as f64;
                    let mut terms = gammas;
                    terms.push((delta, n_elem));
                    // Active parade: Σγ ≤ cap; inactive: the δ slack frees it
                    self.problem.add_row(
                        format!("parade_cap::{}", parade.name),
                        terms,
                        RowSense::Le,
                        cap as f64 + n_elem,
                    );
                }
            }
        }

        let row = self.problem.add_row(
            format!("parade_excl::{}", father.name),
            exclusivity,
            RowSense::Eq,
            1.0,
        );
        self.exclusivity_rows.insert(father_id, row);

        debug!(
            father = %father.name,
            parades = parade_ids.len(),
            "parade family entered the problem"
        );
        parade_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::CostStage;
    use crate::options::ComputationOptions;
    use metrix_core::{
        Adjustability, BranchKind, Generator, GenId, Load, LoadId,
    };

    fn net_with_curative() -> (Network, ContingencySet) {
        let mut net = Network::new("t");
        let a = net.add_node("A");
        let b = net.add_node("B");
        let z = net.add_zone("Z", a);
        net.assign_zone(a, z);
        net.assign_zone(b, z);
        net.add_branch("A-B1", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_branch("A-B2", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_generator(Generator {
            id: GenId::new(0),
            name: "G1".into(),
            node: a,
            p0_mw: 60.0,
            pmin_mw: 0.0,
            pmax_mw: 100.0,
            half_band_mw: 10.0,
            adjustable: Adjustability::Both,
            cost_up_hr: 10.0,
            cost_up_ar: 20.0,
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
            value_mw: 60.0,
            shed_cost: 3000.0,
            shed_pct: 100.0,
            curative_pct: 40.0,
        });

        let mut set = ContingencySet::new();
        let mut c = Contingency::new(ContingencyId::new(0), "trip A-B1");
        c.tripped_branches = vec![metrix_core::BranchId::new(0)];
        c.curative_elements = vec![
            CurativeElement::Generator(GenId::new(0)),
            CurativeElement::Load(LoadId::new(0)),
        ];
        set.add(c);
        (net, set)
    }

    fn builder(net: &Network) -> LpBuilder {
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let mut b = LpBuilder::new(ComputationOptions::default(), dispatch, 0.0);
        b.build_variables(net, CostStage::Ar);
        b
    }

    #[test]
    fn test_curative_variables_created_once() {
        let (net, set) = net_with_curative();
        let mut b = builder(&net);
        let before = b.problem.num_columns();
        b.ensure_curative_variables(&net, set.get(ContingencyId::new(0)));
        let after = b.problem.num_columns();
        assert!(after > before);
        b.ensure_curative_variables(&net, set.get(ContingencyId::new(0)));
        assert_eq!(b.problem.num_columns(), after, "idempotent");
    }

    #[test]
    fn test_curative_load_cap_follows_percentage() {
        let (net, set) = net_with_curative();
        let mut b = builder(&net);
        b.ensure_curative_variables(&net, set.get(ContingencyId::new(0)));
        let pair = b.registry.curative_load[&(ContingencyId::new(0), LoadId::new(0))];
        assert!((b.problem.columns[pair.up].upper - 24.0).abs() < 1e-12);
    }

    #[test]
    fn test_parade_family_gets_exclusivity_row() {
        let (net, mut set) = net_with_curative();
        let father = ContingencyId::new(0);
        let mut p1 = Contingency::new(ContingencyId::new(0), "p1");
        p1.tripped_branches = vec![metrix_core::BranchId::new(0), metrix_core::BranchId::new(1)];
        p1.father = Some(father);
        set.add(p1);
        set.complete_parade_families();

        let mut b = builder(&net);
        let parades = b.ensure_parade_family(&net, &set, father);
        assert_eq!(parades.len(), 2, "declared parade + do-nothing");
        assert!(b.problem.is_mip());

        let row = &b.problem.rows[b.exclusivity_rows[&father]];
        assert_eq!(row.sense, RowSense::Eq);
        assert_eq!(row.rhs, 1.0);
        assert_eq!(row.terms.len(), 2);

        // Idempotent
        let again = b.ensure_parade_family(&net, &set, father);
        assert_eq!(again.len(), 2);
        assert_eq!(
            b.registry.parade_activation.len(),
            2,
            "no duplicate activation columns"
        );
    }
}
