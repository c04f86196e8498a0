//! Per-scenario deltas with transactional apply/rollback.
//!
//! A [`Variant`] is a bag of tagged updates over the base scenario. Applying
//! one journals every prior value; rolling back replays the journal in
//! reverse, restoring integer and boolean fields bit-identically and floats
//! verbatim (the journal stores the original bits, not a recomputation).
//!
//! Failing to apply an update (outaging an already-open branch, unknown
//! element) rolls back whatever was already applied and reports the variant
//! as unusable; the caller maps this to the `VARIANT_IGNORED` status.

use thiserror::Error;

use crate::monitored::{MonitoredElement, ThresholdKind};
use crate::network::Network;
use crate::{BranchId, ContingencyId, ContingencySet, GenId, HvdcId, LoadId, MonitorId, PstId, ZoneId};

#[derive(Debug, Error)]
pub enum VariantError {
    #[error("Variant {variant}: branch {branch} is already disconnected")]
    BranchAlreadyOpen { variant: i32, branch: String },

    #[error("Variant {variant}: generator {generator} is already disconnected")]
    GeneratorAlreadyOff { variant: i32, generator: String },

    #[error("Variant {variant}: element handle out of range")]
    UnknownElement { variant: i32 },
}

/// One tagged update inside a variant stream record.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantDelta {
    GeneratorUnavailable(GenId),
    BranchUnavailable(BranchId),
    ImposedProduction(GenId, f64),
    GeneratorPmax(GenId, f64),
    GeneratorPmin(GenId, f64),
    ZoneExchange(ZoneId, f64),
    ZoneProductionBalance(ZoneId, f64),
    LoadValue(LoadId, f64),
    LoadShedCost(LoadId, f64),
    CostUpHr(GenId, f64),
    CostDownHr(GenId, f64),
    CostUpAr(GenId, f64),
    CostDownAr(GenId, f64),
    HvdcPmin(HvdcId, f64),
    HvdcPmax(HvdcId, f64),
    HvdcSetpoint(HvdcId, f64),
    PstSetpoint(PstId, f64),
    ContingencyProbability(ContingencyId, f64),
    Threshold(MonitorId, ThresholdKind, f64),
}

/// One scenario: an index plus its deltas, in input order.
#[derive(Debug, Clone, Default)]
pub struct Variant {
    /// Variant number from the stream; -1 denotes the base variant applied
    /// irreversibly before the loop.
    pub index: i32,
    pub deltas: Vec<VariantDelta>,
}

impl Variant {
    pub fn new(index: i32) -> Self {
        Self {
            index,
            deltas: Vec::new(),
        }
    }

    pub fn is_base(&self) -> bool {
        self.index < 0
    }

    /// Key identifying the topology this variant produces; variants sharing
    /// a key are grouped so B′ is refactored once per group.
    pub fn topology_key(&self) -> Vec<BranchId> {
        let mut opened: Vec<BranchId> = self
            .deltas
            .iter()
            .filter_map(|d| match d {
                VariantDelta::BranchUnavailable(b) => Some(*b),
                _ => None,
            })
            .collect();
        opened.sort_unstable();
        opened.dedup();
        opened
    }
}

/// Journal entry restoring one mutated attribute.
#[derive(Debug, Clone)]
enum Restore {
    BranchConnected(BranchId, bool),
    GeneratorConnected(GenId, bool),
    GeneratorP0(GenId, f64),
    GeneratorPmax(GenId, f64),
    GeneratorPmin(GenId, f64),
    GeneratorCostUpHr(GenId, f64),
    GeneratorCostDownHr(GenId, f64),
    GeneratorCostUpAr(GenId, f64),
    GeneratorCostDownAr(GenId, f64),
    ZoneExchange(ZoneId, f64),
    ZoneProductionBalance(ZoneId, f64),
    LoadValue(LoadId, f64),
    LoadShedCost(LoadId, f64),
    HvdcPmin(HvdcId, f64),
    HvdcPmax(HvdcId, f64),
    HvdcSetpoint(HvdcId, f64),
    PstSetpoint(PstId, f64),
    ContingencyProbability(ContingencyId, Option<f64>),
    Threshold(MonitorId, ThresholdKind, Option<f64>),
}

/// The journal of an applied variant. Dropping it without calling
/// [`VariantOverlay::rollback`] leaves the mutations in place (used for the
/// irreversible base variant).
#[derive(Debug, Default)]
pub struct VariantOverlay {
    journal: Vec<Restore>,
}

impl VariantOverlay {
    /// Apply a variant to the model, journaling prior values. On error the
    /// partially applied deltas are rolled back before returning.
    pub fn apply(
        network: &mut Network,
        monitors: &mut [MonitoredElement],
        contingencies: &mut ContingencySet,
        variant: &Variant,
    ) -> Result<VariantOverlay, VariantError> {
        let mut overlay = VariantOverlay::default();
        match overlay.apply_inner(network, monitors, contingencies, variant) {
            Ok(()) => Ok(overlay),
            Err(e) => {
                overlay.rollback(network, monitors, contingencies);
                Err(e)
            }
        }
    }

    fn apply_inner(
        &mut self,
        network: &mut Network,
        monitors: &mut [MonitoredElement],
        contingencies: &mut ContingencySet,
        variant: &Variant,
    ) -> Result<(), VariantError> {
        for delta in &variant.deltas {
            match *delta {
                VariantDelta::BranchUnavailable(id) => {
                    let branch = network
                        .branches
                        .get_mut(id.value())
                        .ok_or(VariantError::UnknownElement {
                            variant: variant.index,
                        })?;
                    if !branch.connected {
                        return Err(VariantError::BranchAlreadyOpen {
                            variant: variant.index,
                            branch: branch.name.clone(),
                        });
                    }
                    self.journal.push(Restore::BranchConnected(id, true));
                    branch.connected = false;
                }
                VariantDelta::GeneratorUnavailable(id) => {
                    let gen = network.generators.get_mut(id.value()).ok_or(
                        VariantError::UnknownElement {
                            variant: variant.index,
                        },
                    )?;
                    if !gen.connected {
                        return Err(VariantError::GeneratorAlreadyOff {
                            variant: variant.index,
                            generator: gen.name.clone(),
                        });
                    }
                    self.journal.push(Restore::GeneratorConnected(id, true));
                    gen.connected = false;
                }
                VariantDelta::ImposedProduction(id, value) => {
                    let gen = self.gen_mut(network, id, variant.index)?;
                    self.journal.push(Restore::GeneratorP0(id, gen.p0_mw));
                    network.generators[id.value()].p0_mw = value;
                }
                VariantDelta::GeneratorPmax(id, value) => {
                    let gen = self.gen_mut(network, id, variant.index)?;
                    self.journal.push(Restore::GeneratorPmax(id, gen.pmax_mw));
                    network.generators[id.value()].pmax_mw = value;
                }
                VariantDelta::GeneratorPmin(id, value) => {
                    let gen = self.gen_mut(network, id, variant.index)?;
                    self.journal.push(Restore::GeneratorPmin(id, gen.pmin_mw));
                    network.generators[id.value()].pmin_mw = value;
                }
                VariantDelta::CostUpHr(id, value) => {
                    let gen = self.gen_mut(network, id, variant.index)?;
                    self.journal
                        .push(Restore::GeneratorCostUpHr(id, gen.cost_up_hr));
                    network.generators[id.value()].cost_up_hr = value;
                }
                VariantDelta::CostDownHr(id, value) => {
                    let gen = self.gen_mut(network, id, variant.index)?;
                    self.journal
                        .push(Restore::GeneratorCostDownHr(id, gen.cost_down_hr));
                    network.generators[id.value()].cost_down_hr = value;
                }
                VariantDelta::CostUpAr(id, value) => {
                    let gen = self.gen_mut(network, id, variant.index)?;
                    self.journal
                        .push(Restore::GeneratorCostUpAr(id, gen.cost_up_ar));
                    network.generators[id.value()].cost_up_ar = value;
                }
                VariantDelta::CostDownAr(id, value) => {
                    let gen = self.gen_mut(network, id, variant.index)?;
                    self.journal
                        .push(Restore::GeneratorCostDownAr(id, gen.cost_down_ar));
                    network.generators[id.value()].cost_down_ar = value;
                }
                VariantDelta::ZoneExchange(id, value) => {
                    let zone = network
                        .zones
                        .get_mut(id.value())
                        .ok_or(VariantError::UnknownElement {
                            variant: variant.index,
                        })?;
                    self.journal.push(Restore::ZoneExchange(id, zone.exchange_mw));
                    zone.exchange_mw = value;
                }
                VariantDelta::ZoneProductionBalance(id, value) => {
                    let zone = network
                        .zones
                        .get_mut(id.value())
                        .ok_or(VariantError::UnknownElement {
                            variant: variant.index,
                        })?;
                    self.journal
                        .push(Restore::ZoneProductionBalance(id, zone.production_balance_mw));
                    zone.production_balance_mw = value;
                }
                VariantDelta::LoadValue(id, value) => {
                    let load = network
                        .loads
                        .get_mut(id.value())
                        .ok_or(VariantError::UnknownElement {
                            variant: variant.index,
                        })?;
                    self.journal.push(Restore::LoadValue(id, load.value_mw));
                    load.value_mw = value;
                }
                VariantDelta::LoadShedCost(id, value) => {
                    let load = network
                        .loads
                        .get_mut(id.value())
                        .ok_or(VariantError::UnknownElement {
                            variant: variant.index,
                        })?;
                    self.journal.push(Restore::LoadShedCost(id, load.shed_cost));
                    load.shed_cost = value;
                }
                VariantDelta::HvdcPmin(id, value) => {
                    let link = self.hvdc_mut(network, id, variant.index)?;
                    self.journal.push(Restore::HvdcPmin(id, link.pmin_mw));
                    network.hvdc_links[id.value()].pmin_mw = value;
                }
                VariantDelta::HvdcPmax(id, value) => {
                    let link = self.hvdc_mut(network, id, variant.index)?;
                    self.journal.push(Restore::HvdcPmax(id, link.pmax_mw));
                    network.hvdc_links[id.value()].pmax_mw = value;
                }
                VariantDelta::HvdcSetpoint(id, value) => {
                    let link = self.hvdc_mut(network, id, variant.index)?;
                    self.journal.push(Restore::HvdcSetpoint(id, link.setpoint_mw));
                    network.hvdc_links[id.value()].setpoint_mw = value;
                }
                VariantDelta::PstSetpoint(id, value) => {
                    let pst = network.phase_shifters.get_mut(id.value()).ok_or(
                        VariantError::UnknownElement {
                            variant: variant.index,
                        },
                    )?;
                    self.journal.push(Restore::PstSetpoint(id, pst.setpoint_mw));
                    pst.setpoint_mw = value;
                }
                VariantDelta::ContingencyProbability(id, value) => {
                    if id.value() >= contingencies.len() {
                        return Err(VariantError::UnknownElement {
                            variant: variant.index,
                        });
                    }
                    let c = contingencies.get_mut(id);
                    self.journal
                        .push(Restore::ContingencyProbability(id, c.probability));
                    c.probability = Some(value);
                }
                VariantDelta::Threshold(id, kind, value) => {
                    let monitor =
                        monitors
                            .get_mut(id.value())
                            .ok_or(VariantError::UnknownElement {
                                variant: variant.index,
                            })?;
                    self.journal
                        .push(Restore::Threshold(id, kind, monitor.thresholds.get(kind)));
                    // The unset sentinel disables monitoring in that regime
                    let stored = if value >= crate::THRESHOLD_UNSET {
                        None
                    } else {
                        Some(value)
                    };
                    monitor.thresholds.set(kind, stored);
                }
            }
        }
        Ok(())
    }

    fn gen_mut<'a>(
        &self,
        network: &'a mut Network,
        id: GenId,
        variant: i32,
    ) -> Result<&'a mut crate::network::Generator, VariantError> {
        network
            .generators
            .get_mut(id.value())
            .ok_or(VariantError::UnknownElement { variant })
    }

    fn hvdc_mut<'a>(
        &self,
        network: &'a mut Network,
        id: HvdcId,
        variant: i32,
    ) -> Result<&'a mut crate::network::HvdcLink, VariantError> {
        network
            .hvdc_links
            .get_mut(id.value())
            .ok_or(VariantError::UnknownElement { variant })
    }

    /// Replay the journal in reverse, restoring every mutated attribute.
    pub fn rollback(
        &mut self,
        network: &mut Network,
        monitors: &mut [MonitoredElement],
        contingencies: &mut ContingencySet,
    ) {
        while let Some(entry) = self.journal.pop() {
            match entry {
                Restore::BranchConnected(id, v) => network.branches[id.value()].connected = v,
                Restore::GeneratorConnected(id, v) => {
                    network.generators[id.value()].connected = v
                }
                Restore::GeneratorP0(id, v) => network.generators[id.value()].p0_mw = v,
                Restore::GeneratorPmax(id, v) => network.generators[id.value()].pmax_mw = v,
                Restore::GeneratorPmin(id, v) => network.generators[id.value()].pmin_mw = v,
                Restore::GeneratorCostUpHr(id, v) => network.generators[id.value()].cost_up_hr = v,
                Restore::GeneratorCostDownHr(id, v) => {
                    network.generators[id.value()].cost_down_hr = v
                }
                Restore::GeneratorCostUpAr(id, v) => network.generators[id.value()].cost_up_ar = v,
                Restore::GeneratorCostDownAr(id, v) => {
                    network.generators[id.value()].cost_down_ar = v
                }
                Restore::ZoneExchange(id, v) => network.zones[id.value()].exchange_mw = v,
                Restore::ZoneProductionBalance(id, v) => {
                    network.zones[id.value()].production_balance_mw = v
                }
                Restore::LoadValue(id, v) => network.loads[id.value()].value_mw = v,
                Restore::LoadShedCost(id, v) => network.loads[id.value()].shed_cost = v,
                Restore::HvdcPmin(id, v) => network.hvdc_links[id.value()].pmin_mw = v,
                Restore::HvdcPmax(id, v) => network.hvdc_links[id.value()].pmax_mw = v,
                Restore::HvdcSetpoint(id, v) => network.hvdc_links[id.value()].setpoint_mw = v,
                Restore::PstSetpoint(id, v) => network.phase_shifters[id.value()].setpoint_mw = v,
                Restore::ContingencyProbability(id, v) => {
                    contingencies.get_mut(id).probability = v
                }
                Restore::Threshold(id, kind, v) => monitors[id.value()].thresholds.set(kind, v),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Adjustability, BranchKind, Generator, Load};
    use crate::Contingency;

    fn small_model() -> (Network, Vec<MonitoredElement>, ContingencySet) {
        let mut net = Network::new("t");
        let a = net.add_node("A");
        let b = net.add_node("B");
        let z = net.add_zone("Z", a);
        net.assign_zone(a, z);
        net.assign_zone(b, z);
        let br = net.add_branch("A-B", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_generator(Generator {
            id: GenId::new(0),
            name: "G1".into(),
            node: a,
            p0_mw: 50.0,
            pmin_mw: 0.0,
            pmax_mw: 100.0,
            half_band_mw: 10.0,
            adjustable: Adjustability::Both,
            cost_up_hr: 12.5,
            cost_up_ar: 25.0,
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
            shed_pct: 100.0,
            curative_pct: 0.0,
        });
        let monitors = vec![MonitoredElement::single(MonitorId::new(0), "A-B", br)];
        let mut contingencies = ContingencySet::new();
        contingencies.add(Contingency::new(ContingencyId::new(0), "c0"));
        (net, monitors, contingencies)
    }

    #[test]
    fn test_apply_then_rollback_restores_everything() {
        let (mut net, mut monitors, mut contingencies) = small_model();
        let p0_before = net.generators[0].p0_mw;
        let threshold_before = monitors[0].thresholds.get(ThresholdKind::N);

        let mut variant = Variant::new(3);
        variant.deltas = vec![
            VariantDelta::ImposedProduction(GenId::new(0), 80.0),
            VariantDelta::LoadValue(LoadId::new(0), 80.0),
            VariantDelta::Threshold(MonitorId::new(0), ThresholdKind::N, 120.0),
            VariantDelta::BranchUnavailable(BranchId::new(0)),
        ];

        let mut overlay =
            VariantOverlay::apply(&mut net, &mut monitors, &mut contingencies, &variant).unwrap();
        assert_eq!(net.generators[0].p0_mw, 80.0);
        assert!(!net.branches[0].connected);
        assert_eq!(monitors[0].thresholds.get(ThresholdKind::N), Some(120.0));

        overlay.rollback(&mut net, &mut monitors, &mut contingencies);
        assert_eq!(net.generators[0].p0_mw.to_bits(), p0_before.to_bits());
        assert!(net.branches[0].connected);
        assert_eq!(monitors[0].thresholds.get(ThresholdKind::N), threshold_before);
    }

    #[test]
    fn test_double_outage_is_rejected_and_rolled_back() {
        let (mut net, mut monitors, mut contingencies) = small_model();
        let mut variant = Variant::new(1);
        variant.deltas = vec![
            VariantDelta::ImposedProduction(GenId::new(0), 75.0),
            VariantDelta::BranchUnavailable(BranchId::new(0)),
            VariantDelta::BranchUnavailable(BranchId::new(0)),
        ];
        let err = VariantOverlay::apply(&mut net, &mut monitors, &mut contingencies, &variant)
            .unwrap_err();
        assert!(matches!(err, VariantError::BranchAlreadyOpen { .. }));
        // Everything restored, including the delta applied before the failure
        assert_eq!(net.generators[0].p0_mw, 50.0);
        assert!(net.branches[0].connected);
    }

    #[test]
    fn test_threshold_sentinel_clears_limit() {
        let (mut net, mut monitors, mut contingencies) = small_model();
        monitors[0].thresholds.set(ThresholdKind::N, Some(100.0));
        let mut variant = Variant::new(2);
        variant.deltas = vec![VariantDelta::Threshold(
            MonitorId::new(0),
            ThresholdKind::N,
            crate::THRESHOLD_UNSET,
        )];
        let _overlay =
            VariantOverlay::apply(&mut net, &mut monitors, &mut contingencies, &variant).unwrap();
        assert_eq!(monitors[0].thresholds.get(ThresholdKind::N), None);
    }

    #[test]
    fn test_topology_key_groups_variants() {
        let mut v1 = Variant::new(0);
        v1.deltas = vec![
            VariantDelta::BranchUnavailable(BranchId::new(2)),
            VariantDelta::BranchUnavailable(BranchId::new(1)),
        ];
        let mut v2 = Variant::new(1);
        v2.deltas = vec![
            VariantDelta::BranchUnavailable(BranchId::new(1)),
            VariantDelta::BranchUnavailable(BranchId::new(2)),
            VariantDelta::LoadValue(LoadId::new(0), 10.0),
        ];
        assert_eq!(v1.topology_key(), v2.topology_key());

        let v3 = Variant::new(2);
        assert_ne!(v1.topology_key(), v3.topology_key());
    }
}
