//! Violation screening: every monitored element against every valid
//! contingency, plus the base case.
//!
//! The sweep reconstructs post-contingency transits from the solved phases
//! (rank-k correction or pocket factorization, injection deltas for tripped
//! machines and curative actions), compares them against the seasonal
//! thresholds, then ranks, deduplicates and caps the violations before the
//! constraint generator turns them into cuts.

use std::collections::HashSet;

use metrix_core::{
    Contingency, ContingencyId, ContingencySet, CurativeElement, HvdcMode, MonitorId,
    MonitoredElement, Network,
};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::constants::{ACCEPTABLE_DIFF, DEDUP_ABSOLUTE_MW, DEDUP_RELATIVE};
use crate::lp::DispatchState;
use crate::options::ComputationOptions;
use crate::sensitivity::{SensitivityEngine, SensitivityError};

/// Regime of a violated constraint, in emission priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ViolationKind {
    /// Base case (N)
    BaseCase,
    /// Before any curative action (ITAM regime)
    BeforeCurative,
    /// Post-contingency permanent regime
    Contingency,
    /// Under an activated parade
    Parade,
}

/// One violated (monitor, contingency) pair.
#[derive(Debug, Clone)]
pub struct Violation {
    pub monitor: MonitorId,
    pub contingency: Option<ContingencyId>,
    pub transit_mw: f64,
    pub threshold_mw: f64,
    pub overload_mw: f64,
    pub kind: ViolationKind,
    /// True when the transit exceeds the positive limit (T > 0)
    pub upper_side: bool,
}

/// Ranked threat on one monitor.
#[derive(Debug, Clone)]
pub struct Threat {
    pub contingency: Option<ContingencyId>,
    pub transit_mw: f64,
    pub threshold_mw: Option<f64>,
}

/// Output of one screening pass.
#[derive(Debug, Default)]
pub struct ScreeningReport {
    pub violations: Vec<Violation>,
    /// Base-case transit per monitor
    pub base_transits: Vec<f64>,
    /// Bounded max-threat ranking per monitor, |transit| descending
    pub threats: Vec<Vec<Threat>>,
    /// Worst pre-curative transit per monitor
    pub before_curative_threats: Vec<Option<Threat>>,
    /// Base-case phases (kept for the loop's reporting)
    pub theta: Vec<f64>,
    /// Count of violations before dedup/caps (diagnostics)
    pub raw_violations: usize,
}

/// Transits of all monitors under one contingency.
struct ContingencySweep {
    id: ContingencyId,
    kind: ViolationKind,
    transits: Vec<Option<f64>>,
    /// Transits with curative contributions withheld (ITAM accounting)
    before_curative: Vec<Option<f64>>,
}

/// Run one screening pass over the current dispatch state.
pub fn screen(
    network: &Network,
    monitors: &[MonitoredElement],
    contingencies: &ContingencySet,
    engine: &SensitivityEngine,
    state: &DispatchState,
    options: &ComputationOptions,
) -> Result<ScreeningReport, SensitivityError> {
    let injections = state.base_injections(network);
    let theta = engine.solve_phases(&injections)?;

    let base_transits: Vec<f64> = monitors
        .iter()
        .map(|m| monitor_transit(network, engine, state, m, None, &theta, false))
        .collect();

    // Which contingencies are screened: fathers without an introduced
    // parade family, plus active parades.
    let screened: Vec<&Contingency> = contingencies
        .contingencies
        .iter()
        .filter(|c| c.valid)
        .filter(|c| {
            if c.is_parade() {
                state.parade_active.get(&c.id).copied().unwrap_or(false)
            } else {
                let introduced = c
                    .parades
                    .iter()
                    .any(|p| state.parade_active.contains_key(p));
                !introduced
            }
        })
        .collect();

    let sweeps: Vec<ContingencySweep> = screened
        .par_iter()
        .map(|c| sweep_contingency(network, monitors, engine, state, c, &injections, options))
        .collect::<Result<Vec<_>, _>>()?;

    let mut report = ScreeningReport {
        base_transits,
        threats: vec![Vec::new(); monitors.len()],
        before_curative_threats: vec![None; monitors.len()],
        theta,
        ..Default::default()
    };

    collect_threats(&mut report, monitors, &sweeps, options);
    let raw = collect_violations(&mut report, monitors, contingencies, &sweeps, state, options);
    report.raw_violations = raw;

    debug!(
        raw,
        emitted = report.violations.len(),
        "screening pass finished"
    );
    Ok(report)
}

/// Transit of one monitor under one contingency at the current state.
/// Used when a cut must be priced for a topology the main sweep did not
/// visit (parades being introduced). `None` when the monitor is
/// de-energized.
pub fn contingency_transit(
    network: &Network,
    engine: &SensitivityEngine,
    state: &DispatchState,
    monitor: &MonitoredElement,
    contingency: &Contingency,
) -> Result<Option<f64>, SensitivityError> {
    if !monitor_live(network, engine, contingency, monitor) {
        return Ok(None);
    }
    let base = state.base_injections(network);
    let inj = contingency_injections(network, engine, state, contingency, &base, true);
    let theta = engine.post_contingency_theta(network, contingency.id, &inj)?;
    Ok(Some(monitor_transit(
        network,
        engine,
        state,
        monitor,
        Some(contingency),
        &theta,
        true,
    )))
}

/// Post-contingency transits of every monitor under one contingency.
fn sweep_contingency(
    network: &Network,
    monitors: &[MonitoredElement],
    engine: &SensitivityEngine,
    state: &DispatchState,
    contingency: &Contingency,
    base_injections: &[f64],
    options: &ComputationOptions,
) -> Result<ContingencySweep, SensitivityError> {
    let kind = if contingency.is_parade() {
        ViolationKind::Parade
    } else {
        ViolationKind::Contingency
    };

    let inj_with = contingency_injections(network, engine, state, contingency, base_injections, true);
    let theta_with = engine.post_contingency_theta(network, contingency.id, &inj_with)?;
    let transits: Vec<Option<f64>> = monitors
        .iter()
        .map(|m| {
            monitor_live(network, engine, contingency, m).then(|| {
                monitor_transit(
                    network,
                    engine,
                    state,
                    m,
                    Some(contingency),
                    &theta_with,
                    true,
                )
            })
        })
        .collect();

    // Pre-curative transits only differ when curative actions are in play
    let has_curative = !contingency.curative_elements.is_empty() && options.use_itam;
    let before_curative = if has_curative {
        let inj_without =
            contingency_injections(network, engine, state, contingency, base_injections, false);
        let theta_without =
            engine.post_contingency_theta(network, contingency.id, &inj_without)?;
        monitors
            .iter()
            .map(|m| {
                monitor_live(network, engine, contingency, m).then(|| {
                    monitor_transit(
                        network,
                        engine,
                        state,
                        m,
                        Some(contingency),
                        &theta_without,
                        false,
                    )
                })
            })
            .collect()
    } else {
        transits.clone()
    };

    trace!(contingency = %contingency.name, "swept");
    Ok(ContingencySweep {
        id: contingency.id,
        kind,
        transits,
        before_curative,
    })
}

/// Injection vector under a contingency: tripped machines removed (with
/// compensation), tripped HVDC pairs undone, and optionally the curative
/// actions applied.
fn contingency_injections(
    network: &Network,
    engine: &SensitivityEngine,
    state: &DispatchState,
    contingency: &Contingency,
    base: &[f64],
    with_curative: bool,
) -> Vec<f64> {
    let mut inj = base.to_vec();
    let compensation = engine
        .prepared(contingency.id)
        .map(|p| p.compensation.as_slice())
        .unwrap_or(&[]);

    for &gid in &contingency.tripped_generators {
        let gen = network.generator(gid);
        if !gen.connected {
            continue;
        }
        let p = state.gen_p[gid.value()];
        inj[gen.node.value()] -= p;
        for &(comp_gid, share) in compensation {
            inj[network.generator(comp_gid).node.value()] += share * p;
        }
    }

    for &hid in &contingency.tripped_hvdcs {
        let link = network.hvdc(hid);
        if !link.connected || link.mode == HvdcMode::Off {
            continue;
        }
        let p = state.hvdc_p[hid.value()];
        inj[link.from.value()] += p;
        inj[link.to.value()] -= p;
    }

    if with_curative {
        for element in &contingency.curative_elements {
            match *element {
                CurativeElement::Generator(gid) => {
                    if let Some(&v) = state.curative_gen.get(&(contingency.id, gid)) {
                        inj[network.generator(gid).node.value()] += v;
                    }
                }
                CurativeElement::Load(lid) => {
                    if let Some(&v) = state.curative_load.get(&(contingency.id, lid)) {
                        let load = network.load(lid);
                        let sign = if load.value_mw >= 0.0 { 1.0 } else { -1.0 };
                        inj[load.node.value()] += sign * v;
                    }
                }
                CurativeElement::PhaseShifter(pid)
                | CurativeElement::FictitiousPhaseShifter(pid) => {
                    if let Some(&v) = state.curative_pst.get(&(contingency.id, pid)) {
                        let branch = network.branch(network.phase_shifter(pid).branch);
                        inj[branch.from.value()] -= v;
                        inj[branch.to.value()] += v;
                    }
                }
                CurativeElement::Hvdc(hid) => {
                    if let Some(&v) = state.curative_hvdc.get(&(contingency.id, hid)) {
                        let link = network.hvdc(hid);
                        inj[link.from.value()] -= v;
                        inj[link.to.value()] += v;
                    }
                }
            }
        }
    }

    inj
}

/// At least one part of the monitor still carries power under the
/// contingency.
fn monitor_live(
    network: &Network,
    engine: &SensitivityEngine,
    contingency: &Contingency,
    monitor: &MonitoredElement,
) -> bool {
    monitor
        .branch_terms()
        .iter()
        .any(|&(bid, _)| engine.branch_live(network, Some(contingency.id), bid))
        || !monitor.hvdc_terms().is_empty()
}

/// Transit of a monitor from a phase solution, with PST through-flows and
/// HVDC section terms added.
fn monitor_transit(
    network: &Network,
    engine: &SensitivityEngine,
    state: &DispatchState,
    monitor: &MonitoredElement,
    contingency: Option<&Contingency>,
    theta: &[f64],
    with_curative: bool,
) -> f64 {
    let cid = contingency.map(|c| c.id);
    let mut transit = 0.0;

    for (bid, weight) in monitor.branch_terms() {
        if !engine.branch_live(network, cid, bid) {
            continue;
        }
        let branch = network.branch(bid);
        let mut flow = branch.susceptance
            * (theta[branch.from.value()] - theta[branch.to.value()]);
        flow += state.pst_flow_on(network, bid);
        if with_curative {
            if let Some(c) = contingency {
                for pst in network.phase_shifters.iter().filter(|p| p.branch == bid) {
                    if let Some(&v) = state.curative_pst.get(&(c.id, pst.id)) {
                        flow += v;
                    }
                }
            }
        }
        transit += weight * flow;
    }

    for &(hid, weight) in monitor.hvdc_terms() {
        let tripped = contingency
            .map(|c| c.tripped_hvdcs.contains(&hid))
            .unwrap_or(false);
        if tripped {
            continue;
        }
        let mut p = state.hvdc_p[hid.value()];
        if with_curative {
            if let Some(c) = contingency {
                if let Some(&v) = state.curative_hvdc.get(&(c.id, hid)) {
                    p += v;
                }
            }
        }
        transit += weight * p;
    }

    transit
}

/// Threshold applicable to a contingency sweep on one monitor.
fn contingency_threshold(
    monitor: &MonitoredElement,
    contingency: &Contingency,
    transit: f64,
) -> Option<f64> {
    let complex = contingency.is_parade()
        || contingency.tripped_branches.len()
            + contingency.tripped_generators.len()
            + contingency.tripped_hvdcs.len()
            > 1;
    if complex {
        // Elements monitored in N-1 but without a dedicated N-k table
        // keep their N-1 limit for complex contingencies
        monitor
            .thresholds
            .n_minus_k
            .for_transit(transit)
            .or_else(|| monitor.thresholds.n_minus_one.for_transit(transit))
    } else {
        monitor.thresholds.n_minus_one.for_transit(transit)
    }
}

fn collect_threats(
    report: &mut ScreeningReport,
    monitors: &[MonitoredElement],
    sweeps: &[ContingencySweep],
    options: &ComputationOptions,
) {
    for (m_idx, monitor) in monitors.iter().enumerate() {
        let mut threats: Vec<Threat> = Vec::new();
        threats.push(Threat {
            contingency: None,
            transit_mw: report.base_transits[m_idx],
            threshold_mw: monitor.thresholds.n.for_transit(report.base_transits[m_idx]),
        });
        for sweep in sweeps {
            if let Some(t) = sweep.transits[m_idx] {
                threats.push(Threat {
                    contingency: Some(sweep.id),
                    transit_mw: t,
                    threshold_mw: None,
                });
            }
            if let Some(t) = sweep.before_curative[m_idx] {
                let worse = report.before_curative_threats[m_idx]
                    .as_ref()
                    .map(|prev| t.abs() > prev.transit_mw.abs())
                    .unwrap_or(true);
                if worse {
                    report.before_curative_threats[m_idx] = Some(Threat {
                        contingency: Some(sweep.id),
                        transit_mw: t,
                        threshold_mw: monitor.thresholds.before_curative.for_transit(t),
                    });
                }
            }
        }
        threats.sort_by(|a, b| {
            b.transit_mw
                .abs()
                .partial_cmp(&a.transit_mw.abs())
                .expect("transits are finite")
        });
        threats.truncate(options.max_threats);
        report.threats[m_idx] = threats;
    }
}

/// Violation detection, shadowing, dedup, ordering and the per-iteration
/// cap. Returns the raw count before filtering.
fn collect_violations(
    report: &mut ScreeningReport,
    monitors: &[MonitoredElement],
    contingencies: &ContingencySet,
    sweeps: &[ContingencySweep],
    state: &DispatchState,
    options: &ComputationOptions,
) -> usize {
    let mut candidates: Vec<Violation> = Vec::new();

    // Overload slack already granted to a pair raises its effective limit
    let granted = |monitor: MonitorId, contingency: Option<metrix_core::ContingencyId>| -> f64 {
        state
            .overload
            .get(&(monitor, contingency))
            .copied()
            .unwrap_or(0.0)
    };

    for (m_idx, monitor) in monitors.iter().enumerate() {
        if monitor.monitored_n {
            let transit = report.base_transits[m_idx];
            if let Some(limit) = monitor.thresholds.n.for_transit(transit) {
                // Slack already granted raises the detection limit, but
                // cuts are written against the true threshold
                let overload = transit.abs() - limit - granted(monitor.id, None);
                if overload > ACCEPTABLE_DIFF {
                    candidates.push(Violation {
                        monitor: monitor.id,
                        contingency: None,
                        transit_mw: transit,
                        threshold_mw: limit,
                        overload_mw: overload,
                        kind: ViolationKind::BaseCase,
                        upper_side: transit >= 0.0,
                    });
                }
            }
        }

        if !monitor.monitored_nk {
            continue;
        }
        for sweep in sweeps {
            let contingency = contingencies.get(sweep.id);
            if contingency.is_parade() && !contingency.may_relieve(monitor.id) {
                continue;
            }
            if let Some(transit) = sweep.transits[m_idx] {
                if let Some(limit) = contingency_threshold(monitor, contingency, transit) {
                    let overload = transit.abs() - limit - granted(monitor.id, Some(sweep.id));
                    if overload > ACCEPTABLE_DIFF {
                        candidates.push(Violation {
                            monitor: monitor.id,
                            contingency: Some(sweep.id),
                            transit_mw: transit,
                            threshold_mw: limit,
                            overload_mw: overload,
                            kind: sweep.kind,
                            upper_side: transit >= 0.0,
                        });
                    }
                }
            }
            if options.use_itam {
                if let Some(transit) = sweep.before_curative[m_idx] {
                    // Complex contingencies and parades fall under the
                    // N-k variant of the pre-curative threshold; a parade
                    // is judged against the same table its father would be
                    let complex = contingency.is_parade()
                        || contingency.tripped_branches.len() > 1;
                    let limit_table = if complex {
                        monitor.thresholds.before_curative_k
                    } else {
                        monitor.thresholds.before_curative
                    };
                    if let Some(limit) = limit_table.for_transit(transit) {
                        let overload = transit.abs() - limit;
                        if overload > ACCEPTABLE_DIFF {
                            candidates.push(Violation {
                                monitor: monitor.id,
                                contingency: Some(sweep.id),
                                transit_mw: transit,
                                threshold_mw: limit,
                                overload_mw: overload,
                                kind: ViolationKind::BeforeCurative,
                                upper_side: transit >= 0.0,
                            });
                        }
                    }
                }
            }
        }
    }

    let raw = candidates.len();

    // Base-case shadowing: a contingency overload no worse than the base
    // overload on the same monitor will be fixed by the base cut.
    let base_overload: Vec<Option<f64>> = monitors
        .iter()
        .map(|m| {
            candidates
                .iter()
                .find(|v| v.monitor == m.id && v.kind == ViolationKind::BaseCase)
                .map(|v| v.overload_mw)
        })
        .collect();
    candidates.retain(|v| {
        v.kind == ViolationKind::BaseCase
            || base_overload[v.monitor.value()]
                .map(|base| v.overload_mw > base)
                .unwrap_or(true)
    });

    // Priority order: kind, then overload magnitude descending
    candidates.sort_by(|a, b| {
        a.kind.cmp(&b.kind).then(
            b.overload_mw
                .partial_cmp(&a.overload_mw)
                .expect("overloads are finite"),
        )
    });

    // Near-duplicate suppression against stronger selected violations
    let mut selected: Vec<Violation> = Vec::new();
    let mut seen: HashSet<(MonitorId, Option<ContingencyId>, bool)> = HashSet::new();
    for candidate in candidates {
        let key = (
            candidate.monitor,
            candidate.contingency,
            candidate.upper_side,
        );
        if seen.contains(&key) {
            continue;
        }
        let duplicate = candidate.contingency.is_some()
            && selected.iter().any(|kept| {
                kept.monitor == candidate.monitor
                    && kept.upper_side == candidate.upper_side
                    && close(kept.transit_mw, candidate.transit_mw)
                    && close(kept.threshold_mw, candidate.threshold_mw)
            });
        if duplicate {
            continue;
        }
        seen.insert(key);
        selected.push(candidate);
        if selected.len() >= options.max_constraints_per_iteration {
            break;
        }
    }

    report.violations = selected;
    raw
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= DEDUP_ABSOLUTE_MW.max(DEDUP_RELATIVE * a.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::LpBuilder;
    use crate::options::ComputationOptions;
    use metrix_core::{
        Adjustability, BranchId, BranchKind, Generator, GenId, Load, LoadId, ThresholdKind,
    };

    /// E1 fixture: triangle, balance A, generator at B (P0 = 50), load at
    /// C (50), unit susceptances.
    fn e1() -> (Network, Vec<MonitoredElement>, ContingencySet) {
        let mut net = Network::new("e1");
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
        net.add_generator(Generator {
            id: GenId::new(0),
            name: "G-B".into(),
            node: b,
            p0_mw: 50.0,
            pmin_mw: 0.0,
            pmax_mw: 100.0,
            half_band_mw: 10.0,
            adjustable: Adjustability::Both,
            cost_up_hr: 1.0,
            cost_up_ar: 1.0,
            cost_down_hr: 1.0,
            cost_down_ar: 1.0,
            kind: String::new(),
            participation: 1.0,
            connected: true,
        });
        net.add_load(Load {
            id: LoadId::new(0),
            name: "L-C".into(),
            node: c,
            value_mw: 50.0,
            shed_cost: 3000.0,
            shed_pct: 100.0,
            curative_pct: 0.0,
        });

        let mut monitor = MonitoredElement::single(MonitorId::new(0), "B-C", BranchId::new(1));
        monitor.thresholds.set(ThresholdKind::NMinusOne, Some(30.0));

        let mut set = ContingencySet::new();
        let mut inc = Contingency::new(ContingencyId::new(0), "trip A-B");
        inc.tripped_branches = vec![BranchId::new(0)];
        set.add(inc);

        (net, vec![monitor], set)
    }

    #[test]
    fn test_e1_contingency_overload_detected() {
        let (net, monitors, mut set) = e1();
        let mut engine = SensitivityEngine::new(&net).unwrap();
        for c in set.contingencies.clone() {
            let pocket = engine.prepare_contingency(&net, &c).unwrap();
            if let Some(p) = pocket {
                set.get_mut(c.id).pocket = Some(p);
                set.get_mut(c.id).breaks_connectivity = true;
            }
        }
        let options = ComputationOptions::default();
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let builder = LpBuilder::new(options.clone(), dispatch, 0.0);
        let state = builder.dispatch_state(&net, None);

        let report = screen(&net, &monitors, &set, &engine, &state, &options).unwrap();

        // After tripping A-B the full 50 MW from B reaches the load over
        // B-C, against a 30 MW limit.
        assert_eq!(report.violations.len(), 1);
        let v = &report.violations[0];
        assert_eq!(v.contingency, Some(ContingencyId::new(0)));
        assert!((v.transit_mw - 50.0).abs() < 1e-6, "transit {}", v.transit_mw);
        assert!((v.overload_mw - 20.0).abs() < 1e-6);
        assert!(v.upper_side);
    }

    #[test]
    fn test_no_threshold_no_violation() {
        let (net, mut monitors, set) = e1();
        monitors[0].thresholds.set(ThresholdKind::NMinusOne, None);
        let mut engine = SensitivityEngine::new(&net).unwrap();
        for c in set.contingencies.clone() {
            engine.prepare_contingency(&net, &c).unwrap();
        }
        let options = ComputationOptions::default();
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let builder = LpBuilder::new(options.clone(), dispatch, 0.0);
        let state = builder.dispatch_state(&net, None);
        let report = screen(&net, &monitors, &set, &engine, &state, &options).unwrap();
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_threat_ranking_keeps_worst() {
        let (net, monitors, set) = e1();
        let mut engine = SensitivityEngine::new(&net).unwrap();
        for c in set.contingencies.clone() {
            engine.prepare_contingency(&net, &c).unwrap();
        }
        let options = ComputationOptions::default();
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let builder = LpBuilder::new(options.clone(), dispatch, 0.0);
        let state = builder.dispatch_state(&net, None);
        let report = screen(&net, &monitors, &set, &engine, &state, &options).unwrap();

        let threats = &report.threats[0];
        assert!(!threats.is_empty());
        // Worst threat first: the contingency transit (50) over base (~33.3)
        assert_eq!(threats[0].contingency, Some(ContingencyId::new(0)));
        assert!(threats[0].transit_mw.abs() > threats[threats.len() - 1].transit_mw.abs());
    }

    #[test]
    fn test_base_case_check_uses_n_threshold() {
        let (net, mut monitors, _set) = e1();
        // Base-case flow on B-C is 100/3 ≈ 33.3; set N threshold below it
        monitors[0].thresholds.set(ThresholdKind::N, Some(10.0));
        let engine = SensitivityEngine::new(&net).unwrap();
        let options = ComputationOptions::default();
        let dispatch: Vec<f64> = net.generators.iter().map(|g| g.p0_mw).collect();
        let builder = LpBuilder::new(options.clone(), dispatch, 0.0);
        let state = builder.dispatch_state(&net, None);
        // No contingencies prepared: pass an empty set
        let empty = ContingencySet::new();
        let report = screen(&net, &monitors, &empty, &engine, &state, &options).unwrap();

        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::BaseCase);
        assert!((report.violations[0].transit_mw - 100.0 / 3.0).abs() < 1e-6);
    }
}
