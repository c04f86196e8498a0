//! End-to-end SCOPF scenarios over small hand-built networks, solved with
//! the real LP/MIP backend.

use metrix_algo::{ComputationMode, ComputationOptions, ScopfSolver, VariantStatus};
use metrix_core::{
    Adjustability, BranchId, BranchKind, Contingency, ContingencyId, GenId, Generator, Load,
    LoadId, MonitorId, MonitoredElement, Network, NodeId, ThresholdKind, Variant,
};

fn generator(name: &str, node: NodeId, p0: f64, pmax: f64) -> Generator {
    Generator {
        id: GenId::new(0),
        name: name.into(),
        node,
        p0_mw: p0,
        pmin_mw: 0.0,
        pmax_mw: pmax,
        half_band_mw: 10.0,
        adjustable: Adjustability::Both,
        cost_up_hr: 1.0,
        cost_up_ar: 1.0,
        cost_down_hr: 1.0,
        cost_down_ar: 1.0,
        kind: String::new(),
        participation: 1.0,
        connected: true,
    }
}

fn load(name: &str, node: NodeId, value: f64) -> Load {
    Load {
        id: LoadId::new(0),
        name: name.into(),
        node,
        value_mw: value,
        shed_cost: 3000.0,
        shed_pct: 100.0,
        curative_pct: 0.0,
    }
}

fn solve(
    options: ComputationOptions,
    network: &mut Network,
    monitors: &mut [MonitoredElement],
    contingencies: &mut metrix_core::ContingencySet,
) -> metrix_algo::VariantReport {
    let solver = ScopfSolver::new(options);
    let variants = vec![Variant::new(0)];
    let mut reports = solver.run(network, monitors, contingencies, &variants);
    assert_eq!(reports.len(), 1);
    reports.remove(0)
}

/// Triangle, generator at B, load at C, trip of A-B overloading B-C:
/// nothing preventive can help, so overload mode must close the gap with
/// a 20 MW slack at the default 10/MW.
#[test]
fn overload_slack_absorbs_unfixable_contingency() {
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
    net.add_generator(generator("G-B", b, 50.0, 100.0));
    net.add_load(load("L-C", c, 50.0));

    let mut monitor = MonitoredElement::single(MonitorId::new(0), "B-C", BranchId::new(1));
    monitor.thresholds.set(ThresholdKind::NMinusOne, Some(30.0));
    let mut monitors = vec![monitor];

    let mut contingencies = metrix_core::ContingencySet::new();
    let mut trip = Contingency::new(ContingencyId::new(0), "trip A-B");
    trip.tripped_branches = vec![BranchId::new(0)];
    contingencies.add(trip);

    let mut options = ComputationOptions::default();
    options.mode = ComputationMode::OpfWithOverload;

    let report = solve(options, &mut net, &mut monitors, &mut contingencies);

    assert_eq!(report.status, VariantStatus::NoProblem);
    assert!(report.cuts_added >= 1);
    let objective = report.objective.expect("solved variants carry a breakdown");
    // 20 MW of residual overload at 10/MW
    assert!(
        (objective.slack_cost - 200.0).abs() < 2.0,
        "slack cost {}",
        objective.slack_cost
    );
    // No preventive action can relieve the radial feed
    let gen = &report.generators[0];
    assert!(gen.preventive_mw.abs() < 1.0, "ΔP = {}", gen.preventive_mw);
}

/// Two synchronous zones tied by an imposed-power HVDC: per-zone bilans
/// close, no cuts appear, the objective stays at zero.
#[test]
fn imposed_hvdc_balances_two_zones() {
    let mut net = Network::new("e2");
    let a = net.add_node("A");
    let b = net.add_node("B");
    let z1 = net.add_zone("Z1", a);
    let z2 = net.add_zone("Z2", b);
    net.assign_zone(a, z1);
    net.assign_zone(b, z2);
    net.add_generator(generator("G-A", a, 100.0, 200.0));
    net.add_load(load("L-B", b, 100.0));
    net.add_hvdc(metrix_core::HvdcLink {
        id: metrix_core::HvdcId::new(0),
        name: "A>B".into(),
        from: a,
        to: b,
        mode: metrix_core::HvdcMode::ImposedPower,
        setpoint_mw: 100.0,
        pmin_mw: 0.0,
        pmax_mw: 150.0,
        droop_mw_per_deg: 0.0,
        loss_factor_from: 0.0,
        loss_factor_to: 0.0,
        dc_voltage_kv: 0.0,
        cable_resistance_ohm: 0.0,
        connected: true,
        emulation_branch: None,
        emulation_pst: None,
    });

    let mut monitors: Vec<MonitoredElement> = Vec::new();
    let mut contingencies = metrix_core::ContingencySet::new();

    let report = solve(
        ComputationOptions::default(),
        &mut net,
        &mut monitors,
        &mut contingencies,
    );

    assert_eq!(report.status, VariantStatus::NoProblem);
    assert_eq!(report.cuts_added, 0);
    let objective = report.objective.unwrap();
    assert!(objective.total.abs() < 1e-6, "objective {}", objective.total);
    for bilan in &report.zone_bilans {
        assert!(
            bilan.residual_mw.abs() <= 1.0,
            "zone {} residual {}",
            bilan.zone,
            bilan.residual_mw
        );
    }
}

/// Parade scenario: the father trips the only feed into the monitored
/// branch; a parade closing a parallel line halves its loading. The MIP
/// must activate exactly one parade and prefer the one that avoids the
/// slack.
fn parade_network() -> (
    Network,
    Vec<MonitoredElement>,
    metrix_core::ContingencySet,
) {
    let mut net = Network::new("e3");
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
    let parallel = net.add_branch("B-C bis", b, c, 1.0, 1.0, 0.01, BranchKind::Real);
    net.branches[parallel.value()].connected = false;
    net.add_generator(generator("G-B", b, 50.0, 100.0));
    net.add_load(load("L-C", c, 50.0));

    let mut monitor = MonitoredElement::single(MonitorId::new(0), "B-C", BranchId::new(1));
    monitor.thresholds.set(ThresholdKind::NMinusOne, Some(30.0));
    monitor.thresholds.set(ThresholdKind::NMinusK, Some(30.0));
    let monitors = vec![monitor];

    let mut contingencies = metrix_core::ContingencySet::new();
    let mut father = Contingency::new(ContingencyId::new(0), "trip A-B");
    father.tripped_branches = vec![BranchId::new(0)];
    let father_id = contingencies.add(father);

    let mut close_parallel = Contingency::new(ContingencyId::new(0), "close B-C bis");
    close_parallel.tripped_branches = vec![BranchId::new(0)];
    close_parallel.closed_branches = vec![parallel];
    close_parallel.father = Some(father_id);
    contingencies.add(close_parallel);
    contingencies.complete_parade_families();

    (net, monitors, contingencies)
}

#[test]
fn parade_activation_is_exclusive_and_cheapest() {
    let (mut net, mut monitors, mut contingencies) = parade_network();
    let mut options = ComputationOptions::default();
    options.mode = ComputationMode::OpfWithOverload;

    let report = solve(options, &mut net, &mut monitors, &mut contingencies);

    assert_eq!(report.status, VariantStatus::NoProblem);
    assert_eq!(
        report.active_parades,
        vec!["close B-C bis".to_string()],
        "exactly the closing parade is active"
    );
    let objective = report.objective.unwrap();
    // The parade resolves the overload: no slack spent
    assert!(
        objective.slack_cost.abs() < 1.0,
        "slack cost {}",
        objective.slack_cost
    );
}

#[test]
fn identical_inputs_solve_identically() {
    let run = || {
        let (mut net, mut monitors, mut contingencies) = parade_network();
        let mut options = ComputationOptions::default();
        options.mode = ComputationMode::OpfWithOverload;
        solve(options, &mut net, &mut monitors, &mut contingencies)
    };
    let first = run();
    let second = run();
    let obj1 = first.objective.unwrap().total;
    let obj2 = second.objective.unwrap().total;
    assert!(
        (obj1 - obj2).abs() <= 1e-6 * obj1.abs().max(1.0),
        "{obj1} vs {obj2}"
    );
    assert_eq!(first.active_parades, second.active_parades);
}

/// A contingency stranding a generator-and-load pocket reports the pocket
/// and keeps the surviving network balanced.
#[test]
fn lost_pocket_is_reported() {
    let mut net = Network::new("e4");
    let a = net.add_node("A");
    let b = net.add_node("B");
    let p = net.add_node("P");
    let z = net.add_zone("Z1", a);
    for n in [a, b, p] {
        net.assign_zone(n, z);
    }
    net.add_branch("A-B", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
    net.add_branch("B-P", b, p, 1.0, 1.0, 0.01, BranchKind::Real);
    net.add_generator(generator("G-A", a, 50.0, 120.0));
    net.add_generator(generator("G-P", p, 30.0, 60.0));
    net.add_load(load("L-B", b, 70.0));
    net.add_load(load("L-P", p, 10.0));

    let mut monitors: Vec<MonitoredElement> = Vec::new();
    let mut contingencies = metrix_core::ContingencySet::new();
    let mut trip = Contingency::new(ContingencyId::new(0), "trip B-P");
    trip.tripped_branches = vec![BranchId::new(1)];
    contingencies.add(trip);

    let report = solve(
        ComputationOptions::default(),
        &mut net,
        &mut monitors,
        &mut contingencies,
    );

    assert_eq!(report.status, VariantStatus::NoProblem);
    assert_eq!(report.pockets.len(), 1);
    let pocket = &report.pockets[0];
    assert_eq!(pocket.contingency, "trip B-P");
    assert_eq!(pocket.nodes, 1);
    assert!((pocket.lost_generation_mw - 30.0).abs() < 1e-9);
    assert!((pocket.lost_load_mw - 10.0).abs() < 1e-9);
}

/// Loss loop: starting from a 0% assumption, the quadratic estimate
/// forces one re-run, after which the assumed rate matches the computed
/// losses within the threshold.
#[test]
fn loss_loop_converges_in_two_passes() {
    let mut net = Network::new("e6");
    let a = net.add_node("A");
    let b = net.add_node("B");
    let z = net.add_zone("Z1", a);
    net.assign_zone(a, z);
    net.assign_zone(b, z);
    // (100 MW / 400 kV)² × 32 Ω = 2 MW of losses
    net.add_branch("A-B", a, b, 1.0, 1.0, 32.0, BranchKind::Real);
    net.add_generator(generator("G-A", a, 100.0, 200.0));
    net.add_load(load("L-B", b, 100.0));

    let mut monitors: Vec<MonitoredElement> = Vec::new();
    let mut contingencies = metrix_core::ContingencySet::new();

    let mut options = ComputationOptions::default();
    options.loss_threshold_mw = 1.0;
    options.initial_loss_rate = 0.0;

    let report = solve(options, &mut net, &mut monitors, &mut contingencies);

    assert_eq!(report.status, VariantStatus::NoProblem);
    assert_eq!(report.loss_iterations, 2, "one re-run, then convergence");
    assert!(
        (report.loss_rate - 0.02).abs() < 5e-3,
        "assumed rate {}",
        report.loss_rate
    );
    // The generator covers the uplifted load
    assert!(
        (report.generators[0].preventive_mw - 2.0).abs() < 1.0,
        "ΔP {}",
        report.generators[0].preventive_mw
    );
}

/// Reversing a phase-shifter's host branch while negating its set-point
/// leaves every monitored transit unchanged.
#[test]
fn phase_shifter_reversal_symmetry() {
    let build = |reversed: bool| {
        let mut net = Network::new("e5");
        let a = net.add_node("A");
        let b = net.add_node("B");
        let c = net.add_node("C");
        let z = net.add_zone("Z1", a);
        for n in [a, b, c] {
            net.assign_zone(n, z);
        }
        net.add_branch("A-B", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        let host = if reversed {
            net.add_branch("B-C", c, b, 1.0, 1.0, 0.01, BranchKind::PhaseShifterSupport)
        } else {
            net.add_branch("B-C", b, c, 1.0, 1.0, 0.01, BranchKind::PhaseShifterSupport)
        };
        net.add_branch("A-C", a, c, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_phase_shifter(metrix_core::PhaseShifter {
            id: metrix_core::PstId::new(0),
            name: "PST".into(),
            branch: host,
            mode: metrix_core::PstMode::ImposedPower,
            setpoint_mw: if reversed { -10.0 } else { 10.0 },
            pmin_mw: -50.0,
            pmax_mw: 50.0,
            low_tap: -16,
            nb_taps: 33,
            tap_step_deg: 0.5,
            preventive_activation: false,
            fictitious: false,
        });
        net.add_generator(generator("G-B", b, 50.0, 100.0));
        net.add_load(load("L-C", c, 50.0));

        let monitor = MonitoredElement::single(MonitorId::new(0), "A-B", BranchId::new(0));
        let mut monitors = vec![monitor];
        let mut contingencies = metrix_core::ContingencySet::new();
        let mut options = ComputationOptions::default();
        options.mode = ComputationMode::LoadFlow;
        let report = solve(options, &mut net, &mut monitors, &mut contingencies);
        report.flows[0].transit_mw
    };

    let forward = build(false);
    let reversed = build(true);
    assert!(
        (forward - reversed).abs() < 1e-9,
        "A-B flow changed: {forward} vs {reversed}"
    );
}
