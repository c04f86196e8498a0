//! The per-variant SCOPF loop.
//!
//! One variant goes through:
//!
//! 1. contingency preparation (rank-k models, pocket factorizations),
//! 2. a "without-grid" pass: pure economic dispatch at HR costs, no cuts;
//!    this is also the feasibility diagnosis,
//! 3. a "with-grid" pass at AR costs: solve → reconstruct θ → screen →
//!    add cuts, bounded by the micro-iteration and cut caps, flipping to
//!    MIP as soon as a binary enters,
//! 4. a loss re-estimation loop around both passes,
//! 5. report assembly (flows, threats, bilans, objective breakdown,
//!    margin variations).
//!
//! Variants are grouped by topology so the B′ factorization is built once
//! per group; every variant's overlay is rolled back on all exit paths.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{anyhow, Context};
use metrix_core::{
    ContingencySet, HvdcMode, MonitoredElement, Network, PstMode, Variant, VariantOverlay,
};
use metrix_solver::{Outcome, SolveStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::lp::cuts::{assemble_cut, CutOutcome};
use crate::lp::{CostStage, DispatchState, LpBuilder};
use crate::margins;
use crate::options::ComputationOptions;
use crate::report::{
    FlowResult, GeneratorResult, HvdcResult, LoadResult, ObjectiveBreakdown, PocketResult,
    PstResult, ThreatResult, VariantReport, ZoneBilanResult,
};
use crate::screen::{self, ScreeningReport, Violation, ViolationKind};
use crate::sensitivity::SensitivityEngine;

/// Terminal status of one variant, written as the `C1` result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariantStatus {
    NoProblem,
    NoSolution,
    MaxConstraintsReached,
    MicroIterExceeded,
    VariantIgnored,
    InternalError,
    /// Wall-clock budget exhausted; the partial result is
    /// feasible-with-overload, never "optimal"
    Timeout,
}

impl VariantStatus {
    pub fn code(&self) -> u8 {
        match self {
            VariantStatus::NoProblem => 0,
            VariantStatus::NoSolution => 1,
            VariantStatus::MaxConstraintsReached => 2,
            VariantStatus::MicroIterExceeded => 3,
            VariantStatus::Timeout => 3,
            VariantStatus::VariantIgnored => 4,
            VariantStatus::InternalError => 6,
        }
    }
}

/// Result of one with-grid pass.
struct PassResult {
    builder: LpBuilder,
    outcome: Option<Outcome>,
    state: DispatchState,
    screening: ScreeningReport,
    iterations: usize,
    /// `None` = converged clean
    terminal: Option<VariantStatus>,
}

pub struct ScopfSolver {
    options: ComputationOptions,
}

impl ScopfSolver {
    pub fn new(options: ComputationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ComputationOptions {
        &self.options
    }

    /// Process a stream of variants against the model. Base variants
    /// (negative index) are applied irreversibly and produce no report;
    /// every other variant is rolled back whatever its outcome.
    pub fn run(
        &self,
        network: &mut Network,
        monitors: &mut [MonitoredElement],
        contingencies: &mut ContingencySet,
        variants: &[Variant],
    ) -> Vec<VariantReport> {
        // Group by topology delta, preserving first-seen order
        let mut group_order: Vec<Vec<metrix_core::BranchId>> = Vec::new();
        let mut groups: HashMap<Vec<metrix_core::BranchId>, Vec<&Variant>> = HashMap::new();
        for variant in variants {
            if variant.is_base() {
                continue;
            }
            let key = variant.topology_key();
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
            }
            groups.entry(key).or_default().push(variant);
        }

        // The irreversible base variant first
        for variant in variants.iter().filter(|v| v.is_base()) {
            match VariantOverlay::apply(network, monitors, contingencies, variant) {
                Ok(_journal) => info!("base variant applied"),
                Err(e) => warn!(error = %e, "base variant could not be applied"),
            }
        }

        let mut reports = Vec::new();
        for key in group_order {
            let mut engine: Option<SensitivityEngine> = None;
            for &variant in &groups[&key] {
                let mut overlay =
                    match VariantOverlay::apply(network, monitors, contingencies, variant) {
                        Ok(overlay) => overlay,
                        Err(e) => {
                            warn!(variant = variant.index, error = %e, "variant ignored");
                            reports.push(VariantReport::status_only(
                                variant.index,
                                VariantStatus::VariantIgnored,
                            ));
                            continue;
                        }
                    };

                let result = match &mut engine {
                    slot @ None => match SensitivityEngine::new(network) {
                        Ok(e) => {
                            *slot = Some(e);
                            self.solve_variant(
                                network,
                                monitors,
                                contingencies,
                                slot.as_mut().expect("engine just stored"),
                                variant.index,
                            )
                        }
                        Err(e) => Err(anyhow!(e).context("B′ factorization failed")),
                    },
                    Some(e) => {
                        e.clear_contingency_cache();
                        self.solve_variant(network, monitors, contingencies, e, variant.index)
                    }
                };

                let report = match result {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(variant = variant.index, error = %format!("{e:#}"), "variant aborted");
                        VariantReport::status_only(variant.index, VariantStatus::InternalError)
                    }
                };
                overlay.rollback(network, monitors, contingencies);
                reports.push(report);
            }
        }
        reports
    }

    /// Solve one variant with its overlay already applied.
    pub fn solve_variant(
        &self,
        network: &Network,
        monitors: &[MonitoredElement],
        contingencies: &mut ContingencySet,
        engine: &mut SensitivityEngine,
        variant_index: i32,
    ) -> anyhow::Result<VariantReport> {
        // The reduced-problem solver path is not operational; requesting
        // it aborts before doing any work
        if !self.options.disable_reduced_problem_solver {
            warn!("reduced-problem solver requested; this path is not operational");
            return Ok(VariantReport::status_only(
                variant_index,
                VariantStatus::InternalError,
            ));
        }

        let deadline = self.options.time_limit.map(|limit| Instant::now() + limit);

        // Prepare every valid contingency once per variant
        for idx in 0..contingencies.len() {
            {
                let record = &mut contingencies.contingencies[idx];
                record.pocket = None;
                record.breaks_connectivity = false;
            }
            let contingency = contingencies.contingencies[idx].clone();
            if !contingency.valid {
                continue;
            }
            let pocket = engine
                .prepare_contingency(network, &contingency)
                .with_context(|| format!("preparing contingency {}", contingency.name))?;
            if let Some(descriptor) = pocket {
                let record = contingencies.get_mut(contingency.id);
                record.pocket = Some(descriptor);
                record.breaks_connectivity = true;
            }
        }

        let dispatch0: Vec<f64> = network
            .generators
            .iter()
            .map(|g| if g.connected { g.p0_mw } else { 0.0 })
            .collect();

        // LOAD-FLOW: flows and threats with the imposed dispatch, no LP
        if !self.options.mode.with_cuts() {
            let builder = LpBuilder::new(self.options.clone(), dispatch0, self.options.initial_loss_rate);
            let state = builder.dispatch_state(network, None);
            let screening =
                screen::screen(network, monitors, contingencies, engine, &state, &self.options)?;
            let pass = PassResult {
                builder,
                outcome: None,
                state,
                screening,
                iterations: 0,
                terminal: None,
            };
            return Ok(self.build_report(network, monitors, contingencies, pass, variant_index, 0));
        }

        let total_load: f64 = network
            .loads
            .iter()
            .map(|l| l.value_mw.max(0.0))
            .sum();

        let mut loss_rate = self.options.initial_loss_rate;
        let mut loss_iterations = 0;
        loop {
            loss_iterations += 1;

            // Without-grid pass: economic dispatch at HR costs
            let mut hr = LpBuilder::new(self.options.clone(), dispatch0.clone(), loss_rate);
            hr.build_variables(network, CostStage::Hr);
            hr.build_bilans(network);
            hr.build_couplings(network);
            let hr_outcome = metrix_solver::solve(&hr.problem)
                .map_err(|e| anyhow!(e).context("without-grid solve"))?;
            if !hr_outcome.status.has_solution() {
                self.diagnose_infeasibility(network, total_load);
                let mut report =
                    VariantReport::status_only(variant_index, VariantStatus::NoSolution);
                report.loss_iterations = loss_iterations;
                report.loss_rate = loss_rate;
                return Ok(report);
            }
            let dispatch1 = hr
                .dispatch_state(network, Some(&hr_outcome))
                .gen_p
                .clone();

            // With-grid pass at AR costs
            let pass = self.grid_pass(
                network,
                monitors,
                contingencies,
                engine,
                dispatch1,
                loss_rate,
                deadline,
            )?;

            match pass.terminal {
                Some(VariantStatus::NoSolution) => {
                    let mut report =
                        VariantReport::status_only(variant_index, VariantStatus::NoSolution);
                    report.loss_iterations = loss_iterations;
                    report.loss_rate = loss_rate;
                    report.micro_iterations = pass.iterations;
                    report.cuts_added = pass.builder.total_cuts();
                    return Ok(report);
                }
                Some(_) => {
                    // Caps and timeouts surface the partial result
                    let mut report = self.build_report(
                        network,
                        monitors,
                        contingencies,
                        pass,
                        variant_index,
                        loss_iterations,
                    );
                    report.loss_rate = loss_rate;
                    return Ok(report);
                }
                None => {}
            }

            let losses = estimate_losses(network, &pass.state, &pass.screening.theta, &self.options);
            let assumed = loss_rate * total_load;
            let converged = (losses - assumed).abs() <= self.options.loss_threshold_mw;
            if converged || loss_iterations >= self.options.max_loss_iterations || total_load <= 0.0
            {
                if !converged && total_load > 0.0 {
                    warn!(
                        losses,
                        assumed, "loss loop ended on iteration cap without converging"
                    );
                }
                let mut report = self.build_report(
                    network,
                    monitors,
                    contingencies,
                    pass,
                    variant_index,
                    loss_iterations,
                );
                report.loss_rate = loss_rate;
                return Ok(report);
            }
            loss_rate = losses / total_load;
            info!(
                loss_rate,
                losses, "computed losses diverge from the assumed rate, re-running"
            );
        }
    }

    /// The micro-iteration loop: solve → θ → screen → cut.
    fn grid_pass(
        &self,
        network: &Network,
        monitors: &[MonitoredElement],
        contingencies: &mut ContingencySet,
        engine: &mut SensitivityEngine,
        dispatch: Vec<f64>,
        loss_rate: f64,
        deadline: Option<Instant>,
    ) -> anyhow::Result<PassResult> {
        let mut builder = LpBuilder::new(self.options.clone(), dispatch, loss_rate);
        builder.build_variables(network, CostStage::Ar);
        builder.build_bilans(network);
        builder.build_couplings(network);

        let mut outcome: Option<Outcome> = None;
        let mut iterations = 0;

        for iteration in 0..self.options.max_micro_iterations {
            iterations = iteration + 1;

            if iteration > 0 {
                let solved = metrix_solver::solve(&builder.problem)
                    .map_err(|e| anyhow!(e).context("with-grid solve"))?;
                match solved.status {
                    SolveStatus::Infeasible => {
                        let state = builder.dispatch_state(network, outcome.as_ref());
                        let screening = screen::screen(
                            network,
                            monitors,
                            contingencies,
                            engine,
                            &state,
                            &self.options,
                        )?;
                        return Ok(PassResult {
                            builder,
                            outcome,
                            state,
                            screening,
                            iterations,
                            terminal: Some(VariantStatus::NoSolution),
                        });
                    }
                    SolveStatus::Unbounded | SolveStatus::Error => {
                        return Err(anyhow!("solver returned {:?}", solved.status));
                    }
                    _ => outcome = Some(solved),
                }
            }

            let state = builder.dispatch_state(network, outcome.as_ref());
            let screening =
                screen::screen(network, monitors, contingencies, engine, &state, &self.options)?;

            if screening.violations.is_empty() {
                debug!(iteration, "screening clean");
                // A clean first pass still needs one solve so the report
                // carries the optimal point and objective
                if outcome.is_none() && builder.problem.num_columns() > 0 {
                    let solved = metrix_solver::solve(&builder.problem)
                        .map_err(|e| anyhow!(e).context("final solve"))?;
                    if solved.status.has_solution() {
                        let state = builder.dispatch_state(network, Some(&solved));
                        return Ok(PassResult {
                            builder,
                            outcome: Some(solved),
                            state,
                            screening,
                            iterations,
                            terminal: None,
                        });
                    }
                }
                return Ok(PassResult {
                    builder,
                    outcome,
                    state,
                    screening,
                    iterations,
                    terminal: None,
                });
            }

            if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                warn!("variant time budget exhausted");
                return Ok(PassResult {
                    builder,
                    outcome,
                    state,
                    screening,
                    iterations,
                    terminal: Some(VariantStatus::Timeout),
                });
            }

            let current: Vec<f64> = outcome
                .as_ref()
                .map(|o| o.values.clone())
                .unwrap_or_default();
            let mut added = 0;
            let mut capped = false;
            for violation in screening.violations.clone() {
                if builder.total_cuts() >= self.options.max_constraints {
                    capped = true;
                    break;
                }
                added += self.add_cuts_for(
                    network,
                    monitors,
                    contingencies,
                    engine,
                    &mut builder,
                    &violation,
                    &state,
                    &current,
                )?;
            }
            if capped {
                warn!(total = builder.total_cuts(), "cut cap reached");
                return Ok(PassResult {
                    builder,
                    outcome,
                    state,
                    screening,
                    iterations,
                    terminal: Some(VariantStatus::MaxConstraintsReached),
                });
            }
            if added == 0 {
                // Every remaining violation was de-energized or equivalent;
                // nothing further can bind
                debug!("violations remain but produce no new cut");
                return Ok(PassResult {
                    builder,
                    outcome,
                    state,
                    screening,
                    iterations,
                    terminal: None,
                });
            }
            debug!(iteration, added, mip = builder.problem.is_mip(), "cuts appended");
        }

        let state = builder.dispatch_state(network, outcome.as_ref());
        let screening =
            screen::screen(network, monitors, contingencies, engine, &state, &self.options)?;
        Ok(PassResult {
            builder,
            outcome,
            state,
            screening,
            iterations,
            terminal: Some(VariantStatus::MicroIterExceeded),
        })
    }

    /// Turn one violation into cuts: a plain cut for base-case and
    /// ordinary contingencies, the full parade machinery otherwise.
    #[allow(clippy::too_many_arguments)]
    fn add_cuts_for(
        &self,
        network: &Network,
        monitors: &[MonitoredElement],
        contingencies: &mut ContingencySet,
        engine: &mut SensitivityEngine,
        builder: &mut LpBuilder,
        violation: &Violation,
        state: &DispatchState,
        current: &[f64],
    ) -> anyhow::Result<usize> {
        let monitor = &monitors[violation.monitor.value()];

        let Some(cid) = violation.contingency else {
            let added = match assemble_cut(network, engine, builder, contingencies, monitor, violation)? {
                Some(spec) => matches!(builder.add_transit_cut(&spec, current), CutOutcome::Added(_)),
                None => false,
            };
            return Ok(added as usize);
        };

        let contingency = contingencies.get(cid).clone();
        let family_pending = !contingency.is_parade()
            && !contingency.parades.is_empty()
            && self.options.parades_enabled
            && contingency
                .parades
                .iter()
                .all(|p| !builder.registry.parade_activation.contains_key(p));

        if family_pending {
            // Prepare the parade topologies, introduce every δ, then cut
            // each parade against its own post-parade transit
            for &pid in &contingency.parades {
                if engine.prepared(pid).is_none() {
                    let parade = contingencies.get(pid).clone();
                    let pocket = engine
                        .prepare_contingency(network, &parade)
                        .with_context(|| format!("preparing parade {}", parade.name))?;
                    if let Some(descriptor) = pocket {
                        let record = contingencies.get_mut(pid);
                        record.pocket = Some(descriptor);
                        record.breaks_connectivity = true;
                    }
                }
            }
            builder.ensure_parade_family(network, contingencies, cid);
            let mut added = 0;
            for &pid in &contingency.parades {
                added += self.add_parade_cut(
                    network,
                    contingencies,
                    engine,
                    builder,
                    monitor,
                    pid,
                    state,
                    current,
                )?;
            }
            return Ok(added);
        }

        if contingency.is_parade() {
            // Replicate across the whole family so the MIP can trade the
            // activated parade against its siblings
            let father = contingency.father.expect("parade has a father");
            let siblings = contingencies.get(father).parades.clone();
            let mut added = 0;
            for pid in siblings {
                added += self.add_parade_cut(
                    network,
                    contingencies,
                    engine,
                    builder,
                    monitor,
                    pid,
                    state,
                    current,
                )?;
            }
            return Ok(added);
        }

        builder.ensure_curative_variables(network, &contingency);
        let added = match assemble_cut(network, engine, builder, contingencies, monitor, violation)? {
            Some(spec) => matches!(builder.add_transit_cut(&spec, current), CutOutcome::Added(_)),
            None => false,
        };
        Ok(added as usize)
    }

    /// One cut for one parade, priced at the parade's own post-topology
    /// transit. De-energized monitors and unmonitored regimes add nothing.
    #[allow(clippy::too_many_arguments)]
    fn add_parade_cut(
        &self,
        network: &Network,
        contingencies: &ContingencySet,
        engine: &mut SensitivityEngine,
        builder: &mut LpBuilder,
        monitor: &MonitoredElement,
        parade_id: metrix_core::ContingencyId,
        state: &DispatchState,
        current: &[f64],
    ) -> anyhow::Result<usize> {
        let parade = contingencies.get(parade_id).clone();
        if !parade.may_relieve(monitor.id) {
            return Ok(0);
        }
        let Some(transit) = screen::contingency_transit(network, engine, state, monitor, &parade)?
        else {
            return Ok(0);
        };
        let Some(limit) = monitor
            .thresholds
            .n_minus_k
            .for_transit(transit)
            .or_else(|| monitor.thresholds.n_minus_one.for_transit(transit))
        else {
            return Ok(0);
        };
        let violation = Violation {
            monitor: monitor.id,
            contingency: Some(parade_id),
            transit_mw: transit,
            threshold_mw: limit,
            overload_mw: transit.abs() - limit,
            kind: ViolationKind::Parade,
            upper_side: transit >= 0.0,
        };
        let added = match assemble_cut(network, engine, builder, contingencies, monitor, &violation)?
        {
            Some(spec) => matches!(builder.add_transit_cut(&spec, current), CutOutcome::Added(_)),
            None => false,
        };
        Ok(added as usize)
    }

    fn diagnose_infeasibility(&self, network: &Network, total_load: f64) {
        let pmax: f64 = network
            .generators
            .iter()
            .filter(|g| g.connected)
            .map(|g| g.pmax_mw)
            .sum();
        let pmin: f64 = network
            .generators
            .iter()
            .filter(|g| g.connected)
            .map(|g| g.pmin_mw)
            .sum();
        if pmax < total_load {
            warn!(pmax, total_load, "insufficient Pmax to cover the load");
        } else if pmin > total_load {
            warn!(pmin, total_load, "imposed Pmin exceeds the load");
        } else {
            warn!("dispatch infeasible (couplings or bounds)");
        }
    }

    /// Assemble the variant report from a finished pass.
    fn build_report(
        &self,
        network: &Network,
        monitors: &[MonitoredElement],
        contingencies: &ContingencySet,
        pass: PassResult,
        variant_index: i32,
        loss_iterations: usize,
    ) -> VariantReport {
        let PassResult {
            builder,
            outcome,
            state,
            screening,
            iterations,
            terminal,
        } = pass;
        let status = terminal.unwrap_or(VariantStatus::NoProblem);
        let contingency_name =
            |id: metrix_core::ContingencyId| contingencies.get(id).name.clone();

        let generators = network
            .generators
            .iter()
            .map(|gen| GeneratorResult {
                name: gen.name.clone(),
                p0_mw: gen.p0_mw,
                preventive_mw: state.gen_p[gen.id.value()]
                    - if gen.connected { gen.p0_mw } else { 0.0 },
                curative: state
                    .curative_gen
                    .iter()
                    .filter(|((_, gid), _)| *gid == gen.id)
                    .map(|((cid, _), &v)| (contingency_name(*cid), v))
                    .collect(),
            })
            .collect();

        let loads = network
            .loads
            .iter()
            .map(|load| LoadResult {
                name: load.name.clone(),
                value_mw: load.value_mw,
                shed_mw: state.load_shed[load.id.value()],
                curative: state
                    .curative_load
                    .iter()
                    .filter(|((_, lid), _)| *lid == load.id)
                    .map(|((cid, _), &v)| (contingency_name(*cid), v))
                    .collect(),
            })
            .collect();

        let phase_shifters = network
            .phase_shifters
            .iter()
            .filter(|pst| pst.mode != PstMode::Off)
            .map(|pst| PstResult {
                name: pst.name.clone(),
                setpoint_mw: pst.setpoint_mw,
                preventive_mw: state.pst_p[pst.id.value()] - pst.setpoint_mw,
                curative: state
                    .curative_pst
                    .iter()
                    .filter(|((_, pid), _)| *pid == pst.id)
                    .map(|((cid, _), &v)| (contingency_name(*cid), v))
                    .collect(),
            })
            .collect();

        let hvdc_links = network
            .hvdc_links
            .iter()
            .filter(|link| link.connected && link.mode != HvdcMode::Off)
            .map(|link| HvdcResult {
                name: link.name.clone(),
                setpoint_mw: link.setpoint_mw,
                preventive_mw: state.hvdc_p[link.id.value()] - link.setpoint_mw,
                curative: state
                    .curative_hvdc
                    .iter()
                    .filter(|((_, hid), _)| *hid == link.id)
                    .map(|((cid, _), &v)| (contingency_name(*cid), v))
                    .collect(),
            })
            .collect();

        let flows = monitors
            .iter()
            .enumerate()
            .map(|(idx, monitor)| FlowResult {
                monitor: monitor.name.clone(),
                transit_mw: screening.base_transits[idx],
                threshold_mw: monitor
                    .thresholds
                    .n
                    .for_transit(screening.base_transits[idx]),
            })
            .collect();

        let threats = monitors
            .iter()
            .enumerate()
            .flat_map(|(idx, monitor)| {
                screening.threats[idx].iter().map(move |threat| ThreatResult {
                    monitor: monitor.name.clone(),
                    contingency: threat.contingency.map(contingency_name),
                    transit_mw: threat.transit_mw,
                    threshold_mw: threat.threshold_mw,
                })
            })
            .collect();

        let before_curative_threats = monitors
            .iter()
            .enumerate()
            .filter_map(|(idx, monitor)| {
                screening.before_curative_threats[idx]
                    .as_ref()
                    .map(|threat| ThreatResult {
                        monitor: monitor.name.clone(),
                        contingency: threat.contingency.map(contingency_name),
                        transit_mw: threat.transit_mw,
                        threshold_mw: threat.threshold_mw,
                    })
            })
            .collect();

        let pockets = contingencies
            .contingencies
            .iter()
            .filter_map(|c| {
                c.pocket.as_ref().map(|p| PocketResult {
                    contingency: c.name.clone(),
                    nodes: p.nodes.len(),
                    lost_generation_mw: p.lost_generation_mw,
                    lost_load_mw: p.lost_load_mw,
                })
            })
            .collect();

        if self.options.check_constraints_level > 0 {
            if let Some(o) = &outcome {
                self.verify_solution(&builder, o, &state, network);
            }
        }

        let zone_bilans = self.zone_bilans(network, &state);
        let objective = outcome
            .as_ref()
            .map(|o| objective_breakdown(&builder, o));
        let active_parades = state
            .parade_active
            .iter()
            .filter(|(_, &active)| active)
            .map(|(&pid, _)| contingency_name(pid))
            .collect();

        let margin_variations = match (&outcome, status) {
            (Some(o), VariantStatus::NoProblem) => {
                let cut_rows: Vec<usize> =
                    builder.stored_cuts().iter().map(|c| c.row).collect();
                match margins::margin_variations(&builder.problem, o, &cut_rows) {
                    Ok(list) => list.into_iter().map(Into::into).collect(),
                    Err(e) => {
                        warn!(error = %e, "margin variations unavailable");
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        VariantReport {
            variant_index,
            status,
            micro_iterations: iterations,
            loss_iterations,
            loss_rate: state.loss_rate,
            cuts_added: builder.total_cuts(),
            objective,
            generators,
            loads,
            phase_shifters,
            hvdc_links,
            flows,
            threats,
            before_curative_threats,
            pockets,
            zone_bilans,
            active_parades,
            margin_variations,
        }
    }

    /// Post-solve verification: level 1 checks every cut row against the
    /// primal point, level 2 also re-checks the zonal bilans.
    fn verify_solution(
        &self,
        builder: &LpBuilder,
        outcome: &Outcome,
        state: &DispatchState,
        network: &Network,
    ) {
        const TRANSIT_CHECK_TOLERANCE: f64 = 1e-4;
        for cut in builder.stored_cuts() {
            let row = &builder.problem.rows[cut.row];
            let activity = builder.problem.row_activity(cut.row, &outcome.values);
            let violated = match row.sense {
                metrix_solver::RowSense::Le => activity > row.rhs + TRANSIT_CHECK_TOLERANCE,
                metrix_solver::RowSense::Ge => activity < row.rhs - TRANSIT_CHECK_TOLERANCE,
                metrix_solver::RowSense::Eq => {
                    (activity - row.rhs).abs() > TRANSIT_CHECK_TOLERANCE
                }
            };
            if violated {
                warn!(row = %row.name, activity, rhs = row.rhs, "cut violated at the solution");
            }
        }
        if self.options.check_constraints_level > 1 {
            for bilan in self.zone_bilans(network, state) {
                if bilan.residual_mw.abs() > crate::constants::EPSILON_BILAN {
                    warn!(
                        zone = %bilan.zone,
                        residual = bilan.residual_mw,
                        "zonal balance residual above tolerance"
                    );
                }
            }
        }
    }

    fn zone_bilans(&self, network: &Network, state: &DispatchState) -> Vec<ZoneBilanResult> {
        network
            .zones
            .iter()
            .map(|zone| {
                let mut generation = 0.0;
                let mut load_total = 0.0;
                let mut shed = 0.0;
                for gen in &network.generators {
                    if gen.connected && network.node(gen.node).zone == Some(zone.id) {
                        generation += state.gen_p[gen.id.value()];
                    }
                }
                for load in &network.loads {
                    if network.node(load.node).zone == Some(zone.id) {
                        load_total += load.value_mw + state.loss_rate * load.value_mw.max(0.0);
                        let sign = if load.value_mw >= 0.0 { 1.0 } else { -1.0 };
                        shed += sign * state.load_shed[load.id.value()];
                    }
                }
                let mut export = 0.0;
                for link in &network.hvdc_links {
                    if !link.connected || link.mode == HvdcMode::Off {
                        continue;
                    }
                    let from_in = network.node(link.from).zone == Some(zone.id);
                    let to_in = network.node(link.to).zone == Some(zone.id);
                    if from_in && !to_in {
                        export += state.hvdc_p[link.id.value()];
                    } else if to_in && !from_in {
                        export -= state.hvdc_p[link.id.value()];
                    }
                }
                let residual = generation + shed - load_total - export - zone.exchange_mw
                    + zone.production_balance_mw;
                ZoneBilanResult {
                    zone: zone.name.clone(),
                    generation_mw: generation,
                    load_mw: load_total,
                    shed_mw: shed,
                    exchange_mw: zone.exchange_mw,
                    residual_mw: residual,
                }
            })
            .collect()
    }
}

/// Quadratic loss estimate: branch flows against their resistance, HVDC
/// converter and cable losses.
fn estimate_losses(
    network: &Network,
    state: &DispatchState,
    theta: &[f64],
    options: &ComputationOptions,
) -> f64 {
    let u_ref = options.nominal_voltage_kv;
    let mut losses = 0.0;
    for branch in &network.branches {
        if !branch.connected || branch.resistance <= 0.0 {
            continue;
        }
        let mut flow = branch.susceptance * (theta[branch.from.value()] - theta[branch.to.value()]);
        flow += state.pst_flow_on(network, branch.id);
        losses += (flow / u_ref).powi(2) * branch.resistance;
    }
    for link in &network.hvdc_links {
        if !link.connected || link.mode == HvdcMode::Off {
            continue;
        }
        let p = state.hvdc_p[link.id.value()];
        losses += p.abs() * (link.loss_factor_from + link.loss_factor_to);
        if link.dc_voltage_kv > 0.0 {
            losses += (p / link.dc_voltage_kv).powi(2) * link.cable_resistance_ohm;
        }
    }
    losses
}

/// Split the objective into its reporting buckets using the registries.
fn objective_breakdown(builder: &LpBuilder, outcome: &Outcome) -> ObjectiveBreakdown {
    let value = |col: usize| outcome.values.get(col).copied().unwrap_or(0.0);
    let cost = |col: usize| builder.problem.columns[col].cost * value(col);

    let mut breakdown = ObjectiveBreakdown::default();
    for pair in builder.registry.gen.values() {
        breakdown.generation_cost += cost(pair.up) + cost(pair.down);
    }
    for &col in builder.registry.load_shed.values() {
        breakdown.load_cost += cost(col);
    }
    for pair in builder.registry.pst.values() {
        breakdown.generation_cost += cost(pair.up) + cost(pair.down);
    }
    for pair in builder.registry.hvdc.values() {
        breakdown.generation_cost += cost(pair.up) + cost(pair.down);
    }
    for pair in builder
        .registry
        .curative_gen
        .values()
        .chain(builder.registry.curative_pst.values())
        .chain(builder.registry.curative_hvdc.values())
        .chain(builder.registry.curative_load.values())
    {
        breakdown.curative_cost += cost(pair.up) + cost(pair.down);
    }
    for &col in builder.registry.overload_slack.values() {
        breakdown.slack_cost += cost(col);
    }
    for &col in builder.registry.parade_activation.values() {
        breakdown.activation_cost += cost(col);
    }
    for &col in builder.registry.curative_activation.values() {
        breakdown.activation_cost += cost(col);
    }
    for &col in builder.registry.pst_preventive_activation.values() {
        breakdown.activation_cost += cost(col);
    }
    breakdown.total = outcome.objective;
    breakdown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_result_format() {
        assert_eq!(VariantStatus::NoProblem.code(), 0);
        assert_eq!(VariantStatus::NoSolution.code(), 1);
        assert_eq!(VariantStatus::MaxConstraintsReached.code(), 2);
        assert_eq!(VariantStatus::MicroIterExceeded.code(), 3);
        assert_eq!(VariantStatus::Timeout.code(), 3);
        assert_eq!(VariantStatus::VariantIgnored.code(), 4);
        assert_eq!(VariantStatus::InternalError.code(), 6);
    }
}
