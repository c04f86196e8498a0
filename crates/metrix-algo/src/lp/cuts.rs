//! Transit-cut assembly and insertion.
//!
//! A violated (monitor, contingency) pair becomes one LP row:
//!
//! ```text
//! upper side:  Σ aᵥ·xᵥ ≤ Tmax − partie_fixe − margin
//! lower side:  Σ aᵥ·xᵥ ≥ −Tmin − partie_fixe + margin
//! ```
//!
//! where `partie_fixe` is the share of the screened transit not explained
//! by the variables, and the margin keeps the screener from re-detecting
//! the same constraint. Parade cuts carry a big-M term on the parade's δ
//! so they only bind when the parade is the selected one.

use metrix_core::{ContingencyId, ContingencySet, MonitorId, MonitoredElement, Network};
use metrix_solver::RowSense;
use tracing::debug;

use crate::constants::{
    ACCEPTABLE_DIFF, CONSTRAINTS_PRECISION, EPSILON_CONSTRAINT_EQ, EPSILON_CUT_COEFF,
    FACTOR_INACTIVE_CONSTRAINT,
};
use crate::lp::{LpBuilder, StoredCut};
use crate::screen::Violation;
use crate::sensitivity::{SensitivityEngine, SensitivityError};

/// A fully assembled cut, ready for insertion.
#[derive(Debug, Clone)]
pub struct CutSpec {
    pub monitor: MonitorId,
    pub monitor_name: String,
    pub contingency: Option<ContingencyId>,
    /// Set when `contingency` is a parade
    pub father: Option<ContingencyId>,
    pub upper: bool,
    /// Positive threshold applicable to the violated side
    pub limit_mw: f64,
    /// Screened transit at the current point
    pub transit_mw: f64,
    /// Structural coefficients (slack and activation excluded)
    pub terms: Vec<(usize, f64)>,
    pub slack: Option<usize>,
}

/// What happened to a candidate cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutOutcome {
    Added(usize),
    /// Equivalent to a sibling parade's cut; dropped, sibling reused
    DroppedEquivalent,
}

/// Assemble the cut for a violation. `None` when the monitored element is
/// fully de-energized under the contingency (nothing left to constrain).
pub fn assemble_cut(
    network: &Network,
    engine: &mut SensitivityEngine,
    builder: &mut LpBuilder,
    contingencies: &ContingencySet,
    monitor: &MonitoredElement,
    violation: &Violation,
) -> Result<Option<CutSpec>, SensitivityError> {
    let cid = violation.contingency;
    let Some(row) = engine.monitor_row(network, monitor, cid)? else {
        debug!(monitor = %monitor.name, "monitored element de-energized, cut dropped");
        return Ok(None);
    };

    let (tripped_gens, tripped_hvdcs, compensation, father) = match cid {
        None => (Vec::new(), Vec::new(), Vec::new(), None),
        Some(id) => {
            let c = contingencies.get(id);
            let comp = engine
                .prepared(id)
                .map(|p| p.compensation.clone())
                .unwrap_or_default();
            (
                c.tripped_generators.clone(),
                c.tripped_hvdcs.clone(),
                comp,
                c.father,
            )
        }
    };

    let mut terms: Vec<(usize, f64)> = Vec::new();

    // Sensitivity of the monitor to one MW of compensated generation loss
    let compensated_coeff = |row: &[f64]| -> f64 {
        compensation
            .iter()
            .map(|&(gid, share)| share * row[network.generator(gid).node.value()])
            .sum()
    };

    for gen in &network.generators {
        if !gen.connected {
            continue;
        }
        let coeff = if tripped_gens.contains(&gen.id) {
            compensated_coeff(&row)
        } else {
            row[gen.node.value()]
        };
        if let Some(pair) = builder.registry.gen.get(&gen.id) {
            terms.push((pair.up, coeff));
            terms.push((pair.down, -coeff));
        }
        if let Some(id) = cid {
            if let Some(pair) = builder.registry.curative_gen.get(&(id, gen.id)) {
                terms.push((pair.up, coeff));
                terms.push((pair.down, -coeff));
            }
        }
    }

    for load in &network.loads {
        let sign = if load.value_mw >= 0.0 { 1.0 } else { -1.0 };
        let coeff = sign * row[load.node.value()];
        if let Some(&shed) = builder.registry.load_shed.get(&load.id) {
            terms.push((shed, coeff));
        }
        if let Some(id) = cid {
            if let Some(pair) = builder.registry.curative_load.get(&(id, load.id)) {
                terms.push((pair.up, coeff));
                terms.push((pair.down, -coeff));
            }
        }
    }

    for pst in &network.phase_shifters {
        let host = network.branch(pst.branch);
        // Injection-pair model plus the direct share on the host branch
        let direct: f64 = monitor
            .branch_terms()
            .iter()
            .filter(|&&(bid, _)| bid == pst.branch && engine.branch_live(network, cid, bid))
            .map(|&(_, w)| w)
            .sum();
        let coeff = row[host.to.value()] - row[host.from.value()] + direct;
        if let Some(pair) = builder.registry.pst.get(&pst.id) {
            terms.push((pair.up, coeff));
            terms.push((pair.down, -coeff));
        }
        if let Some(id) = cid {
            if let Some(pair) = builder.registry.curative_pst.get(&(id, pst.id)) {
                terms.push((pair.up, coeff));
                terms.push((pair.down, -coeff));
            }
        }
    }

    for link in &network.hvdc_links {
        if !link.connected {
            continue;
        }
        let tripped = tripped_hvdcs.contains(&link.id);
        let direct: f64 = monitor
            .hvdc_terms()
            .iter()
            .filter(|&&(hid, _)| hid == link.id)
            .map(|&(_, w)| w)
            .sum();
        let coeff = if tripped {
            0.0
        } else {
            row[link.to.value()] - row[link.from.value()] + direct
        };
        if let Some(pair) = builder.registry.hvdc.get(&link.id) {
            terms.push((pair.up, coeff));
            terms.push((pair.down, -coeff));
        }
        if let Some(id) = cid {
            if let Some(pair) = builder.registry.curative_hvdc.get(&(id, link.id)) {
                terms.push((pair.up, coeff));
                terms.push((pair.down, -coeff));
            }
        }
    }

    let slack = builder.ensure_overload_slack(monitor.id, &monitor.name, cid);

    // partie_fixe: share of the screened transit the variables don't carry
    let spec = CutSpec {
        monitor: monitor.id,
        monitor_name: monitor.name.clone(),
        contingency: cid,
        father,
        upper: violation.upper_side,
        limit_mw: violation.threshold_mw,
        transit_mw: violation.transit_mw,
        terms,
        slack,
    };
    Ok(Some(spec))
}

impl LpBuilder {
    /// Insert a transit cut. Handles coefficient filtering, RHS snapping,
    /// the detection margin, parade big-M and equivalence detection.
    pub fn add_transit_cut(&mut self, spec: &CutSpec, current_values: &[f64]) -> CutOutcome {
        let value = |col: usize| current_values.get(col).copied().unwrap_or(0.0);

        let mut terms: Vec<(usize, f64)> = spec
            .terms
            .iter()
            .filter(|&&(_, coeff)| coeff.abs() >= EPSILON_CUT_COEFF)
            .copied()
            .collect();
        terms.sort_by_key(|&(col, _)| col);

        let activity: f64 = terms.iter().map(|&(col, c)| c * value(col)).sum();
        let fixed = spec.transit_mw - activity;

        let mut rhs = if spec.upper {
            spec.limit_mw - fixed - ACCEPTABLE_DIFF
        } else {
            -spec.limit_mw - fixed + ACCEPTABLE_DIFF
        };
        rhs = (rhs * CONSTRAINTS_PRECISION).round() / CONSTRAINTS_PRECISION;

        // Equivalence against sibling parade cuts of the same father
        let parade = spec.contingency.filter(|_| spec.father.is_some());
        if parade.is_some() && self.options.equivalent_parade_detection {
            let key = self.preventive_key(&terms);
            for stored in &self.stored_cuts {
                if stored.father != spec.father
                    || stored.parade == parade
                    || stored.parade.is_none()
                    || stored.monitor != spec.monitor
                    || stored.upper != spec.upper
                {
                    continue;
                }
                if (stored.rhs_key - rhs).abs() <= EPSILON_CONSTRAINT_EQ
                    && terms_equivalent(&stored.terms_key, &key)
                {
                    debug!(
                        monitor = %spec.monitor_name,
                        "parade cut equivalent to sibling, dropped"
                    );
                    return CutOutcome::DroppedEquivalent;
                }
            }
        }

        let rhs_key = rhs;
        let terms_key = self.preventive_key(&terms);

        if let Some(slack) = spec.slack {
            terms.push((slack, if spec.upper { -1.0 } else { 1.0 }));
        }

        // Parade cuts bind only when the parade is selected
        let mut final_rhs = rhs;
        if let Some(pid) = parade {
            let delta = self.registry.parade_activation[&pid];
            if spec.upper {
                terms.push((delta, FACTOR_INACTIVE_CONSTRAINT));
                final_rhs += FACTOR_INACTIVE_CONSTRAINT;
            } else {
                terms.push((delta, -FACTOR_INACTIVE_CONSTRAINT));
                final_rhs -= FACTOR_INACTIVE_CONSTRAINT;
            }
        }

        let sense = if spec.upper { RowSense::Le } else { RowSense::Ge };
        let contingency_tag = match spec.contingency {
            None => "N".to_string(),
            Some(c) => format!("inc{}", c.value()),
        };
        let side = if spec.upper { "max" } else { "min" };
        let row = self.problem.add_row(
            format!("cut_{side}::{}::{}", spec.monitor_name, contingency_tag),
            terms,
            sense,
            final_rhs,
        );

        self.total_cuts += 1;
        if let Some(father) = spec.father {
            *self.cuts_by_father.entry(father).or_insert(0) += 1;
        }
        self.stored_cuts.push(StoredCut {
            row,
            monitor: spec.monitor,
            contingency: spec.contingency,
            parade,
            father: spec.father,
            upper: spec.upper,
            terms_key,
            rhs_key,
        });
        CutOutcome::Added(row)
    }

    /// Terms restricted to the shared preventive block, the part siblings
    /// can meaningfully be compared on.
    fn preventive_key(&self, terms: &[(usize, f64)]) -> Vec<(usize, f64)> {
        terms
            .iter()
            .filter(|&&(col, _)| col < self.preventive_columns)
            .copied()
            .collect()
    }
}

/// Coefficient sets equal within the equivalence tolerance. Both inputs are
/// sorted by column.
fn terms_equivalent(a: &[(usize, f64)], b: &[(usize, f64)]) -> bool {
    let mut ia = a.iter().peekable();
    let mut ib = b.iter().peekable();
    loop {
        match (ia.peek(), ib.peek()) {
            (None, None) => return true,
            (Some(&&(_, ca)), None) => {
                if ca.abs() > EPSILON_CONSTRAINT_EQ {
                    return false;
                }
                ia.next();
            }
            (None, Some(&&(_, cb))) => {
                if cb.abs() > EPSILON_CONSTRAINT_EQ {
                    return false;
                }
                ib.next();
            }
            (Some(&&(col_a, ca)), Some(&&(col_b, cb))) => {
                if col_a == col_b {
                    if (ca - cb).abs() > EPSILON_CONSTRAINT_EQ {
                        return false;
                    }
                    ia.next();
                    ib.next();
                } else if col_a < col_b {
                    if ca.abs() > EPSILON_CONSTRAINT_EQ {
                        return false;
                    }
                    ia.next();
                } else {
                    if cb.abs() > EPSILON_CONSTRAINT_EQ {
                        return false;
                    }
                    ib.next();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ComputationOptions;

    fn builder() -> LpBuilder {
        LpBuilder::new(ComputationOptions::default(), Vec::new(), 0.0)
    }

    fn spec(terms: Vec<(usize, f64)>, upper: bool) -> CutSpec {
        CutSpec {
            monitor: MonitorId::new(0),
            monitor_name: "m".into(),
            contingency: None,
            father: None,
            upper,
            limit_mw: 100.0,
            transit_mw: 130.0,
            terms,
            slack: None,
        }
    }

    #[test]
    fn test_upper_cut_rhs_carries_margin() {
        let mut b = builder();
        let x = b.problem.add_column("x", 0.0, 100.0, 1.0);
        let outcome = b.add_transit_cut(&spec(vec![(x, 0.5)], true), &[10.0]);
        let CutOutcome::Added(row) = outcome else {
            panic!("cut must be added");
        };
        // fixed = 130 − 0.5·10 = 125; rhs = 100 − 125 − margin
        let expected = 100.0 - 125.0 - ACCEPTABLE_DIFF;
        assert!((b.problem.rows[row].rhs - expected).abs() < 1e-9);
        assert_eq!(b.problem.rows[row].sense, RowSense::Le);
    }

    #[test]
    fn test_lower_cut_sense_and_rhs() {
        let mut b = builder();
        let x = b.problem.add_column("x", 0.0, 100.0, 1.0);
        let mut s = spec(vec![(x, 1.0)], false);
        s.transit_mw = -130.0;
        let CutOutcome::Added(row) = b.add_transit_cut(&s, &[0.0]) else {
            panic!("cut must be added");
        };
        // fixed = −130; rhs = −100 + 130 + margin
        let expected = -100.0 + 130.0 + ACCEPTABLE_DIFF;
        assert!((b.problem.rows[row].rhs - expected).abs() < 1e-9);
        assert_eq!(b.problem.rows[row].sense, RowSense::Ge);
    }

    #[test]
    fn test_tiny_coefficients_dropped() {
        let mut b = builder();
        let x = b.problem.add_column("x", 0.0, 100.0, 1.0);
        let y = b.problem.add_column("y", 0.0, 100.0, 1.0);
        let CutOutcome::Added(row) =
            b.add_transit_cut(&spec(vec![(x, 1e-9), (y, 0.7)], true), &[0.0, 0.0])
        else {
            panic!("cut must be added");
        };
        assert_eq!(b.problem.rows[row].terms.len(), 1);
        assert_eq!(b.problem.rows[row].terms[0].0, y);
    }

    #[test]
    fn test_terms_equivalent_handles_missing_columns() {
        assert!(terms_equivalent(
            &[(0, 0.5), (2, 1e-9)],
            &[(0, 0.5 + 1e-9)]
        ));
        assert!(!terms_equivalent(&[(0, 0.5)], &[(0, 0.6)]));
        assert!(!terms_equivalent(&[(1, 0.5)], &[(0, 0.5)]));
    }
}
