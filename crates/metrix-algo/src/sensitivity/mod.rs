//! Sensitivity engine: B′ factorization, PTDFs, per-contingency models.
//!
//! One engine instance lives per topology group. It owns the "live" B′
//! factorization, the memoized PTDF columns, and a cache of per-contingency
//! models: rank-k Woodbury sets for ordinary outages ([`outage`]) and
//! dedicated factorizations for connectivity-breaking ones ([`pocket`]),
//! keyed by their opened/closed branch sets.

pub mod outage;
pub mod pocket;

use std::collections::{HashMap, HashSet};

use metrix_core::{BranchId, Contingency, ContingencyId, GenId, LostPocket, MonitoredElement, Network};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::ZERO_POWER;
use crate::sparse::lu::{DenseLu, LuError};
use crate::sparse::susceptance::{SusceptanceError, SusceptanceMatrix};

pub use outage::{LineOutageSet, OutagedLine};
pub use pocket::PocketModel;

#[derive(Debug, Error)]
pub enum SensitivityError {
    #[error(transparent)]
    Susceptance(#[from] SusceptanceError),

    #[error(transparent)]
    Lu(#[from] LuError),

    #[error("Contingency {0} was not prepared")]
    NotPrepared(String),
}

/// Cache key for breaking topologies: sorted opened and closed branch sets.
pub type PocketKey = (Vec<BranchId>, Vec<BranchId>);

/// Topology model of one prepared contingency.
#[derive(Debug)]
pub enum OutageTopology {
    /// No branch state change (generator/HVDC trips only)
    Unchanged,
    /// Rank-k Woodbury model over the base factorization
    Lines(LineOutageSet),
    /// Connectivity-breaking: dedicated factorization in the pocket cache
    Pocket(PocketKey),
}

/// Prepared per-contingency data.
#[derive(Debug)]
pub struct PreparedContingency {
    pub topology: OutageTopology,
    /// Compensation shares applied when this contingency trips generators,
    /// proportional to the surviving half-bands.
    pub compensation: Vec<(GenId, f64)>,
}

impl PreparedContingency {
    pub fn breaks_connectivity(&self) -> bool {
        matches!(self.topology, OutageTopology::Pocket(_))
    }
}

/// The sensitivity engine for one topology group.
pub struct SensitivityEngine {
    n: usize,
    b_prime: SusceptanceMatrix,
    lu: DenseLu,
    ptdf: HashMap<BranchId, Vec<f64>>,
    prepared: HashMap<ContingencyId, PreparedContingency>,
    pockets: HashMap<PocketKey, PocketModel>,
}

impl SensitivityEngine {
    /// Build and factor B′ for the network's current topology.
    pub fn new(network: &Network) -> Result<Self, SensitivityError> {
        let b_prime =
            SusceptanceMatrix::build(network, &HashSet::new(), &HashSet::new(), None)?;
        let lu = b_prime.factor()?;
        let n = b_prime.n();
        debug!(nodes = n, nnz = b_prime.nnz(), "factored B′");
        Ok(Self {
            n,
            b_prime,
            lu,
            ptdf: HashMap::new(),
            prepared: HashMap::new(),
            pockets: HashMap::new(),
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn reference_mask(&self) -> &[bool] {
        self.b_prime.reference_mask()
    }

    /// Refactor after a topology change; every cache depends on B′ and is
    /// dropped.
    pub fn rebuild(&mut self, network: &Network) -> Result<(), SensitivityError> {
        let b_prime =
            SusceptanceMatrix::build(network, &HashSet::new(), &HashSet::new(), None)?;
        self.lu = b_prime.factor()?;
        self.n = b_prime.n();
        self.b_prime = b_prime;
        self.ptdf.clear();
        self.prepared.clear();
        self.pockets.clear();
        Ok(())
    }

    /// Drop the per-contingency caches (topology group boundary).
    pub fn clear_contingency_cache(&mut self) {
        self.prepared.clear();
        self.pockets.clear();
    }

    /// Solve B′·θ = P. Reference entries of P are ignored and come back as
    /// zero phases.
    pub fn solve_phases(&self, injections: &[f64]) -> Result<Vec<f64>, SensitivityError> {
        let mut rhs = injections.to_vec();
        self.b_prime.mask_references(&mut rhs);
        Ok(self.lu.solve(&rhs)?)
    }

    /// PTDF column of a branch: nodal sensitivities of its flow. Memoized
    /// until the next rebuild.
    pub fn ptdf(&mut self, network: &Network, branch: BranchId) -> Result<Vec<f64>, SensitivityError> {
        if let Some(row) = self.ptdf.get(&branch) {
            return Ok(row.clone());
        }
        let b = network.branch(branch);
        let mut e = vec![0.0; self.n];
        e[b.from.value()] = b.susceptance;
        e[b.to.value()] = -b.susceptance;
        self.b_prime.mask_references(&mut e);
        let mut row = self.lu.solve(&e)?;
        // Injections at eliminated phases must not influence sensitivities
        self.b_prime.mask_references(&mut row);
        self.ptdf.insert(branch, row.clone());
        Ok(row)
    }

    /// Prepare the topology and compensation model of a contingency.
    /// Returns the pocket descriptor when the contingency breaks
    /// connectivity, so the caller can record it on the contingency.
    pub fn prepare_contingency(
        &mut self,
        network: &Network,
        contingency: &Contingency,
    ) -> Result<Option<LostPocket>, SensitivityError> {
        let mut lines = Vec::new();
        for &bid in &contingency.tripped_branches {
            let branch = network.branch(bid);
            if !branch.connected {
                continue;
            }
            lines.push(OutagedLine::opening(
                bid,
                branch.from.value(),
                branch.to.value(),
                branch.susceptance,
            ));
        }
        for &bid in &contingency.closed_branches {
            let branch = network.branch(bid);
            if branch.connected {
                continue;
            }
            lines.push(OutagedLine::closing(
                bid,
                branch.from.value(),
                branch.to.value(),
                branch.susceptance,
            ));
        }

        let compensation = self.compensation_shares(network, contingency);

        if lines.is_empty() {
            self.prepared.insert(
                contingency.id,
                PreparedContingency {
                    topology: OutageTopology::Unchanged,
                    compensation,
                },
            );
            return Ok(None);
        }

        match LineOutageSet::build(&self.lu, self.b_prime.reference_mask(), lines)? {
            Some(set) => {
                self.prepared.insert(
                    contingency.id,
                    PreparedContingency {
                        topology: OutageTopology::Lines(set),
                        compensation,
                    },
                );
                Ok(None)
            }
            None => {
                // Connectivity is lost: build (or reuse) the pocket model
                let key = contingency.topology_key();
                if !self.pockets.contains_key(&key) {
                    let opened: HashSet<BranchId> = key.0.iter().copied().collect();
                    let closed: HashSet<BranchId> = key.1.iter().copied().collect();
                    let model = PocketModel::build(network, &opened, &closed)?;
                    self.pockets.insert(key.clone(), model);
                } else {
                    debug!(contingency = %contingency.name, "pocket factorization cache hit");
                }
                let descriptor = self.pockets[&key].descriptor();
                // The pocket overrides the half-band compensation: shares
                // follow Pmax over the surviving machines
                let compensation = self.pockets[&key].redistribution.clone();
                self.prepared.insert(
                    contingency.id,
                    PreparedContingency {
                        topology: OutageTopology::Pocket(key),
                        compensation,
                    },
                );
                warn!(contingency = %contingency.name, "contingency breaks connectivity");
                Ok(Some(descriptor))
            }
        }
    }

    /// Compensation shares over the generators surviving the contingency,
    /// proportional to the surviving half-band weighted by each machine's
    /// participation factor. Empty when the contingency trips no generator
    /// or nothing survives to compensate.
    fn compensation_shares(&self, network: &Network, contingency: &Contingency) -> Vec<(GenId, f64)> {
        if contingency.tripped_generators.is_empty() {
            return Vec::new();
        }
        let tripped: HashSet<GenId> = contingency.tripped_generators.iter().copied().collect();
        let weight = |g: &metrix_core::Generator| g.half_band_mw * g.participation;
        let survivors: Vec<&metrix_core::Generator> = network
            .generators
            .iter()
            .filter(|g| g.connected && !tripped.contains(&g.id) && weight(g) > 0.0)
            .collect();
        let total: f64 = survivors.iter().map(|g| weight(g)).sum();
        if total <= ZERO_POWER {
            return Vec::new();
        }
        survivors
            .iter()
            .map(|g| (g.id, weight(g) / total))
            .collect()
    }

    pub fn prepared(&self, id: ContingencyId) -> Option<&PreparedContingency> {
        self.prepared.get(&id)
    }

    pub fn pocket(&self, key: &PocketKey) -> Option<&PocketModel> {
        self.pockets.get(key)
    }

    /// Post-contingency phases from a contingency-adjusted injection
    /// vector (tripped generators/HVDCs and curative actions already folded
    /// in by the caller).
    pub fn post_contingency_theta(
        &self,
        network: &Network,
        id: ContingencyId,
        injections: &[f64],
    ) -> Result<Vec<f64>, SensitivityError> {
        let prep = self
            .prepared
            .get(&id)
            .ok_or_else(|| SensitivityError::NotPrepared(format!("#{}", id.value())))?;
        match &prep.topology {
            OutageTopology::Unchanged => self.solve_phases(injections),
            OutageTopology::Lines(set) => {
                let theta = self.solve_phases(injections)?;
                Ok(set.post_theta(&theta)?)
            }
            OutageTopology::Pocket(key) => {
                let model = &self.pockets[key];
                Ok(model.solve_phases(network, injections)?)
            }
        }
    }

    /// Nodal sensitivity row of a monitored element under a contingency
    /// (`None` contingency = base case). Returns `Ok(None)` when every
    /// branch term of the monitor is de-energized by the topology.
    pub fn monitor_row(
        &mut self,
        network: &Network,
        monitor: &MonitoredElement,
        contingency: Option<ContingencyId>,
    ) -> Result<Option<Vec<f64>>, SensitivityError> {
        let terms = monitor.branch_terms();

        enum RowKind {
            Base,
            Lines(Vec<BranchId>),
            Pocket(PocketKey),
        }

        let kind = match contingency {
            None => RowKind::Base,
            Some(id) => {
                let prep = self
                    .prepared
                    .get(&id)
                    .ok_or_else(|| SensitivityError::NotPrepared(format!("#{}", id.value())))?;
                match &prep.topology {
                    OutageTopology::Unchanged => RowKind::Base,
                    OutageTopology::Lines(set) => RowKind::Lines(
                        set.lines()
                            .iter()
                            .filter(|l| l.delta < 0.0)
                            .map(|l| l.branch)
                            .collect(),
                    ),
                    OutageTopology::Pocket(key) => RowKind::Pocket(key.clone()),
                }
            }
        };

        match kind {
            RowKind::Base => self.base_monitor_row(network, &terms),
            RowKind::Pocket(key) => self.pocket_monitor_row(network, &terms, &key),
            RowKind::Lines(outaged) => {
                let mut live_terms: Vec<(usize, usize, f64)> = Vec::new();
                let mut row = vec![0.0; self.n];
                let mut any = false;
                for &(bid, weight) in &terms {
                    if outaged.contains(&bid) {
                        continue;
                    }
                    let branch = network.branch(bid);
                    if !branch.connected {
                        continue;
                    }
                    let ptdf = self.ptdf(network, bid)?;
                    for (r, p) in row.iter_mut().zip(&ptdf) {
                        *r += weight * p;
                    }
                    live_terms.push((
                        branch.from.value(),
                        branch.to.value(),
                        weight * branch.susceptance,
                    ));
                    any = true;
                }
                if !any {
                    return Ok(None);
                }
                let id = contingency.expect("lines row implies a contingency");
                if let Some(PreparedContingency {
                    topology: OutageTopology::Lines(set),
                    ..
                }) = self.prepared.get(&id)
                {
                    let h = set.monitor_response(&live_terms);
                    set.correct_row(&mut row, &h)?;
                }
                Ok(Some(row))
            }
        }
    }

    /// Whether a branch still carries power under the given contingency.
    pub fn branch_live(
        &self,
        network: &Network,
        contingency: Option<ContingencyId>,
        branch: BranchId,
    ) -> bool {
        let b = network.branch(branch);
        if !b.connected {
            return false;
        }
        let Some(prep) = contingency.and_then(|id| self.prepared.get(&id)) else {
            return true;
        };
        match &prep.topology {
            OutageTopology::Unchanged => true,
            OutageTopology::Lines(set) => !set.contains(branch),
            OutageTopology::Pocket(key) => {
                let model = &self.pockets[key];
                let opened = key.0.contains(&branch);
                !opened && !model.dead[b.from.value()] && !model.dead[b.to.value()]
            }
        }
    }

    fn base_monitor_row(
        &mut self,
        network: &Network,
        terms: &[(BranchId, f64)],
    ) -> Result<Option<Vec<f64>>, SensitivityError> {
        let mut row = vec![0.0; self.n];
        let mut any = false;
        for &(bid, weight) in terms {
            if !network.branch(bid).connected {
                continue;
            }
            let ptdf = self.ptdf(network, bid)?;
            for (r, p) in row.iter_mut().zip(&ptdf) {
                *r += weight * p;
            }
            any = true;
        }
        Ok(any.then_some(row))
    }

    fn pocket_monitor_row(
        &mut self,
        network: &Network,
        terms: &[(BranchId, f64)],
        key: &PocketKey,
    ) -> Result<Option<Vec<f64>>, SensitivityError> {
        let model = &self.pockets[key];
        let mut row = vec![0.0; self.n];
        let mut any = false;
        for &(bid, weight) in terms {
            if !network.branch(bid).connected {
                continue;
            }
            if let Some(branch_row) = model.branch_row(network, bid)? {
                for (r, p) in row.iter_mut().zip(&branch_row) {
                    *r += weight * p;
                }
                any = true;
            }
        }
        Ok(any.then_some(row))
    }
}
