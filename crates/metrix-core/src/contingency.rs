//! Contingencies (`Incident`), curative resources and topological parades.
//!
//! A parade is itself a contingency record: it shares its father's tripped
//! set, adds its own opened/closed branches, and carries its own curative
//! list. Parade activation is gated by a binary variable owned by the
//! constraint generator; here we only keep the family structure.

use std::collections::HashMap;

use crate::{BranchId, ContingencyId, GenId, HvdcId, LoadId, MonitorId, NodeId, PstId};

/// A curative resource usable only after a given contingency fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurativeElement {
    PhaseShifter(PstId),
    /// Fictitious PST owned by an HVDC in AC-emulation mode
    FictitiousPhaseShifter(PstId),
    Hvdc(HvdcId),
    Generator(GenId),
    Load(LoadId),
}

/// Sub-network disconnected by a contingency.
#[derive(Debug, Clone, Default)]
pub struct LostPocket {
    pub nodes: Vec<NodeId>,
    /// True when the pocket contains both generation and load; a dedicated
    /// factorization of the surviving subgraph is then required.
    pub has_injections: bool,
    pub lost_generation_mw: f64,
    pub lost_load_mw: f64,
}

#[derive(Debug, Clone)]
pub struct Contingency {
    pub id: ContingencyId,
    pub name: String,
    pub tripped_branches: Vec<BranchId>,
    /// Branches closed by this record (parades and couplings)
    pub closed_branches: Vec<BranchId>,
    pub tripped_generators: Vec<GenId>,
    pub tripped_hvdcs: Vec<HvdcId>,
    pub curative_elements: Vec<CurativeElement>,
    /// Child parade records (father side)
    pub parades: Vec<ContingencyId>,
    /// Father contingency (parade side)
    pub father: Option<ContingencyId>,
    /// Restriction of the monitors a parade may relieve; `None` = all
    pub authorized_monitors: Option<Vec<MonitorId>>,
    pub probability: Option<f64>,
    pub valid: bool,
    /// Filled during sensitivity preparation when the contingency
    /// disconnects part of the network.
    pub pocket: Option<LostPocket>,
    pub breaks_connectivity: bool,
}

impl Contingency {
    pub fn new(id: ContingencyId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tripped_branches: Vec::new(),
            closed_branches: Vec::new(),
            tripped_generators: Vec::new(),
            tripped_hvdcs: Vec::new(),
            curative_elements: Vec::new(),
            parades: Vec::new(),
            father: None,
            authorized_monitors: None,
            probability: None,
            valid: true,
            pocket: None,
            breaks_connectivity: false,
        }
    }

    pub fn is_parade(&self) -> bool {
        self.father.is_some()
    }

    /// True for the "do nothing" parade of the given father: no branch
    /// closed and no opening beyond the father's tripped set.
    pub fn is_do_nothing(&self, father: &Contingency) -> bool {
        self.is_parade()
            && self.closed_branches.is_empty()
            && self.tripped_branches == father.tripped_branches
    }

    /// Cache key for connectivity-breaking factorizations: the sorted
    /// opened/closed branch sets.
    pub fn topology_key(&self) -> (Vec<BranchId>, Vec<BranchId>) {
        let mut opened = self.tripped_branches.clone();
        opened.sort_unstable();
        let mut closed = self.closed_branches.clone();
        closed.sort_unstable();
        (opened, closed)
    }

    /// Whether this record changes any branch state at all.
    pub fn touches_topology(&self) -> bool {
        !self.tripped_branches.is_empty() || !self.closed_branches.is_empty()
    }

    pub fn may_relieve(&self, monitor: MonitorId) -> bool {
        match &self.authorized_monitors {
            None => true,
            Some(list) => list.contains(&monitor),
        }
    }
}

/// All contingencies of a run, fathers and parades in one arena.
#[derive(Debug, Clone, Default)]
pub struct ContingencySet {
    pub contingencies: Vec<Contingency>,
    by_name: HashMap<String, ContingencyId>,
}

impl ContingencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut contingency: Contingency) -> ContingencyId {
        let id = ContingencyId::new(self.contingencies.len());
        contingency.id = id;
        self.by_name.insert(contingency.name.clone(), id);
        if let Some(father) = contingency.father {
            self.contingencies[father.value()].parades.push(id);
        }
        self.contingencies.push(contingency);
        id
    }

    pub fn get(&self, id: ContingencyId) -> &Contingency {
        &self.contingencies[id.value()]
    }

    pub fn get_mut(&mut self, id: ContingencyId) -> &mut Contingency {
        &mut self.contingencies[id.value()]
    }

    pub fn by_name(&self, name: &str) -> Option<ContingencyId> {
        self.by_name.get(name).copied()
    }

    /// Iterator over valid father contingencies (excludes parades).
    pub fn fathers(&self) -> impl Iterator<Item = &Contingency> {
        self.contingencies
            .iter()
            .filter(|c| c.valid && !c.is_parade())
    }

    pub fn len(&self) -> usize {
        self.contingencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contingencies.is_empty()
    }

    /// Append a synthetic "do nothing" parade to every father that declares
    /// at least one parade, so that the activation exclusivity row can be an
    /// equality (∑δ = 1).
    pub fn complete_parade_families(&mut self) {
        let fathers: Vec<ContingencyId> = self
            .contingencies
            .iter()
            .filter(|c| !c.is_parade() && !c.parades.is_empty())
            .map(|c| c.id)
            .collect();
        for father_id in fathers {
            let father = self.get(father_id);
            let already_has_noop = father.parades.iter().any(|&p| {
                let parade = self.get(p);
                parade.closed_branches.is_empty()
                    && parade.tripped_branches == father.tripped_branches
            });
            if already_has_noop {
                continue;
            }
            let mut noop = Contingency::new(
                ContingencyId::new(0),
                format!("{}::do-nothing", father.name),
            );
            noop.tripped_branches = father.tripped_branches.clone();
            noop.tripped_generators = father.tripped_generators.clone();
            noop.tripped_hvdcs = father.tripped_hvdcs.clone();
            noop.curative_elements = father.curative_elements.clone();
            noop.probability = father.probability;
            noop.father = Some(father_id);
            self.add(noop);
        }
    }
}
