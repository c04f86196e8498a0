//! The typed key-value case file.
//!
//! One record per line, `;`-separated:
//!
//! ```text
//! BUCKET;KEY;value[;value...]
//! ```
//!
//! with `BUCKET ∈ {INTEGER, FLOAT, DOUBLE, STRING, BOOLEAN}`. Per-element
//! attributes come as parallel arrays indexed 0..N-1 (`GEN_NODE`,
//! `GEN_PMAX`, ...); scalars describe dimensions and computation options.
//! `#` starts a comment. The reader validates bucket/usage consistency,
//! array arities against the declared dimensions, and the presence of
//! every required key, then assembles the [`Case`].

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use metrix_algo::{ComputationMode, ComputationOptions};
use metrix_core::{
    Adjustability, BranchId, BranchKind, Contingency, ContingencyId, ContingencySet,
    CouplingGroup, CouplingReference, CurativeElement, DirectionalLimit, GenId, Generator, HvdcId,
    HvdcLink, HvdcMode, Load, LoadId, MonitorId, MonitoredElement, MonitoredPart, Network, NodeId,
    PhaseShifter, PstId, PstMode, Thresholds, THRESHOLD_UNSET,
};
use tracing::{debug, info};

use crate::IoError;

/// One parsed value table.
#[derive(Debug, Default)]
pub struct ConfigTable {
    entries: HashMap<String, (String, Vec<String>)>,
}

impl ConfigTable {
    pub fn parse<R: BufRead>(reader: R, file: &str) -> Result<Self, IoError> {
        let mut entries = HashMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut parts = trimmed.split(';');
            let bucket = parts.next().unwrap_or_default().to_string();
            let key = parts.next().map(str::to_string).ok_or(IoError::Syntax {
                file: file.to_string(),
                line: idx + 1,
                message: "expected BUCKET;KEY;values".into(),
            })?;
            if !matches!(
                bucket.as_str(),
                "INTEGER" | "FLOAT" | "DOUBLE" | "STRING" | "BOOLEAN"
            ) {
                return Err(IoError::Syntax {
                    file: file.to_string(),
                    line: idx + 1,
                    message: format!("unknown bucket '{bucket}'"),
                });
            }
            let values: Vec<String> = parts.map(str::to_string).collect();
            entries.insert(key, (bucket, values));
        }
        Ok(Self { entries })
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn values(&self, key: &str) -> Result<&[String], IoError> {
        self.entries
            .get(key)
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| IoError::MissingKey(key.to_string()))
    }

    pub fn int(&self, key: &str) -> Result<i64, IoError> {
        self.int_array(key, 1).map(|v| v[0])
    }

    pub fn int_array(&self, key: &str, expected: usize) -> Result<Vec<i64>, IoError> {
        let values = self.values(key)?;
        if values.len() != expected {
            return Err(IoError::Arity {
                key: key.to_string(),
                expected,
                found: values.len(),
            });
        }
        values
            .iter()
            .map(|v| {
                v.parse().map_err(|_| IoError::BadValue {
                    key: key.to_string(),
                    message: format!("'{v}' is not an integer"),
                })
            })
            .collect()
    }

    pub fn double(&self, key: &str) -> Result<f64, IoError> {
        self.double_array(key, 1).map(|v| v[0])
    }

    pub fn double_array(&self, key: &str, expected: usize) -> Result<Vec<f64>, IoError> {
        let values = self.values(key)?;
        if values.len() != expected {
            return Err(IoError::Arity {
                key: key.to_string(),
                expected,
                found: values.len(),
            });
        }
        values
            .iter()
            .map(|v| {
                v.parse().map_err(|_| IoError::BadValue {
                    key: key.to_string(),
                    message: format!("'{v}' is not a number"),
                })
            })
            .collect()
    }

    pub fn string(&self, key: &str) -> Result<String, IoError> {
        self.string_array(key, 1).map(|mut v| v.remove(0))
    }

    pub fn string_array(&self, key: &str, expected: usize) -> Result<Vec<String>, IoError> {
        let values = self.values(key)?;
        if values.len() != expected {
            return Err(IoError::Arity {
                key: key.to_string(),
                expected,
                found: values.len(),
            });
        }
        Ok(values.to_vec())
    }

    pub fn boolean(&self, key: &str) -> Result<bool, IoError> {
        let v = self.string(key)?;
        match v.as_str() {
            "1" | "true" | "TRUE" => Ok(true),
            "0" | "false" | "FALSE" => Ok(false),
            other => Err(IoError::BadValue {
                key: key.to_string(),
                message: format!("'{other}' is not a boolean"),
            }),
        }
    }

    fn opt_double(&self, key: &str, default: f64) -> Result<f64, IoError> {
        if self.has(key) {
            self.double(key)
        } else {
            Ok(default)
        }
    }

    fn opt_int(&self, key: &str, default: i64) -> Result<i64, IoError> {
        if self.has(key) {
            self.int(key)
        } else {
            Ok(default)
        }
    }

    fn opt_bool(&self, key: &str, default: bool) -> Result<bool, IoError> {
        if self.has(key) {
            self.boolean(key)
        } else {
            Ok(default)
        }
    }
}

/// Name → handle lookups used by the variant and parade readers.
#[derive(Debug, Default)]
pub struct ModelIndex {
    pub nodes: HashMap<String, NodeId>,
    pub zones: HashMap<String, metrix_core::ZoneId>,
    pub branches: HashMap<String, BranchId>,
    pub generators: HashMap<String, GenId>,
    pub loads: HashMap<String, LoadId>,
    pub phase_shifters: HashMap<String, PstId>,
    pub hvdc_links: HashMap<String, HvdcId>,
    pub monitors: HashMap<String, MonitorId>,
}

impl ModelIndex {
    pub fn build(network: &Network, monitors: &[MonitoredElement]) -> Self {
        let mut index = Self::default();
        for node in &network.nodes {
            index.nodes.insert(node.name.clone(), node.id);
        }
        for zone in &network.zones {
            index.zones.insert(zone.name.clone(), zone.id);
        }
        for branch in &network.branches {
            index.branches.insert(branch.name.clone(), branch.id);
        }
        for gen in &network.generators {
            index.generators.insert(gen.name.clone(), gen.id);
        }
        for load in &network.loads {
            index.loads.insert(load.name.clone(), load.id);
        }
        for pst in &network.phase_shifters {
            index.phase_shifters.insert(pst.name.clone(), pst.id);
        }
        for link in &network.hvdc_links {
            index.hvdc_links.insert(link.name.clone(), link.id);
        }
        for monitor in monitors {
            index.monitors.insert(monitor.name.clone(), monitor.id);
        }
        index
    }
}

/// Everything the case file describes.
#[derive(Debug)]
pub struct Case {
    pub network: Network,
    pub monitors: Vec<MonitoredElement>,
    pub contingencies: ContingencySet,
    pub options: ComputationOptions,
    pub index: ModelIndex,
    /// Optional log level 0..5
    pub log_level: Option<u8>,
}

/// Read and assemble a case file.
pub fn load_case(path: &Path) -> Result<Case, IoError> {
    let file = std::fs::File::open(path)?;
    let table = ConfigTable::parse(
        std::io::BufReader::new(file),
        &path.display().to_string(),
    )?;
    build_case(&table)
}

/// Sentinel-aware threshold slot.
fn limit(value: f64) -> Option<f64> {
    (value < THRESHOLD_UNSET).then_some(value)
}

pub fn build_case(table: &ConfigTable) -> Result<Case, IoError> {
    let mut network = Network::new(if table.has("CASE_NAME") {
        table.string("CASE_NAME")?
    } else {
        "case".to_string()
    });

    // Zones and nodes
    let nb_zones = table.int("NB_ZONES")? as usize;
    let nb_nodes = table.int("NB_NODES")? as usize;
    let zone_names = table.string_array("ZONE_NAME", nb_zones)?;
    let zone_balance = table.int_array("ZONE_BALANCE_NODE", nb_zones)?;
    let node_names = table.string_array("NODE_NAME", nb_nodes)?;
    let node_zones = table.int_array("NODE_ZONE", nb_nodes)?;

    for name in &node_names {
        network.add_node(name.clone());
    }
    for (zone_idx, name) in zone_names.iter().enumerate() {
        let balance = zone_balance[zone_idx] as usize;
        if balance >= nb_nodes {
            return Err(IoError::BadValue {
                key: "ZONE_BALANCE_NODE".into(),
                message: format!("node index {balance} out of range"),
            });
        }
        network.add_zone(name.clone(), NodeId::new(balance));
    }
    for (node_idx, &zone) in node_zones.iter().enumerate() {
        if zone >= 0 {
            if zone as usize >= nb_zones {
                return Err(IoError::BadValue {
                    key: "NODE_ZONE".into(),
                    message: format!("zone index {zone} out of range"),
                });
            }
            network.assign_zone(NodeId::new(node_idx), metrix_core::ZoneId::new(zone as usize));
        }
    }

    // Branches
    let nb_branches = table.int("NB_BRANCHES")? as usize;
    let branch_names = table.string_array("BRANCH_NAME", nb_branches)?;
    let branch_from = table.int_array("BRANCH_FROM", nb_branches)?;
    let branch_to = table.int_array("BRANCH_TO", nb_branches)?;
    let branch_y = table.double_array("BRANCH_ADMITTANCE", nb_branches)?;
    let branch_u2y = table.double_array("BRANCH_SUSCEPTANCE", nb_branches)?;
    let branch_r = table.double_array("BRANCH_RESISTANCE", nb_branches)?;
    for i in 0..nb_branches {
        network.add_branch(
            branch_names[i].clone(),
            NodeId::new(branch_from[i] as usize),
            NodeId::new(branch_to[i] as usize),
            branch_y[i],
            branch_u2y[i],
            branch_r[i],
            BranchKind::Real,
        );
    }

    // Generators
    let nb_gens = table.int("NB_GENERATORS")? as usize;
    if nb_gens > 0 {
        let names = table.string_array("GEN_NAME", nb_gens)?;
        let nodes = table.int_array("GEN_NODE", nb_gens)?;
        let p0 = table.double_array("GEN_P0", nb_gens)?;
        let pmin = table.double_array("GEN_PMIN", nb_gens)?;
        let pmax = table.double_array("GEN_PMAX", nb_gens)?;
        let half_band = table.double_array("GEN_HALF_BAND", nb_gens)?;
        let adjust = table.int_array("GEN_ADJUSTABLE", nb_gens)?;
        let cost_up_hr = table.double_array("GEN_COST_UP_HR", nb_gens)?;
        let cost_up_ar = table.double_array("GEN_COST_UP_AR", nb_gens)?;
        let cost_down_hr = table.double_array("GEN_COST_DOWN_HR", nb_gens)?;
        let cost_down_ar = table.double_array("GEN_COST_DOWN_AR", nb_gens)?;
        let participation = if table.has("GEN_PARTICIPATION") {
            table.double_array("GEN_PARTICIPATION", nb_gens)?
        } else {
            vec![1.0; nb_gens]
        };
        let kinds = if table.has("GEN_TYPE") {
            table.string_array("GEN_TYPE", nb_gens)?
        } else {
            vec![String::new(); nb_gens]
        };
        for i in 0..nb_gens {
            network.add_generator(Generator {
                id: GenId::new(0),
                name: names[i].clone(),
                node: NodeId::new(nodes[i] as usize),
                p0_mw: p0[i],
                pmin_mw: pmin[i],
                pmax_mw: pmax[i],
                half_band_mw: half_band[i],
                adjustable: match adjust[i] {
                    0 => Adjustability::None,
                    1 => Adjustability::PreventiveOnly,
                    2 => Adjustability::CurativeOnly,
                    _ => Adjustability::Both,
                },
                cost_up_hr: cost_up_hr[i],
                cost_up_ar: cost_up_ar[i],
                cost_down_hr: cost_down_hr[i],
                cost_down_ar: cost_down_ar[i],
                kind: kinds[i].clone(),
                participation: participation[i],
                connected: true,
            });
        }
    }

    // Loads
    let nb_loads = table.int("NB_LOADS")? as usize;
    if nb_loads > 0 {
        let names = table.string_array("LOAD_NAME", nb_loads)?;
        let nodes = table.int_array("LOAD_NODE", nb_loads)?;
        let values = table.double_array("LOAD_VALUE", nb_loads)?;
        let shed_cost = table.double_array("LOAD_SHED_COST", nb_loads)?;
        let shed_pct = table.double_array("LOAD_SHED_PCT", nb_loads)?;
        let curative_pct = table.double_array("LOAD_CURATIVE_PCT", nb_loads)?;
        for i in 0..nb_loads {
            network.add_load(Load {
                id: LoadId::new(0),
                name: names[i].clone(),
                node: NodeId::new(nodes[i] as usize),
                value_mw: values[i],
                shed_cost: shed_cost[i],
                shed_pct: shed_pct[i],
                curative_pct: curative_pct[i],
            });
        }
    }

    // Phase-shifters (optional block)
    let nb_psts = table.opt_int("NB_PSTS", 0)? as usize;
    if nb_psts > 0 {
        let names = table.string_array("PST_NAME", nb_psts)?;
        let branches = table.int_array("PST_BRANCH", nb_psts)?;
        let modes = table.int_array("PST_MODE", nb_psts)?;
        let setpoints = table.double_array("PST_SETPOINT", nb_psts)?;
        let pmin = table.double_array("PST_PMIN", nb_psts)?;
        let pmax = table.double_array("PST_PMAX", nb_psts)?;
        let low_tap = table.int_array("PST_LOWTAP", nb_psts)?;
        let nb_taps = table.int_array("PST_NBTAPS", nb_psts)?;
        let tap_step = table.double_array("PST_TAP_STEP_DEG", nb_psts)?;
        let activation = if table.has("PST_PREVENTIVE_ACTIVATION") {
            table.int_array("PST_PREVENTIVE_ACTIVATION", nb_psts)?
        } else {
            vec![0; nb_psts]
        };
        for i in 0..nb_psts {
            let branch = BranchId::new(branches[i] as usize);
            network.branches[branch.value()].kind = BranchKind::PhaseShifterSupport;
            network.add_phase_shifter(PhaseShifter {
                id: PstId::new(0),
                name: names[i].clone(),
                branch,
                mode: match modes[i] {
                    0 => PstMode::Off,
                    1 => PstMode::ImposedAngle,
                    2 => PstMode::ImposedPower,
                    _ => PstMode::Optimized,
                },
                setpoint_mw: setpoints[i],
                pmin_mw: pmin[i],
                pmax_mw: pmax[i],
                low_tap: low_tap[i] as i32,
                nb_taps: nb_taps[i] as usize,
                tap_step_deg: tap_step[i],
                preventive_activation: activation[i] != 0,
                fictitious: false,
            });
        }
    }

    // HVDC links (optional block)
    let nb_hvdc = table.opt_int("NB_HVDC", 0)? as usize;
    if nb_hvdc > 0 {
        let names = table.string_array("HVDC_NAME", nb_hvdc)?;
        let from = table.int_array("HVDC_FROM", nb_hvdc)?;
        let to = table.int_array("HVDC_TO", nb_hvdc)?;
        let modes = table.int_array("HVDC_MODE", nb_hvdc)?;
        let setpoints = table.double_array("HVDC_SETPOINT", nb_hvdc)?;
        let pmin = table.double_array("HVDC_PMIN", nb_hvdc)?;
        let pmax = table.double_array("HVDC_PMAX", nb_hvdc)?;
        let droop = table.double_array("HVDC_DROOP", nb_hvdc)?;
        let loss_from = table.double_array("HVDC_LOSS_FROM", nb_hvdc)?;
        let loss_to = table.double_array("HVDC_LOSS_TO", nb_hvdc)?;
        let vdc = table.double_array("HVDC_VDC_KV", nb_hvdc)?;
        let cable_r = table.double_array("HVDC_CABLE_R", nb_hvdc)?;
        for i in 0..nb_hvdc {
            let mode = match modes[i] {
                0 => HvdcMode::Off,
                1 => HvdcMode::ImposedPower,
                3 => HvdcMode::AcEmulation,
                _ => HvdcMode::Optimized,
            };
            let from_node = NodeId::new(from[i] as usize);
            let to_node = NodeId::new(to[i] as usize);

            // AC emulation installs a fictitious support branch + PST; the
            // branch susceptance carries the droop (MW/deg → MW/rad)
            let (emulation_branch, emulation_pst) = if mode == HvdcMode::AcEmulation {
                let emulation_b = if droop[i] > 0.0 {
                    droop[i] * 180.0 / std::f64::consts::PI
                } else {
                    1e-3
                };
                let branch = network.add_branch(
                    format!("{}::emulation", names[i]),
                    from_node,
                    to_node,
                    emulation_b,
                    emulation_b,
                    0.0,
                    BranchKind::HvdcEmulationSupport,
                );
                let pst = network.add_phase_shifter(PhaseShifter {
                    id: PstId::new(0),
                    name: format!("{}::emulation", names[i]),
                    branch,
                    mode: PstMode::EmulationFictitious,
                    setpoint_mw: 0.0,
                    pmin_mw: pmin[i],
                    pmax_mw: pmax[i],
                    low_tap: 0,
                    nb_taps: 0,
                    tap_step_deg: 0.0,
                    preventive_activation: false,
                    fictitious: true,
                });
                (Some(branch), Some(pst))
            } else {
                (None, None)
            };

            network.add_hvdc(HvdcLink {
                id: HvdcId::new(0),
                name: names[i].clone(),
                from: from_node,
                to: to_node,
                mode,
                setpoint_mw: setpoints[i],
                pmin_mw: pmin[i],
                pmax_mw: pmax[i],
                droop_mw_per_deg: droop[i],
                loss_factor_from: loss_from[i],
                loss_factor_to: loss_to[i],
                dc_voltage_kv: vdc[i],
                cable_resistance_ohm: cable_r[i],
                connected: true,
                emulation_branch,
                emulation_pst,
            });
        }
    }

    // Coupled-group families (optional): members move proportionally to a
    // shared reference quantity
    let nb_couplings = table.opt_int("NB_COUPLINGS", 0)? as usize;
    if nb_couplings > 0 {
        let names = table.string_array("COUPLING_NAME", nb_couplings)?;
        let references = table.string_array("COUPLING_REFERENCE", nb_couplings)?;
        let members = table.string_array("COUPLING_MEMBERS", nb_couplings)?;
        for i in 0..nb_couplings {
            let reference = match references[i].as_str() {
                "PMAX" => CouplingReference::Pmax,
                "PMIN" => CouplingReference::Pmin,
                "P0" => CouplingReference::P0,
                "PMAX_MINUS_P0" => CouplingReference::PmaxMinusP0,
                other => {
                    return Err(IoError::BadValue {
                        key: "COUPLING_REFERENCE".into(),
                        message: format!("unknown reference '{other}'"),
                    })
                }
            };
            network.couplings.push(CouplingGroup {
                name: names[i].clone(),
                reference,
                members: parse_index_list(&members[i], "COUPLING_MEMBERS")?
                    .into_iter()
                    .map(GenId::new)
                    .collect(),
            });
        }
    }

    network.validate()?;

    // Monitored elements
    let nb_monitors = table.opt_int("NB_MONITORS", 0)? as usize;
    let mut monitors = Vec::with_capacity(nb_monitors);
    if nb_monitors > 0 {
        let names = table.string_array("MONITOR_NAME", nb_monitors)?;
        let branches = table.int_array("MONITOR_BRANCH", nb_monitors)?;
        let thr_n = table.double_array("MONITOR_THRESHOLD_N", nb_monitors)?;
        let thr_n1 = table.double_array("MONITOR_THRESHOLD_N1", nb_monitors)?;
        let thr_nk = table.double_array("MONITOR_THRESHOLD_NK", nb_monitors)?;
        let thr_itam = table.double_array("MONITOR_THRESHOLD_ITAM", nb_monitors)?;
        for i in 0..nb_monitors {
            let mut monitor = MonitoredElement::single(
                MonitorId::new(i),
                names[i].clone(),
                BranchId::new(branches[i] as usize),
            );
            monitor.thresholds = Thresholds {
                n: DirectionalLimit {
                    or_to_ex: limit(thr_n[i]),
                    ex_to_or: None,
                },
                n_minus_one: DirectionalLimit {
                    or_to_ex: limit(thr_n1[i]),
                    ex_to_or: None,
                },
                n_minus_k: DirectionalLimit {
                    or_to_ex: limit(thr_nk[i]),
                    ex_to_or: None,
                },
                before_curative: DirectionalLimit {
                    or_to_ex: limit(thr_itam[i]),
                    ex_to_or: None,
                },
                before_curative_k: DirectionalLimit::default(),
            };
            monitors.push(monitor);
        }
    }

    // Watched sections (optional): SECTION_NAME + SECTION_TERMS with
    // entries "branch_idx:weight|..."
    let nb_sections = table.opt_int("NB_SECTIONS", 0)? as usize;
    if nb_sections > 0 {
        let names = table.string_array("SECTION_NAME", nb_sections)?;
        let terms = table.string_array("SECTION_TERMS", nb_sections)?;
        let thresholds = table.double_array("SECTION_THRESHOLD_N", nb_sections)?;
        for i in 0..nb_sections {
            let mut branch_terms = Vec::new();
            for term in terms[i].split('|').filter(|t| !t.is_empty()) {
                let (idx, weight) = term.split_once(':').ok_or_else(|| IoError::BadValue {
                    key: "SECTION_TERMS".into(),
                    message: format!("'{term}' is not branch:weight"),
                })?;
                let idx: usize = idx.parse().map_err(|_| IoError::BadValue {
                    key: "SECTION_TERMS".into(),
                    message: format!("'{idx}' is not a branch index"),
                })?;
                let weight: f64 = weight.parse().map_err(|_| IoError::BadValue {
                    key: "SECTION_TERMS".into(),
                    message: format!("'{weight}' is not a weight"),
                })?;
                branch_terms.push((BranchId::new(idx), weight));
            }
            let id = MonitorId::new(monitors.len());
            let mut monitor = MonitoredElement::single(id, names[i].clone(), BranchId::new(0));
            monitor.part = MonitoredPart::Section {
                branch_terms,
                hvdc_terms: Vec::new(),
            };
            monitor.thresholds.n = DirectionalLimit {
                or_to_ex: limit(thresholds[i]),
                ex_to_or: None,
            };
            monitors.push(monitor);
        }
    }

    // Contingencies: element lists are |-separated indices
    let nb_contingencies = table.opt_int("NB_CONTINGENCIES", 0)? as usize;
    let mut contingencies = ContingencySet::new();
    if nb_contingencies > 0 {
        let names = table.string_array("CONTINGENCY_NAME", nb_contingencies)?;
        let branches = table.string_array("CONTINGENCY_BRANCHES", nb_contingencies)?;
        let gens = table.string_array("CONTINGENCY_GENERATORS", nb_contingencies)?;
        let hvdcs = table.string_array("CONTINGENCY_HVDC", nb_contingencies)?;
        let curatives = table.string_array("CONTINGENCY_CURATIVE", nb_contingencies)?;
        let probabilities = if table.has("CONTINGENCY_PROBABILITY") {
            table.double_array("CONTINGENCY_PROBABILITY", nb_contingencies)?
        } else {
            Vec::new()
        };
        for i in 0..nb_contingencies {
            let mut contingency = Contingency::new(ContingencyId::new(0), names[i].clone());
            contingency.tripped_branches = parse_index_list(&branches[i], "CONTINGENCY_BRANCHES")?
                .into_iter()
                .map(BranchId::new)
                .collect();
            contingency.tripped_generators = parse_index_list(&gens[i], "CONTINGENCY_GENERATORS")?
                .into_iter()
                .map(GenId::new)
                .collect();
            contingency.tripped_hvdcs = parse_index_list(&hvdcs[i], "CONTINGENCY_HVDC")?
                .into_iter()
                .map(HvdcId::new)
                .collect();
            contingency.curative_elements = parse_curative_list(&curatives[i])?;
            contingency.probability = probabilities.get(i).copied();
            contingencies.add(contingency);
        }
    }

    let options = build_options(table)?;
    let log_level = if table.has("LOG_LEVEL") {
        Some(table.int("LOG_LEVEL")? as u8)
    } else {
        None
    };

    let index = ModelIndex::build(&network, &monitors);
    info!(
        nodes = network.nodes.len(),
        branches = network.branches.len(),
        generators = network.generators.len(),
        loads = network.loads.len(),
        monitors = monitors.len(),
        contingencies = contingencies.len(),
        "case loaded"
    );

    Ok(Case {
        network,
        monitors,
        contingencies,
        options,
        index,
        log_level,
    })
}

fn parse_index_list(raw: &str, key: &str) -> Result<Vec<usize>, IoError> {
    raw.split('|')
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse().map_err(|_| IoError::BadValue {
                key: key.to_string(),
                message: format!("'{v}' is not an index"),
            })
        })
        .collect()
}

/// Curative entries: `G:idx`, `L:idx`, `T:idx`, `F:idx`, `H:idx`.
fn parse_curative_list(raw: &str) -> Result<Vec<CurativeElement>, IoError> {
    raw.split('|')
        .filter(|v| !v.is_empty())
        .map(|entry| {
            let (kind, idx) = entry.split_once(':').ok_or_else(|| IoError::BadValue {
                key: "CONTINGENCY_CURATIVE".into(),
                message: format!("'{entry}' is not KIND:index"),
            })?;
            let idx: usize = idx.parse().map_err(|_| IoError::BadValue {
                key: "CONTINGENCY_CURATIVE".into(),
                message: format!("'{entry}' has a bad index"),
            })?;
            Ok(match kind {
                "G" => CurativeElement::Generator(GenId::new(idx)),
                "L" => CurativeElement::Load(LoadId::new(idx)),
                "T" => CurativeElement::PhaseShifter(PstId::new(idx)),
                "F" => CurativeElement::FictitiousPhaseShifter(PstId::new(idx)),
                "H" => CurativeElement::Hvdc(HvdcId::new(idx)),
                other => {
                    return Err(IoError::BadValue {
                        key: "CONTINGENCY_CURATIVE".into(),
                        message: format!("unknown curative kind '{other}'"),
                    })
                }
            })
        })
        .collect()
}

fn build_options(table: &ConfigTable) -> Result<ComputationOptions, IoError> {
    let mut options = ComputationOptions::default();
    if table.has("MODE") {
        options.mode = match table.string("MODE")?.as_str() {
            "LOAD_FLOW" => ComputationMode::LoadFlow,
            "OPF" => ComputationMode::Opf,
            "OPF_WITH_OVERLOAD" => ComputationMode::OpfWithOverload,
            "OPF_WITHOUT_REDISPATCH" => ComputationMode::OpfWithoutRedispatch,
            other => {
                return Err(IoError::BadValue {
                    key: "MODE".into(),
                    message: format!("unknown mode '{other}'"),
                })
            }
        };
    }
    options.max_micro_iterations =
        table.opt_int("MAX_MICRO_ITERATIONS", options.max_micro_iterations as i64)? as usize;
    options.max_constraints =
        table.opt_int("MAX_CONSTRAINTS", options.max_constraints as i64)? as usize;
    options.max_constraints_per_iteration = table.opt_int(
        "MAX_CONSTRAINTS_PER_ITERATION",
        options.max_constraints_per_iteration as i64,
    )? as usize;
    options.max_loss_iterations =
        table.opt_int("MAX_LOSS_ITERATIONS", options.max_loss_iterations as i64)? as usize;
    options.loss_threshold_mw = table.opt_double("LOSS_THRESHOLD_MW", options.loss_threshold_mw)?;
    options.initial_loss_rate = table.opt_double("INITIAL_LOSS_RATE", options.initial_loss_rate)?;
    options.nominal_voltage_kv =
        table.opt_double("NOMINAL_VOLTAGE_KV", options.nominal_voltage_kv)?;
    options.overload_cost = table.opt_double("OVERLOAD_COST", options.overload_cost)?;
    options.noise_cost = table.opt_double("NOISE_COST", options.noise_cost)?;
    options.parades_enabled = table.opt_bool("PARADES_ENABLED", options.parades_enabled)?;
    options.equivalent_parade_detection = table.opt_bool(
        "EQUIVALENT_PARADE_DETECTION",
        options.equivalent_parade_detection,
    )?;
    options.use_itam = table.opt_bool("USE_ITAM", options.use_itam)?;
    options.max_threats = table.opt_int("MAX_THREATS", options.max_threats as i64)? as usize;
    options.disable_reduced_problem_solver = table.opt_bool(
        "DISABLE_REDUCED_PROBLEM_SOLVER",
        options.disable_reduced_problem_solver,
    )?;
    options.check_constraints_level =
        table.opt_int("CHECK_CONSTRAINTS_LEVEL", options.check_constraints_level as i64)? as u8;
    if table.has("TIME_LIMIT_SECONDS") {
        options.time_limit = Some(Duration::from_secs_f64(table.double("TIME_LIMIT_SECONDS")?));
    }
    if table.has("CURATIVE_REDISPATCH_CAP_MW") {
        options.curative_redispatch_cap_mw =
            Some(table.double("CURATIVE_REDISPATCH_CAP_MW")?);
    }
    if table.has("MAX_CURATIVE_ACTIONS_PER_PARADE") {
        options.max_curative_actions_per_parade =
            Some(table.int("MAX_CURATIVE_ACTIONS_PER_PARADE")? as usize);
    }
    debug!(mode = ?options.mode, "options resolved");
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SMALL_CASE: &str = "\
# three nodes, one zone
INTEGER;NB_ZONES;1
STRING;ZONE_NAME;Z1
INTEGER;ZONE_BALANCE_NODE;0
INTEGER;NB_NODES;3
STRING;NODE_NAME;A;B;C
INTEGER;NODE_ZONE;0;0;0
INTEGER;NB_BRANCHES;3
STRING;BRANCH_NAME;A-B;B-C;A-C
INTEGER;BRANCH_FROM;0;1;0
INTEGER;BRANCH_TO;1;2;2
DOUBLE;BRANCH_ADMITTANCE;1.0;1.0;1.0
DOUBLE;BRANCH_SUSCEPTANCE;1.0;1.0;1.0
DOUBLE;BRANCH_RESISTANCE;0.01;0.01;0.01
INTEGER;NB_GENERATORS;1
STRING;GEN_NAME;G-B
INTEGER;GEN_NODE;1
DOUBLE;GEN_P0;50
DOUBLE;GEN_PMIN;0
DOUBLE;GEN_PMAX;100
DOUBLE;GEN_HALF_BAND;10
INTEGER;GEN_ADJUSTABLE;3
DOUBLE;GEN_COST_UP_HR;1
DOUBLE;GEN_COST_UP_AR;1
DOUBLE;GEN_COST_DOWN_HR;1
DOUBLE;GEN_COST_DOWN_AR;1
INTEGER;NB_LOADS;1
STRING;LOAD_NAME;L-C
INTEGER;LOAD_NODE;2
DOUBLE;LOAD_VALUE;50
DOUBLE;LOAD_SHED_COST;3000
DOUBLE;LOAD_SHED_PCT;100
DOUBLE;LOAD_CURATIVE_PCT;0
INTEGER;NB_MONITORS;1
STRING;MONITOR_NAME;B-C
INTEGER;MONITOR_BRANCH;1
DOUBLE;MONITOR_THRESHOLD_N;99999
DOUBLE;MONITOR_THRESHOLD_N1;30
DOUBLE;MONITOR_THRESHOLD_NK;99999
DOUBLE;MONITOR_THRESHOLD_ITAM;99999
INTEGER;NB_CONTINGENCIES;1
STRING;CONTINGENCY_NAME;trip A-B
STRING;CONTINGENCY_BRANCHES;0
STRING;CONTINGENCY_GENERATORS;
STRING;CONTINGENCY_HVDC;
STRING;CONTINGENCY_CURATIVE;
STRING;MODE;OPF_WITH_OVERLOAD
";

    #[test]
    fn test_parse_small_case() {
        let table = ConfigTable::parse(Cursor::new(SMALL_CASE), "test").unwrap();
        let case = build_case(&table).unwrap();
        assert_eq!(case.network.nodes.len(), 3);
        assert_eq!(case.network.branches.len(), 3);
        assert_eq!(case.monitors.len(), 1);
        assert_eq!(case.contingencies.len(), 1);
        assert_eq!(case.options.mode, ComputationMode::OpfWithOverload);
        // Sentinel threshold disables the N check
        assert_eq!(case.monitors[0].thresholds.n.or_to_ex, None);
        assert_eq!(case.monitors[0].thresholds.n_minus_one.or_to_ex, Some(30.0));
    }

    #[test]
    fn test_missing_key_reported() {
        let table = ConfigTable::parse(Cursor::new("INTEGER;NB_ZONES;1\n"), "test").unwrap();
        let err = build_case(&table).unwrap_err();
        assert!(matches!(err, IoError::MissingKey(_)));
    }

    #[test]
    fn test_arity_mismatch_reported() {
        let broken = SMALL_CASE.replace(
            "STRING;NODE_NAME;A;B;C",
            "STRING;NODE_NAME;A;B",
        );
        let table = ConfigTable::parse(Cursor::new(broken), "test").unwrap();
        let err = build_case(&table).unwrap_err();
        assert!(matches!(err, IoError::Arity { .. }));
    }

    #[test]
    fn test_unknown_bucket_rejected() {
        let err = ConfigTable::parse(Cursor::new("WAT;KEY;1\n"), "test").unwrap_err();
        assert!(matches!(err, IoError::Syntax { .. }));
    }
}
