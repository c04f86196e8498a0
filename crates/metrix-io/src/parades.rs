//! The parade file: topological remedial actions.
//!
//! One parade per record:
//!
//! ```text
//! father_name;parade_name;opened|...;closed|...;curative|...;monitors|...
//! ```
//!
//! Openings and closings are branch names, curative overrides use the
//! `KIND:name` notation (`G`, `L`, `T`, `F`, `H`), and the optional
//! monitor list restricts which monitored elements the parade may
//! relieve (empty = all). The reader attaches each parade as a child
//! contingency of its father, sharing the father's tripped machines, and
//! finishes by completing every family with its "do nothing" member.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use metrix_core::{
    Contingency, ContingencyId, ContingencySet, CurativeElement, MonitorId,
};
use tracing::info;

use crate::config::ModelIndex;
use crate::IoError;

/// Read the parade stream and graft the parades onto `contingencies`.
/// Returns the number of parades added (synthetic members excluded).
pub fn read_parades<R: Read>(
    reader: R,
    index: &ModelIndex,
    contingencies: &mut ContingencySet,
) -> Result<usize, IoError> {
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut added = 0;
    for (line, record) in csv.records().enumerate() {
        let record = record?;
        let Some(first) = record.get(0) else {
            continue;
        };
        if first.trim().is_empty() || first.trim_start().starts_with('#') {
            continue;
        }
        if record.len() < 4 {
            return Err(IoError::Syntax {
                file: "parades".into(),
                line: line + 1,
                message: "expected father;name;opened;closed[;curative[;monitors]]".into(),
            });
        }

        let father_name = record[0].trim();
        let father_id = contingencies
            .by_name(father_name)
            .ok_or_else(|| IoError::UnknownElement {
                kind: "contingency",
                name: father_name.to_string(),
            })?;
        let father = contingencies.get(father_id).clone();

        let mut parade = Contingency::new(ContingencyId::new(0), record[1].trim().to_string());
        parade.father = Some(father_id);
        parade.tripped_generators = father.tripped_generators.clone();
        parade.tripped_hvdcs = father.tripped_hvdcs.clone();
        parade.probability = father.probability;

        // Openings: the father's trips plus the parade's own
        let mut opened: HashSet<_> = father.tripped_branches.iter().copied().collect();
        for name in record[2].split('|').filter(|v| !v.is_empty()) {
            let id = index
                .branches
                .get(name.trim())
                .copied()
                .ok_or_else(|| IoError::UnknownElement {
                    kind: "branch",
                    name: name.to_string(),
                })?;
            opened.insert(id);
        }
        parade.tripped_branches = opened.into_iter().collect();
        parade.tripped_branches.sort_unstable();

        for name in record[3].split('|').filter(|v| !v.is_empty()) {
            let id = index
                .branches
                .get(name.trim())
                .copied()
                .ok_or_else(|| IoError::UnknownElement {
                    kind: "branch",
                    name: name.to_string(),
                })?;
            parade.closed_branches.push(id);
        }

        parade.curative_elements = match record.get(4) {
            Some(raw) if !raw.trim().is_empty() => parse_curatives(raw, index)?,
            _ => father.curative_elements.clone(),
        };

        if let Some(raw) = record.get(5) {
            let restricted: Vec<MonitorId> = raw
                .split('|')
                .filter(|v| !v.is_empty())
                .map(|name| {
                    index
                        .monitors
                        .get(name.trim())
                        .copied()
                        .ok_or_else(|| IoError::UnknownElement {
                            kind: "monitor",
                            name: name.to_string(),
                        })
                })
                .collect::<Result<_, _>>()?;
            if !restricted.is_empty() {
                parade.authorized_monitors = Some(restricted);
            }
        }

        contingencies.add(parade);
        added += 1;
    }

    contingencies.complete_parade_families();
    info!(parades = added, "parade stream read");
    Ok(added)
}

fn parse_curatives(raw: &str, index: &ModelIndex) -> Result<Vec<CurativeElement>, IoError> {
    raw.split('|')
        .filter(|v| !v.is_empty())
        .map(|entry| {
            let entry = entry.trim();
            let (kind, name) = entry.split_once(':').ok_or_else(|| IoError::BadValue {
                key: "parade curative".into(),
                message: format!("'{entry}' is not KIND:name"),
            })?;
            let missing = |k: &'static str| IoError::UnknownElement {
                kind: k,
                name: name.to_string(),
            };
            Ok(match kind {
                "G" => CurativeElement::Generator(
                    *index.generators.get(name).ok_or_else(|| missing("generator"))?,
                ),
                "L" => CurativeElement::Load(
                    *index.loads.get(name).ok_or_else(|| missing("load"))?,
                ),
                "T" => CurativeElement::PhaseShifter(
                    *index
                        .phase_shifters
                        .get(name)
                        .ok_or_else(|| missing("phase-shifter"))?,
                ),
                "F" => CurativeElement::FictitiousPhaseShifter(
                    *index
                        .phase_shifters
                        .get(name)
                        .ok_or_else(|| missing("phase-shifter"))?,
                ),
                "H" => CurativeElement::Hvdc(
                    *index.hvdc_links.get(name).ok_or_else(|| missing("hvdc"))?,
                ),
                other => {
                    return Err(IoError::BadValue {
                        key: "parade curative".into(),
                        message: format!("unknown curative kind '{other}'"),
                    })
                }
            })
        })
        .collect()
}

/// Convenience wrapper over a file path.
pub fn read_parades_file(
    path: &Path,
    index: &ModelIndex,
    contingencies: &mut ContingencySet,
) -> Result<usize, IoError> {
    let file = std::fs::File::open(path)?;
    read_parades(std::io::BufReader::new(file), index, contingencies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::{BranchId, BranchKind, Network};

    fn setup() -> (ModelIndex, ContingencySet) {
        let mut net = Network::new("t");
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
        let index = ModelIndex::build(&net, &[]);

        let mut set = ContingencySet::new();
        let mut father = Contingency::new(ContingencyId::new(0), "trip A-B");
        father.tripped_branches = vec![BranchId::new(0)];
        set.add(father);
        (index, set)
    }

    #[test]
    fn test_parade_inherits_father_trips() {
        let (index, mut set) = setup();
        let data = "trip A-B;open B-C;B-C;;;\n";
        let added = read_parades(data.as_bytes(), &index, &mut set).unwrap();
        assert_eq!(added, 1);

        let father = set.by_name("trip A-B").unwrap();
        // Declared parade + synthetic do-nothing
        assert_eq!(set.get(father).parades.len(), 2);

        let parade_id = set.by_name("open B-C").unwrap();
        let parade = set.get(parade_id);
        assert!(parade.tripped_branches.contains(&BranchId::new(0)));
        assert!(parade.tripped_branches.contains(&BranchId::new(1)));
    }

    #[test]
    fn test_unknown_father_rejected() {
        let (index, mut set) = setup();
        let data = "nope;p;B-C;;;\n";
        let err = read_parades(data.as_bytes(), &index, &mut set).unwrap_err();
        assert!(matches!(err, IoError::UnknownElement { .. }));
    }

    #[test]
    fn test_closing_list_parsed() {
        let (index, mut set) = setup();
        let data = "trip A-B;reroute;;A-C;;\n";
        read_parades(data.as_bytes(), &index, &mut set).unwrap();
        let parade = set.by_name("reroute").unwrap();
        assert_eq!(set.get(parade).closed_branches, vec![BranchId::new(2)]);
    }
}
