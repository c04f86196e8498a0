//! The variant stream.
//!
//! One tagged update per record:
//!
//! ```text
//! variant_index;TAG;element_name;value
//! ```
//!
//! Records of the same index accumulate into one [`Variant`], in stream
//! order. A negative index denotes the base variant applied irreversibly
//! before the loop. Tags mirror the update families of the original
//! engine (availability, imposed/min/max production, costs, load values,
//! HVDC bounds and set-points, PST angles, exchange targets, contingency
//! probabilities, per-regime thresholds).

use std::io::Read;
use std::path::Path;

use metrix_core::{ThresholdKind, Variant, VariantDelta};
use tracing::info;

use crate::config::ModelIndex;
use crate::IoError;

fn threshold_kind(tag: &str) -> Option<ThresholdKind> {
    Some(match tag {
        "QATI00MN" => ThresholdKind::N,
        "QATI00MN_EXOR" => ThresholdKind::NExOr,
        "QATI5MNS" => ThresholdKind::NMinusOne,
        "QATI5MNS_EXOR" => ThresholdKind::NMinusOneExOr,
        "QATI20MN" => ThresholdKind::NMinusK,
        "QATI20MN_EXOR" => ThresholdKind::NMinusKExOr,
        "QATITAMN" => ThresholdKind::BeforeCurative,
        "QATITAMN_EXOR" => ThresholdKind::BeforeCurativeExOr,
        "QATITAMK" => ThresholdKind::BeforeCurativeK,
        "QATITAMK_EXOR" => ThresholdKind::BeforeCurativeKExOr,
        _ => return None,
    })
}

/// Read the variant stream. Variants come back ordered by first
/// appearance, base variants first.
pub fn read_variants<R: Read>(reader: R, index: &ModelIndex) -> Result<Vec<Variant>, IoError> {
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut variants: Vec<Variant> = Vec::new();
    let mut position: std::collections::HashMap<i32, usize> = std::collections::HashMap::new();

    for (line, record) in csv.records().enumerate() {
        let record = record?;
        let Some(first) = record.get(0) else {
            continue;
        };
        if first.trim().is_empty() || first.trim_start().starts_with('#') {
            continue;
        }
        if record.len() < 3 {
            return Err(IoError::Syntax {
                file: "variants".into(),
                line: line + 1,
                message: "expected index;TAG;name[;value]".into(),
            });
        }
        let variant_index: i32 = record[0].trim().parse().map_err(|_| IoError::Syntax {
            file: "variants".into(),
            line: line + 1,
            message: format!("'{}' is not a variant index", &record[0]),
        })?;
        let tag = record[1].trim().to_uppercase();
        let name = record[2].trim().to_string();
        let value: Option<f64> = record.get(3).map(str::trim).and_then(|v| v.parse().ok());

        let need_value = || {
            value.ok_or_else(|| IoError::Syntax {
                file: "variants".into(),
                line: line + 1,
                message: format!("tag {tag} requires a numeric value"),
            })
        };

        let gen = |idx: &ModelIndex| {
            idx.generators
                .get(&name)
                .copied()
                .ok_or_else(|| IoError::UnknownElement {
                    kind: "generator",
                    name: name.clone(),
                })
        };
        let load = |idx: &ModelIndex| {
            idx.loads
                .get(&name)
                .copied()
                .ok_or_else(|| IoError::UnknownElement {
                    kind: "load",
                    name: name.clone(),
                })
        };
        let hvdc = |idx: &ModelIndex| {
            idx.hvdc_links
                .get(&name)
                .copied()
                .ok_or_else(|| IoError::UnknownElement {
                    kind: "hvdc",
                    name: name.clone(),
                })
        };

        let delta = match tag.as_str() {
            "GRPINDISPO" => VariantDelta::GeneratorUnavailable(gen(index)?),
            "LIGNEINDISPO" => VariantDelta::BranchUnavailable(
                index
                    .branches
                    .get(&name)
                    .copied()
                    .ok_or_else(|| IoError::UnknownElement {
                        kind: "branch",
                        name: name.clone(),
                    })?,
            ),
            "PRODIM" => VariantDelta::ImposedProduction(gen(index)?, need_value()?),
            "PRODMAX" => VariantDelta::GeneratorPmax(gen(index)?, need_value()?),
            "PRODMIN" => VariantDelta::GeneratorPmin(gen(index)?, need_value()?),
            "CONSOVAL" => VariantDelta::LoadValue(load(index)?, need_value()?),
            "COUTEFF" => VariantDelta::LoadShedCost(load(index)?, need_value()?),
            "COUTHAUSSEHR" => VariantDelta::CostUpHr(gen(index)?, need_value()?),
            "COUTBAISSEHR" => VariantDelta::CostDownHr(gen(index)?, need_value()?),
            "COUTHAUSSEAR" => VariantDelta::CostUpAr(gen(index)?, need_value()?),
            "COUTBAISSEAR" => VariantDelta::CostDownAr(gen(index)?, need_value()?),
            "DCPMIN" => VariantDelta::HvdcPmin(hvdc(index)?, need_value()?),
            "DCPMAX" => VariantDelta::HvdcPmax(hvdc(index)?, need_value()?),
            "DCPIMP" => VariantDelta::HvdcSetpoint(hvdc(index)?, need_value()?),
            "DTVALDEP" => VariantDelta::PstSetpoint(
                index
                    .phase_shifters
                    .get(&name)
                    .copied()
                    .ok_or_else(|| IoError::UnknownElement {
                        kind: "phase-shifter",
                        name: name.clone(),
                    })?,
                need_value()?,
            ),
            "ECHANGE" => VariantDelta::ZoneExchange(
                index
                    .zones
                    .get(&name)
                    .copied()
                    .ok_or_else(|| IoError::UnknownElement {
                        kind: "zone",
                        name: name.clone(),
                    })?,
                need_value()?,
            ),
            "BILANPROD" => VariantDelta::ZoneProductionBalance(
                index
                    .zones
                    .get(&name)
                    .copied()
                    .ok_or_else(|| IoError::UnknownElement {
                        kind: "zone",
                        name: name.clone(),
                    })?,
                need_value()?,
            ),
            other => {
                if let Some(kind) = threshold_kind(other) {
                    VariantDelta::Threshold(
                        index
                            .monitors
                            .get(&name)
                            .copied()
                            .ok_or_else(|| IoError::UnknownElement {
                                kind: "monitor",
                                name: name.clone(),
                            })?,
                        kind,
                        need_value()?,
                    )
                } else {
                    return Err(IoError::Syntax {
                        file: "variants".into(),
                        line: line + 1,
                        message: format!("unknown tag '{other}'"),
                    });
                }
            }
        };

        let slot = *position.entry(variant_index).or_insert_with(|| {
            variants.push(Variant::new(variant_index));
            variants.len() - 1
        });
        variants[slot].deltas.push(delta);
    }

    // Base variants first, then stream order
    variants.sort_by_key(|v| if v.is_base() { 0 } else { 1 });
    info!(count = variants.len(), "variant stream read");
    Ok(variants)
}

/// Convenience wrapper over a file path.
pub fn read_variants_file(path: &Path, index: &ModelIndex) -> Result<Vec<Variant>, IoError> {
    let file = std::fs::File::open(path)?;
    read_variants(std::io::BufReader::new(file), index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::{BranchKind, Network};

    fn index() -> ModelIndex {
        let mut net = Network::new("t");
        let a = net.add_node("A");
        let b = net.add_node("B");
        let z = net.add_zone("Z1", a);
        net.assign_zone(a, z);
        net.assign_zone(b, z);
        net.add_branch("A-B", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_generator(metrix_core::Generator {
            id: metrix_core::GenId::new(0),
            name: "G1".into(),
            node: a,
            p0_mw: 10.0,
            pmin_mw: 0.0,
            pmax_mw: 20.0,
            half_band_mw: 1.0,
            adjustable: metrix_core::Adjustability::Both,
            cost_up_hr: 1.0,
            cost_up_ar: 1.0,
            cost_down_hr: 1.0,
            cost_down_ar: 1.0,
            kind: String::new(),
            participation: 1.0,
            connected: true,
        });
        ModelIndex::build(&net, &[])
    }

    #[test]
    fn test_records_accumulate_per_variant() {
        let data = "0;PRODIM;G1;15\n1;PRODIM;G1;18\n0;LIGNEINDISPO;A-B\n";
        let variants = read_variants(data.as_bytes(), &index()).unwrap();
        assert_eq!(variants.len(), 2);
        let v0 = variants.iter().find(|v| v.index == 0).unwrap();
        assert_eq!(v0.deltas.len(), 2);
    }

    #[test]
    fn test_base_variant_sorted_first() {
        let data = "2;PRODIM;G1;15\n-1;PRODIM;G1;12\n";
        let variants = read_variants(data.as_bytes(), &index()).unwrap();
        assert!(variants[0].is_base());
        assert_eq!(variants[1].index, 2);
    }

    #[test]
    fn test_unknown_element_rejected() {
        let data = "0;PRODIM;NOPE;15\n";
        let err = read_variants(data.as_bytes(), &index()).unwrap_err();
        assert!(matches!(err, IoError::UnknownElement { .. }));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let data = "0;WHAT;G1;15\n";
        let err = read_variants(data.as_bytes(), &index()).unwrap_err();
        assert!(matches!(err, IoError::Syntax { .. }));
    }
}
