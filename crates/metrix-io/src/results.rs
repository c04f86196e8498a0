//! Tagged tabular result writers.
//!
//! One variant produces a sequence of `;`-separated rows, each starting
//! with its block tag:
//!
//! | Tag | Content |
//! |-----|---------|
//! | C1  | status code and label |
//! | R1  | generator schedule and preventive redispatch |
//! | C2  | generator curative actions |
//! | R2  | load values and preventive shedding |
//! | C3  | load curative actions |
//! | R3  | phase-shifter positions |
//! | C4  | phase-shifter curative angles |
//! | R4  | HVDC set-points |
//! | C5  | HVDC curative set-points |
//! | R5  | base-case transits per monitored element |
//! | R6  | ranked threats under contingencies |
//! | R7  | lost-pocket summaries |
//! | R8  | zonal bilans |
//! | R9  | objective breakdown |
//! | R10 | margin-variation tables |
//!
//! Power values are written at 0.1 MW precision, normalized variations at
//! 1e-4.

use std::io::Write;

use metrix_algo::{VariantReport, VariantStatus};

use crate::IoError;

/// 0.1 MW rounding for power columns.
fn mw(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// 1e-4 rounding for normalized values.
fn norm(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

fn status_label(status: VariantStatus) -> &'static str {
    match status {
        VariantStatus::NoProblem => "OK",
        VariantStatus::NoSolution => "NO_SOLUTION",
        VariantStatus::MaxConstraintsReached => "MAX_CONSTRAINTS_REACHED",
        VariantStatus::MicroIterExceeded => "MICRO_ITER_EXCEEDED",
        VariantStatus::VariantIgnored => "VARIANT_IGNORED",
        VariantStatus::InternalError => "INTERNAL_ERROR",
        VariantStatus::Timeout => "TIMEOUT",
    }
}

/// Write every result block of one variant.
pub fn write_variant_report<W: Write>(out: &mut W, report: &VariantReport) -> Result<(), IoError> {
    let v = report.variant_index;

    writeln!(
        out,
        "C1;{v};{};{}",
        report.status.code(),
        status_label(report.status)
    )?;

    for gen in &report.generators {
        if gen.preventive_mw.abs() >= 0.05 || !gen.curative.is_empty() {
            writeln!(
                out,
                "R1;{v};{};{};{}",
                gen.name,
                mw(gen.p0_mw),
                mw(gen.preventive_mw)
            )?;
        }
        for (contingency, value) in &gen.curative {
            if value.abs() >= 0.05 {
                writeln!(out, "C2;{v};{};{};{}", gen.name, contingency, mw(*value))?;
            }
        }
    }

    for load in &report.loads {
        if load.shed_mw.abs() >= 0.05 || !load.curative.is_empty() {
            writeln!(
                out,
                "R2;{v};{};{};{}",
                load.name,
                mw(load.value_mw),
                mw(load.shed_mw)
            )?;
        }
        for (contingency, value) in &load.curative {
            if value.abs() >= 0.05 {
                writeln!(out, "C3;{v};{};{};{}", load.name, contingency, mw(*value))?;
            }
        }
    }

    for pst in &report.phase_shifters {
        writeln!(
            out,
            "R3;{v};{};{};{}",
            pst.name,
            mw(pst.setpoint_mw),
            mw(pst.preventive_mw)
        )?;
        for (contingency, value) in &pst.curative {
            if value.abs() >= 0.05 {
                writeln!(out, "C4;{v};{};{};{}", pst.name, contingency, mw(*value))?;
            }
        }
    }

    for link in &report.hvdc_links {
        writeln!(
            out,
            "R4;{v};{};{};{}",
            link.name,
            mw(link.setpoint_mw),
            mw(link.preventive_mw)
        )?;
        for (contingency, value) in &link.curative {
            if value.abs() >= 0.05 {
                writeln!(out, "C5;{v};{};{};{}", link.name, contingency, mw(*value))?;
            }
        }
    }

    for flow in &report.flows {
        match flow.threshold_mw {
            Some(limit) => writeln!(
                out,
                "R5;{v};{};{};{}",
                flow.monitor,
                mw(flow.transit_mw),
                mw(limit)
            )?,
            None => writeln!(out, "R5;{v};{};{};", flow.monitor, mw(flow.transit_mw))?,
        }
    }

    for threat in &report.threats {
        writeln!(
            out,
            "R6;{v};{};{};{};{}",
            threat.monitor,
            threat.contingency.as_deref().unwrap_or("N"),
            mw(threat.transit_mw),
            threat
                .threshold_mw
                .map(|t| mw(t).to_string())
                .unwrap_or_default()
        )?;
    }

    for pocket in &report.pockets {
        writeln!(
            out,
            "R7;{v};{};{};{};{}",
            pocket.contingency,
            pocket.nodes,
            mw(pocket.lost_generation_mw),
            mw(pocket.lost_load_mw)
        )?;
    }

    for bilan in &report.zone_bilans {
        writeln!(
            out,
            "R8;{v};{};{};{};{};{};{}",
            bilan.zone,
            mw(bilan.generation_mw),
            mw(bilan.load_mw),
            mw(bilan.shed_mw),
            mw(bilan.exchange_mw),
            mw(bilan.residual_mw)
        )?;
    }

    if let Some(objective) = &report.objective {
        writeln!(
            out,
            "R9;{v};{};{};{};{};{};{}",
            norm(objective.generation_cost),
            norm(objective.load_cost),
            norm(objective.curative_cost),
            norm(objective.slack_cost),
            norm(objective.activation_cost),
            norm(objective.total)
        )?;
    }

    for variation in &report.margin_variations {
        for (variable, value) in &variation.entries {
            writeln!(
                out,
                "R10;{v};{};{};{}",
                variation.constraint,
                variable,
                norm(*value)
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_algo::report::{GeneratorResult, ObjectiveBreakdown};

    fn report() -> VariantReport {
        let mut report = VariantReport::status_only(3, VariantStatus::NoProblem);
        report.generators.push(GeneratorResult {
            name: "G1".into(),
            p0_mw: 50.0,
            preventive_mw: 12.34,
            curative: vec![("trip A-B".into(), -7.77)],
        });
        report.objective = Some(ObjectiveBreakdown {
            generation_cost: 123.456789,
            load_cost: 0.0,
            curative_cost: 0.0,
            slack_cost: 200.0,
            activation_cost: 0.0,
            total: 323.456789,
        });
        report
    }

    #[test]
    fn test_status_row_first() {
        let mut out = Vec::new();
        write_variant_report(&mut out, &report()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("C1;3;0;OK\n"));
    }

    #[test]
    fn test_rounding_rules() {
        let mut out = Vec::new();
        write_variant_report(&mut out, &report()).unwrap();
        let text = String::from_utf8(out).unwrap();
        // 0.1 MW on power rows, 1e-4 on cost rows
        assert!(text.contains("R1;3;G1;50;12.3"), "{text}");
        assert!(text.contains("C2;3;G1;trip A-B;-7.8"), "{text}");
        assert!(text.contains("R9;3;123.4568;"), "{text}");
    }

    #[test]
    fn test_small_actions_filtered() {
        let mut r = report();
        r.generators[0].preventive_mw = 0.01;
        r.generators[0].curative.clear();
        let mut out = Vec::new();
        write_variant_report(&mut out, &r).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("R1;"), "{text}");
    }
}
