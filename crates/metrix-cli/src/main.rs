//! `metrix`: security-constrained OPF over a DC network model.
//!
//! Reads a case file, a variant stream and an optional parade file,
//! solves every requested variant, and writes one tagged result file per
//! variant plus an error log.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrix_algo::ScopfSolver;
use metrix_io::{read_parades_file, read_variants_file};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "metrix",
    about = "Security-constrained optimal power flow (DC)",
    version
)]
struct Args {
    /// Case file (network, monitored elements, contingencies, options)
    case_file: PathBuf,

    /// Error/progress log file
    log_file: PathBuf,

    /// Variant stream
    variant_file: PathBuf,

    /// Result file prefix; one file per variant is written as
    /// `<prefix><index>.txt`
    result_prefix: String,

    /// First variant index to solve
    #[arg(default_value_t = 0)]
    first_variant: i32,

    /// Number of variants to solve (0 = all from first_variant on)
    #[arg(default_value_t = 0)]
    variant_count: usize,

    /// Parade file (topological remedial actions)
    #[arg(long)]
    parades: Option<PathBuf>,

    /// Log level 0..5 (error, warn, info, debug, trace); overrides the
    /// case file's LOG_LEVEL
    #[arg(short, long)]
    log_level: Option<u8>,

    /// Also write each variant report as JSON next to the tabular file
    #[arg(long)]
    json: bool,

    /// Post-solve constraint verification level (0, 1, 2)
    #[arg(long, default_value_t = 0)]
    check_constraints: u8,
}

fn level_filter(level: u8) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The case decides the default log level; the flag wins
    let mut case = metrix_io::load_case(&args.case_file)
        .with_context(|| format!("loading case {}", args.case_file.display()))?;
    let level = args.log_level.or(case.log_level).unwrap_or(2);

    let log_file = Arc::new(
        File::create(&args.log_file)
            .with_context(|| format!("creating log file {}", args.log_file.display()))?,
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level_filter(level))),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    info!(case = %args.case_file.display(), "case loaded");
    case.options.check_constraints_level = args.check_constraints;

    let mut variants = read_variants_file(&args.variant_file, &case.index)
        .with_context(|| format!("reading variants {}", args.variant_file.display()))?;

    // Keep base variants plus the requested window
    variants.retain(|v| {
        v.is_base()
            || (v.index >= args.first_variant
                && (args.variant_count == 0
                    || (v.index as i64)
                        < args.first_variant as i64 + args.variant_count as i64))
    });
    if variants.iter().all(|v| v.is_base()) {
        // An empty window still solves the base scenario once
        variants.push(metrix_core::Variant::new(args.first_variant));
    }

    if let Some(parade_path) = &args.parades {
        read_parades_file(parade_path, &case.index, &mut case.contingencies)
            .with_context(|| format!("reading parades {}", parade_path.display()))?;
    }

    let solver = ScopfSolver::new(case.options.clone());
    let reports = solver.run(
        &mut case.network,
        &mut case.monitors,
        &mut case.contingencies,
        &variants,
    );

    let mut failures = 0usize;
    for report in &reports {
        let path = format!("{}{}.txt", args.result_prefix, report.variant_index);
        let mut out = File::create(&path).with_context(|| format!("creating {path}"))?;
        metrix_io::write_variant_report(&mut out, report)
            .with_context(|| format!("writing {path}"))?;
        if args.json {
            let json_path = format!("{}{}.json", args.result_prefix, report.variant_index);
            let json = File::create(&json_path).with_context(|| format!("creating {json_path}"))?;
            serde_json::to_writer_pretty(json, report)
                .with_context(|| format!("writing {json_path}"))?;
        }
        if report.status.code() != 0 {
            failures += 1;
        }
        info!(
            variant = report.variant_index,
            status = report.status.code(),
            "variant written"
        );
    }

    info!(
        variants = reports.len(),
        failures, "run finished"
    );
    Ok(())
}
