//! End-to-end run of the `metrix` binary on a small case.

use assert_cmd::Command;
use predicates::prelude::*;

const CASE: &str = "\
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
fn solves_a_variant_and_writes_tagged_results() {
    let dir = tempfile::tempdir().unwrap();
    let case = dir.path().join("case.txt");
    let variants = dir.path().join("variants.csv");
    let log = dir.path().join("run.log");
    std::fs::write(&case, CASE).unwrap();
    std::fs::write(&variants, "0;PRODIM;G-B;50\n").unwrap();
    let prefix = dir.path().join("out_").display().to_string();

    Command::cargo_bin("metrix")
        .unwrap()
        .arg(&case)
        .arg(&log)
        .arg(&variants)
        .arg(&prefix)
        .assert()
        .success();

    let result = std::fs::read_to_string(format!("{prefix}0.txt")).unwrap();
    assert!(
        predicate::str::starts_with("C1;0;0;OK").eval(&result),
        "unexpected status block:\n{result}"
    );
    // The unfixable contingency leaves its residual on the R6 threat block
    assert!(result.contains("R6;0;B-C;trip A-B;50"), "{result}");
}

#[test]
fn missing_case_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("metrix")
        .unwrap()
        .arg(dir.path().join("nope.txt"))
        .arg(dir.path().join("run.log"))
        .arg(dir.path().join("variants.csv"))
        .arg("out_")
        .assert()
        .failure();
}
