//! Post-optimal marginal-variation decomposition.
//!
//! For each binding cut, the shadow price is attributed to the individual
//! basic variables: with B the square submatrix formed by the constraint
//! coefficients of the basic variables (slacks included, signed by row
//! sense), solving `B·v = e_row` yields the detailed variation of every
//! basic variable per unit of RHS relaxation on that row.
//!
//! The basis is recovered from the primal point: structural columns
//! strictly inside their bounds are basic, and the slack of every
//! non-binding inequality is basic. When the recovered basis disagrees
//! with the row count, rows touching only non-basic variables are dropped.

use metrix_solver::{Outcome, Problem, RowSense};
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{BASIS_BOUND_TOLERANCE, DISPLAY_MARGIN_VARIATION_THRESHOLD, LU_MIN_PIVOT_EXTREME};
use crate::sparse::lu::{DenseLu, LuError};

#[derive(Debug, Error)]
pub enum MarginError {
    #[error("No primal solution to recover a basis from")]
    NoSolution,

    #[error("Basis factorization failed: {0}")]
    Factorization(#[from] LuError),
}

/// Detailed variations of one constraint of interest.
#[derive(Debug, Clone)]
pub struct MarginVariation {
    pub row: usize,
    pub row_name: String,
    /// (variable name, variation) for each basic variable above the
    /// display threshold
    pub entries: Vec<(String, f64)>,
}

/// One basic variable of the recovered basis.
enum BasicVar {
    Structural(usize),
    /// Slack of a row, with its sign in the standard form
    Slack(usize, f64),
}

/// Compute detailed marginal variations for the given rows.
pub fn margin_variations(
    problem: &Problem,
    outcome: &Outcome,
    rows_of_interest: &[usize],
) -> Result<Vec<MarginVariation>, MarginError> {
    if outcome.values.is_empty() {
        return Err(MarginError::NoSolution);
    }

    let mut basics: Vec<BasicVar> = Vec::new();
    for (col, column) in problem.columns.iter().enumerate() {
        if column.integer {
            // Integer columns are fixed at their value in the final basis
            continue;
        }
        let v = outcome.values[col];
        if v > column.lower + BASIS_BOUND_TOLERANCE && v < column.upper - BASIS_BOUND_TOLERANCE {
            basics.push(BasicVar::Structural(col));
        }
    }
    for (row_idx, row) in problem.rows.iter().enumerate() {
        let activity = problem.row_activity(row_idx, &outcome.values);
        match row.sense {
            RowSense::Eq => {}
            RowSense::Le => {
                if activity < row.rhs - BASIS_BOUND_TOLERANCE {
                    basics.push(BasicVar::Slack(row_idx, 1.0));
                }
            }
            RowSense::Ge => {
                if activity > row.rhs + BASIS_BOUND_TOLERANCE {
                    basics.push(BasicVar::Slack(row_idx, -1.0));
                }
            }
        }
    }

    // Rows kept in the basis system; drop rows with no basic variable when
    // the base size disagrees with the row count.
    let mut kept_rows: Vec<usize> = (0..problem.rows.len()).collect();
    if basics.len() != kept_rows.len() {
        kept_rows.retain(|&row_idx| {
            let row = &problem.rows[row_idx];
            let structural = row.terms.iter().any(|&(col, _)| {
                basics
                    .iter()
                    .any(|b| matches!(b, BasicVar::Structural(c) if *c == col))
            });
            let slack = basics
                .iter()
                .any(|b| matches!(b, BasicVar::Slack(r, _) if *r == row_idx));
            structural || slack
        });
        debug!(
            basics = basics.len(),
            kept = kept_rows.len(),
            total = problem.rows.len(),
            "basis size mismatch, rows without basic variables excluded"
        );
    }
    if basics.len() != kept_rows.len() {
        warn!(
            basics = basics.len(),
            rows = kept_rows.len(),
            "degenerate basis, margin variations skipped"
        );
        return Ok(Vec::new());
    }

    let dim = kept_rows.len();
    if dim == 0 {
        return Ok(Vec::new());
    }
    let row_pos: std::collections::HashMap<usize, usize> = kept_rows
        .iter()
        .enumerate()
        .map(|(pos, &row)| (row, pos))
        .collect();

    // B columns are the constraint coefficients of the basic variables
    let mut dense = vec![0.0; dim * dim];
    for (b_idx, basic) in basics.iter().enumerate() {
        match *basic {
            BasicVar::Structural(col) => {
                for (&row_idx, &pos) in &row_pos {
                    let coeff: f64 = problem.rows[row_idx]
                        .terms
                        .iter()
                        .filter(|&&(c, _)| c == col)
                        .map(|&(_, v)| v)
                        .sum();
                    if coeff != 0.0 {
                        dense[pos * dim + b_idx] = coeff;
                    }
                }
            }
            BasicVar::Slack(row_idx, sign) => {
                if let Some(&pos) = row_pos.get(&row_idx) {
                    dense[pos * dim + b_idx] = sign;
                }
            }
        }
    }

    let lu = DenseLu::from_dense(dense, dim, LU_MIN_PIVOT_EXTREME)?;

    let mut results = Vec::new();
    for &row in rows_of_interest {
        let Some(&pos) = row_pos.get(&row) else {
            continue;
        };
        let mut e = vec![0.0; dim];
        e[pos] = 1.0;
        let v = lu.solve(&e)?;

        let mut entries = Vec::new();
        for (b_idx, basic) in basics.iter().enumerate() {
            let value = v[b_idx];
            if value.abs() < DISPLAY_MARGIN_VARIATION_THRESHOLD {
                continue;
            }
            let name = match *basic {
                BasicVar::Structural(col) => problem.columns[col].name.clone(),
                BasicVar::Slack(row_idx, _) => format!("slack::{}", problem.rows[row_idx].name),
            };
            entries.push((name, value));
        }
        entries.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .expect("variations are finite")
        });
        results.push(MarginVariation {
            row,
            row_name: problem.rows[row].name.clone(),
            entries,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_solver::SolveStatus;

    /// min 2x + y  s.t.  x + y = 10, x − y ≤ 2: optimum x = 0, y = 10
    /// with x at its bound, y basic and the gap row slack basic.
    #[test]
    fn test_basis_recovery_simple() {
        let mut p = Problem::new();
        let x = p.add_column("x", 0.0, 20.0, 2.0);
        let y = p.add_column("y", 0.0, 20.0, 1.0);
        p.add_row("balance", vec![(x, 1.0), (y, 1.0)], RowSense::Eq, 10.0);
        p.add_row("gap", vec![(x, 1.0), (y, -1.0)], RowSense::Le, 2.0);

        // Optimal: x = 0 (at bound), y = 10 (basic); "gap" non-binding
        let outcome = Outcome {
            status: SolveStatus::Optimal,
            values: vec![0.0, 10.0],
            objective: 10.0,
        };
        let variations = margin_variations(&p, &outcome, &[0]).unwrap();
        assert_eq!(variations.len(), 1);
        // Relaxing the balance by 1 MW moves y by 1
        let y_entry = variations[0]
            .entries
            .iter()
            .find(|(name, _)| name == "y")
            .expect("y is basic");
        assert!((y_entry.1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_solution_is_an_error() {
        let p = Problem::new();
        let outcome = Outcome::infeasible();
        assert!(matches!(
            margin_variations(&p, &outcome, &[0]),
            Err(MarginError::NoSolution)
        ));
    }

    #[test]
    fn test_row_not_in_basis_is_skipped() {
        let mut p = Problem::new();
        let x = p.add_column("x", 0.0, 20.0, 1.0);
        p.add_row("fix", vec![(x, 1.0)], RowSense::Eq, 5.0);
        let outcome = Outcome {
            status: SolveStatus::Optimal,
            values: vec![5.0],
            objective: 5.0,
        };
        // Row index 7 does not exist in the kept set
        let variations = margin_variations(&p, &outcome, &[7]).unwrap();
        assert!(variations.is_empty());
    }
}
