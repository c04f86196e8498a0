//! The `good_lp`/HiGHS solve call.
//!
//! One [`Problem`] in, one [`Outcome`] out. The good_lp model and the HiGHS
//! arenas live only inside [`solve`]; they are dropped before returning so
//! the next problem starts from a clean solver state.

use good_lp::solvers::highs::highs;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel};
use thiserror::Error;
use tracing::debug;

use crate::problem::{Problem, RowSense};
use crate::solution::{Outcome, SolveStatus};

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Empty problem: no columns")]
    EmptyProblem,

    #[error("Row {row} references column {column} out of range")]
    BadColumnIndex { row: String, column: usize },

    #[error("Solver backend failure: {0}")]
    Backend(String),
}

/// Solve the problem as an LP or MIP depending on its columns.
///
/// Infeasibility and unboundedness are reported in the outcome status, not
/// as errors; only backend failures surface as `Err`.
pub fn solve(problem: &Problem) -> Result<Outcome, SolverError> {
    if problem.columns.is_empty() {
        return Err(SolverError::EmptyProblem);
    }
    for row in &problem.rows {
        if let Some(&(column, _)) = row
            .terms
            .iter()
            .find(|&&(col, _)| col >= problem.columns.len())
        {
            return Err(SolverError::BadColumnIndex {
                row: row.name.clone(),
                column,
            });
        }
    }

    let mut vars = variables!();
    let mut handles = Vec::with_capacity(problem.columns.len());
    for column in &problem.columns {
        let definition = if column.integer {
            variable().binary()
        } else {
            variable().min(column.lower).max(column.upper)
        };
        handles.push(vars.add(definition));
    }

    let objective = problem
        .columns
        .iter()
        .zip(&handles)
        .filter(|(c, _)| c.cost != 0.0)
        .fold(Expression::from(0.0), |acc, (c, &v)| acc + c.cost * v);

    let mut model = vars.minimise(objective).using(highs);
    for row in &problem.rows {
        let lhs = row
            .terms
            .iter()
            .fold(Expression::from(0.0), |acc, &(col, coeff)| {
                acc + coeff * handles[col]
            });
        let c = match row.sense {
            RowSense::Eq => constraint!(lhs == row.rhs),
            RowSense::Le => constraint!(lhs <= row.rhs),
            RowSense::Ge => constraint!(lhs >= row.rhs),
        };
        model = model.with(c);
    }

    debug!(
        columns = problem.num_columns(),
        rows = problem.num_rows(),
        nnz = problem.nnz(),
        mip = problem.is_mip(),
        "submitting problem"
    );

    let outcome = match model.solve() {
        Ok(solution) => {
            let values: Vec<f64> = handles.iter().map(|&v| solution.value(v)).collect();
            let objective = problem.objective_of(&values);
            Outcome {
                status: SolveStatus::Optimal,
                values,
                objective,
            }
        }
        Err(good_lp::ResolutionError::Infeasible) => Outcome::infeasible(),
        Err(good_lp::ResolutionError::Unbounded) => Outcome {
            status: SolveStatus::Unbounded,
            values: Vec::new(),
            objective: 0.0,
        },
        Err(other) => return Err(SolverError::Backend(other.to_string())),
    };

    // Model (and with it the backend workspace) is dropped here.
    debug!(status = ?outcome.status, objective = outcome.objective, "solve finished");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// min 2x + 3y  s.t.  x + y >= 10, x <= 6  →  x=6, y=4
    #[test]
    fn test_small_lp() {
        let mut p = Problem::new();
        let x = p.add_column("x", 0.0, 6.0, 2.0);
        let y = p.add_column("y", 0.0, 100.0, 3.0);
        p.add_row("demand", vec![(x, 1.0), (y, 1.0)], RowSense::Ge, 10.0);

        let outcome = solve(&p).unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert!((outcome.values[x] - 6.0).abs() < 1e-6);
        assert!((outcome.values[y] - 4.0).abs() < 1e-6);
        assert!((outcome.objective - 24.0).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_lp_is_a_status_not_an_error() {
        let mut p = Problem::new();
        let x = p.add_column("x", 0.0, 1.0, 1.0);
        p.add_row("impossible", vec![(x, 1.0)], RowSense::Ge, 5.0);

        let outcome = solve(&p).unwrap();
        assert_eq!(outcome.status, SolveStatus::Infeasible);
    }

    /// One binary gating a continuous variable: the MIP path.
    #[test]
    fn test_small_mip() {
        let mut p = Problem::new();
        let x = p.add_column("x", 0.0, 10.0, 1.0);
        let delta = p.add_binary_column("delta", 100.0);
        // x must reach 5, but x - 10·δ <= 0 forces δ = 1
        p.add_row("need", vec![(x, 1.0)], RowSense::Ge, 5.0);
        p.add_row("gate", vec![(x, 1.0), (delta, -10.0)], RowSense::Le, 0.0);

        let outcome = solve(&p).unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert!((outcome.values[delta] - 1.0).abs() < 1e-6);
        assert!((outcome.values[x] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bad_column_index_rejected() {
        let mut p = Problem::new();
        p.add_column("x", 0.0, 1.0, 0.0);
        p.add_row("bad", vec![(7, 1.0)], RowSense::Le, 0.0);
        assert!(matches!(
            solve(&p),
            Err(SolverError::BadColumnIndex { .. })
        ));
    }
}
