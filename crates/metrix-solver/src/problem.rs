//! Backend-agnostic LP/MIP description.
//!
//! Columns are appended once per variant and never removed; rows accumulate
//! across micro-iterations (cuts are only ever added). Row coefficients are
//! stored sparse, in column-index order of insertion.

use serde::{Deserialize, Serialize};

/// Sense of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowSense {
    Eq,
    Le,
    Ge,
}

/// One decision variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    /// Objective coefficient
    pub cost: f64,
    /// True for binary/integer variables (all integers here are 0/1)
    pub integer: bool,
}

/// One constraint row: Σ terms ⋛ rhs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub name: String,
    pub terms: Vec<(usize, f64)>,
    pub sense: RowSense,
    pub rhs: f64,
}

/// The assembled problem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Problem {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        cost: f64,
    ) -> usize {
        let index = self.columns.len();
        self.columns.push(Column {
            name: name.into(),
            lower,
            upper,
            cost,
            integer: false,
        });
        index
    }

    pub fn add_binary_column(&mut self, name: impl Into<String>, cost: f64) -> usize {
        let index = self.columns.len();
        self.columns.push(Column {
            name: name.into(),
            lower: 0.0,
            upper: 1.0,
            cost,
            integer: true,
        });
        index
    }

    pub fn add_row(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(usize, f64)>,
        sense: RowSense,
        rhs: f64,
    ) -> usize {
        let index = self.rows.len();
        self.rows.push(Row {
            name: name.into(),
            terms,
            sense,
            rhs,
        });
        index
    }

    /// A problem is a MIP as soon as one integer column exists.
    pub fn is_mip(&self) -> bool {
        self.columns.iter().any(|c| c.integer)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Non-zero count of the constraint matrix.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(|r| r.terms.len()).sum()
    }

    /// Objective value of a candidate point.
    pub fn objective_of(&self, values: &[f64]) -> f64 {
        self.columns
            .iter()
            .zip(values)
            .map(|(c, &v)| c.cost * v)
            .sum()
    }

    /// Row activity of a candidate point.
    pub fn row_activity(&self, row: usize, values: &[f64]) -> f64 {
        self.rows[row]
            .terms
            .iter()
            .map(|&(col, coeff)| coeff * values[col])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_detection() {
        let mut p = Problem::new();
        p.add_column("x", 0.0, 10.0, 1.0);
        assert!(!p.is_mip());
        p.add_binary_column("delta", 0.0);
        assert!(p.is_mip());
    }

    #[test]
    fn test_objective_and_activity() {
        let mut p = Problem::new();
        let x = p.add_column("x", 0.0, 10.0, 2.0);
        let y = p.add_column("y", 0.0, 10.0, 3.0);
        p.add_row("r", vec![(x, 1.0), (y, -1.0)], RowSense::Le, 4.0);

        let values = [5.0, 2.0];
        assert!((p.objective_of(&values) - 16.0).abs() < 1e-12);
        assert!((p.row_activity(0, &values) - 3.0).abs() < 1e-12);
        assert_eq!(p.nnz(), 2);
    }
}
