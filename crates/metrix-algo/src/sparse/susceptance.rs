//! The reduced nodal susceptance matrix B′.
//!
//! ```text
//! B′[i,j] = -b_ij   when i ≠ j and neither endpoint is a reference
//! B′[i,i] = Σ b_ik  over branches at i whose far end may vary
//! B′[r,r] = 1       at every reference row r
//! ```
//!
//! One reference phase is eliminated per synchronous zone (the zone's
//! balance node); the row is kept in place with an identity diagonal rather
//! than being removed, so nodal indices stay stable across the whole
//! engine. Solving B′·θ = P with P zeroed at the references yields θ = 0
//! there, which is exactly the reference-phase convention.
//!
//! Lost-pocket factorizations reuse the same builder with the pocket nodes
//! marked dead: dead rows also become identity rows and the pocket phases
//! are forced to zero.

use std::collections::HashSet;

use metrix_core::{BranchId, Network};
use sprs::{CsMat, TriMat};
use thiserror::Error;

use crate::constants::{LU_MIN_PIVOT, LU_MIN_PIVOT_EXTREME};
use crate::sparse::lu::{DenseLu, LuError};

#[derive(Debug, Error)]
pub enum SusceptanceError {
    #[error("Network has no nodes")]
    NoNodes,

    #[error("Branch {0} has zero or negative susceptance")]
    BadSusceptance(String),

    #[error("B′ factorization failed on branch topology: {0}")]
    Factorization(#[from] LuError),
}

/// Assembled B′ with its reference mask.
#[derive(Debug, Clone)]
pub struct SusceptanceMatrix {
    matrix: CsMat<f64>,
    reference: Vec<bool>,
    n: usize,
}

impl SusceptanceMatrix {
    /// Assemble B′ for the current topology.
    ///
    /// `opened`/`closed` override branch connected flags (contingency
    /// topologies); `dead` marks nodes excluded from the equations (lost
    /// pockets). Balance nodes and dead nodes get identity rows.
    pub fn build(
        network: &Network,
        opened: &HashSet<BranchId>,
        closed: &HashSet<BranchId>,
        dead: Option<&[bool]>,
    ) -> Result<Self, SusceptanceError> {
        let n = network.nodes.len();
        if n == 0 {
            return Err(SusceptanceError::NoNodes);
        }

        let mut reference = vec![false; n];
        for (idx, node) in network.nodes.iter().enumerate() {
            if node.is_balance || dead.map(|d| d[idx]).unwrap_or(false) {
                reference[idx] = true;
            }
        }

        let mut diagonal = vec![0.0; n];
        let mut triplets = TriMat::new((n, n));

        for branch in &network.branches {
            let usable = if opened.contains(&branch.id) {
                false
            } else {
                branch.connected || closed.contains(&branch.id)
            };
            if !usable {
                continue;
            }
            let i = branch.from.value();
            let j = branch.to.value();
            if let Some(d) = dead {
                if d[i] || d[j] {
                    continue;
                }
            }
            let b = branch.susceptance;
            if b <= 0.0 {
                return Err(SusceptanceError::BadSusceptance(branch.name.clone()));
            }

            if !reference[i] && !reference[j] {
                triplets.add_triplet(i, j, -b);
                triplets.add_triplet(j, i, -b);
            }
            if !reference[i] {
                diagonal[i] += b;
            }
            if !reference[j] {
                diagonal[j] += b;
            }
        }

        // Identity rows: references, dead nodes, and any row left isolated
        // by the elimination rule (keeps the matrix non-singular there).
        for i in 0..n {
            if diagonal[i] == 0.0 {
                triplets.add_triplet(i, i, 1.0);
            } else {
                triplets.add_triplet(i, i, diagonal[i]);
            }
        }

        Ok(Self {
            matrix: triplets.to_csc(),
            reference,
            n,
        })
    }

    /// Factor with the standard pivot floor, falling back once to the
    /// extreme floor before giving up.
    pub fn factor(&self) -> Result<DenseLu, SusceptanceError> {
        match DenseLu::from_sparse(self.matrix.view(), LU_MIN_PIVOT) {
            Ok(lu) => Ok(lu),
            Err(LuError::Singular { .. }) => {
                Ok(DenseLu::from_sparse(self.matrix.view(), LU_MIN_PIVOT_EXTREME)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    pub fn is_reference(&self, node: usize) -> bool {
        self.reference[node]
    }

    pub fn reference_mask(&self) -> &[bool] {
        &self.reference
    }

    /// Zero the reference entries of a vector in place; injections at
    /// eliminated phases must not influence the solution.
    pub fn mask_references(&self, values: &mut [f64]) {
        for (i, &is_ref) in self.reference.iter().enumerate() {
            if is_ref {
                values[i] = 0.0;
            }
        }
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix.get(i, j).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::BranchKind;

    /// Triangle with A as the balance node, all susceptances 1.
    fn triangle() -> Network {
        let mut net = Network::new("triangle");
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
        net
    }

    #[test]
    fn test_reference_row_is_identity() {
        let net = triangle();
        let bp = SusceptanceMatrix::build(&net, &HashSet::new(), &HashSet::new(), None).unwrap();
        assert!(bp.is_reference(0));
        assert_eq!(bp.get(0, 0), 1.0);
        assert_eq!(bp.get(0, 1), 0.0);
        assert_eq!(bp.get(1, 0), 0.0);
    }

    #[test]
    fn test_non_reference_rows() {
        let net = triangle();
        let bp = SusceptanceMatrix::build(&net, &HashSet::new(), &HashSet::new(), None).unwrap();
        // B: connected to A (reference, dropped off-diagonal) and C
        assert_eq!(bp.get(1, 1), 2.0);
        assert_eq!(bp.get(1, 2), -1.0);
        assert_eq!(bp.get(2, 1), -1.0);
        assert_eq!(bp.get(2, 2), 2.0);
    }

    #[test]
    fn test_solve_reference_stays_zero() {
        let net = triangle();
        let bp = SusceptanceMatrix::build(&net, &HashSet::new(), &HashSet::new(), None).unwrap();
        let lu = bp.factor().unwrap();
        // Inject 1 at B, withdraw 1 at C
        let mut p = vec![0.0, 1.0, -1.0];
        bp.mask_references(&mut p);
        let theta = lu.solve(&p).unwrap();
        assert_eq!(theta[0], 0.0);
        // B'θ = P on the non-reference rows
        assert!((2.0 * theta[1] - theta[2] - 1.0).abs() < 1e-10);
        assert!((-theta[1] + 2.0 * theta[2] + 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_opened_branch_changes_matrix() {
        let net = triangle();
        let opened: HashSet<_> = [BranchId::new(1)].into_iter().collect();
        let bp = SusceptanceMatrix::build(&net, &opened, &HashSet::new(), None).unwrap();
        // B-C opened: B and C each keep only their branch to A
        assert_eq!(bp.get(1, 1), 1.0);
        assert_eq!(bp.get(2, 2), 1.0);
        assert_eq!(bp.get(1, 2), 0.0);
    }

    #[test]
    fn test_dead_nodes_get_identity_rows() {
        let net = triangle();
        let dead = vec![false, false, true];
        let bp =
            SusceptanceMatrix::build(&net, &HashSet::new(), &HashSet::new(), Some(&dead)).unwrap();
        assert!(bp.is_reference(2));
        assert_eq!(bp.get(2, 2), 1.0);
        // B lost its branch to C
        assert_eq!(bp.get(1, 1), 1.0);
    }
}
