//! Rank-k outage model for multi-line contingencies.
//!
//! Opening or closing k branches changes B′ by a rank-k update
//! `ΔB′ = U·C·Uᵀ` with `u_t = e_from − e_to` and `C = diag(δ_t)`
//! (δ = −b for an opening, +b for a closing). By the Woodbury identity the
//! post-contingency solution and sensitivities only need the k base-case
//! solves `g_t = B′⁻¹·u_t` and the factorization of the small system
//!
//! ```text
//! B = I + C·Uᵀ·G,     B[t,s] = [t = s] + δ_t·(g_s[from_t] − g_s[to_t])
//! ```
//!
//! For a single opening, B is the scalar `1 − b·(g[m] − g[k])`, the
//! classical LODF denominator. A (near-)singular B means the contingency
//! splits the network: the caller must route it through the lost-pocket
//! machinery instead.

use metrix_core::BranchId;

use crate::constants::THRESHOLD_NOT_CONNEX;
use crate::sparse::lu::{DenseLu, LuError};

/// One branch opened or closed by the contingency.
#[derive(Debug, Clone)]
pub struct OutagedLine {
    pub branch: BranchId,
    pub from: usize,
    pub to: usize,
    pub susceptance: f64,
    /// Susceptance change applied to B′: −b for openings, +b for closings
    pub delta: f64,
}

impl OutagedLine {
    pub fn opening(branch: BranchId, from: usize, to: usize, susceptance: f64) -> Self {
        Self {
            branch,
            from,
            to,
            susceptance,
            delta: -susceptance,
        }
    }

    pub fn closing(branch: BranchId, from: usize, to: usize, susceptance: f64) -> Self {
        Self {
            branch,
            from,
            to,
            susceptance,
            delta: susceptance,
        }
    }
}

/// Prepared rank-k model for one contingency topology.
#[derive(Debug, Clone)]
pub struct LineOutageSet {
    lines: Vec<OutagedLine>,
    /// g_t = B′⁻¹·u_t, one column per changed line
    g: Vec<Vec<f64>>,
    small: DenseLu,
}

impl LineOutageSet {
    /// Build the model. Returns `Ok(None)` when the small system is
    /// (near-)singular, i.e. the contingency breaks connectivity.
    pub fn build(
        base_lu: &DenseLu,
        reference: &[bool],
        lines: Vec<OutagedLine>,
    ) -> Result<Option<Self>, LuError> {
        let n = base_lu.dim();
        let k = lines.len();
        debug_assert!(k > 0);

        let mut g = Vec::with_capacity(k);
        for line in &lines {
            let mut u = vec![0.0; n];
            if !reference[line.from] {
                u[line.from] = 1.0;
            }
            if !reference[line.to] {
                u[line.to] = -1.0;
            }
            g.push(base_lu.solve(&u)?);
        }

        let mut small = vec![0.0; k * k];
        for t in 0..k {
            for s in 0..k {
                let diff = g[s][lines[t].from] - g[s][lines[t].to];
                small[t * k + s] = if t == s { 1.0 } else { 0.0 } + lines[t].delta * diff;
            }
        }

        if k == 1 {
            // The scalar case is the classical LODF denominator test
            if small[0].abs() <= THRESHOLD_NOT_CONNEX {
                return Ok(None);
            }
        }

        let small = match DenseLu::from_dense(small, k, THRESHOLD_NOT_CONNEX) {
            Ok(lu) => lu,
            Err(LuError::Singular { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(Some(Self { lines, g, small }))
    }

    pub fn lines(&self) -> &[OutagedLine] {
        &self.lines
    }

    pub fn contains(&self, branch: BranchId) -> bool {
        self.lines
            .iter()
            .any(|l| l.branch == branch && l.delta < 0.0)
    }

    /// Post-contingency phases from base-case phases (or from any base-case
    /// solution, the map being linear).
    pub fn post_theta(&self, theta: &[f64]) -> Result<Vec<f64>, LuError> {
        let k = self.lines.len();
        let mut w = vec![0.0; k];
        for (t, line) in self.lines.iter().enumerate() {
            w[t] = line.delta * (theta[line.from] - theta[line.to]);
        }
        let y = self.small.solve(&w)?;

        let mut corrected = theta.to_vec();
        for (t, g_t) in self.g.iter().enumerate() {
            let y_t = y[t];
            if y_t == 0.0 {
                continue;
            }
            for (c, &g_val) in corrected.iter_mut().zip(g_t) {
                *c -= y_t * g_val;
            }
        }
        Ok(corrected)
    }

    /// Monitor response to the changed lines: `h[t] = Σ_q w_q·b_q·(g_t[i_q] − g_t[j_q])`
    /// over the monitor's branch terms `(i, j, w·b)`.
    pub fn monitor_response(&self, terms: &[(usize, usize, f64)]) -> Vec<f64> {
        self.g
            .iter()
            .map(|g_t| {
                terms
                    .iter()
                    .map(|&(i, j, wb)| wb * (g_t[i] - g_t[j]))
                    .sum()
            })
            .collect()
    }

    /// Correct a base-case nodal sensitivity row for this outage:
    /// `row ← row − Σ_t δ_t·z_t·g_t` with `Bᵀ·z = h`.
    pub fn correct_row(&self, row: &mut [f64], h: &[f64]) -> Result<(), LuError> {
        let z = self.small.solve_transposed(h)?;
        for (t, g_t) in self.g.iter().enumerate() {
            let lambda = self.lines[t].delta * z[t];
            if lambda == 0.0 {
                continue;
            }
            for (r, &g_val) in row.iter_mut().zip(g_t) {
                *r -= lambda * g_val;
            }
        }
        Ok(())
    }
}
