//! Lost-pocket handling for connectivity-breaking contingencies.
//!
//! When a contingency disconnects a sub-network carrying generation and
//! load, the LODF algebra does not apply: the surviving subgraph gets its
//! own B′ factorization (cached by opened/closed branch sets at the engine
//! level), the pocket's net imbalance is redistributed over the surviving
//! generators proportional to Pmax, and the pocket phases are forced to
//! zero so pocket branches carry nothing.

use std::collections::HashSet;

use metrix_core::{BranchId, GenId, LostPocket, Network, NodeId};
use tracing::debug;

use crate::constants::ZERO_POWER;
use crate::sparse::lu::DenseLu;
use crate::sparse::susceptance::{SusceptanceError, SusceptanceMatrix};

/// Factorization and compensation data for one breaking topology.
#[derive(Debug)]
pub struct PocketModel {
    pub matrix: SusceptanceMatrix,
    pub lu: DenseLu,
    /// True at nodes disconnected from every zone reference
    pub dead: Vec<bool>,
    pub pocket_nodes: Vec<NodeId>,
    pub lost_generation_mw: f64,
    pub lost_load_mw: f64,
    /// Pmax-proportional shares over surviving connected generators;
    /// empty when nothing survives to compensate
    pub redistribution: Vec<(GenId, f64)>,
}

impl PocketModel {
    pub fn build(
        network: &Network,
        opened: &HashSet<BranchId>,
        closed: &HashSet<BranchId>,
    ) -> Result<Self, SusceptanceError> {
        let n = network.nodes.len();

        // Alive = reachable from any zone reference under the modified
        // topology.
        let mut alive = vec![false; n];
        for zone in &network.zones {
            let mask = network.reachable_from(zone.balance_node, opened, closed);
            for (a, m) in alive.iter_mut().zip(mask) {
                *a |= m;
            }
        }

        let mut dead = vec![false; n];
        let mut pocket_nodes = Vec::new();
        for (idx, node) in network.nodes.iter().enumerate() {
            if !alive[idx] && node.zone.is_some() {
                dead[idx] = true;
                pocket_nodes.push(node.id);
            }
        }

        let mut lost_generation_mw = 0.0;
        let mut lost_load_mw = 0.0;
        for &node_id in &pocket_nodes {
            let node = network.node(node_id);
            for &gid in &node.generators {
                let gen = network.generator(gid);
                if gen.connected {
                    lost_generation_mw += gen.p0_mw;
                }
            }
            for &lid in &node.loads {
                lost_load_mw += network.load(lid).value_mw;
            }
        }

        // Compensation proportional to Pmax over the surviving machines
        let survivors: Vec<&metrix_core::Generator> = network
            .generators
            .iter()
            .filter(|g| g.connected && g.pmax_mw > 0.0 && !dead[g.node.value()])
            .collect();
        let pmax_total: f64 = survivors.iter().map(|g| g.pmax_mw).sum();
        let redistribution = if pmax_total > ZERO_POWER {
            survivors
                .iter()
                .map(|g| (g.id, g.pmax_mw / pmax_total))
                .collect()
        } else {
            Vec::new()
        };

        let matrix = SusceptanceMatrix::build(network, opened, closed, Some(&dead))?;
        let lu = matrix.factor()?;

        debug!(
            pocket_nodes = pocket_nodes.len(),
            lost_generation_mw, lost_load_mw, "built pocket factorization"
        );

        Ok(Self {
            matrix,
            lu,
            dead,
            pocket_nodes,
            lost_generation_mw,
            lost_load_mw,
            redistribution,
        })
    }

    /// Descriptor stored back on the contingency.
    pub fn descriptor(&self) -> LostPocket {
        LostPocket {
            nodes: self.pocket_nodes.clone(),
            has_injections: self.lost_generation_mw.abs() > ZERO_POWER
                && self.lost_load_mw.abs() > ZERO_POWER,
            lost_generation_mw: self.lost_generation_mw,
            lost_load_mw: self.lost_load_mw,
        }
    }

    /// Net imbalance the surviving network must absorb (positive when the
    /// pocket exported power).
    pub fn imbalance_mw(&self) -> f64 {
        self.lost_generation_mw - self.lost_load_mw
    }

    /// Post-contingency phases for the surviving subgraph: pocket nodes are
    /// zeroed in the right-hand side and whatever they injected is
    /// redistributed over the surviving generators.
    pub fn solve_phases(&self, network: &Network, injections: &[f64]) -> Result<Vec<f64>, SusceptanceError> {
        let mut rhs = injections.to_vec();
        let mut imbalance = 0.0;
        for (i, &d) in self.dead.iter().enumerate() {
            if d {
                imbalance += rhs[i];
                rhs[i] = 0.0;
            }
        }
        if imbalance.abs() > ZERO_POWER {
            for &(gid, share) in &self.redistribution {
                let node = network.generator(gid).node.value();
                rhs[node] += imbalance * share;
            }
        }
        self.matrix.mask_references(&mut rhs);
        Ok(self.lu.solve(&rhs)?)
    }

    /// Nodal sensitivity row of a branch on the surviving subgraph;
    /// `None` when the branch itself is de-energized by the pocket.
    pub fn branch_row(&self, network: &Network, branch: BranchId) -> Result<Option<Vec<f64>>, SusceptanceError> {
        let b = network.branch(branch);
        let (i, j) = (b.from.value(), b.to.value());
        if self.dead[i] || self.dead[j] {
            return Ok(None);
        }
        let mut e = vec![0.0; self.dead.len()];
        e[i] = b.susceptance;
        e[j] = -b.susceptance;
        self.matrix.mask_references(&mut e);
        let mut row = self.lu.solve(&e)?;
        self.matrix.mask_references(&mut row);
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_core::{Adjustability, BranchKind, Generator, Load, LoadId};

    /// Square A-B-C-D with a pendant node P behind C:
    /// A(balance) - B, B - C, C - D, D - A, C - P.
    /// P hosts 30 MW of generation and 10 MW of load.
    fn network_with_pocket() -> Network {
        let mut net = Network::new("pocket");
        let a = net.add_node("A");
        let b = net.add_node("B");
        let c = net.add_node("C");
        let d = net.add_node("D");
        let p = net.add_node("P");
        let z = net.add_zone("Z1", a);
        for n in [a, b, c, d, p] {
            net.assign_zone(n, z);
        }
        net.add_branch("A-B", a, b, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_branch("B-C", b, c, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_branch("C-D", c, d, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_branch("D-A", d, a, 1.0, 1.0, 0.01, BranchKind::Real);
        net.add_branch("C-P", c, p, 1.0, 1.0, 0.01, BranchKind::Real);

        for (name, node, p0, pmax) in [("G-A", a, 50.0, 100.0), ("G-P", p, 30.0, 60.0)] {
            net.add_generator(Generator {
                id: GenId::new(0),
                name: name.into(),
                node,
                p0_mw: p0,
                pmin_mw: 0.0,
                pmax_mw: pmax,
                half_band_mw: 10.0,
                adjustable: Adjustability::Both,
                cost_up_hr: 10.0,
                cost_up_ar: 20.0,
                cost_down_hr: 1.0,
                cost_down_ar: 2.0,
                kind: String::new(),
                participation: 1.0,
                connected: true,
            });
        }
        for (name, node, value) in [("L-B", b, 70.0), ("L-P", p, 10.0)] {
            net.add_load(Load {
                id: LoadId::new(0),
                name: name.into(),
                node,
                value_mw: value,
                shed_cost: 3000.0,
                shed_pct: 100.0,
                curative_pct: 0.0,
            });
        }
        net
    }

    #[test]
    fn test_pocket_detection_and_losses() {
        let net = network_with_pocket();
        let opened: HashSet<_> = [BranchId::new(4)].into_iter().collect();
        let model = PocketModel::build(&net, &opened, &HashSet::new()).unwrap();

        assert_eq!(model.pocket_nodes, vec![NodeId::new(4)]);
        assert!((model.lost_generation_mw - 30.0).abs() < 1e-12);
        assert!((model.lost_load_mw - 10.0).abs() < 1e-12);
        assert!((model.imbalance_mw() - 20.0).abs() < 1e-12);

        let desc = model.descriptor();
        assert!(desc.has_injections);
    }

    #[test]
    fn test_redistribution_excludes_pocket_and_sums_to_one() {
        let net = network_with_pocket();
        let opened: HashSet<_> = [BranchId::new(4)].into_iter().collect();
        let model = PocketModel::build(&net, &opened, &HashSet::new()).unwrap();

        // Only G-A survives
        assert_eq!(model.redistribution.len(), 1);
        assert_eq!(model.redistribution[0].0, GenId::new(0));
        assert!((model.redistribution[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_surviving_injections_balance() {
        let net = network_with_pocket();
        let opened: HashSet<_> = [BranchId::new(4)].into_iter().collect();
        let model = PocketModel::build(&net, &opened, &HashSet::new()).unwrap();

        // Base injections: G-A 50, G-P 30, L-B -70, L-P -10
        let injections = vec![50.0, -70.0, 0.0, 0.0, 30.0 - 10.0];
        let theta = model.solve_phases(&net, &injections).unwrap();

        // Pocket phase forced to zero
        assert_eq!(theta[4], 0.0);

        // Sum of surviving flows out of each non-reference node equals its
        // effective injection; check node B: inflow A-B + inflow C-B = 70
        let flow_ab = theta[0] - theta[1];
        let flow_cb = theta[2] - theta[1];
        assert!((flow_ab + flow_cb - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_branch_row_on_pocket_branch_is_none() {
        let net = network_with_pocket();
        let opened: HashSet<_> = [BranchId::new(4)].into_iter().collect();
        let model = PocketModel::build(&net, &opened, &HashSet::new()).unwrap();

        assert!(model.branch_row(&net, BranchId::new(4)).unwrap().is_none());
        assert!(model.branch_row(&net, BranchId::new(0)).unwrap().is_some());
    }
}
