use crate::route_tree::RouteTree;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::{NetId, RRNodeId};
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::geom::bbox::Bbox;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Overuse summary for one iteration.
#[derive(Clone, Copy, Debug, Default)]
pub struct OveruseInfo {
    pub overused_nodes: usize,
    pub total_overuse: usize,
}

/// Shared mutable routing context.
///
/// Occupancy and accumulated cost are atomics so that sibling tasks can route
/// concurrently without locks; the partition tree guarantees their bounding
/// boxes are disjoint, so no two tasks contend on the same nodes. Per-net
/// route trees and delay rows are behind mutexes that are only ever taken by
/// the task owning the net this iteration.
pub struct RoutingState {
    occ: Vec<AtomicU32>,
    acc_cost: Vec<AtomicU32>,
    pub route_trees: Vec<Mutex<Option<RouteTree>>>,
    pub net_delay: Vec<Mutex<Vec<f32>>>,
    pub route_bb: Vec<Bbox>,
    is_routed: Vec<AtomicBool>,
    is_fixed: Vec<AtomicBool>,
}

impl RoutingState {
    pub fn new(netlist: &NetlistDB, rr: &RRGraph, bb_factor: i32) -> Self {
        let num_nodes = rr.num_nodes();
        Self {
            occ: (0..num_nodes).map(|_| AtomicU32::new(0)).collect(),
            acc_cost: (0..num_nodes)
                .map(|_| AtomicU32::new(0f32.to_bits()))
                .collect(),
            route_trees: netlist.nets().map(|_| Mutex::new(None)).collect(),
            net_delay: netlist
                .nets()
                .map(|net| Mutex::new(vec![0.0; netlist.net_sinks(net) + 1]))
                .collect(),
            route_bb: load_route_bb(netlist, rr, bb_factor),
            is_routed: netlist.nets().map(|_| AtomicBool::new(false)).collect(),
            is_fixed: netlist.nets().map(|_| AtomicBool::new(false)).collect(),
        }
    }

    #[inline(always)]
    pub fn occupancy(&self, n: RRNodeId) -> u32 {
        self.occ[n.index()].load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn add_occupancy(&self, n: RRNodeId) {
        self.occ[n.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn sub_occupancy(&self, n: RRNodeId) {
        self.occ[n.index()].fetch_sub(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn acc_cost(&self, n: RRNodeId) -> f32 {
        f32::from_bits(self.acc_cost[n.index()].load(Ordering::Relaxed))
    }

    /// Present-congestion multiplier for taking one more copy of `n`.
    #[inline(always)]
    pub fn pres_cost(&self, rr: &RRGraph, n: RRNodeId, pres_fac: f32) -> f32 {
        let occ = self.occupancy(n) + 1;
        let cap = rr.node_capacity(n) as u32;
        if occ > cap {
            1.0 + (occ - cap) as f32 * pres_fac
        } else {
            1.0
        }
    }

    /// Add or remove a whole route tree's contribution to node occupancy.
    pub fn apply_tree_cost(&self, tree: &RouteTree, add: bool) {
        for &n in tree.nodes() {
            if add {
                self.add_occupancy(n);
            } else {
                self.sub_occupancy(n);
            }
        }
    }

    pub fn is_node_overused(&self, rr: &RRGraph, n: RRNodeId) -> bool {
        self.occupancy(n) > rr.node_capacity(n) as u32
    }

    /// Fold this iteration's overuse into the accumulated costs and report it.
    /// Runs serially between iterations; `acc_fac` is zero on the first.
    pub fn update_acc_cost_and_overuse(&self, rr: &RRGraph, acc_fac: f32) -> OveruseInfo {
        let mut info = OveruseInfo::default();
        for i in 0..self.occ.len() {
            let n = RRNodeId::new(i);
            let occ = self.occupancy(n);
            let cap = rr.node_capacity(n) as u32;
            if occ > cap {
                let overuse = occ - cap;
                info.overused_nodes += 1;
                info.total_overuse += overuse as usize;
                let acc = self.acc_cost(n) + overuse as f32 * acc_fac;
                self.acc_cost[i].store(acc.to_bits(), Ordering::Relaxed);
            }
        }
        info
    }

    pub fn feasible_routing(&self, rr: &RRGraph) -> bool {
        (0..self.occ.len()).all(|i| !self.is_node_overused(rr, RRNodeId::new(i)))
    }

    /// Total RR nodes claimed by route trees, counting multiplicity.
    pub fn used_wirelength(&self) -> usize {
        self.occ
            .iter()
            .map(|o| o.load(Ordering::Relaxed) as usize)
            .sum()
    }

    pub fn is_routed(&self, net: NetId) -> bool {
        self.is_routed[net.index()].load(Ordering::Relaxed)
    }

    pub fn set_routed(&self, net: NetId, routed: bool) {
        self.is_routed[net.index()].store(routed, Ordering::Relaxed);
    }

    pub fn is_fixed(&self, net: NetId) -> bool {
        self.is_fixed[net.index()].load(Ordering::Relaxed)
    }

    /// Clear per-net routed/fixed flags at the top of an iteration.
    pub fn reset_net_flags(&self) {
        for flag in self.is_routed.iter().chain(self.is_fixed.iter()) {
            flag.store(false, Ordering::Relaxed);
        }
    }
}

/// Per-net bounding boxes: terminal extent grown by `bb_factor`, clamped to
/// the device.
pub fn load_route_bb(netlist: &NetlistDB, rr: &RRGraph, bb_factor: i32) -> Vec<Bbox> {
    netlist
        .nets()
        .map(|net| {
            let terminals = netlist.net_rr_terminals(net);
            let mut xmin = i32::MAX;
            let mut xmax = i32::MIN;
            let mut ymin = i32::MAX;
            let mut ymax = i32::MIN;
            for &t in terminals {
                xmin = xmin.min(rr.node_xlow(t));
                xmax = xmax.max(rr.node_xlow(t));
                ymin = ymin.min(rr.node_ylow(t));
                ymax = ymax.max(rr.node_ylow(t));
            }
            Bbox::new(xmin, xmax, ymin, ymax).expanded(bb_factor, rr.width(), rr.height())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (RRGraph, NetlistDB) {
        let rr = RRGraph::uniform(8, 8, 1);
        let mut db = NetlistDB::new();
        db.add_net(
            "a".to_string(),
            vec![rr.node_at(1, 1, 0), rr.node_at(5, 1, 0)],
        );
        (rr, db)
    }

    #[test]
    fn occupancy_and_overuse_accounting() {
        let (rr, db) = fixture();
        let state = RoutingState::new(&db, &rr, 0);
        let n = rr.node_at(2, 2, 0);

        state.add_occupancy(n);
        assert!(!state.is_node_overused(&rr, n));
        state.add_occupancy(n);
        assert!(state.is_node_overused(&rr, n));

        let info = state.update_acc_cost_and_overuse(&rr, 0.5);
        assert_eq!(info.overused_nodes, 1);
        assert_eq!(info.total_overuse, 1);
        assert!((state.acc_cost(n) - 0.5).abs() < 1e-6);
        assert!(!state.feasible_routing(&rr));

        state.sub_occupancy(n);
        assert!(state.feasible_routing(&rr));
    }

    #[test]
    fn pres_cost_prices_the_next_copy() {
        let (rr, db) = fixture();
        let state = RoutingState::new(&db, &rr, 0);
        let n = rr.node_at(3, 3, 0);

        assert_eq!(state.pres_cost(&rr, n, 2.0), 1.0);
        state.add_occupancy(n);
        assert_eq!(state.pres_cost(&rr, n, 2.0), 3.0);
    }

    #[test]
    fn route_bb_covers_terminals_with_margin() {
        let (rr, db) = fixture();
        let bbs = load_route_bb(&db, &rr, 2);
        assert_eq!(bbs[0], Bbox::new(0, 7, 0, 3));
    }
}
