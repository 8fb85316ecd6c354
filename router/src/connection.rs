//! Single-connection router: a timing-driven A* over the RR graph, bounded
//! by the net's bounding box and generic over the heap strategy.

use crate::heap::{HeapEntry, RouterHeap};
use crate::route_tree::{LINK_DELAY, RouteTree};
use crate::state::RoutingState;
use crate::stats::RouterStats;
use fabric_common::db::indices::RRNodeId;
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::geom::bbox::Bbox;
use fabric_common::util::config::RouterConfig;
use std::collections::HashMap;

/// Extra cost per occupant for expanding through a known choke point.
const CHOKE_PENALTY: f32 = 2.0;

/// How far around the sink the heap is seeded for high-fanout nets.
const HIGH_FANOUT_SEED_RADIUS: i32 = 8;

#[derive(Clone, Copy, Debug)]
pub struct DelayBudget {
    pub min_delay: f32,
    pub max_delay: f32,
    pub target_delay: f32,
    pub short_path_criticality: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct CostParams {
    pub criticality: f32,
    pub astar_fac: f32,
    pub bend_cost: f32,
    pub pres_fac: f32,
    pub delay_budget: Option<DelayBudget>,
}

/// Result of one sink search. `Exhausted` means the heap emptied without
/// reaching the sink; whether that is fatal or a bbox retry is the caller's
/// call, since only it knows how the bbox compares to the device.
pub enum SinkOutcome {
    Routed(Vec<RRNodeId>),
    Exhausted,
}

/// One worker's connection router. Implementations own all search scratch, so
/// a pool of them can run concurrently against the shared routing state.
pub trait ConnectionRouter: Clone + Send + Sync {
    fn new_for(rr: &RRGraph, opts: &RouterConfig) -> Self;

    /// Enable routing-constraints-validation (hold budget) costs.
    fn set_rcv_enabled(&mut self, _enabled: bool) {}

    /// Route from the net's current route tree to `sink`, expanding only RR
    /// nodes inside `bb`. On success the returned path starts at a tree node
    /// and ends at `sink`.
    #[allow(clippy::too_many_arguments)]
    fn route_sink(
        &mut self,
        rr: &RRGraph,
        state: &RoutingState,
        tree: &RouteTree,
        sink: RRNodeId,
        cost: &CostParams,
        bb: &Bbox,
        choke: Option<&HashMap<RRNodeId, usize>>,
        stats: &mut RouterStats,
    ) -> SinkOutcome;
}

/// The production router. Search scratch is epoch-tagged so consecutive
/// searches reuse the arrays without clearing them.
#[derive(Clone)]
pub struct TimingDrivenRouter<H: RouterHeap> {
    heap: H,
    back_cost: Vec<f32>,
    hops: Vec<u32>,
    prev: Vec<u32>,
    visited_tag: Vec<u32>,
    current_tag: u32,
    high_fanout_threshold: usize,
    rcv_enabled: bool,
}

impl<H: RouterHeap> TimingDrivenRouter<H> {
    fn begin_search(&mut self) {
        self.current_tag += 1;
        if self.current_tag == 0 {
            self.visited_tag.fill(0);
            self.current_tag = 1;
        }
        self.heap.clear();
    }

    #[inline(always)]
    fn expected_cost(&self, rr: &RRGraph, from: RRNodeId, sink_x: i32, sink_y: i32) -> f32 {
        let dist = (rr.node_xlow(from) - sink_x).abs() + (rr.node_ylow(from) - sink_y).abs();
        dist as f32
    }

    /// Congestion price of taking one more copy of `n`.
    #[inline(always)]
    fn congestion_cost(
        &self,
        rr: &RRGraph,
        state: &RoutingState,
        n: RRNodeId,
        pres_fac: f32,
    ) -> f32 {
        rr.base_cost(n) * (1.0 + state.acc_cost(n)) * state.pres_cost(rr, n, pres_fac)
    }

    fn seed_nodes(&self, rr: &RRGraph, tree: &RouteTree, sink: RRNodeId, bb: &Bbox) -> Vec<RRNodeId> {
        let in_bb = |n: &&RRNodeId| rr.inside_bb(**n, bb);

        if tree.num_sinks() >= self.high_fanout_threshold {
            // Seeding the whole tree of a high-fanout net floods the heap;
            // start near the sink and fall back to the full tree if the
            // vicinity is empty.
            let vicinity = Bbox::new(
                rr.node_xlow(sink) - HIGH_FANOUT_SEED_RADIUS,
                rr.node_xlow(sink) + HIGH_FANOUT_SEED_RADIUS,
                rr.node_ylow(sink) - HIGH_FANOUT_SEED_RADIUS,
                rr.node_ylow(sink) + HIGH_FANOUT_SEED_RADIUS,
            );
            let near: Vec<RRNodeId> = tree
                .nodes()
                .iter()
                .filter(in_bb)
                .filter(|&&n| rr.inside_bb(n, &vicinity))
                .copied()
                .collect();
            if !near.is_empty() {
                return near;
            }
        }
        tree.nodes().iter().filter(in_bb).copied().collect()
    }

    fn reconstruct_path(&self, sink: RRNodeId) -> Vec<RRNodeId> {
        let mut path = vec![sink];
        let mut cur = sink.index();
        while self.prev[cur] != u32::MAX {
            cur = self.prev[cur] as usize;
            path.push(RRNodeId::new(cur));
        }
        path.reverse();
        path
    }
}

impl<H: RouterHeap> ConnectionRouter for TimingDrivenRouter<H> {
    fn new_for(rr: &RRGraph, opts: &RouterConfig) -> Self {
        let n = rr.num_nodes();
        Self {
            heap: H::new(),
            back_cost: vec![f32::INFINITY; n],
            hops: vec![0; n],
            prev: vec![u32::MAX; n],
            visited_tag: vec![0; n],
            current_tag: 0,
            high_fanout_threshold: opts.high_fanout_threshold,
            rcv_enabled: false,
        }
    }

    fn set_rcv_enabled(&mut self, enabled: bool) {
        self.rcv_enabled = enabled;
    }

    fn route_sink(
        &mut self,
        rr: &RRGraph,
        state: &RoutingState,
        tree: &RouteTree,
        sink: RRNodeId,
        cost: &CostParams,
        bb: &Bbox,
        choke: Option<&HashMap<RRNodeId, usize>>,
        stats: &mut RouterStats,
    ) -> SinkOutcome {
        self.begin_search();

        let sink_x = rr.node_xlow(sink);
        let sink_y = rr.node_ylow(sink);
        let crit = cost.criticality;

        for seed in self.seed_nodes(rr, tree, sink, bb) {
            let i = seed.index();
            // Delay already accumulated along the tree counts against the
            // criticality-weighted objective.
            let back = crit * tree.node_delay(seed).unwrap_or(0.0) / LINK_DELAY;
            self.back_cost[i] = back;
            self.hops[i] = 0;
            self.prev[i] = u32::MAX;
            self.visited_tag[i] = self.current_tag;
            self.heap.push(HeapEntry {
                total_cost: back + cost.astar_fac * self.expected_cost(rr, seed, sink_x, sink_y),
                back_cost: back,
                node: seed,
            });
            stats.heap_pushes += 1;
        }

        while let Some(entry) = self.heap.pop() {
            stats.heap_pops += 1;
            let n = entry.node;
            let i = n.index();

            if entry.back_cost > self.back_cost[i] + 1e-6 {
                continue; // Superseded by a cheaper visit.
            }
            if n == sink {
                return SinkOutcome::Routed(self.reconstruct_path(sink));
            }

            let cur_back = self.back_cost[i];
            let cur_hops = self.hops[i];
            let prev_node = self.prev[i];

            for &m in rr.edges(n) {
                if !rr.inside_bb(m, bb) {
                    continue;
                }
                let j = m.index();

                let mut hop_cost = crit
                    + (1.0 - crit) * self.congestion_cost(rr, state, m, cost.pres_fac);

                if cost.bend_cost != 0.0 && prev_node != u32::MAX {
                    let p = RRNodeId::new(prev_node as usize);
                    let straight_x =
                        rr.node_xlow(p) == rr.node_xlow(n) && rr.node_xlow(n) == rr.node_xlow(m);
                    let straight_y =
                        rr.node_ylow(p) == rr.node_ylow(n) && rr.node_ylow(n) == rr.node_ylow(m);
                    if !straight_x && !straight_y {
                        hop_cost += cost.bend_cost;
                    }
                }

                if let Some(choke) = choke {
                    if let Some(&count) = choke.get(&m) {
                        hop_cost += CHOKE_PENALTY * count as f32;
                    }
                }

                if self.rcv_enabled {
                    if let Some(budget) = cost.delay_budget {
                        // Penalize paths that would land under the hold
                        // budget, pushing the search toward longer routes.
                        let delay = (cur_hops + 1) as f32 * LINK_DELAY;
                        if delay < budget.min_delay {
                            hop_cost += budget.short_path_criticality
                                * (budget.min_delay - delay)
                                / LINK_DELAY;
                        }
                    }
                }

                let tentative = cur_back + hop_cost;
                let seen = self.visited_tag[j] == self.current_tag;
                if seen && tentative >= self.back_cost[j] {
                    continue;
                }

                self.visited_tag[j] = self.current_tag;
                self.back_cost[j] = tentative;
                self.hops[j] = cur_hops + 1;
                self.prev[j] = i as u32;
                self.heap.push(HeapEntry {
                    total_cost: tentative
                        + cost.astar_fac * self.expected_cost(rr, m, sink_x, sink_y),
                    back_cost: tentative,
                    node: m,
                });
                stats.heap_pushes += 1;
            }
        }

        SinkOutcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::BinaryHeap;
    use fabric_common::db::core::NetlistDB;
    use fabric_common::db::indices::NetId;

    fn cost_params() -> CostParams {
        CostParams {
            criticality: 0.5,
            astar_fac: 1.2,
            bend_cost: 1.0,
            pres_fac: 0.5,
            delay_budget: None,
        }
    }

    fn fixture(w: i32, h: i32) -> (RRGraph, NetlistDB, RoutingState) {
        let rr = RRGraph::uniform(w, h, 1);
        let mut db = NetlistDB::new();
        db.add_net(
            "a".to_string(),
            vec![rr.node_at(0, 0, 0), rr.node_at(w - 1, h - 1, 0)],
        );
        let state = RoutingState::new(&db, &rr, w);
        (rr, db, state)
    }

    #[test]
    fn routes_across_the_grid() {
        let (rr, _db, state) = fixture(8, 8);
        let opts = RouterConfig::default();
        let mut router = TimingDrivenRouter::<BinaryHeap>::new_for(&rr, &opts);
        let mut stats = RouterStats::default();

        let tree = RouteTree::new(NetId::new(0), rr.node_at(0, 0, 0), 1);
        let sink = rr.node_at(7, 7, 0);
        let bb = Bbox::full_device(8, 8);

        match router.route_sink(&rr, &state, &tree, sink, &cost_params(), &bb, None, &mut stats) {
            SinkOutcome::Routed(path) => {
                assert_eq!(path[0], rr.node_at(0, 0, 0));
                assert_eq!(*path.last().unwrap(), sink);
                // Manhattan distance is 14 hops, so at least 15 nodes.
                assert!(path.len() >= 15);
                for pair in path.windows(2) {
                    assert!(rr.edges(pair[0]).contains(&pair[1]));
                }
            }
            SinkOutcome::Exhausted => panic!("expected a route"),
        }
        assert!(stats.heap_pops > 0);
    }

    #[test]
    fn respects_the_bounding_box() {
        let (rr, _db, state) = fixture(8, 8);
        let opts = RouterConfig::default();
        let mut router = TimingDrivenRouter::<BinaryHeap>::new_for(&rr, &opts);
        let mut stats = RouterStats::default();

        let tree = RouteTree::new(NetId::new(0), rr.node_at(0, 0, 0), 1);
        let sink = rr.node_at(7, 7, 0);
        // Sink is outside this box: the search must exhaust, not escape.
        let bb = Bbox::new(0, 3, 0, 3);

        match router.route_sink(&rr, &state, &tree, sink, &cost_params(), &bb, None, &mut stats) {
            SinkOutcome::Exhausted => {}
            SinkOutcome::Routed(_) => panic!("escaped the bbox"),
        }
    }

    #[test]
    fn congestion_steers_the_search() {
        let (rr, _db, state) = fixture(5, 3);
        let opts = RouterConfig::default();
        let mut router = TimingDrivenRouter::<BinaryHeap>::new_for(&rr, &opts);
        let mut stats = RouterStats::default();

        // Jam the straight row between source and sink.
        for x in 1..4 {
            for _ in 0..3 {
                state.add_occupancy(rr.node_at(x, 1, 0));
            }
        }

        let tree = RouteTree::new(NetId::new(0), rr.node_at(0, 1, 0), 1);
        let sink = rr.node_at(4, 1, 0);
        let bb = Bbox::full_device(5, 3);
        let mut params = cost_params();
        params.criticality = 0.0;
        params.pres_fac = 10.0;

        match router.route_sink(&rr, &state, &tree, sink, &params, &bb, None, &mut stats) {
            SinkOutcome::Routed(path) => {
                // The detour leaves the jammed row.
                assert!(path.iter().any(|&n| rr.node_ylow(n) != 1));
            }
            SinkOutcome::Exhausted => panic!("expected a route"),
        }
    }
}
