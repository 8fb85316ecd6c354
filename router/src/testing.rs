//! Deterministic fixtures for dispatcher and decomposition tests: a stub
//! connection router that draws L-shaped paths (or fails on demand) and a
//! harness owning every piece of iteration context.

use crate::budgets::RouteBudgets;
use crate::connection::{ConnectionRouter, CostParams, SinkOutcome};
use crate::connections::ConnectionTracker;
use crate::dispatch::IterCtx;
use crate::partition::PartitionTree;
use crate::pool::WorkerPool;
use crate::route_tree::RouteTree;
use crate::state::RoutingState;
use crate::stats::RouterStats;
use crate::timing::TimingInfo;
use crate::trace::TraceLog;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::{NetId, RRNodeId};
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::geom::bbox::Bbox;
use fabric_common::util::config::RouterConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

/// Connection router double: succeeds with a straight L-shaped path unless
/// told to fail, and never leaves the bounding box.
#[derive(Clone, Default)]
pub struct StubRouter {
    fail_nets: HashSet<NetId>,
    fail_once_sinks: Arc<Mutex<HashSet<RRNodeId>>>,
}

impl StubRouter {
    /// Exhaust every search for the given net.
    pub fn failing_net(net: NetId) -> Self {
        Self {
            fail_nets: HashSet::from([net]),
            ..Default::default()
        }
    }

    /// Exhaust the first search towards `sink`, succeed afterwards.
    pub fn failing_once_for(sink: RRNodeId) -> Self {
        Self {
            fail_once_sinks: Arc::new(Mutex::new(HashSet::from([sink]))),
            ..Default::default()
        }
    }
}

impl ConnectionRouter for StubRouter {
    fn new_for(_rr: &RRGraph, _opts: &RouterConfig) -> Self {
        Self::default()
    }

    fn route_sink(
        &mut self,
        rr: &RRGraph,
        _state: &RoutingState,
        tree: &RouteTree,
        sink: RRNodeId,
        _cost: &CostParams,
        bb: &Bbox,
        _choke: Option<&HashMap<RRNodeId, usize>>,
        stats: &mut RouterStats,
    ) -> SinkOutcome {
        stats.heap_pops += 1;

        if self.fail_nets.contains(&tree.net()) {
            return SinkOutcome::Exhausted;
        }
        if self.fail_once_sinks.lock().unwrap().remove(&sink) {
            return SinkOutcome::Exhausted;
        }
        if !rr.inside_bb(sink, bb) {
            return SinkOutcome::Exhausted;
        }

        let sx = rr.node_xlow(sink);
        let sy = rr.node_ylow(sink);
        let start = tree
            .nodes()
            .iter()
            .copied()
            .filter(|&n| rr.inside_bb(n, bb))
            .min_by_key(|&n| (rr.node_xlow(n) - sx).abs() + (rr.node_ylow(n) - sy).abs());
        let Some(start) = start else {
            return SinkOutcome::Exhausted;
        };

        let mut path = vec![start];
        let mut x = rr.node_xlow(start);
        let mut y = rr.node_ylow(start);
        while x != sx {
            x += (sx - x).signum();
            path.push(rr.node_at(x, y, 0));
        }
        while y != sy {
            y += (sy - y).signum();
            path.push(rr.node_at(x, y, 0));
        }
        if *path.last().unwrap() != sink {
            path.push(sink);
        }
        SinkOutcome::Routed(path)
    }
}

/// Owns one iteration's worth of routing context for tests.
pub struct Harness {
    pub rr: RRGraph,
    pub db: NetlistDB,
    pub state: RoutingState,
    pub opts: RouterConfig,
    pub routers: WorkerPool<StubRouter>,
    pub stats: WorkerPool<RouterStats>,
    pub timing: TimingInfo,
    pub tracker: ConnectionTracker,
    pub budgets: RouteBudgets,
    pub choking_spots: Vec<HashMap<RRNodeId, usize>>,
    pub nets_to_retry: Mutex<Vec<NetId>>,
    pub decomp_retries: Vec<AtomicUsize>,
    pub trace: TraceLog,
}

impl Harness {
    pub fn new(rr: RRGraph, db: NetlistDB, opts: RouterConfig) -> Self {
        let state = RoutingState::new(&db, &rr, 0);
        let timing = TimingInfo::constant(&db, 1.0);
        let tracker = ConnectionTracker::new(&db);
        let budgets = RouteBudgets::new(&db, opts.routing_budgets_algorithm);
        let choking_spots = crate::net_router::set_nets_choking_spots(&db, &rr, false);
        let decomp_retries = db.nets().map(|_| AtomicUsize::new(0)).collect();
        Self {
            routers: WorkerPool::new(StubRouter::default(), opts.num_workers),
            stats: WorkerPool::new(RouterStats::default(), opts.num_workers),
            state,
            timing,
            tracker,
            budgets,
            choking_spots,
            nets_to_retry: Mutex::new(Vec::new()),
            decomp_retries,
            trace: TraceLog::new(false),
            rr,
            db,
            opts,
        }
    }

    /// Four nets named q0..q3, one per quadrant of a `grid` x `grid` device.
    pub fn quadrants(grid: i32, _fanout: usize) -> Self {
        let rr = RRGraph::uniform(grid, grid, 2);
        let mut db = NetlistDB::new();
        let half = grid / 2;
        let quads = [
            (0, 0),
            (half + 1, 0),
            (0, half + 1),
            (half + 1, half + 1),
        ];
        for (i, &(x0, y0)) in quads.iter().enumerate() {
            let x1 = x0 + half - 2;
            let y1 = y0 + half - 2;
            db.add_net(
                format!("q{}", i),
                vec![
                    rr.node_at(x0, y0, 0),
                    rr.node_at(x1, y1, 0),
                    rr.node_at(x0, y1, 0),
                    rr.node_at(x1, y0, 0),
                    rr.node_at((x0 + x1) / 2, (y0 + y1) / 2, 0),
                ],
            );
        }
        Self::new(rr, db, RouterConfig::default())
    }

    /// The quadrant fixture plus a 16-sink net spanning the whole device.
    pub fn quadrants_with_spanning_net(grid: i32, fanout: usize) -> Self {
        let mut harness = Self::quadrants(grid, fanout);
        let rr = &harness.rr;
        let mut terminals = vec![rr.node_at(grid / 2 - 1, grid / 2 - 1, 0)];
        for i in 0..4 {
            for j in 0..4 {
                terminals.push(rr.node_at(2 + 5 * i, 2 + 5 * j, 1));
            }
        }
        harness.db.add_net("span".to_string(), terminals);
        // Rebuild the per-net state for the larger netlist.
        harness.state = RoutingState::new(&harness.db, &harness.rr, 0);
        harness.timing = TimingInfo::constant(&harness.db, 1.0);
        harness.tracker = ConnectionTracker::new(&harness.db);
        harness.budgets =
            RouteBudgets::new(&harness.db, harness.opts.routing_budgets_algorithm);
        harness.choking_spots =
            crate::net_router::set_nets_choking_spots(&harness.db, &harness.rr, false);
        harness.decomp_retries = harness.db.nets().map(|_| AtomicUsize::new(0)).collect();
        harness
    }

    pub fn build_tree(&self) -> PartitionTree {
        PartitionTree::build(
            &self.db,
            &self.state.route_bb,
            self.rr.width(),
            self.rr.height(),
        )
    }

    pub fn thread_pool(&self) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.num_workers)
            .build()
            .unwrap()
    }

    pub fn ctx(&self) -> IterCtx<'_, StubRouter> {
        IterCtx {
            netlist: &self.db,
            rr: &self.rr,
            state: &self.state,
            opts: &self.opts,
            itry: 1,
            pres_fac: 0.5,
            routers: &self.routers,
            stats: &self.stats,
            timing: Some(&self.timing),
            tracker: &self.tracker,
            budgets: &self.budgets,
            worst_negative_slack: 0.0,
            choking_spots: &self.choking_spots,
            nets_to_retry: &self.nets_to_retry,
            decomp_retries: &self.decomp_retries,
            trace: &self.trace,
        }
    }
}
