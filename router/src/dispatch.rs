//! Partition-tree dispatcher: walks the tree as a task DAG. Each task routes
//! its node's nets (decomposing the ones that are worth it), routes the
//! virtual nets inherited from the parent, then fans out its two children as
//! parallel tasks. Sibling subtrees cover disjoint regions, so their tasks
//! touch disjoint RR nodes and the shared state needs no locks.

use crate::budgets::RouteBudgets;
use crate::connection::ConnectionRouter;
use crate::connections::ConnectionTracker;
use crate::decompose::{
    MAX_DECOMP_REROUTE, route_and_decompose, route_virtual_net, should_decompose_net,
};
use crate::net_router::{NetResultFlags, route_net, should_really_route_net};
use crate::partition::{PartitionTree, PartitionTreeNode};
use crate::pool::WorkerPool;
use crate::state::RoutingState;
use crate::stats::RouterStats;
use crate::timing::TimingInfo;
use crate::trace::TraceLog;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::{NetId, RRNodeId};
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::util::config::RouterConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Everything a routing task needs, collected once per iteration. Shared
/// read-only across tasks; the writable parts carry their own interior
/// mutability.
pub struct IterCtx<'a, R: ConnectionRouter> {
    pub netlist: &'a NetlistDB,
    pub rr: &'a RRGraph,
    pub state: &'a RoutingState,
    pub opts: &'a RouterConfig,
    pub itry: usize,
    pub pres_fac: f32,
    pub routers: &'a WorkerPool<R>,
    pub stats: &'a WorkerPool<RouterStats>,
    pub timing: Option<&'a TimingInfo>,
    pub tracker: &'a ConnectionTracker,
    pub budgets: &'a RouteBudgets,
    pub worst_negative_slack: f32,
    pub choking_spots: &'a [HashMap<RRNodeId, usize>],
    pub nets_to_retry: &'a Mutex<Vec<NetId>>,
    pub decomp_retries: &'a [AtomicUsize],
    pub trace: &'a TraceLog,
}

/// Routing results for one iteration, reduced over the whole tree.
pub struct RouteIterResults {
    /// False when some connection is impossible even with a full-device bbox.
    pub is_routable: bool,
    /// Nets whose routing was actually changed this iteration.
    pub rerouted_nets: Vec<NetId>,
    /// Nets that exhausted their bbox and must be retried with a full-device
    /// bbox next iteration. The controller grows their bboxes.
    pub retry_nets: Vec<NetId>,
    pub stats: RouterStats,
}

/// Route one net at its partition-tree node, honoring the skip gates.
fn try_parallel_route_net<R: ConnectionRouter>(ctx: &IterCtx<'_, R>, net: NetId) -> NetResultFlags {
    if !should_really_route_net(ctx, net) {
        return NetResultFlags {
            success: true,
            ..Default::default()
        };
    }

    let flags = ctx
        .routers
        .with(|router| ctx.stats.with(|stats| route_net(ctx, router, stats, net)));

    if flags.success {
        ctx.state.set_routed(net, true);
    }
    flags
}

fn route_partition_tree_helper<'scope, R: ConnectionRouter>(
    s: &rayon::Scope<'scope>,
    node: &'scope mut PartitionTreeNode,
    ctx: &'scope IterCtx<'scope, R>,
    level: usize,
) {
    let PartitionTreeNode {
        nets,
        virtual_nets,
        left,
        right,
        cutline_axis,
        cutline_pos,
        is_routable,
        rerouted_nets,
    } = node;

    // Biggest nets first: they gain the most from early routing and from
    // decomposition.
    nets.sort_unstable_by(|&a, &b| {
        ctx.netlist
            .net_sinks(b)
            .cmp(&ctx.netlist.net_sinks(a))
            .then(a.cmp(&b))
    });

    *is_routable = true;
    rerouted_nets.clear();
    let timer = Instant::now();

    for &net in nets.iter() {
        if left.is_some() && should_decompose_net(ctx, net, level, *cutline_pos, *cutline_axis) {
            if let Some((left_half, right_half)) =
                route_and_decompose(ctx, net, *cutline_pos, *cutline_axis)
            {
                left.as_mut().unwrap().virtual_nets.push(left_half);
                right.as_mut().unwrap().virtual_nets.push(right_half);
                rerouted_nets.push(net);
                continue;
            }
        }

        let flags = try_parallel_route_net(ctx, net);
        if !flags.success && !flags.retry_with_full_bb {
            *is_routable = false;
        }
        if flags.was_rerouted {
            rerouted_nets.push(net);
        }
        if flags.retry_with_full_bb {
            ctx.nets_to_retry.lock().unwrap().push(net);
        }
    }

    for vnet in virtual_nets.drain(..) {
        let flags = route_virtual_net(ctx, &vnet);

        if flags.retry_with_full_bb {
            // Retrying at the root with a full-device bbox makes the clipped
            // halves meaningless; stop decomposing this net for good.
            ctx.decomp_retries[vnet.net.index()].store(MAX_DECOMP_REROUTE, Ordering::Relaxed);
            ctx.nets_to_retry.lock().unwrap().push(vnet.net);
        } else if !flags.success {
            // The cutline left this half no useful routing resources.
            ctx.decomp_retries[vnet.net.index()].store(MAX_DECOMP_REROUTE, Ordering::Relaxed);
        }
    }

    if ctx.trace.enabled() {
        ctx.trace.log(format!(
            "level {} node with {} nets routed in {:.3} s",
            level,
            nets.len(),
            timer.elapsed().as_secs_f64()
        ));
    }

    match (left.as_deref_mut(), right.as_deref_mut()) {
        (Some(l), Some(r)) => {
            s.spawn(move |s| route_partition_tree_helper(s, l, ctx, level + 1));
            s.spawn(move |s| route_partition_tree_helper(s, r, ctx, level + 1));
        }
        (None, None) => {}
        _ => unreachable!("a partition tree node has both children or neither"),
    }
}

fn reduce_partition_tree(node: &PartitionTreeNode, results: &mut RouteIterResults) {
    results.is_routable &= node.is_routable;
    results
        .rerouted_nets
        .extend(node.rerouted_nets.iter().copied());
    if let Some(l) = &node.left {
        reduce_partition_tree(l, results);
    }
    if let Some(r) = &node.right {
        reduce_partition_tree(r, results);
    }
}

/// Route every net in the tree on the worker pool and reduce the results.
/// Blocks until all spawned tasks complete.
pub fn decompose_route_partition_tree<R: ConnectionRouter>(
    pool: &rayon::ThreadPool,
    tree: &mut PartitionTree,
    ctx: &IterCtx<'_, R>,
) -> RouteIterResults {
    ctx.nets_to_retry.lock().unwrap().clear();

    pool.install(|| {
        rayon::scope(|s| route_partition_tree_helper(s, tree.root_mut(), ctx, 0));
    });

    let retry_nets: Vec<NetId> = std::mem::take(&mut *ctx.nets_to_retry.lock().unwrap());
    for &net in &retry_nets {
        ctx.decomp_retries[net.index()].store(MAX_DECOMP_REROUTE, Ordering::Relaxed);
    }

    let mut results = RouteIterResults {
        is_routable: true,
        rerouted_nets: Vec::new(),
        retry_nets,
        stats: RouterStats::default(),
    };
    reduce_partition_tree(tree.root(), &mut results);
    ctx.stats.for_each(|s| results.stats.merge(s));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionTree;
    use crate::testing::Harness;
    use fabric_common::geom::bbox::Bbox;

    /// Scenario: four nets, one per quadrant, on four workers. Everything
    /// resolves in the leaves; the root holds nothing.
    #[test]
    fn quadrant_nets_route_in_parallel_leaves() {
        let mut harness = Harness::quadrants(20, 4);
        harness.opts.num_workers = 4;

        let mut tree = harness.build_tree();
        assert!(tree.root().nets.is_empty());

        let pool = harness.thread_pool();
        let ctx = harness.ctx();
        let results = decompose_route_partition_tree(&pool, &mut tree, &ctx);

        assert!(results.is_routable);
        assert!(results.retry_nets.is_empty());
        assert_eq!(results.rerouted_nets.len(), 4);
        assert_eq!(results.stats.nets_routed, 4);
        for net in harness.db.nets() {
            assert!(harness.state.route_trees[net.index()]
                .lock()
                .unwrap()
                .as_ref()
                .unwrap()
                .all_reached());
        }
    }

    /// Scenario: a device-spanning net plus the four quadrant nets. The
    /// spanning net is held at the root and decomposes into two virtual nets
    /// that resolve in the children; all five nets count as rerouted.
    #[test]
    fn spanning_net_decomposes_at_the_root() {
        let mut harness = Harness::quadrants_with_spanning_net(20, 4);
        harness.opts.num_workers = 4;

        let mut tree = harness.build_tree();
        let spanning = harness.db.net_name_map["span"];
        assert_eq!(tree.root().nets, vec![spanning]);

        let pool = harness.thread_pool();
        let ctx = harness.ctx();
        let results = decompose_route_partition_tree(&pool, &mut tree, &ctx);

        assert!(results.is_routable);
        let mut rerouted = results.rerouted_nets.clone();
        rerouted.sort();
        let mut all: Vec<_> = harness.db.nets().collect();
        all.sort();
        assert_eq!(rerouted, all);

        // Decomposition happened exactly once for the spanning net.
        assert_eq!(
            harness.decomp_retries[spanning.index()].load(Ordering::Relaxed),
            1
        );
        let slot = harness.state.route_trees[spanning.index()].lock().unwrap();
        assert!(slot.as_ref().unwrap().all_reached());
    }

    /// Scenario: a skeleton connection fails. Decomposition backs off, the
    /// net routes directly at its node, and the retry counter still moves.
    #[test]
    fn failed_skeleton_falls_back_to_direct_routing() {
        let mut harness = Harness::quadrants_with_spanning_net(20, 4);
        harness.opts.num_workers = 4;
        let spanning = harness.db.net_name_map["span"];

        // Fail exactly one skeleton sink, then let the direct attempt pass.
        let poisoned = harness.db.net_sink_rr(spanning, 1);
        harness.routers = WorkerPool::new(
            crate::testing::StubRouter::failing_once_for(poisoned),
            harness.opts.num_workers,
        );

        let mut tree = harness.build_tree();
        let pool = harness.thread_pool();
        let ctx = harness.ctx();
        let results = decompose_route_partition_tree(&pool, &mut tree, &ctx);

        assert!(results.is_routable);
        assert!(
            harness.decomp_retries[spanning.index()].load(Ordering::Relaxed) >= 1
        );
        let slot = harness.state.route_trees[spanning.index()].lock().unwrap();
        assert!(slot.as_ref().unwrap().all_reached());
    }

    /// Scenario: the connection router keeps exhausting one net's bbox. The
    /// net lands in the retry queue, the controller gives it a full-device
    /// bbox and kills its decomposition budget, and the next tree holds it
    /// at the root.
    #[test]
    fn bbox_exhaustion_escalates_to_full_device_retry() {
        let mut harness = Harness::quadrants(20, 4);
        harness.opts.num_workers = 4;
        let victim = harness.db.net_name_map["q0"];
        harness.routers = WorkerPool::new(
            crate::testing::StubRouter::failing_net(victim),
            harness.opts.num_workers,
        );

        let mut tree = harness.build_tree();
        let pool = harness.thread_pool();
        let results = {
            let ctx = harness.ctx();
            decompose_route_partition_tree(&pool, &mut tree, &ctx)
        };

        // A bbox failure is not "unroutable".
        assert!(results.is_routable);
        assert_eq!(results.retry_nets, vec![victim]);
        assert_eq!(
            harness.decomp_retries[victim.index()].load(Ordering::Relaxed),
            MAX_DECOMP_REROUTE
        );

        // Controller step: grow the bbox to the full device.
        crate::convergence::apply_full_bb_retries(
            &mut harness.state,
            &harness.rr,
            &results.retry_nets,
        );
        assert_eq!(
            harness.state.route_bb[victim.index()],
            Bbox::full_device(20, 20)
        );

        // Next iteration the net sits at the root and is not decomposed.
        let tree = harness.build_tree();
        assert!(tree.root().nets.contains(&victim));
        let ctx = harness.ctx();
        assert!(!should_decompose_net(
            &ctx,
            victim,
            0,
            tree.root().cutline_pos,
            tree.root().cutline_axis,
        ));
    }

    /// An unreachable sink with a full-device bbox marks the iteration
    /// unroutable.
    #[test]
    fn full_device_exhaustion_is_fatal() {
        let mut harness = Harness::quadrants(20, 4);
        let victim = harness.db.net_name_map["q0"];
        harness.routers = WorkerPool::new(
            crate::testing::StubRouter::failing_net(victim),
            harness.opts.num_workers,
        );
        harness.state.route_bb[victim.index()] = Bbox::full_device(20, 20);

        let mut tree = harness.build_tree();
        let pool = harness.thread_pool();
        let ctx = harness.ctx();
        let results = decompose_route_partition_tree(&pool, &mut tree, &ctx);

        assert!(!results.is_routable);
        assert!(results.retry_nets.is_empty());
    }
}
