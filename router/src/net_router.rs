//! Net-level routing on top of the single-connection router: rip-up policy,
//! criticality ordering, delay updates, and the retry flags the dispatcher
//! reduces over the partition tree.

use crate::connection::{ConnectionRouter, CostParams, DelayBudget, SinkOutcome};
use crate::dispatch::IterCtx;
use crate::route_tree::RouteTree;
use crate::stats::RouterStats;
use crate::timing::pin_criticality;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::{NetId, RRNodeId};
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::geom::bbox::Bbox;
use std::collections::HashMap;

/// Per-net routing outcome, reduced up the partition tree.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetResultFlags {
    pub success: bool,
    pub retry_with_full_bb: bool,
    pub was_rerouted: bool,
}

/// Does the net's current routing need to be redone?
pub(crate) fn should_route_net<R: ConnectionRouter>(ctx: &IterCtx<'_, R>, net: NetId) -> bool {
    let slot = ctx.state.route_trees[net.index()].lock().unwrap();
    match slot.as_ref() {
        None => true,
        Some(tree) => {
            !tree.all_reached()
                || ctx.tracker.is_forced_reroute(net)
                || tree
                    .nodes()
                    .iter()
                    .any(|&n| ctx.state.is_node_overused(ctx.rr, n))
        }
    }
}

/// `should_route_net` plus the gates that apply regardless of congestion:
/// pre-routed and ignored nets are skipped, hold-repair reroutes are forced.
pub(crate) fn should_really_route_net<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    net: NetId,
) -> bool {
    if ctx.state.is_fixed(net) || ctx.netlist.net_is_ignored(net) {
        return false;
    }
    let reroute_for_hold = ctx.budgets.if_set()
        && ctx.budgets.get_should_reroute(net)
        && ctx.worst_negative_slack != 0.0;
    reroute_for_hold || should_route_net(ctx, net)
}

/// Make the net's route tree consistent before routing: rip it up entirely,
/// or keep it for incremental rerouting when it is legal and the net is big
/// enough to benefit.
pub(crate) fn setup_routing_resources<R: ConnectionRouter>(ctx: &IterCtx<'_, R>, net: NetId) {
    let mut slot = ctx.state.route_trees[net.index()].lock().unwrap();
    let fanout = ctx.netlist.net_sinks(net);

    let rip = match slot.as_ref() {
        None => false,
        Some(tree) => {
            fanout < ctx.opts.min_incremental_reroute_fanout
                || ctx.tracker.is_forced_reroute(net)
                || (ctx.budgets.if_set() && ctx.budgets.get_should_reroute(net))
                || tree
                    .nodes()
                    .iter()
                    .any(|&n| ctx.state.is_node_overused(ctx.rr, n))
        }
    };

    if rip {
        if let Some(tree) = slot.take() {
            ctx.state.apply_tree_cost(&tree, false);
        }
        ctx.tracker.clear_forced_reroute(net);
    }

    if slot.is_none() {
        let tree = RouteTree::new(net, ctx.netlist.net_source(net), fanout);
        ctx.state.apply_tree_cost(&tree, true);
        *slot = Some(tree);
    }
}

/// Criticalities for the given sinks, most critical first.
pub(crate) fn sorted_by_criticality<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    net: NetId,
    mut isinks: Vec<usize>,
) -> (Vec<usize>, Vec<f32>) {
    let num_sinks = ctx.netlist.net_sinks(net);
    let mut crit = vec![0.0f32; num_sinks + 1];
    for &isink in &isinks {
        crit[isink] = pin_criticality(
            ctx.timing,
            ctx.opts.max_criticality,
            ctx.opts.criticality_exp,
            net,
            isink,
        );
    }
    isinks.sort_unstable_by(|&a, &b| crit[b].total_cmp(&crit[a]).then(a.cmp(&b)));
    (isinks, crit)
}

pub(crate) fn delay_budget_for<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    net: NetId,
    isink: usize,
) -> Option<DelayBudget> {
    if !ctx.budgets.if_set() {
        return None;
    }
    Some(DelayBudget {
        min_delay: ctx.budgets.min_delay_budget(net, isink),
        max_delay: ctx.budgets.max_delay_budget(net, isink),
        target_delay: ctx.budgets.target_delay(net, isink),
        short_path_criticality: ctx.budgets.short_path_criticality(),
    })
}

pub(crate) fn choke_map_for<'a, R: ConnectionRouter>(
    ctx: &'a IterCtx<'_, R>,
    net: NetId,
) -> Option<&'a HashMap<RRNodeId, usize>> {
    if !ctx.opts.has_choking_spot {
        return None;
    }
    let map = &ctx.choking_spots[net.index()];
    (!map.is_empty()).then_some(map)
}

/// Route every remaining sink of `net` inside its current bounding box.
///
/// The caller has already decided the net needs routing; this always counts
/// as a reroute. An exhausted search inside a clipped box asks for a
/// full-device retry; exhausting the full device means the net is physically
/// unroutable.
pub(crate) fn route_net<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    router: &mut R,
    stats: &mut RouterStats,
    net: NetId,
) -> NetResultFlags {
    setup_routing_resources(ctx, net);

    let bb = ctx.state.route_bb[net.index()];
    let full_bb = Bbox::full_device(ctx.rr.width(), ctx.rr.height());

    let mut slot = ctx.state.route_trees[net.index()].lock().unwrap();
    let tree = slot.as_mut().expect("setup_routing_resources placed a tree");

    let remaining: Vec<usize> = tree.remaining_isinks().collect();
    let (ordered, crit) = sorted_by_criticality(ctx, net, remaining);

    let mut flags = NetResultFlags {
        was_rerouted: true,
        ..Default::default()
    };

    for isink in ordered {
        let sink = ctx.netlist.net_sink_rr(net, isink);
        let cost = CostParams {
            criticality: crit[isink],
            astar_fac: ctx.opts.astar_fac,
            bend_cost: ctx.opts.bend_cost,
            pres_fac: ctx.pres_fac,
            delay_budget: delay_budget_for(ctx, net, isink),
        };

        match router.route_sink(
            ctx.rr,
            ctx.state,
            tree,
            sink,
            &cost,
            &bb,
            choke_map_for(ctx, net),
            stats,
        ) {
            SinkOutcome::Routed(path) => {
                let first_new = tree.add_branch(&path, isink);
                for &n in &tree.nodes()[first_new..] {
                    ctx.state.add_occupancy(n);
                }
                stats.connections_routed += 1;
                update_net_delay_from_isink(ctx.netlist, ctx.state, tree, net, isink);
            }
            SinkOutcome::Exhausted => {
                if bb == full_bb {
                    log::warn!(
                        "Routing failed for net {}: sink {} unreachable",
                        ctx.netlist.net_name(net),
                        isink
                    );
                } else {
                    flags.retry_with_full_bb = true;
                }
                return flags;
            }
        }
    }

    stats.nets_routed += 1;
    flags.success = true;
    flags
}

/// Copy a just-routed sink's delay out of the route tree.
pub(crate) fn update_net_delay_from_isink(
    netlist: &NetlistDB,
    state: &crate::state::RoutingState,
    tree: &RouteTree,
    net: NetId,
    isink: usize,
) {
    let sink = netlist.net_sink_rr(net, isink);
    if let Some(delay) = tree.node_delay(sink) {
        state.net_delay[net.index()].lock().unwrap()[isink] = delay;
    }
}

/// Per-net choke hints: RR nodes shared by multiple terminals of the same
/// net. The connection router prices these up so early connections do not
/// wall off later ones.
pub fn set_nets_choking_spots(
    netlist: &NetlistDB,
    rr: &RRGraph,
    enabled: bool,
) -> Vec<HashMap<RRNodeId, usize>> {
    netlist
        .nets()
        .map(|net| {
            let mut map = HashMap::new();
            if enabled {
                let terminals = netlist.net_rr_terminals(net);
                let mut tile_count: HashMap<(i32, i32), usize> = HashMap::new();
                for &t in terminals {
                    *tile_count
                        .entry((rr.node_xlow(t), rr.node_ylow(t)))
                        .or_insert(0) += 1;
                }
                for &t in terminals {
                    let count = tile_count[&(rr.node_xlow(t), rr.node_ylow(t))];
                    if count > 1 {
                        map.insert(t, count);
                    }
                }
            }
            map
        })
        .collect()
}
