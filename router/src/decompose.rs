//! Net decomposition: turn one net straddling a cutline into two virtual
//! nets by first routing a spatially representative "skeleton" of its sinks,
//! so both sides of the tree can continue from the shared route tree.

use crate::connection::{ConnectionRouter, CostParams, SinkOutcome};
use crate::dispatch::IterCtx;
use crate::net_router::{
    NetResultFlags, choke_map_for, delay_budget_for, setup_routing_resources,
    should_really_route_net, sorted_by_criticality, update_net_delay_from_isink,
};
use crate::route_tree::RouteTree;
use crate::virtual_net::VirtualNet;
use fabric_common::db::indices::NetId;
use fabric_common::geom::bbox::{Axis, Bbox, Side, side_of};

/// Minimum bin side when spatially sampling decomposition sinks. Smaller
/// bins mean the main thread routes more of the skeleton itself: less
/// speedup, better quality.
pub const MIN_DECOMP_BIN_WIDTH: i32 = 5;

/// Nets rerouted through decomposition more than this many times stop being
/// decomposed and route serially, as a routability safeguard.
pub const MAX_DECOMP_REROUTE: usize = 5;

/// Sampling-bin geometry for a net bbox, shared by the eligibility test and
/// the sink selection.
struct DecompBins {
    bins_x: i32,
    bins_y: i32,
    bin_w: i32,
    bin_h: i32,
}

impl DecompBins {
    fn for_bbox(bb: &Bbox) -> Option<DecompBins> {
        let w = bb.width();
        let h = bb.height();
        let bins_x = w / MIN_DECOMP_BIN_WIDTH;
        let bins_y = h / MIN_DECOMP_BIN_WIDTH;
        if bins_x == 0 || bins_y == 0 {
            return None;
        }
        Some(DecompBins {
            bins_x,
            bins_y,
            bin_w: w / bins_x + 1,
            bin_h: h / bins_y + 1,
        })
    }

    fn bin_of(&self, bb: &Bbox, x: i32, y: i32) -> usize {
        let bx = (x - bb.xmin) / self.bin_w;
        let by = (y - bb.ymin) / self.bin_h;
        (bx * self.bins_y + by) as usize
    }
}

/// Would decomposing this net at this cutline yield any parallelism?
pub fn is_worth_decomposing(bb: &Bbox, cutline_pos: i32, axis: Axis, num_sinks: usize) -> bool {
    let Some(bins) = DecompBins::for_bbox(bb) else {
        return false;
    };
    // A thin strip smaller than its own sampling bin cannot be sampled.
    if bb.width() < bins.bin_w || bb.height() < bins.bin_h {
        return false;
    }

    // The cutline must leave at least one full bin on each side.
    let (far, near, bin) = match axis {
        Axis::X => (bb.xmax - cutline_pos, cutline_pos - bb.xmin + 1, bins.bin_w),
        Axis::Y => (bb.ymax - cutline_pos, cutline_pos - bb.ymin + 1, bins.bin_h),
    };
    if far < bin || near < bin {
        return false;
    }

    // Enough sinks to fill the perimeter bins, plus one extra per side.
    let n_samples = (2 * (bins.bins_x + bins.bins_y) - 4).max(4) as usize;
    num_sinks > n_samples + 2
}

/// Decomposition policy for a net held at tree `level`.
pub fn should_decompose_net<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    net: NetId,
    level: usize,
    cutline_pos: i32,
    axis: Axis,
) -> bool {
    // Deep enough that every worker already has a subtree to chew on.
    let worker_levels = (ctx.opts.num_workers as f64).log2().ceil() as usize;
    if level + 1 > worker_levels {
        return false;
    }
    // Two-stage clock nets are routed by their own machinery.
    if ctx.netlist.net_is_global(net) && ctx.opts.two_stage_clock_routing {
        return false;
    }
    if ctx.decomp_retries[net.index()].load(std::sync::atomic::Ordering::Relaxed)
        >= MAX_DECOMP_REROUTE
    {
        return false;
    }
    is_worth_decomposing(
        &ctx.state.route_bb[net.index()],
        cutline_pos,
        axis,
        ctx.netlist.net_sinks(net),
    )
}

/// Which side of the cutline is the RR node on?
fn which_side<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    node: fabric_common::db::indices::RRNodeId,
    cutline_pos: i32,
    axis: Axis,
) -> Side {
    side_of(
        ctx.rr.node_xlow(node),
        ctx.rr.node_ylow(node),
        axis,
        cutline_pos,
    )
}

/// Does the tree already reach a sink on the far side of the cutline?
fn routing_crosses_cutline<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    tree: &RouteTree,
    net: NetId,
    cutline_pos: i32,
    axis: Axis,
) -> bool {
    let source_side = which_side(ctx, tree.root(), cutline_pos, axis);
    tree.reached_isinks().any(|isink| {
        which_side(ctx, ctx.netlist.net_sink_rr(net, isink), cutline_pos, axis) != source_side
    })
}

/// Pick the skeleton sinks by spatial binning: one sink per bin, most
/// critical first, skipping bins the existing routing already reaches.
/// `remaining` must be sorted by descending criticality.
pub(crate) fn decomposition_isinks<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    tree: &RouteTree,
    net: NetId,
    remaining: &[usize],
) -> Vec<usize> {
    let bb = &ctx.state.route_bb[net.index()];
    let bins = DecompBins::for_bbox(bb).expect("checked by is_worth_decomposing");

    const NONE: i32 = 0;
    const REACHED: i32 = -1;
    let mut samples = vec![NONE; (bins.bins_x * bins.bins_y) as usize];
    let mut to_find = samples.len();
    let mut out = Vec::new();

    for isink in tree.reached_isinks() {
        if to_find == 0 {
            return out;
        }
        let sink = ctx.netlist.net_sink_rr(net, isink);
        let bin = bins.bin_of(bb, ctx.rr.node_xlow(sink), ctx.rr.node_ylow(sink));
        if samples[bin] != REACHED {
            samples[bin] = REACHED;
            to_find -= 1;
        }
    }

    for &isink in remaining {
        if to_find == 0 {
            return out;
        }
        let sink = ctx.netlist.net_sink_rr(net, isink);
        let bin = bins.bin_of(bb, ctx.rr.node_xlow(sink), ctx.rr.node_ylow(sink));
        if samples[bin] == NONE {
            samples[bin] = isink as i32;
            out.push(isink);
            to_find -= 1;
        }
    }

    out
}

/// Split the net's bbox into the source half and the sink half, ordered so
/// the left/up half comes first (matching the tree's child order).
fn make_decomposed_pair<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    tree: &RouteTree,
    net: NetId,
    cutline_pos: i32,
    axis: Axis,
) -> (VirtualNet, VirtualNet) {
    let bb = ctx.state.route_bb[net.index()];
    let source_side = which_side(ctx, tree.root(), cutline_pos, axis);
    let source_half = VirtualNet {
        net,
        clipped_bb: bb.clip_to_side(axis, cutline_pos, source_side),
    };
    let sink_half = VirtualNet {
        net,
        clipped_bb: bb.clip_to_side(axis, cutline_pos, source_side.opposite()),
    };
    if source_side == Side::Right {
        (sink_half, source_half)
    } else {
        (source_half, sink_half)
    }
}

/// Route a skeleton of the net and split it across the cutline.
///
/// Returns the left and right halves on success, or `None` when the net is
/// better handled directly at the current node: nothing to route, a skeleton
/// connection failed, or the skeleton ended up one-sided. Any attempt that
/// did skeleton work bumps the decomposition-retry counter so repeat
/// offenders fall back to serial routing.
pub fn route_and_decompose<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    net: NetId,
    cutline_pos: i32,
    axis: Axis,
) -> Option<(VirtualNet, VirtualNet)> {
    if !should_really_route_net(ctx, net) {
        return None;
    }

    setup_routing_resources(ctx, net);

    let bb = ctx.state.route_bb[net.index()];
    let mut slot = ctx.state.route_trees[net.index()].lock().unwrap();
    let tree = slot.as_mut().expect("setup_routing_resources placed a tree");

    let bump_retries = || {
        ctx.decomp_retries[net.index()].fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    };

    if !routing_crosses_cutline(ctx, tree, net, cutline_pos, axis) {
        let remaining: Vec<usize> = tree.remaining_isinks().collect();
        let (ordered, crit) = sorted_by_criticality(ctx, net, remaining);
        let skeleton = decomposition_isinks(ctx, tree, net, &ordered);

        for isink in skeleton {
            let sink = ctx.netlist.net_sink_rr(net, isink);
            let cost = CostParams {
                criticality: crit[isink],
                astar_fac: ctx.opts.astar_fac,
                bend_cost: ctx.opts.bend_cost,
                pres_fac: ctx.pres_fac,
                delay_budget: delay_budget_for(ctx, net, isink),
            };

            let outcome = ctx.routers.with(|router| {
                ctx.stats.with(|stats| {
                    router.route_sink(
                        ctx.rr,
                        ctx.state,
                        tree,
                        sink,
                        &cost,
                        &bb,
                        choke_map_for(ctx, net),
                        stats,
                    )
                })
            });

            match outcome {
                SinkOutcome::Routed(path) => {
                    let first_new = tree.add_branch(&path, isink);
                    for &n in &tree.nodes()[first_new..] {
                        ctx.state.add_occupancy(n);
                    }
                    ctx.stats.with(|s| s.connections_routed += 1);
                    update_net_delay_from_isink(ctx.netlist, ctx.state, tree, net, isink);
                }
                SinkOutcome::Exhausted => {
                    // Backtracking from a half-built skeleton is not worth
                    // it; the partial tree stays and the net routes here.
                    bump_retries();
                    return None;
                }
            }
        }

        if !routing_crosses_cutline(ctx, tree, net, cutline_pos, axis) {
            bump_retries();
            return None;
        }
    }

    bump_retries();
    Some(make_decomposed_pair(ctx, tree, net, cutline_pos, axis))
}

/// Route the sinks of a virtual net inside its clipped bbox, reusing the
/// shared route tree.
pub fn route_virtual_net<R: ConnectionRouter>(
    ctx: &IterCtx<'_, R>,
    vnet: &VirtualNet,
) -> NetResultFlags {
    let net = vnet.net;
    let mut flags = NetResultFlags::default();

    let mut slot = ctx.state.route_trees[net.index()].lock().unwrap();
    let tree = slot.as_mut().expect("virtual nets come from a routed skeleton");

    // A cutline hugging the source side can leave no routing resources on
    // this half; there is nothing to seed the search with.
    if !tree.nodes().iter().any(|&n| ctx.rr.inside_bb(n, &vnet.clipped_bb)) {
        return flags;
    }

    let remaining = vnet.remaining_isinks(ctx.netlist, ctx.rr, tree);
    let (ordered, crit) = sorted_by_criticality(ctx, net, remaining);

    if ctx.budgets.if_set() {
        // Both halves write the same value, so the race is benign.
        ctx.budgets.set_should_reroute(net, false);
    }

    for isink in ordered {
        let sink = ctx.netlist.net_sink_rr(net, isink);
        let cost = CostParams {
            criticality: crit[isink],
            astar_fac: ctx.opts.astar_fac,
            bend_cost: ctx.opts.bend_cost,
            pres_fac: ctx.pres_fac,
            delay_budget: delay_budget_for(ctx, net, isink),
        };

        let outcome = ctx.routers.with(|router| {
            ctx.stats.with(|stats| {
                router.route_sink(
                    ctx.rr,
                    ctx.state,
                    tree,
                    sink,
                    &cost,
                    &vnet.clipped_bb,
                    choke_map_for(ctx, net),
                    stats,
                )
            })
        });

        match outcome {
            SinkOutcome::Routed(path) => {
                let first_new = tree.add_branch(&path, isink);
                for &n in &tree.nodes()[first_new..] {
                    ctx.state.add_occupancy(n);
                }
                ctx.stats.with(|s| s.connections_routed += 1);
                update_net_delay_from_isink(ctx.netlist, ctx.state, tree, net, isink);
            }
            SinkOutcome::Exhausted => {
                flags.retry_with_full_bb = true;
                return flags;
            }
        }
    }

    ctx.stats.with(|s| s.nets_routed += 1);
    flags.success = true;
    flags
}
