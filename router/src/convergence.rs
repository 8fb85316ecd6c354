//! Outer Pathfinder convergence loop: assembles an iteration context, hands
//! it to the dispatcher, then adapts congestion penalty, bounding boxes and
//! timing budgets until the routing is legal, hopeless, or out of iterations.

use crate::budgets::{BUDGET_INCREASE_FACTOR, RouteBudgets};
use crate::connection::ConnectionRouter;
use crate::connections::ConnectionTracker;
use crate::dispatch::{IterCtx, decompose_route_partition_tree};
use crate::net_router::set_nets_choking_spots;
use crate::partition::PartitionTree;
use crate::pool::WorkerPool;
use crate::predictor::{
    ABORT_FACTOR_AGGRESSIVE, ABORT_FACTOR_SAFE, RoutingPredictor, should_abort_predicted,
};
use crate::route_tree::RouteTree;
use crate::state::{RoutingState, load_route_bb};
use crate::stats::RouterStats;
use crate::timing::{TimingInfo, init_net_delay_from_lookahead};
use crate::trace::TraceLog;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::NetId;
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::geom::bbox::Bbox;
use fabric_common::util::config::{
    BudgetAlgorithm, FailurePredictor, IncrRerouteDelayRipup, InitialTiming, RouteBbUpdate,
    RouterConfig,
};
use fabric_common::util::profiler::ScopedTimer;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;

/// When conflicts are detected, bounding boxes are scaled by this factor
/// every `BB_SCALE_ITER_COUNT` iterations, clamped to the grid size.
const BB_SCALE_FACTOR: i32 = 2;
const BB_SCALE_ITER_COUNT: usize = 5;

/// With budgets enabled, finish early after this many consecutive iterations
/// without resolvable negative hold slack.
const RCV_FINISH_EARLY_COUNTDOWN: i32 = 15;

/// Iterations after a legal convergence before giving up on finding a better
/// one.
const RECONVERGENCE_PATIENCE: i32 = 5;

/// Cap on the geometric pres-fac growth.
const MAX_PRES_FAC: f32 = 1e25;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CongestionMode {
    Normal,
    Conflicted,
}

/// Quality snapshot of a legal routing, for best-so-far comparisons.
#[derive(Clone, Copy, Debug)]
pub struct RoutingMetrics {
    pub used_wirelength: usize,
    pub critical_path_delay: f32,
    pub setup_wns: f32,
    pub setup_tns: f32,
    pub hold_wns: f32,
    pub hold_tns: f32,
}

/// Dominance order between legal routings: both candidates are legal by
/// construction, so compare wirelength, then critical path.
pub fn is_better_quality_routing(
    best: Option<&RoutingMetrics>,
    used_wirelength: usize,
    timing: Option<&TimingInfo>,
) -> bool {
    let Some(best) = best else {
        return true;
    };
    if used_wirelength != best.used_wirelength {
        return used_wirelength < best.used_wirelength;
    }
    match timing {
        Some(t) => t.critical_path_delay() < best.critical_path_delay,
        None => false,
    }
}

/// Give retried nets the whole device to search in next iteration. They will
/// be held at the tree root, where no sibling task can contend with them.
pub(crate) fn apply_full_bb_retries(state: &mut RoutingState, rr: &RRGraph, retry: &[NetId]) {
    for &net in retry {
        state.route_bb[net.index()] = Bbox::full_device(rr.width(), rr.height());
    }
}

fn is_iteration_complete(
    feasible: bool,
    budgets: &RouteBudgets,
    timing: Option<&TimingInfo>,
    rcv_countdown_done: bool,
) -> bool {
    if !feasible {
        return false;
    }
    if !budgets.if_set() {
        return true;
    }
    let hold_clean = timing.map(|t| t.hold_worst_negative_slack() >= 0.0).unwrap_or(true);
    hold_clean || rcv_countdown_done
}

/// Grow the bbox sides that the net's routing presses against. Returns how
/// many nets were updated.
fn dynamic_update_bounding_boxes(
    rerouted: &[NetId],
    netlist: &NetlistDB,
    rr: &RRGraph,
    state: &mut RoutingState,
    high_fanout_threshold: usize,
) -> usize {
    let mut updated = 0;
    for &net in rerouted {
        if netlist.net_sinks(net) >= high_fanout_threshold {
            continue;
        }
        let slot = state.route_trees[net.index()].lock().unwrap();
        let Some(tree) = slot.as_ref() else {
            continue;
        };
        let mut xmin = i32::MAX;
        let mut xmax = i32::MIN;
        let mut ymin = i32::MAX;
        let mut ymax = i32::MIN;
        for &n in tree.nodes() {
            xmin = xmin.min(rr.node_xlow(n));
            xmax = xmax.max(rr.node_xlow(n));
            ymin = ymin.min(rr.node_ylow(n));
            ymax = ymax.max(rr.node_ylow(n));
        }
        drop(slot);

        let bb = &mut state.route_bb[net.index()];
        let before = *bb;
        if xmin <= bb.xmin {
            bb.xmin = (bb.xmin - 1).max(0);
        }
        if xmax >= bb.xmax {
            bb.xmax = (bb.xmax + 1).min(rr.width() - 1);
        }
        if ymin <= bb.ymin {
            bb.ymin = (bb.ymin - 1).max(0);
        }
        if ymax >= bb.ymax {
            bb.ymax = (bb.ymax + 1).min(rr.height() - 1);
        }
        if *bb != before {
            updated += 1;
        }
    }
    updated
}

/// Dump the current route trees to a text file. Debug artifact only.
pub fn write_route_file(
    path: &str,
    netlist: &NetlistDB,
    rr: &RRGraph,
    state: &RoutingState,
) -> std::io::Result<()> {
    use std::io::Write;
    let mut f = std::fs::File::create(path)?;
    for net in netlist.nets() {
        let slot = state.route_trees[net.index()].lock().unwrap();
        let Some(tree) = slot.as_ref() else {
            continue;
        };
        write!(f, "net {}", netlist.net_name(net))?;
        for &n in tree.nodes() {
            write!(
                f,
                " {},{},{}",
                rr.node_xlow(n),
                rr.node_ylow(n),
                rr.node_track(n)
            )?;
        }
        writeln!(f)?;
    }
    Ok(())
}

/// Run the full negotiated-congestion loop with the given connection-router
/// type. Returns true iff a legal routing was found and restored into
/// `state`.
pub fn try_route_with<R: ConnectionRouter>(
    netlist: &NetlistDB,
    rr: &RRGraph,
    state: &mut RoutingState,
    opts: &RouterConfig,
) -> bool {
    let choking_spots = set_nets_choking_spots(netlist, rr, opts.has_choking_spot);

    let mut predictor = RoutingPredictor::new();
    let abort_iteration_threshold = match opts.routing_failure_predictor {
        FailurePredictor::Off => f32::INFINITY,
        FailurePredictor::Safe => ABORT_FACTOR_SAFE * opts.max_router_iterations as f32,
        FailurePredictor::Aggressive => {
            ABORT_FACTOR_AGGRESSIVE * opts.max_router_iterations as f32
        }
    };
    let congested_iteration_threshold =
        opts.congested_routing_iteration_threshold_frac * opts.max_router_iterations as f32;

    // Ignored signals contribute no delay.
    for net in netlist.nets() {
        if netlist.net_is_ignored(net) {
            state.net_delay[net.index()].lock().unwrap().fill(0.0);
        }
    }

    let mut tracker = ConnectionTracker::new(netlist);
    let mut budgets = RouteBudgets::new(netlist, opts.routing_budgets_algorithm);

    // First iteration criticalities: all-critical for a min-delay routing,
    // lookahead estimates, or constant zero when routing for wirelength only.
    let mut timing_info = opts
        .timing_analysis
        .then(|| TimingInfo::new(netlist, opts.clock_period));
    let mut route_timing = match (&mut timing_info, opts.initial_timing) {
        (Some(_), InitialTiming::AllCritical) => TimingInfo::constant(netlist, 1.0),
        (Some(t), InitialTiming::Lookahead) => {
            init_net_delay_from_lookahead(netlist, rr, &state.net_delay);
            t.update(netlist, &state.net_delay);
            t.clone()
        }
        (None, _) => TimingInfo::constant(netlist, 0.0),
    };

    let mut routers = WorkerPool::new(R::new_for(rr, opts), opts.num_workers);
    let stats_pool = WorkerPool::new(RouterStats::default(), opts.num_workers);
    let nets_to_retry = Mutex::new(Vec::new());
    let decomp_retries: Vec<AtomicUsize> =
        netlist.nets().map(|_| AtomicUsize::new(0)).collect();
    let trace = TraceLog::new(opts.save_partition_tree_trace);

    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.num_workers)
        .build()
        .expect("failed to build router thread pool");

    let available_wirelength = rr.num_nodes();
    let mut bb_fac = opts.bb_factor;
    let mut congestion_mode = CongestionMode::Normal;
    let mut itry_conflicted_mode = 0usize;

    let mut best_routing: Vec<Option<RouteTree>> = vec![None; netlist.num_nets()];
    let mut best_metrics: Option<RoutingMetrics> = None;
    let mut routing_is_successful = false;
    let mut legal_convergence_count = 0usize;
    let mut itry_since_last_convergence: i32 = -1;
    let mut rcv_finished_count = RCV_FINISH_EARLY_COUNTDOWN;
    let mut num_bb_updated = 0usize;
    let mut total_stats = RouterStats::default();

    let mut pres_fac = opts.first_iter_pres_fac;
    let run_timer = ScopedTimer::new("Routing");

    for itry in 1..=opts.max_router_iterations {
        stats_pool.for_each(|s| s.reset());
        state.reset_net_flags();

        if itry_since_last_convergence >= 0 {
            itry_since_last_convergence += 1;
        }

        let worst_negative_slack = if budgets.if_set() {
            timing_info
                .as_ref()
                .map(|t| t.hold_total_negative_slack())
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let results = {
            let ctx = IterCtx::<R> {
                netlist,
                rr,
                state: &*state,
                opts,
                itry,
                pres_fac,
                routers: &routers,
                stats: &stats_pool,
                timing: Some(&route_timing),
                tracker: &tracker,
                budgets: &budgets,
                worst_negative_slack,
                choking_spots: &choking_spots,
                nets_to_retry: &nets_to_retry,
                decomp_retries: &decomp_retries,
                trace: &trace,
            };
            let mut tree =
                PartitionTree::build(netlist, &state.route_bb, rr.width(), rr.height());
            decompose_route_partition_tree(&thread_pool, &mut tree, &ctx)
        };

        if !results.is_routable {
            log::error!("Routing impossible: disconnected routing graph.");
            return false;
        }

        apply_full_bb_retries(state, rr, &results.retry_nets);

        let feasible = state.feasible_routing(rr);
        let acc_fac = if itry == 1 { 0.0 } else { opts.acc_fac };
        let overuse = state.update_acc_cost_and_overuse(rr, acc_fac);
        let used_wirelength = state.used_wirelength();
        let wirelength_utilization = used_wirelength as f32 / available_wirelength as f32;

        predictor.add_iteration_overuse(itry, overuse.overused_nodes);
        let est_success_iteration = predictor.estimate_success_iteration();

        if let Some(t) = timing_info.as_mut() {
            t.update(netlist, &state.net_delay);
            route_timing = t.clone();
        } else {
            // Keep delays at zero so wirelength stays the only objective.
            for net in netlist.nets() {
                state.net_delay[net.index()].lock().unwrap().fill(0.0);
            }
        }

        total_stats.merge(&results.stats);

        log::info!(
            "Iter {:3}: overused {:5} (+{:<5}) pres_fac {:9.1} wirelength {} ({:.1}%) bb_updated {} cpd {:.3} ns est {:.1}",
            itry,
            overuse.overused_nodes,
            overuse.total_overuse,
            pres_fac,
            used_wirelength,
            wirelength_utilization * 100.0,
            num_bb_updated,
            timing_info
                .as_ref()
                .map(|t| t.critical_path_delay() * 1e9)
                .unwrap_or(0.0),
            est_success_iteration,
        );

        if opts.save_routing_per_iteration {
            let filename = format!("iteration_{:03}.route", itry);
            if let Err(e) = write_route_file(&filename, netlist, rr, state) {
                log::warn!("Could not save {}: {}", filename, e);
            }
        }

        // Legal convergence: bank the routing if it beats the best so far,
        // then drop the penalty and try for a better solution.
        if results.retry_nets.is_empty()
            && is_iteration_complete(
                feasible,
                &budgets,
                timing_info.as_ref(),
                rcv_finished_count == 0,
            )
        {
            if is_better_quality_routing(
                best_metrics.as_ref(),
                used_wirelength,
                timing_info.as_ref(),
            ) {
                for net in netlist.nets() {
                    best_routing[net.index()] =
                        state.route_trees[net.index()].lock().unwrap().clone();
                }
                best_metrics = Some(RoutingMetrics {
                    used_wirelength,
                    critical_path_delay: timing_info
                        .as_ref()
                        .map(|t| t.critical_path_delay())
                        .unwrap_or(0.0),
                    setup_wns: timing_info
                        .as_ref()
                        .map(|t| t.setup_worst_negative_slack())
                        .unwrap_or(0.0),
                    setup_tns: timing_info
                        .as_ref()
                        .map(|t| t.setup_total_negative_slack())
                        .unwrap_or(0.0),
                    hold_wns: timing_info
                        .as_ref()
                        .map(|t| t.hold_worst_negative_slack())
                        .unwrap_or(0.0),
                    hold_tns: timing_info
                        .as_ref()
                        .map(|t| t.hold_total_negative_slack())
                        .unwrap_or(0.0),
                });
                routing_is_successful = true;
                log::info!("Legal routing found at iteration {}.", itry);
            }

            // Restart with the first-iteration penalty so critical
            // connections can take more direct routes.
            pres_fac = opts.first_iter_pres_fac;
            tracker.set_connection_criticality_tolerance(0.7);
            tracker.set_connection_delay_tolerance(1.01);
            legal_convergence_count += 1;
            itry_since_last_convergence = 0;
        }

        if itry_since_last_convergence == 1 {
            // The post-convergence restart used first_iter_pres_fac (often
            // zero); switch to a value that grows when multiplied.
            pres_fac = opts.initial_pres_fac;
        }

        if legal_convergence_count >= opts.max_convergence_count
            || results.stats.connections_routed == 0
            || (routing_is_successful && itry_since_last_convergence > RECONVERGENCE_PATIENCE)
        {
            break;
        }

        if itry == 1 && wirelength_utilization > opts.init_wirelength_abort_threshold {
            log::warn!(
                "Wirelength usage is already {:.1}% after the first iteration; aborting.",
                wirelength_utilization * 100.0
            );
            break;
        }

        if opts.routing_budgets_algorithm != BudgetAlgorithm::Yoyo
            && should_abort_predicted(
                est_success_iteration,
                abort_iteration_threshold,
                overuse.overused_nodes,
            )
        {
            log::warn!(
                "Routing aborted: predicted success iteration {:.1} is too high.",
                est_success_iteration
            );
            break;
        }

        if itry == 1 && opts.exit_after_first_routing_iteration {
            log::info!("Exiting after first routing iteration as requested.");
            break;
        }

        // Prepare the next iteration.
        if opts.route_bb_update == RouteBbUpdate::Dynamic {
            num_bb_updated = dynamic_update_bounding_boxes(
                &results.rerouted_nets,
                netlist,
                rr,
                state,
                opts.high_fanout_threshold,
            );
        }

        if itry as f32 >= congested_iteration_threshold {
            congestion_mode = CongestionMode::Conflicted;
        }

        if itry == 1 {
            pres_fac = opts.initial_pres_fac;
        } else {
            pres_fac = (pres_fac * opts.pres_fac_mult).min(MAX_PRES_FAC);

            if budgets.if_set() && itry > 5 && worst_negative_slack != 0.0 {
                let rcv_finished = budgets.increase_min_budgets_if_struggling(
                    BUDGET_INCREASE_FACTOR,
                    timing_info.as_ref().expect("budgets imply timing"),
                    worst_negative_slack,
                    netlist,
                );
                if rcv_finished {
                    rcv_finished_count -= 1;
                } else {
                    rcv_finished_count = RCV_FINISH_EARLY_COUNTDOWN;
                }
            }
        }

        if congestion_mode == CongestionMode::Conflicted {
            if itry_conflicted_mode % BB_SCALE_ITER_COUNT == 0 {
                // Scale slowly: the router gets BB_SCALE_ITER_COUNT
                // iterations to negotiate at each bbox size.
                let max_grid_dim = rr.width().max(rr.height());
                bb_fac = (bb_fac * BB_SCALE_FACTOR).min(max_grid_dim);
                state.route_bb = load_route_bb(netlist, rr, bb_fac);
            }
            itry_conflicted_mode += 1;
        }

        if let Some(t) = timing_info.as_ref() {
            if itry == 1 {
                // The first iteration is routed uncongested; its delays are
                // the lower bounds everything later is measured against.
                tracker.set_stable_critical_path_delay(t.critical_path_delay());
                tracker.set_lower_bound_connection_delays(netlist, &state.net_delay);
                budgets.load(netlist, &state.net_delay);
                if budgets.if_set() {
                    routers.update_all(|r| r.set_rcv_enabled(true));
                }
            } else {
                let should_ripup_for_delay = opts.incr_reroute_delay_ripup
                    == IncrRerouteDelayRipup::On
                    || (opts.incr_reroute_delay_ripup == IncrRerouteDelayRipup::Auto
                        && congestion_mode == CongestionMode::Normal);

                let mut stable = true;
                if should_ripup_for_delay
                    && tracker.critical_path_delay_grew_significantly(t.critical_path_delay())
                {
                    stable = tracker.forcibly_reroute_connections(
                        opts.max_criticality,
                        t,
                        netlist,
                        &state.net_delay,
                    );
                }
                if stable {
                    tracker.set_stable_critical_path_delay(t.critical_path_delay());
                }
            }
        }
    }

    if routing_is_successful {
        log::info!("Restoring best routing.");
        for net in netlist.nets() {
            let mut slot = state.route_trees[net.index()].lock().unwrap();
            if let Some(current) = slot.as_ref() {
                state.apply_tree_cost(current, false);
            }
            if let Some(best) = &best_routing[net.index()] {
                state.apply_tree_cost(best, true);
            }
            *slot = best_routing[net.index()].take();
        }
        if let Some(metrics) = &best_metrics {
            log::info!(
                "Critical path: {:.3} ns, wirelength: {}",
                metrics.critical_path_delay * 1e9,
                metrics.used_wirelength
            );
        }
    } else {
        log::error!("Routing failed.");
    }

    log::info!(
        "Router stats: nets_routed {} connections_routed {} heap_pushes {} heap_pops {}",
        total_stats.nets_routed,
        total_stats.connections_routed,
        total_stats.heap_pushes,
        total_stats.heap_pops
    );

    if trace.enabled() {
        if let Err(e) = trace.write("partition_tree.log") {
            log::warn!("Could not write partition tree trace: {}", e);
        }
    }

    drop(run_timer);
    routing_is_successful
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TimingDrivenRouter;
    use crate::heap::{BinaryHeap, BucketHeap};

    fn small_design() -> (RRGraph, NetlistDB) {
        let rr = RRGraph::uniform(12, 12, 2);
        let mut db = NetlistDB::new();
        let nets: &[(i32, i32, &[(i32, i32)])] = &[
            (1, 1, &[(4, 4), (1, 5)]),
            (8, 2, &[(10, 4), (7, 1)]),
            (2, 9, &[(5, 10), (1, 7)]),
            (9, 9, &[(6, 7), (10, 10), (7, 10)]),
            (3, 3, &[(9, 8)]),
        ];
        for (i, (sx, sy, sinks)) in nets.iter().enumerate() {
            let mut terminals = vec![rr.node_at(*sx, *sy, 0)];
            for (k, (x, y)) in sinks.iter().enumerate() {
                terminals.push(rr.node_at(*x, *y, (k + 1) % 2));
            }
            db.add_net(format!("n{}", i), terminals);
        }
        (rr, db)
    }

    #[test]
    fn best_so_far_never_regresses() {
        let metrics = RoutingMetrics {
            used_wirelength: 100,
            critical_path_delay: 2e-9,
            setup_wns: 0.0,
            setup_tns: 0.0,
            hold_wns: 0.0,
            hold_tns: 0.0,
        };
        // No best yet: anything legal wins.
        assert!(is_better_quality_routing(None, 500, None));
        // Shorter wirelength wins.
        assert!(is_better_quality_routing(Some(&metrics), 90, None));
        assert!(!is_better_quality_routing(Some(&metrics), 110, None));
        // Equal wirelength without timing is not an improvement.
        assert!(!is_better_quality_routing(Some(&metrics), 100, None));
    }

    #[test]
    fn routes_a_small_design_with_binary_heap() {
        let (rr, db) = small_design();
        let mut state = RoutingState::new(&db, &rr, 3);
        let mut opts = RouterConfig::default();
        opts.num_workers = 2;
        opts.max_router_iterations = 30;

        let ok = try_route_with::<TimingDrivenRouter<BinaryHeap>>(&db, &rr, &mut state, &opts);
        assert!(ok);
        assert!(state.feasible_routing(&rr));
        for net in db.nets() {
            let slot = state.route_trees[net.index()].lock().unwrap();
            assert!(slot.as_ref().unwrap().all_reached());
        }
        assert!(crate::check::run(&db, &rr, &state).is_ok());
    }

    #[test]
    fn routes_a_small_design_with_bucket_heap() {
        let (rr, db) = small_design();
        let mut state = RoutingState::new(&db, &rr, 3);
        let mut opts = RouterConfig::default();
        opts.num_workers = 2;
        opts.max_router_iterations = 30;
        opts.timing_analysis = false;

        let ok = try_route_with::<TimingDrivenRouter<BucketHeap>>(&db, &rr, &mut state, &opts);
        assert!(ok);
        assert!(state.feasible_routing(&rr));
    }

    #[test]
    fn hopeless_first_iteration_aborts() {
        // A 2x2 single-track grid cannot hold two crossing nets without
        // blowing past the wirelength abort threshold.
        let rr = RRGraph::uniform(2, 2, 1);
        let mut db = NetlistDB::new();
        db.add_net(
            "a".to_string(),
            vec![rr.node_at(0, 0, 0), rr.node_at(1, 1, 0)],
        );
        db.add_net(
            "b".to_string(),
            vec![rr.node_at(0, 1, 0), rr.node_at(1, 0, 0)],
        );
        let mut state = RoutingState::new(&db, &rr, 1);
        let mut opts = RouterConfig::default();
        opts.num_workers = 1;
        opts.max_router_iterations = 40;

        let ok = try_route_with::<TimingDrivenRouter<BinaryHeap>>(&db, &rr, &mut state, &opts);
        assert!(!ok);
    }
}
