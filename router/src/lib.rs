pub mod budgets;
pub mod check;
pub mod connection;
pub mod connections;
pub mod convergence;
pub mod decompose;
pub mod dispatch;
pub mod heap;
pub mod net_router;
pub mod partition;
pub mod pool;
pub mod predictor;
pub mod route_tree;
pub mod state;
pub mod stats;
pub mod timing;
pub mod trace;
pub mod virtual_net;

#[cfg(test)]
pub(crate) mod testing;

use crate::connection::TimingDrivenRouter;
use crate::heap::{BinaryHeap, BucketHeap};
use crate::state::RoutingState;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::util::config::{HeapKind, RouterConfig};

/// Route the netlist with the parallel negotiated-congestion router.
///
/// The heap strategy is a runtime option but fixed for the whole run; the
/// convergence loop is monomorphized per heap type, since the connection
/// router is too hot for dynamic dispatch. Returns `Ok(true)` iff a legal
/// routing was found and left in `state`.
pub fn try_parallel_route(
    netlist: &NetlistDB,
    rr: &RRGraph,
    state: &mut RoutingState,
    opts: &RouterConfig,
) -> Result<bool, String> {
    opts.validate()?;

    let ok = match opts.router_heap {
        HeapKind::BinaryHeap => convergence::try_route_with::<TimingDrivenRouter<BinaryHeap>>(
            netlist, rr, state, opts,
        ),
        HeapKind::BucketHeapApproximation => convergence::try_route_with::<
            TimingDrivenRouter<BucketHeap>,
        >(netlist, rr, state, opts),
    };
    Ok(ok)
}
