//! Post-routing legality verification: every net is a connected tree of real
//! RR edges rooted at its source, reaches all sinks, stays inside its bbox,
//! and no RR node is over capacity.

use crate::state::RoutingState;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::RRNodeId;
use fabric_common::db::rr_graph::RRGraph;

pub fn run(netlist: &NetlistDB, rr: &RRGraph, state: &RoutingState) -> Result<(), String> {
    log::info!("Starting routing verification...");

    for net in netlist.nets() {
        if netlist.net_is_ignored(net) || netlist.net_sinks(net) == 0 {
            continue;
        }
        let name = netlist.net_name(net);
        let slot = state.route_trees[net.index()].lock().unwrap();
        let Some(tree) = slot.as_ref() else {
            return fail(format!("net '{}' is unrouted", name));
        };

        if tree.root() != netlist.net_source(net) {
            return fail(format!("net '{}' is not rooted at its source", name));
        }
        if !tree.all_reached() {
            let missing: Vec<usize> = tree.remaining_isinks().collect();
            return fail(format!("net '{}' misses sinks {:?}", name, missing));
        }
        for isink in 1..=netlist.net_sinks(net) {
            if !tree.contains(netlist.net_sink_rr(net, isink)) {
                return fail(format!(
                    "net '{}' claims sink {} without owning its RR node",
                    name, isink
                ));
            }
        }

        let bb = &state.route_bb[net.index()];
        for &n in tree.nodes() {
            if !rr.inside_bb(n, bb) {
                return fail(format!(
                    "net '{}' uses node ({}, {}) outside its bbox",
                    name,
                    rr.node_xlow(n),
                    rr.node_ylow(n)
                ));
            }
        }

        for (parent, child) in tree.parent_edges() {
            if !rr.edges(parent).contains(&child) {
                return fail(format!(
                    "net '{}' contains a non-existent edge ({:?} -> {:?})",
                    name, parent, child
                ));
            }
        }
    }

    let overused: Vec<RRNodeId> = (0..rr.num_nodes())
        .map(RRNodeId::new)
        .filter(|&n| state.is_node_overused(rr, n))
        .collect();
    if !overused.is_empty() {
        return fail(format!("{} RR nodes over capacity", overused.len()));
    }

    log::info!("\x1b[32mPASS\x1b[0m: routing is legal.");
    Ok(())
}

fn fail(msg: String) -> Result<(), String> {
    log::error!("\x1b[31mFAIL\x1b[0m: {}", msg);
    Err(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_tree::RouteTree;

    #[test]
    fn detects_unrouted_and_overused() {
        let rr = RRGraph::uniform(4, 4, 1);
        let mut db = NetlistDB::new();
        let net = db.add_net(
            "a".to_string(),
            vec![rr.node_at(0, 0, 0), rr.node_at(2, 0, 0)],
        );
        let state = RoutingState::new(&db, &rr, 4);

        assert!(run(&db, &rr, &state).is_err());

        let mut tree = RouteTree::new(net, rr.node_at(0, 0, 0), 1);
        tree.add_branch(
            &[rr.node_at(0, 0, 0), rr.node_at(1, 0, 0), rr.node_at(2, 0, 0)],
            1,
        );
        state.apply_tree_cost(&tree, true);
        *state.route_trees[net.index()].lock().unwrap() = Some(tree);
        assert!(run(&db, &rr, &state).is_ok());

        // A stray extra occupant trips the capacity check.
        state.add_occupancy(rr.node_at(1, 0, 0));
        assert!(run(&db, &rr, &state).is_err());
    }
}
