use crate::route_tree::RouteTree;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::NetId;
use fabric_common::db::rr_graph::RRGraph;
use fabric_common::geom::bbox::Bbox;

/// One side of a decomposed net: the net's identity plus a bbox clipped to
/// one side of the cutline. The clipped bbox spatially filters which sinks
/// this half is responsible for; the route tree stays shared through the
/// routing state. Never outlives the iteration that created it.
#[derive(Clone, Copy, Debug)]
pub struct VirtualNet {
    pub net: NetId,
    pub clipped_bb: Bbox,
}

impl VirtualNet {
    /// All sink indices whose RR node falls inside the clipped bbox.
    pub fn isinks(&self, netlist: &NetlistDB, rr: &RRGraph) -> Vec<usize> {
        netlist.net_rr_terminals(self.net)[1..]
            .iter()
            .enumerate()
            .filter(|(_, &sink)| rr.inside_bb(sink, &self.clipped_bb))
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// The subset of `isinks` not yet reached by the shared route tree.
    pub fn remaining_isinks(
        &self,
        netlist: &NetlistDB,
        rr: &RRGraph,
        tree: &RouteTree,
    ) -> Vec<usize> {
        self.isinks(netlist, rr)
            .into_iter()
            .filter(|&isink| !tree.is_reached(isink))
            .collect()
    }
}
