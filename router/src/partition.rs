//! Spatial partition tree for routing.
//!
//! Divides the netlist into a tree of regions so that nets with disjoint
//! bounding boxes can be routed in parallel. Branch nodes carry a cutline and
//! hold only the nets the cutline intersects; leaf nodes hold the nets of a
//! final region. Rebuilt from scratch every iteration, since bounding boxes
//! grow between iterations.

use crate::virtual_net::VirtualNet;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::NetId;
use fabric_common::geom::bbox::{Axis, Bbox};

pub struct PartitionTreeNode {
    /// Nets claimed by this node: intersected by the cutline if a branch,
    /// the final region's nets if a leaf.
    pub nets: Vec<NetId>,
    /// Decomposed halves inherited from the parent's cutline, routed at this
    /// node before the children are spawned.
    pub virtual_nets: Vec<VirtualNet>,
    pub left: Option<Box<PartitionTreeNode>>,
    pub right: Option<Box<PartitionTreeNode>>,
    pub cutline_axis: Axis,
    pub cutline_pos: i32,
    /// Iteration results written by the task routing this node.
    pub is_routable: bool,
    pub rerouted_nets: Vec<NetId>,
}

impl PartitionTreeNode {
    fn leaf(nets: Vec<NetId>) -> Self {
        Self {
            nets,
            virtual_nets: Vec::new(),
            left: None,
            right: None,
            cutline_axis: Axis::X,
            cutline_pos: -1,
            is_routable: true,
            rerouted_nets: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none()
    }
}

pub struct PartitionTree {
    root: Box<PartitionTreeNode>,
}

impl PartitionTree {
    /// Build the tree over the whole device from each net's current bbox.
    pub fn build(netlist: &NetlistDB, route_bb: &[Bbox], width: i32, height: i32) -> Self {
        let all_nets: Vec<NetId> = netlist.nets().collect();
        let root = build_helper(netlist, route_bb, all_nets, 0, 0, width, height)
            .unwrap_or_else(|| Box::new(PartitionTreeNode::leaf(Vec::new())));
        Self { root }
    }

    pub fn root(&self) -> &PartitionTreeNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut PartitionTreeNode {
        &mut self.root
    }
}

/// Recursively partition `nets` over the half-open region
/// `[x1, x2) x [y1, y2)`.
///
/// Builds fanout-weighted prefix sums per coordinate and cuts where the
/// weight on the two sides is most balanced. Cut positions that would leave
/// everything on one side are rejected; if none survive on either axis the
/// region becomes a leaf.
fn build_helper(
    netlist: &NetlistDB,
    route_bb: &[Bbox],
    nets: Vec<NetId>,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
) -> Option<Box<PartitionTreeNode>> {
    if nets.is_empty() {
        return None;
    }

    let w = (x2 - x1) as usize;
    let h = (y2 - y1) as usize;
    debug_assert!(w > 0 && h > 0);

    // Weight each coordinate by the fanout of the nets that have started
    // (resp. not yet ended) there, so balance tracks routing work, not net
    // count. Bounding boxes are inclusive of their borders.
    let mut x_total_before = vec![0i64; w];
    let mut x_total_after = vec![0i64; w];
    let mut y_total_before = vec![0i64; h];
    let mut y_total_after = vec![0i64; h];

    for &net in &nets {
        let bb = &route_bb[net.index()];
        let fanout = netlist.net_sinks(net) as i64;

        let x_start = (bb.xmin.max(x1) - x1) as usize;
        let x_end = ((bb.xmax + 1).min(x2) - x1) as usize;
        for x in x_start..w {
            x_total_before[x] += fanout;
        }
        for x in 0..x_end {
            x_total_after[x] += fanout;
        }

        let y_start = (bb.ymin.max(y1) - y1) as usize;
        let y_end = ((bb.ymax + 1).min(y2) - y1) as usize;
        for y in y_start..h {
            y_total_before[y] += fanout;
        }
        for y in 0..y_end {
            y_total_after[y] += fanout;
        }
    }

    let mut best_score = i64::MAX;
    let mut best_pos = None;
    let mut best_axis = Axis::X;

    let max_x_before = x_total_before[w - 1];
    let max_x_after = x_total_after[0];
    for x in 0..w {
        let before = x_total_before[x];
        let after = x_total_after[x];
        // Cutting here would leave no nets on one side.
        if before == max_x_before || after == max_x_after {
            continue;
        }
        let score = (before - after).abs();
        if score < best_score {
            best_score = score;
            best_pos = Some(x1 + x as i32);
            best_axis = Axis::X;
        }
    }

    let max_y_before = y_total_before[h - 1];
    let max_y_after = y_total_after[0];
    for y in 0..h {
        let before = y_total_before[y];
        let after = y_total_after[y];
        if before == max_y_before || after == max_y_after {
            continue;
        }
        let score = (before - after).abs();
        if score < best_score {
            best_score = score;
            best_pos = Some(y1 + y as i32);
            best_axis = Axis::Y;
        }
    }

    // Every cutline is one-sided: this region is a leaf.
    let Some(cutline_pos) = best_pos else {
        return Some(Box::new(PartitionTreeNode::leaf(nets)));
    };

    let mut left_nets = Vec::new();
    let mut right_nets = Vec::new();
    let mut my_nets = Vec::new();

    for &net in &nets {
        let bb = &route_bb[net.index()];
        if bb.max_on(best_axis) < cutline_pos {
            left_nets.push(net);
        } else if bb.min_on(best_axis) > cutline_pos {
            right_nets.push(net);
        } else {
            my_nets.push(net);
        }
    }

    let (left, right) = match best_axis {
        Axis::X => (
            build_helper(netlist, route_bb, left_nets, x1, y1, cutline_pos, y2),
            build_helper(netlist, route_bb, right_nets, cutline_pos + 1, y1, x2, y2),
        ),
        Axis::Y => (
            build_helper(netlist, route_bb, left_nets, x1, y1, x2, cutline_pos),
            build_helper(netlist, route_bb, right_nets, x1, cutline_pos + 1, x2, y2),
        ),
    };

    let mut out = Box::new(PartitionTreeNode::leaf(my_nets));
    out.cutline_axis = best_axis;
    out.cutline_pos = cutline_pos;
    out.left = left;
    out.right = right;
    Some(out)
}
