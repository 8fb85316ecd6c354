use crate::db::indices::RRNodeId;
use crate::geom::bbox::Bbox;

/// Routing-resource graph: nodes are physical wires, edges are the legal
/// transitions between them. Stored as a CSR adjacency over flat per-node
/// attribute arrays.
pub struct RRGraph {
    width: i32,
    height: i32,
    tracks: usize,
    xlow: Vec<i32>,
    ylow: Vec<i32>,
    capacity: Vec<u16>,
    base_cost: Vec<f32>,
    edge_start: Vec<u32>,
    edge_dst: Vec<RRNodeId>,
}

impl RRGraph {
    /// Build a uniform W x H routing fabric with `tracks` wires per tile.
    /// Each wire connects to the same track and the next track of its four
    /// neighbouring tiles, which gives the router room to switch tracks while
    /// keeping the graph sparse.
    pub fn uniform(width: i32, height: i32, tracks: usize) -> Self {
        assert!(width > 0 && height > 0 && tracks > 0);
        let num_nodes = (width * height) as usize * tracks;

        let mut xlow = vec![0; num_nodes];
        let mut ylow = vec![0; num_nodes];
        let mut edge_start = Vec::with_capacity(num_nodes + 1);
        let mut edge_dst = Vec::new();

        let node_id = |x: i32, y: i32, t: usize| -> RRNodeId {
            RRNodeId::new(((y * width + x) as usize) * tracks + t)
        };

        for y in 0..height {
            for x in 0..width {
                for t in 0..tracks {
                    let n = node_id(x, y, t).index();
                    xlow[n] = x;
                    ylow[n] = y;
                }
            }
        }

        for y in 0..height {
            for x in 0..width {
                for t in 0..tracks {
                    edge_start.push(edge_dst.len() as u32);
                    let neighbours = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)];
                    for (nx, ny) in neighbours {
                        if nx < 0 || nx >= width || ny < 0 || ny >= height {
                            continue;
                        }
                        edge_dst.push(node_id(nx, ny, t));
                        if tracks > 1 {
                            edge_dst.push(node_id(nx, ny, (t + 1) % tracks));
                        }
                    }
                }
            }
        }
        edge_start.push(edge_dst.len() as u32);

        Self {
            width,
            height,
            tracks,
            xlow,
            ylow,
            capacity: vec![1; num_nodes],
            base_cost: vec![1.0; num_nodes],
            edge_start,
            edge_dst,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.xlow.len()
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn tracks(&self) -> usize {
        self.tracks
    }

    #[inline(always)]
    pub fn node_xlow(&self, n: RRNodeId) -> i32 {
        self.xlow[n.index()]
    }

    #[inline(always)]
    pub fn node_ylow(&self, n: RRNodeId) -> i32 {
        self.ylow[n.index()]
    }

    #[inline(always)]
    pub fn node_capacity(&self, n: RRNodeId) -> u16 {
        self.capacity[n.index()]
    }

    #[inline(always)]
    pub fn base_cost(&self, n: RRNodeId) -> f32 {
        self.base_cost[n.index()]
    }

    pub fn edges(&self, n: RRNodeId) -> &[RRNodeId] {
        let start = self.edge_start[n.index()] as usize;
        let end = self.edge_start[n.index() + 1] as usize;
        &self.edge_dst[start..end]
    }

    #[inline(always)]
    pub fn node_track(&self, n: RRNodeId) -> usize {
        n.index() % self.tracks
    }

    /// Wire node at tile `(x, y)`, track `t`.
    pub fn node_at(&self, x: i32, y: i32, t: usize) -> RRNodeId {
        debug_assert!(x >= 0 && x < self.width && y >= 0 && y < self.height && t < self.tracks);
        RRNodeId::new(((y * self.width + x) as usize) * self.tracks + t)
    }

    /// A node is inside a bounding box iff its `(xlow, ylow)` corner is.
    #[inline(always)]
    pub fn inside_bb(&self, n: RRNodeId, bb: &Bbox) -> bool {
        bb.contains(self.node_xlow(n), self.node_ylow(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_fabric_connectivity() {
        let rr = RRGraph::uniform(4, 3, 2);
        assert_eq!(rr.num_nodes(), 24);

        let n = rr.node_at(0, 0, 0);
        assert_eq!(rr.node_xlow(n), 0);
        assert_eq!(rr.node_ylow(n), 0);
        // Corner tile: two neighbours, two edges each (same + next track).
        assert_eq!(rr.edges(n).len(), 4);

        let mid = rr.node_at(1, 1, 1);
        assert_eq!(rr.edges(mid).len(), 8);
        for &m in rr.edges(mid) {
            let dx = (rr.node_xlow(m) - 1).abs();
            let dy = (rr.node_ylow(m) - 1).abs();
            assert_eq!(dx + dy, 1);
        }
    }

    #[test]
    fn bbox_membership_uses_low_corner() {
        let rr = RRGraph::uniform(8, 8, 1);
        let bb = Bbox::new(2, 4, 2, 4);
        assert!(rr.inside_bb(rr.node_at(2, 4, 0), &bb));
        assert!(!rr.inside_bb(rr.node_at(5, 3, 0), &bb));
    }
}
