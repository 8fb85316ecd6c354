use fabric_common::db::indices::{NetId, RRNodeId};
use std::collections::HashMap;

/// Delay of one RR wire hop. Net delays are tree depth times this; the
/// connection router prices delay in hops, so only reporting and budgets see
/// seconds.
pub const LINK_DELAY: f32 = 30e-12;

/// Tree of RR nodes currently assigned to a net, rooted at its source.
///
/// Stored as an arena in insertion order: removing individual branches is
/// never needed because rip-up is all-or-nothing, while decomposition and
/// incremental rerouting only ever add branches.
#[derive(Clone, Debug)]
pub struct RouteTree {
    net: NetId,
    nodes: Vec<RRNodeId>,
    parent: Vec<u32>,
    depth: Vec<u32>,
    index_of: HashMap<RRNodeId, u32>,
    reached: Vec<bool>,
}

impl RouteTree {
    pub fn new(net: NetId, source: RRNodeId, num_sinks: usize) -> Self {
        let mut index_of = HashMap::new();
        index_of.insert(source, 0);
        Self {
            net,
            nodes: vec![source],
            parent: vec![u32::MAX],
            depth: vec![0],
            index_of,
            reached: vec![false; num_sinks + 1],
        }
    }

    pub fn net(&self) -> NetId {
        self.net
    }

    pub fn root(&self) -> RRNodeId {
        self.nodes[0]
    }

    pub fn num_sinks(&self) -> usize {
        self.reached.len() - 1
    }

    pub fn nodes(&self) -> &[RRNodeId] {
        &self.nodes
    }

    pub fn contains(&self, n: RRNodeId) -> bool {
        self.index_of.contains_key(&n)
    }

    pub fn is_reached(&self, isink: usize) -> bool {
        self.reached[isink]
    }

    pub fn reached_isinks(&self) -> impl Iterator<Item = usize> + '_ {
        (1..self.reached.len()).filter(|&i| self.reached[i])
    }

    pub fn remaining_isinks(&self) -> impl Iterator<Item = usize> + '_ {
        (1..self.reached.len()).filter(|&i| !self.reached[i])
    }

    pub fn all_reached(&self) -> bool {
        self.reached_isinks().count() == self.num_sinks()
    }

    /// Graft a router path onto the tree and mark `isink` reached.
    ///
    /// `path[0]` must already be in the tree; later nodes that happen to be in
    /// the tree are reused rather than reparented. Returns the arena index of
    /// the first newly added node, so the caller can update occupancy with
    /// `tree.nodes()[first_new..]`.
    pub fn add_branch(&mut self, path: &[RRNodeId], isink: usize) -> usize {
        let first_new = self.nodes.len();
        let mut prev = *self
            .index_of
            .get(&path[0])
            .expect("branch must start at a tree node");

        for &n in &path[1..] {
            prev = match self.index_of.get(&n) {
                Some(&idx) => idx,
                None => {
                    let idx = self.nodes.len() as u32;
                    self.nodes.push(n);
                    self.parent.push(prev);
                    self.depth.push(self.depth[prev as usize] + 1);
                    self.index_of.insert(n, idx);
                    idx
                }
            };
        }
        self.reached[isink] = true;
        first_new
    }

    /// Source-to-node delay, if the node is in the tree.
    pub fn node_delay(&self, n: RRNodeId) -> Option<f32> {
        self.index_of
            .get(&n)
            .map(|&idx| self.depth[idx as usize] as f32 * LINK_DELAY)
    }

    /// Wire length in RR nodes, source included.
    pub fn wirelength(&self) -> usize {
        self.nodes.len()
    }

    /// Every `(parent, child)` pair in the tree.
    pub fn parent_edges(&self) -> impl Iterator<Item = (RRNodeId, RRNodeId)> + '_ {
        (1..self.nodes.len())
            .map(move |i| (self.nodes[self.parent[i] as usize], self.nodes[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rr(id: usize) -> RRNodeId {
        RRNodeId::new(id)
    }

    #[test]
    fn branch_growth_and_sink_tracking() {
        let mut tree = RouteTree::new(NetId::new(0), rr(10), 2);
        assert_eq!(tree.remaining_isinks().collect::<Vec<_>>(), vec![1, 2]);

        let first = tree.add_branch(&[rr(10), rr(11), rr(12)], 1);
        assert_eq!(first, 1);
        assert!(tree.is_reached(1));
        assert!(tree.contains(rr(12)));
        assert_eq!(tree.remaining_isinks().collect::<Vec<_>>(), vec![2]);

        // Second branch reuses the shared prefix.
        let first = tree.add_branch(&[rr(11), rr(13)], 2);
        assert_eq!(&tree.nodes()[first..], &[rr(13)]);
        assert!(tree.all_reached());
    }

    #[test]
    fn delays_follow_depth() {
        let mut tree = RouteTree::new(NetId::new(0), rr(0), 1);
        tree.add_branch(&[rr(0), rr(1), rr(2), rr(3)], 1);
        assert_eq!(tree.node_delay(rr(0)), Some(0.0));
        let d3 = tree.node_delay(rr(3)).unwrap();
        assert!((d3 - 3.0 * LINK_DELAY).abs() < 1e-18);
        assert_eq!(tree.node_delay(rr(9)), None);
    }
}
