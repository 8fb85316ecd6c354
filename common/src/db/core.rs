use crate::db::indices::*;
use std::collections::HashMap;

/// One logical connection from a source pin to one or more sink pins.
///
/// `rr_terminals[0]` is the RR node of the source; `rr_terminals[1..]` are the
/// sink RR nodes, addressed everywhere by their 1-based sink index.
#[derive(Clone, Debug)]
pub struct NetData {
    pub name: String,
    pub is_global: bool,
    pub is_ignored: bool,
    pub rr_terminals: Vec<RRNodeId>,
}

/// Routing view of the clustered netlist.
pub struct NetlistDB {
    pub nets: Vec<NetData>,
    pub net_name_map: HashMap<String, NetId>,
}

impl NetlistDB {
    pub fn new() -> Self {
        Self {
            nets: Vec::with_capacity(1000),
            net_name_map: HashMap::new(),
        }
    }

    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn nets(&self) -> impl Iterator<Item = NetId> + '_ {
        (0..self.nets.len()).map(NetId::new)
    }

    pub fn add_net(&mut self, name: String, rr_terminals: Vec<RRNodeId>) -> NetId {
        debug_assert!(!rr_terminals.is_empty());
        let id = NetId::new(self.nets.len());
        self.net_name_map.insert(name.clone(), id);
        self.nets.push(NetData {
            name,
            is_global: false,
            is_ignored: false,
            rr_terminals,
        });
        id
    }

    /// Number of sinks (fanout) of the net.
    pub fn net_sinks(&self, net: NetId) -> usize {
        self.nets[net.index()].rr_terminals.len() - 1
    }

    /// All terminal RR nodes: index 0 is the source, 1..=K the sinks.
    pub fn net_rr_terminals(&self, net: NetId) -> &[RRNodeId] {
        &self.nets[net.index()].rr_terminals
    }

    pub fn net_source(&self, net: NetId) -> RRNodeId {
        self.nets[net.index()].rr_terminals[0]
    }

    pub fn net_sink_rr(&self, net: NetId, isink: usize) -> RRNodeId {
        debug_assert!(isink >= 1);
        self.nets[net.index()].rr_terminals[isink]
    }

    pub fn net_is_global(&self, net: NetId) -> bool {
        self.nets[net.index()].is_global
    }

    pub fn net_is_ignored(&self, net: NetId) -> bool {
        self.nets[net.index()].is_ignored
    }

    pub fn net_name(&self, net: NetId) -> &str {
        &self.nets[net.index()].name
    }
}

impl Default for NetlistDB {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_indexing() {
        let mut db = NetlistDB::new();
        let n = db.add_net(
            "n0".to_string(),
            vec![RRNodeId::new(7), RRNodeId::new(3), RRNodeId::new(9)],
        );
        assert_eq!(db.net_sinks(n), 2);
        assert_eq!(db.net_source(n), RRNodeId::new(7));
        assert_eq!(db.net_sink_rr(n, 1), RRNodeId::new(3));
        assert_eq!(db.net_sink_rr(n, 2), RRNodeId::new(9));
        assert_eq!(db.net_name_map["n0"], n);
    }
}
