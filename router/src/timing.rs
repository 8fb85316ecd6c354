use crate::route_tree::LINK_DELAY;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::NetId;
use fabric_common::db::rr_graph::RRGraph;
use std::sync::Mutex;

/// Hold requirement per connection. Connections faster than this have
/// negative hold slack and become candidates for budget-driven slowdown.
const HOLD_REQUIREMENT: f32 = 1.5e-10;

/// Setup/hold view of the routed design, refreshed from the net-delay matrix
/// after each iteration. Criticalities are per connection, 1-indexed by sink.
#[derive(Clone)]
pub struct TimingInfo {
    clock_period: f32,
    criticality: Vec<Vec<f32>>,
    setup_slack: Vec<Vec<f32>>,
    hold_slack: Vec<Vec<f32>>,
    critical_path_delay: f32,
    constant: Option<f32>,
}

impl TimingInfo {
    pub fn new(netlist: &NetlistDB, clock_period: f32) -> Self {
        Self {
            clock_period,
            criticality: per_sink(netlist, 0.0),
            setup_slack: per_sink(netlist, clock_period),
            hold_slack: per_sink(netlist, 0.0),
            critical_path_delay: 0.0,
            constant: None,
        }
    }

    /// Timing info that reports the same criticality for every connection.
    /// Used for the first iteration (all-critical) and for routability-driven
    /// runs (criticality zero).
    pub fn constant(netlist: &NetlistDB, criticality: f32) -> Self {
        let mut out = Self::new(netlist, 1.0);
        out.constant = Some(criticality);
        out
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    /// Recompute slacks and criticalities from the current net delays.
    pub fn update(&mut self, netlist: &NetlistDB, net_delay: &[Mutex<Vec<f32>>]) {
        self.critical_path_delay = 0.0;
        for net in netlist.nets() {
            if netlist.net_is_ignored(net) {
                continue;
            }
            let delays = net_delay[net.index()].lock().unwrap();
            for isink in 1..delays.len() {
                let delay = delays[isink];
                self.critical_path_delay = self.critical_path_delay.max(delay);
                self.setup_slack[net.index()][isink] = self.clock_period - delay;
                self.hold_slack[net.index()][isink] = delay - HOLD_REQUIREMENT;
                self.criticality[net.index()][isink] =
                    (delay / self.clock_period).clamp(0.0, 1.0);
            }
        }
    }

    /// Raw (unshaped) criticality of a connection.
    pub fn criticality(&self, net: NetId, isink: usize) -> f32 {
        if let Some(c) = self.constant {
            return c;
        }
        self.criticality[net.index()][isink]
    }

    pub fn critical_path_delay(&self) -> f32 {
        self.critical_path_delay
    }

    pub fn setup_worst_negative_slack(&self) -> f32 {
        self.setup_slack
            .iter()
            .flat_map(|row| row.iter().skip(1))
            .fold(0.0f32, |acc, &s| acc.min(s))
    }

    pub fn setup_total_negative_slack(&self) -> f32 {
        self.setup_slack
            .iter()
            .flat_map(|row| row.iter().skip(1))
            .map(|&s| s.min(0.0))
            .sum()
    }

    pub fn hold_worst_negative_slack(&self) -> f32 {
        self.hold_slack
            .iter()
            .flat_map(|row| row.iter().skip(1))
            .fold(0.0f32, |acc, &s| acc.min(s))
    }

    pub fn hold_total_negative_slack(&self) -> f32 {
        self.hold_slack
            .iter()
            .flat_map(|row| row.iter().skip(1))
            .map(|&s| s.min(0.0))
            .sum()
    }

    pub fn hold_slack(&self, net: NetId, isink: usize) -> f32 {
        self.hold_slack[net.index()][isink]
    }
}

fn per_sink(netlist: &NetlistDB, value: f32) -> Vec<Vec<f32>> {
    netlist
        .nets()
        .map(|net| vec![value; netlist.net_sinks(net) + 1])
        .collect()
}

/// Criticality of a connection as seen by the router: shaped by the
/// criticality exponent and clipped to `max_criticality`. No timing info
/// means a min-delay routing is wanted, so the criticality is 1.
pub fn pin_criticality(
    timing: Option<&TimingInfo>,
    max_criticality: f32,
    criticality_exp: f32,
    net: NetId,
    isink: usize,
) -> f32 {
    match timing {
        None => 1.0,
        Some(t) => t
            .criticality(net, isink)
            .powf(criticality_exp)
            .min(max_criticality),
    }
}

/// Seed net delays from Manhattan distance before any routing exists, so the
/// first timing analysis has something to chew on (lookahead initial timing).
pub fn init_net_delay_from_lookahead(
    netlist: &NetlistDB,
    rr: &RRGraph,
    net_delay: &[Mutex<Vec<f32>>],
) {
    for net in netlist.nets() {
        let terminals = netlist.net_rr_terminals(net);
        let src = terminals[0];
        let mut delays = net_delay[net.index()].lock().unwrap();
        for (isink, &sink) in terminals.iter().enumerate().skip(1) {
            let dist = (rr.node_xlow(src) - rr.node_xlow(sink)).abs()
                + (rr.node_ylow(src) - rr.node_ylow(sink)).abs();
            delays[isink] = dist as f32 * LINK_DELAY;
        }
    }
}
