use crate::timing::TimingInfo;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::NetId;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Growth of the critical path that counts as "significant" and triggers the
/// delay-driven rip-up scan.
const CPD_GROWTH_TOLERANCE: f32 = 1.02;

/// Tracks per-connection delay history across iterations: the lower-bound
/// delays seen in an uncongested routing, and the last critical path the
/// configuration was considered stable at. Used to decide which legal nets
/// must be ripped up anyway because their delay regressed.
pub struct ConnectionTracker {
    lower_bound_delay: Vec<Vec<f32>>,
    stable_critical_path: f32,
    delay_tolerance: f32,
    criticality_threshold: f32,
    forced_reroute: Vec<AtomicBool>,
}

impl ConnectionTracker {
    pub fn new(netlist: &NetlistDB) -> Self {
        Self {
            lower_bound_delay: netlist
                .nets()
                .map(|net| vec![f32::INFINITY; netlist.net_sinks(net) + 1])
                .collect(),
            stable_critical_path: f32::INFINITY,
            delay_tolerance: 1.3,
            criticality_threshold: 0.7,
            forced_reroute: netlist.nets().map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn set_stable_critical_path_delay(&mut self, cpd: f32) {
        self.stable_critical_path = cpd;
    }

    pub fn critical_path_delay_grew_significantly(&self, cpd: f32) -> bool {
        cpd > self.stable_critical_path * CPD_GROWTH_TOLERANCE
    }

    /// Tighten the reroute tolerances after a legal convergence, so the next
    /// pass chases delay-suboptimal connections harder.
    pub fn set_connection_delay_tolerance(&mut self, tolerance: f32) {
        self.delay_tolerance = tolerance;
    }

    pub fn set_connection_criticality_tolerance(&mut self, threshold: f32) {
        self.criticality_threshold = threshold;
    }

    /// Record the delays of the current (uncongested) routing as the best we
    /// expect each connection to achieve.
    pub fn set_lower_bound_connection_delays(
        &mut self,
        netlist: &NetlistDB,
        net_delay: &[Mutex<Vec<f32>>],
    ) {
        for net in netlist.nets() {
            let delays = net_delay[net.index()].lock().unwrap();
            for isink in 1..delays.len() {
                self.lower_bound_delay[net.index()][isink] = delays[isink];
            }
        }
    }

    /// Mark critical connections whose delay drifted well above their lower
    /// bound for forced rip-up. Returns false when anything was marked (the
    /// routing configuration is not stable).
    pub fn forcibly_reroute_connections(
        &self,
        max_criticality: f32,
        timing: &TimingInfo,
        netlist: &NetlistDB,
        net_delay: &[Mutex<Vec<f32>>],
    ) -> bool {
        let mut stable = true;
        for net in netlist.nets() {
            if netlist.net_is_ignored(net) {
                continue;
            }
            let delays = net_delay[net.index()].lock().unwrap();
            for isink in 1..delays.len() {
                let crit = timing.criticality(net, isink).min(max_criticality);
                if crit < self.criticality_threshold {
                    continue;
                }
                let lower = self.lower_bound_delay[net.index()][isink];
                if delays[isink] > lower * self.delay_tolerance {
                    self.forced_reroute[net.index()].store(true, Ordering::Relaxed);
                    stable = false;
                }
            }
        }
        stable
    }

    pub fn is_forced_reroute(&self, net: NetId) -> bool {
        self.forced_reroute[net.index()].load(Ordering::Relaxed)
    }

    /// Consume the forced flag when the net is actually ripped up.
    pub fn clear_forced_reroute(&self, net: NetId) {
        self.forced_reroute[net.index()].store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_common::db::indices::RRNodeId;

    fn fixture() -> (NetlistDB, Vec<Mutex<Vec<f32>>>) {
        let mut db = NetlistDB::new();
        db.add_net(
            "a".to_string(),
            vec![RRNodeId::new(0), RRNodeId::new(1)],
        );
        (db, vec![Mutex::new(vec![0.0, 1e-9])])
    }

    #[test]
    fn cpd_growth_detection() {
        let (db, _) = fixture();
        let mut tracker = ConnectionTracker::new(&db);
        tracker.set_stable_critical_path_delay(1e-9);
        assert!(!tracker.critical_path_delay_grew_significantly(1.01e-9));
        assert!(tracker.critical_path_delay_grew_significantly(1.1e-9));
    }

    #[test]
    fn delay_regression_forces_reroute() {
        let (db, delays) = fixture();
        let mut tracker = ConnectionTracker::new(&db);
        tracker.set_lower_bound_connection_delays(&db, &delays);

        let mut timing = TimingInfo::new(&db, 1.2e-9);
        let net = NetId::new(0);

        // Delay grows 2x past the recorded lower bound.
        *delays[0].lock().unwrap() = vec![0.0, 2e-9];
        timing.update(&db, &delays);

        let stable = tracker.forcibly_reroute_connections(0.99, &timing, &db, &delays);
        assert!(!stable);
        assert!(tracker.is_forced_reroute(net));
        tracker.clear_forced_reroute(net);
        assert!(!tracker.is_forced_reroute(net));
    }
}
