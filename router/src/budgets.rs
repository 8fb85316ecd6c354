use crate::timing::TimingInfo;
use fabric_common::db::core::NetlistDB;
use fabric_common::db::indices::NetId;
use fabric_common::util::config::BudgetAlgorithm;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Extra delay added to struggling min/max budgets each time the hold repair
/// kicks in. Large enough to make progress, small enough not to swamp setup.
pub const BUDGET_INCREASE_FACTOR: f32 = 300e-12;

/// Criticality applied to the short-path (hold) objective once budgets are
/// loaded.
const SHORT_PATH_CRITICALITY: f32 = 0.9;

/// Per-connection delay budgets for hold-aware routing. Inactive until
/// `load` is called with a stable delay picture.
pub struct RouteBudgets {
    algorithm: BudgetAlgorithm,
    loaded: bool,
    min_delay: Vec<Vec<f32>>,
    max_delay: Vec<Vec<f32>>,
    target_delay: Vec<Vec<f32>>,
    should_reroute: Vec<AtomicBool>,
}

impl RouteBudgets {
    pub fn new(netlist: &NetlistDB, algorithm: BudgetAlgorithm) -> Self {
        Self {
            algorithm,
            loaded: false,
            min_delay: per_sink(netlist),
            max_delay: per_sink(netlist),
            target_delay: per_sink(netlist),
            should_reroute: netlist.nets().map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Budgets participate in routing only after loading.
    pub fn if_set(&self) -> bool {
        self.loaded && self.algorithm != BudgetAlgorithm::Disable
    }

    /// Derive budgets from the uncongested delays of the first iteration.
    pub fn load(&mut self, netlist: &NetlistDB, net_delay: &[Mutex<Vec<f32>>]) {
        if self.algorithm == BudgetAlgorithm::Disable {
            return;
        }
        for net in netlist.nets() {
            let delays = net_delay[net.index()].lock().unwrap();
            for isink in 1..delays.len() {
                let d = delays[isink];
                self.min_delay[net.index()][isink] = d * 0.5;
                self.max_delay[net.index()][isink] = d * 1.2 + BUDGET_INCREASE_FACTOR;
                self.target_delay[net.index()][isink] = d;
            }
        }
        self.loaded = true;
    }

    pub fn min_delay_budget(&self, net: NetId, isink: usize) -> f32 {
        self.min_delay[net.index()][isink]
    }

    pub fn max_delay_budget(&self, net: NetId, isink: usize) -> f32 {
        self.max_delay[net.index()][isink]
    }

    pub fn target_delay(&self, net: NetId, isink: usize) -> f32 {
        self.target_delay[net.index()][isink]
    }

    pub fn short_path_criticality(&self) -> f32 {
        SHORT_PATH_CRITICALITY
    }

    pub fn get_should_reroute(&self, net: NetId) -> bool {
        self.should_reroute[net.index()].load(Ordering::Relaxed)
    }

    pub fn set_should_reroute(&self, net: NetId, value: bool) {
        self.should_reroute[net.index()].store(value, Ordering::Relaxed);
    }

    /// Raise min/max budgets of hold-violating connections and flag their
    /// nets for reroute. Returns true when no connection needed help, i.e.
    /// hold looks resolved.
    pub fn increase_min_budgets_if_struggling(
        &mut self,
        increase: f32,
        timing: &TimingInfo,
        worst_negative_slack: f32,
        netlist: &NetlistDB,
    ) -> bool {
        if !self.if_set() || worst_negative_slack == 0.0 {
            return true;
        }
        let mut finished = true;
        for net in netlist.nets() {
            for isink in 1..self.min_delay[net.index()].len() {
                if timing.hold_slack(net, isink) < 0.0 {
                    self.min_delay[net.index()][isink] += increase;
                    self.max_delay[net.index()][isink] += increase;
                    self.should_reroute[net.index()].store(true, Ordering::Relaxed);
                    finished = false;
                }
            }
        }
        finished
    }
}

fn per_sink(netlist: &NetlistDB) -> Vec<Vec<f32>> {
    netlist
        .nets()
        .map(|net| vec![0.0; netlist.net_sinks(net) + 1])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_common::db::indices::RRNodeId;

    fn fixture() -> (NetlistDB, Vec<Mutex<Vec<f32>>>) {
        let mut db = NetlistDB::new();
        db.add_net(
            "a".to_string(),
            vec![RRNodeId::new(0), RRNodeId::new(1), RRNodeId::new(2)],
        );
        // Sink 1 is suspiciously fast: hold trouble.
        let delays = vec![Mutex::new(vec![0.0, 3e-11, 2e-9])];
        (db, delays)
    }

    #[test]
    fn disabled_budgets_never_activate() {
        let (db, delays) = fixture();
        let mut b = RouteBudgets::new(&db, BudgetAlgorithm::Disable);
        b.load(&db, &delays);
        assert!(!b.if_set());
    }

    #[test]
    fn struggling_raises_violating_connections_only() {
        let (db, delays) = fixture();
        let mut b = RouteBudgets::new(&db, BudgetAlgorithm::Yoyo);
        b.load(&db, &delays);
        assert!(b.if_set());

        let mut t = TimingInfo::new(&db, 5e-9);
        t.update(&db, &delays);
        let wns = t.hold_worst_negative_slack();
        assert!(wns < 0.0);

        let net = NetId::new(0);
        let before = b.min_delay_budget(net, 1);
        let finished =
            b.increase_min_budgets_if_struggling(BUDGET_INCREASE_FACTOR, &t, wns, &db);
        assert!(!finished);
        assert!(b.min_delay_budget(net, 1) > before);
        assert!(b.get_should_reroute(net));
        // The slow sink was left alone.
        assert_eq!(b.target_delay(net, 2), 2e-9);
    }
}
