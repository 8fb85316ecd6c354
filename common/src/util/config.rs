use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapKind {
    BinaryHeap,
    BucketHeapApproximation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteBbUpdate {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePredictor {
    Off,
    Safe,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialTiming {
    AllCritical,
    Lookahead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrRerouteDelayRipup {
    Off,
    On,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAlgorithm {
    Disable,
    Yoyo,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub input: InputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            input: InputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_router_heap")]
    pub router_heap: HeapKind,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_max_router_iterations")]
    pub max_router_iterations: usize,
    #[serde(default = "default_max_convergence_count")]
    pub max_convergence_count: usize,

    #[serde(default = "default_first_iter_pres_fac")]
    pub first_iter_pres_fac: f32,
    #[serde(default = "default_initial_pres_fac")]
    pub initial_pres_fac: f32,
    #[serde(default = "default_pres_fac_mult")]
    pub pres_fac_mult: f32,
    #[serde(default = "default_acc_fac")]
    pub acc_fac: f32,

    #[serde(default = "default_bb_factor")]
    pub bb_factor: i32,
    #[serde(default = "default_route_bb_update")]
    pub route_bb_update: RouteBbUpdate,
    #[serde(default = "default_high_fanout_threshold")]
    pub high_fanout_threshold: usize,

    #[serde(default = "default_routing_failure_predictor")]
    pub routing_failure_predictor: FailurePredictor,
    #[serde(default = "default_congested_iteration_threshold_frac")]
    pub congested_routing_iteration_threshold_frac: f32,

    #[serde(default = "default_initial_timing")]
    pub initial_timing: InitialTiming,
    #[serde(default = "default_timing_analysis")]
    pub timing_analysis: bool,
    #[serde(default = "default_clock_period")]
    pub clock_period: f32,
    #[serde(default = "default_max_criticality")]
    pub max_criticality: f32,
    #[serde(default = "default_criticality_exp")]
    pub criticality_exp: f32,
    #[serde(default = "default_astar_fac")]
    pub astar_fac: f32,
    #[serde(default = "default_bend_cost")]
    pub bend_cost: f32,

    #[serde(default = "default_incr_reroute_delay_ripup")]
    pub incr_reroute_delay_ripup: IncrRerouteDelayRipup,
    #[serde(default = "default_routing_budgets_algorithm")]
    pub routing_budgets_algorithm: BudgetAlgorithm,
    #[serde(default = "default_min_incremental_reroute_fanout")]
    pub min_incremental_reroute_fanout: usize,
    #[serde(default = "default_init_wirelength_abort_threshold")]
    pub init_wirelength_abort_threshold: f32,

    #[serde(default)]
    pub two_stage_clock_routing: bool,
    #[serde(default)]
    pub has_choking_spot: bool,
    #[serde(default)]
    pub is_flat: bool,

    #[serde(default)]
    pub save_routing_per_iteration: bool,
    #[serde(default)]
    pub exit_after_first_routing_iteration: bool,
    #[serde(default)]
    pub save_partition_tree_trace: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            router_heap: default_router_heap(),
            num_workers: default_num_workers(),
            max_router_iterations: default_max_router_iterations(),
            max_convergence_count: default_max_convergence_count(),
            first_iter_pres_fac: default_first_iter_pres_fac(),
            initial_pres_fac: default_initial_pres_fac(),
            pres_fac_mult: default_pres_fac_mult(),
            acc_fac: default_acc_fac(),
            bb_factor: default_bb_factor(),
            route_bb_update: default_route_bb_update(),
            high_fanout_threshold: default_high_fanout_threshold(),
            routing_failure_predictor: default_routing_failure_predictor(),
            congested_routing_iteration_threshold_frac: default_congested_iteration_threshold_frac(
            ),
            initial_timing: default_initial_timing(),
            timing_analysis: default_timing_analysis(),
            clock_period: default_clock_period(),
            max_criticality: default_max_criticality(),
            criticality_exp: default_criticality_exp(),
            astar_fac: default_astar_fac(),
            bend_cost: default_bend_cost(),
            incr_reroute_delay_ripup: default_incr_reroute_delay_ripup(),
            routing_budgets_algorithm: default_routing_budgets_algorithm(),
            min_incremental_reroute_fanout: default_min_incremental_reroute_fanout(),
            init_wirelength_abort_threshold: default_init_wirelength_abort_threshold(),
            two_stage_clock_routing: false,
            has_choking_spot: false,
            is_flat: false,
            save_routing_per_iteration: false,
            exit_after_first_routing_iteration: false,
            save_partition_tree_trace: false,
        }
    }
}

impl RouterConfig {
    /// Reject contradictory options before the iteration loop starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_workers < 1 {
            return Err("num_workers must be at least 1".to_string());
        }
        if self.max_router_iterations < 1 {
            return Err("max_router_iterations must be at least 1".to_string());
        }
        if self.pres_fac_mult < 1.0 {
            return Err("pres_fac_mult must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.max_criticality) {
            return Err("max_criticality must be in [0, 1]".to_string());
        }
        if self.congested_routing_iteration_threshold_frac <= 0.0
            || self.congested_routing_iteration_threshold_frac > 1.0
        {
            return Err(
                "congested_routing_iteration_threshold_frac must be in (0, 1]".to_string(),
            );
        }
        if self.bb_factor < 0 {
            return Err("bb_factor must be non-negative".to_string());
        }
        if self.routing_budgets_algorithm != BudgetAlgorithm::Disable && !self.timing_analysis {
            return Err("routing budgets require timing analysis".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_netlist_file")]
    pub netlist_file: String,
    #[serde(default = "default_output_route")]
    pub output_route: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            netlist_file: default_netlist_file(),
            output_route: default_output_route(),
        }
    }
}

fn default_router_heap() -> HeapKind {
    HeapKind::BinaryHeap
}

fn default_num_workers() -> usize {
    4
}

fn default_max_router_iterations() -> usize {
    50
}

fn default_max_convergence_count() -> usize {
    1
}

fn default_first_iter_pres_fac() -> f32 {
    0.0
}

fn default_initial_pres_fac() -> f32 {
    0.5
}

fn default_pres_fac_mult() -> f32 {
    1.3
}

fn default_acc_fac() -> f32 {
    1.0
}

fn default_bb_factor() -> i32 {
    3
}

fn default_route_bb_update() -> RouteBbUpdate {
    RouteBbUpdate::Dynamic
}

fn default_high_fanout_threshold() -> usize {
    64
}

fn default_routing_failure_predictor() -> FailurePredictor {
    FailurePredictor::Safe
}

fn default_congested_iteration_threshold_frac() -> f32 {
    1.0
}

fn default_initial_timing() -> InitialTiming {
    InitialTiming::AllCritical
}

fn default_timing_analysis() -> bool {
    true
}

fn default_clock_period() -> f32 {
    5e-9
}

fn default_max_criticality() -> f32 {
    0.99
}

fn default_criticality_exp() -> f32 {
    1.0
}

fn default_astar_fac() -> f32 {
    1.2
}

fn default_bend_cost() -> f32 {
    1.0
}

fn default_incr_reroute_delay_ripup() -> IncrRerouteDelayRipup {
    IncrRerouteDelayRipup::Auto
}

fn default_routing_budgets_algorithm() -> BudgetAlgorithm {
    BudgetAlgorithm::Disable
}

fn default_min_incremental_reroute_fanout() -> usize {
    16
}

fn default_init_wirelength_abort_threshold() -> f32 {
    0.85
}

fn default_netlist_file() -> String {
    "inputs/design.nets".to_string()
}

fn default_output_route() -> String {
    "output/design.route".to_string()
}
