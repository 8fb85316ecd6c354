/// Counters collected by one worker during an iteration.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouterStats {
    pub nets_routed: usize,
    pub connections_routed: usize,
    pub heap_pushes: usize,
    pub heap_pops: usize,
}

impl RouterStats {
    pub fn reset(&mut self) {
        *self = RouterStats::default();
    }

    pub fn merge(&mut self, other: &RouterStats) {
        self.nets_routed += other.nets_routed;
        self.connections_routed += other.connections_routed;
        self.heap_pushes += other.heap_pushes;
        self.heap_pops += other.heap_pops;
    }
}
