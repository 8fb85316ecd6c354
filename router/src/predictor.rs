/// Abort threshold factors applied to `max_router_iterations`.
pub const ABORT_FACTOR_SAFE: f32 = 1.5;
pub const ABORT_FACTOR_AGGRESSIVE: f32 = 1.0;

/// Only consider aborting when overuse is substantial; small counts resolve
/// unpredictably fast.
pub const MIN_ABSOLUTE_OVERUSE_THRESHOLD: usize = 128;

/// Window of recent iterations the trend fit looks at.
const FIT_WINDOW: usize = 5;

/// Extrapolates the iteration at which overuse reaches zero from the recent
/// overuse trend.
pub struct RoutingPredictor {
    history: Vec<(usize, usize)>,
}

impl RoutingPredictor {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
        }
    }

    pub fn add_iteration_overuse(&mut self, itry: usize, overused_nodes: usize) {
        self.history.push((itry, overused_nodes));
    }

    /// Least-squares trend over the last few iterations, extrapolated to
    /// zero overuse. Infinity when overuse is flat or growing.
    pub fn estimate_success_iteration(&self) -> f32 {
        if self.history.len() < 2 {
            return f32::NAN;
        }
        let window = &self.history[self.history.len().saturating_sub(FIT_WINDOW)..];
        let n = window.len() as f32;
        let mean_x = window.iter().map(|&(x, _)| x as f32).sum::<f32>() / n;
        let mean_y = window.iter().map(|&(_, y)| y as f32).sum::<f32>() / n;

        let mut num = 0.0;
        let mut den = 0.0;
        for &(x, y) in window {
            num += (x as f32 - mean_x) * (y as f32 - mean_y);
            den += (x as f32 - mean_x) * (x as f32 - mean_x);
        }
        if den == 0.0 {
            return f32::NAN;
        }
        let slope = num / den;
        if slope >= 0.0 {
            return f32::INFINITY;
        }

        let (last_itry, last_overuse) = *window.last().unwrap();
        last_itry as f32 + last_overuse as f32 / -slope
    }
}

impl Default for RoutingPredictor {
    fn default() -> Self {
        Self::new()
    }
}

/// Abort decision for the convergence controller: predicted success too far
/// out, with enough overuse to trust the prediction.
pub fn should_abort_predicted(
    estimate: f32,
    abort_threshold: f32,
    overused_nodes: usize,
) -> bool {
    overused_nodes > MIN_ABSOLUTE_OVERUSE_THRESHOLD
        && !estimate.is_nan()
        && estimate > abort_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improving_overuse_extrapolates_to_finite_iteration() {
        let mut p = RoutingPredictor::new();
        for (i, o) in [(1, 1000), (2, 800), (3, 600), (4, 400)] {
            p.add_iteration_overuse(i, o);
        }
        let est = p.estimate_success_iteration();
        assert!((est - 6.0).abs() < 0.5);
    }

    #[test]
    fn flat_overuse_predicts_never() {
        let mut p = RoutingPredictor::new();
        for i in 1..=4 {
            p.add_iteration_overuse(i, 500);
        }
        assert!(p.estimate_success_iteration().is_infinite());
    }

    #[test]
    fn single_point_is_no_prediction() {
        let mut p = RoutingPredictor::new();
        p.add_iteration_overuse(1, 500);
        assert!(p.estimate_success_iteration().is_nan());
    }

    #[test]
    fn abort_needs_significant_overuse() {
        // Predicted success at twice the iteration limit.
        assert!(should_abort_predicted(100.0, 75.0, 500));
        assert!(!should_abort_predicted(100.0, 75.0, 10));
        assert!(!should_abort_predicted(f32::NAN, 75.0, 500));
        assert!(!should_abort_predicted(50.0, 75.0, 500));
    }
}
