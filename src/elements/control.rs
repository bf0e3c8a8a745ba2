//! Simulation control elements.

use crate::circuit::Tokens;
use crate::solver::FinishContext;

use super::core::{number_text, ElementCore};
use super::CircuitElement;

/// Stops the simulation once simulated time reaches `stop_time`.
#[derive(Debug, Clone)]
pub struct StopTime {
    core: ElementCore,
    pub stop_time: f64,
}

impl StopTime {
    pub fn new(core: ElementCore, stop_time: f64) -> Self {
        Self { core, stop_time }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let stop_time = tokens.f64_or("stop time", 1.0);
        Self::new(core, stop_time)
    }

    /// Whether the step ending at `t + time_step` reaches the stop time.
    pub fn reached(&self, t: f64, time_step: f64) -> bool {
        t + time_step >= self.stop_time - time_step * 1e-6
    }
}

impl CircuitElement for StopTime {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "431"
    }

    fn kind(&self) -> &'static str {
        "stop time"
    }

    fn post_count(&self) -> usize {
        0
    }

    fn step_finished(&mut self, ctx: &mut FinishContext<'_>) {
        if self.reached(ctx.time(), ctx.time_step()) {
            tracing::info!(t = ctx.time(), stop_time = self.stop_time, "stop time reached");
            ctx.request_stop(format!("stop time {} reached", number_text(self.stop_time)));
        }
    }

    fn info(&self) -> Vec<String> {
        vec!["stop time".to_string(), format!("t = {}", number_text(self.stop_time))]
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.stop_time.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reached_on_the_final_step() {
        let stop = StopTime::new(ElementCore::new(0, 0, 0, 0, 0), 1.0);
        assert!(!stop.reached(0.8, 0.1));
        assert!(stop.reached(0.9, 0.1));
        assert!(stop.reached(0.9 - 1e-9, 0.1));
        assert!(stop.reached(2.0, 0.1));
    }
}
