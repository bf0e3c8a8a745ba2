//! Nonlinear sub-iteration controller.

use crate::error::Result;

use super::context::SimClock;
use super::DEFAULT_ITERATION_CAP;

/// Where the controller is within a timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    Assembling,
    Solving,
    Checking,
    Converged,
    Aborted,
}

/// How a timestep's sub-iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Converged { sub_iterations: usize },
    /// The cap was reached with elements still moving
    Aborted { sub_iterations: usize },
}

impl IterationOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, IterationOutcome::Converged { .. })
    }

    /// Solve passes that ran.
    pub fn passes(&self) -> usize {
        match *self {
            IterationOutcome::Converged { sub_iterations } => sub_iterations + 1,
            IterationOutcome::Aborted { sub_iterations } => sub_iterations,
        }
    }
}

/// Drives the SOLVING/CHECKING loop of one timestep.
#[derive(Debug, Clone)]
pub struct SubIterationController {
    /// Maximum sub-iterations
    pub iteration_cap: usize,
    state: IterationState,
}

impl Default for SubIterationController {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATION_CAP)
    }
}

impl SubIterationController {
    pub fn new(iteration_cap: usize) -> Self {
        Self {
            iteration_cap,
            state: IterationState::Assembling,
        }
    }

    pub fn state(&self) -> IterationState {
        self.state
    }

    /// Reset for a new timestep.
    pub fn begin(&mut self, clock: &mut SimClock) {
        clock.sub_iterations = 0;
        self.state = IterationState::Assembling;
    }

    /// Decide what follows a solve pass.
    ///
    /// Linear circuits are done after one pass. Nonlinear circuits need the
    /// flag to survive a pass that saw the previous pass's solution.
    pub fn check(&mut self, clock: &mut SimClock, converged: bool, nonlinear: bool) -> Option<IterationOutcome> {
        self.state = IterationState::Checking;
        if !nonlinear || (converged && clock.sub_iterations > 0) {
            self.state = IterationState::Converged;
            return Some(IterationOutcome::Converged {
                sub_iterations: clock.sub_iterations,
            });
        }
        clock.sub_iterations += 1;
        if clock.sub_iterations >= self.iteration_cap {
            self.state = IterationState::Aborted;
            return Some(IterationOutcome::Aborted {
                sub_iterations: clock.sub_iterations,
            });
        }
        self.state = IterationState::Solving;
        None
    }

    /// Run passes until converged or aborted. `pass` performs one
    /// sub-iteration and returns whether every element left `converged` set.
    pub fn run<F>(&mut self, clock: &mut SimClock, nonlinear: bool, mut pass: F) -> Result<IterationOutcome>
    where
        F: FnMut(&SimClock) -> Result<bool>,
    {
        self.begin(clock);
        self.state = IterationState::Solving;
        loop {
            let converged = pass(&*clock)?;
            if let Some(outcome) = self.check(clock, converged, nonlinear) {
                tracing::trace!(?outcome, t = clock.t, "timestep finished sub-iterating");
                return Ok(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn test_linear_single_pass() {
        let mut controller = SubIterationController::new(100);
        let mut clock = SimClock::new(1.0);
        let mut passes = 0;
        let outcome = controller
            .run(&mut clock, false, |_| {
                passes += 1;
                Ok(false)
            })
            .unwrap();
        assert_eq!(passes, 1);
        assert_eq!(outcome, IterationOutcome::Converged { sub_iterations: 0 });
        assert_eq!(controller.state(), IterationState::Converged);
    }

    #[test]
    fn test_nonlinear_needs_second_pass() {
        let mut controller = SubIterationController::new(100);
        let mut clock = SimClock::new(1.0);
        let mut passes = 0;
        let outcome = controller
            .run(&mut clock, true, |_| {
                passes += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(passes, 2);
        assert!(outcome.converged());
        assert_eq!(outcome.passes(), 2);
    }

    #[test]
    fn test_abort_at_exactly_cap() {
        let mut controller = SubIterationController::new(7);
        let mut clock = SimClock::new(1.0);
        let mut passes = 0;
        let outcome = controller
            .run(&mut clock, true, |_| {
                passes += 1;
                Ok(false)
            })
            .unwrap();
        assert_eq!(passes, 7);
        assert_eq!(outcome, IterationOutcome::Aborted { sub_iterations: 7 });
        assert_eq!(outcome.passes(), 7);
        assert_eq!(controller.state(), IterationState::Aborted);
    }

    #[test]
    fn test_pass_error_propagates() {
        let mut controller = SubIterationController::new(10);
        let mut clock = SimClock::new(1.0);
        let err = controller
            .run(&mut clock, true, |_| Err(SimError::SingularMatrix { row: 0 }))
            .unwrap_err();
        assert!(err.is_unsolvable());
    }
}
