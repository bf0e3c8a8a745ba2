//! Per-element convergence checks.

use serde::{Deserialize, Serialize};

use super::{ABSOLUTE_TOLERANCE, DEFAULT_ITERATION_CAP};

/// Relative tolerance that loosens as sub-iterations accumulate.
///
/// Checks stop clearing the converged flag once the iteration cap is
/// reached, so with the default cap of 100 the `late` bracket never decides
/// anything. It takes effect only when the cap is raised above `mid_until`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceSchedule {
    /// Relative tolerance below `early_until` sub-iterations
    pub early: f64,
    pub early_until: usize,
    /// Relative tolerance below `mid_until` sub-iterations
    pub mid: f64,
    pub mid_until: usize,
    /// Relative tolerance from then on
    pub late: f64,
}

impl Default for ToleranceSchedule {
    fn default() -> Self {
        Self {
            early: 0.001,
            early_until: 10,
            mid: 0.01,
            mid_until: DEFAULT_ITERATION_CAP,
            late: 0.1,
        }
    }
}

impl ToleranceSchedule {
    /// Relative tolerance in effect at `sub_iterations`.
    pub fn relative_at(&self, sub_iterations: usize) -> f64 {
        if sub_iterations < self.early_until {
            self.early
        } else if sub_iterations < self.mid_until {
            self.mid
        } else {
            self.late
        }
    }
}

/// Which tolerance a check uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Scheduled relative tolerance with the policy's absolute floor
    Scheduled,
    /// Element-specific constants
    Fixed { relative: f64, absolute: f64 },
}

impl Tolerance {
    pub const fn fixed(relative: f64, absolute: f64) -> Self {
        Tolerance::Fixed { relative, absolute }
    }
}

/// The rule every element applies to decide whether its value settled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePolicy {
    pub schedule: ToleranceSchedule,
    pub absolute_floor: f64,
    pub iteration_cap: usize,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            schedule: ToleranceSchedule::default(),
            absolute_floor: ABSOLUTE_TOLERANCE,
            iteration_cap: DEFAULT_ITERATION_CAP,
        }
    }
}

impl ConvergencePolicy {
    /// `max(|value| * relative, floor)`
    pub fn threshold(&self, value: f64, tolerance: Tolerance, sub_iterations: usize) -> f64 {
        let (relative, absolute) = match tolerance {
            Tolerance::Scheduled => (self.schedule.relative_at(sub_iterations), self.absolute_floor),
            Tolerance::Fixed { relative, absolute } => (relative, absolute),
        };
        (value.abs() * relative).max(absolute)
    }

    /// Whether moving from `old` to `new` must clear the converged flag.
    /// Never true once the cap is reached.
    pub fn is_unconverged(&self, new: f64, old: f64, tolerance: Tolerance, sub_iterations: usize) -> bool {
        let delta = (new - old).abs();
        // NaN deltas never count as settled
        let moved = !(delta <= self.threshold(new, tolerance, sub_iterations));
        moved && sub_iterations < self.iteration_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_schedule_brackets() {
        let s = ToleranceSchedule::default();
        assert_relative_eq!(s.relative_at(0), 0.001);
        assert_relative_eq!(s.relative_at(9), 0.001);
        assert_relative_eq!(s.relative_at(10), 0.01);
        assert_relative_eq!(s.relative_at(99), 0.01);
        assert_relative_eq!(s.relative_at(100), 0.1);
    }

    #[test]
    fn test_late_bracket_needs_raised_cap() {
        let default = ConvergencePolicy::default();
        assert!(!default.is_unconverged(1.05, 1.0, Tolerance::Scheduled, default.schedule.mid_until));

        let raised = ConvergencePolicy {
            iteration_cap: 200,
            ..ConvergencePolicy::default()
        };
        // 5% moves fail the 1% mid bracket but pass the 10% late bracket
        assert!(raised.is_unconverged(1.05, 1.0, Tolerance::Scheduled, 50));
        assert!(!raised.is_unconverged(1.05, 1.0, Tolerance::Scheduled, 150));
        assert!(raised.is_unconverged(1.5, 1.0, Tolerance::Scheduled, 150));
    }

    #[test]
    fn test_threshold_uses_floor() {
        let p = ConvergencePolicy::default();
        assert_relative_eq!(p.threshold(0.0, Tolerance::Scheduled, 0), 1e-6);
        assert_relative_eq!(p.threshold(10.0, Tolerance::Scheduled, 0), 0.01);
        assert_relative_eq!(p.threshold(10.0, Tolerance::Scheduled, 20), 0.1);
        assert_relative_eq!(p.threshold(10.0, Tolerance::fixed(0.01, 1e-9), 0), 0.1);
    }

    #[test]
    fn test_unconverged_until_cap() {
        let p = ConvergencePolicy::default();
        assert!(p.is_unconverged(1.0, 0.0, Tolerance::Scheduled, 0));
        assert!(p.is_unconverged(1.0, 0.0, Tolerance::Scheduled, 99));
        assert!(!p.is_unconverged(1.0, 0.0, Tolerance::Scheduled, 100));
        assert!(!p.is_unconverged(1.0005, 1.0, Tolerance::Scheduled, 0));
        assert!(p.is_unconverged(f64::NAN, 1.0, Tolerance::Scheduled, 0));
    }
}
