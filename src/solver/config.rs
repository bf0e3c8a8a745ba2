//! Simulator configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

use super::convergence::{ConvergencePolicy, ToleranceSchedule};
use super::{ABSOLUTE_TOLERANCE, DEFAULT_ITERATION_CAP, DEFAULT_TIME_STEP, UNCONNECTED_NODE_RESISTANCE};

/// What to do when a timestep hits the iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Keep the last solution, commit the step, advance and flag it.
    #[default]
    AcceptBestEffort,
    /// Stop running and report the failure. Nothing is committed.
    Halt,
}

/// Configuration for the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Simulated seconds per timestep. A circuit file header overrides it.
    pub time_step: f64,
    /// Maximum sub-iterations per timestep.
    pub iteration_cap: usize,
    /// Absolute floor of the convergence threshold.
    pub absolute_tolerance: f64,
    pub tolerance_schedule: ToleranceSchedule,
    pub abort_policy: AbortPolicy,
    /// Resistance from each floating node to ground (ohms).
    pub unconnected_node_resistance: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            time_step: DEFAULT_TIME_STEP,
            iteration_cap: DEFAULT_ITERATION_CAP,
            absolute_tolerance: ABSOLUTE_TOLERANCE,
            tolerance_schedule: ToleranceSchedule::default(),
            abort_policy: AbortPolicy::default(),
            unconnected_node_resistance: UNCONNECTED_NODE_RESISTANCE,
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    /// Set the maximum sub-iterations per timestep.
    ///
    /// The cap also bounds the latency of a single step.
    pub fn with_iteration_cap(mut self, iteration_cap: usize) -> Self {
        self.iteration_cap = iteration_cap;
        self
    }

    pub fn with_absolute_tolerance(mut self, tolerance: f64) -> Self {
        self.absolute_tolerance = tolerance;
        self
    }

    pub fn with_tolerance_schedule(mut self, schedule: ToleranceSchedule) -> Self {
        self.tolerance_schedule = schedule;
        self
    }

    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    pub fn with_unconnected_node_resistance(mut self, resistance: f64) -> Self {
        self.unconnected_node_resistance = resistance;
        self
    }

    /// Decode a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SimError::FileReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Reject values the driver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.time_step > 0.0) || !self.time_step.is_finite() {
            return Err(SimError::invalid_param(format!(
                "time step must be positive, got {}",
                self.time_step
            )));
        }
        if self.iteration_cap == 0 {
            return Err(SimError::invalid_param("iteration cap must be at least 1"));
        }
        let s = &self.tolerance_schedule;
        if self.absolute_tolerance < 0.0 || s.early < 0.0 || s.mid < 0.0 || s.late < 0.0 {
            return Err(SimError::invalid_param("tolerances must not be negative"));
        }
        if !(self.unconnected_node_resistance > 0.0) {
            return Err(SimError::invalid_param(
                "unconnected node resistance must be positive",
            ));
        }
        Ok(())
    }

    /// The convergence rule elements apply.
    pub fn policy(&self) -> ConvergencePolicy {
        ConvergencePolicy {
            schedule: self.tolerance_schedule,
            absolute_floor: self.absolute_tolerance,
            iteration_cap: self.iteration_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulatorConfig::default();
        assert_eq!(config.iteration_cap, 100);
        assert_eq!(config.abort_policy, AbortPolicy::AcceptBestEffort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config =
            SimulatorConfig::from_json_str(r#"{"time_step": 0.01, "abort_policy": "halt"}"#).unwrap();
        assert_eq!(config.time_step, 0.01);
        assert_eq!(config.abort_policy, AbortPolicy::Halt);
        assert_eq!(config.iteration_cap, 100);
        assert_eq!(config.tolerance_schedule.mid, 0.01);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SimulatorConfig::new().with_time_step(0.0).validate().is_err());
        assert!(SimulatorConfig::new().with_iteration_cap(0).validate().is_err());
        assert!(SimulatorConfig::new().with_absolute_tolerance(-1.0).validate().is_err());
        assert!(SimulatorConfig::from_json_str("{\"time_step\": -1}").is_err());
        assert!(matches!(
            SimulatorConfig::from_json_str("not json"),
            Err(SimError::ConfigError { .. })
        ));
    }
}
