//! Per-expression evaluation state.
//!
//! One [`ExprState`] belongs to each compiled expression instance. It carries
//! parameter values, the committed history used by `lastoutput`, `_lasta`,
//! `integrate`, `diff` and `lag`, and the names that failed to resolve.
//! History only moves forward in [`ExprState::commit_integration`] and
//! [`ExprState::update_last_values`], both called once per timestep, so
//! repeated sub-iterations see the same history.

use std::collections::{BTreeSet, VecDeque};

use super::ast::{MAX_LAG_BUFFERS, PARAM_COUNT};

/// History entries kept per `lag()` call.
pub const LAG_BUFFER_SIZE: usize = 10_000;

#[derive(Debug, Clone, Default)]
struct LagBuffer {
    /// `(time, value)` pairs, oldest first
    history: VecDeque<(f64, f64)>,
    pending: f64,
    armed: bool,
    last_commit: Option<f64>,
}

impl LagBuffer {
    fn value_at(&self, target: f64) -> f64 {
        let mut newer: Option<(f64, f64)> = None;
        for &(time, value) in self.history.iter().rev() {
            if time <= target {
                return match newer {
                    Some((t1, v1)) if t1 > time => {
                        let alpha = (target - time) / (t1 - time);
                        value + alpha * (v1 - value)
                    }
                    _ => value,
                };
            }
            newer = Some((time, value));
        }
        // Target precedes recorded history
        self.history.front().map(|&(_, v)| v).unwrap_or(0.0)
    }
}

/// Mutable state carried by an expression between evaluations.
#[derive(Debug, Clone)]
pub struct ExprState {
    /// Parameter values `_a`..`_i`
    pub values: [f64; PARAM_COUNT],
    /// Values committed at the end of the previous timestep
    pub last_values: [f64; PARAM_COUNT],
    /// Output committed at the end of the previous timestep
    pub last_output: f64,
    /// Simulated time of the current evaluation
    pub t: f64,
    last_int_output: f64,
    last_int_time: Option<f64>,
    pending_int_input: f64,
    last_diff_input: f64,
    pending_diff_input: f64,
    diff_initialized: bool,
    lags: Vec<LagBuffer>,
    unresolved: BTreeSet<String>,
}

impl Default for ExprState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprState {
    pub fn new() -> Self {
        Self {
            values: [0.0; PARAM_COUNT],
            last_values: [0.0; PARAM_COUNT],
            last_output: 0.0,
            t: 0.0,
            last_int_output: 0.0,
            last_int_time: None,
            pending_int_input: 0.0,
            last_diff_input: 0.0,
            pending_diff_input: 0.0,
            diff_initialized: false,
            lags: vec![LagBuffer::default(); MAX_LAG_BUFFERS],
            unresolved: BTreeSet::new(),
        }
    }

    /// Return to the state of a freshly started simulation.
    pub fn reset(&mut self) {
        let values = self.values;
        *self = Self::new();
        // Parameters are configuration, not history
        self.values = values;
    }

    /// Commit `last_output` and the current parameter values.
    pub fn update_last_values(&mut self, last_output: f64) {
        self.last_output = last_output;
        self.last_values = self.values;
    }

    /// Commit `integrate`, `diff` and `lag` history for the current time.
    /// Calling it twice for the same `t` integrates once.
    pub fn commit_integration(&mut self, time_step: f64) {
        if self.last_int_time != Some(self.t) {
            self.last_int_output += time_step * self.pending_int_input;
            self.last_int_time = Some(self.t);
        }
        self.last_diff_input = self.pending_diff_input;
        self.diff_initialized = true;

        let t = self.t;
        for lag in self.lags.iter_mut().filter(|l| l.armed) {
            if lag.last_commit == Some(t) {
                continue;
            }
            if lag.history.len() == LAG_BUFFER_SIZE {
                lag.history.pop_front();
            }
            lag.history.push_back((t, lag.pending));
            lag.last_commit = Some(t);
        }
    }

    /// Running integral as it will stand once this timestep commits.
    pub(crate) fn integrate(&mut self, input: f64, time_step: f64) -> f64 {
        self.pending_int_input = input;
        self.last_int_output + time_step * input
    }

    pub(crate) fn diff(&mut self, input: f64, time_step: f64) -> f64 {
        self.pending_diff_input = input;
        if !self.diff_initialized || time_step == 0.0 {
            return 0.0;
        }
        (input - self.last_diff_input) / time_step
    }

    /// Record a `lag` input and return the delayed value, or `None` when
    /// there is not enough history yet.
    pub(crate) fn lag(&mut self, slot: usize, input: f64, delay: f64) -> Option<f64> {
        let t = self.t;
        let lag = self.lags.get_mut(slot)?;
        lag.pending = input;
        lag.armed = true;
        let target = t - delay;
        if lag.history.is_empty() || target < 0.0 {
            return None;
        }
        Some(lag.value_at(target))
    }

    pub(crate) fn note_unresolved(&mut self, name: &str) {
        if !self.unresolved.contains(name) {
            self.unresolved.insert(name.to_string());
        }
    }

    /// Names that resolved to neither a computed value nor a labeled node.
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.unresolved.iter().map(String::as_str)
    }

    pub fn clear_unresolved(&mut self) {
        self.unresolved.clear();
    }

    /// Committed value of the running integral.
    pub fn integral(&self) -> f64 {
        self.last_int_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_integrate_idempotent_within_timestep() {
        let mut state = ExprState::new();
        let dt = 0.1;
        // Several sub-iterations with a changing input
        state.integrate(5.0, dt);
        state.integrate(3.0, dt);
        let preview = state.integrate(2.0, dt);
        assert_relative_eq!(preview, 0.2);

        state.commit_integration(dt);
        state.commit_integration(dt);
        assert_relative_eq!(state.integral(), 0.2);
    }

    #[test]
    fn test_diff_zero_until_initialized() {
        let mut state = ExprState::new();
        assert_eq!(state.diff(4.0, 0.5), 0.0);
        state.commit_integration(0.5);
        state.t = 0.5;
        assert_relative_eq!(state.diff(5.0, 0.5), 2.0);
    }

    #[test]
    fn test_lag_interpolates() {
        let mut state = ExprState::new();
        for step in 0..5 {
            state.t = step as f64;
            state.lag(0, 10.0 * step as f64, 1.5);
            state.commit_integration(1.0);
        }
        state.t = 5.0;
        // target 3.5 lies between samples at t=3 (30) and t=4 (40)
        let v = state.lag(0, 50.0, 1.5).unwrap();
        assert_relative_eq!(v, 35.0);
        // before history starts
        assert_eq!(state.lag(0, 50.0, 9.0), None);
    }

    #[test]
    fn test_reset_keeps_parameters() {
        let mut state = ExprState::new();
        state.values[0] = 3.0;
        state.update_last_values(7.0);
        state.reset();
        assert_eq!(state.values[0], 3.0);
        assert_eq!(state.last_values[0], 0.0);
        assert_eq!(state.last_output, 0.0);
    }
}
