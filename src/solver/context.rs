//! Objects lent to elements while stamping, stepping and committing.
//!
//! Elements never hold the matrix or the registries. The simulator builds a
//! short-lived context for every call, which keeps one-time structural stamps
//! ([`StampSession`]) apart from per-sub-iteration writes ([`StepContext`])
//! and end-of-step commits ([`FinishContext`]).

use crate::circuit::{ElementId, NodeId, VarIndex, VoltageSourceId};
use crate::expr::VariableSource;
use crate::registry::{ComputedValues, LabeledNodes};

use super::convergence::{ConvergencePolicy, Tolerance};
use super::mna::MnaMatrix;

/// Global simulation clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimClock {
    /// Simulated time of the step being solved
    pub t: f64,
    pub time_step: f64,
    /// Committed timesteps since reset
    pub time_step_count: u64,
    /// Sub-iteration index within the current timestep
    pub sub_iterations: usize,
}

impl SimClock {
    pub fn new(time_step: f64) -> Self {
        Self {
            t: 0.0,
            time_step,
            time_step_count: 0,
            sub_iterations: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.time_step);
    }

    /// Move to the next timestep.
    pub fn advance(&mut self) {
        self.t += self.time_step;
        self.time_step_count += 1;
        self.sub_iterations = 0;
    }
}

/// Name lookups for expressions: computed values, then labeled node voltages.
#[derive(Clone, Copy)]
pub struct Variables<'a> {
    computed: &'a ComputedValues,
    labels: &'a LabeledNodes,
    matrix: &'a MnaMatrix,
}

impl<'a> Variables<'a> {
    pub fn new(computed: &'a ComputedValues, labels: &'a LabeledNodes, matrix: &'a MnaMatrix) -> Self {
        Self {
            computed,
            labels,
            matrix,
        }
    }
}

impl VariableSource for Variables<'_> {
    fn computed_value(&self, name: &str) -> Option<f64> {
        self.computed.get_computed_value(name)
    }

    fn converged_value(&self, name: &str) -> Option<f64> {
        self.computed.get_converged_value(name)
    }

    fn labeled_voltage(&self, label: &str) -> Option<f64> {
        self.labels.get_by_name(label).map(|node| self.matrix.voltage(node))
    }
}

/// Structural stamping, once per topology.
pub struct StampSession<'a> {
    matrix: &'a mut MnaMatrix,
    time_step: f64,
}

impl<'a> StampSession<'a> {
    pub fn new(matrix: &'a mut MnaMatrix, time_step: f64) -> Self {
        Self { matrix, time_step }
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    fn row(&self, var: impl Into<VarIndex>) -> Option<usize> {
        var.into().to_row(self.matrix.num_nodes)
    }

    pub fn stamp_resistor(&mut self, n1: NodeId, n2: NodeId, resistance: f64) {
        self.stamp_conductance(n1, n2, 1.0 / resistance);
    }

    pub fn stamp_conductance(&mut self, n1: NodeId, n2: NodeId, g: f64) {
        let (r1, r2) = (self.row(n1), self.row(n2));
        self.matrix.stamp_conductance(r1, r2, g);
    }

    /// Force `V(pos) - V(neg) = voltage` using slot `vs`.
    pub fn stamp_voltage_source(&mut self, pos: NodeId, neg: NodeId, vs: VoltageSourceId, voltage: f64) {
        let (rp, rn) = (self.row(pos), self.row(neg));
        let br = self.matrix.source_row(vs);
        self.matrix.stamp_voltage_source(rp, rn, br, voltage);
    }

    /// Make slot `vs` track `gain * (V(ctrl_pos) - V(ctrl_neg))`. The slot
    /// must already be stamped as a voltage source.
    pub fn stamp_vcvs(&mut self, ctrl_pos: NodeId, ctrl_neg: NodeId, gain: f64, vs: VoltageSourceId) {
        let (rp, rn) = (self.row(ctrl_pos), self.row(ctrl_neg));
        let br = self.matrix.source_row(vs);
        self.matrix.stamp_vcvs_control(rp, rn, br, gain);
    }

    /// Current `gm * (V(ctrl_pos) - V(ctrl_neg))` from `out_pos` to `out_neg`.
    pub fn stamp_vccs(&mut self, out: (NodeId, NodeId), ctrl: (NodeId, NodeId), gm: f64) {
        let out_rows = (self.row(out.0), self.row(out.1));
        let ctrl_rows = (self.row(ctrl.0), self.row(ctrl.1));
        self.matrix.stamp_vccs(out_rows, ctrl_rows, gm);
    }

    pub fn stamp_current_source(&mut self, pos: NodeId, neg: NodeId, current: f64) {
        let (rp, rn) = (self.row(pos), self.row(neg));
        self.matrix.stamp_current_source(rp, rn, current);
    }

    /// Mark a row as rewritten every sub-iteration.
    pub fn stamp_nonlinear(&mut self, var: impl Into<VarIndex>) {
        if let Some(row) = self.row(var) {
            self.matrix.mark_nonlinear(row);
        }
    }

    pub fn stamp_right_side(&mut self, var: impl Into<VarIndex>, value: f64) {
        if let Some(row) = self.row(var) {
            self.matrix.add_source(row, value);
        }
    }

    pub fn stamp_matrix(&mut self, row: impl Into<VarIndex>, col: impl Into<VarIndex>, value: f64) {
        if let (Some(r), Some(c)) = (self.row(row), self.row(col)) {
            self.matrix.add(r, c, value);
        }
    }
}

/// Everything an element may touch during one sub-iteration.
pub struct StepContext<'a> {
    matrix: &'a mut MnaMatrix,
    clock: &'a SimClock,
    policy: &'a ConvergencePolicy,
    converged: &'a mut bool,
    computed: &'a mut ComputedValues,
    labels: &'a LabeledNodes,
    element: ElementId,
}

impl<'a> StepContext<'a> {
    pub fn new(
        matrix: &'a mut MnaMatrix,
        clock: &'a SimClock,
        policy: &'a ConvergencePolicy,
        converged: &'a mut bool,
        computed: &'a mut ComputedValues,
        labels: &'a LabeledNodes,
        element: ElementId,
    ) -> Self {
        Self {
            matrix,
            clock,
            policy,
            converged,
            computed,
            labels,
            element,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock.t
    }

    pub fn time_step(&self) -> f64 {
        self.clock.time_step
    }

    pub fn time_step_count(&self) -> u64 {
        self.clock.time_step_count
    }

    pub fn sub_iterations(&self) -> usize {
        self.clock.sub_iterations
    }

    pub fn policy(&self) -> &ConvergencePolicy {
        self.policy
    }

    /// Add to the right-hand side. Any row may change between sub-iterations.
    pub fn stamp_right_side(&mut self, var: impl Into<VarIndex>, value: f64) {
        if let Some(row) = var.into().to_row(self.matrix.num_nodes) {
            self.matrix.add_source(row, value);
        }
    }

    /// Set the value a voltage-source slot forces.
    pub fn update_voltage_source(&mut self, vs: VoltageSourceId, voltage: f64) {
        let row = self.matrix.source_row(vs);
        self.matrix.z[row] = voltage;
    }

    /// Add a matrix entry for this sub-iteration only. Rejected unless the
    /// row was stamped nonlinear.
    pub fn stamp_matrix(&mut self, row: impl Into<VarIndex>, col: impl Into<VarIndex>, value: f64) -> bool {
        let n = self.matrix.num_nodes;
        match (row.into().to_row(n), col.into().to_row(n)) {
            (Some(r), Some(c)) => self.matrix.add_step_entry(r, c, value),
            _ => false,
        }
    }

    /// Compare against the previous sub-iteration's value; clears the
    /// converged flag and returns false when it moved too far.
    pub fn check_convergence(&mut self, new: f64, old: f64, tolerance: Tolerance) -> bool {
        if self
            .policy
            .is_unconverged(new, old, tolerance, self.clock.sub_iterations)
        {
            *self.converged = false;
            return false;
        }
        true
    }

    pub fn mark_unconverged(&mut self) {
        *self.converged = false;
    }

    /// Voltage of `node` from the last solve.
    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.matrix.voltage(node)
    }

    /// Publish a computed value. Returns false when another element owns the key.
    pub fn set_computed_value(&mut self, key: &str, value: f64) -> bool {
        let ok = self.computed.set_computed_value(key, value, self.element).is_ok();
        if ok {
            self.computed.mark_computed_this_step(key);
        }
        ok
    }

    pub fn computed(&self) -> &ComputedValues {
        self.computed
    }

    pub fn variables(&self) -> Variables<'_> {
        Variables::new(self.computed, self.labels, self.matrix)
    }
}

/// Everything an element may touch while committing a finished timestep.
pub struct FinishContext<'a> {
    matrix: &'a MnaMatrix,
    clock: &'a SimClock,
    computed: &'a mut ComputedValues,
    labels: &'a LabeledNodes,
    stop: &'a mut Option<String>,
    element: ElementId,
    step_converged: bool,
}

impl<'a> FinishContext<'a> {
    pub fn new(
        matrix: &'a MnaMatrix,
        clock: &'a SimClock,
        computed: &'a mut ComputedValues,
        labels: &'a LabeledNodes,
        stop: &'a mut Option<String>,
        element: ElementId,
        step_converged: bool,
    ) -> Self {
        Self {
            matrix,
            clock,
            computed,
            labels,
            stop,
            element,
            step_converged,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock.t
    }

    pub fn time_step(&self) -> f64 {
        self.clock.time_step
    }

    pub fn time_step_count(&self) -> u64 {
        self.clock.time_step_count
    }

    /// False when the step is being committed after an abort.
    pub fn step_converged(&self) -> bool {
        self.step_converged
    }

    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.matrix.voltage(node)
    }

    pub fn set_computed_value(&mut self, key: &str, value: f64) -> bool {
        let ok = self.computed.set_computed_value(key, value, self.element).is_ok();
        if ok {
            self.computed.mark_computed_this_step(key);
        }
        ok
    }

    /// Ask the simulator to stop once this timestep is committed.
    pub fn request_stop(&mut self, message: impl Into<String>) {
        if self.stop.is_none() {
            *self.stop = Some(message.into());
        }
    }

    pub fn variables(&self) -> Variables<'_> {
        Variables::new(self.computed, self.labels, self.matrix)
    }
}
