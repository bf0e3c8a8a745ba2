//! MNA matrix assembly and solving.

use crate::circuit::{NodeId, VarIndex, VoltageSourceId};
use crate::error::{Result, SimError};

use super::{MIN_PIVOT, NONLINEAR_ROW_MISUSE};

/// MNA matrix system Ax = z.
///
/// The matrix is stamped once per topology. That state is kept as the *base*;
/// every sub-iteration starts from the base again, adds its per-step
/// contributions and solves. The LU factorization of the base is reused as
/// long as no step touches matrix entries.
#[derive(Debug)]
pub struct MnaMatrix {
    /// System matrix A (row-major)
    pub a: Vec<f64>,
    /// Source vector z
    pub z: Vec<f64>,
    /// Solution vector x
    pub x: Vec<f64>,
    /// Matrix dimension
    pub size: usize,
    /// Node count including ground
    pub num_nodes: usize,
    /// LU decomposition of A (for efficient solving)
    pub lu: Vec<f64>,
    /// Pivot indices for LU decomposition
    pub pivots: Vec<usize>,
    base_a: Vec<f64>,
    base_z: Vec<f64>,
    nonlinear_rows: Vec<bool>,
    /// Per-step matrix entries were added since the last restore
    matrix_touched: bool,
    /// `lu` matches `a`
    factored: bool,
}

impl MnaMatrix {
    /// Create a matrix for `num_nodes` nodes (including ground) and
    /// `num_voltage_sources` voltage-source slots.
    pub fn new(num_nodes: usize, num_voltage_sources: usize) -> Self {
        let size = num_nodes.saturating_sub(1) + num_voltage_sources;
        Self {
            a: vec![0.0; size * size],
            z: vec![0.0; size],
            x: vec![0.0; size],
            size,
            num_nodes,
            lu: vec![0.0; size * size],
            pivots: vec![0; size],
            base_a: vec![0.0; size * size],
            base_z: vec![0.0; size],
            nonlinear_rows: vec![false; size],
            matrix_touched: false,
            factored: false,
        }
    }

    /// Row of a node, `None` for ground.
    pub fn node_row(&self, node: NodeId) -> Option<usize> {
        VarIndex::Voltage(node).to_row(self.num_nodes)
    }

    /// Row of a voltage-source slot.
    pub fn source_row(&self, vs: VoltageSourceId) -> usize {
        self.num_nodes.saturating_sub(1) + vs.0
    }

    /// Get matrix element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.a[row * self.size + col]
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] += value;
        self.factored = false;
    }

    /// Add to source vector element.
    pub fn add_source(&mut self, row: usize, value: f64) {
        self.z[row] += value;
    }

    /// Mark a row as rewritten every sub-iteration.
    pub fn mark_nonlinear(&mut self, row: usize) {
        self.nonlinear_rows[row] = true;
    }

    pub fn is_nonlinear_row(&self, row: usize) -> bool {
        self.nonlinear_rows.get(row).copied().unwrap_or(false)
    }

    /// Add a per-step matrix entry. Only rows marked nonlinear accept them;
    /// anything else would silently alter the stamped structure.
    pub fn add_step_entry(&mut self, row: usize, col: usize, value: f64) -> bool {
        if !self.is_nonlinear_row(row) {
            tracing::warn!(row, col, "{}", NONLINEAR_ROW_MISUSE);
            return false;
        }
        self.add(row, col, value);
        self.matrix_touched = true;
        true
    }

    /// Freeze the stamped state as the base for every later sub-iteration.
    pub fn commit_base(&mut self) {
        self.base_a.copy_from_slice(&self.a);
        self.base_z.copy_from_slice(&self.z);
        self.matrix_touched = false;
        self.factored = false;
    }

    /// Return to the stamped base before a new sub-iteration.
    pub fn restore_base(&mut self) {
        self.z.copy_from_slice(&self.base_z);
        if self.matrix_touched {
            self.a.copy_from_slice(&self.base_a);
            self.matrix_touched = false;
            self.factored = false;
        }
    }

    /// Conductance `g` between two rows; `None` is ground.
    pub fn stamp_conductance(&mut self, n1: Option<usize>, n2: Option<usize>, g: f64) {
        for (row, col, sign) in [(n1, n1, 1.0), (n2, n2, 1.0), (n1, n2, -1.0), (n2, n1, -1.0)] {
            if let (Some(r), Some(c)) = (row, col) {
                self.add(r, c, sign * g);
            }
        }
    }

    /// `V(pos) - V(neg) = voltage`, with the source current in row `br`.
    pub fn stamp_voltage_source(&mut self, n_pos: Option<usize>, n_neg: Option<usize>, br: usize, voltage: f64) {
        for (node, sign) in [(n_pos, 1.0), (n_neg, -1.0)] {
            if let Some(i) = node {
                self.add(br, i, sign);
                self.add(i, br, sign);
            }
        }
        self.z[br] = voltage;
    }

    /// `current` leaves `n_pos` and enters `n_neg`.
    pub fn stamp_current_source(&mut self, n_pos: Option<usize>, n_neg: Option<usize>, current: f64) {
        if let Some(i) = n_pos {
            self.add_source(i, -current);
        }
        if let Some(j) = n_neg {
            self.add_source(j, current);
        }
    }

    /// Extend source row `br` to
    /// `V(out+) - V(out-) - gain * (V(ctrl+) - V(ctrl-)) = z[br]`.
    pub fn stamp_vcvs_control(&mut self, n_ctrl_pos: Option<usize>, n_ctrl_neg: Option<usize>, br: usize, gain: f64) {
        for (node, sign) in [(n_ctrl_pos, -1.0), (n_ctrl_neg, 1.0)] {
            if let Some(i) = node {
                self.add(br, i, sign * gain);
            }
        }
    }

    /// Current `gm * (V(ctrl+) - V(ctrl-))` out of `out+` into `out-`.
    pub fn stamp_vccs(
        &mut self,
        (n_out_pos, n_out_neg): (Option<usize>, Option<usize>),
        (n_ctrl_pos, n_ctrl_neg): (Option<usize>, Option<usize>),
        gm: f64,
    ) {
        for (row, row_sign) in [(n_out_pos, 1.0), (n_out_neg, -1.0)] {
            for (col, col_sign) in [(n_ctrl_pos, 1.0), (n_ctrl_neg, -1.0)] {
                if let (Some(r), Some(c)) = (row, col) {
                    self.add(r, c, row_sign * col_sign * gm);
                }
            }
        }
    }

    /// Factor unless the current factorization is still valid.
    /// Returns whether a factorization was computed.
    pub fn ensure_factored(&mut self) -> Result<bool> {
        if self.factored {
            return Ok(false);
        }
        self.factor()?;
        Ok(true)
    }

    /// In-place LU factorization with partial pivoting.
    ///
    /// `lu` holds U on and above the diagonal and the multipliers of L
    /// below it; `pivots[i]` is the row of `a` that ended up in row `i`.
    pub fn factor(&mut self) -> Result<()> {
        let n = self.size;
        if let Some(row) = self.a.chunks(n.max(1)).take(n).position(|r| r.iter().all(|&v| v == 0.0)) {
            return Err(SimError::SingularMatrix { row });
        }

        self.lu.copy_from_slice(&self.a);
        self.pivots.iter_mut().enumerate().for_each(|(i, p)| *p = i);

        for k in 0..n {
            let (pivot_row, magnitude) = (k..n)
                .map(|i| (i, self.lu[i * n + k].abs()))
                .fold((k, 0.0), |best, cand| if cand.1 > best.1 { cand } else { best });
            if magnitude < MIN_PIVOT {
                return Err(SimError::SingularMatrix { row: k });
            }
            if pivot_row != k {
                self.pivots.swap(k, pivot_row);
                let (upper, lower) = self.lu.split_at_mut(pivot_row * n);
                upper[k * n..(k + 1) * n].swap_with_slice(&mut lower[..n]);
            }

            let (done, rest) = self.lu.split_at_mut((k + 1) * n);
            let pivot = &done[k * n..];
            for row in rest.chunks_mut(n) {
                let m = row[k] / pivot[k];
                row[k] = m;
                if m != 0.0 {
                    for (x, &u) in row[k + 1..].iter_mut().zip(&pivot[k + 1..]) {
                        *x -= m * u;
                    }
                }
            }
        }

        self.factored = true;
        Ok(())
    }

    /// Solve for `x` with the current factorization and `z`.
    pub fn solve(&mut self) -> Result<()> {
        let n = self.size;
        for (x, &p) in self.x.iter_mut().zip(&self.pivots) {
            *x = self.z[p];
        }

        for i in 0..n {
            let row = &self.lu[i * n..i * n + i];
            let sum: f64 = row.iter().zip(&self.x[..i]).map(|(l, y)| l * y).sum();
            self.x[i] -= sum;
        }
        for i in (0..n).rev() {
            let row = &self.lu[i * n..(i + 1) * n];
            let sum: f64 = row[i + 1..].iter().zip(&self.x[i + 1..]).map(|(u, x)| u * x).sum();
            if row[i].abs() < MIN_PIVOT {
                return Err(SimError::SingularMatrix { row: i });
            }
            self.x[i] = (self.x[i] - sum) / row[i];
        }

        match self.x.iter().position(|v| !v.is_finite()) {
            Some(row) => Err(SimError::NonFiniteSolution { row }),
            None => Ok(()),
        }
    }

    /// Get the voltage at a node (ground reads 0).
    pub fn voltage(&self, node: NodeId) -> f64 {
        self.node_row(node).map(|i| self.x[i]).unwrap_or(0.0)
    }

    /// Current through a voltage-source slot.
    pub fn source_current(&self, vs: VoltageSourceId) -> f64 {
        self.x.get(self.source_row(vs)).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_divider_solve() {
        // 10 V source on node 1, 1k from 1 to 2, 1k from 2 to ground
        let mut m = MnaMatrix::new(3, 1);
        let br = m.source_row(VoltageSourceId(0));
        m.stamp_voltage_source(Some(0), None, br, 10.0);
        m.stamp_conductance(Some(0), Some(1), 1e-3);
        m.stamp_conductance(Some(1), None, 1e-3);
        m.commit_base();
        m.factor().unwrap();
        m.solve().unwrap();

        assert_relative_eq!(m.voltage(NodeId(1)), 10.0, epsilon = 1e-9);
        assert_relative_eq!(m.voltage(NodeId(2)), 5.0, epsilon = 1e-9);
        assert_relative_eq!(m.source_current(VoltageSourceId(0)), -5e-3, epsilon = 1e-12);
        assert_eq!(m.voltage(NodeId::GROUND), 0.0);
    }

    #[test]
    fn test_vccs_drives_load() {
        // 2 V on node 1 controls 1e-3 * V1 into node 2 across 1k to ground
        let mut m = MnaMatrix::new(3, 1);
        let br = m.source_row(VoltageSourceId(0));
        m.stamp_voltage_source(Some(0), None, br, 2.0);
        m.stamp_conductance(Some(1), None, 1e-3);
        m.stamp_vccs((None, Some(1)), (Some(0), None), 1e-3);
        m.factor().unwrap();
        m.solve().unwrap();
        assert_relative_eq!(m.voltage(NodeId(2)), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_zero_row() {
        let mut m = MnaMatrix::new(3, 0);
        m.stamp_conductance(Some(0), None, 1.0);
        let err = m.factor().unwrap_err();
        assert!(matches!(err, SimError::SingularMatrix { row: 1 }));
    }

    #[test]
    fn test_singular_dependent_rows() {
        // Two nodes joined by a conductance and nothing else
        let mut m = MnaMatrix::new(3, 0);
        m.stamp_conductance(Some(0), Some(1), 1.0);
        assert!(m.factor().unwrap_err().is_unsolvable());
    }

    #[test]
    fn test_restore_keeps_factorization_for_rhs_changes() {
        let mut m = MnaMatrix::new(2, 1);
        let br = m.source_row(VoltageSourceId(0));
        m.stamp_voltage_source(Some(0), None, br, 0.0);
        m.stamp_conductance(Some(0), None, 1.0);
        m.mark_nonlinear(br);
        m.commit_base();
        assert!(m.ensure_factored().unwrap());

        m.restore_base();
        m.add_source(br, 3.0);
        assert!(!m.ensure_factored().unwrap());
        m.solve().unwrap();
        assert_relative_eq!(m.voltage(NodeId(1)), 3.0);
    }

    #[test]
    fn test_step_entries_force_refactor_and_are_undone() {
        let mut m = MnaMatrix::new(2, 1);
        let br = m.source_row(VoltageSourceId(0));
        m.stamp_voltage_source(Some(0), None, br, 0.0);
        m.stamp_conductance(Some(0), None, 1.0);
        m.mark_nonlinear(br);
        m.commit_base();
        m.ensure_factored().unwrap();

        m.restore_base();
        assert!(m.add_step_entry(br, 0, 0.5));
        assert!(m.ensure_factored().unwrap());
        assert_relative_eq!(m.get(br, 0), 1.5);

        m.restore_base();
        assert_relative_eq!(m.get(br, 0), 1.0);
        assert!(m.ensure_factored().unwrap());
    }

    #[test]
    fn test_step_entries_rejected_on_linear_rows() {
        let mut m = MnaMatrix::new(2, 0);
        m.stamp_conductance(Some(0), None, 1.0);
        m.commit_base();
        assert!(!m.add_step_entry(0, 0, 1.0));
        assert_relative_eq!(m.get(0, 0), 1.0);
    }
}
