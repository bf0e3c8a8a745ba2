//! State shared by every element.

use crate::circuit::{ElementId, NodeId, Point, VoltageSourceId, GRID_SIZE};
use crate::solver::{StampSession, StepContext, Tolerance};

/// Geometry, flags and per-post solution state common to all elements.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementCore {
    /// Assigned when the element joins a circuit
    pub id: ElementId,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub flags: u32,
    /// Node of each post, filled by topology analysis
    pub nodes: Vec<NodeId>,
    /// Voltage of each post from the last solve
    pub volts: Vec<f64>,
    pub voltage_sources: Vec<VoltageSourceId>,
    /// Current through each voltage-source slot from the last solve
    pub currents: Vec<f64>,
}

impl ElementCore {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, flags: u32) -> Self {
        Self {
            id: ElementId(0),
            x1,
            y1,
            x2,
            y2,
            flags,
            nodes: Vec::new(),
            volts: Vec::new(),
            voltage_sources: Vec::new(),
            currents: Vec::new(),
        }
    }

    /// Core spanning two points.
    pub fn between(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x, b.y, 0)
    }

    pub fn p1(&self) -> Point {
        Point::new(self.x1, self.y1)
    }

    pub fn p2(&self) -> Point {
        Point::new(self.x2, self.y2)
    }

    /// Input pin `i` of a chip: one grid step below the previous one.
    pub fn chip_input(&self, i: usize) -> Point {
        Point::new(self.x1, self.y1 + GRID_SIZE * i as i32)
    }

    /// Post `n` of a chip with `inputs` input pins; the last post is the output.
    pub fn chip_post(&self, inputs: usize, n: usize) -> Point {
        if n >= inputs {
            self.p2()
        } else {
            self.chip_input(n)
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Size the per-post and per-slot vectors for a new topology.
    pub fn allocate(&mut self, posts: usize, sources: usize) {
        self.nodes.clear();
        self.nodes.resize(posts, NodeId::GROUND);
        self.volts.clear();
        self.volts.resize(posts, 0.0);
        self.voltage_sources.clear();
        self.voltage_sources.resize(sources, VoltageSourceId::default());
        self.currents.clear();
        self.currents.resize(sources, 0.0);
    }

    /// Node of post `i`, ground when unassigned.
    pub fn node(&self, i: usize) -> NodeId {
        self.nodes.get(i).copied().unwrap_or(NodeId::GROUND)
    }

    pub fn volt(&self, i: usize) -> f64 {
        self.volts.get(i).copied().unwrap_or(0.0)
    }

    pub fn source(&self, i: usize) -> VoltageSourceId {
        self.voltage_sources.get(i).copied().unwrap_or_default()
    }

    pub fn current(&self, i: usize) -> f64 {
        self.currents.get(i).copied().unwrap_or(0.0)
    }

    /// Forget solved voltages and currents.
    pub fn reset_state(&mut self) {
        self.volts.fill(0.0);
        self.currents.fill(0.0);
    }
}

/// An output pin held at a value recomputed every sub-iteration.
///
/// The pin is a voltage source to ground whose row is nonlinear; each
/// sub-iteration writes the target into the right-hand side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrivenOutput {
    /// Target written by the previous sub-iteration
    pub last_target: f64,
}

impl DrivenOutput {
    pub fn stamp(session: &mut StampSession<'_>, out: NodeId, vs: VoltageSourceId) {
        session.stamp_nonlinear(vs);
        session.stamp_voltage_source(out, NodeId::GROUND, vs, 0.0);
    }

    /// Write `target`, comparing the pin's present voltage against it.
    pub fn drive(&mut self, ctx: &mut StepContext<'_>, vs: VoltageSourceId, pin_volts: f64, target: f64, tolerance: Tolerance) {
        ctx.check_convergence(target, pin_volts, tolerance);
        self.last_target = target;
        ctx.stamp_right_side(vs, target);
    }

    /// Like [`drive`](Self::drive), and also require the target itself to
    /// have settled since the previous sub-iteration.
    pub fn drive_settled(
        &mut self,
        ctx: &mut StepContext<'_>,
        vs: VoltageSourceId,
        pin_volts: f64,
        target: f64,
        tolerance: Tolerance,
    ) {
        ctx.check_convergence(target, self.last_target, Tolerance::Scheduled);
        self.drive(ctx, vs, pin_volts, target, tolerance);
    }
}

/// `1.5 V`, `-2e-6 V`
pub fn voltage_text(v: f64) -> String {
    format!("{} V", number_text(v))
}

pub fn current_text(i: f64) -> String {
    format!("{} A", number_text(i))
}

/// Short human-readable number.
pub fn number_text(v: f64) -> String {
    let a = v.abs();
    if a != 0.0 && !(1e-3..1e6).contains(&a) {
        format!("{:.3e}", v)
    } else {
        let s = format!("{:.4}", v);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        if s == "-0" {
            "0".to_string()
        } else {
            s.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_pins_follow_grid() {
        let core = ElementCore::new(10, 20, 90, 20, 0);
        assert_eq!(core.chip_input(0), Point::new(10, 20));
        assert_eq!(core.chip_input(2), Point::new(10, 52));
        assert_eq!(core.p2(), Point::new(90, 20));
    }

    #[test]
    fn test_unallocated_reads_default() {
        let mut core = ElementCore::new(0, 0, 0, 0, 0);
        assert_eq!(core.node(3), NodeId::GROUND);
        assert_eq!(core.volt(1), 0.0);
        core.allocate(2, 1);
        assert_eq!(core.nodes.len(), 2);
        assert_eq!(core.currents.len(), 1);
    }

    #[test]
    fn test_number_text() {
        assert_eq!(number_text(1.5), "1.5");
        assert_eq!(number_text(0.0), "0");
        assert_eq!(number_text(-0.00001), "-1.000e-5");
        assert_eq!(voltage_text(2.0), "2 V");
    }
}
