//! Core types for circuit representation.

use std::fmt;

/// Grid spacing used to lay out chip pins.
pub const GRID_SIZE: i32 = 16;

/// A unique identifier for a node in the circuit.
/// Node 0 is always ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The ground node (always index 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Check if this is the ground node.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "N{}", self.0)
        }
    }
}

/// A stable identifier for an element, independent of its position in the
/// element list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub usize);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Index of a voltage-source slot (an extra unknown in the MNA system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VoltageSourceId(pub usize);

impl fmt::Display for VoltageSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// A grid coordinate. Posts at the same point are electrically connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Variable index in the MNA solution vector.
/// Can be either a node voltage or a voltage-source current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarIndex {
    /// Node voltage variable
    Voltage(NodeId),
    /// Voltage source current variable
    Current(VoltageSourceId),
}

impl VarIndex {
    /// Get the raw row in the solution vector, or `None` for ground.
    /// Node voltages come first (excluding ground), then source currents.
    pub fn to_row(&self, num_nodes: usize) -> Option<usize> {
        match self {
            // Node 0 (ground) is not in the matrix
            VarIndex::Voltage(NodeId(0)) => None,
            VarIndex::Voltage(NodeId(n)) => Some(n - 1),
            VarIndex::Current(VoltageSourceId(v)) => Some(num_nodes.saturating_sub(1) + v),
        }
    }
}

impl From<NodeId> for VarIndex {
    fn from(node: NodeId) -> Self {
        VarIndex::Voltage(node)
    }
}

impl From<VoltageSourceId> for VarIndex {
    fn from(vs: VoltageSourceId) -> Self {
        VarIndex::Current(vs)
    }
}
