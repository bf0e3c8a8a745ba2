//! MNA (Modified Nodal Analysis) solver and timestep driver.
//!
//! ## Modified Nodal Analysis
//!
//! MNA assembles a system of equations Ax = z where:
//! - x contains node voltages and voltage-source currents
//! - A is the conductance/coefficient matrix
//! - z is the source vector
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! where:
//! - G is the conductance matrix (node equations)
//! - B, C connect voltage sources to nodes
//! - D is usually 0 (for ideal voltage sources)
//! - v is the vector of node voltages (ground elided)
//! - j is the vector of voltage source currents
//! - i is the sum of current sources into each node
//! - e is the vector of voltage source values
//!
//! ## Timestep
//!
//! ```text
//! ASSEMBLING -> SOLVING -> CHECKING -> CONVERGED
//!                  ^           |    \-> ABORTED
//!                  '-----------'
//! ```
//!
//! The matrix is stamped once per topology. Each sub-iteration restores the
//! stamped base, lets every element write its right-hand side, and solves.
//! Elements clear the shared `converged` flag when their value moved more
//! than the [`ConvergencePolicy`] allows.

mod config;
mod context;
mod convergence;
mod iteration;
mod mna;
mod simulator;

pub use config::{AbortPolicy, SimulatorConfig};
pub use context::{FinishContext, SimClock, StampSession, StepContext, Variables};
pub use convergence::{ConvergencePolicy, Tolerance, ToleranceSchedule};
pub use iteration::{IterationOutcome, IterationState, SubIterationController};
pub use mna::MnaMatrix;
pub use simulator::{SimStatus, Simulator, StepOutcome};

/// Default simulated time per step (seconds).
pub const DEFAULT_TIME_STEP: f64 = 5e-6;

/// Maximum sub-iterations per timestep.
pub const DEFAULT_ITERATION_CAP: usize = 100;

/// Absolute floor of the convergence threshold.
pub const ABSOLUTE_TOLERANCE: f64 = 1e-6;

/// Pivots smaller than this make the matrix singular.
pub const MIN_PIVOT: f64 = 1e-15;

/// Resistance tying a floating node to ground.
pub const UNCONNECTED_NODE_RESISTANCE: f64 = 1e8;

pub(crate) const NONLINEAR_ROW_MISUSE: &str =
    "matrix entry written during a step on a row not marked nonlinear; ignored";
