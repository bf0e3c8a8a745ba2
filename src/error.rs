//! Error types for the flowsim circuit simulator.
//!
//! This module provides a unified error type [`SimError`] that covers the
//! error conditions that can occur while parsing expressions, loading circuit
//! files, analyzing topology and running the simulation.
//!
//! Many problems are deliberately *not* errors: malformed file tokens and
//! expressions are recovered with defaults, and a timestep that fails to
//! converge is reported through the simulator status.

use thiserror::Error;

use crate::circuit::ElementId;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Unified error type for all flowsim operations.
#[derive(Error, Debug)]
pub enum SimError {
    // ============ Expression Errors ============
    /// Error while tokenizing or parsing an expression
    #[error("Expression error at position {position} in '{source_text}': {message}")]
    ExpressionError {
        source_text: String,
        position: usize,
        message: String,
    },

    // ============ Circuit File Errors ============
    /// A line of a circuit file could not be interpreted
    #[error("Circuit file error at line {line}: {message}")]
    FileFormat { line: usize, message: String },

    /// Unknown element dump type
    #[error("Unknown element type '{dump_type}' at line {line}")]
    UnknownElementType { dump_type: String, line: usize },

    // ============ Topology Errors ============
    /// Element id does not exist in the circuit
    #[error("Element {id} not found in circuit")]
    ElementNotFound { id: ElementId },

    /// Two elements claim mastership of the same computed value
    #[error("Computed value '{key}' is claimed by both {master} and {claimant}")]
    MastershipConflict {
        key: String,
        master: ElementId,
        claimant: ElementId,
    },

    // ============ Simulation Errors ============
    /// Matrix is singular and cannot be solved
    #[error("Circuit cannot be solved: singular matrix (row {row})")]
    SingularMatrix { row: usize },

    /// Solve produced NaN or infinity
    #[error("Circuit cannot be solved: non-finite value in row {row}")]
    NonFiniteSolution { row: usize },

    /// Sub-iteration did not converge and the abort policy halts
    #[error("Convergence failed after {iterations} sub-iterations at t = {time:.6e}")]
    ConvergenceFailure { iterations: usize, time: f64 },

    /// Stepping was requested while the simulation is halted
    #[error("Simulation is halted: {message}")]
    Halted { message: String },

    // ============ Configuration Errors ============
    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },

    /// Configuration file could not be decoded
    #[error("Invalid configuration: {source}")]
    ConfigError {
        #[from]
        source: serde_json::Error,
    },

    // ============ I/O Errors ============
    /// Error reading a circuit or configuration file
    #[error("Failed to read file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error writing simulation output
    #[error("Output error: {message}")]
    OutputError { message: String },

    // ============ WASM Errors ============
    /// WASM-specific error
    #[cfg(feature = "wasm")]
    #[error("WASM error: {message}")]
    WasmError { message: String },
}

impl SimError {
    /// Create an expression error
    pub fn expression(source_text: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Self::ExpressionError {
            source_text: source_text.into(),
            position,
            message: message.into(),
        }
    }

    /// Create a circuit file error
    pub fn file_format(line: usize, message: impl Into<String>) -> Self {
        Self::FileFormat {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Create a convergence failure error
    pub fn convergence_failure(iterations: usize, time: f64) -> Self {
        Self::ConvergenceFailure { iterations, time }
    }

    /// Whether the error means the matrix could not be solved.
    pub fn is_unsolvable(&self) -> bool {
        matches!(
            self,
            Self::SingularMatrix { .. } | Self::NonFiniteSolution { .. }
        )
    }
}
