//! # Flowsim Core
//!
//! A circuit simulation core for models that mix electrical elements with
//! named computed values: equation sources, integrators, equation tables and
//! stock tables.
//!
//! This library provides:
//! - An expression language for element equations
//! - Modified Nodal Analysis (MNA) with a reusable LU factorization
//! - A bounded fixed-point loop for nonlinear and expression elements
//! - Registries for computed values and labeled nodes
//! - A line-oriented circuit file format and SFCR model text
//!
//! ## Architecture
//!
//! - [`expr`] - Expression lexer, parser and evaluator
//! - [`circuit`] - Element list, topology analysis, circuit files and SFCR text
//! - [`elements`] - The element trait and every element kind
//! - [`registry`] - Computed-value, labeled-node and stock registries
//! - [`solver`] - MNA matrix, sub-iteration controller and timestep driver
//!
//! ## Usage
//!
//! ### Native CLI
//!
//! ```bash
//! flowsim model.txt --steps 1000 --watch GDP --watch vin > out.csv
//! ```
//!
//! ### Library
//!
//! ```rust,ignore
//! let loaded = flowsim_core::circuit::load(&text);
//! let mut sim = Simulator::from_loaded(loaded, SimulatorConfig::default())?;
//! sim.run_for(100)?;
//! println!("{:?}", sim.computed_value("GDP"));
//! ```
//!
//! ## Simulation Method
//!
//! Every timestep:
//!
//! 1. Re-analyze and re-stamp if the circuit was edited
//! 2. Restore the stamped system, let every element write its step
//!    contribution, solve
//! 3. Repeat step 2 until every element reports its value settled, or the
//!    iteration cap is reached
//! 4. Let every element commit its history, then advance time

pub mod circuit;
pub mod elements;
pub mod error;
pub mod expr;
pub mod registry;
pub mod solver;

// Re-export main types for convenience
pub use circuit::Circuit;
pub use error::{Result, SimError};
pub use solver::{Simulator, SimulatorConfig};

// WASM bindings
#[cfg(feature = "wasm")]
mod wasm;

#[cfg(feature = "wasm")]
pub use wasm::WasmSimulator;

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` overrides `level` when set.
#[cfg(feature = "cli")]
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
