//! Circuit representation, topology analysis and file format.
//!
//! A [`Circuit`] is an ordered list of elements placed on a grid. Analysis
//! turns post coordinates into node numbers and voltage-source slots; the
//! file module reads and writes the line-oriented circuit format, and the
//! sfcr module the block-structured model format.

mod file;
mod graph;
mod sfcr;
mod tokens;
mod types;

pub use file::{dump, load, load_file, load_model, FileOptions, LoadedCircuit};
pub use sfcr::{dump_sfcr, is_sfcr, load_sfcr, ModelNotes};
pub use graph::{Circuit, Topology};
pub use tokens::{escape, unescape, Tokens};
pub use types::*;
