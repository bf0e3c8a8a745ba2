//! Shared registries lent to elements during stamping and stepping.
//!
//! The registries are owned by the simulator and passed explicitly into the
//! element callbacks; nothing here is global.

mod computed;
mod labels;
mod stocks;

pub use computed::{ComputedEntry, ComputedValues, MastershipConflict};
pub use labels::{LabelEntry, LabeledNodes};
pub use stocks::{StockRegistry, StockSite};
