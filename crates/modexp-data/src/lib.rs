//! modexp-data crate

pub mod loader;
pub mod store;
pub mod types;

pub use types::{CallRecord, RawCall, RunRecord, RunTotals, TxMetadata};
