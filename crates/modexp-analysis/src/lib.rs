//! modexp-analysis crate
//!
//! Gas pricing of ModExp precompile calls under EIP-2565 and EIP-7883,
//! dataset-wide impact aggregation, usage patterns and entity projections.

pub mod aggregate;
pub mod call;
pub mod entity;
pub mod gas;
pub mod patterns;
pub mod projection;
pub mod stats;

pub use aggregate::{ImpactAggregator, ImpactReport, SummaryStats};
pub use call::{CostedCall, InvalidRecord, ModExpCall, RecordLimits};
pub use gas::{compute_costs, GasInput, GasSchedule};
