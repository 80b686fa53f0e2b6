//! Type definitions for ModExp call data.

use serde::{Deserialize, Serialize};

/// One ModExp precompile call as read from a per-block parquet file.
///
/// Every column is optional at this stage so that rows with missing
/// required fields can be counted and rejected during validation instead
/// of being silently defaulted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCall {
    /// Block number (taken from the parquet file stem).
    pub block_number: u64,
    /// Transaction hash (hex text with 0x prefix).
    pub tx_hash: Option<String>,
    /// Declared base length in bytes (`Bsize`).
    pub base_size: Option<i64>,
    /// Declared exponent length in bytes (`Esize`).
    pub exponent_size: Option<i64>,
    /// Declared modulus length in bytes (`Msize`).
    pub modulus_size: Option<i64>,
    /// Exponent value as hex text (`E`). An empty string means zero.
    pub exponent: Option<String>,
    /// Gas charged on-chain under the current schedule (`gas_costs`).
    pub recorded_cost: Option<i64>,
    /// Transaction sender (hex text).
    pub from_address: Option<String>,
    /// Contract called by the transaction (hex text).
    pub to_address: Option<String>,
    /// Gas price in Wei (decimal or 0x-prefixed hex text).
    pub gas_price: Option<String>,
}

/// Transaction metadata used to attribute calls to senders and contracts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetadata {
    /// Transaction hash (hex text).
    pub tx_hash: String,
    /// Sender address (hex text).
    pub from_address: Option<String>,
    /// Recipient address (hex text).
    pub to_address: Option<String>,
    /// Gas price in Wei (decimal or hex text).
    pub gas_price: Option<String>,
}

/// Analyzed call persisted in SQLite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Block number.
    pub block_number: u64,
    /// Transaction hash (lowercase hex with 0x prefix).
    pub tx_hash: String,
    /// Sender address (lowercase hex with 0x prefix), if known.
    pub from_address: Option<String>,
    /// Contract address (lowercase hex with 0x prefix), if known.
    pub to_address: Option<String>,
    /// Base length in bytes.
    pub base_size: u64,
    /// Exponent length in bytes.
    pub exponent_size: u64,
    /// Modulus length in bytes.
    pub modulus_size: u64,
    /// Significant exponent bytes (hex with 0x prefix, `0x` for zero).
    pub exponent: String,
    /// Upstream recorded cost, if the dataset carried one.
    pub recorded_cost: Option<u64>,
    /// Gas price in Wei (decimal text), if known.
    pub gas_price: Option<String>,
    /// Cost the call is charged today.
    pub current_cost: u64,
    /// Cost under EIP-7883.
    pub new_cost: u64,
    /// Cost recomputed with the legacy formula.
    pub computed_legacy_cost: u64,
}

impl From<&CallRecord> for RawCall {
    fn from(record: &CallRecord) -> Self {
        Self {
            block_number: record.block_number,
            tx_hash: Some(record.tx_hash.clone()),
            base_size: i64::try_from(record.base_size).ok(),
            exponent_size: i64::try_from(record.exponent_size).ok(),
            modulus_size: i64::try_from(record.modulus_size).ok(),
            exponent: Some(record.exponent.clone()),
            recorded_cost: record.recorded_cost.and_then(|cost| i64::try_from(cost).ok()),
            from_address: record.from_address.clone(),
            to_address: record.to_address.clone(),
            gas_price: record.gas_price.clone(),
        }
    }
}

/// Metadata for one `analyze` run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Row id assigned by SQLite.
    pub id: i64,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    /// Input directory.
    pub data_dir: String,
    /// Number of parquet files successfully loaded.
    pub files_loaded: u64,
    /// Number of parquet files that failed to load.
    pub files_failed: u64,
    /// Valid calls aggregated.
    pub total_calls: u64,
    /// Rows rejected by validation.
    pub invalid_records: u64,
    /// Whether the run was stopped before all files were processed.
    pub truncated: bool,
    /// Whether the run reached `finish_run`.
    pub finished: bool,
}

/// Final counters written back to a run row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunTotals {
    /// Number of parquet files successfully loaded.
    pub files_loaded: u64,
    /// Number of parquet files that failed to load.
    pub files_failed: u64,
    /// Valid calls aggregated.
    pub total_calls: u64,
    /// Rows rejected by validation.
    pub invalid_records: u64,
    /// Whether the run was stopped early.
    pub truncated: bool,
}
