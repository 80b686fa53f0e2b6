//! Shared test helpers and utilities.
//!
//! Factory functions for ModExp call rows, stores and per-block parquet
//! files with sensible defaults.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use modexp_data::store::Store;
use modexp_data::types::RawCall;
use parquet::arrow::ArrowWriter;

pub const SENDER_A: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const SENDER_B: &str = "0x70997970c51812e339d9b73b0245ad59e15ebbf9";
pub const CONTRACT: &str = "0x00000000000000000000000000000000000000fe";

/// Creates an in-memory SQLite Store with all migrations applied.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> Store {
    Store::new(":memory:").expect("in-memory store should always open")
}

/// 32-byte transaction hash text for a small integer id.
pub fn tx_hash(n: u64) -> String {
    format!("0x{n:064x}")
}

/// Creates a sample RawCall with every field present.
///
/// Exponent is `0x10001`; recorded cost, gas price and block come
/// from the defaults below and can be overridden on the returned value.
///
/// # Example
/// ```ignore
/// let call = sample_raw_call(1, 256, 256);
/// assert_eq!(call.exponent_size, Some(3));
/// ```
pub fn sample_raw_call(tx: u64, base_size: i64, modulus_size: i64) -> RawCall {
    RawCall {
        block_number: 19_000_000,
        tx_hash: Some(tx_hash(tx)),
        base_size: Some(base_size),
        exponent_size: Some(3),
        modulus_size: Some(modulus_size),
        exponent: Some("0x10001".to_string()),
        recorded_cost: None,
        from_address: Some(SENDER_A.to_string()),
        to_address: Some(CONTRACT.to_string()),
        gas_price: Some("20000000000".to_string()),
    }
}

/// One row of a per-block call parquet file.
#[derive(Clone, Debug)]
pub struct CallRow {
    pub base_size: Option<i64>,
    pub exponent_size: Option<i64>,
    pub modulus_size: Option<i64>,
    pub exponent: Option<&'static str>,
    pub tx_hash: String,
    pub gas_costs: Option<i64>,
}

impl CallRow {
    pub fn new(tx: u64, base_size: i64, modulus_size: i64, gas_costs: Option<i64>) -> Self {
        Self {
            base_size: Some(base_size),
            exponent_size: Some(3),
            modulus_size: Some(modulus_size),
            exponent: Some("10001"),
            tx_hash: tx_hash(tx),
            gas_costs,
        }
    }
}

fn write_batch(path: &Path, schema: Arc<Schema>, columns: Vec<ArrayRef>) {
    let batch = RecordBatch::try_new(schema.clone(), columns).expect("create record batch");
    let file = File::create(path).expect("create parquet file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("create arrow writer");
    writer.write(&batch).expect("write batch");
    writer.close().expect("close writer");
}

/// Writes `<dir>/<block_number>.parquet` with the call file schema
/// (`Bsize`, `Esize`, `Msize`, `E`, `tx_hash`, `gas_costs`).
pub fn write_call_parquet(dir: &Path, block_number: u64, rows: &[CallRow]) -> PathBuf {
    let mut bsize = Int64Builder::new();
    let mut esize = Int64Builder::new();
    let mut msize = Int64Builder::new();
    let mut exponent = StringBuilder::new();
    let mut tx_hash = StringBuilder::new();
    let mut gas_costs = Int64Builder::new();

    for row in rows {
        bsize.append_option(row.base_size);
        esize.append_option(row.exponent_size);
        msize.append_option(row.modulus_size);
        exponent.append_option(row.exponent);
        tx_hash.append_value(&row.tx_hash);
        gas_costs.append_option(row.gas_costs);
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("Bsize", DataType::Int64, true),
        Field::new("Esize", DataType::Int64, true),
        Field::new("Msize", DataType::Int64, true),
        Field::new("E", DataType::Utf8, true),
        Field::new("tx_hash", DataType::Utf8, false),
        Field::new("gas_costs", DataType::Int64, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(bsize.finish()),
        Arc::new(esize.finish()),
        Arc::new(msize.finish()),
        Arc::new(exponent.finish()),
        Arc::new(tx_hash.finish()),
        Arc::new(gas_costs.finish()),
    ];

    let path = dir.join(format!("{block_number}.parquet"));
    write_batch(&path, schema, columns);
    path
}

/// Writes a transaction metadata parquet (`tx_hash`, `from_address`,
/// `to_address`, `gas_price`).
pub fn write_tx_parquet(path: &Path, rows: &[(u64, &str, &str, &str)]) {
    let mut hash = StringBuilder::new();
    let mut from = StringBuilder::new();
    let mut to = StringBuilder::new();
    let mut gas_price = StringBuilder::new();

    for (tx, sender, contract, price) in rows {
        hash.append_value(tx_hash(*tx));
        from.append_value(sender);
        to.append_value(contract);
        gas_price.append_value(price);
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("tx_hash", DataType::Utf8, false),
        Field::new("from_address", DataType::Utf8, true),
        Field::new("to_address", DataType::Utf8, true),
        Field::new("gas_price", DataType::Utf8, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(hash.finish()),
        Arc::new(from.finish()),
        Arc::new(to.finish()),
        Arc::new(gas_price.finish()),
    ];
    write_batch(path, schema, columns);
}
