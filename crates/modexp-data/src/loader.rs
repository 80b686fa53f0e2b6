//! Parquet ingestion for per-block ModExp call files.
//!
//! The dataset is a directory of `<block_number>.parquet` files, one per
//! block that contained ModExp calls. Files are discovered newest-first and
//! parsed one at a time so callers can process them in bounded batches and
//! skip files that fail to parse.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use eyre::{eyre, Context, ContextCompat, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::types::{RawCall, TxMetadata};

/// A discovered per-block call file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallFile {
    /// Block number parsed from the file stem.
    pub block_number: u64,
    /// Path to the parquet file.
    pub path: PathBuf,
}

/// List `*.parquet` files in `dir` whose stem is a block number.
///
/// Files are sorted by block number, most recent first. Files whose stem is
/// not a number are skipped with a warning.
///
/// # Errors
/// Returns error if the directory does not exist or cannot be read.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn discover_call_files(dir: &Path) -> Result<Vec<CallFile>> {
    if !dir.is_dir() {
        return Err(eyre!("data directory {} does not exist", dir.display()));
    }

    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir)
        .wrap_err_with(|| format!("failed to read data directory {}", dir.display()))?;

    for entry in entries {
        let path = entry.wrap_err("failed to read directory entry")?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("parquet") {
            continue;
        }

        let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or("");
        match stem.parse::<u64>() {
            Ok(block_number) => files.push(CallFile { block_number, path }),
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    "skipping parquet file without block number stem"
                );
            }
        }
    }

    files.sort_by(|a, b| {
        b.block_number
            .cmp(&a.block_number)
            .then_with(|| a.path.cmp(&b.path))
    });

    tracing::info!(file_count = files.len(), "discovered call files");
    Ok(files)
}

fn open_reader(
    path: &Path,
) -> Result<parquet::arrow::arrow_reader::ParquetRecordBatchReader> {
    let file = File::open(path)
        .wrap_err_with(|| format!("failed to open parquet file: {}", path.display()))?;

    ParquetRecordBatchReaderBuilder::try_new(file)
        .wrap_err("failed to parse parquet metadata")?
        .build()
        .wrap_err("failed to build parquet record batch reader")
}

fn int64_column(batch: &RecordBatch, idx: usize, name: &str) -> Result<Int64Array> {
    let casted = cast(batch.column(idx), &DataType::Int64)
        .wrap_err_with(|| format!("{name} column cannot be read as an integer"))?;
    casted
        .as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .with_context(|| format!("{name} column is not integer type"))
}

fn string_column(batch: &RecordBatch, idx: usize, name: &str) -> Result<StringArray> {
    let casted = cast(batch.column(idx), &DataType::Utf8)
        .wrap_err_with(|| format!("{name} column cannot be read as text"))?;
    casted
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .with_context(|| format!("{name} column is not string type"))
}

fn int_at(col: &Int64Array, row: usize) -> Option<i64> {
    (!col.is_null(row)).then(|| col.value(row))
}

fn string_at(col: &StringArray, row: usize) -> Option<String> {
    (!col.is_null(row)).then(|| col.value(row).to_string())
}

/// Parse one per-block parquet file into raw call rows.
///
/// Required schema columns: `Bsize`, `Esize`, `Msize`, `E`, `tx_hash`.
/// Optional: `gas_costs`, `from_address`, `to_address`, `gas_price`.
/// Integer columns accept any integer arrow type; text columns accept
/// Utf8 and LargeUtf8.
///
/// # Errors
/// Returns error if the file cannot be opened, is not valid parquet, or
/// a required column is missing or has an unreadable type.
pub fn parse_call_parquet(file: &CallFile) -> Result<Vec<RawCall>> {
    let reader = open_reader(&file.path)?;
    let schema = reader.schema();

    let col_idx = |name: &str| -> Result<usize> {
        schema
            .index_of(name)
            .wrap_err_with(|| format!("column {name} not found in parquet schema"))
    };
    let opt_idx = |name: &str| schema.index_of(name).ok();

    let base_idx = col_idx("Bsize")?;
    let exponent_size_idx = col_idx("Esize")?;
    let modulus_idx = col_idx("Msize")?;
    let exponent_idx = col_idx("E")?;
    let tx_hash_idx = col_idx("tx_hash")?;
    let gas_costs_idx = opt_idx("gas_costs");
    let from_idx = opt_idx("from_address");
    let to_idx = opt_idx("to_address");
    let gas_price_idx = opt_idx("gas_price");

    let mut calls = Vec::new();

    for batch_result in reader {
        let batch = batch_result.wrap_err("failed to read record batch")?;

        let base_col = int64_column(&batch, base_idx, "Bsize")?;
        let exponent_size_col = int64_column(&batch, exponent_size_idx, "Esize")?;
        let modulus_col = int64_column(&batch, modulus_idx, "Msize")?;
        let exponent_col = string_column(&batch, exponent_idx, "E")?;
        let tx_hash_col = string_column(&batch, tx_hash_idx, "tx_hash")?;
        let gas_costs_col = gas_costs_idx
            .map(|idx| int64_column(&batch, idx, "gas_costs"))
            .transpose()?;
        let from_col = from_idx
            .map(|idx| string_column(&batch, idx, "from_address"))
            .transpose()?;
        let to_col = to_idx
            .map(|idx| string_column(&batch, idx, "to_address"))
            .transpose()?;
        let gas_price_col = gas_price_idx
            .map(|idx| string_column(&batch, idx, "gas_price"))
            .transpose()?;

        for row in 0..batch.num_rows() {
            calls.push(RawCall {
                block_number: file.block_number,
                tx_hash: string_at(&tx_hash_col, row),
                base_size: int_at(&base_col, row),
                exponent_size: int_at(&exponent_size_col, row),
                modulus_size: int_at(&modulus_col, row),
                exponent: string_at(&exponent_col, row),
                recorded_cost: gas_costs_col.as_ref().and_then(|col| int_at(col, row)),
                from_address: from_col.as_ref().and_then(|col| string_at(col, row)),
                to_address: to_col.as_ref().and_then(|col| string_at(col, row)),
                gas_price: gas_price_col.as_ref().and_then(|col| string_at(col, row)),
            });
        }
    }

    tracing::debug!(
        block_number = file.block_number,
        call_count = calls.len(),
        "parsed call file"
    );
    Ok(calls)
}

/// Parse a transaction metadata parquet file.
///
/// Expects `tx_hash` (or `transaction_hash`), `from_address` and
/// `to_address`; `gas_price` is optional and may be integer or text.
///
/// # Errors
/// Returns error if the file cannot be read or required columns are missing.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn parse_tx_metadata_parquet(path: &Path) -> Result<Vec<TxMetadata>> {
    let reader = open_reader(path)?;
    let schema = reader.schema();

    let tx_hash_idx = schema
        .index_of("tx_hash")
        .or_else(|_| schema.index_of("transaction_hash"))
        .wrap_err("column tx_hash not found in parquet schema")?;
    let from_idx = schema
        .index_of("from_address")
        .wrap_err("column from_address not found in parquet schema")?;
    let to_idx = schema
        .index_of("to_address")
        .wrap_err("column to_address not found in parquet schema")?;
    let gas_price_idx = schema.index_of("gas_price").ok();

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.wrap_err("failed to read record batch")?;

        let tx_hash_col = string_column(&batch, tx_hash_idx, "tx_hash")?;
        let from_col = string_column(&batch, from_idx, "from_address")?;
        let to_col = string_column(&batch, to_idx, "to_address")?;
        let gas_price_col = gas_price_idx
            .map(|idx| string_column(&batch, idx, "gas_price"))
            .transpose()?;

        for row in 0..batch.num_rows() {
            let Some(tx_hash) = string_at(&tx_hash_col, row) else {
                continue;
            };
            rows.push(TxMetadata {
                tx_hash,
                from_address: string_at(&from_col, row),
                to_address: string_at(&to_col, row),
                gas_price: gas_price_col.as_ref().and_then(|col| string_at(col, row)),
            });
        }
    }

    tracing::info!(tx_count = rows.len(), "parsed transaction metadata");
    Ok(rows)
}

fn normalize_hash(hash: &str) -> String {
    let lowered = hash.trim().to_ascii_lowercase();
    if lowered.starts_with("0x") {
        lowered
    } else {
        format!("0x{lowered}")
    }
}

/// Lookup from transaction hash to its metadata.
#[derive(Clone, Debug, Default)]
pub struct TxIndex {
    by_hash: HashMap<String, TxMetadata>,
}

impl TxIndex {
    /// Build an index; the first row seen for a hash wins.
    pub fn from_rows(rows: Vec<TxMetadata>) -> Self {
        let mut by_hash = HashMap::with_capacity(rows.len());
        for row in rows {
            by_hash.entry(normalize_hash(&row.tx_hash)).or_insert(row);
        }
        Self { by_hash }
    }

    /// Number of indexed transactions.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Metadata for a transaction hash (case-insensitive, 0x optional).
    pub fn get(&self, tx_hash: &str) -> Option<&TxMetadata> {
        self.by_hash.get(&normalize_hash(tx_hash))
    }

    /// Fill sender, contract and gas price on `call` where they are missing.
    ///
    /// Returns `true` if the call's transaction was found in the index.
    pub fn enrich(&self, call: &mut RawCall) -> bool {
        let Some(meta) = call.tx_hash.as_deref().and_then(|hash| self.get(hash)) else {
            return false;
        };

        if call.from_address.is_none() {
            call.from_address = meta.from_address.clone();
        }
        if call.to_address.is_none() {
            call.to_address = meta.to_address.clone();
        }
        if call.gas_price.is_none() {
            call.gas_price = meta.gas_price.clone();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int32Builder, Int64Builder, StringBuilder, UInt64Builder};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    fn write_batch(path: &Path, schema: Arc<Schema>, columns: Vec<ArrayRef>) {
        let batch = RecordBatch::try_new(schema.clone(), columns).expect("create record batch");
        let file = File::create(path).expect("create parquet file");
        let mut writer = ArrowWriter::try_new(file, schema, None).expect("create arrow writer");
        writer.write(&batch).expect("write batch");
        writer.close().expect("close writer");
    }

    #[test]
    fn discover_sorts_by_block_descending_and_skips_other_stems() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        for name in ["100.parquet", "250.parquet", "7.parquet", "notes.parquet", "300.csv"] {
            std::fs::write(temp_dir.path().join(name), b"").expect("write file");
        }

        let files = discover_call_files(temp_dir.path()).expect("discover");
        let blocks: Vec<u64> = files.iter().map(|file| file.block_number).collect();
        assert_eq!(blocks, vec![250, 100, 7]);
    }

    #[test]
    fn discover_rejects_missing_directory() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let missing = temp_dir.path().join("nope");
        assert!(discover_call_files(&missing).is_err());
    }

    #[test]
    fn parse_call_parquet_reads_narrow_integer_columns_and_nulls() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("18000000.parquet");

        let mut bsize = Int32Builder::new();
        let mut esize = Int32Builder::new();
        let mut msize = Int32Builder::new();
        let mut exponent = StringBuilder::new();
        let mut tx_hash = StringBuilder::new();
        let mut gas_costs = UInt64Builder::new();

        bsize.append_value(32);
        esize.append_value(3);
        msize.append_value(32);
        exponent.append_value("0x010001");
        tx_hash.append_value("0xAA");
        gas_costs.append_value(200);

        bsize.append_null();
        esize.append_value(1);
        msize.append_value(64);
        exponent.append_value("");
        tx_hash.append_value("0xbb");
        gas_costs.append_null();

        let schema = Arc::new(Schema::new(vec![
            Field::new("Bsize", DataType::Int32, true),
            Field::new("Esize", DataType::Int32, true),
            Field::new("Msize", DataType::Int32, true),
            Field::new("E", DataType::Utf8, true),
            Field::new("tx_hash", DataType::Utf8, true),
            Field::new("gas_costs", DataType::UInt64, true),
        ]));
        write_batch(
            &path,
            schema,
            vec![
                Arc::new(bsize.finish()),
                Arc::new(esize.finish()),
                Arc::new(msize.finish()),
                Arc::new(exponent.finish()),
                Arc::new(tx_hash.finish()),
                Arc::new(gas_costs.finish()),
            ],
        );

        let file = CallFile {
            block_number: 18_000_000,
            path,
        };
        let calls = parse_call_parquet(&file).expect("parse parquet");

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].block_number, 18_000_000);
        assert_eq!(calls[0].base_size, Some(32));
        assert_eq!(calls[0].exponent.as_deref(), Some("0x010001"));
        assert_eq!(calls[0].recorded_cost, Some(200));
        assert_eq!(calls[0].from_address, None);
        assert_eq!(calls[1].base_size, None, "null Bsize stays missing");
        assert_eq!(calls[1].recorded_cost, None);
        assert_eq!(calls[1].exponent.as_deref(), Some(""));
    }

    #[test]
    fn parse_call_parquet_requires_size_columns() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("1.parquet");

        let mut tx_hash = StringBuilder::new();
        tx_hash.append_value("0x01");
        let schema = Arc::new(Schema::new(vec![Field::new("tx_hash", DataType::Utf8, false)]));
        write_batch(&path, schema, vec![Arc::new(tx_hash.finish())]);

        let file = CallFile {
            block_number: 1,
            path,
        };
        let err = parse_call_parquet(&file).expect_err("missing columns must fail");
        assert!(err.to_string().contains("Bsize"));
    }

    #[test]
    fn parse_tx_metadata_accepts_integer_gas_price() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let path = temp_dir.path().join("txs.parquet");

        let mut tx_hash = StringBuilder::new();
        let mut from = StringBuilder::new();
        let mut to = StringBuilder::new();
        let mut gas_price = Int64Builder::new();
        tx_hash.append_value("0xAB");
        from.append_value("0x1111111111111111111111111111111111111111");
        to.append_null();
        gas_price.append_value(25_000_000_000);

        let schema = Arc::new(Schema::new(vec![
            Field::new("transaction_hash", DataType::Utf8, false),
            Field::new("from_address", DataType::Utf8, true),
            Field::new("to_address", DataType::Utf8, true),
            Field::new("gas_price", DataType::Int64, true),
        ]));
        write_batch(
            &path,
            schema,
            vec![
                Arc::new(tx_hash.finish()),
                Arc::new(from.finish()),
                Arc::new(to.finish()),
                Arc::new(gas_price.finish()),
            ],
        );

        let rows = parse_tx_metadata_parquet(&path).expect("parse metadata");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gas_price.as_deref(), Some("25000000000"));
        assert_eq!(rows[0].to_address, None);
    }

    #[test]
    fn tx_index_enriches_only_missing_fields() {
        let index = TxIndex::from_rows(vec![TxMetadata {
            tx_hash: "0xABCD".to_string(),
            from_address: Some("0xsender".to_string()),
            to_address: Some("0xcontract".to_string()),
            gas_price: Some("100".to_string()),
        }]);

        let mut call = RawCall {
            tx_hash: Some("abcd".to_string()),
            to_address: Some("0xalready".to_string()),
            ..RawCall::default()
        };

        assert!(index.enrich(&mut call));
        assert_eq!(call.from_address.as_deref(), Some("0xsender"));
        assert_eq!(call.to_address.as_deref(), Some("0xalready"));
        assert_eq!(call.gas_price.as_deref(), Some("100"));

        let mut unknown = RawCall {
            tx_hash: Some("0xffff".to_string()),
            ..RawCall::default()
        };
        assert!(!index.enrich(&mut unknown));
        assert_eq!(unknown.from_address, None);
    }
}
