//! Validated ModExp call records.
//!
//! `RawCall` rows coming off disk are loose: every column is optional and
//! sizes are signed. `ModExpCall::from_raw` is the only way to obtain a
//! call the calculator accepts, and it rejects rows instead of coercing them.

use std::str::FromStr;

use alloy::primitives::{hex, Address, B256};
use modexp_data::types::{CallRecord, RawCall};
use thiserror::Error;

/// Default upper bound on any declared input length, in bytes.
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 65_536;

/// Environment variable overriding [`DEFAULT_MAX_INPUT_BYTES`].
pub const MAX_INPUT_BYTES_ENV: &str = "MODEXP_MAX_INPUT_BYTES";

/// Plausibility limits applied while validating raw rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordLimits {
    /// Largest accepted `base_size`, `exponent_size` or `modulus_size`.
    pub max_input_bytes: u64,
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }
}

impl RecordLimits {
    /// Limits with `MODEXP_MAX_INPUT_BYTES` applied when it parses as a
    /// positive integer.
    pub fn from_env() -> Self {
        let max_input_bytes = std::env::var(MAX_INPUT_BYTES_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_INPUT_BYTES);

        Self { max_input_bytes }
    }
}

/// Why a raw row was excluded from the analysis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRecord {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} is negative: {value}")]
    NegativeValue { field: &'static str, value: i64 },

    #[error("{field} of {value} bytes exceeds the {limit} byte limit")]
    ImplausibleSize {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("exponent needs {actual} bytes but only {declared} were declared")]
    ExponentExceedsDeclaredSize { declared: u64, actual: u64 },

    #[error("malformed {field}: {value:?}")]
    Malformed { field: &'static str, value: String },

    #[error("gas arithmetic overflowed")]
    ArithmeticOverflow,
}

impl InvalidRecord {
    /// Stable key used when counting rejected rows by reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::NegativeValue { .. } => "negative_value",
            Self::ImplausibleSize { .. } => "implausible_size",
            Self::ExponentExceedsDeclaredSize { .. } => "exponent_exceeds_declared_size",
            Self::Malformed { .. } => "malformed",
            Self::ArithmeticOverflow => "arithmetic_overflow",
        }
    }
}

/// One validated ModExp precompile invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModExpCall {
    /// Declared base length in bytes.
    pub base_size: u64,
    /// Declared exponent length in bytes.
    pub exponent_size: u64,
    /// Declared modulus length in bytes.
    pub modulus_size: u64,
    /// Exponent as big-endian bytes with leading zeros stripped. Empty means zero.
    pub exponent: Vec<u8>,
    /// Transaction sender, when the dataset carries it.
    pub sender: Option<Address>,
    /// Contract the transaction called, when the dataset carries it.
    pub contract: Option<Address>,
    /// Transaction hash.
    pub tx_hash: B256,
    /// Block number.
    pub block_number: u64,
    /// Upstream recorded cost under the current schedule.
    pub recorded_cost: Option<u64>,
    /// Gas price in Wei.
    pub gas_price_wei: Option<u128>,
}

fn required<'a, T>(value: &'a Option<T>, field: &'static str) -> Result<&'a T, InvalidRecord> {
    value.as_ref().ok_or(InvalidRecord::MissingField(field))
}

fn checked_size(
    value: Option<i64>,
    field: &'static str,
    limits: &RecordLimits,
) -> Result<u64, InvalidRecord> {
    let value = value.ok_or(InvalidRecord::MissingField(field))?;
    let size = u64::try_from(value).map_err(|_| InvalidRecord::NegativeValue { field, value })?;
    if size > limits.max_input_bytes {
        return Err(InvalidRecord::ImplausibleSize {
            field,
            value: size,
            limit: limits.max_input_bytes,
        });
    }
    Ok(size)
}

/// Decode hex exponent text into its significant big-endian bytes.
///
/// Accepts an optional `0x` prefix and odd digit counts. Empty text is zero.
pub fn parse_exponent_hex(text: &str) -> Result<Vec<u8>, InvalidRecord> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let malformed = || InvalidRecord::Malformed {
        field: "exponent",
        value: text.to_string(),
    };

    let bytes = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}")).map_err(|_| malformed())?
    } else {
        hex::decode(digits).map_err(|_| malformed())?
    };

    let first_significant = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
    Ok(bytes[first_significant..].to_vec())
}

/// Parse a gas price given as decimal text or `0x`-prefixed hex.
pub fn parse_gas_price(text: &str) -> Result<u128, InvalidRecord> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some("") => Ok(0),
        Some(digits) => u128::from_str_radix(digits, 16),
        None => trimmed.parse::<u128>(),
    };

    parsed.map_err(|_| InvalidRecord::Malformed {
        field: "gas_price",
        value: text.to_string(),
    })
}

fn parse_address(text: &str, field: &'static str) -> Result<Address, InvalidRecord> {
    Address::from_str(text.trim()).map_err(|_| InvalidRecord::Malformed {
        field,
        value: text.to_string(),
    })
}

impl ModExpCall {
    /// Validate a raw row.
    ///
    /// # Errors
    /// Returns the first problem found; the row must then be excluded.
    pub fn from_raw(raw: &RawCall, limits: &RecordLimits) -> Result<Self, InvalidRecord> {
        let tx_text = required(&raw.tx_hash, "tx_hash")?;
        let tx_hash = B256::from_str(tx_text.trim()).map_err(|_| InvalidRecord::Malformed {
            field: "tx_hash",
            value: tx_text.clone(),
        })?;

        let base_size = checked_size(raw.base_size, "base_size", limits)?;
        let exponent_size = checked_size(raw.exponent_size, "exponent_size", limits)?;
        let modulus_size = checked_size(raw.modulus_size, "modulus_size", limits)?;

        let exponent = parse_exponent_hex(required(&raw.exponent, "exponent")?)?;
        let needed = exponent.len() as u64;
        if needed > exponent_size {
            return Err(InvalidRecord::ExponentExceedsDeclaredSize {
                declared: exponent_size,
                actual: needed,
            });
        }

        let sender = raw
            .from_address
            .as_deref()
            .map(|text| parse_address(text, "from_address"))
            .transpose()?;
        let contract = raw
            .to_address
            .as_deref()
            .map(|text| parse_address(text, "to_address"))
            .transpose()?;

        let recorded_cost = raw
            .recorded_cost
            .map(|value| {
                u64::try_from(value).map_err(|_| InvalidRecord::NegativeValue {
                    field: "recorded_cost",
                    value,
                })
            })
            .transpose()?;

        let gas_price_wei = raw.gas_price.as_deref().map(parse_gas_price).transpose()?;

        Ok(Self {
            base_size,
            exponent_size,
            modulus_size,
            exponent,
            sender,
            contract,
            tx_hash,
            block_number: raw.block_number,
            recorded_cost,
            gas_price_wei,
        })
    }

    /// True when every declared length is exactly 32 bytes.
    pub fn is_all_32_bytes(&self) -> bool {
        self.base_size == 32 && self.exponent_size == 32 && self.modulus_size == 32
    }
}

/// A validated call with its costs under both schedules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CostedCall {
    pub call: ModExpCall,
    /// Recorded upstream cost when present, else `computed_legacy_cost`.
    pub current_cost: u64,
    /// Cost under EIP-7883.
    pub new_cost: u64,
    /// Cost under the legacy schedule as computed here.
    pub computed_legacy_cost: u64,
}

impl CostedCall {
    /// Signed difference `new_cost - current_cost`.
    ///
    /// [`crate::gas::compute_costs`] rejects costs above `i64::MAX`, so
    /// the saturating branch is only reachable for hand-built values.
    pub fn increase(&self) -> i64 {
        let delta = i128::from(self.new_cost) - i128::from(self.current_cost);
        i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
    }

    /// `new_cost / current_cost`, `None` when the current cost is zero.
    pub fn ratio(&self) -> Option<f64> {
        (self.current_cost > 0).then(|| self.new_cost as f64 / self.current_cost as f64)
    }

    /// Whether the recorded upstream cost disagrees with the recomputed one.
    pub fn legacy_mismatch(&self) -> bool {
        self.call
            .recorded_cost
            .is_some_and(|recorded| recorded != self.computed_legacy_cost)
    }

    /// Additional fee in Wei for this call, when its gas price is known.
    pub fn fee_increase_wei(&self) -> Option<i128> {
        self.call
            .gas_price_wei
            .and_then(|price| i128::try_from(price).ok())
            .and_then(|price| price.checked_mul(i128::from(self.increase())))
    }

    /// Normalized row for persistence.
    pub fn to_record(&self) -> CallRecord {
        CallRecord {
            block_number: self.call.block_number,
            tx_hash: format!("{:#x}", self.call.tx_hash),
            from_address: self.call.sender.map(|address| format!("{address:#x}")),
            to_address: self.call.contract.map(|address| format!("{address:#x}")),
            base_size: self.call.base_size,
            exponent_size: self.call.exponent_size,
            modulus_size: self.call.modulus_size,
            exponent: format!("0x{}", hex::encode(&self.call.exponent)),
            recorded_cost: self.call.recorded_cost,
            gas_price: self.call.gas_price_wei.map(|price| price.to_string()),
            current_cost: self.current_cost,
            new_cost: self.new_cost,
            computed_legacy_cost: self.computed_legacy_cost,
        }
    }
}
