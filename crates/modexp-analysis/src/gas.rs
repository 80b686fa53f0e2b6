//! ModExp precompile gas under the current (EIP-2565) and proposed
//! (EIP-7883) schedules.
//!
//! Both schedules share one shape: a multiplication complexity derived from
//! `max(base_len, mod_len)`, an iteration count derived from the exponent,
//! `complexity * iterations / 3`, and a floor. They differ only in the
//! complexity function, the multiplier applied to exponent bytes beyond 32,
//! and the floor.
//!
//! All arithmetic is checked. Overflow is reported as
//! [`InvalidRecord::ArithmeticOverflow`].

use std::borrow::Cow;

use alloy::primitives::U256;

use crate::call::{parse_exponent_hex, CostedCall, InvalidRecord, ModExpCall};

/// Floor of the legacy schedule.
pub const LEGACY_MIN_GAS: u64 = 200;
/// Floor of the EIP-7883 schedule.
pub const EIP7883_MIN_GAS: u64 = 500;
/// Iteration multiplier for exponent bytes beyond 32, legacy schedule.
pub const LEGACY_EXPONENT_MULTIPLIER: u64 = 8;
/// Iteration multiplier for exponent bytes beyond 32, EIP-7883 schedule.
pub const EIP7883_EXPONENT_MULTIPLIER: u64 = 16;
/// Divisor shared by both schedules.
pub const GAS_DIVISOR: u64 = 3;

/// Pricing schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GasSchedule {
    /// Current mainnet pricing.
    Eip2565,
    /// Proposed repricing.
    Eip7883,
}

/// Lengths and exponent of one call, as the calculator sees them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasInput<'a> {
    pub base_len: u64,
    pub exp_len: u64,
    pub mod_len: u64,
    /// Exponent as big-endian bytes; leading zeros are allowed.
    pub exponent: Cow<'a, [u8]>,
}

impl<'a> GasInput<'a> {
    pub fn new(base_len: u64, exp_len: u64, mod_len: u64, exponent: &'a [u8]) -> Self {
        Self {
            base_len,
            exp_len,
            mod_len,
            exponent: Cow::Borrowed(exponent),
        }
    }

    /// Build an input from hex exponent text, e.g. `"0x10001"`.
    ///
    /// # Errors
    /// Returns [`InvalidRecord::Malformed`] if the text is not hex.
    pub fn from_hex(
        base_len: u64,
        exp_len: u64,
        mod_len: u64,
        exponent: &str,
    ) -> Result<GasInput<'static>, InvalidRecord> {
        Ok(GasInput {
            base_len,
            exp_len,
            mod_len,
            exponent: Cow::Owned(parse_exponent_hex(exponent)?),
        })
    }

    fn max_len(&self) -> u64 {
        self.base_len.max(self.mod_len)
    }

    /// The leading 256 bits of the `exp_len`-byte exponent field.
    ///
    /// When `exp_len <= 32` this is the whole exponent.
    fn exponent_head(&self) -> U256 {
        let significant = strip_leading_zeros(&self.exponent);
        if self.exp_len <= 32 {
            return U256::from_be_slice(tail(significant, 32));
        }

        // zero padding in front of the significant bytes
        let padding = self.exp_len.saturating_sub(significant.len() as u64);
        if padding >= 32 {
            return U256::ZERO;
        }
        let take = (32 - padding) as usize;
        U256::from_be_slice(&significant[..take.min(significant.len())])
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn tail(bytes: &[u8], len: usize) -> &[u8] {
    &bytes[bytes.len().saturating_sub(len)..]
}

fn words(max_len: u64) -> i128 {
    i128::from(max_len.div_ceil(8))
}

/// Iteration count: `max(head_bits - 1, 0)`, plus `MULTIPLIER` per exponent
/// byte beyond 32, never below 1.
fn calculate_iteration_count<const MULTIPLIER: u64>(
    input: &GasInput<'_>,
) -> Result<i128, InvalidRecord> {
    let head_bits = input.exponent_head().bit_len() as i128;
    let head_term = (head_bits - 1).max(0);

    let iteration_count = if input.exp_len <= 32 {
        head_term
    } else {
        i128::from(MULTIPLIER)
            .checked_mul(i128::from(input.exp_len - 32))
            .and_then(|count| count.checked_add(head_term))
            .ok_or(InvalidRecord::ArithmeticOverflow)?
    };

    Ok(iteration_count.max(1))
}

fn gas_calc<const MIN_PRICE: u64, const MULTIPLIER: u64, F>(
    input: &GasInput<'_>,
    calculate_multiplication_complexity: F,
) -> Result<u64, InvalidRecord>
where
    F: Fn(u64) -> Option<i128>,
{
    let multiplication_complexity = calculate_multiplication_complexity(input.max_len())
        .ok_or(InvalidRecord::ArithmeticOverflow)?;
    let iteration_count = calculate_iteration_count::<MULTIPLIER>(input)?;

    let product = multiplication_complexity
        .checked_mul(iteration_count)
        .ok_or(InvalidRecord::ArithmeticOverflow)?;
    if product <= 0 {
        return Ok(MIN_PRICE);
    }

    let gas = u64::try_from(product / i128::from(GAS_DIVISOR))
        .map_err(|_| InvalidRecord::ArithmeticOverflow)?;
    Ok(gas.max(MIN_PRICE))
}

/// Legacy complexity: tiered on the byte length, polynomial in words.
///
/// The middle and upper tiers go negative for some inputs; the caller floors.
fn legacy_multiplication_complexity(max_len: u64) -> Option<i128> {
    let words = words(max_len);
    let words_sq = words.checked_mul(words)?;
    if max_len <= 64 {
        Some(words_sq)
    } else if max_len <= 1_024 {
        (words_sq / 4)
            .checked_add(words.checked_mul(96)?)?
            .checked_sub(3_072)
    } else {
        (words_sq / 16)
            .checked_add(words.checked_mul(480)?)?
            .checked_sub(199_680)
    }
}

fn eip7883_multiplication_complexity(max_len: u64) -> Option<i128> {
    if max_len <= 32 {
        return Some(16);
    }
    let words = words(max_len);
    words.checked_mul(words)?.checked_mul(2)
}

/// Gas under the current schedule.
///
/// # Errors
/// Returns [`InvalidRecord::ArithmeticOverflow`] if the cost does not fit.
pub fn legacy_cost(input: &GasInput<'_>) -> Result<u64, InvalidRecord> {
    gas_calc::<LEGACY_MIN_GAS, LEGACY_EXPONENT_MULTIPLIER, _>(
        input,
        legacy_multiplication_complexity,
    )
}

/// Gas under EIP-7883.
///
/// # Errors
/// Returns [`InvalidRecord::ArithmeticOverflow`] if the cost does not fit.
pub fn eip7883_cost(input: &GasInput<'_>) -> Result<u64, InvalidRecord> {
    gas_calc::<EIP7883_MIN_GAS, EIP7883_EXPONENT_MULTIPLIER, _>(
        input,
        eip7883_multiplication_complexity,
    )
}

/// Gas under `schedule`.
///
/// # Errors
/// Returns [`InvalidRecord::ArithmeticOverflow`] if the cost does not fit.
pub fn calculate(schedule: GasSchedule, input: &GasInput<'_>) -> Result<u64, InvalidRecord> {
    match schedule {
        GasSchedule::Eip2565 => legacy_cost(input),
        GasSchedule::Eip7883 => eip7883_cost(input),
    }
}

/// Price a validated call under both schedules.
///
/// `current_cost` is the recorded upstream cost when the dataset has one,
/// otherwise the recomputed legacy cost.
///
/// # Errors
/// Returns [`InvalidRecord::ArithmeticOverflow`] if either cost does not fit.
pub fn compute_costs(call: &ModExpCall) -> Result<CostedCall, InvalidRecord> {
    let input = GasInput::new(
        call.base_size,
        call.exponent_size,
        call.modulus_size,
        &call.exponent,
    );
    let computed_legacy_cost = legacy_cost(&input)?;
    let new_cost = eip7883_cost(&input)?;
    let current_cost = call.recorded_cost.unwrap_or(computed_legacy_cost);

    // increases and cost distributions are signed 64-bit
    let max = i64::MAX as u64;
    if computed_legacy_cost > max || new_cost > max || current_cost > max {
        return Err(InvalidRecord::ArithmeticOverflow);
    }

    Ok(CostedCall {
        call: call.clone(),
        current_cost,
        new_cost,
        computed_legacy_cost,
    })
}

/// One fixed calculator check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferenceVector {
    pub base_len: u64,
    pub exp_len: u64,
    pub mod_len: u64,
    pub exponent: &'static str,
    pub legacy: u64,
    pub eip7883: u64,
}

/// Known-good costs used by `verify` and the tests.
pub const REFERENCE_VECTORS: &[ReferenceVector] = &[
    ReferenceVector {
        base_len: 64,
        exp_len: 3,
        mod_len: 64,
        exponent: "0x10001",
        legacy: 341,
        eip7883: 682,
    },
    ReferenceVector {
        base_len: 128,
        exp_len: 3,
        mod_len: 128,
        exponent: "0x10001",
        legacy: 200,
        eip7883: 2_730,
    },
    ReferenceVector {
        base_len: 256,
        exp_len: 3,
        mod_len: 256,
        exponent: "0x10001",
        legacy: 1_365,
        eip7883: 10_922,
    },
    ReferenceVector {
        base_len: 512,
        exp_len: 3,
        mod_len: 512,
        exponent: "0x10001",
        legacy: 21_845,
        eip7883: 43_690,
    },
    ReferenceVector {
        base_len: 1024,
        exp_len: 3,
        mod_len: 1024,
        exponent: "0x10001",
        legacy: 70_997,
        eip7883: 174_762,
    },
    ReferenceVector {
        base_len: 32,
        exp_len: 32,
        mod_len: 32,
        exponent: "0x10001",
        legacy: 200,
        eip7883: 500,
    },
    ReferenceVector {
        base_len: 32,
        exp_len: 1,
        mod_len: 32,
        exponent: "0x03",
        legacy: 200,
        eip7883: 500,
    },
    ReferenceVector {
        base_len: 0,
        exp_len: 0,
        mod_len: 0,
        exponent: "0x0",
        legacy: 200,
        eip7883: 500,
    },
];
