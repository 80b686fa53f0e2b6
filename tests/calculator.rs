//! Integration tests for the ModExp gas calculator and call validation.

mod common;

use common::sample_raw_call;
use modexp_analysis::call::{InvalidRecord, ModExpCall, RecordLimits};
use modexp_analysis::compute_costs;
use modexp_analysis::gas::{eip7883_cost, legacy_cost, GasInput, REFERENCE_VECTORS};

/// Every published reference vector is reproduced by both schedules.
#[test]
fn reference_vectors_hold() {
    for vector in REFERENCE_VECTORS {
        let input = GasInput::from_hex(
            vector.base_len,
            vector.exp_len,
            vector.mod_len,
            vector.exponent,
        )
        .expect("reference exponent parses");

        assert_eq!(
            legacy_cost(&input).expect("legacy cost"),
            vector.legacy,
            "legacy cost for {}/{}/{}",
            vector.base_len,
            vector.exp_len,
            vector.mod_len
        );
        assert_eq!(
            eip7883_cost(&input).expect("new cost"),
            vector.eip7883,
            "EIP-7883 cost for {}/{}/{}",
            vector.base_len,
            vector.exp_len,
            vector.mod_len
        );
    }
}

/// The new schedule never charges less than the legacy one for the
/// reference shapes.
#[test]
fn new_schedule_is_never_cheaper_on_reference_shapes() {
    for vector in REFERENCE_VECTORS {
        assert!(vector.eip7883 >= vector.legacy);
        assert!(vector.legacy >= 200);
        assert!(vector.eip7883 >= 500);
    }
}

/// A 64-byte exponent whose leading byte is 0x01 uses its top 32 bytes
/// as the iteration head.
///
/// legacy iterations: 8 * (64 - 32) + 248 = 504 -> 16 * 504 / 3 = 2688
/// new iterations:   16 * (64 - 32) + 248 = 760 -> 16 * 760 / 3 = 4053
#[test]
fn long_exponent_uses_leading_bytes() {
    let mut exponent = vec![0u8; 64];
    exponent[0] = 0x01;
    let input = GasInput::new(32, 64, 32, &exponent);

    assert_eq!(legacy_cost(&input).expect("legacy cost"), 2_688);
    assert_eq!(eip7883_cost(&input).expect("new cost"), 4_053);
}

/// Validated calls carry the recorded cost as the current cost, and the
/// recomputed legacy cost alongside it.
#[test]
fn recorded_cost_takes_precedence() {
    let mut raw = sample_raw_call(1, 256, 256);
    raw.recorded_cost = Some(1_400);

    let call = ModExpCall::from_raw(&raw, &RecordLimits::default()).expect("valid call");
    let costed = compute_costs(&call).expect("costs fit");

    assert_eq!(costed.current_cost, 1_400);
    assert_eq!(costed.computed_legacy_cost, 1_365);
    assert_eq!(costed.new_cost, 10_922);
    assert_eq!(costed.increase(), 10_922 - 1_400);
    assert!(costed.legacy_mismatch());
}

#[test]
fn computed_cost_used_without_recorded_cost() {
    let raw = sample_raw_call(2, 512, 512);
    let call = ModExpCall::from_raw(&raw, &RecordLimits::default()).expect("valid call");
    let costed = compute_costs(&call).expect("costs fit");

    assert_eq!(costed.current_cost, 21_845);
    assert_eq!(costed.new_cost, 43_690);
    assert!(!costed.legacy_mismatch());
    // 20 gwei * 21845 gas
    assert_eq!(costed.fee_increase_wei(), Some(20_000_000_000 * 21_845));
}

#[test]
fn rejects_bad_rows_by_reason() {
    let limits = RecordLimits {
        max_input_bytes: 1_024,
    };

    let mut oversized = sample_raw_call(3, 4_096, 32);
    oversized.recorded_cost = None;
    let err = ModExpCall::from_raw(&oversized, &limits).expect_err("size over limit");
    assert_eq!(err.reason(), "implausible_size");

    let negative = sample_raw_call(4, -1, 32);
    let err = ModExpCall::from_raw(&negative, &limits).expect_err("negative size");
    assert!(matches!(err, InvalidRecord::NegativeValue { field: "base_size", .. }));

    let mut too_long = sample_raw_call(5, 32, 32);
    too_long.exponent_size = Some(1);
    let err = ModExpCall::from_raw(&too_long, &limits).expect_err("exponent wider than declared");
    assert_eq!(
        err,
        InvalidRecord::ExponentExceedsDeclaredSize {
            declared: 1,
            actual: 3
        }
    );

    let mut no_exponent = sample_raw_call(6, 32, 32);
    no_exponent.exponent = None;
    let err = ModExpCall::from_raw(&no_exponent, &limits).expect_err("exponent missing");
    assert_eq!(err, InvalidRecord::MissingField("exponent"));

    let mut bad_contract = sample_raw_call(7, 32, 32);
    bad_contract.to_address = Some("0xfe".to_string());
    let err = ModExpCall::from_raw(&bad_contract, &limits).expect_err("short address");
    assert!(matches!(err, InvalidRecord::Malformed { field: "to_address", .. }));
}

/// Per-block call files carry no sender or contract; such rows are priced
/// like any other.
#[test]
fn rows_without_addresses_are_priced() {
    let mut raw = sample_raw_call(8, 256, 256);
    raw.from_address = None;
    raw.to_address = None;
    raw.recorded_cost = Some(1_365);

    let call = ModExpCall::from_raw(&raw, &RecordLimits::default()).expect("valid call");
    assert_eq!((call.sender, call.contract), (None, None));

    let costed = compute_costs(&call).expect("costs fit");
    assert_eq!(costed.increase(), 10_922 - 1_365);
}

/// B = M = 2^30, E = 48, zero exponent: the EIP-7883 cost is a third of
/// `i64::MAX` and the increase stays positive.
#[test]
fn large_declared_sizes_near_the_signed_limit() {
    let limits = RecordLimits {
        max_input_bytes: 1 << 32,
    };
    let mut raw = sample_raw_call(9, 1 << 30, 1 << 30);
    raw.exponent_size = Some(48);
    raw.exponent = Some("0x".to_string());
    raw.gas_price = None;

    let call = ModExpCall::from_raw(&raw, &limits).expect("within raised limit");
    let costed = compute_costs(&call).expect("costs fit in i64");
    assert_eq!(costed.new_cost, 3_074_457_345_618_258_602);
    assert!(costed.increase() > 0);

    // doubling the sizes pushes the new cost past i64::MAX
    raw.base_size = Some(1 << 31);
    raw.modulus_size = Some(1 << 31);
    let call = ModExpCall::from_raw(&raw, &limits).expect("within raised limit");
    assert_eq!(compute_costs(&call), Err(InvalidRecord::ArithmeticOverflow));
}
