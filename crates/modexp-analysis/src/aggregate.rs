//! Dataset-wide impact aggregation.
//!
//! An [`ImpactAggregator`] is fed one call at a time, possibly split into
//! independent shards that are merged later. Every accumulator is a sum, a
//! count map or a set, so the merged result does not depend on how the
//! input was partitioned. [`ImpactAggregator::finalize`] consumes the
//! aggregator and produces the read-only [`ImpactReport`].

use std::collections::BTreeMap;

use modexp_data::types::RawCall;
use serde::Serialize;

use crate::call::{CostedCall, InvalidRecord, ModExpCall, RecordLimits};
use crate::entity::{EntityImpact, EntityRollups, PairImpact};
use crate::gas::compute_costs;
use crate::patterns::{UsageAccumulator, UsagePatterns};
use crate::stats::{
    float_percentiles, Distribution, PercentilePoint, INCREASE_PERCENTILES, RATIO_PERCENTILES,
};

/// Calls whose declared lengths exceed 32 bytes, per field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SizeBoundaryCounts {
    pub base: u64,
    pub exponent: u64,
    pub modulus: u64,
}

impl SizeBoundaryCounts {
    fn observe(&mut self, call: &ModExpCall) {
        self.base += u64::from(call.base_size > 32);
        self.exponent += u64::from(call.exponent_size > 32);
        self.modulus += u64::from(call.modulus_size > 32);
    }

    fn merge(&mut self, other: &SizeBoundaryCounts) {
        self.base += other.base;
        self.exponent += other.exponent;
        self.modulus += other.modulus;
    }
}

/// Accumulator for one analysis run.
#[derive(Clone, Debug, Default)]
pub struct ImpactAggregator {
    limits: RecordLimits,
    total_calls: u64,
    increases: Distribution,
    affected_increases: Distribution,
    affected_ratios: Vec<f64>,
    total_current_cost: u128,
    total_new_cost: u128,
    calls_with_decrease: u64,
    over_32_bytes: SizeBoundaryCounts,
    invalid_by_reason: BTreeMap<String, u64>,
    legacy_mismatches: u64,
    priced_calls: u64,
    fee_increase_wei: i128,
    block_range: Option<(u64, u64)>,
    truncated: bool,
    rollups: EntityRollups,
    usage: UsageAccumulator,
}

impl ImpactAggregator {
    pub fn new(limits: RecordLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &RecordLimits {
        &self.limits
    }

    /// Validate, price and accumulate one raw row.
    ///
    /// Invalid rows are counted by reason and skipped.
    pub fn observe(&mut self, raw: &RawCall) -> Option<CostedCall> {
        let costed = ModExpCall::from_raw(raw, &self.limits).and_then(|call| compute_costs(&call));
        match costed {
            Ok(costed) => {
                self.observe_costed(&costed);
                Some(costed)
            }
            Err(err) => {
                tracing::debug!(
                    block = raw.block_number,
                    tx_hash = raw.tx_hash.as_deref().unwrap_or(""),
                    reason = err.reason(),
                    error = %err,
                    "skipping invalid modexp record"
                );
                self.record_invalid(&err);
                None
            }
        }
    }

    /// Accumulate an already priced call.
    pub fn observe_costed(&mut self, costed: &CostedCall) {
        let call = &costed.call;
        let increase = costed.increase();

        self.total_calls += 1;
        self.increases.record(increase);
        if increase > 0 {
            self.affected_increases.record(increase);
            if let Some(ratio) = costed.ratio() {
                self.affected_ratios.push(ratio);
            }
        } else if increase < 0 {
            self.calls_with_decrease += 1;
        }

        self.total_current_cost += u128::from(costed.current_cost);
        self.total_new_cost += u128::from(costed.new_cost);
        self.over_32_bytes.observe(call);

        if costed.legacy_mismatch() {
            self.legacy_mismatches += 1;
        }
        if let Some(fee) = costed.fee_increase_wei() {
            self.priced_calls += 1;
            self.fee_increase_wei = self.fee_increase_wei.saturating_add(fee);
        }

        self.block_range = Some(match self.block_range {
            Some((lo, hi)) => (lo.min(call.block_number), hi.max(call.block_number)),
            None => (call.block_number, call.block_number),
        });

        self.rollups.observe(costed);
        self.usage.observe(costed);
    }

    pub fn record_invalid(&mut self, err: &InvalidRecord) {
        self.record_invalid_count(err.reason(), 1);
    }

    /// Add `count` rejected rows under `reason`, e.g. counts restored from storage.
    pub fn record_invalid_count(&mut self, reason: &str, count: u64) {
        if count == 0 {
            return;
        }
        match self.invalid_by_reason.get_mut(reason) {
            Some(existing) => *existing += count,
            None => {
                self.invalid_by_reason.insert(reason.to_string(), count);
            }
        }
    }

    /// Fold another shard into this one.
    pub fn merge(&mut self, other: ImpactAggregator) {
        self.total_calls += other.total_calls;
        self.increases.merge(&other.increases);
        self.affected_increases.merge(&other.affected_increases);
        self.affected_ratios.extend(other.affected_ratios);
        self.total_current_cost += other.total_current_cost;
        self.total_new_cost += other.total_new_cost;
        self.calls_with_decrease += other.calls_with_decrease;
        self.over_32_bytes.merge(&other.over_32_bytes);
        for (reason, count) in &other.invalid_by_reason {
            self.record_invalid_count(reason, *count);
        }
        self.legacy_mismatches += other.legacy_mismatches;
        self.priced_calls += other.priced_calls;
        self.fee_increase_wei = self.fee_increase_wei.saturating_add(other.fee_increase_wei);
        self.block_range = match (self.block_range, other.block_range) {
            (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => Some((a_lo.min(b_lo), a_hi.max(b_hi))),
            (range, None) | (None, range) => range,
        };
        self.truncated |= other.truncated;
        self.rollups.merge(&other.rollups);
        self.usage.merge(&other.usage);
    }

    /// Flag the run as stopped before all input was processed.
    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    pub fn invalid_records(&self) -> u64 {
        self.invalid_by_reason.values().sum()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn invalid_by_reason(&self) -> &BTreeMap<String, u64> {
        &self.invalid_by_reason
    }

    pub fn finalize(self) -> ImpactReport {
        let total_cost_increase = self.increases.sum();
        let calls_with_increase = self.affected_increases.len();
        let pct_calls_affected = if self.total_calls == 0 {
            0.0
        } else {
            100.0 * calls_with_increase as f64 / self.total_calls as f64
        };

        let avg_increase_per_block = self
            .block_range
            .map(|(lo, hi)| total_cost_increase as f64 / (hi - lo + 1) as f64);

        let summary = SummaryStats {
            total_calls: self.total_calls,
            unique_transactions: self.usage.unique_transactions(),
            unique_senders: self.rollups.sender_count() as u64,
            unique_contracts: self.rollups.contract_count() as u64,
            calls_with_increase,
            calls_with_decrease: self.calls_with_decrease,
            pct_calls_affected,
            total_current_cost: self.total_current_cost,
            total_new_cost: self.total_new_cost,
            total_cost_increase,
            total_cost_increase_floored: self.affected_increases.sum(),
            avg_increase: self.increases.mean(),
            median_increase: self.increases.median(),
            max_increase: self.increases.max(),
            increase_percentiles: self.affected_increases.percentiles(&INCREASE_PERCENTILES),
            ratio_percentiles: float_percentiles(&self.affected_ratios, &RATIO_PERCENTILES),
            calls_over_32_bytes: self.over_32_bytes,
            block_range: self.block_range,
            avg_increase_per_block,
            invalid_records: self.invalid_by_reason.values().sum(),
            invalid_by_reason: self.invalid_by_reason,
            legacy_mismatches: self.legacy_mismatches,
            priced_calls: self.priced_calls,
            fee_increase_wei: self.fee_increase_wei,
            truncated: self.truncated,
        };

        tracing::info!(
            total_calls = summary.total_calls,
            affected = summary.calls_with_increase,
            invalid = summary.invalid_records,
            "finalized impact report"
        );

        ImpactReport {
            summary,
            senders: self.rollups.senders(),
            contracts: self.rollups.contracts(),
            pairs: self.rollups.pairs(),
            patterns: self.usage.finalize(),
        }
    }
}

/// Dataset-level statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_calls: u64,
    pub unique_transactions: u64,
    pub unique_senders: u64,
    pub unique_contracts: u64,
    pub calls_with_increase: u64,
    pub calls_with_decrease: u64,
    /// Percentage of calls with a positive increase; 0 for an empty dataset.
    pub pct_calls_affected: f64,
    pub total_current_cost: u128,
    pub total_new_cost: u128,
    /// Signed sum of `new_cost - current_cost`.
    pub total_cost_increase: i128,
    /// Sum of positive increases only.
    pub total_cost_increase_floored: i128,
    pub avg_increase: Option<f64>,
    pub median_increase: Option<f64>,
    pub max_increase: Option<i64>,
    /// Over calls with a positive increase.
    pub increase_percentiles: Vec<PercentilePoint>,
    /// `new / current` over calls with a positive increase.
    pub ratio_percentiles: Vec<PercentilePoint>,
    pub calls_over_32_bytes: SizeBoundaryCounts,
    pub block_range: Option<(u64, u64)>,
    pub avg_increase_per_block: Option<f64>,
    pub invalid_records: u64,
    pub invalid_by_reason: BTreeMap<String, u64>,
    pub legacy_mismatches: u64,
    pub priced_calls: u64,
    pub fee_increase_wei: i128,
    pub truncated: bool,
}

/// Everything produced by one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImpactReport {
    pub summary: SummaryStats,
    pub senders: Vec<EntityImpact>,
    pub contracts: Vec<EntityImpact>,
    pub pairs: Vec<PairImpact>,
    pub patterns: UsagePatterns,
}
