//! Usage patterns: which parameter shapes and exponents callers use, and
//! where current costs fall.

use std::collections::HashMap;

use alloy::primitives::B256;
use serde::Serialize;

use crate::call::CostedCall;
use crate::stats::Distribution;

/// Exponents treated as Fermat numbers.
pub const FERMAT_EXPONENTS: [u64; 5] = [3, 5, 17, 257, 65_537];

const TOP_PARAM_COMBOS: usize = 20;
const TOP_COMMON_COSTS: usize = 10;

/// Current-cost brackets as `(label, lower exclusive, upper inclusive)`.
/// `None` means unbounded above.
pub const COST_BRACKETS: [(&str, i64, Option<i64>); 7] = [
    ("<500", -1, Some(500)),
    ("500-1k", 500, Some(1_000)),
    ("1k-5k", 1_000, Some(5_000)),
    ("5k-10k", 5_000, Some(10_000)),
    ("10k-50k", 10_000, Some(50_000)),
    ("50k-100k", 50_000, Some(100_000)),
    (">100k", 100_000, None),
];

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn exponent_value(exponent: &[u8]) -> Option<u64> {
    if exponent.len() > 8 {
        return None;
    }
    Some(
        exponent
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
    )
}

/// Mergeable pattern counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageAccumulator {
    total_calls: u64,
    param_combos: HashMap<(u64, u64, u64), u64>,
    fermat_calls: u64,
    base_sizes: Distribution,
    exponent_sizes: Distribution,
    modulus_sizes: Distribution,
    current_costs: Distribution,
    all_32_bytes: u64,
    tx_calls: HashMap<B256, u64>,
}

impl UsageAccumulator {
    pub fn observe(&mut self, costed: &CostedCall) {
        let call = &costed.call;
        self.total_calls += 1;
        *self
            .param_combos
            .entry((call.base_size, call.exponent_size, call.modulus_size))
            .or_default() += 1;

        if exponent_value(&call.exponent).is_some_and(|value| FERMAT_EXPONENTS.contains(&value)) {
            self.fermat_calls += 1;
        }

        self.base_sizes.record(to_i64(call.base_size));
        self.exponent_sizes.record(to_i64(call.exponent_size));
        self.modulus_sizes.record(to_i64(call.modulus_size));
        self.current_costs.record(to_i64(costed.current_cost));

        if call.is_all_32_bytes() {
            self.all_32_bytes += 1;
        }
        *self.tx_calls.entry(call.tx_hash).or_default() += 1;
    }

    pub fn merge(&mut self, other: &UsageAccumulator) {
        self.total_calls += other.total_calls;
        for (combo, count) in &other.param_combos {
            *self.param_combos.entry(*combo).or_default() += count;
        }
        self.fermat_calls += other.fermat_calls;
        self.base_sizes.merge(&other.base_sizes);
        self.exponent_sizes.merge(&other.exponent_sizes);
        self.modulus_sizes.merge(&other.modulus_sizes);
        self.current_costs.merge(&other.current_costs);
        self.all_32_bytes += other.all_32_bytes;
        for (tx, count) in &other.tx_calls {
            *self.tx_calls.entry(*tx).or_default() += count;
        }
    }

    pub fn unique_transactions(&self) -> u64 {
        self.tx_calls.len() as u64
    }

    pub fn finalize(&self) -> UsagePatterns {
        let mut combos: Vec<ParamCombo> = self
            .param_combos
            .iter()
            .map(|(&(base_size, exponent_size, modulus_size), &count)| ParamCombo {
                base_size,
                exponent_size,
                modulus_size,
                count,
            })
            .collect();
        combos.sort_by(|a, b| {
            b.count.cmp(&a.count).then(
                (a.base_size, a.exponent_size, a.modulus_size).cmp(&(
                    b.base_size,
                    b.exponent_size,
                    b.modulus_size,
                )),
            )
        });
        combos.truncate(TOP_PARAM_COMBOS);

        let cost_brackets = COST_BRACKETS
            .iter()
            .map(|&(label, lower, upper)| CostBracket {
                label,
                count: match upper {
                    Some(upper) => self.current_costs.count_in(lower, upper),
                    None => self.current_costs.count_above(lower),
                },
            })
            .collect();

        let most_common_costs = self
            .current_costs
            .most_common(TOP_COMMON_COSTS)
            .into_iter()
            .map(|(cost, count)| CostFrequency {
                cost: cost.max(0) as u64,
                count,
            })
            .collect();

        let tx_count = self.tx_calls.len() as u64;
        let calls_per_tx = TxCallStats {
            mean: (tx_count > 0).then(|| self.total_calls as f64 / tx_count as f64),
            max: self.tx_calls.values().copied().max().unwrap_or(0),
            txs_with_multiple_calls: self.tx_calls.values().filter(|&&n| n > 1).count() as u64,
        };

        UsagePatterns {
            top_param_combos: combos,
            fermat_calls: self.fermat_calls,
            fermat_pct: pct(self.fermat_calls, self.total_calls),
            base_size: SizeStats::from_distribution(&self.base_sizes),
            exponent_size: SizeStats::from_distribution(&self.exponent_sizes),
            modulus_size: SizeStats::from_distribution(&self.modulus_sizes),
            cost_brackets,
            most_common_costs,
            min_current_cost: self.current_costs.min().map(|cost| cost.max(0) as u64),
            max_current_cost: self.current_costs.max().map(|cost| cost.max(0) as u64),
            all_32_byte_calls: self.all_32_bytes,
            calls_per_tx,
        }
    }
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParamCombo {
    pub base_size: u64,
    pub exponent_size: u64,
    pub modulus_size: u64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SizeStats {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub p95: Option<f64>,
    pub max: Option<u64>,
}

impl SizeStats {
    fn from_distribution(distribution: &Distribution) -> Self {
        Self {
            mean: distribution.mean(),
            median: distribution.median(),
            p95: distribution.percentile(95.0),
            max: distribution.max().map(|value| value.max(0) as u64),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CostBracket {
    pub label: &'static str,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CostFrequency {
    pub cost: u64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TxCallStats {
    pub mean: Option<f64>,
    pub max: u64,
    pub txs_with_multiple_calls: u64,
}

/// Finalized usage patterns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UsagePatterns {
    pub top_param_combos: Vec<ParamCombo>,
    pub fermat_calls: u64,
    pub fermat_pct: f64,
    pub base_size: SizeStats,
    pub exponent_size: SizeStats,
    pub modulus_size: SizeStats,
    pub cost_brackets: Vec<CostBracket>,
    pub most_common_costs: Vec<CostFrequency>,
    pub min_current_cost: Option<u64>,
    pub max_current_cost: Option<u64>,
    pub all_32_byte_calls: u64,
    pub calls_per_tx: TxCallStats,
}
