//! Order statistics with linear interpolation.
//!
//! For `n` sorted values and percentile `p`: `rank = p / 100 * (n - 1)`,
//! `value = v[lo] + (v[lo + 1] - v[lo]) * (rank - lo)`.

use std::collections::BTreeMap;

use serde::Serialize;

/// Percentile points reported for gas increases.
pub const INCREASE_PERCENTILES: [u8; 7] = [10, 25, 50, 75, 90, 95, 99];
/// Percentile points reported for cost ratios.
pub const RATIO_PERCENTILES: [u8; 5] = [50, 75, 90, 95, 99];

/// One reported percentile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PercentilePoint {
    pub percentile: u8,
    pub value: f64,
}

/// Interpolated percentile of an ascending slice. `None` when empty.
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;
    let low = sorted[lo];
    if frac == 0.0 || lo + 1 >= n {
        return Some(low);
    }
    Some(low + (sorted[lo + 1] - low) * frac)
}

/// Ascending sort for finite floats.
pub fn sort_floats(values: &mut [f64]) {
    values.sort_by(f64::total_cmp);
}

/// Percentile points over a float sample, sorting a copy.
pub fn float_percentiles(values: &[f64], points: &[u8]) -> Vec<PercentilePoint> {
    let mut sorted = values.to_vec();
    sort_floats(&mut sorted);
    points
        .iter()
        .filter_map(|&percentile| {
            percentile_of_sorted(&sorted, f64::from(percentile))
                .map(|value| PercentilePoint { percentile, value })
        })
        .collect()
}

/// Multiset of integer samples kept as an ordered value→count map.
///
/// Order statistics come out exact and independent of insertion order, and
/// two distributions merge by adding counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Distribution {
    counts: BTreeMap<i64, u64>,
    len: u64,
    sum: i128,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: i64) {
        self.record_n(value, 1);
    }

    pub fn record_n(&mut self, value: i64, count: u64) {
        if count == 0 {
            return;
        }
        *self.counts.entry(value).or_default() += count;
        self.len += count;
        self.sum += i128::from(value) * i128::from(count);
    }

    pub fn merge(&mut self, other: &Distribution) {
        for (&value, &count) in &other.counts {
            self.record_n(value, count);
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sum(&self) -> i128 {
        self.sum
    }

    pub fn mean(&self) -> Option<f64> {
        (self.len > 0).then(|| self.sum as f64 / self.len as f64)
    }

    pub fn min(&self) -> Option<i64> {
        self.counts.keys().next().copied()
    }

    pub fn max(&self) -> Option<i64> {
        self.counts.keys().next_back().copied()
    }

    /// Value at 0-based position `index` of the sorted sample.
    fn nth(&self, index: u64) -> Option<i64> {
        let mut seen = 0u64;
        for (&value, &count) in &self.counts {
            seen += count;
            if index < seen {
                return Some(value);
            }
        }
        None
    }

    /// Interpolated percentile, `None` when empty.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.len == 0 {
            return None;
        }

        let rank = (p.clamp(0.0, 100.0) / 100.0) * (self.len - 1) as f64;
        let lo = rank.floor() as u64;
        let frac = rank - lo as f64;
        let low = self.nth(lo)? as f64;
        if frac == 0.0 || lo + 1 >= self.len {
            return Some(low);
        }
        let high = self.nth(lo + 1)? as f64;
        Some(low + (high - low) * frac)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    pub fn percentiles(&self, points: &[u8]) -> Vec<PercentilePoint> {
        points
            .iter()
            .filter_map(|&percentile| {
                self.percentile(f64::from(percentile))
                    .map(|value| PercentilePoint { percentile, value })
            })
            .collect()
    }

    /// The `limit` most frequent values, by count descending then value ascending.
    pub fn most_common(&self, limit: usize) -> Vec<(i64, u64)> {
        let mut entries: Vec<(i64, u64)> = self
            .counts
            .iter()
            .map(|(&value, &count)| (value, count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }

    /// Number of samples `v` with `lower < v <= upper`.
    pub fn count_in(&self, lower: i64, upper: i64) -> u64 {
        if lower >= upper {
            return 0;
        }
        self.counts
            .range(lower + 1..=upper)
            .map(|(_, &count)| count)
            .sum()
    }

    /// Number of samples strictly greater than `lower`.
    pub fn count_above(&self, lower: i64) -> u64 {
        match lower.checked_add(1) {
            Some(start) => self.counts.range(start..).map(|(_, &count)| count).sum(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(values: &[i64]) -> Distribution {
        let mut distribution = Distribution::new();
        for &value in values {
            distribution.record(value);
        }
        distribution
    }

    #[test]
    fn interpolates_between_order_statistics() {
        let distribution = dist(&[400, 100, 300, 200]);
        assert_eq!(distribution.percentile(50.0), Some(250.0));
        let p10 = distribution.percentile(10.0).expect("non-empty");
        assert!((p10 - 130.0).abs() < 1e-9);
        let p99 = distribution.percentile(99.0).expect("non-empty");
        assert!((p99 - 397.0).abs() < 1e-9);
        assert_eq!(distribution.percentile(100.0), Some(400.0));
        assert_eq!(distribution.percentile(0.0), Some(100.0));
    }

    #[test]
    fn duplicates_behave_like_a_sorted_vector() {
        let distribution = dist(&[5, 5, 5, 10]);
        let sorted = [5.0, 5.0, 5.0, 10.0];
        for p in [10.0, 25.0, 50.0, 75.0, 90.0, 99.0] {
            assert_eq!(distribution.percentile(p), percentile_of_sorted(&sorted, p));
        }
        assert_eq!(distribution.most_common(1), vec![(5, 3)]);
    }

    #[test]
    fn merge_is_order_independent() {
        let mut left = dist(&[1, 9, 4]);
        let right = dist(&[-3, 4, 7]);
        left.merge(&right);

        let mut reversed = dist(&[7, 4, -3]);
        reversed.merge(&dist(&[4, 9, 1]));

        assert_eq!(left, reversed);
        assert_eq!(left.len(), 6);
        assert_eq!(left.sum(), 22);
        assert_eq!(left.min(), Some(-3));
        assert_eq!(left.max(), Some(9));
    }

    #[test]
    fn empty_has_no_statistics() {
        let distribution = Distribution::new();
        assert!(distribution.is_empty());
        assert_eq!(distribution.mean(), None);
        assert_eq!(distribution.median(), None);
        assert!(distribution.percentiles(&INCREASE_PERCENTILES).is_empty());
        assert!(float_percentiles(&[], &RATIO_PERCENTILES).is_empty());
    }

    #[test]
    fn bracket_counts_are_right_inclusive() {
        let distribution = dist(&[200, 500, 501, 1_000, 100_001]);
        assert_eq!(distribution.count_in(0, 500), 2);
        assert_eq!(distribution.count_in(500, 1_000), 2);
        assert_eq!(distribution.count_above(100_000), 1);
    }
}
