//! Per-address and per-pair rollups of gas impact.

use std::collections::{BTreeSet, HashMap};

use alloy::primitives::Address;
use serde::Serialize;

use crate::call::CostedCall;

/// Running totals for one address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityAccumulator {
    pub call_count: u64,
    pub total_increase: i128,
    pub total_current_cost: u128,
    pub total_new_cost: u128,
    /// Distinct counterparts; only tracked for contract-keyed rollups.
    pub counterparts: Option<BTreeSet<Address>>,
}

impl EntityAccumulator {
    fn tracking_counterparts() -> Self {
        Self {
            counterparts: Some(BTreeSet::new()),
            ..Self::default()
        }
    }

    pub fn observe(&mut self, call: &CostedCall, counterpart: Option<Address>) {
        self.call_count += 1;
        self.total_increase += i128::from(call.increase());
        self.total_current_cost += u128::from(call.current_cost);
        self.total_new_cost += u128::from(call.new_cost);
        if let (Some(set), Some(address)) = (self.counterparts.as_mut(), counterpart) {
            set.insert(address);
        }
    }

    pub fn merge(&mut self, other: &EntityAccumulator) {
        self.call_count += other.call_count;
        self.total_increase += other.total_increase;
        self.total_current_cost += other.total_current_cost;
        self.total_new_cost += other.total_new_cost;
        match (self.counterparts.as_mut(), other.counterparts.as_ref()) {
            (Some(mine), Some(theirs)) => mine.extend(theirs.iter().copied()),
            (None, Some(theirs)) => self.counterparts = Some(theirs.clone()),
            _ => {}
        }
    }

    fn finalize(&self, address: Address) -> EntityImpact {
        EntityImpact {
            address,
            total_increase: self.total_increase,
            avg_increase: if self.call_count == 0 {
                0.0
            } else {
                self.total_increase as f64 / self.call_count as f64
            },
            call_count: self.call_count,
            unique_users: self.counterparts.as_ref().map(|set| set.len() as u64),
            total_current_cost: self.total_current_cost,
            total_new_cost: self.total_new_cost,
            avg_cost_ratio: (self.total_current_cost > 0)
                .then(|| self.total_new_cost as f64 / self.total_current_cost as f64),
        }
    }
}

/// Final rollup for one sender or contract.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityImpact {
    pub address: Address,
    pub total_increase: i128,
    pub avg_increase: f64,
    pub call_count: u64,
    /// Distinct senders calling the contract; `None` for sender rollups.
    pub unique_users: Option<u64>,
    pub total_current_cost: u128,
    pub total_new_cost: u128,
    /// `total_new_cost / total_current_cost`.
    pub avg_cost_ratio: Option<f64>,
}

/// Final rollup for one sender→contract pair.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PairImpact {
    pub sender: Address,
    pub contract: Address,
    pub total_increase: i128,
    pub avg_increase: f64,
    pub call_count: u64,
    pub total_current_cost: u128,
    pub total_new_cost: u128,
    pub avg_cost_ratio: Option<f64>,
}

/// Keyed accumulators for senders, contracts and pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityRollups {
    senders: HashMap<Address, EntityAccumulator>,
    contracts: HashMap<Address, EntityAccumulator>,
    pairs: HashMap<(Address, Address), EntityAccumulator>,
}

impl EntityRollups {
    /// Attribute one call. Calls without a sender skip the sender and pair
    /// rollups; calls without a contract skip the contract and pair rollups.
    pub fn observe(&mut self, call: &CostedCall) {
        let sender = call.call.sender;
        let contract = call.call.contract;

        if let Some(sender) = sender {
            self.senders.entry(sender).or_default().observe(call, None);
        }
        if let Some(contract) = contract {
            self.contracts
                .entry(contract)
                .or_insert_with(EntityAccumulator::tracking_counterparts)
                .observe(call, sender);
        }
        if let (Some(sender), Some(contract)) = (sender, contract) {
            self.pairs
                .entry((sender, contract))
                .or_default()
                .observe(call, None);
        }
    }

    pub fn merge(&mut self, other: &EntityRollups) {
        for (address, acc) in &other.senders {
            self.senders.entry(*address).or_default().merge(acc);
        }
        for (address, acc) in &other.contracts {
            self.contracts
                .entry(*address)
                .or_insert_with(EntityAccumulator::tracking_counterparts)
                .merge(acc);
        }
        for (key, acc) in &other.pairs {
            self.pairs.entry(*key).or_default().merge(acc);
        }
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    pub fn senders(&self) -> Vec<EntityImpact> {
        rank_entities(finalize_all(&self.senders))
    }

    pub fn contracts(&self) -> Vec<EntityImpact> {
        rank_entities(finalize_all(&self.contracts))
    }

    pub fn pairs(&self) -> Vec<PairImpact> {
        let pairs = self
            .pairs
            .iter()
            .map(|(&(sender, contract), acc)| {
                let impact = acc.finalize(sender);
                PairImpact {
                    sender,
                    contract,
                    total_increase: impact.total_increase,
                    avg_increase: impact.avg_increase,
                    call_count: impact.call_count,
                    total_current_cost: impact.total_current_cost,
                    total_new_cost: impact.total_new_cost,
                    avg_cost_ratio: impact.avg_cost_ratio,
                }
            })
            .collect();
        rank_pairs(pairs)
    }
}

fn finalize_all(map: &HashMap<Address, EntityAccumulator>) -> Vec<EntityImpact> {
    map.iter()
        .map(|(address, acc)| acc.finalize(*address))
        .collect()
}

/// Sort by total increase descending, then call count descending, then
/// address ascending.
pub fn rank_entities(mut entities: Vec<EntityImpact>) -> Vec<EntityImpact> {
    entities.sort_by(|a, b| {
        b.total_increase
            .cmp(&a.total_increase)
            .then(b.call_count.cmp(&a.call_count))
            .then(a.address.cmp(&b.address))
    });
    entities
}

/// Same ordering as [`rank_entities`] with `(sender, contract)` as the final key.
pub fn rank_pairs(mut pairs: Vec<PairImpact>) -> Vec<PairImpact> {
    pairs.sort_by(|a, b| {
        b.total_increase
            .cmp(&a.total_increase)
            .then(b.call_count.cmp(&a.call_count))
            .then((a.sender, a.contract).cmp(&(b.sender, b.contract)))
    });
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::ModExpCall;
    use alloy::primitives::B256;

    fn costed(sender: u8, contract: u8, current: u64, new: u64) -> CostedCall {
        CostedCall {
            call: ModExpCall {
                base_size: 32,
                exponent_size: 3,
                modulus_size: 32,
                exponent: vec![0x01, 0x00, 0x01],
                sender: Some(Address::repeat_byte(sender)),
                contract: Some(Address::repeat_byte(contract)),
                tx_hash: B256::repeat_byte(sender),
                block_number: 1,
                recorded_cost: Some(current),
                gas_price_wei: None,
            },
            current_cost: current,
            new_cost: new,
            computed_legacy_cost: current,
        }
    }

    #[test]
    fn ranking_breaks_ties_by_count_then_address() {
        let mut rollups = EntityRollups::default();
        // sender 0x03: one call, +300
        rollups.observe(&costed(3, 9, 200, 500));
        // sender 0x02: two calls, +150 each
        rollups.observe(&costed(2, 9, 200, 350));
        rollups.observe(&costed(2, 9, 200, 350));
        // sender 0x01: one call, +300
        rollups.observe(&costed(1, 9, 200, 500));

        let order: Vec<Address> = rollups.senders().iter().map(|e| e.address).collect();
        assert_eq!(
            order,
            vec![
                Address::repeat_byte(2),
                Address::repeat_byte(1),
                Address::repeat_byte(3)
            ]
        );
    }

    #[test]
    fn contracts_count_unique_users() {
        let mut rollups = EntityRollups::default();
        rollups.observe(&costed(1, 9, 200, 500));
        rollups.observe(&costed(1, 9, 200, 500));
        rollups.observe(&costed(2, 9, 1_000, 500));

        let contracts = rollups.contracts();
        assert_eq!(contracts.len(), 1);
        let contract = &contracts[0];
        assert_eq!(contract.unique_users, Some(2));
        assert_eq!(contract.call_count, 3);
        assert_eq!(contract.total_increase, 100);
        assert_eq!(contract.total_current_cost, 1_400);
        assert_eq!(contract.total_new_cost, 1_500);
        assert_eq!(contract.avg_cost_ratio, Some(1_500.0 / 1_400.0));

        assert!(rollups.senders().iter().all(|s| s.unique_users.is_none()));
        assert_eq!(rollups.pairs().len(), 2);
    }

    #[test]
    fn merged_rollups_match_single_pass() {
        let calls = [
            costed(1, 7, 200, 500),
            costed(2, 7, 200, 900),
            costed(1, 8, 1_365, 10_922),
            costed(3, 8, 5_000, 4_000),
        ];

        let mut single = EntityRollups::default();
        calls.iter().for_each(|call| single.observe(call));

        let mut left = EntityRollups::default();
        let mut right = EntityRollups::default();
        calls[..1].iter().for_each(|call| left.observe(call));
        calls[1..].iter().for_each(|call| right.observe(call));
        right.merge(&left);

        assert_eq!(single.senders(), right.senders());
        assert_eq!(single.contracts(), right.contracts());
        assert_eq!(single.pairs(), right.pairs());
    }

    #[test]
    fn unattributed_calls_skip_rollups() {
        let mut rollups = EntityRollups::default();

        let mut anonymous = costed(1, 9, 200, 500);
        anonymous.call.sender = None;
        anonymous.call.contract = None;
        rollups.observe(&anonymous);
        assert_eq!(rollups.sender_count(), 0);
        assert_eq!(rollups.contract_count(), 0);
        assert!(rollups.pairs().is_empty());

        // contract known, sender missing
        let mut contract_only = costed(1, 9, 200, 500);
        contract_only.call.sender = None;
        rollups.observe(&contract_only);
        let contracts = rollups.contracts();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].call_count, 1);
        assert_eq!(contracts[0].unique_users, Some(0));
        assert_eq!(rollups.sender_count(), 0);
        assert!(rollups.pairs().is_empty());
    }
}
