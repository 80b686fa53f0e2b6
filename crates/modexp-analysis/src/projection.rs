//! Monthly cost projections for representative caller archetypes.

use serde::Serialize;

use crate::call::InvalidRecord;
use crate::gas::{eip7883_cost, legacy_cost, GasInput};

/// Exponent assumed for every projected call.
pub const PROJECTION_EXPONENT: &[u8] = &[0x01, 0x00, 0x01];
/// Exponent length assumed for every projected call.
pub const PROJECTION_EXPONENT_SIZE: u64 = 32;
const DAYS_PER_MONTH: f64 = 30.0;

/// One archetype: `count` identical entities making `daily_calls` calls
/// with `base = modulus = input_size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityProfile {
    pub entity_type: &'static str,
    pub count: u32,
    pub input_size: u64,
    pub daily_calls: u64,
}

const fn profile(
    entity_type: &'static str,
    count: u32,
    input_size: u64,
    daily_calls: u64,
) -> EntityProfile {
    EntityProfile {
        entity_type,
        count,
        input_size,
        daily_calls,
    }
}

pub const ENTITY_PROFILES: [EntityProfile; 10] = [
    profile("Regular User", 50, 32, 5),
    profile("Regular User", 30, 32, 15),
    profile("Medium Complexity", 15, 64, 10),
    profile("Medium Complexity", 10, 128, 20),
    profile("High Complexity", 5, 256, 25),
    profile("High Complexity", 3, 512, 10),
    profile("DeFi Protocol", 12, 32, 200),
    profile("DeFi Protocol", 8, 64, 150),
    profile("Enterprise", 6, 256, 500),
    profile("Enterprise", 4, 512, 200),
];

/// Price inputs for USD conversion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PricingAssumptions {
    pub eth_price_usd: f64,
    pub gas_price_gwei: f64,
}

impl Default for PricingAssumptions {
    fn default() -> Self {
        Self {
            eth_price_usd: 3_500.0,
            gas_price_gwei: 25.0,
        }
    }
}

impl PricingAssumptions {
    fn gas_to_usd(&self, gas: f64) -> f64 {
        gas * self.gas_price_gwei * 1e-9 * self.eth_price_usd
    }
}

/// Costs shared by every entity of one profile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ProfileCosts {
    pub current_gas: u64,
    pub new_gas: u64,
    pub gas_increase: i128,
    pub cost_ratio: f64,
    pub monthly_usd_current: f64,
    pub monthly_usd_new: f64,
    pub monthly_usd_increase: f64,
}

/// Price one profile.
///
/// # Errors
/// Propagates calculator overflow.
pub fn profile_costs(
    profile: &EntityProfile,
    pricing: &PricingAssumptions,
) -> Result<ProfileCosts, InvalidRecord> {
    let input = GasInput::new(
        profile.input_size,
        PROJECTION_EXPONENT_SIZE,
        profile.input_size,
        PROJECTION_EXPONENT,
    );
    let current_gas = legacy_cost(&input)?;
    let new_gas = eip7883_cost(&input)?;

    let monthly = |gas: u64| {
        pricing.gas_to_usd(profile.daily_calls as f64 * gas as f64) * DAYS_PER_MONTH
    };
    let monthly_usd_current = monthly(current_gas);
    let monthly_usd_new = monthly(new_gas);

    Ok(ProfileCosts {
        current_gas,
        new_gas,
        gas_increase: i128::from(new_gas) - i128::from(current_gas),
        cost_ratio: new_gas as f64 / current_gas as f64,
        monthly_usd_current,
        monthly_usd_new,
        monthly_usd_increase: monthly_usd_new - monthly_usd_current,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityProjection {
    pub entity_id: String,
    pub entity_type: &'static str,
    pub input_size: u64,
    pub exponent_size: u64,
    pub daily_calls: u64,
    pub costs: ProfileCosts,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypeProjection {
    pub entity_type: &'static str,
    pub entity_count: u64,
    pub total_daily_calls: u64,
    pub total_monthly_current: f64,
    pub total_monthly_new: f64,
    pub total_monthly_increase: f64,
    pub avg_cost_ratio: f64,
    pub pct_increase: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectionReport {
    pub pricing: PricingAssumptions,
    /// Ranked by monthly increase, ties by entity id.
    pub entities: Vec<EntityProjection>,
    /// Ranked by total monthly increase.
    pub by_type: Vec<TypeProjection>,
    pub total_monthly_increase: f64,
    pub avg_monthly_increase_per_entity: f64,
    pub entities_over_100_usd: u64,
    pub entities_over_1000_usd: u64,
}

/// Expand `profiles` into individual entities and summarize by type.
///
/// # Errors
/// Propagates calculator overflow.
pub fn project_entities(
    profiles: &[EntityProfile],
    pricing: &PricingAssumptions,
) -> Result<ProjectionReport, InvalidRecord> {
    let mut entities = Vec::new();
    let mut by_type: Vec<TypeProjection> = Vec::new();
    let mut ratio_sums: Vec<f64> = Vec::new();

    for profile in profiles {
        let costs = profile_costs(profile, pricing)?;

        let type_idx = match by_type
            .iter()
            .position(|summary| summary.entity_type == profile.entity_type)
        {
            Some(idx) => idx,
            None => {
                by_type.push(TypeProjection {
                    entity_type: profile.entity_type,
                    entity_count: 0,
                    total_daily_calls: 0,
                    total_monthly_current: 0.0,
                    total_monthly_new: 0.0,
                    total_monthly_increase: 0.0,
                    avg_cost_ratio: 0.0,
                    pct_increase: 0.0,
                });
                ratio_sums.push(0.0);
                by_type.len() - 1
            }
        };

        // numbering continues across profiles of the same type
        let first_id = by_type[type_idx].entity_count + 1;
        let count = u64::from(profile.count);
        let summary = &mut by_type[type_idx];
        summary.entity_count += count;
        summary.total_daily_calls += profile.daily_calls * count;
        summary.total_monthly_current += costs.monthly_usd_current * count as f64;
        summary.total_monthly_new += costs.monthly_usd_new * count as f64;
        summary.total_monthly_increase += costs.monthly_usd_increase * count as f64;
        ratio_sums[type_idx] += costs.cost_ratio * count as f64;

        for n in first_id..first_id + count {
            entities.push(EntityProjection {
                entity_id: format!("{}_{n:03}", profile.entity_type),
                entity_type: profile.entity_type,
                input_size: profile.input_size,
                exponent_size: PROJECTION_EXPONENT_SIZE,
                daily_calls: profile.daily_calls,
                costs,
            });
        }
    }

    for (summary, ratio_sum) in by_type.iter_mut().zip(&ratio_sums) {
        if summary.entity_count > 0 {
            summary.avg_cost_ratio = ratio_sum / summary.entity_count as f64;
        }
        if summary.total_monthly_current > 0.0 {
            summary.pct_increase =
                100.0 * summary.total_monthly_increase / summary.total_monthly_current;
        }
    }

    entities.sort_by(|a, b| {
        b.costs
            .monthly_usd_increase
            .total_cmp(&a.costs.monthly_usd_increase)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    by_type.sort_by(|a, b| {
        b.total_monthly_increase
            .total_cmp(&a.total_monthly_increase)
            .then_with(|| a.entity_type.cmp(b.entity_type))
    });

    let total_monthly_increase: f64 = entities.iter().map(|e| e.costs.monthly_usd_increase).sum();
    let avg_monthly_increase_per_entity = if entities.is_empty() {
        0.0
    } else {
        total_monthly_increase / entities.len() as f64
    };
    let over = |threshold: f64| {
        entities
            .iter()
            .filter(|e| e.costs.monthly_usd_increase > threshold)
            .count() as u64
    };
    let entities_over_100_usd = over(100.0);
    let entities_over_1000_usd = over(1_000.0);

    tracing::debug!(
        entities = entities.len(),
        types = by_type.len(),
        "projected entity costs"
    );

    Ok(ProjectionReport {
        pricing: *pricing,
        entities,
        by_type,
        total_monthly_increase,
        avg_monthly_increase_per_entity,
        entities_over_100_usd,
        entities_over_1000_usd,
    })
}
