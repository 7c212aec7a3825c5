//! Tax accrual engine: once per simulated day, every owned resource accrues
//! `value * rate / 365` against its owner, idempotently per (resource, day).

use std::collections::BTreeMap;

use contracts::{ZoneRecord, DAYS_PER_YEAR, MAX_RATE_BPS, TREASURY_ACCOUNT};
use rayon::prelude::*;

use crate::economy::{EconomyError, MoneyLedger};
use crate::ledger::ValuationLedger;

/// Daily tax liability in micro-DAI for an annualized rate in basis points.
/// Truncates toward zero; never negative.
pub fn daily_tax_udai(value_udai: i64, rate_bps: u32) -> i64 {
    if value_udai <= 0 {
        return 0;
    }
    let rate_bps = rate_bps.min(MAX_RATE_BPS);
    let numerator = i128::from(value_udai) * i128::from(rate_bps);
    let denominator = i128::from(MAX_RATE_BPS) * i128::from(DAYS_PER_YEAR);
    i64::try_from(numerator / denominator).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccrualOutcome {
    pub resource_id: String,
    pub owner: String,
    pub day: u64,
    pub amount_udai: i64,
    pub paid: bool,
    pub arrears_days: u64,
    /// Arrears exceeded the grace period; the world force-releases the
    /// resource after recording this outcome.
    pub force_release: bool,
}

#[derive(Debug)]
pub struct TaxAccrual {
    grace_period_days: u64,
    pool: Option<rayon::ThreadPool>,
}

impl TaxAccrual {
    pub fn new(grace_period_days: u64, worker_threads: usize) -> Self {
        let pool = if worker_threads > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .build()
                .ok()
        } else {
            None
        };
        Self {
            grace_period_days,
            pool,
        }
    }

    /// Accrue one simulated day across all owned resources. Liabilities are
    /// computed in parallel (pure reads), then applied serially so the money
    /// ledger sees a single writer. A failure on one resource is logged and
    /// skipped; the remaining resources still accrue.
    pub fn accrue_day(
        &self,
        day: u64,
        tick: u64,
        zones: &BTreeMap<String, ZoneRecord>,
        ledger: &mut ValuationLedger,
        money: &mut MoneyLedger,
    ) -> Vec<AccrualOutcome> {
        let due = ledger
            .resources()
            .filter_map(|resource| {
                let owner = resource.owner.clone()?;
                if resource.last_accrued_day.map_or(false, |last| last >= day) {
                    return None;
                }
                Some((
                    resource.resource_id.clone(),
                    resource.zone_id.clone(),
                    owner,
                    resource.declared_value_udai,
                ))
            })
            .collect::<Vec<_>>();

        let compute = |batch: &[(String, String, String, i64)]| {
            batch
                .par_iter()
                .map(|(resource_id, zone_id, owner, value)| {
                    let rate_bps = zones.get(zone_id).map(|zone| zone.tax_rate_bps);
                    (
                        resource_id.clone(),
                        owner.clone(),
                        rate_bps.map(|rate| daily_tax_udai(*value, rate)),
                    )
                })
                .collect::<Vec<_>>()
        };
        let liabilities = match &self.pool {
            Some(pool) => pool.install(|| compute(&due)),
            None => compute(&due),
        };

        let mut outcomes = Vec::with_capacity(liabilities.len());
        for (resource_id, owner, liability) in liabilities {
            let Some(amount_udai) = liability else {
                tracing::warn!(
                    resource_id = resource_id.as_str(),
                    "skipping accrual: resource references an unknown zone"
                );
                if let Ok(resource) = ledger.get_mut(&resource_id) {
                    resource.last_accrued_day = Some(day);
                }
                continue;
            };

            let paid = if amount_udai == 0 {
                true
            } else {
                match money.transfer(&owner, TREASURY_ACCOUNT, amount_udai, "harberger_tax", tick) {
                    Ok(_) => true,
                    Err(EconomyError::InsufficientBalance(_)) => false,
                    Err(err) => {
                        tracing::warn!(
                            resource_id = resource_id.as_str(),
                            owner = owner.as_str(),
                            error = %err,
                            "skipping accrual: tax debit failed"
                        );
                        if let Ok(resource) = ledger.get_mut(&resource_id) {
                            resource.last_accrued_day = Some(day);
                        }
                        continue;
                    }
                }
            };

            let Ok(resource) = ledger.get_mut(&resource_id) else {
                continue;
            };
            resource.last_accrued_day = Some(day);
            if paid {
                resource.arrears_days = 0;
            } else {
                resource.arrears_days += 1;
            }
            let arrears_days = resource.arrears_days;
            let force_release = arrears_days > self.grace_period_days;
            resource.version += 1;

            ledger.append_tax_entry(&resource_id, &owner, day, tick, amount_udai, paid);
            outcomes.push(AccrualOutcome {
                resource_id,
                owner,
                day,
                amount_udai,
                paid,
                arrears_days,
                force_release,
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ResourceKind, MICRO_PER_DAI};

    use crate::ledger::ResourceState;

    fn zone(zone_id: &str, rate_bps: u32) -> ZoneRecord {
        ZoneRecord {
            zone_id: zone_id.to_string(),
            tax_rate_bps: rate_bps,
            allowed_kinds: vec![ResourceKind::Housing],
            eligibility_rules: Vec::new(),
            society_id: None,
        }
    }

    fn owned_resource(resource_id: &str, zone_id: &str, owner: &str, value: i64) -> ResourceState {
        ResourceState {
            resource_id: resource_id.to_string(),
            zone_id: zone_id.to_string(),
            kind: ResourceKind::Housing,
            declared_value_udai: value,
            owner: Some(owner.to_string()),
            acquired_tick: Some(0),
            min_holding_ticks: 0,
            release_notice_ticks: 24,
            pending_release: None,
            depreciating: false,
            depreciation_daily_bps: 0,
            arrears_days: 0,
            last_accrued_day: Some(0),
            version: 0,
        }
    }

    fn setup(value: i64, rate_bps: u32, balance: i64) -> (TaxAccrual, BTreeMap<String, ZoneRecord>, ValuationLedger, MoneyLedger) {
        let accrual = TaxAccrual::new(3, 1);
        let mut zones = BTreeMap::new();
        zones.insert("zone:a".to_string(), zone("zone:a", rate_bps));
        let mut ledger = ValuationLedger::default();
        ledger.insert_resource(owned_resource("res:h1", "zone:a", "id:alice", value));
        let mut money = MoneyLedger::default();
        money.open_account("id:alice", balance);
        money.open_account(TREASURY_ACCOUNT, 0);
        (accrual, zones, ledger, money)
    }

    #[test]
    fn hundred_dai_at_ten_percent_accrues_expected_daily_tax() {
        // 100 DAI at 10% annual: 100_000_000 * 1000 / (10_000 * 365) = 27_397 uDAI/day.
        assert_eq!(daily_tax_udai(100 * MICRO_PER_DAI, 1_000), 27_397);
    }

    #[test]
    fn zero_valuation_accrues_zero_tax() {
        assert_eq!(daily_tax_udai(0, 10_000), 0);
    }

    #[test]
    fn accrual_debits_owner_into_treasury() {
        let (accrual, zones, mut ledger, mut money) =
            setup(100 * MICRO_PER_DAI, 1_000, MICRO_PER_DAI);

        let outcomes = accrual.accrue_day(1, 24, &zones, &mut ledger, &mut money);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].paid);
        assert_eq!(outcomes[0].amount_udai, 27_397);
        assert_eq!(money.balance(TREASURY_ACCOUNT), Some(27_397));
        assert_eq!(money.balance("id:alice"), Some(MICRO_PER_DAI - 27_397));
    }

    #[test]
    fn duplicated_day_never_double_charges() {
        let (accrual, zones, mut ledger, mut money) =
            setup(100 * MICRO_PER_DAI, 1_000, MICRO_PER_DAI);

        let first = accrual.accrue_day(1, 24, &zones, &mut ledger, &mut money);
        let replay = accrual.accrue_day(1, 24, &zones, &mut ledger, &mut money);
        assert_eq!(first.len(), 1);
        assert!(replay.is_empty());
        assert_eq!(money.balance(TREASURY_ACCOUNT), Some(27_397));
    }

    #[test]
    fn nonpayment_accumulates_arrears_until_force_release() {
        let (accrual, zones, mut ledger, mut money) = setup(100 * MICRO_PER_DAI, 1_000, 0);

        let mut released_on_day = None;
        for day in 1..=6 {
            let outcomes = accrual.accrue_day(day, day * 24, &zones, &mut ledger, &mut money);
            assert_eq!(outcomes.len(), 1);
            assert!(!outcomes[0].paid);
            assert_eq!(outcomes[0].arrears_days, day);
            if outcomes[0].force_release {
                released_on_day = Some(day);
                break;
            }
        }
        // Grace period of 3 days: day 4 is the first past it.
        assert_eq!(released_on_day, Some(4));
    }

    #[test]
    fn unknown_zone_is_skipped_without_halting_the_batch() {
        let accrual = TaxAccrual::new(3, 1);
        let mut zones = BTreeMap::new();
        zones.insert("zone:a".to_string(), zone("zone:a", 1_000));
        let mut ledger = ValuationLedger::default();
        ledger.insert_resource(owned_resource("res:bad", "zone:ghost", "id:alice", 50));
        ledger.insert_resource(owned_resource(
            "res:good",
            "zone:a",
            "id:alice",
            100 * MICRO_PER_DAI,
        ));
        let mut money = MoneyLedger::default();
        money.open_account("id:alice", MICRO_PER_DAI);
        money.open_account(TREASURY_ACCOUNT, 0);

        let outcomes = accrual.accrue_day(1, 24, &zones, &mut ledger, &mut money);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].resource_id, "res:good");
    }
}
