//! Buyout and release settlement. Transfers validate completely before any
//! mutation, so a rejected attempt leaves no partial state behind.

use std::collections::BTreeSet;

use contracts::{ReleaseCause, ResourceStatus, TREASURY_ACCOUNT};

use crate::economy::MoneyLedger;
use crate::ledger::{PendingRelease, ValuationLedger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    NotFound(String),
    /// Within the incumbent's minimum holding period, or a release notice is
    /// already pending.
    Locked {
        resource_id: String,
        reason: String,
    },
    /// A concurrent mutation won the race.
    Conflict {
        resource_id: String,
        details: String,
    },
    InvalidValuation {
        offered_udai: i64,
        required_udai: i64,
    },
    InsufficientFunds {
        account: String,
        required_udai: i64,
    },
    NotOwner {
        resource_id: String,
        caller: String,
    },
    SelfBuyout(String),
    NoPendingRelease(String),
    RevokeWindowElapsed {
        resource_id: String,
        window_ended_tick: u64,
    },
}

impl std::fmt::Display for SettlementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "resource not found: {id}"),
            Self::Locked {
                resource_id,
                reason,
            } => write!(f, "{resource_id} is locked: {reason}"),
            Self::Conflict {
                resource_id,
                details,
            } => write!(f, "settlement conflict on {resource_id}: {details}"),
            Self::InvalidValuation {
                offered_udai,
                required_udai,
            } => write!(f, "offer {offered_udai} below required {required_udai}"),
            Self::InsufficientFunds {
                account,
                required_udai,
            } => write!(f, "{account} cannot cover {required_udai}"),
            Self::NotOwner {
                resource_id,
                caller,
            } => write!(f, "{caller} does not own {resource_id}"),
            Self::SelfBuyout(id) => write!(f, "owner cannot buy out own resource: {id}"),
            Self::NoPendingRelease(id) => write!(f, "no pending release on {id}"),
            Self::RevokeWindowElapsed {
                resource_id,
                window_ended_tick,
            } => write!(
                f,
                "release on {resource_id} is irrevocable since tick {window_ended_tick}"
            ),
        }
    }
}

impl std::error::Error for SettlementError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyoutSettled {
    pub resource_id: String,
    pub previous_owner: Option<String>,
    pub challenger: String,
    pub price_udai: i64,
    pub new_version: u64,
    pub transfer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFinalized {
    pub resource_id: String,
    pub previous_owner: String,
}

#[derive(Debug, Default)]
pub struct SettlementEngine {
    min_claim_increment_udai: i64,
    release_revoke_window_ticks: u64,
    settled_this_tick: BTreeSet<String>,
}

impl SettlementEngine {
    pub fn new(min_claim_increment_udai: i64, release_revoke_window_ticks: u64) -> Self {
        Self {
            min_claim_increment_udai,
            release_revoke_window_ticks,
            settled_this_tick: BTreeSet::new(),
        }
    }

    /// Clears the per-tick settlement set. Called at the top of every tick.
    pub fn begin_tick(&mut self) {
        self.settled_this_tick.clear();
    }

    /// The asking price for a resource right now. Zero-valued resources are
    /// still claimable, at the configured minimum increment.
    pub fn asking_price(&self, declared_value_udai: i64) -> i64 {
        if declared_value_udai == 0 {
            self.min_claim_increment_udai
        } else {
            declared_value_udai
        }
    }

    pub fn attempt_buyout(
        &mut self,
        ledger: &mut ValuationLedger,
        money: &mut MoneyLedger,
        resource_id: &str,
        challenger: &str,
        offered_value_udai: i64,
        expected_version: Option<u64>,
        tick: u64,
    ) -> Result<BuyoutSettled, SettlementError> {
        let previous_owner = {
            let resource = ledger
                .get(resource_id)
                .map_err(|_| SettlementError::NotFound(resource_id.to_string()))?;

            if self.settled_this_tick.contains(resource_id) {
                return Err(SettlementError::Conflict {
                    resource_id: resource_id.to_string(),
                    details: "resource already settled this tick".to_string(),
                });
            }
            if let Some(expected) = expected_version {
                if expected != resource.version {
                    return Err(SettlementError::Conflict {
                        resource_id: resource_id.to_string(),
                        details: format!(
                            "expected_version={expected} actual_version={}",
                            resource.version
                        ),
                    });
                }
            }
            if resource.owner.as_deref() == Some(challenger) {
                return Err(SettlementError::SelfBuyout(resource_id.to_string()));
            }
            if resource.status() == ResourceStatus::ReleasePending {
                return Err(SettlementError::Locked {
                    resource_id: resource_id.to_string(),
                    reason: "release notice pending".to_string(),
                });
            }
            // The holding-period lock shields the incumbent regardless of price.
            if resource.owner.is_some() && resource.within_holding_period(tick) {
                return Err(SettlementError::Locked {
                    resource_id: resource_id.to_string(),
                    reason: "within minimum holding period".to_string(),
                });
            }

            let required_udai = self.asking_price(resource.declared_value_udai);
            if offered_value_udai < required_udai {
                return Err(SettlementError::InvalidValuation {
                    offered_udai: offered_value_udai,
                    required_udai,
                });
            }
            resource.owner.clone()
        };

        let payee = previous_owner.as_deref().unwrap_or(TREASURY_ACCOUNT);
        if offered_value_udai > 0 {
            let available = money
                .balance(challenger)
                .ok_or_else(|| SettlementError::InsufficientFunds {
                    account: challenger.to_string(),
                    required_udai: offered_value_udai,
                })?;
            if available < offered_value_udai {
                return Err(SettlementError::InsufficientFunds {
                    account: challenger.to_string(),
                    required_udai: offered_value_udai,
                });
            }
        }

        // Validation complete; the three mutation steps below cannot fail.
        let transfer_id = if offered_value_udai > 0 {
            Some(
                money
                    .transfer(challenger, payee, offered_value_udai, "buyout", tick)
                    .map_err(|_| SettlementError::InsufficientFunds {
                        account: challenger.to_string(),
                        required_udai: offered_value_udai,
                    })?,
            )
        } else {
            None
        };
        if previous_owner.is_some() {
            ledger
                .close_ownership(resource_id, tick, ReleaseCause::Buyout)
                .map_err(|_| SettlementError::NotFound(resource_id.to_string()))?;
        }
        let new_version = ledger
            .open_ownership(resource_id, challenger, offered_value_udai, tick)
            .map_err(|_| SettlementError::NotFound(resource_id.to_string()))?;

        self.settled_this_tick.insert(resource_id.to_string());
        Ok(BuyoutSettled {
            resource_id: resource_id.to_string(),
            previous_owner,
            challenger: challenger.to_string(),
            price_udai: offered_value_udai,
            new_version,
            transfer_id,
        })
    }

    pub fn request_release(
        &mut self,
        ledger: &mut ValuationLedger,
        resource_id: &str,
        owner: &str,
        tick: u64,
    ) -> Result<PendingRelease, SettlementError> {
        let resource = ledger
            .get_mut(resource_id)
            .map_err(|_| SettlementError::NotFound(resource_id.to_string()))?;
        if resource.owner.as_deref() != Some(owner) {
            return Err(SettlementError::NotOwner {
                resource_id: resource_id.to_string(),
                caller: owner.to_string(),
            });
        }
        if resource.pending_release.is_some() {
            return Err(SettlementError::Locked {
                resource_id: resource_id.to_string(),
                reason: "release notice already pending".to_string(),
            });
        }

        let pending = PendingRelease {
            requested_tick: tick,
            notice_ends_tick: tick + resource.release_notice_ticks,
        };
        resource.pending_release = Some(pending);
        resource.version += 1;
        Ok(pending)
    }

    pub fn cancel_release(
        &mut self,
        ledger: &mut ValuationLedger,
        resource_id: &str,
        owner: &str,
        tick: u64,
    ) -> Result<(), SettlementError> {
        let revoke_window = self.release_revoke_window_ticks;
        let resource = ledger
            .get_mut(resource_id)
            .map_err(|_| SettlementError::NotFound(resource_id.to_string()))?;
        if resource.owner.as_deref() != Some(owner) {
            return Err(SettlementError::NotOwner {
                resource_id: resource_id.to_string(),
                caller: owner.to_string(),
            });
        }
        let pending = resource
            .pending_release
            .ok_or_else(|| SettlementError::NoPendingRelease(resource_id.to_string()))?;

        let window_ended_tick = pending.requested_tick + revoke_window;
        if tick > window_ended_tick {
            return Err(SettlementError::RevokeWindowElapsed {
                resource_id: resource_id.to_string(),
                window_ended_tick,
            });
        }
        resource.pending_release = None;
        resource.version += 1;
        Ok(())
    }

    /// Finalizes every pending release whose notice has elapsed.
    pub fn finalize_due_releases(
        &mut self,
        ledger: &mut ValuationLedger,
        tick: u64,
    ) -> Vec<ReleaseFinalized> {
        let due = ledger
            .resources()
            .filter_map(|resource| {
                let pending = resource.pending_release?;
                (tick >= pending.notice_ends_tick).then(|| resource.resource_id.clone())
            })
            .collect::<Vec<_>>();

        let mut finalized = Vec::with_capacity(due.len());
        for resource_id in due {
            if let Ok(previous_owner) =
                ledger.close_ownership(&resource_id, tick, ReleaseCause::VoluntaryRelease)
            {
                self.settled_this_tick.insert(resource_id.clone());
                finalized.push(ReleaseFinalized {
                    resource_id,
                    previous_owner,
                });
            }
        }
        finalized
    }

    /// Force-release for tax default. The ownership record closes with the
    /// default cause; the resource becomes claimable immediately.
    pub fn force_release(
        &mut self,
        ledger: &mut ValuationLedger,
        resource_id: &str,
        tick: u64,
    ) -> Result<String, SettlementError> {
        let previous_owner = ledger
            .close_ownership(resource_id, tick, ReleaseCause::TaxDefault)
            .map_err(|_| SettlementError::NotFound(resource_id.to_string()))?;
        self.settled_this_tick.insert(resource_id.to_string());
        Ok(previous_owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ResourceKind, MICRO_PER_DAI};

    use crate::ledger::ResourceState;

    fn resource(resource_id: &str, min_holding_ticks: u64) -> ResourceState {
        ResourceState {
            resource_id: resource_id.to_string(),
            zone_id: "zone:a".to_string(),
            kind: ResourceKind::Housing,
            declared_value_udai: 0,
            owner: None,
            acquired_tick: None,
            min_holding_ticks,
            release_notice_ticks: 72,
            pending_release: None,
            depreciating: false,
            depreciation_daily_bps: 0,
            arrears_days: 0,
            last_accrued_day: None,
            version: 0,
        }
    }

    fn setup(min_holding_ticks: u64) -> (SettlementEngine, ValuationLedger, MoneyLedger) {
        let mut ledger = ValuationLedger::default();
        ledger.insert_resource(resource("res:h1", min_holding_ticks));
        let mut money = MoneyLedger::default();
        money.open_account("id:alice", 1_000 * MICRO_PER_DAI);
        money.open_account("id:bob", 1_000 * MICRO_PER_DAI);
        money.open_account(TREASURY_ACCOUNT, 0);
        (SettlementEngine::new(MICRO_PER_DAI, 24), ledger, money)
    }

    fn claim(
        engine: &mut SettlementEngine,
        ledger: &mut ValuationLedger,
        money: &mut MoneyLedger,
        who: &str,
        price: i64,
        tick: u64,
    ) {
        engine
            .attempt_buyout(ledger, money, "res:h1", who, price, None, tick)
            .expect("claim succeeds");
        engine.begin_tick();
    }

    #[test]
    fn underpriced_buyout_fails_with_invalid_valuation() {
        let (mut engine, mut ledger, mut money) = setup(0);
        claim(&mut engine, &mut ledger, &mut money, "id:alice", 100 * MICRO_PER_DAI, 0);

        let err = engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:bob",
                99 * MICRO_PER_DAI,
                None,
                10,
            )
            .expect_err("must fail");
        assert!(matches!(err, SettlementError::InvalidValuation { .. }));
    }

    #[test]
    fn exact_price_at_holding_boundary() {
        let (mut engine, mut ledger, mut money) = setup(48);
        claim(&mut engine, &mut ledger, &mut money, "id:alice", 100 * MICRO_PER_DAI, 0);

        // One tick before the boundary: locked regardless of price.
        let err = engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:bob",
                100 * MICRO_PER_DAI,
                None,
                47,
            )
            .expect_err("locked");
        assert!(matches!(err, SettlementError::Locked { .. }));

        // Exactly at the boundary: succeeds at exactly the declared value.
        let settled = engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:bob",
                100 * MICRO_PER_DAI,
                None,
                48,
            )
            .expect("boundary buyout succeeds");
        assert_eq!(settled.previous_owner.as_deref(), Some("id:alice"));
    }

    #[test]
    fn same_tick_second_buyout_conflicts_with_one_open_record() {
        let (mut engine, mut ledger, mut money) = setup(0);
        claim(&mut engine, &mut ledger, &mut money, "id:alice", 10 * MICRO_PER_DAI, 0);

        let first = engine.attempt_buyout(
            &mut ledger,
            &mut money,
            "res:h1",
            "id:bob",
            10 * MICRO_PER_DAI,
            None,
            5,
        );
        let second = engine.attempt_buyout(
            &mut ledger,
            &mut money,
            "res:h1",
            "id:bob",
            10 * MICRO_PER_DAI,
            None,
            5,
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(SettlementError::Conflict { .. })));
        assert_eq!(ledger.open_record_count("res:h1"), 1);
    }

    #[test]
    fn stale_version_token_conflicts() {
        let (mut engine, mut ledger, mut money) = setup(0);
        claim(&mut engine, &mut ledger, &mut money, "id:alice", 10 * MICRO_PER_DAI, 0);

        let stale = ledger.get("res:h1").unwrap().version - 1;
        let err = engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:bob",
                10 * MICRO_PER_DAI,
                Some(stale),
                5,
            )
            .expect_err("stale token");
        assert!(matches!(err, SettlementError::Conflict { .. }));
    }

    #[test]
    fn buyout_pays_incumbent_and_resets_clock() {
        let (mut engine, mut ledger, mut money) = setup(0);
        claim(&mut engine, &mut ledger, &mut money, "id:alice", 100 * MICRO_PER_DAI, 0);
        let alice_before = money.balance("id:alice").unwrap();

        let settled = engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:bob",
                120 * MICRO_PER_DAI,
                None,
                30,
            )
            .expect("buyout");
        assert_eq!(settled.price_udai, 120 * MICRO_PER_DAI);
        assert_eq!(
            money.balance("id:alice").unwrap(),
            alice_before + 120 * MICRO_PER_DAI
        );

        let resource = ledger.get("res:h1").unwrap();
        assert_eq!(resource.owner.as_deref(), Some("id:bob"));
        assert_eq!(resource.acquired_tick, Some(30));
        assert_eq!(resource.declared_value_udai, 120 * MICRO_PER_DAI);
        assert_eq!(resource.arrears_days, 0);
    }

    #[test]
    fn zero_valued_resource_requires_min_claim_increment() {
        let (mut engine, mut ledger, mut money) = setup(0);

        let err = engine
            .attempt_buyout(&mut ledger, &mut money, "res:h1", "id:alice", 0, None, 1)
            .expect_err("zero offer rejected");
        assert!(matches!(
            err,
            SettlementError::InvalidValuation {
                required_udai, ..
            } if required_udai == MICRO_PER_DAI
        ));

        engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:alice",
                MICRO_PER_DAI,
                None,
                1,
            )
            .expect("min increment claim succeeds");
    }

    #[test]
    fn release_notice_flow_and_revoke_window() {
        let (mut engine, mut ledger, mut money) = setup(0);
        claim(&mut engine, &mut ledger, &mut money, "id:alice", 10 * MICRO_PER_DAI, 0);

        let pending = engine
            .request_release(&mut ledger, "res:h1", "id:alice", 100)
            .expect("request");
        assert_eq!(pending.notice_ends_tick, 172);

        // Buyout during the notice is locked.
        let err = engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:bob",
                10 * MICRO_PER_DAI,
                None,
                110,
            )
            .expect_err("locked during notice");
        assert!(matches!(err, SettlementError::Locked { .. }));

        // Cancellation works inside the revoke window, not after it.
        engine
            .cancel_release(&mut ledger, "res:h1", "id:alice", 120)
            .expect("cancel inside window");
        engine
            .request_release(&mut ledger, "res:h1", "id:alice", 130)
            .expect("request again");
        let err = engine
            .cancel_release(&mut ledger, "res:h1", "id:alice", 160)
            .expect_err("window elapsed");
        assert!(matches!(err, SettlementError::RevokeWindowElapsed { .. }));

        // Nothing finalizes before the notice ends; then the owner clears.
        assert!(engine.finalize_due_releases(&mut ledger, 201).is_empty());
        let finalized = engine.finalize_due_releases(&mut ledger, 202);
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].previous_owner, "id:alice");
        assert!(ledger.get("res:h1").unwrap().owner.is_none());
        assert_eq!(ledger.open_record_count("res:h1"), 0);
    }

    #[test]
    fn insufficient_funds_leaves_no_partial_transfer() {
        let (mut engine, mut ledger, mut money) = setup(0);
        claim(&mut engine, &mut ledger, &mut money, "id:alice", 10 * MICRO_PER_DAI, 0);

        money.open_account("id:poor", 1);
        let err = engine
            .attempt_buyout(
                &mut ledger,
                &mut money,
                "res:h1",
                "id:poor",
                10 * MICRO_PER_DAI,
                None,
                5,
            )
            .expect_err("cannot afford");
        assert!(matches!(err, SettlementError::InsufficientFunds { .. }));
        assert_eq!(ledger.get("res:h1").unwrap().owner.as_deref(), Some("id:alice"));
        assert_eq!(ledger.open_record_count("res:h1"), 1);
        assert_eq!(money.balance("id:poor"), Some(1));
    }
}
