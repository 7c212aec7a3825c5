//! Quadratic vote ledger. A voter's k additional votes on a subject cost
//! `(n + k)^2 - n^2` credits where n is their prior count there, so the
//! telescoped total for n votes is always n^2 regardless of batching.

use std::collections::BTreeMap;

use contracts::{VoteDirection, VoteRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    ZeroVotes,
    /// Direction is fixed per voter per proposal once any vote is cast;
    /// switching requires retraction first.
    DirectionLocked {
        locked: VoteDirection,
    },
    InsufficientWeight {
        cost_udai: i64,
        available_udai: i64,
    },
    NothingToRetract,
}

impl std::fmt::Display for VoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroVotes => write!(f, "vote count must be >= 1"),
            Self::DirectionLocked { locked } => {
                write!(f, "direction locked to {locked:?}; retract first")
            }
            Self::InsufficientWeight {
                cost_udai,
                available_udai,
            } => write!(f, "cost {cost_udai} exceeds balance {available_udai}"),
            Self::NothingToRetract => write!(f, "no votes to retract"),
        }
    }
}

impl std::error::Error for VoteError {}

/// Marginal cost of `additional` votes after `prior` already cast.
pub fn quadratic_cost_udai(prior: u32, additional: u32) -> i64 {
    let n = i64::from(prior);
    let total = i64::from(prior) + i64::from(additional);
    total * total - n * n
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteStake {
    pub direction: VoteDirection,
    pub votes: u32,
    pub credits_spent_udai: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastOutcome {
    pub direction: VoteDirection,
    pub added_votes: u32,
    pub total_votes: u32,
    pub cost_udai: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetractOutcome {
    pub direction: VoteDirection,
    pub retracted_votes: u32,
    pub refunded_udai: i64,
}

#[derive(Debug, Default)]
pub struct QuadraticVoteLedger {
    stakes: BTreeMap<(String, String), VoteStake>,
}

impl QuadraticVoteLedger {
    pub fn cast(
        &mut self,
        proposal_id: &str,
        voter: &str,
        additional_votes: u32,
        direction: VoteDirection,
        available_udai: i64,
    ) -> Result<CastOutcome, VoteError> {
        if additional_votes == 0 {
            return Err(VoteError::ZeroVotes);
        }

        let key = (proposal_id.to_string(), voter.to_string());
        let prior = self.stakes.get(&key).copied();
        if let Some(stake) = prior {
            if stake.direction != direction {
                return Err(VoteError::DirectionLocked {
                    locked: stake.direction,
                });
            }
        }

        let prior_votes = prior.map(|stake| stake.votes).unwrap_or(0);
        let cost_udai = quadratic_cost_udai(prior_votes, additional_votes);
        if cost_udai > available_udai {
            return Err(VoteError::InsufficientWeight {
                cost_udai,
                available_udai,
            });
        }

        let stake = self.stakes.entry(key).or_insert(VoteStake {
            direction,
            votes: 0,
            credits_spent_udai: 0,
        });
        stake.votes += additional_votes;
        stake.credits_spent_udai += cost_udai;

        Ok(CastOutcome {
            direction,
            added_votes: additional_votes,
            total_votes: stake.votes,
            cost_udai,
        })
    }

    /// Removes the voter's entire stake and reports the full refund.
    pub fn retract(&mut self, proposal_id: &str, voter: &str) -> Result<RetractOutcome, VoteError> {
        let key = (proposal_id.to_string(), voter.to_string());
        let stake = self.stakes.remove(&key).ok_or(VoteError::NothingToRetract)?;
        Ok(RetractOutcome {
            direction: stake.direction,
            retracted_votes: stake.votes,
            refunded_udai: stake.credits_spent_udai,
        })
    }

    pub fn stake(&self, proposal_id: &str, voter: &str) -> Option<VoteStake> {
        self.stakes
            .get(&(proposal_id.to_string(), voter.to_string()))
            .copied()
    }

    /// (votes_for, votes_against, turnout in credits) for one proposal.
    pub fn tally(&self, proposal_id: &str) -> (u64, u64, i64) {
        let mut votes_for = 0_u64;
        let mut votes_against = 0_u64;
        let mut turnout = 0_i64;
        for ((proposal, _), stake) in &self.stakes {
            if proposal != proposal_id {
                continue;
            }
            match stake.direction {
                VoteDirection::For => votes_for += u64::from(stake.votes),
                VoteDirection::Against => votes_against += u64::from(stake.votes),
            }
            turnout += stake.credits_spent_udai;
        }
        (votes_for, votes_against, turnout)
    }

    pub fn records_for(&self, proposal_id: &str) -> Vec<VoteRecord> {
        self.stakes
            .iter()
            .filter(|((proposal, _), _)| proposal == proposal_id)
            .map(|((proposal, voter), stake)| VoteRecord {
                proposal_id: proposal.clone(),
                voter: voter.clone(),
                direction: stake.direction,
                votes: stake.votes,
                credits_spent_udai: stake.credits_spent_udai,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_and_sequential_costs_telescope_to_n_squared() {
        let mut batch = QuadraticVoteLedger::default();
        let batched = batch
            .cast("prop:1", "id:alice", 5, VoteDirection::For, 1_000)
            .expect("batch cast");
        assert_eq!(batched.cost_udai, 25);

        let mut sequential = QuadraticVoteLedger::default();
        let mut total = 0;
        for _ in 0..5 {
            total += sequential
                .cast("prop:1", "id:alice", 1, VoteDirection::For, 1_000)
                .expect("single cast")
                .cost_udai;
        }
        assert_eq!(total, 25);
        assert_eq!(
            sequential.stake("prop:1", "id:alice").unwrap().votes,
            batch.stake("prop:1", "id:alice").unwrap().votes
        );
    }

    #[test]
    fn marginal_cost_grows_quadratically() {
        assert_eq!(quadratic_cost_udai(0, 1), 1);
        assert_eq!(quadratic_cost_udai(1, 1), 3);
        assert_eq!(quadratic_cost_udai(2, 1), 5);
        assert_eq!(quadratic_cost_udai(3, 2), 16);
    }

    #[test]
    fn insufficient_weight_is_rejected_without_mutation() {
        let mut ledger = QuadraticVoteLedger::default();
        let err = ledger
            .cast("prop:1", "id:alice", 4, VoteDirection::For, 15)
            .expect_err("16 > 15");
        assert!(matches!(err, VoteError::InsufficientWeight { cost_udai: 16, .. }));
        assert!(ledger.stake("prop:1", "id:alice").is_none());
    }

    #[test]
    fn direction_is_locked_until_retraction() {
        let mut ledger = QuadraticVoteLedger::default();
        ledger
            .cast("prop:1", "id:alice", 2, VoteDirection::For, 100)
            .expect("cast");

        let err = ledger
            .cast("prop:1", "id:alice", 1, VoteDirection::Against, 100)
            .expect_err("opposite direction");
        assert!(matches!(
            err,
            VoteError::DirectionLocked {
                locked: VoteDirection::For
            }
        ));

        let retracted = ledger.retract("prop:1", "id:alice").expect("retract");
        assert_eq!(retracted.retracted_votes, 2);
        assert_eq!(retracted.refunded_udai, 4);

        ledger
            .cast("prop:1", "id:alice", 1, VoteDirection::Against, 100)
            .expect("direction free after retraction");
    }

    #[test]
    fn tally_sums_per_direction_and_turnout() {
        let mut ledger = QuadraticVoteLedger::default();
        ledger
            .cast("prop:1", "id:alice", 3, VoteDirection::For, 100)
            .expect("cast");
        ledger
            .cast("prop:1", "id:bob", 2, VoteDirection::Against, 100)
            .expect("cast");
        ledger
            .cast("prop:2", "id:alice", 1, VoteDirection::For, 100)
            .expect("other proposal");

        let (votes_for, votes_against, turnout) = ledger.tally("prop:1");
        assert_eq!(votes_for, 3);
        assert_eq!(votes_against, 2);
        assert_eq!(turnout, 9 + 4);
    }
}
