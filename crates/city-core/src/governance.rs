//! Governance proposal lifecycle: Draft -> Active -> Completed, with
//! deterministic application of passed changes to world state.

use std::collections::BTreeMap;

use contracts::{
    ProposalChange, ProposalOutcome, ProposalRecord, ProposalStatus, MAX_RATE_BPS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    NotFound(String),
    DuplicateProposal(String),
    /// Voting attempted on a proposal that is not active.
    Closed {
        proposal_id: String,
        status: ProposalStatus,
    },
    InvalidChange(String),
    NotDraft(String),
}

impl std::fmt::Display for GovernanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "proposal not found: {id}"),
            Self::DuplicateProposal(id) => write!(f, "proposal already exists: {id}"),
            Self::Closed {
                proposal_id,
                status,
            } => write!(f, "proposal {proposal_id} is not open for voting ({status:?})"),
            Self::InvalidChange(reason) => write!(f, "invalid proposal change: {reason}"),
            Self::NotDraft(id) => write!(f, "proposal {id} is past draft"),
        }
    }
}

impl std::error::Error for GovernanceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub proposal_id: String,
    pub outcome: ProposalOutcome,
    /// Present only when the proposal passed and carries a state change.
    pub change_to_apply: Option<ProposalChange>,
}

#[derive(Debug, Default)]
pub struct ProposalBook {
    proposals: BTreeMap<String, ProposalRecord>,
}

impl ProposalBook {
    pub fn submit(
        &mut self,
        proposal_id: &str,
        proposer: &str,
        change: ProposalChange,
        quorum_bps: u32,
        tick: u64,
    ) -> Result<(), GovernanceError> {
        if self.proposals.contains_key(proposal_id) {
            return Err(GovernanceError::DuplicateProposal(proposal_id.to_string()));
        }
        validate_change(&change)?;

        self.proposals.insert(
            proposal_id.to_string(),
            ProposalRecord {
                proposal_id: proposal_id.to_string(),
                proposer: proposer.to_string(),
                change,
                status: ProposalStatus::Draft,
                submitted_tick: tick,
                end_tick: None,
                quorum_bps,
                votes_for: 0,
                votes_against: 0,
                turnout_credits_udai: 0,
                outcome: None,
                resolved_tick: None,
            },
        );
        Ok(())
    }

    pub fn open_voting(&mut self, proposal_id: &str, end_tick: u64) -> Result<(), GovernanceError> {
        let proposal = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(proposal_id.to_string()))?;
        if proposal.status != ProposalStatus::Draft {
            return Err(GovernanceError::NotDraft(proposal_id.to_string()));
        }
        proposal.status = ProposalStatus::Active;
        proposal.end_tick = Some(end_tick);
        Ok(())
    }

    pub fn get(&self, proposal_id: &str) -> Result<&ProposalRecord, GovernanceError> {
        self.proposals
            .get(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(proposal_id.to_string()))
    }

    pub fn proposals(&self) -> impl Iterator<Item = &ProposalRecord> {
        self.proposals.values()
    }

    /// Voting gate: only active proposals accept votes or retractions.
    pub fn require_active(&self, proposal_id: &str) -> Result<(), GovernanceError> {
        let proposal = self.get(proposal_id)?;
        if proposal.status != ProposalStatus::Active {
            return Err(GovernanceError::Closed {
                proposal_id: proposal_id.to_string(),
                status: proposal.status,
            });
        }
        Ok(())
    }

    /// Mirrors the vote ledger's tally onto the record for observers.
    pub fn record_tally(
        &mut self,
        proposal_id: &str,
        votes_for: u64,
        votes_against: u64,
        turnout_credits_udai: i64,
    ) {
        if let Some(proposal) = self.proposals.get_mut(proposal_id) {
            if proposal.status == ProposalStatus::Active {
                proposal.votes_for = votes_for;
                proposal.votes_against = votes_against;
                proposal.turnout_credits_udai = turnout_credits_udai;
            }
        }
    }

    /// Resolves every active proposal whose end tick has arrived. Passed
    /// proposals surface their change for the world to apply; completed
    /// proposals never resolve again.
    pub fn resolve_due(&mut self, tick: u64, total_credit_supply_udai: i64) -> Vec<Resolution> {
        let mut resolutions = Vec::new();
        for proposal in self.proposals.values_mut() {
            if proposal.status != ProposalStatus::Active {
                continue;
            }
            let Some(end_tick) = proposal.end_tick else {
                continue;
            };
            if tick < end_tick {
                continue;
            }

            let quorum_udai = i64::try_from(
                i128::from(total_credit_supply_udai) * i128::from(proposal.quorum_bps)
                    / i128::from(MAX_RATE_BPS),
            )
            .unwrap_or(i64::MAX);
            let quorum_met = proposal.turnout_credits_udai >= quorum_udai;
            let outcome = if quorum_met && proposal.votes_for > proposal.votes_against {
                ProposalOutcome::Passed
            } else {
                ProposalOutcome::Rejected
            };

            proposal.status = ProposalStatus::Completed;
            proposal.outcome = Some(outcome);
            proposal.resolved_tick = Some(tick);

            let change_to_apply = (outcome == ProposalOutcome::Passed)
                .then(|| proposal.change.clone())
                .filter(|change| !matches!(change, ProposalChange::Signal { .. }));
            resolutions.push(Resolution {
                proposal_id: proposal.proposal_id.clone(),
                outcome,
                change_to_apply,
            });
        }
        resolutions
    }
}

fn validate_change(change: &ProposalChange) -> Result<(), GovernanceError> {
    match change {
        ProposalChange::ZoneTaxRate { new_rate_bps, .. } => {
            if *new_rate_bps > MAX_RATE_BPS {
                return Err(GovernanceError::InvalidChange(format!(
                    "tax rate {new_rate_bps} bps exceeds {MAX_RATE_BPS}"
                )));
            }
        }
        ProposalChange::ResourceDepreciation { daily_rate_bps, .. } => {
            if *daily_rate_bps > MAX_RATE_BPS {
                return Err(GovernanceError::InvalidChange(format!(
                    "depreciation rate {daily_rate_bps} bps exceeds {MAX_RATE_BPS}"
                )));
            }
        }
        ProposalChange::Signal { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(text: &str) -> ProposalChange {
        ProposalChange::Signal {
            text: text.to_string(),
        }
    }

    fn submitted_active(book: &mut ProposalBook, proposal_id: &str, end_tick: u64) {
        book.submit(proposal_id, "id:alice", signal("test"), 500, 0)
            .expect("submit");
        book.open_voting(proposal_id, end_tick).expect("open");
    }

    #[test]
    fn lifecycle_draft_active_completed() {
        let mut book = ProposalBook::default();
        book.submit("prop:1", "id:alice", signal("test"), 500, 0)
            .expect("submit");
        assert_eq!(book.get("prop:1").unwrap().status, ProposalStatus::Draft);
        assert!(book.require_active("prop:1").is_err());

        book.open_voting("prop:1", 100).expect("open");
        assert!(book.require_active("prop:1").is_ok());
        // A second open is rejected.
        assert!(matches!(
            book.open_voting("prop:1", 200),
            Err(GovernanceError::NotDraft(_))
        ));

        // Not due yet.
        assert!(book.resolve_due(99, 0).is_empty());
        let resolutions = book.resolve_due(100, 0);
        assert_eq!(resolutions.len(), 1);
        assert_eq!(book.get("prop:1").unwrap().status, ProposalStatus::Completed);

        // Resolution happens exactly once.
        assert!(book.resolve_due(101, 0).is_empty());
        assert!(matches!(
            book.require_active("prop:1"),
            Err(GovernanceError::Closed { .. })
        ));
    }

    #[test]
    fn quorum_scenario_from_turnout() {
        // for=60 against=40, supply=1000, quorum=5% -> threshold 50 credits.
        let mut book = ProposalBook::default();
        submitted_active(&mut book, "prop:quorum", 10);
        book.record_tally("prop:quorum", 60, 40, 100);

        let resolutions = book.resolve_due(10, 1_000);
        assert_eq!(resolutions[0].outcome, ProposalOutcome::Passed);

        // Same split, turnout 40: quorum missed, rejected regardless.
        let mut book = ProposalBook::default();
        submitted_active(&mut book, "prop:quorum", 10);
        book.record_tally("prop:quorum", 60, 40, 40);

        let resolutions = book.resolve_due(10, 1_000);
        assert_eq!(resolutions[0].outcome, ProposalOutcome::Rejected);
    }

    #[test]
    fn tie_votes_reject() {
        let mut book = ProposalBook::default();
        submitted_active(&mut book, "prop:tie", 10);
        book.record_tally("prop:tie", 50, 50, 500);

        let resolutions = book.resolve_due(10, 1_000);
        assert_eq!(resolutions[0].outcome, ProposalOutcome::Rejected);
    }

    #[test]
    fn passed_zone_change_surfaces_for_application() {
        let mut book = ProposalBook::default();
        book.submit(
            "prop:rate",
            "id:alice",
            ProposalChange::ZoneTaxRate {
                zone_id: "zone:a".to_string(),
                new_rate_bps: 1_500,
            },
            0,
            0,
        )
        .expect("submit");
        book.open_voting("prop:rate", 10).expect("open");
        book.record_tally("prop:rate", 10, 2, 104);

        let resolutions = book.resolve_due(10, 0);
        assert_eq!(resolutions[0].outcome, ProposalOutcome::Passed);
        assert!(matches!(
            resolutions[0].change_to_apply,
            Some(ProposalChange::ZoneTaxRate { .. })
        ));
    }

    #[test]
    fn signal_proposals_apply_no_change() {
        let mut book = ProposalBook::default();
        submitted_active(&mut book, "prop:signal", 10);
        book.record_tally("prop:signal", 5, 0, 25);

        let resolutions = book.resolve_due(10, 0);
        assert_eq!(resolutions[0].outcome, ProposalOutcome::Passed);
        assert!(resolutions[0].change_to_apply.is_none());
    }

    #[test]
    fn overlarge_rates_are_rejected_at_submission() {
        let mut book = ProposalBook::default();
        let err = book
            .submit(
                "prop:bad",
                "id:alice",
                ProposalChange::ZoneTaxRate {
                    zone_id: "zone:a".to_string(),
                    new_rate_bps: 10_001,
                },
                500,
                0,
            )
            .expect_err("rate above 100%");
        assert!(matches!(err, GovernanceError::InvalidChange(_)));
    }

    #[test]
    fn completed_tallies_are_frozen() {
        let mut book = ProposalBook::default();
        submitted_active(&mut book, "prop:frozen", 10);
        book.record_tally("prop:frozen", 10, 0, 100);
        book.resolve_due(10, 0);

        book.record_tally("prop:frozen", 99, 99, 9_999);
        let proposal = book.get("prop:frozen").unwrap();
        assert_eq!(proposal.votes_for, 10);
        assert_eq!(proposal.turnout_credits_udai, 100);
    }
}
