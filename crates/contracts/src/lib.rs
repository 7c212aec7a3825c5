//! v1 cross-boundary contracts for the Zarbora kernel, API, persistence,
//! and any external observer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION_V1: &str = "1.0";
pub const TICKS_PER_DAY: u64 = 24;
pub const DAYS_PER_YEAR: u64 = 365;
/// Money is carried as i64 micro-DAI.
pub const MICRO_PER_DAI: i64 = 1_000_000;
/// Annualized tax rates and quorum fractions are basis points of 100%.
pub const MAX_RATE_BPS: u32 = 10_000;

pub const TREASURY_ACCOUNT: &str = "treasury";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub schema_version: String,
    pub run_id: String,
    #[serde(with = "serde_u64_string")]
    pub seed: u64,
    pub duration_days: u32,
    pub snapshot_every_ticks: u64,
    /// Days of arrears tolerated before a resource is force-released.
    pub grace_period_days: u64,
    /// Quorum as basis points of total governance credit supply.
    pub quorum_bps: u32,
    /// Minimum offer accepted for a resource whose declared value is zero.
    pub min_claim_increment_udai: i64,
    pub default_min_holding_days: u64,
    pub default_release_notice_days: u64,
    /// Ticks after a release request during which it can still be cancelled.
    pub release_revoke_window_ticks: u64,
    pub default_voting_period_days: u64,
    pub accrual_worker_threads: usize,
    pub citizen_count: u32,
    pub starting_balance_udai: i64,
    #[serde(default)]
    pub scenario_flags: BTreeMap<String, bool>,
    pub notes: Option<String>,
}

impl RunConfig {
    pub fn max_ticks(&self) -> u64 {
        u64::from(self.duration_days) * TICKS_PER_DAY
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_local_001".to_string(),
            seed: 1337,
            duration_days: 30,
            snapshot_every_ticks: TICKS_PER_DAY,
            grace_period_days: 30,
            quorum_bps: 500,
            min_claim_increment_udai: MICRO_PER_DAI,
            default_min_holding_days: 7,
            default_release_notice_days: 3,
            release_revoke_window_ticks: TICKS_PER_DAY,
            default_voting_period_days: 7,
            accrual_worker_threads: 2,
            citizen_count: 12,
            starting_balance_udai: 1_000 * MICRO_PER_DAI,
            scenario_flags: BTreeMap::new(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatus {
    pub schema_version: String,
    pub run_id: String,
    pub current_tick: u64,
    pub max_ticks: u64,
    pub mode: RunMode,
    pub queue_depth: usize,
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        self.current_tick >= self.max_ticks
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={} tick={}/{} mode={:?} queue_depth={}",
            self.run_id, self.current_tick, self.max_ticks, self.mode, self.queue_depth
        )
    }
}

// ---------------------------------------------------------------------------
// Core aggregate records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Housing,
    Workspace,
    Vehicle,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Housing => "housing",
            Self::Workspace => "workspace",
            Self::Vehicle => "vehicle",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Unclaimed,
    Owned,
    ReleasePending,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::Owned => "owned",
            Self::ReleasePending => "release_pending",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord {
    pub resource_id: String,
    pub zone_id: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    pub declared_value_udai: i64,
    pub owner: Option<String>,
    pub acquired_tick: Option<u64>,
    pub min_holding_ticks: u64,
    pub release_notice_ticks: u64,
    pub notice_ends_tick: Option<u64>,
    pub depreciating: bool,
    pub depreciation_daily_bps: u32,
    pub arrears_days: u64,
    pub daily_tax_udai: i64,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZoneRecord {
    pub zone_id: String,
    pub tax_rate_bps: u32,
    pub allowed_kinds: Vec<ResourceKind>,
    pub eligibility_rules: Vec<String>,
    pub society_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxLedgerEntry {
    pub resource_id: String,
    pub owner: String,
    pub day: u64,
    pub tick: u64,
    pub amount_udai: i64,
    pub running_total_udai: i64,
    pub paid: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseCause {
    Buyout,
    VoluntaryRelease,
    TaxDefault,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnershipRecord {
    pub resource_id: String,
    pub owner: String,
    pub acquisition_value_udai: i64,
    pub acquired_tick: u64,
    pub released_tick: Option<u64>,
    pub release_cause: Option<ReleaseCause>,
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalOutcome {
    Passed,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    For,
    Against,
}

/// Typed change payload a passed proposal applies to world state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ProposalChange {
    ZoneTaxRate {
        zone_id: String,
        new_rate_bps: u32,
    },
    ResourceDepreciation {
        resource_id: String,
        depreciating: bool,
        daily_rate_bps: u32,
    },
    Signal {
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalRecord {
    pub proposal_id: String,
    pub proposer: String,
    pub change: ProposalChange,
    pub status: ProposalStatus,
    pub submitted_tick: u64,
    pub end_tick: Option<u64>,
    pub quorum_bps: u32,
    pub votes_for: u64,
    pub votes_against: u64,
    pub turnout_credits_udai: i64,
    pub outcome: Option<ProposalOutcome>,
    pub resolved_tick: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRecord {
    pub proposal_id: String,
    pub voter: String,
    pub direction: VoteDirection,
    pub votes: u32,
    pub credits_spent_udai: i64,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationRecord {
    pub attestation_id: String,
    pub issuer: String,
    pub claim: String,
    pub issued_tick: u64,
    pub revoked_tick: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityRecord {
    pub address: String,
    pub display_name: String,
    pub joined_tick: u64,
    pub roles: Vec<String>,
    pub attestations: Vec<AttestationRecord>,
    pub governance_credits_udai: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountBalance {
    pub account_id: String,
    pub money_udai: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoneyTransfer {
    pub transfer_id: String,
    pub tick: u64,
    pub from_account: String,
    pub to_account: String,
    pub amount_udai: i64,
    pub cause: String,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SimStart,
    SimPause,
    SimStepTick,
    SimRunToTick,
    DeclareValuation,
    AttemptBuyout,
    RequestRelease,
    CancelRelease,
    CastVote,
    RetractVotes,
    SubmitProposal,
    OpenVoting,
    IssueAttestation,
    RevokeAttestation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    SimStart,
    SimPause,
    SimStepTick {
        steps: u64,
    },
    SimRunToTick {
        target_tick: u64,
    },
    DeclareValuation {
        resource_id: String,
        owner: String,
        new_value_udai: i64,
    },
    AttemptBuyout {
        resource_id: String,
        challenger: String,
        offered_value_udai: i64,
        expected_version: Option<u64>,
    },
    RequestRelease {
        resource_id: String,
        owner: String,
    },
    CancelRelease {
        resource_id: String,
        owner: String,
    },
    CastVote {
        proposal_id: String,
        voter: String,
        votes: u32,
        direction: VoteDirection,
    },
    RetractVotes {
        proposal_id: String,
        voter: String,
    },
    SubmitProposal {
        proposal_id: String,
        proposer: String,
        change: ProposalChange,
    },
    OpenVoting {
        proposal_id: String,
        voting_period_days: Option<u64>,
    },
    IssueAttestation {
        address: String,
        attestation_id: String,
        issuer: String,
        claim: String,
    },
    RevokeAttestation {
        address: String,
        attestation_id: String,
        issuer: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub schema_version: String,
    pub command_id: String,
    pub run_id: String,
    pub issued_at_tick: u64,
    pub command_type: CommandType,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(
        command_id: impl Into<String>,
        run_id: impl Into<String>,
        issued_at_tick: u64,
        command_type: CommandType,
        payload: CommandPayload,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command_id.into(),
            run_id: run_id.into(),
            issued_at_tick,
            command_type,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    Locked,
    Conflict,
    InsufficientWeight,
    InsufficientFunds,
    InvalidValuation,
    Closed,
    InvalidCommand,
    InvalidQuery,
    RunNotFound,
    RunStateConflict,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub schema_version: String,
    pub command_id: String,
    pub run_id: String,
    pub accepted: bool,
    pub error: Option<ApiError>,
    /// Operation-specific result payload (e.g. new version after a buyout).
    pub data: Option<Value>,
}

impl CommandResult {
    pub fn accepted(command: &Command, data: Option<Value>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command.command_id.clone(),
            run_id: command.run_id.clone(),
            accepted: true,
            error: None,
            data,
        }
    }

    pub fn rejected(command: &Command, error: ApiError) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command.command_id.clone(),
            run_id: command.run_id.clone(),
            accepted: false,
            error: Some(error),
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorRef {
    pub actor_id: String,
    pub actor_kind: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommandApplied,
    ValuationDeclared,
    BuyoutSettled,
    ReleaseRequested,
    ReleaseCancelled,
    ReleaseFinalized,
    ForcedRelease,
    TaxAccrued,
    TaxPaymentMissed,
    DepreciationApplied,
    GovernanceCreditsGranted,
    ProposalSubmitted,
    VotingOpened,
    VoteCast,
    VotesRetracted,
    ProposalResolved,
    ZoneTaxRateChanged,
    DepreciationPolicyChanged,
    AttestationIssued,
    AttestationRevoked,
    MoneyTransferred,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub schema_version: String,
    pub run_id: String,
    pub tick: u64,
    pub created_at: String,
    pub event_id: String,
    pub sequence_in_tick: u64,
    pub event_type: EventType,
    pub zone_id: Option<String>,
    pub actors: Vec<ActorRef>,
    pub caused_by: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub details: Option<Value>,
}

// ---------------------------------------------------------------------------
// Snapshots and query envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub schema_version: String,
    pub run_id: String,
    pub tick: u64,
    pub created_at: String,
    pub snapshot_id: String,
    pub world_state_hash: String,
    pub zones: Value,
    pub resources: Value,
    pub proposals: Value,
    pub identities: Value,
    pub accounts: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub schema_version: String,
    pub query_type: String,
    pub run_id: String,
    pub generated_at_tick: u64,
    pub data: Value,
}

pub mod serde_u64_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_round_trips_seed_as_string() {
        let config = RunConfig {
            seed: u64::MAX,
            ..RunConfig::default()
        };
        let raw = serde_json::to_string(&config).expect("serialize");
        assert!(raw.contains(&format!("\"{}\"", u64::MAX)));
        let decoded: RunConfig = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(config, decoded);
    }

    #[test]
    fn proposal_change_is_tagged_by_category() {
        let change = ProposalChange::ZoneTaxRate {
            zone_id: "zone:inner_ring".to_string(),
            new_rate_bps: 1_200,
        };
        let raw = serde_json::to_value(&change).expect("serialize");
        assert_eq!(raw["category"], "zone_tax_rate");
    }
}
