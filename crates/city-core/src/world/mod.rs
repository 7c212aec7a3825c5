use std::collections::BTreeMap;

mod commands;
mod events;
mod init;
mod snapshot;
mod step;

use contracts::{
    ActorRef, ApiError, Command, CommandPayload, CommandResult, ErrorCode, Event, EventType,
    ProposalChange, ResourceKind, RunConfig, RunMode, RunStatus, Snapshot, ZoneRecord,
    MAX_RATE_BPS, MICRO_PER_DAI, SCHEMA_VERSION_V1, TICKS_PER_DAY, TREASURY_ACCOUNT,
};
use serde_json::{json, Value};

use crate::economy::MoneyLedger;
use crate::governance::{GovernanceError, ProposalBook};
use crate::identity::{IdentityError, IdentityRegistry};
use crate::ledger::{LedgerError, ResourceState, ValuationLedger};
use crate::settlement::{SettlementEngine, SettlementError};
use crate::tax::TaxAccrual;
use crate::votes::{QuadraticVoteLedger, VoteError};

#[derive(Debug, Clone)]
struct QueuedCommand {
    effective_tick: u64,
    insertion_sequence: u64,
    command: Command,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepMetrics {
    pub advanced_ticks: u64,
    pub processed_batch_tick: u64,
    pub processed_commands: u64,
    pub accrued_resources: u64,
}

/// The city aggregate. Single writer; every mutation flows through either a
/// command or the tick loop, and every observable change lands in the event
/// log with a (tick, sequence_in_tick) ordering key.
#[derive(Debug)]
pub struct CityWorld {
    config: RunConfig,
    status: RunStatus,
    queued_commands: Vec<QueuedCommand>,
    next_command_sequence: u64,
    event_log: Vec<Event>,
    sequence_in_tick: u64,
    state_hash: u64,
    zones: BTreeMap<String, ZoneRecord>,
    ledger: ValuationLedger,
    money: MoneyLedger,
    tax: TaxAccrual,
    settlement: SettlementEngine,
    votes: QuadraticVoteLedger,
    proposals: ProposalBook,
    identities: IdentityRegistry,
    emitted_transfer_count: usize,
    last_step_metrics: StepMetrics,
}

fn synthetic_timestamp(tick: u64, seq: u64) -> String {
    format!(
        "1970-01-01T{:02}:{:02}:{:02}Z",
        (tick / 3600) % 24,
        (tick / 60) % 60,
        (tick + seq) % 60
    )
}

fn mix_state_hash(state_hash: u64, tick: u64, sequence_in_tick: u64) -> u64 {
    let mut hash = state_hash ^ tick.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    hash ^= sequence_in_tick.wrapping_mul(0x517C_C1B7_2722_0A95);
    hash.rotate_left(17)
}

fn mix_seed(seed: u64, salt: u64) -> u64 {
    let mut value = seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    value ^= value.rotate_left(29);
    value = value.wrapping_mul(0x517C_C1B7_2722_0A95);
    value ^ (value >> 31)
}

fn sample_range_i64(seed: u64, stream: u64, min: i64, max: i64) -> i64 {
    if max <= min {
        return min;
    }
    let span = (max - min + 1) as u64;
    let mixed = mix_seed(seed, stream);
    min + (mixed % span) as i64
}

#[cfg(test)]
mod tests;
