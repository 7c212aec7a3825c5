//! In-process API facade with command validation, synchronous settlement, and
//! SQLite persistence for Harberger city runs.

mod persistence;
mod server;

use std::path::Path;

use contracts::{
    ApiError, Command, CommandPayload, CommandResult, CommandType, ErrorCode, Event, RunConfig,
    RunStatus, Snapshot, SCHEMA_VERSION_V1,
};
use city_core::CityWorld;
use persistence::SqliteRunStore;
pub use persistence::{
    PersistedCommandEntry, PersistedRunSummary, PersistenceError, ReplaySlice,
};
use serde_json::json;
pub use server::{serve, ServerError};

#[derive(Debug)]
struct PersistenceState {
    store: SqliteRunStore,
    persisted_command_count: usize,
    persisted_event_count: usize,
    last_snapshot_tick: Option<u64>,
}

#[derive(Debug)]
pub struct EngineApi {
    engine: CityWorld,
    command_audit: Vec<CommandResult>,
    command_log: Vec<PersistedCommandEntry>,
    persistence: Option<PersistenceState>,
    last_persistence_error: Option<String>,
}

impl EngineApi {
    pub fn from_config(config: RunConfig) -> Self {
        Self {
            engine: CityWorld::new(config),
            command_audit: Vec::new(),
            command_log: Vec::new(),
            persistence: None,
            last_persistence_error: None,
        }
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let store = SqliteRunStore::open(path)?;
        self.persistence = Some(PersistenceState {
            store,
            persisted_command_count: 0,
            persisted_event_count: 0,
            last_snapshot_tick: None,
        });
        Ok(())
    }

    pub fn initialize_run_storage(
        &mut self,
        replace_existing_run: bool,
    ) -> Result<(), PersistenceError> {
        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let run_id = self.engine.run_id().to_string();
        if state.store.run_exists(&run_id)? {
            if replace_existing_run {
                state.store.delete_run(&run_id)?;
                state.persisted_command_count = 0;
                state.persisted_event_count = 0;
                state.last_snapshot_tick = None;
            } else {
                return Err(PersistenceError::RunAlreadyExists(run_id));
            }
        }

        let bootstrap_snapshot = self.engine.snapshot();
        state.store.persist_delta(
            self.engine.config(),
            self.engine.status(),
            &[],
            &[],
            Some(&bootstrap_snapshot),
        )?;
        state.last_snapshot_tick = Some(bootstrap_snapshot.tick);
        self.last_persistence_error = None;
        Ok(())
    }

    pub fn flush_persistence_checked(&mut self) -> Result<(), PersistenceError> {
        let current_tick = self.engine.status().current_tick;
        let cadence = self.engine.config().snapshot_every_ticks.max(1);
        let run_complete = self.engine.status().is_complete();

        let Some(state) = self.persistence.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let new_commands = &self.command_log[state.persisted_command_count..];
        let new_events = &self.engine.events()[state.persisted_event_count..];

        let snapshot_due = ((current_tick == 0 && state.last_snapshot_tick.is_none())
            || (current_tick > 0 && ((current_tick % cadence == 0) || run_complete)))
            && state.last_snapshot_tick != Some(current_tick);

        let snapshot = if snapshot_due {
            Some(self.engine.snapshot())
        } else {
            None
        };

        state.store.persist_delta(
            self.engine.config(),
            self.engine.status(),
            new_commands,
            new_events,
            snapshot.as_ref(),
        )?;

        state.persisted_command_count = self.command_log.len();
        state.persisted_event_count = self.engine.events().len();

        if let Some(snapshot_payload) = snapshot {
            state.last_snapshot_tick = Some(snapshot_payload.tick);
        }

        self.last_persistence_error = None;
        Ok(())
    }

    pub fn replay_at_tick(&self, run_id: &str, tick: u64) -> Result<ReplaySlice, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        state.store.load_replay_at_tick(run_id, tick)
    }

    pub fn load_latest_snapshot_at_or_before(
        &self,
        run_id: &str,
        tick: u64,
    ) -> Result<Option<Snapshot>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        state.store.load_latest_snapshot_at_or_before(run_id, tick)
    }

    pub fn load_snapshots_range(
        &self,
        run_id: &str,
        from_tick: u64,
        to_tick: u64,
    ) -> Result<Vec<Snapshot>, PersistenceError> {
        let Some(state) = self.persistence.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        state.store.load_snapshots_range(run_id, from_tick, to_tick)
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    pub fn run_id(&self) -> &str {
        self.engine.run_id()
    }

    pub fn config(&self) -> &RunConfig {
        self.engine.config()
    }

    pub fn snapshot_for_current_tick(&self) -> Snapshot {
        self.engine.snapshot()
    }

    pub fn start(&mut self) -> &RunStatus {
        self.engine.start();
        self.flush_persistence_if_enabled();
        self.engine.status()
    }

    pub fn pause(&mut self) -> &RunStatus {
        self.engine.pause();
        self.flush_persistence_if_enabled();
        self.engine.status()
    }

    /// Advance by the requested number of ticks.
    /// Auto-starts the engine if paused so that explicit step requests always advance.
    pub fn step(&mut self, steps: u64) -> (&RunStatus, u64) {
        self.engine.start();
        let committed = self.engine.step_n(steps.max(1));
        self.flush_persistence_if_enabled();
        (self.engine.status(), committed)
    }

    /// Auto-starts the engine if paused so that explicit run-to-tick requests always advance.
    pub fn run_to_tick(&mut self, tick: u64) -> (&RunStatus, u64) {
        self.engine.start();
        let committed = self.engine.run_to_tick(tick);
        self.flush_persistence_if_enabled();
        (self.engine.status(), committed)
    }

    /// Validates and applies a command. Domain commands settle synchronously
    /// against the current tick so callers observe the winner of concurrent
    /// buyout attempts immediately; a future `effective_tick` defers the
    /// command to the queue instead.
    pub fn submit_command(
        &mut self,
        command: Command,
        effective_tick: Option<u64>,
    ) -> CommandResult {
        let current_tick = self.engine.status().current_tick;
        let scheduled_tick = effective_tick.unwrap_or(current_tick);

        let result = match self.validate_command(&command, effective_tick) {
            Some(error) => CommandResult::rejected(&command, error),
            None => match &command.payload {
                CommandPayload::SimStart => {
                    self.engine.start();
                    CommandResult::accepted(&command, None)
                }
                CommandPayload::SimPause => {
                    self.engine.pause();
                    CommandResult::accepted(&command, None)
                }
                CommandPayload::SimStepTick { steps } => {
                    self.engine.start();
                    let committed = self.engine.step_n(*steps);
                    CommandResult::accepted(&command, Some(json!({ "committed": committed })))
                }
                CommandPayload::SimRunToTick { target_tick } => {
                    self.engine.start();
                    let committed = self.engine.run_to_tick(*target_tick);
                    CommandResult::accepted(&command, Some(json!({ "committed": committed })))
                }
                _ if scheduled_tick > current_tick => {
                    self.engine.enqueue_command(command.clone(), scheduled_tick);
                    CommandResult::accepted(
                        &command,
                        Some(json!({ "scheduled_tick": scheduled_tick })),
                    )
                }
                _ => self.engine.apply_command(command.clone()),
            },
        };

        self.command_audit.push(result.clone());
        self.command_log.push(PersistedCommandEntry {
            command,
            result: result.clone(),
            effective_tick: scheduled_tick,
        });
        self.flush_persistence_if_enabled();
        result
    }

    pub fn status(&self) -> &RunStatus {
        self.engine.status()
    }

    pub fn command_audit(&self) -> &[CommandResult] {
        &self.command_audit
    }

    pub fn command_log(&self) -> &[PersistedCommandEntry] {
        &self.command_log
    }

    pub fn events(&self) -> &[Event] {
        self.engine.events()
    }

    pub fn last_step_metrics(&self) -> city_core::StepMetrics {
        self.engine.last_step_metrics()
    }

    /// Expose the underlying CityWorld for direct inspection.
    pub fn city_world(&self) -> &CityWorld {
        &self.engine
    }

    fn flush_persistence_if_enabled(&mut self) {
        if self.persistence.is_none() {
            return;
        }

        if let Err(err) = self.flush_persistence_checked() {
            tracing::warn!(
                run_id = %self.engine.run_id(),
                error = %err,
                "persistence flush failed; keeping in-memory state authoritative"
            );
            self.last_persistence_error = Some(err.to_string());
        }
    }

    fn validate_command(&self, command: &Command, effective_tick: Option<u64>) -> Option<ApiError> {
        if command.schema_version != SCHEMA_VERSION_V1 {
            return Some(ApiError::new(
                ErrorCode::InvalidCommand,
                "Unsupported schema_version",
                Some(format!(
                    "got={} expected={}",
                    command.schema_version, SCHEMA_VERSION_V1
                )),
            ));
        }

        if command.run_id != self.engine.run_id() {
            return Some(ApiError::new(
                ErrorCode::RunNotFound,
                "command.run_id does not match active run",
                None,
            ));
        }

        if !command_type_matches_payload(command.command_type, &command.payload) {
            return Some(ApiError::new(
                ErrorCode::InvalidCommand,
                "command_type does not match payload variant",
                None,
            ));
        }

        match &command.payload {
            CommandPayload::SimStepTick { steps } if *steps == 0 => {
                return Some(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "sim.step_tick requires steps >= 1",
                    None,
                ))
            }
            CommandPayload::CastVote { votes, .. } if *votes == 0 => {
                return Some(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "vote.cast requires votes >= 1",
                    None,
                ))
            }
            _ => {}
        }

        if let Some(scheduled_tick) = effective_tick {
            if scheduled_tick < self.status().current_tick {
                return Some(ApiError::new(
                    ErrorCode::InvalidCommand,
                    "cannot schedule command in the past",
                    Some(format!(
                        "scheduled_tick={} current_tick={}",
                        scheduled_tick,
                        self.status().current_tick
                    )),
                ));
            }
        }

        None
    }
}

fn command_type_matches_payload(command_type: CommandType, payload: &CommandPayload) -> bool {
    matches!(
        (command_type, payload),
        (CommandType::SimStart, CommandPayload::SimStart)
            | (CommandType::SimPause, CommandPayload::SimPause)
            | (CommandType::SimStepTick, CommandPayload::SimStepTick { .. })
            | (
                CommandType::SimRunToTick,
                CommandPayload::SimRunToTick { .. }
            )
            | (
                CommandType::DeclareValuation,
                CommandPayload::DeclareValuation { .. }
            )
            | (
                CommandType::AttemptBuyout,
                CommandPayload::AttemptBuyout { .. }
            )
            | (
                CommandType::RequestRelease,
                CommandPayload::RequestRelease { .. }
            )
            | (
                CommandType::CancelRelease,
                CommandPayload::CancelRelease { .. }
            )
            | (CommandType::CastVote, CommandPayload::CastVote { .. })
            | (
                CommandType::RetractVotes,
                CommandPayload::RetractVotes { .. }
            )
            | (
                CommandType::SubmitProposal,
                CommandPayload::SubmitProposal { .. }
            )
            | (CommandType::OpenVoting, CommandPayload::OpenVoting { .. })
            | (
                CommandType::IssueAttestation,
                CommandPayload::IssueAttestation { .. }
            )
            | (
                CommandType::RevokeAttestation,
                CommandPayload::RevokeAttestation { .. }
            )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::VoteDirection;

    fn test_config() -> RunConfig {
        RunConfig {
            run_id: "run_api_test".to_string(),
            seed: 99,
            duration_days: 5,
            default_min_holding_days: 0,
            ..RunConfig::default()
        }
    }

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("city_kernel_{name}_{nanos}.sqlite"))
    }

    #[test]
    fn step_returns_committed_count() {
        let mut api = EngineApi::from_config(test_config());
        api.start();
        let (_, committed) = api.step(3);

        assert_eq!(committed, 3);
        assert_eq!(api.status().current_tick, 3);
    }

    #[test]
    fn rejects_mismatched_payload_type() {
        let api_config = test_config();
        let mut api = EngineApi::from_config(api_config.clone());

        let bad = Command::new(
            "cmd_bad",
            api_config.run_id,
            0,
            CommandType::AttemptBuyout,
            CommandPayload::RequestRelease {
                resource_id: "res:plot:a00".to_string(),
                owner: "addr:nobody".to_string(),
            },
        );

        let result = api.submit_command(bad, None);
        assert!(!result.accepted);
        assert!(result.error.is_some());
    }

    #[test]
    fn rejects_command_for_other_run() {
        let mut api = EngineApi::from_config(test_config());

        let foreign = Command::new(
            "cmd_foreign",
            "run_somewhere_else",
            0,
            CommandType::SimStart,
            CommandPayload::SimStart,
        );

        let result = api.submit_command(foreign, None);
        assert!(!result.accepted);
        let error = result.error.expect("rejection should carry an error");
        assert_eq!(error.error_code, ErrorCode::RunNotFound);
    }

    #[test]
    fn rejects_zero_vote_cast() {
        let api_config = test_config();
        let mut api = EngineApi::from_config(api_config.clone());

        let zero_votes = Command::new(
            "cmd_zero_votes",
            api_config.run_id,
            0,
            CommandType::CastVote,
            CommandPayload::CastVote {
                proposal_id: "prop_001".to_string(),
                voter: "addr:nobody".to_string(),
                votes: 0,
                direction: VoteDirection::For,
            },
        );

        let result = api.submit_command(zero_votes, None);
        assert!(!result.accepted);
        assert_eq!(
            result.error.expect("must reject").error_code,
            ErrorCode::InvalidCommand
        );
    }

    #[test]
    fn domain_command_settles_synchronously() {
        let api_config = test_config();
        let mut api = EngineApi::from_config(api_config.clone());
        api.start();
        api.step(1);

        let snapshot = api.snapshot_for_current_tick();
        let resources = snapshot
            .resources
            .as_array()
            .expect("resources should serialize as an array")
            .clone();
        let owned = resources
            .iter()
            .find(|entry| !entry["owner"].is_null())
            .expect("genesis should own some resources");
        let resource_id = owned["resource_id"].as_str().unwrap().to_string();
        let owner = owned["owner"].as_str().unwrap().to_string();
        let value = owned["declared_value_udai"].as_i64().unwrap();
        let version = owned["version"].as_u64().unwrap();

        let challenger = resources
            .iter()
            .flat_map(|entry| entry["owner"].as_str())
            .find(|candidate| *candidate != owner)
            .expect("another owner should exist")
            .to_string();

        let buyout = Command::new(
            "cmd_buyout_sync",
            api_config.run_id,
            api.status().current_tick,
            CommandType::AttemptBuyout,
            CommandPayload::AttemptBuyout {
                resource_id: resource_id.clone(),
                challenger,
                offered_value_udai: value,
                expected_version: Some(version),
            },
        );

        let result = api.submit_command(buyout, None);
        assert!(result.accepted, "buyout should settle: {:?}", result.error);
        let data = result.data.expect("settlement should report a new version");
        assert!(data["version"].as_u64().unwrap() > version);
    }

    #[test]
    fn future_effective_tick_defers_to_queue() {
        let api_config = test_config();
        let mut api = EngineApi::from_config(api_config.clone());
        api.start();

        let release = Command::new(
            "cmd_release_later",
            api_config.run_id,
            0,
            CommandType::RequestRelease,
            CommandPayload::RequestRelease {
                resource_id: "res:missing:z00".to_string(),
                owner: "addr:nobody".to_string(),
            },
        );

        let result = api.submit_command(release, Some(api.status().current_tick + 5));
        assert!(result.accepted, "deferred commands are accepted at submit");
        assert_eq!(api.status().queue_depth, 1);
    }

    #[test]
    fn persists_and_replays_by_tick() {
        let mut config = test_config();
        config.snapshot_every_ticks = 4;
        let run_id = config.run_id.clone();

        let mut api = EngineApi::from_config(config);
        let db_path = temp_db_path("replay");

        api.attach_sqlite_store(&db_path)
            .expect("should attach sqlite store");
        api.initialize_run_storage(true)
            .expect("should initialize run storage");

        api.start();
        api.run_to_tick(9);
        api.flush_persistence_checked()
            .expect("flush should succeed");

        let replay = api
            .replay_at_tick(&run_id, 9)
            .expect("replay should load at tick");

        assert!(replay.snapshot.is_some());
        let snapshot_tick = replay.snapshot.as_ref().map(|snap| snap.tick).unwrap();
        assert!(snapshot_tick <= 9);
        assert!(replay
            .events
            .iter()
            .all(|event| event.tick > snapshot_tick && event.tick <= 9));

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-shm"));
    }
}
