use super::*;

impl CityWorld {
    pub fn start(&mut self) {
        if !self.status.is_complete() {
            self.status.mode = RunMode::Running;
        }
    }

    pub fn pause(&mut self) {
        self.status.mode = RunMode::Paused;
    }

    pub fn run_id(&self) -> &str {
        &self.status.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn events(&self) -> &[Event] {
        &self.event_log
    }

    pub fn state_hash(&self) -> u64 {
        self.state_hash
    }

    pub fn last_step_metrics(&self) -> StepMetrics {
        self.last_step_metrics
    }

    pub fn enqueue_command(&mut self, command: Command, effective_tick: u64) {
        self.queued_commands.push(QueuedCommand {
            effective_tick,
            insertion_sequence: self.next_command_sequence,
            command,
        });
        self.next_command_sequence = self.next_command_sequence.saturating_add(1);
        self.sync_queue_depth();
    }

    pub fn inject_command(&mut self, command: Command) {
        let effective_tick = self.status.current_tick + 1;
        self.enqueue_command(command, effective_tick);
    }

    /// Advances the city by one tick. Order within a tick is fixed: queued
    /// commands, then day-boundary work (depreciation, tax accrual, forced
    /// releases), then due release finalizations, then due proposal
    /// resolutions.
    pub fn step(&mut self) -> bool {
        let previous_tick = self.status.current_tick;
        self.last_step_metrics = StepMetrics::default();
        if self.status.is_complete() {
            self.status.mode = RunMode::Paused;
            return false;
        }
        self.status.mode = RunMode::Running;
        let tick = self.status.current_tick.saturating_add(1);
        if tick > self.status.max_ticks {
            self.status.mode = RunMode::Paused;
            return false;
        }
        self.status.current_tick = tick;
        self.sequence_in_tick = 0;
        self.settlement.begin_tick();

        let processed_commands = self.process_due_commands(tick);

        let mut accrued_resources = 0_u64;
        if tick % TICKS_PER_DAY == 0 {
            let day = tick / TICKS_PER_DAY;
            self.apply_daily_depreciation(tick, day);
            accrued_resources = self.accrue_daily_tax(tick, day);
        }

        self.finalize_due_releases(tick);
        self.resolve_due_proposals(tick);
        self.emit_new_money_transfer_events(tick);

        self.state_hash = mix_state_hash(self.state_hash, tick, self.sequence_in_tick);
        self.last_step_metrics = StepMetrics {
            advanced_ticks: self.status.current_tick.saturating_sub(previous_tick),
            processed_batch_tick: tick,
            processed_commands,
            accrued_resources,
        };

        if self.status.current_tick >= self.status.max_ticks {
            self.status.mode = RunMode::Paused;
        }
        self.sync_queue_depth();

        true
    }

    pub fn step_n(&mut self, n: u64) -> u64 {
        let mut committed = 0_u64;
        for _ in 0..n {
            if !self.step() {
                break;
            }
            committed += 1;
        }
        committed
    }

    pub fn run_to_tick(&mut self, tick: u64) -> u64 {
        let mut committed = 0_u64;
        while self.status.current_tick < tick {
            if !self.step() {
                break;
            }
            committed += 1;
        }
        committed
    }

    pub(super) fn sync_queue_depth(&mut self) {
        self.status.queue_depth = self.queued_commands.len();
    }

    fn apply_daily_depreciation(&mut self, tick: u64, day: u64) {
        let depreciated = self
            .ledger
            .resources_mut()
            .filter_map(|resource| {
                if !resource.depreciating || resource.owner.is_some() {
                    return None;
                }
                let decay_udai = resource.depreciate_day();
                (decay_udai > 0).then(|| {
                    (
                        resource.resource_id.clone(),
                        resource.zone_id.clone(),
                        decay_udai,
                        resource.declared_value_udai,
                    )
                })
            })
            .collect::<Vec<_>>();

        for (resource_id, zone_id, decay_udai, new_value_udai) in depreciated {
            self.push_event(
                tick,
                EventType::DepreciationApplied,
                Some(zone_id),
                Vec::new(),
                Vec::new(),
                Some(json!({
                    "resource_id": resource_id,
                    "day": day,
                    "decay_udai": decay_udai,
                    "new_value_udai": new_value_udai,
                })),
            );
        }
    }

    fn accrue_daily_tax(&mut self, tick: u64, day: u64) -> u64 {
        let outcomes =
            self.tax
                .accrue_day(day, tick, &self.zones, &mut self.ledger, &mut self.money);
        let accrued = outcomes.len() as u64;

        for outcome in outcomes {
            let zone_id = self
                .ledger
                .get(&outcome.resource_id)
                .map(|resource| resource.zone_id.clone())
                .ok();
            let event_type = if outcome.paid {
                EventType::TaxAccrued
            } else {
                EventType::TaxPaymentMissed
            };
            self.push_event(
                tick,
                event_type,
                zone_id.clone(),
                vec![ActorRef {
                    actor_id: outcome.owner.clone(),
                    actor_kind: "owner".to_string(),
                }],
                Vec::new(),
                Some(json!({
                    "resource_id": outcome.resource_id,
                    "day": outcome.day,
                    "amount_udai": outcome.amount_udai,
                    "paid": outcome.paid,
                    "arrears_days": outcome.arrears_days,
                })),
            );

            if outcome.paid && outcome.amount_udai > 0 {
                // Tax paid mints governance credits one-for-one.
                if self
                    .identities
                    .grant_credits(&outcome.owner, outcome.amount_udai)
                    .is_ok()
                {
                    self.push_event(
                        tick,
                        EventType::GovernanceCreditsGranted,
                        zone_id.clone(),
                        vec![ActorRef {
                            actor_id: outcome.owner.clone(),
                            actor_kind: "taxpayer".to_string(),
                        }],
                        Vec::new(),
                        Some(json!({
                            "resource_id": outcome.resource_id,
                            "credits_udai": outcome.amount_udai,
                        })),
                    );
                }
            }

            if outcome.force_release {
                if let Ok(previous_owner) =
                    self.settlement
                        .force_release(&mut self.ledger, &outcome.resource_id, tick)
                {
                    self.push_event(
                        tick,
                        EventType::ForcedRelease,
                        zone_id,
                        vec![ActorRef {
                            actor_id: previous_owner,
                            actor_kind: "defaulted_owner".to_string(),
                        }],
                        Vec::new(),
                        Some(json!({
                            "resource_id": outcome.resource_id,
                            "arrears_days": outcome.arrears_days,
                            "grace_period_days": self.config.grace_period_days,
                        })),
                    );
                }
            }
        }
        accrued
    }

    fn finalize_due_releases(&mut self, tick: u64) {
        let finalized = self.settlement.finalize_due_releases(&mut self.ledger, tick);
        for release in finalized {
            let zone_id = self
                .ledger
                .get(&release.resource_id)
                .map(|resource| resource.zone_id.clone())
                .ok();
            self.push_event(
                tick,
                EventType::ReleaseFinalized,
                zone_id,
                vec![ActorRef {
                    actor_id: release.previous_owner,
                    actor_kind: "releasing_owner".to_string(),
                }],
                Vec::new(),
                Some(json!({ "resource_id": release.resource_id })),
            );
        }
    }

    fn resolve_due_proposals(&mut self, tick: u64) {
        let supply = self.identities.total_credit_supply_udai();
        let resolutions = self.proposals.resolve_due(tick, supply);
        for resolution in resolutions {
            self.push_event(
                tick,
                EventType::ProposalResolved,
                None,
                Vec::new(),
                Vec::new(),
                Some(json!({
                    "proposal_id": resolution.proposal_id,
                    "outcome": resolution.outcome,
                    "credit_supply_udai": supply,
                })),
            );
            if let Some(change) = resolution.change_to_apply {
                self.apply_proposal_change(&resolution.proposal_id, change, tick);
            }
        }
    }

    fn apply_proposal_change(&mut self, proposal_id: &str, change: ProposalChange, tick: u64) {
        match change {
            ProposalChange::ZoneTaxRate {
                zone_id,
                new_rate_bps,
            } => {
                let Some(zone) = self.zones.get_mut(&zone_id) else {
                    tracing::warn!(
                        proposal_id,
                        zone_id = zone_id.as_str(),
                        "passed proposal targets an unknown zone"
                    );
                    return;
                };
                let previous_rate_bps = zone.tax_rate_bps;
                zone.tax_rate_bps = new_rate_bps.min(MAX_RATE_BPS);
                self.push_event(
                    tick,
                    EventType::ZoneTaxRateChanged,
                    Some(zone_id),
                    Vec::new(),
                    vec![format!("prop:{proposal_id}")],
                    Some(json!({
                        "proposal_id": proposal_id,
                        "previous_rate_bps": previous_rate_bps,
                        "new_rate_bps": new_rate_bps,
                    })),
                );
            }
            ProposalChange::ResourceDepreciation {
                resource_id,
                depreciating,
                daily_rate_bps,
            } => {
                let zone_id = match self.ledger.get_mut(&resource_id) {
                    Ok(resource) => {
                        resource.depreciating = depreciating;
                        resource.depreciation_daily_bps = daily_rate_bps.min(MAX_RATE_BPS);
                        resource.version += 1;
                        resource.zone_id.clone()
                    }
                    Err(_) => {
                        tracing::warn!(
                            proposal_id,
                            resource_id = resource_id.as_str(),
                            "passed proposal targets an unknown resource"
                        );
                        return;
                    }
                };
                self.push_event(
                    tick,
                    EventType::DepreciationPolicyChanged,
                    Some(zone_id),
                    Vec::new(),
                    vec![format!("prop:{proposal_id}")],
                    Some(json!({
                        "proposal_id": proposal_id,
                        "resource_id": resource_id,
                        "depreciating": depreciating,
                        "daily_rate_bps": daily_rate_bps,
                    })),
                );
            }
            ProposalChange::Signal { .. } => {}
        }
    }
}
