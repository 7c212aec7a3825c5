use super::*;

fn ledger_error(err: &LedgerError) -> ErrorCode {
    match err {
        LedgerError::ResourceNotFound(_) => ErrorCode::NotFound,
        LedgerError::InvalidValuation(_) => ErrorCode::InvalidValuation,
        LedgerError::NotOwner { .. } => ErrorCode::InvalidCommand,
        LedgerError::AlreadyOwned(_) | LedgerError::NotOwned(_) => ErrorCode::Conflict,
    }
}

fn settlement_error(err: &SettlementError) -> ErrorCode {
    match err {
        SettlementError::NotFound(_) => ErrorCode::NotFound,
        SettlementError::Locked { .. } | SettlementError::RevokeWindowElapsed { .. } => {
            ErrorCode::Locked
        }
        SettlementError::Conflict { .. } => ErrorCode::Conflict,
        SettlementError::InvalidValuation { .. } => ErrorCode::InvalidValuation,
        SettlementError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
        SettlementError::NotOwner { .. }
        | SettlementError::SelfBuyout(_)
        | SettlementError::NoPendingRelease(_) => ErrorCode::InvalidCommand,
    }
}

fn vote_error(err: &VoteError) -> ErrorCode {
    match err {
        VoteError::InsufficientWeight { .. } => ErrorCode::InsufficientWeight,
        VoteError::DirectionLocked { .. } => ErrorCode::Conflict,
        VoteError::ZeroVotes | VoteError::NothingToRetract => ErrorCode::InvalidCommand,
    }
}

fn governance_error(err: &GovernanceError) -> ErrorCode {
    match err {
        GovernanceError::NotFound(_) => ErrorCode::NotFound,
        GovernanceError::Closed { .. } => ErrorCode::Closed,
        GovernanceError::DuplicateProposal(_) | GovernanceError::NotDraft(_) => ErrorCode::Conflict,
        GovernanceError::InvalidChange(_) => ErrorCode::InvalidCommand,
    }
}

fn identity_error(err: &IdentityError) -> ErrorCode {
    match err {
        IdentityError::NotFound(_) | IdentityError::AttestationNotFound { .. } => {
            ErrorCode::NotFound
        }
        IdentityError::DuplicateIdentity(_)
        | IdentityError::DuplicateAttestation(_)
        | IdentityError::AlreadyRevoked(_) => ErrorCode::Conflict,
        IdentityError::NotIssuer { .. } | IdentityError::InvalidAmount(_) => {
            ErrorCode::InvalidCommand
        }
        IdentityError::InsufficientCredits { .. } => ErrorCode::InsufficientWeight,
    }
}

impl CityWorld {
    pub(super) fn process_due_commands(&mut self, tick: u64) -> u64 {
        self.queued_commands.sort_by(|a, b| {
            a.effective_tick
                .cmp(&b.effective_tick)
                .then(a.insertion_sequence.cmp(&b.insertion_sequence))
        });

        let mut future = Vec::new();
        let mut due = Vec::new();
        for queued in self.queued_commands.drain(..) {
            if queued.effective_tick <= tick {
                due.push(queued);
            } else {
                future.push(queued);
            }
        }
        self.queued_commands = future;
        self.sync_queue_depth();

        let processed = due.len() as u64;
        for queued in due {
            let _ = self.apply_command_at(queued.command, tick);
        }
        processed
    }

    /// Applies a command against the current tick and returns its result
    /// synchronously. Used both for queued commands at tick boundaries and
    /// for interactive commands between steps.
    pub fn apply_command(&mut self, command: Command) -> CommandResult {
        let tick = self.status.current_tick;
        let result = self.apply_command_at(command, tick);
        self.state_hash = mix_state_hash(self.state_hash, tick, self.sequence_in_tick);
        result
    }

    fn apply_command_at(&mut self, command: Command, tick: u64) -> CommandResult {
        let command_ref = format!("cmd:{}", command.command_id);
        let outcome: Result<Option<Value>, ApiError> = match command.payload.clone() {
            CommandPayload::SimStart => {
                self.start();
                Ok(None)
            }
            CommandPayload::SimPause => {
                self.pause();
                Ok(None)
            }
            // Stepping is driven by the caller that owns the loop.
            CommandPayload::SimStepTick { .. } | CommandPayload::SimRunToTick { .. } => Ok(None),
            CommandPayload::DeclareValuation {
                resource_id,
                owner,
                new_value_udai,
            } => self.handle_declare_valuation(
                &resource_id,
                &owner,
                new_value_udai,
                tick,
                &command_ref,
            ),
            CommandPayload::AttemptBuyout {
                resource_id,
                challenger,
                offered_value_udai,
                expected_version,
            } => self.handle_attempt_buyout(
                &resource_id,
                &challenger,
                offered_value_udai,
                expected_version,
                tick,
                &command_ref,
            ),
            CommandPayload::RequestRelease { resource_id, owner } => {
                self.handle_request_release(&resource_id, &owner, tick, &command_ref)
            }
            CommandPayload::CancelRelease { resource_id, owner } => {
                self.handle_cancel_release(&resource_id, &owner, tick, &command_ref)
            }
            CommandPayload::CastVote {
                proposal_id,
                voter,
                votes,
                direction,
            } => self.handle_cast_vote(&proposal_id, &voter, votes, direction, tick, &command_ref),
            CommandPayload::RetractVotes { proposal_id, voter } => {
                self.handle_retract_votes(&proposal_id, &voter, tick, &command_ref)
            }
            CommandPayload::SubmitProposal {
                proposal_id,
                proposer,
                change,
            } => self.handle_submit_proposal(&proposal_id, &proposer, change, tick, &command_ref),
            CommandPayload::OpenVoting {
                proposal_id,
                voting_period_days,
            } => self.handle_open_voting(&proposal_id, voting_period_days, tick, &command_ref),
            CommandPayload::IssueAttestation {
                address,
                attestation_id,
                issuer,
                claim,
            } => self
                .identities
                .issue_attestation(&address, &attestation_id, &issuer, &claim, tick)
                .map(|()| {
                    self.push_event(
                        tick,
                        EventType::AttestationIssued,
                        None,
                        vec![ActorRef {
                            actor_id: issuer.clone(),
                            actor_kind: "issuer".to_string(),
                        }],
                        vec![command_ref.clone()],
                        Some(json!({
                            "address": address,
                            "attestation_id": attestation_id,
                            "claim": claim,
                        })),
                    );
                    None
                })
                .map_err(|err| ApiError::new(identity_error(&err), err.to_string(), None)),
            CommandPayload::RevokeAttestation {
                address,
                attestation_id,
                issuer,
            } => self
                .identities
                .revoke_attestation(&address, &attestation_id, &issuer, tick)
                .map(|()| {
                    self.push_event(
                        tick,
                        EventType::AttestationRevoked,
                        None,
                        vec![ActorRef {
                            actor_id: issuer.clone(),
                            actor_kind: "issuer".to_string(),
                        }],
                        vec![command_ref.clone()],
                        Some(json!({
                            "address": address,
                            "attestation_id": attestation_id,
                        })),
                    );
                    None
                })
                .map_err(|err| ApiError::new(identity_error(&err), err.to_string(), None)),
        };

        let (result, accepted, error_code) = match outcome {
            Ok(data) => (CommandResult::accepted(&command, data), true, None),
            Err(error) => {
                let code = error.error_code;
                (CommandResult::rejected(&command, error), false, Some(code))
            }
        };
        self.push_event(
            tick,
            EventType::CommandApplied,
            None,
            Vec::new(),
            vec![command_ref],
            Some(json!({
                "command_type": command.command_type,
                "accepted": accepted,
                "error_code": error_code,
            })),
        );
        self.emit_new_money_transfer_events(tick);
        result
    }

    fn handle_declare_valuation(
        &mut self,
        resource_id: &str,
        owner: &str,
        new_value_udai: i64,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        let version = self
            .ledger
            .declare_valuation(resource_id, owner, new_value_udai)
            .map_err(|err| ApiError::new(ledger_error(&err), err.to_string(), None))?;
        let zone_id = self.zone_of(resource_id);
        self.push_event(
            tick,
            EventType::ValuationDeclared,
            zone_id,
            vec![ActorRef {
                actor_id: owner.to_string(),
                actor_kind: "owner".to_string(),
            }],
            vec![command_ref.to_string()],
            Some(json!({
                "resource_id": resource_id,
                "new_value_udai": new_value_udai,
                "version": version,
            })),
        );
        Ok(Some(json!({ "version": version })))
    }

    fn handle_attempt_buyout(
        &mut self,
        resource_id: &str,
        challenger: &str,
        offered_value_udai: i64,
        expected_version: Option<u64>,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        if !self.identities.contains(challenger) {
            return Err(ApiError::new(
                ErrorCode::NotFound,
                format!("unknown identity: {challenger}"),
                None,
            ));
        }
        let settled = self
            .settlement
            .attempt_buyout(
                &mut self.ledger,
                &mut self.money,
                resource_id,
                challenger,
                offered_value_udai,
                expected_version,
                tick,
            )
            .map_err(|err| ApiError::new(settlement_error(&err), err.to_string(), None))?;

        let zone_id = self.zone_of(resource_id);
        let mut actors = vec![ActorRef {
            actor_id: challenger.to_string(),
            actor_kind: "challenger".to_string(),
        }];
        if let Some(previous_owner) = &settled.previous_owner {
            actors.push(ActorRef {
                actor_id: previous_owner.clone(),
                actor_kind: "previous_owner".to_string(),
            });
        }
        self.push_event(
            tick,
            EventType::BuyoutSettled,
            zone_id,
            actors,
            vec![command_ref.to_string()],
            Some(json!({
                "resource_id": resource_id,
                "price_udai": settled.price_udai,
                "previous_owner": settled.previous_owner,
                "new_version": settled.new_version,
                "transfer_id": settled.transfer_id,
            })),
        );
        Ok(Some(json!({
            "version": settled.new_version,
            "price_udai": settled.price_udai,
        })))
    }

    fn handle_request_release(
        &mut self,
        resource_id: &str,
        owner: &str,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        let pending = self
            .settlement
            .request_release(&mut self.ledger, resource_id, owner, tick)
            .map_err(|err| ApiError::new(settlement_error(&err), err.to_string(), None))?;
        let zone_id = self.zone_of(resource_id);
        self.push_event(
            tick,
            EventType::ReleaseRequested,
            zone_id,
            vec![ActorRef {
                actor_id: owner.to_string(),
                actor_kind: "owner".to_string(),
            }],
            vec![command_ref.to_string()],
            Some(json!({
                "resource_id": resource_id,
                "notice_ends_tick": pending.notice_ends_tick,
            })),
        );
        Ok(Some(json!({
            "notice_ends_tick": pending.notice_ends_tick,
        })))
    }

    fn handle_cancel_release(
        &mut self,
        resource_id: &str,
        owner: &str,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        self.settlement
            .cancel_release(&mut self.ledger, resource_id, owner, tick)
            .map_err(|err| ApiError::new(settlement_error(&err), err.to_string(), None))?;
        let zone_id = self.zone_of(resource_id);
        self.push_event(
            tick,
            EventType::ReleaseCancelled,
            zone_id,
            vec![ActorRef {
                actor_id: owner.to_string(),
                actor_kind: "owner".to_string(),
            }],
            vec![command_ref.to_string()],
            Some(json!({ "resource_id": resource_id })),
        );
        Ok(None)
    }

    fn handle_cast_vote(
        &mut self,
        proposal_id: &str,
        voter: &str,
        votes: u32,
        direction: contracts::VoteDirection,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        self.proposals
            .require_active(proposal_id)
            .map_err(|err| ApiError::new(governance_error(&err), err.to_string(), None))?;
        let available_udai = self
            .identities
            .credits(voter)
            .map_err(|err| ApiError::new(identity_error(&err), err.to_string(), None))?;
        let cast = self
            .votes
            .cast(proposal_id, voter, votes, direction, available_udai)
            .map_err(|err| ApiError::new(vote_error(&err), err.to_string(), None))?;
        self.identities
            .spend_credits(voter, cast.cost_udai)
            .map_err(|err| ApiError::new(identity_error(&err), err.to_string(), None))?;

        let (votes_for, votes_against, turnout) = self.votes.tally(proposal_id);
        self.proposals
            .record_tally(proposal_id, votes_for, votes_against, turnout);
        self.push_event(
            tick,
            EventType::VoteCast,
            None,
            vec![ActorRef {
                actor_id: voter.to_string(),
                actor_kind: "voter".to_string(),
            }],
            vec![command_ref.to_string()],
            Some(json!({
                "proposal_id": proposal_id,
                "direction": cast.direction,
                "added_votes": cast.added_votes,
                "total_votes": cast.total_votes,
                "cost_udai": cast.cost_udai,
            })),
        );
        Ok(Some(json!({
            "total_votes": cast.total_votes,
            "cost_udai": cast.cost_udai,
        })))
    }

    fn handle_retract_votes(
        &mut self,
        proposal_id: &str,
        voter: &str,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        self.proposals
            .require_active(proposal_id)
            .map_err(|err| ApiError::new(governance_error(&err), err.to_string(), None))?;
        let retracted = self
            .votes
            .retract(proposal_id, voter)
            .map_err(|err| ApiError::new(vote_error(&err), err.to_string(), None))?;
        self.identities
            .grant_credits(voter, retracted.refunded_udai)
            .map_err(|err| ApiError::new(identity_error(&err), err.to_string(), None))?;

        let (votes_for, votes_against, turnout) = self.votes.tally(proposal_id);
        self.proposals
            .record_tally(proposal_id, votes_for, votes_against, turnout);
        self.push_event(
            tick,
            EventType::VotesRetracted,
            None,
            vec![ActorRef {
                actor_id: voter.to_string(),
                actor_kind: "voter".to_string(),
            }],
            vec![command_ref.to_string()],
            Some(json!({
                "proposal_id": proposal_id,
                "retracted_votes": retracted.retracted_votes,
                "refunded_udai": retracted.refunded_udai,
            })),
        );
        Ok(Some(json!({ "refunded_udai": retracted.refunded_udai })))
    }

    fn handle_submit_proposal(
        &mut self,
        proposal_id: &str,
        proposer: &str,
        change: ProposalChange,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        if !self.identities.contains(proposer) {
            return Err(ApiError::new(
                ErrorCode::NotFound,
                format!("unknown identity: {proposer}"),
                None,
            ));
        }
        self.proposals
            .submit(proposal_id, proposer, change.clone(), self.config.quorum_bps, tick)
            .map_err(|err| ApiError::new(governance_error(&err), err.to_string(), None))?;
        self.push_event(
            tick,
            EventType::ProposalSubmitted,
            None,
            vec![ActorRef {
                actor_id: proposer.to_string(),
                actor_kind: "proposer".to_string(),
            }],
            vec![command_ref.to_string()],
            Some(json!({ "proposal_id": proposal_id, "change": change })),
        );
        Ok(None)
    }

    fn handle_open_voting(
        &mut self,
        proposal_id: &str,
        voting_period_days: Option<u64>,
        tick: u64,
        command_ref: &str,
    ) -> Result<Option<Value>, ApiError> {
        let period_days = voting_period_days.unwrap_or(self.config.default_voting_period_days);
        let end_tick = tick + period_days.max(1) * TICKS_PER_DAY;
        self.proposals
            .open_voting(proposal_id, end_tick)
            .map_err(|err| ApiError::new(governance_error(&err), err.to_string(), None))?;
        self.push_event(
            tick,
            EventType::VotingOpened,
            None,
            Vec::new(),
            vec![command_ref.to_string()],
            Some(json!({ "proposal_id": proposal_id, "end_tick": end_tick })),
        );
        Ok(Some(json!({ "end_tick": end_tick })))
    }

    fn zone_of(&self, resource_id: &str) -> Option<String> {
        self.ledger
            .get(resource_id)
            .map(|resource| resource.zone_id.clone())
            .ok()
    }
}
