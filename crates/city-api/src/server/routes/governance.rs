async fn list_zones(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let zones = engine.city_world().zone_records();

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "zones.list".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "total": zones.len(),
                "zones": zones,
            }),
        }
    };

    Ok(Json(response))
}

async fn get_zone(
    Path((run_id, zone_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let world = engine.city_world();

        let Some(zone) = world.zone_record(&zone_id) else {
            return Err(HttpApiError::invalid_query(
                "zone_id not found",
                Some(format!("zone_id={zone_id}")),
            ));
        };

        let resources = world
            .resource_records()
            .into_iter()
            .filter(|record| record.zone_id == zone_id)
            .collect::<Vec<_>>();
        let occupied = resources
            .iter()
            .filter(|record| record.owner.is_some())
            .count();
        let declared_value_total_udai = resources
            .iter()
            .map(|record| i128::from(record.declared_value_udai))
            .sum::<i128>();

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "zone.detail".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "zone": zone,
                "resource_count": resources.len(),
                "occupied_count": occupied,
                "declared_value_total_udai": declared_value_total_udai.to_string(),
                "resources": resources,
            }),
        }
    };

    Ok(Json(response))
}

async fn list_identities(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let world = engine.city_world();
        let identities = world.identity_records();

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "identities.list".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "total": identities.len(),
                "total_credit_supply_udai": world.total_credit_supply_udai(),
                "identities": identities,
            }),
        }
    };

    Ok(Json(response))
}

async fn get_identity(
    Path((run_id, address)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let world = engine.city_world();

        let Some(identity) = world.identity_record(&address) else {
            return Err(HttpApiError::invalid_query(
                "address not found",
                Some(format!("address={address}")),
            ));
        };

        let holdings = world
            .resource_records()
            .into_iter()
            .filter(|record| record.owner.as_deref() == Some(address.as_str()))
            .collect::<Vec<_>>();
        let balance = world
            .account_balances()
            .into_iter()
            .find(|entry| entry.account_id == address);
        let transfers = world
            .money_transfers()
            .iter()
            .filter(|entry| entry.from_account == address || entry.to_account == address)
            .rev()
            .take(20)
            .cloned()
            .collect::<Vec<_>>();

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "identity.detail".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "identity": identity,
                "holdings": holdings,
                "account": balance,
                "recent_transfers": transfers,
            }),
        }
    };

    Ok(Json(response))
}

async fn list_accounts(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let world = engine.city_world();
        let accounts = world.account_balances();
        let treasury = accounts
            .iter()
            .find(|entry| entry.account_id == contracts::TREASURY_ACCOUNT)
            .map(|entry| entry.money_udai)
            .unwrap_or(0);

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "accounts.list".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "total": accounts.len(),
                "treasury_udai": treasury,
                "accounts": accounts,
            }),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize, Default)]
struct ProposalListQuery {
    status: Option<String>,
}

async fn list_proposals(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<ProposalListQuery>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let mut proposals = engine.city_world().proposal_records();

        if let Some(status) = &query.status {
            let normalized = status.trim().to_lowercase();
            proposals.retain(|record| {
                serde_json::to_value(record.status)
                    .ok()
                    .and_then(|value| value.as_str().map(ToString::to_string))
                    .map(|value| value == normalized)
                    .unwrap_or(false)
            });
        }

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "proposals.list".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "total": proposals.len(),
                "proposals": proposals,
            }),
        }
    };

    Ok(Json(response))
}

async fn get_proposal(
    Path((run_id, proposal_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let world = engine.city_world();

        let Some(proposal) = world.proposal_record(&proposal_id) else {
            return Err(HttpApiError::invalid_query(
                "proposal_id not found",
                Some(format!("proposal_id={proposal_id}")),
            ));
        };

        let votes = world.vote_records(&proposal_id);

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "proposal.detail".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "proposal": proposal,
                "votes": votes,
            }),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct SubmitProposalRequest {
    proposal_id: String,
    proposer: String,
    change: ProposalChange,
    command_id: Option<String>,
}

async fn submit_proposal(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<SubmitProposalRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::SubmitProposal,
            CommandPayload::SubmitProposal {
                proposal_id: request.proposal_id,
                proposer: request.proposer,
                change: request.change,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}

#[derive(Debug, Deserialize)]
struct OpenVotingRequest {
    voting_period_days: Option<u64>,
    command_id: Option<String>,
}

async fn open_voting(
    Path((run_id, proposal_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<OpenVotingRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::OpenVoting,
            CommandPayload::OpenVoting {
                proposal_id,
                voting_period_days: request.voting_period_days,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}

#[derive(Debug, Deserialize)]
struct CastVoteRequest {
    voter: String,
    votes: u32,
    direction: VoteDirection,
    command_id: Option<String>,
}

async fn cast_vote(
    Path((run_id, proposal_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<CastVoteRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::CastVote,
            CommandPayload::CastVote {
                proposal_id,
                voter: request.voter,
                votes: request.votes,
                direction: request.direction,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}

#[derive(Debug, Deserialize)]
struct RetractVotesRequest {
    voter: String,
    command_id: Option<String>,
}

async fn retract_votes(
    Path((run_id, proposal_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<RetractVotesRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::RetractVotes,
            CommandPayload::RetractVotes {
                proposal_id,
                voter: request.voter,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}
