/// Builds and applies a domain command issued through a typed HTTP endpoint.
/// Accepted results come back as the command payload; rejections surface as
/// the mapped HTTP status for the domain error code.
fn apply_domain_command(
    inner: &mut ServerInner,
    run_id: &str,
    command_id: Option<String>,
    command_type: CommandType,
    payload: CommandPayload,
) -> Result<(CommandResult, Vec<StreamMessage>), HttpApiError> {
    let (result, entry, status) = {
        let engine = require_run_mut(inner, run_id)?;
        let command_id = command_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("cmd_http_{:06}", engine.command_log().len()));
        let command = Command::new(
            command_id,
            run_id,
            engine.status().current_tick,
            command_type,
            payload,
        );
        let result = engine.submit_command(command, None);
        let entry = engine.command_log().last().cloned();
        let status = engine.status().clone();
        (result, entry, status)
    };

    let mut messages = Vec::new();
    if let Some(entry) = entry {
        messages.push(StreamMessage::command_result(&entry, status.current_tick));
    }
    messages.extend(collect_delta_messages(inner));
    messages.push(StreamMessage::run_status(&status));

    Ok((result, messages))
}

fn into_command_response(result: CommandResult) -> Result<Json<CommandResult>, HttpApiError> {
    match result.error {
        Some(error) => Err(HttpApiError::from_api_error(error)),
        None => Ok(Json(result)),
    }
}

#[derive(Debug, Deserialize, Default)]
struct ResourceListQuery {
    zone_id: Option<String>,
    owner: Option<String>,
    status: Option<String>,
    cursor: Option<usize>,
    page_size: Option<usize>,
}

async fn list_resources(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<ResourceListQuery>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let world = engine.city_world();

        let mut records = world.resource_records();
        if let Some(zone_id) = &query.zone_id {
            records.retain(|record| record.zone_id == *zone_id);
        }
        if let Some(owner) = &query.owner {
            records.retain(|record| record.owner.as_deref() == Some(owner.as_str()));
        }
        if let Some(status) = &query.status {
            let normalized = status.trim().to_lowercase();
            records.retain(|record| record.status.as_str() == normalized);
        }

        let (start, end, next_cursor) = paginate(records.len(), query.cursor, query.page_size)?;

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "resources.list".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "cursor": start,
                "next_cursor": next_cursor,
                "total": records.len(),
                "resources": records[start..end].to_vec(),
            }),
        }
    };

    Ok(Json(response))
}

async fn get_resource(
    Path((run_id, resource_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<QueryResponse>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let world = engine.city_world();

        let Some(record) = world.resource_record(&resource_id) else {
            return Err(HttpApiError::invalid_query(
                "resource_id not found",
                Some(format!("resource_id={resource_id}")),
            ));
        };

        let tax_history = world
            .tax_entries()
            .iter()
            .filter(|entry| entry.resource_id == resource_id)
            .cloned()
            .collect::<Vec<_>>();
        let ownership_history = world
            .ownership_history()
            .iter()
            .filter(|entry| entry.resource_id == resource_id)
            .cloned()
            .collect::<Vec<_>>();

        QueryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            query_type: "resource.detail".to_string(),
            run_id: run_id.clone(),
            generated_at_tick: engine.status().current_tick,
            data: json!({
                "resource": record,
                "tax_history": tax_history,
                "ownership_history": ownership_history,
            }),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct DeclareValuationRequest {
    owner: String,
    new_value_udai: i64,
    command_id: Option<String>,
}

async fn declare_valuation(
    Path((run_id, resource_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<DeclareValuationRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::DeclareValuation,
            CommandPayload::DeclareValuation {
                resource_id,
                owner: request.owner,
                new_value_udai: request.new_value_udai,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}

#[derive(Debug, Deserialize)]
struct BuyoutRequest {
    challenger: String,
    offered_value_udai: i64,
    expected_version: Option<u64>,
    command_id: Option<String>,
}

async fn attempt_buyout(
    Path((run_id, resource_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<BuyoutRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::AttemptBuyout,
            CommandPayload::AttemptBuyout {
                resource_id,
                challenger: request.challenger,
                offered_value_udai: request.offered_value_udai,
                expected_version: request.expected_version,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}

#[derive(Debug, Deserialize)]
struct ReleaseRequest {
    owner: String,
    command_id: Option<String>,
}

async fn request_release(
    Path((run_id, resource_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::RequestRelease,
            CommandPayload::RequestRelease {
                resource_id,
                owner: request.owner,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}

async fn cancel_release(
    Path((run_id, resource_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let (result, messages) = {
        let mut inner = state.inner.lock().await;
        apply_domain_command(
            &mut inner,
            &run_id,
            request.command_id,
            CommandType::CancelRelease,
            CommandPayload::CancelRelease {
                resource_id,
                owner: request.owner,
            },
        )?
    };

    broadcast_messages(&state, messages);

    into_command_response(result)
}
