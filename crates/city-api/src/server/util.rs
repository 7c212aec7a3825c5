fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET,POST,OPTIONS,PUT,PATCH,DELETE"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("3600"),
    );
}

fn default_sqlite_path() -> String {
    std::env::var("CITY_SQLITE_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string())
}

fn fallback_snapshot_window(
    engine: &EngineApi,
    around_tick: Option<u64>,
    from_tick: Option<u64>,
    to_tick: Option<u64>,
) -> Vec<Snapshot> {
    let current_tick = engine.status().current_tick;
    let snapshot = engine.snapshot_for_current_tick();
    if current_tick == 0 {
        if let Some(around) = around_tick {
            return if around >= snapshot.tick {
                vec![snapshot]
            } else {
                Vec::new()
            };
        }
        let from = from_tick.unwrap_or(0);
        let to = to_tick.unwrap_or(snapshot.tick);
        return if snapshot.tick >= from && snapshot.tick <= to {
            vec![snapshot]
        } else {
            Vec::new()
        };
    }

    if let Some(around) = around_tick {
        if around >= snapshot.tick {
            return vec![snapshot];
        }
        return Vec::new();
    }

    let from_tick = from_tick.unwrap_or(1);
    let to_tick = to_tick.unwrap_or(current_tick);

    if snapshot.tick >= from_tick && snapshot.tick <= to_tick {
        vec![snapshot]
    } else {
        Vec::new()
    }
}

fn paginate(
    total: usize,
    cursor: Option<usize>,
    page_size: Option<usize>,
) -> Result<(usize, usize, Option<usize>), HttpApiError> {
    let start = cursor.unwrap_or(0);
    if start > total {
        return Err(HttpApiError::invalid_query(
            "cursor is out of bounds",
            Some(format!("cursor={start} total={total}")),
        ));
    }

    let size = page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .max(1)
        .min(MAX_PAGE_SIZE);
    let end = start.saturating_add(size).min(total);
    let next_cursor = if end < total { Some(end) } else { None };

    Ok((start, end, next_cursor))
}

fn parse_event_type_filter(
    requested_types: &[String],
) -> Result<Option<HashSet<EventType>>, HttpApiError> {
    if requested_types.is_empty() {
        return Ok(None);
    }

    let mut filter = HashSet::new();

    for value in requested_types {
        let normalized = value.trim().to_lowercase();
        let event_type = match normalized.as_str() {
            "command_applied" | "commandapplied" => EventType::CommandApplied,
            "valuation_declared" | "valuationdeclared" => EventType::ValuationDeclared,
            "buyout_settled" | "buyoutsettled" => EventType::BuyoutSettled,
            "release_requested" | "releaserequested" => EventType::ReleaseRequested,
            "release_cancelled" | "releasecancelled" => EventType::ReleaseCancelled,
            "release_finalized" | "releasefinalized" => EventType::ReleaseFinalized,
            "forced_release" | "forcedrelease" => EventType::ForcedRelease,
            "tax_accrued" | "taxaccrued" => EventType::TaxAccrued,
            "tax_payment_missed" | "taxpaymentmissed" => EventType::TaxPaymentMissed,
            "depreciation_applied" | "depreciationapplied" => EventType::DepreciationApplied,
            "governance_credits_granted" | "governancecreditsgranted" => {
                EventType::GovernanceCreditsGranted
            }
            "proposal_submitted" | "proposalsubmitted" => EventType::ProposalSubmitted,
            "voting_opened" | "votingopened" => EventType::VotingOpened,
            "vote_cast" | "votecast" => EventType::VoteCast,
            "votes_retracted" | "votesretracted" => EventType::VotesRetracted,
            "proposal_resolved" | "proposalresolved" => EventType::ProposalResolved,
            "zone_tax_rate_changed" | "zonetaxratechanged" => EventType::ZoneTaxRateChanged,
            "depreciation_policy_changed" | "depreciationpolicychanged" => {
                EventType::DepreciationPolicyChanged
            }
            "attestation_issued" | "attestationissued" => EventType::AttestationIssued,
            "attestation_revoked" | "attestationrevoked" => EventType::AttestationRevoked,
            "money_transferred" | "moneytransferred" => EventType::MoneyTransferred,
            _ => {
                return Err(HttpApiError::invalid_query(
                    "invalid event type filter",
                    Some(format!("event_type={value}")),
                ))
            }
        };

        filter.insert(event_type);
    }

    Ok(Some(filter))
}

fn reconnect_token(tick: u64, sequence_in_tick: Option<u64>, label: &str) -> String {
    match sequence_in_tick {
        Some(sequence) => format!("{label}:{tick}:{sequence}"),
        None => format!("{label}:{tick}"),
    }
}
