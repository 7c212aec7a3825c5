use super::*;

const CITIZEN_NAMES: [&str; 16] = [
    "Ada", "Brin", "Cato", "Dela", "Eiko", "Faro", "Gwen", "Hale", "Ines", "Joss", "Kira", "Lior",
    "Mara", "Nilo", "Orin", "Pia",
];

fn zone_template(zone_id: &str, tax_rate_bps: u32, allowed_kinds: Vec<ResourceKind>) -> ZoneRecord {
    ZoneRecord {
        zone_id: zone_id.to_string(),
        tax_rate_bps,
        allowed_kinds,
        eligibility_rules: Vec::new(),
        society_id: None,
    }
}

impl CityWorld {
    pub fn new(config: RunConfig) -> Self {
        let status = RunStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: config.run_id.clone(),
            current_tick: 0,
            max_ticks: config.max_ticks(),
            mode: RunMode::Paused,
            queue_depth: 0,
        };

        let mut zones = BTreeMap::new();
        for zone in [
            zone_template(
                "zone:inner_ring",
                1_200,
                vec![ResourceKind::Housing, ResourceKind::Workspace],
            ),
            zone_template(
                "zone:market_row",
                1_000,
                vec![ResourceKind::Workspace, ResourceKind::Vehicle],
            ),
            zone_template(
                "zone:garden_fringe",
                700,
                vec![ResourceKind::Housing, ResourceKind::Vehicle],
            ),
        ] {
            zones.insert(zone.zone_id.clone(), zone);
        }

        let mut money = MoneyLedger::default();
        money.open_account(TREASURY_ACCOUNT, 0);

        let mut identities = IdentityRegistry::default();
        let citizen_count = config.citizen_count.max(1) as usize;
        let mut citizen_ids = Vec::with_capacity(citizen_count);
        for idx in 0..citizen_count {
            let citizen_id = format!("id:citizen_{idx:03}");
            let name_seed = mix_seed(config.seed, idx as u64 + 1);
            let display_name = format!(
                "{} {}",
                CITIZEN_NAMES[(mix_seed(name_seed, 7) % CITIZEN_NAMES.len() as u64) as usize],
                CITIZEN_NAMES[(mix_seed(name_seed, 8) % CITIZEN_NAMES.len() as u64) as usize],
            );
            // register only fails on duplicates; ids are unique by construction
            let _ = identities.register(&citizen_id, &display_name, Vec::new(), 0);
            money.open_account(&citizen_id, config.starting_balance_udai);
            citizen_ids.push(citizen_id);
        }

        let min_holding_ticks = config.default_min_holding_days * TICKS_PER_DAY;
        let release_notice_ticks = config.default_release_notice_days * TICKS_PER_DAY;
        let mut ledger = ValuationLedger::default();
        let mut resource_index = 0_u64;
        for zone in zones.values() {
            for slot in 0..4_u64 {
                resource_index += 1;
                let resource_seed = mix_seed(config.seed, 1_000 + resource_index);
                let kind = zone.allowed_kinds
                    [(mix_seed(resource_seed, 1) % zone.allowed_kinds.len() as u64) as usize];
                let resource_id =
                    format!("res:{}:{}{:02}", kind.as_str(), &zone.zone_id[5..6], slot + 1);
                ledger.insert_resource(ResourceState {
                    resource_id,
                    zone_id: zone.zone_id.clone(),
                    kind,
                    declared_value_udai: 0,
                    owner: None,
                    acquired_tick: None,
                    min_holding_ticks,
                    release_notice_ticks,
                    pending_release: None,
                    depreciating: false,
                    depreciation_daily_bps: 0,
                    arrears_days: 0,
                    last_accrued_day: None,
                    version: 0,
                });
            }
        }

        // Roughly half the stock starts owned, round-robin across citizens,
        // with seeded acquisition values.
        let resource_ids = ledger.resource_ids();
        for (idx, resource_id) in resource_ids.iter().enumerate() {
            if idx % 2 != 0 {
                continue;
            }
            let owner = &citizen_ids[idx % citizen_ids.len()];
            let value_seed = mix_seed(config.seed, 2_000 + idx as u64);
            let value_udai = sample_range_i64(value_seed, 3, 50, 500) * MICRO_PER_DAI;
            let _ = ledger.open_ownership(resource_id, owner, value_udai, 0);
        }

        let tax = TaxAccrual::new(config.grace_period_days, config.accrual_worker_threads);
        let settlement = SettlementEngine::new(
            config.min_claim_increment_udai,
            config.release_revoke_window_ticks,
        );

        Self {
            config,
            status,
            queued_commands: Vec::new(),
            next_command_sequence: 0,
            event_log: Vec::new(),
            sequence_in_tick: 0,
            state_hash: 0,
            zones,
            ledger,
            money,
            tax,
            settlement,
            votes: QuadraticVoteLedger::default(),
            proposals: ProposalBook::default(),
            identities,
            emitted_transfer_count: 0,
            last_step_metrics: StepMetrics::default(),
        }
    }
}
