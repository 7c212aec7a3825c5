use super::*;

impl CityWorld {
    pub(super) fn push_event(
        &mut self,
        tick: u64,
        event_type: EventType,
        zone_id: Option<String>,
        actors: Vec<ActorRef>,
        caused_by: Vec<String>,
        details: Option<Value>,
    ) -> String {
        self.sequence_in_tick = self.sequence_in_tick.saturating_add(1);
        let event_id = format!("evt_{tick:06}_{:04}", self.sequence_in_tick);
        self.event_log.push(Event {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.status.run_id.clone(),
            tick,
            created_at: synthetic_timestamp(tick, self.sequence_in_tick),
            event_id: event_id.clone(),
            sequence_in_tick: self.sequence_in_tick,
            event_type,
            zone_id,
            actors,
            caused_by,
            tags: Vec::new(),
            details,
        });
        event_id
    }

    /// Surfaces money ledger transfers recorded since the last emission as
    /// events, preserving ledger order.
    pub(super) fn emit_new_money_transfer_events(&mut self, tick: u64) {
        let pending = self.money.transfers()[self.emitted_transfer_count..].to_vec();
        self.emitted_transfer_count = self.money.transfers().len();
        for transfer in pending {
            self.push_event(
                tick,
                EventType::MoneyTransferred,
                None,
                Vec::new(),
                Vec::new(),
                Some(json!({
                    "transfer_id": transfer.transfer_id,
                    "from": transfer.from_account,
                    "to": transfer.to_account,
                    "amount_udai": transfer.amount_udai,
                    "cause": transfer.cause,
                })),
            );
        }
    }
}
