use super::*;

use contracts::{
    AccountBalance, IdentityRecord, MoneyTransfer, OwnershipRecord, ProposalRecord,
    ResourceRecord, TaxLedgerEntry, VoteRecord,
};

use crate::tax::daily_tax_udai;

impl CityWorld {
    fn daily_tax_for(&self, resource: &ResourceState) -> i64 {
        let rate_bps = self
            .zones
            .get(&resource.zone_id)
            .map(|zone| zone.tax_rate_bps)
            .unwrap_or(0);
        if resource.owner.is_some() {
            daily_tax_udai(resource.declared_value_udai, rate_bps)
        } else {
            0
        }
    }

    pub fn resource_records(&self) -> Vec<ResourceRecord> {
        self.ledger
            .resources()
            .map(|resource| resource.to_record(self.daily_tax_for(resource)))
            .collect()
    }

    pub fn resource_record(&self, resource_id: &str) -> Option<ResourceRecord> {
        self.ledger
            .get(resource_id)
            .ok()
            .map(|resource| resource.to_record(self.daily_tax_for(resource)))
    }

    pub fn zone_records(&self) -> Vec<ZoneRecord> {
        self.zones.values().cloned().collect()
    }

    pub fn zone_record(&self, zone_id: &str) -> Option<ZoneRecord> {
        self.zones.get(zone_id).cloned()
    }

    pub fn proposal_records(&self) -> Vec<ProposalRecord> {
        self.proposals.proposals().cloned().collect()
    }

    pub fn proposal_record(&self, proposal_id: &str) -> Option<ProposalRecord> {
        self.proposals.get(proposal_id).ok().cloned()
    }

    pub fn vote_records(&self, proposal_id: &str) -> Vec<VoteRecord> {
        self.votes.records_for(proposal_id)
    }

    pub fn identity_records(&self) -> Vec<IdentityRecord> {
        self.identities.identities().cloned().collect()
    }

    pub fn identity_record(&self, address: &str) -> Option<IdentityRecord> {
        self.identities.get(address).ok().cloned()
    }

    pub fn account_balances(&self) -> Vec<AccountBalance> {
        self.money.account_records()
    }

    pub fn money_transfers(&self) -> &[MoneyTransfer] {
        self.money.transfers()
    }

    pub fn tax_entries(&self) -> &[TaxLedgerEntry] {
        self.ledger.tax_entries()
    }

    pub fn ownership_history(&self) -> &[OwnershipRecord] {
        self.ledger.ownership_history()
    }

    pub fn total_credit_supply_udai(&self) -> i64 {
        self.identities.total_credit_supply_udai()
    }

    pub fn snapshot(&self) -> Snapshot {
        let tick = self.status.current_tick;
        Snapshot {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.status.run_id.clone(),
            tick,
            created_at: synthetic_timestamp(tick, 0),
            snapshot_id: format!("snap_{tick:06}"),
            world_state_hash: format!("{:016x}", self.state_hash),
            zones: json!(self.zone_records()),
            resources: json!(self.resource_records()),
            proposals: json!(self.proposal_records()),
            identities: json!(self.identity_records()),
            accounts: json!(self.account_balances()),
        }
    }
}
