//! Valuation ledger: per-resource self-assessed value, current owner, and the
//! append-only ownership and tax histories behind it.

use std::collections::BTreeMap;

use contracts::{
    OwnershipRecord, ReleaseCause, ResourceKind, ResourceRecord, ResourceStatus, TaxLedgerEntry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    ResourceNotFound(String),
    NotOwner { resource_id: String, caller: String },
    InvalidValuation(i64),
    AlreadyOwned(String),
    NotOwned(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            Self::NotOwner {
                resource_id,
                caller,
            } => write!(f, "{caller} does not own {resource_id}"),
            Self::InvalidValuation(value) => write!(f, "invalid valuation: {value}"),
            Self::AlreadyOwned(id) => write!(f, "resource already owned: {id}"),
            Self::NotOwned(id) => write!(f, "resource has no owner: {id}"),
        }
    }
}

impl std::error::Error for LedgerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRelease {
    pub requested_tick: u64,
    pub notice_ends_tick: u64,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource_id: String,
    pub zone_id: String,
    pub kind: ResourceKind,
    pub declared_value_udai: i64,
    pub owner: Option<String>,
    pub acquired_tick: Option<u64>,
    pub min_holding_ticks: u64,
    pub release_notice_ticks: u64,
    pub pending_release: Option<PendingRelease>,
    pub depreciating: bool,
    pub depreciation_daily_bps: u32,
    pub arrears_days: u64,
    pub last_accrued_day: Option<u64>,
    pub version: u64,
}

impl ResourceState {
    pub fn status(&self) -> ResourceStatus {
        if self.owner.is_none() {
            ResourceStatus::Unclaimed
        } else if self.pending_release.is_some() {
            ResourceStatus::ReleasePending
        } else {
            ResourceStatus::Owned
        }
    }

    pub fn within_holding_period(&self, tick: u64) -> bool {
        match self.acquired_tick {
            Some(acquired) => tick.saturating_sub(acquired) < self.min_holding_ticks,
            None => false,
        }
    }

    pub fn to_record(&self, daily_tax_udai: i64) -> ResourceRecord {
        ResourceRecord {
            resource_id: self.resource_id.clone(),
            zone_id: self.zone_id.clone(),
            kind: self.kind,
            status: self.status(),
            declared_value_udai: self.declared_value_udai,
            owner: self.owner.clone(),
            acquired_tick: self.acquired_tick,
            min_holding_ticks: self.min_holding_ticks,
            release_notice_ticks: self.release_notice_ticks,
            notice_ends_tick: self.pending_release.map(|pending| pending.notice_ends_tick),
            depreciating: self.depreciating,
            depreciation_daily_bps: self.depreciation_daily_bps,
            arrears_days: self.arrears_days,
            daily_tax_udai,
            version: self.version,
        }
    }

    /// One day of decay for an unclaimed depreciating resource. Returns the
    /// applied delta, zero when nothing changed. Value never goes negative.
    pub fn depreciate_day(&mut self) -> i64 {
        if self.owner.is_some() || !self.depreciating || self.declared_value_udai == 0 {
            return 0;
        }
        let decay = i64::try_from(
            i128::from(self.declared_value_udai) * i128::from(self.depreciation_daily_bps)
                / i128::from(contracts::MAX_RATE_BPS),
        )
        .unwrap_or(0)
        .max(1)
        .min(self.declared_value_udai);
        self.declared_value_udai -= decay;
        self.version += 1;
        decay
    }
}

#[derive(Debug, Default)]
pub struct ValuationLedger {
    resources: BTreeMap<String, ResourceState>,
    ownership_history: Vec<OwnershipRecord>,
    tax_entries: Vec<TaxLedgerEntry>,
    running_total_by_resource: BTreeMap<String, i64>,
}

impl ValuationLedger {
    pub fn insert_resource(&mut self, resource: ResourceState) {
        self.resources.insert(resource.resource_id.clone(), resource);
    }

    pub fn get(&self, resource_id: &str) -> Result<&ResourceState, LedgerError> {
        self.resources
            .get(resource_id)
            .ok_or_else(|| LedgerError::ResourceNotFound(resource_id.to_string()))
    }

    pub fn get_mut(&mut self, resource_id: &str) -> Result<&mut ResourceState, LedgerError> {
        self.resources
            .get_mut(resource_id)
            .ok_or_else(|| LedgerError::ResourceNotFound(resource_id.to_string()))
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.resources.values()
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut ResourceState> {
        self.resources.values_mut()
    }

    pub fn resource_ids(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    /// Owner-declared revaluation. Tax accrues against the new value from the
    /// next accrual day onward.
    pub fn declare_valuation(
        &mut self,
        resource_id: &str,
        owner: &str,
        new_value_udai: i64,
    ) -> Result<u64, LedgerError> {
        if new_value_udai < 0 {
            return Err(LedgerError::InvalidValuation(new_value_udai));
        }
        let resource = self.get_mut(resource_id)?;
        if resource.owner.as_deref() != Some(owner) {
            return Err(LedgerError::NotOwner {
                resource_id: resource_id.to_string(),
                caller: owner.to_string(),
            });
        }
        resource.declared_value_udai = new_value_udai;
        resource.version += 1;
        Ok(resource.version)
    }

    /// Opens a new ownership record. The resource must currently be unowned;
    /// the caller is responsible for closing any previous record first.
    pub fn open_ownership(
        &mut self,
        resource_id: &str,
        owner: &str,
        acquisition_value_udai: i64,
        tick: u64,
    ) -> Result<u64, LedgerError> {
        let resource = self.get_mut(resource_id)?;
        if resource.owner.is_some() {
            return Err(LedgerError::AlreadyOwned(resource_id.to_string()));
        }
        resource.owner = Some(owner.to_string());
        resource.acquired_tick = Some(tick);
        resource.declared_value_udai = acquisition_value_udai;
        resource.pending_release = None;
        resource.arrears_days = 0;
        // Accrual clock restarts with the new owner.
        resource.last_accrued_day = Some(tick / contracts::TICKS_PER_DAY);
        resource.version += 1;
        let version = resource.version;

        self.running_total_by_resource
            .insert(resource_id.to_string(), 0);
        self.ownership_history.push(OwnershipRecord {
            resource_id: resource_id.to_string(),
            owner: owner.to_string(),
            acquisition_value_udai,
            acquired_tick: tick,
            released_tick: None,
            release_cause: None,
        });
        Ok(version)
    }

    /// Closes the open ownership record and clears the owner.
    pub fn close_ownership(
        &mut self,
        resource_id: &str,
        tick: u64,
        cause: ReleaseCause,
    ) -> Result<String, LedgerError> {
        let resource = self.get_mut(resource_id)?;
        let owner = resource
            .owner
            .take()
            .ok_or_else(|| LedgerError::NotOwned(resource_id.to_string()))?;
        resource.acquired_tick = None;
        resource.pending_release = None;
        resource.arrears_days = 0;
        resource.version += 1;

        let open_record = self
            .ownership_history
            .iter_mut()
            .rev()
            .find(|record| record.resource_id == resource_id && record.released_tick.is_none());
        if let Some(record) = open_record {
            record.released_tick = Some(tick);
            record.release_cause = Some(cause);
        }
        Ok(owner)
    }

    pub fn append_tax_entry(
        &mut self,
        resource_id: &str,
        owner: &str,
        day: u64,
        tick: u64,
        amount_udai: i64,
        paid: bool,
    ) -> TaxLedgerEntry {
        let running = self
            .running_total_by_resource
            .entry(resource_id.to_string())
            .or_insert(0);
        if paid {
            *running += amount_udai;
        }
        let entry = TaxLedgerEntry {
            resource_id: resource_id.to_string(),
            owner: owner.to_string(),
            day,
            tick,
            amount_udai,
            running_total_udai: *running,
            paid,
        };
        self.tax_entries.push(entry.clone());
        entry
    }

    pub fn ownership_history(&self) -> &[OwnershipRecord] {
        &self.ownership_history
    }

    pub fn tax_entries(&self) -> &[TaxLedgerEntry] {
        &self.tax_entries
    }

    /// Count of ownership records for this resource with no release tick.
    /// Invariant: always zero or one.
    pub fn open_record_count(&self, resource_id: &str) -> usize {
        self.ownership_history
            .iter()
            .filter(|record| record.resource_id == resource_id && record.released_tick.is_none())
            .count()
    }
}
