//! Identity registry: pseudonymous addresses, append-only attestations,
//! and the governance credit balances that back quadratic voting.

use std::collections::BTreeMap;

use contracts::{AttestationRecord, IdentityRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    NotFound(String),
    DuplicateIdentity(String),
    DuplicateAttestation(String),
    AttestationNotFound {
        address: String,
        attestation_id: String,
    },
    /// Revocation is restricted to the attestation's issuer.
    NotIssuer {
        attestation_id: String,
        issuer: String,
    },
    AlreadyRevoked(String),
    InsufficientCredits {
        address: String,
        required_udai: i64,
        available_udai: i64,
    },
    InvalidAmount(i64),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(address) => write!(f, "identity not found: {address}"),
            Self::DuplicateIdentity(address) => write!(f, "identity already exists: {address}"),
            Self::DuplicateAttestation(attestation_id) => {
                write!(f, "attestation already exists: {attestation_id}")
            }
            Self::AttestationNotFound {
                address,
                attestation_id,
            } => write!(f, "attestation {attestation_id} not found on {address}"),
            Self::NotIssuer {
                attestation_id,
                issuer,
            } => write!(f, "attestation {attestation_id} can only be revoked by {issuer}"),
            Self::AlreadyRevoked(attestation_id) => {
                write!(f, "attestation already revoked: {attestation_id}")
            }
            Self::InsufficientCredits {
                address,
                required_udai,
                available_udai,
            } => write!(
                f,
                "{address} has {available_udai} governance credits, {required_udai} required"
            ),
            Self::InvalidAmount(amount) => write!(f, "invalid credit amount: {amount}"),
        }
    }
}

impl std::error::Error for IdentityError {}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: BTreeMap<String, IdentityRecord>,
    /// Sum of all outstanding governance credits, for quorum thresholds.
    total_credit_supply_udai: i64,
}

impl IdentityRegistry {
    pub fn register(
        &mut self,
        address: &str,
        display_name: &str,
        roles: Vec<String>,
        tick: u64,
    ) -> Result<(), IdentityError> {
        if self.identities.contains_key(address) {
            return Err(IdentityError::DuplicateIdentity(address.to_string()));
        }
        self.identities.insert(
            address.to_string(),
            IdentityRecord {
                address: address.to_string(),
                display_name: display_name.to_string(),
                joined_tick: tick,
                roles,
                attestations: Vec::new(),
                governance_credits_udai: 0,
            },
        );
        Ok(())
    }

    pub fn get(&self, address: &str) -> Result<&IdentityRecord, IdentityError> {
        self.identities
            .get(address)
            .ok_or_else(|| IdentityError::NotFound(address.to_string()))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.identities.contains_key(address)
    }

    pub fn identities(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.identities.values()
    }

    pub fn total_credit_supply_udai(&self) -> i64 {
        self.total_credit_supply_udai
    }

    pub fn credits(&self, address: &str) -> Result<i64, IdentityError> {
        Ok(self.get(address)?.governance_credits_udai)
    }

    /// Grants credits earned by paying tax, one credit per microunit paid.
    pub fn grant_credits(&mut self, address: &str, amount_udai: i64) -> Result<(), IdentityError> {
        if amount_udai < 0 {
            return Err(IdentityError::InvalidAmount(amount_udai));
        }
        let identity = self
            .identities
            .get_mut(address)
            .ok_or_else(|| IdentityError::NotFound(address.to_string()))?;
        identity.governance_credits_udai += amount_udai;
        self.total_credit_supply_udai += amount_udai;
        Ok(())
    }

    /// Burns credits spent on votes. Refunds on retraction go back through
    /// [`grant_credits`].
    pub fn spend_credits(&mut self, address: &str, amount_udai: i64) -> Result<(), IdentityError> {
        if amount_udai < 0 {
            return Err(IdentityError::InvalidAmount(amount_udai));
        }
        let identity = self
            .identities
            .get_mut(address)
            .ok_or_else(|| IdentityError::NotFound(address.to_string()))?;
        if identity.governance_credits_udai < amount_udai {
            return Err(IdentityError::InsufficientCredits {
                address: address.to_string(),
                required_udai: amount_udai,
                available_udai: identity.governance_credits_udai,
            });
        }
        identity.governance_credits_udai -= amount_udai;
        self.total_credit_supply_udai -= amount_udai;
        Ok(())
    }

    /// Appends an attestation to the subject's record. Attestations are never
    /// removed, only marked revoked.
    pub fn issue_attestation(
        &mut self,
        subject: &str,
        attestation_id: &str,
        issuer: &str,
        claim: &str,
        tick: u64,
    ) -> Result<(), IdentityError> {
        if !self.identities.contains_key(issuer) {
            return Err(IdentityError::NotFound(issuer.to_string()));
        }
        let duplicate = self
            .identities
            .values()
            .flat_map(|identity| identity.attestations.iter())
            .any(|a| a.attestation_id == attestation_id);
        if duplicate {
            return Err(IdentityError::DuplicateAttestation(
                attestation_id.to_string(),
            ));
        }
        let identity = self
            .identities
            .get_mut(subject)
            .ok_or_else(|| IdentityError::NotFound(subject.to_string()))?;
        identity.attestations.push(AttestationRecord {
            attestation_id: attestation_id.to_string(),
            issuer: issuer.to_string(),
            claim: claim.to_string(),
            issued_tick: tick,
            revoked_tick: None,
        });
        Ok(())
    }

    pub fn revoke_attestation(
        &mut self,
        subject: &str,
        attestation_id: &str,
        revoker: &str,
        tick: u64,
    ) -> Result<(), IdentityError> {
        let identity = self
            .identities
            .get_mut(subject)
            .ok_or_else(|| IdentityError::NotFound(subject.to_string()))?;
        let attestation = identity
            .attestations
            .iter_mut()
            .find(|a| a.attestation_id == attestation_id)
            .ok_or_else(|| IdentityError::AttestationNotFound {
                address: subject.to_string(),
                attestation_id: attestation_id.to_string(),
            })?;
        if attestation.issuer != revoker {
            return Err(IdentityError::NotIssuer {
                attestation_id: attestation_id.to_string(),
                issuer: attestation.issuer.clone(),
            });
        }
        if attestation.revoked_tick.is_some() {
            return Err(IdentityError::AlreadyRevoked(attestation_id.to_string()));
        }
        attestation.revoked_tick = Some(tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(addresses: &[&str]) -> IdentityRegistry {
        let mut registry = IdentityRegistry::default();
        for address in addresses {
            registry
                .register(address, address.trim_start_matches("id:"), Vec::new(), 0)
                .expect("register");
        }
        registry
    }

    #[test]
    fn credits_track_supply() {
        let mut registry = registry_with(&["id:alice", "id:bob"]);
        registry.grant_credits("id:alice", 100).expect("grant");
        registry.grant_credits("id:bob", 50).expect("grant");
        assert_eq!(registry.total_credit_supply_udai(), 150);

        registry.spend_credits("id:alice", 25).expect("spend");
        assert_eq!(registry.credits("id:alice").unwrap(), 75);
        assert_eq!(registry.total_credit_supply_udai(), 125);
    }

    #[test]
    fn overspend_is_rejected_without_mutation() {
        let mut registry = registry_with(&["id:alice"]);
        registry.grant_credits("id:alice", 10).expect("grant");
        let err = registry.spend_credits("id:alice", 11).expect_err("overspend");
        assert!(matches!(err, IdentityError::InsufficientCredits { .. }));
        assert_eq!(registry.credits("id:alice").unwrap(), 10);
        assert_eq!(registry.total_credit_supply_udai(), 10);
    }

    #[test]
    fn attestations_append_and_only_issuer_revokes() {
        let mut registry = registry_with(&["id:alice", "id:bob", "id:carol"]);
        registry
            .issue_attestation("id:alice", "att:1", "id:bob", "resident", 5)
            .expect("issue");

        let err = registry
            .revoke_attestation("id:alice", "att:1", "id:carol", 6)
            .expect_err("wrong revoker");
        assert!(matches!(err, IdentityError::NotIssuer { .. }));

        registry
            .revoke_attestation("id:alice", "att:1", "id:bob", 6)
            .expect("issuer revokes");
        let record = registry.get("id:alice").unwrap();
        assert_eq!(record.attestations.len(), 1);
        assert_eq!(record.attestations[0].revoked_tick, Some(6));

        let err = registry
            .revoke_attestation("id:alice", "att:1", "id:bob", 7)
            .expect_err("double revoke");
        assert!(matches!(err, IdentityError::AlreadyRevoked(_)));
    }

    #[test]
    fn duplicate_attestation_ids_are_rejected() {
        let mut registry = registry_with(&["id:alice", "id:bob"]);
        registry
            .issue_attestation("id:alice", "att:1", "id:bob", "resident", 0)
            .expect("issue");
        let err = registry
            .issue_attestation("id:bob", "att:1", "id:alice", "resident", 1)
            .expect_err("duplicate id");
        assert!(matches!(err, IdentityError::DuplicateAttestation(_)));
    }

    #[test]
    fn unknown_issuer_cannot_attest() {
        let mut registry = registry_with(&["id:alice"]);
        let err = registry
            .issue_attestation("id:alice", "att:1", "id:ghost", "resident", 0)
            .expect_err("unknown issuer");
        assert!(matches!(err, IdentityError::NotFound(_)));
    }
}
