use std::collections::BTreeMap;

use contracts::{AccountBalance, MoneyTransfer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    UnknownAccount(String),
    InsufficientBalance(String),
    InvalidAmount(i64),
    ConservationViolation,
}

impl std::fmt::Display for EconomyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAccount(id) => write!(f, "unknown account: {id}"),
            Self::InsufficientBalance(id) => write!(f, "insufficient balance: {id}"),
            Self::InvalidAmount(amount) => write!(f, "invalid amount: {amount}"),
            Self::ConservationViolation => write!(f, "money conservation violated"),
        }
    }
}

impl std::error::Error for EconomyError {}

/// Money accounts with an append-only transfer log. Every unit entering or
/// leaving the closed system goes through an explicit source or sink so
/// conservation stays checkable.
#[derive(Debug, Clone, Default)]
pub struct MoneyLedger {
    accounts: BTreeMap<String, i64>,
    transfers: Vec<MoneyTransfer>,
    minted_udai: i64,
    burned_udai: i64,
}

impl MoneyLedger {
    pub fn open_account(&mut self, account_id: &str, starting_balance: i64) {
        self.accounts
            .entry(account_id.to_string())
            .or_insert(starting_balance.max(0));
        self.minted_udai += starting_balance.max(0);
    }

    pub fn balance(&self, account_id: &str) -> Option<i64> {
        self.accounts.get(account_id).copied()
    }

    pub fn has_account(&self, account_id: &str) -> bool {
        self.accounts.contains_key(account_id)
    }

    pub fn transfer(
        &mut self,
        from: &str,
        to: &str,
        amount: i64,
        cause: &str,
        tick: u64,
    ) -> Result<String, EconomyError> {
        if amount <= 0 {
            return Err(EconomyError::InvalidAmount(amount));
        }

        let from_balance = self
            .accounts
            .get(from)
            .copied()
            .ok_or_else(|| EconomyError::UnknownAccount(from.to_string()))?;
        if !self.accounts.contains_key(to) {
            return Err(EconomyError::UnknownAccount(to.to_string()));
        }
        if from_balance < amount {
            return Err(EconomyError::InsufficientBalance(from.to_string()));
        }

        *self.accounts.entry(from.to_string()).or_default() -= amount;
        *self.accounts.entry(to.to_string()).or_default() += amount;

        if !self.verify_conservation() {
            // Undo before surfacing; the ledger must never expose a torn state.
            *self.accounts.entry(from.to_string()).or_default() += amount;
            *self.accounts.entry(to.to_string()).or_default() -= amount;
            return Err(EconomyError::ConservationViolation);
        }

        let transfer_id = format!("xfer:{tick}:{}", self.transfers.len() + 1);
        self.transfers.push(MoneyTransfer {
            transfer_id: transfer_id.clone(),
            tick,
            from_account: from.to_string(),
            to_account: to.to_string(),
            amount_udai: amount,
            cause: cause.to_string(),
        });

        Ok(transfer_id)
    }

    pub fn verify_conservation(&self) -> bool {
        let total = self.accounts.values().sum::<i64>();
        total == self.minted_udai - self.burned_udai
    }

    pub fn transfers(&self) -> &[MoneyTransfer] {
        &self.transfers
    }

    pub fn account_records(&self) -> Vec<AccountBalance> {
        self.accounts
            .iter()
            .map(|(account_id, balance)| AccountBalance {
                account_id: account_id.clone(),
                money_udai: *balance,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(a: i64, b: i64) -> MoneyLedger {
        let mut ledger = MoneyLedger::default();
        ledger.open_account("a", a);
        ledger.open_account("b", b);
        ledger
    }

    #[test]
    fn transfer_preserves_totals() {
        let mut ledger = ledger_with(10, 0);
        ledger.transfer("a", "b", 5, "test", 1).expect("transfer succeeds");

        let total = ledger
            .account_records()
            .iter()
            .map(|acc| acc.money_udai)
            .sum::<i64>();
        assert_eq!(total, 10);
        assert!(ledger.verify_conservation());
    }

    #[test]
    fn rejects_insufficient_balance() {
        let mut ledger = ledger_with(2, 0);
        let err = ledger
            .transfer("a", "b", 5, "test", 1)
            .expect_err("should fail");
        assert!(matches!(err, EconomyError::InsufficientBalance(_)));
        assert_eq!(ledger.balance("a"), Some(2));
    }

    #[test]
    fn rejects_zero_and_negative_amounts() {
        let mut ledger = ledger_with(10, 0);
        assert!(matches!(
            ledger.transfer("a", "b", 0, "test", 1),
            Err(EconomyError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger.transfer("a", "b", -3, "test", 1),
            Err(EconomyError::InvalidAmount(-3))
        ));
    }

    #[test]
    fn unknown_accounts_are_reported() {
        let mut ledger = ledger_with(10, 0);
        assert!(matches!(
            ledger.transfer("a", "ghost", 1, "test", 1),
            Err(EconomyError::UnknownAccount(_))
        ));
    }
}
