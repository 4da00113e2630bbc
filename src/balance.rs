//! Player balances.
//!
//! By default the client is authoritative and overwrites the stored balance. In ledger
//! mode the balance only moves through recorded rounds and overwrites are refused.

use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::configuration::{BalanceMode, GameConfig};
use crate::error_handling::types::{ServiceError, StorageError};
use crate::storage::types::User;
use crate::storage::Storage;

/// Highest balance a client may store.
pub const MAX_BALANCE: i64 = 1_000_000_000_000;

/// Stored balance set against the balance replayed from round history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub user_id: i64,
    pub stored_balance: i64,
    pub ledger_balance: i64,
    /// `stored_balance - ledger_balance`; zero when nothing drifted.
    pub drift: i64,
}

pub struct BalanceReconciler {
    storage: Arc<dyn Storage>,
    mode: BalanceMode,
    starting_stake: i64,
}

fn user_not_found(err: StorageError, user_id: i64) -> ServiceError {
    match err {
        StorageError::NotFound => ServiceError::NotFound(format!("User {} not found", user_id)),
        e => e.into(),
    }
}

impl BalanceReconciler {
    pub fn new(storage: Arc<dyn Storage>, game: &GameConfig) -> Self {
        Self {
            storage,
            mode: game.balance_mode,
            starting_stake: game.starting_stake,
        }
    }

    pub fn mode(&self) -> BalanceMode {
        self.mode
    }

    pub fn starting_stake(&self) -> i64 {
        self.starting_stake
    }

    /// Net reward for a balance: what the player holds beyond the starting stake.
    pub fn net_reward(&self, balance: i64) -> i64 {
        balance.saturating_sub(self.starting_stake)
    }

    pub fn account(&self, user_id: i64) -> Result<User, ServiceError> {
        self.storage
            .get_user(user_id)
            .map_err(|e| user_not_found(e, user_id))
    }

    pub fn get_balance(&self, user_id: i64) -> Result<i64, ServiceError> {
        Ok(self.account(user_id)?.balance)
    }

    /// Overwrite the stored balance with the client's value.
    pub fn set_balance(&self, user_id: i64, balance: i64) -> Result<i64, ServiceError> {
        if self.mode == BalanceMode::Ledger {
            return Err(ServiceError::Validation(
                "Balance is derived from recorded rounds and cannot be set".to_string(),
            ));
        }
        if balance < 0 {
            return Err(ServiceError::Validation(
                "Balance cannot be negative".to_string(),
            ));
        }
        if balance > MAX_BALANCE {
            return Err(ServiceError::Validation(format!(
                "Balance cannot exceed {}",
                MAX_BALANCE
            )));
        }
        let stored = self
            .storage
            .set_balance(user_id, balance)
            .map_err(|e| user_not_found(e, user_id))?;
        info!("Balance of user {} set to {}", user_id, stored);
        Ok(stored)
    }

    pub fn reconcile(&self, user_id: i64) -> Result<Reconciliation, ServiceError> {
        let stored_balance = self.get_balance(user_id)?;
        let ledger_balance = self
            .starting_stake
            .saturating_add(self.storage.round_ledger_sum(user_id)?);
        Ok(Reconciliation {
            user_id,
            stored_balance,
            ledger_balance,
            drift: stored_balance.saturating_sub(ledger_balance),
        })
    }
}
