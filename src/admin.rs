//! Operator reporting and maintenance over the whole ledger.

use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::balance::{BalanceReconciler, Reconciliation};
use crate::error_handling::types::{ServiceError, StorageError};
use crate::statistics::{GlobalStatsView, StatsAggregator, UserStatsView};
use crate::storage::types::{ClearReport, SessionTree, UserFootprint, SYSTEM_USER_ID};
use crate::storage::Storage;

/// A player's statistics with every session and its rounds.
#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    pub stats: UserStatsView,
    /// Newest session first, rounds in play order.
    pub sessions: Vec<SessionTree>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub user_id: i64,
    pub username: String,
    pub removed: UserFootprint,
}

pub struct AdminReporting {
    storage: Arc<dyn Storage>,
    stats: Arc<StatsAggregator>,
    balance: Arc<BalanceReconciler>,
}

fn user_not_found(user_id: i64) -> ServiceError {
    ServiceError::NotFound(format!("User {} not found", user_id))
}

impl AdminReporting {
    pub fn new(
        storage: Arc<dyn Storage>,
        stats: Arc<StatsAggregator>,
        balance: Arc<BalanceReconciler>,
    ) -> Self {
        Self {
            storage,
            stats,
            balance,
        }
    }

    pub fn global_stats(&self) -> Result<GlobalStatsView, ServiceError> {
        self.stats.global_stats()
    }

    pub fn all_users_data(&self) -> Result<Vec<UserStatsView>, ServiceError> {
        self.stats.all_users()
    }

    pub fn user_detail(&self, user_id: i64) -> Result<UserDetail, ServiceError> {
        if user_id == SYSTEM_USER_ID {
            return Err(user_not_found(user_id));
        }
        let stats = self.stats.user_stats(user_id)?;
        let sessions = self.storage.session_tree(user_id)?;
        Ok(UserDetail { stats, sessions })
    }

    /// Remove a player together with every session, round and risk sample they own.
    pub fn delete_user(&self, user_id: i64) -> Result<DeletionReport, ServiceError> {
        if user_id == SYSTEM_USER_ID {
            return Err(ServiceError::Validation(
                "The system account cannot be deleted".to_string(),
            ));
        }
        let user = self.storage.get_user(user_id).map_err(|e| match e {
            StorageError::NotFound => user_not_found(user_id),
            e => e.into(),
        })?;
        let removed = self.storage.delete_user(user_id).map_err(|e| match e {
            StorageError::NotFound => user_not_found(user_id),
            e => e.into(),
        })?;
        info!("Operator deleted user {} ({})", user.id, user.username);
        Ok(DeletionReport {
            user_id,
            username: user.username,
            removed,
        })
    }

    pub fn clear_all_data(&self) -> Result<ClearReport, ServiceError> {
        let report = self.storage.clear_all_data()?;
        info!("Operator cleared all player data");
        Ok(report)
    }

    pub fn reconcile_user(&self, user_id: i64) -> Result<Reconciliation, ServiceError> {
        if user_id == SYSTEM_USER_ID {
            return Err(user_not_found(user_id));
        }
        self.balance.reconcile(user_id)
    }
}
