//! Storage Trait
//!
//! This module defines the `Storage` trait, the seam between the game services and the
//! relational ledger.
//!
//! Implementors of this trait are responsible for:
//! - Persisting accounts and balances
//! - Appending sessions, rounds and risk estimation samples
//! - Aggregating raw rows into per-user and global counters
//! - Cascading deletes
//!
//! Multi-row mutations (`record_round`, `delete_user`, `clear_all_data`) must be all-or-nothing.

use crate::error_handling::types::StorageError;
use crate::storage::types::{
    ClearReport, GameRound, GameSession, GlobalTotals, NewRiskEstimation, RiskEstimation,
    RoundOutcome, SessionTree, User, UserAggregate, UserCredentials, UserFootprint,
};
use chrono::{DateTime, Utc};

pub trait Storage: Send + Sync {
    /// Creates an account. Fails with `Conflict` when the username is taken.
    fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        initial_balance: i64,
    ) -> Result<User, StorageError>;

    /// Inserts or refreshes the reserved system account.
    fn ensure_system_user(&self, username: &str, password_hash: &str) -> Result<(), StorageError>;

    fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, StorageError>;

    fn get_user(&self, user_id: i64) -> Result<User, StorageError>;

    fn touch_last_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Overwrites the balance in a single statement and returns the stored value.
    fn set_balance(&self, user_id: i64, balance: i64) -> Result<i64, StorageError>;

    /// Creates the session unless `session_key` already exists for `user_id`.
    ///
    /// Returns the stored session and whether it was created by this call. A key owned by
    /// another user is a `Conflict`.
    fn start_session(
        &self,
        user_id: i64,
        session_key: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(GameSession, bool), StorageError>;

    fn end_session(
        &self,
        user_id: i64,
        session_key: &str,
        end_time: DateTime<Utc>,
    ) -> Result<GameSession, StorageError>;

    fn get_session(&self, user_id: i64, session_key: &str) -> Result<GameSession, StorageError>;

    /// Appends a round and bumps the parent session's totals in one transaction.
    ///
    /// When `apply_to_balance` is set the round's balance delta is added to the user's balance
    /// in the same transaction. Fails with `NotFound` when the session does not belong to the
    /// user.
    fn record_round(
        &self,
        user_id: i64,
        session_key: &str,
        outcome: &RoundOutcome,
        apply_to_balance: bool,
    ) -> Result<GameRound, StorageError>;

    fn save_risk_estimation(
        &self,
        user_id: i64,
        sample: &NewRiskEstimation,
    ) -> Result<RiskEstimation, StorageError>;

    fn user_aggregate(&self, user_id: i64) -> Result<UserAggregate, StorageError>;

    /// Aggregates for every non-system user, newest account first.
    fn all_user_aggregates(&self) -> Result<Vec<UserAggregate>, StorageError>;

    fn global_totals(&self) -> Result<GlobalTotals, StorageError>;

    /// Sum of `round_bonus - penalty_amount` over every round of the user.
    fn round_ledger_sum(&self, user_id: i64) -> Result<i64, StorageError>;

    /// Most recent sessions first.
    fn recent_sessions(&self, user_id: i64, limit: u64) -> Result<Vec<GameSession>, StorageError>;

    /// Sessions newest first, each with its rounds in play order.
    fn session_tree(&self, user_id: i64) -> Result<Vec<SessionTree>, StorageError>;

    fn user_footprint(&self, user_id: i64) -> Result<UserFootprint, StorageError>;

    /// Removes the user and every dependent row. Fails with `NotFound` for unknown ids.
    fn delete_user(&self, user_id: i64) -> Result<UserFootprint, StorageError>;

    /// Removes every row not owned by the system account.
    fn clear_all_data(&self) -> Result<ClearReport, StorageError>;
}
