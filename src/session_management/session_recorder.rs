use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::configuration::BalanceMode;
use crate::error_handling::types::{ServiceError, StorageError};
use crate::session_management::types::{RiskReport, RoundReport};
use crate::storage::types::{GameRound, GameSession, RiskEstimation};
use crate::storage::Storage;

/// Number of sessions returned by [`SessionRecorder::history`].
pub const HISTORY_LIMIT: u64 = 20;

const MAX_SESSION_KEY_LEN: usize = 128;

/// Records player sessions and the rounds played inside them.
///
/// # Fields Overview
///
/// - `storage`: ledger store the sessions and rounds are appended to
/// - `balance_mode`: in ledger mode every round also moves the player's balance
pub struct SessionRecorder {
    storage: Arc<dyn Storage>,
    balance_mode: BalanceMode,
}

fn session_not_found(err: StorageError, session_key: &str) -> ServiceError {
    match err {
        StorageError::NotFound => {
            ServiceError::NotFound(format!("Session '{}' not found", session_key))
        }
        e => e.into(),
    }
}

impl SessionRecorder {
    pub fn new(storage: Arc<dyn Storage>, balance_mode: BalanceMode) -> Self {
        Self {
            storage,
            balance_mode,
        }
    }

    /// Start a session, or return the existing one when the key is already known.
    pub fn start_session(
        &self,
        user_id: i64,
        session_key: Option<&str>,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<GameSession, ServiceError> {
        let key = match session_key.map(str::trim) {
            Some("") => {
                return Err(ServiceError::Validation(
                    "sessionId cannot be blank".to_string(),
                ))
            }
            Some(k) if k.len() > MAX_SESSION_KEY_LEN => {
                return Err(ServiceError::Validation(format!(
                    "sessionId longer than {} characters",
                    MAX_SESSION_KEY_LEN
                )))
            }
            Some(k) => k.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let start = start_time.unwrap_or_else(Utc::now);

        let (session, created) = self.storage.start_session(user_id, &key, start)?;
        if created {
            info!("User {} started session {}", user_id, key);
        } else {
            debug!("Session {} already exists for user {}", key, user_id);
        }
        Ok(session)
    }

    pub fn record_round(
        &self,
        user_id: i64,
        session_key: &str,
        report: &RoundReport,
    ) -> Result<GameRound, ServiceError> {
        let outcome = report.validate()?;
        let apply_to_balance = self.balance_mode == BalanceMode::Ledger;
        let round = self
            .storage
            .record_round(user_id, session_key, &outcome, apply_to_balance)
            .map_err(|e| session_not_found(e, session_key))?;
        debug!(
            "Round {} of session {} recorded ({}, {} cards)",
            round.round_number, session_key, round.end_reason, round.flipped_cards
        );
        Ok(round)
    }

    pub fn end_session(
        &self,
        user_id: i64,
        session_key: &str,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<GameSession, ServiceError> {
        let end = end_time.unwrap_or_else(Utc::now);
        let session = self
            .storage
            .end_session(user_id, session_key, end)
            .map_err(|e| session_not_found(e, session_key))?;
        info!("User {} ended session {}", user_id, session_key);
        Ok(session)
    }

    pub fn record_risk_estimation(
        &self,
        user_id: i64,
        report: &RiskReport,
    ) -> Result<RiskEstimation, ServiceError> {
        let sample = report.validate()?;
        self.storage
            .save_risk_estimation(user_id, &sample)
            .map_err(|e| session_not_found(e, &sample.session_key))
    }

    /// The player's most recent sessions, newest first.
    pub fn history(&self, user_id: i64) -> Result<Vec<GameSession>, ServiceError> {
        Ok(self.storage.recent_sessions(user_id, HISTORY_LIMIT)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DatabaseStorage;
    use tempfile::TempDir;

    fn recorder(mode: BalanceMode) -> (SessionRecorder, Arc<dyn Storage>, i64) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recorder.sqlite3");
        Box::leak(Box::new(dir));
        let storage: Arc<dyn Storage> = Arc::new(DatabaseStorage::new_file(path).unwrap());
        let user = storage.create_user("player", "hash", 2000).unwrap();
        (SessionRecorder::new(storage.clone(), mode), storage, user.id)
    }

    fn round(end_reason: &str, flipped_cards: i64, total_bonus_after: i64) -> RoundReport {
        RoundReport {
            flipped_cards,
            round_bonus: 25,
            end_reason: end_reason.to_string(),
            penalty_amount: 40,
            bomb_count: 1,
            total_bonus_after,
            total_cards: None,
            duration_ms: Some(900),
        }
    }

    #[test]
    fn test_start_session_generates_key() {
        let (recorder, _, user) = recorder(BalanceMode::Client);
        let session = recorder.start_session(user, None, None).unwrap();
        assert!(Uuid::parse_str(&session.session_key).is_ok());
        assert!(session.end_time.is_none());

        assert!(matches!(
            recorder.start_session(user, Some("  "), None),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_start_session_twice_keeps_one_row() {
        let (recorder, storage, user) = recorder(BalanceMode::Client);
        let first = recorder.start_session(user, Some("s-1"), None).unwrap();
        let again = recorder.start_session(user, Some("s-1"), None).unwrap();
        assert_eq!(first.session_key, again.session_key);
        assert_eq!(storage.user_footprint(user).unwrap().sessions, 1);
    }

    #[test]
    fn test_rounds_fold_into_session_totals() {
        let (recorder, storage, user) = recorder(BalanceMode::Client);
        recorder.start_session(user, Some("s-1"), None).unwrap();
        let flips = [3, 5, 0, 7];
        let reasons = ["stop", "bomb", "bomb", "win"];
        for (i, (flipped, reason)) in flips.iter().zip(reasons).enumerate() {
            let recorded = recorder
                .record_round(user, "s-1", &round(reason, *flipped, 10 * i as i64))
                .unwrap();
            assert_eq!(recorded.round_number, i as i64 + 1);
        }

        let session = storage.get_session(user, "s-1").unwrap();
        assert_eq!(session.rounds_played, 4);
        assert_eq!(session.cards_flipped, 15);
        assert_eq!(session.bomb_hits, 2);
        assert_eq!(session.total_bonus, 30);
        assert_eq!(storage.get_user(user).unwrap().balance, 2000);
    }

    #[test]
    fn test_orphan_round_is_not_found() {
        let (recorder, storage, user) = recorder(BalanceMode::Client);
        let result = recorder.record_round(user, "missing", &round("stop", 2, 0));
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert_eq!(storage.user_footprint(user).unwrap().rounds, 0);
    }

    #[test]
    fn test_ledger_mode_moves_balance() {
        let (recorder, storage, user) = recorder(BalanceMode::Ledger);
        recorder.start_session(user, Some("s-1"), None).unwrap();
        recorder
            .record_round(user, "s-1", &round("stop", 4, 25))
            .unwrap();
        recorder
            .record_round(user, "s-1", &round("bomb", 2, 25))
            .unwrap();
        // +25, then +25 - 40
        assert_eq!(storage.get_user(user).unwrap().balance, 2010);
    }

    #[test]
    fn test_ledger_mode_rejects_out_of_range_amounts() {
        let (recorder, storage, user) = recorder(BalanceMode::Ledger);
        recorder.start_session(user, Some("s-1"), None).unwrap();

        let mut underflow = round("bomb", 2, 0);
        underflow.round_bonus = i64::MIN;
        underflow.penalty_amount = 1;
        assert!(matches!(
            recorder.record_round(user, "s-1", &underflow),
            Err(ServiceError::Validation(_))
        ));

        let session = storage.get_session(user, "s-1").unwrap();
        assert_eq!(session.rounds_played, 0);
        assert_eq!(storage.get_user(user).unwrap().balance, 2000);
    }

    #[test]
    fn test_end_session_and_history() {
        let (recorder, _, user) = recorder(BalanceMode::Client);
        let start = Utc::now();
        recorder
            .start_session(user, Some("old"), Some(start - chrono::Duration::hours(1)))
            .unwrap();
        recorder.start_session(user, Some("new"), Some(start)).unwrap();

        let ended = recorder.end_session(user, "old", None).unwrap();
        assert!(ended.end_time.is_some());
        assert!(matches!(
            recorder.end_session(user, "nope", None),
            Err(ServiceError::NotFound(_))
        ));

        let history = recorder.history(user).unwrap();
        let keys: Vec<&str> = history.iter().map(|s| s.session_key.as_str()).collect();
        assert_eq!(keys, vec!["new", "old"]);
    }

    #[test]
    fn test_history_is_capped() {
        let (recorder, _, user) = recorder(BalanceMode::Client);
        for i in 0..(HISTORY_LIMIT + 5) {
            recorder
                .start_session(user, Some(&format!("s-{}", i)), None)
                .unwrap();
        }
        assert_eq!(recorder.history(user).unwrap().len() as u64, HISTORY_LIMIT);
    }

    #[test]
    fn test_risk_estimation_needs_owned_session() {
        let (recorder, storage, user) = recorder(BalanceMode::Client);
        let other = storage.create_user("other", "hash", 2000).unwrap();
        recorder.start_session(other.id, Some("theirs"), None).unwrap();

        let report = RiskReport {
            session_key: "theirs".to_string(),
            round_number: Some(1),
            actual_bomb_prob: 0.3,
            flipped_count: 4,
        };
        assert!(matches!(
            recorder.record_risk_estimation(user, &report),
            Err(ServiceError::NotFound(_))
        ));

        recorder.start_session(user, Some("mine"), None).unwrap();
        let mine = RiskReport {
            session_key: "mine".to_string(),
            ..report
        };
        let saved = recorder.record_risk_estimation(user, &mine).unwrap();
        assert_eq!(saved.flipped_count, 4);
        assert_eq!(saved.round_number, Some(1));
    }
}
