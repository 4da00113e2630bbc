use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved id of the system/admin account, excluded from every report.
pub const SYSTEM_USER_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Login material; never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Bomb,
    Stop,
    Win,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Bomb => "bomb",
            EndReason::Stop => "stop",
            EndReason::Win => "win",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bomb" => Ok(EndReason::Bomb),
            "stop" => Ok(EndReason::Stop),
            "win" => Ok(EndReason::Win),
            other => Err(format!("unknown end reason '{}'", other)),
        }
    }
}

/// A validated round result, ready to be appended to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub flipped_cards: i64,
    pub round_bonus: i64,
    pub end_reason: EndReason,
    /// Only non-zero when `end_reason` is `Bomb`.
    pub penalty_amount: i64,
    pub bomb_count: i64,
    pub total_bonus_after: i64,
    pub total_cards: i64,
    pub duration_ms: i64,
}

impl RoundOutcome {
    /// Signed balance change this round contributes to the ledger.
    pub fn balance_delta(&self) -> i64 {
        self.round_bonus.saturating_sub(self.penalty_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    #[serde(rename = "sessionId")]
    pub session_key: String,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub rounds_played: i64,
    pub cards_flipped: i64,
    pub bomb_hits: i64,
    pub total_bonus: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRound {
    pub id: i64,
    #[serde(rename = "sessionId")]
    pub session_key: String,
    pub user_id: i64,
    pub round_number: i64,
    pub flipped_cards: i64,
    pub round_bonus: i64,
    pub end_reason: EndReason,
    pub penalty_amount: i64,
    pub bomb_count: i64,
    pub total_bonus_after: i64,
    pub total_cards: i64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRiskEstimation {
    pub session_key: String,
    pub round_number: Option<i64>,
    pub actual_bomb_prob: f64,
    pub flipped_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskEstimation {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "sessionId")]
    pub session_key: String,
    pub round_number: Option<i64>,
    pub actual_bomb_prob: f64,
    pub flipped_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Raw per-user counters, aggregated from rounds and sessions at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAggregate {
    pub user: User,
    pub games_played: i64,
    pub rounds_played: i64,
    pub total_flips: i64,
    pub early_exits: i64,
    pub bomb_triggers: i64,
    pub total_game_time_ms: i64,
}

/// Raw counters across every non-system user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalTotals {
    pub total_users: i64,
    pub balance_sum: i64,
    pub total_games: i64,
    pub total_rounds: i64,
    pub total_flips: i64,
    pub total_early_exits: i64,
    pub total_bomb_triggers: i64,
    pub total_game_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTree {
    #[serde(flatten)]
    pub session: GameSession,
    pub rounds: Vec<GameRound>,
}

/// Number of dependent rows still referencing a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFootprint {
    pub sessions: u64,
    pub rounds: u64,
    pub risk_estimations: u64,
}

impl UserFootprint {
    pub fn is_empty(&self) -> bool {
        self.sessions == 0 && self.rounds == 0 && self.risk_estimations == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub users: u64,
    pub sessions: u64,
    pub rounds: u64,
    pub risk_estimations: u64,
}
