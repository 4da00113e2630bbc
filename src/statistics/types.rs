use chrono::{DateTime, Utc};
use serde::Serialize;

/// One player's counters with the rates derived from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsView {
    pub user_id: i64,
    pub username: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub games_played: i64,
    pub rounds_played: i64,
    pub total_flips: i64,
    pub early_exits: i64,
    pub bomb_triggers: i64,
    pub total_game_time_ms: i64,
    /// Balance minus the starting stake.
    pub total_rewards: i64,
    pub early_exit_rate: f64,
    pub bomb_rate: f64,
    pub avg_flips_per_round: f64,
    pub expected_reward: f64,
    pub profit_deviation: f64,
    pub risk_error: f64,
}

/// Totals over every player except the system account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatsView {
    pub total_users: i64,
    pub total_games: i64,
    pub total_rounds: i64,
    pub total_flips: i64,
    pub total_early_exits: i64,
    pub total_bomb_triggers: i64,
    pub total_game_time_ms: i64,
    pub total_balance: i64,
    pub actual_net_reward: i64,
    pub expected_reward: f64,
    pub profit_deviation: f64,
    pub early_exit_rate: f64,
    pub bomb_rate: f64,
    pub avg_flips_per_round: f64,
    pub risk_error: f64,
}
