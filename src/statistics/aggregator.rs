use std::sync::Arc;

use crate::configuration::GameConfig;
use crate::error_handling::types::{ServiceError, StorageError};
use crate::statistics::metrics;
use crate::statistics::types::{GlobalStatsView, UserStatsView};
use crate::storage::types::{GlobalTotals, UserAggregate};
use crate::storage::Storage;

/// Folds ledger aggregates into display views.
///
/// Rates are computed at full precision and only rounded when the view is built:
/// one decimal for percentages, two for ratios.
pub struct StatsAggregator {
    storage: Arc<dyn Storage>,
    game: GameConfig,
}

impl StatsAggregator {
    pub fn new(storage: Arc<dyn Storage>, game: GameConfig) -> Self {
        Self { storage, game }
    }

    pub fn user_stats(&self, user_id: i64) -> Result<UserStatsView, ServiceError> {
        let aggregate = self.storage.user_aggregate(user_id).map_err(|e| match e {
            StorageError::NotFound => ServiceError::NotFound(format!("User {} not found", user_id)),
            e => e.into(),
        })?;
        Ok(self.user_view(aggregate))
    }

    /// Every player, newest account first.
    pub fn all_users(&self) -> Result<Vec<UserStatsView>, ServiceError> {
        Ok(self
            .storage
            .all_user_aggregates()?
            .into_iter()
            .map(|aggregate| self.user_view(aggregate))
            .collect())
    }

    pub fn global_stats(&self) -> Result<GlobalStatsView, ServiceError> {
        Ok(self.global_view(&self.storage.global_totals()?))
    }

    pub fn user_view(&self, aggregate: UserAggregate) -> UserStatsView {
        let rounds = aggregate.rounds_played;
        let total_rewards = aggregate.user.balance.saturating_sub(self.game.starting_stake);
        let avg_flips = metrics::avg_flips_per_round(aggregate.total_flips, rounds);
        let expected = metrics::expected_reward(
            aggregate.games_played,
            self.game.stake_per_game,
            self.game.user_reward_factor,
        );
        let deviation = metrics::user_profit_deviation(
            total_rewards as f64,
            expected,
            self.game.min_expected_reward,
        );

        UserStatsView {
            user_id: aggregate.user.id,
            username: aggregate.user.username,
            balance: aggregate.user.balance,
            created_at: aggregate.user.created_at,
            last_login: aggregate.user.last_login,
            games_played: aggregate.games_played,
            rounds_played: rounds,
            total_flips: aggregate.total_flips,
            early_exits: aggregate.early_exits,
            bomb_triggers: aggregate.bomb_triggers,
            total_game_time_ms: aggregate.total_game_time_ms,
            total_rewards,
            early_exit_rate: metrics::round_to(metrics::percentage(aggregate.early_exits, rounds), 1),
            bomb_rate: metrics::round_to(metrics::percentage(aggregate.bomb_triggers, rounds), 1),
            avg_flips_per_round: metrics::round_to(avg_flips, 2),
            expected_reward: metrics::round_to(expected, 2),
            profit_deviation: metrics::round_to(deviation, 2),
            risk_error: metrics::round_to(metrics::risk_error(avg_flips, self.game.optimal_flips), 2),
        }
    }

    fn global_view(&self, totals: &GlobalTotals) -> GlobalStatsView {
        let rounds = totals.total_rounds;
        let actual_net_reward = totals
            .balance_sum
            .saturating_sub(totals.total_users.saturating_mul(self.game.starting_stake));
        let avg_flips = metrics::avg_flips_per_round(totals.total_flips, rounds);
        let expected = metrics::expected_reward(
            totals.total_games,
            self.game.stake_per_game,
            self.game.global_reward_factor,
        );
        let deviation = metrics::global_profit_deviation(actual_net_reward as f64, expected);

        GlobalStatsView {
            total_users: totals.total_users,
            total_games: totals.total_games,
            total_rounds: rounds,
            total_flips: totals.total_flips,
            total_early_exits: totals.total_early_exits,
            total_bomb_triggers: totals.total_bomb_triggers,
            total_game_time_ms: totals.total_game_time_ms,
            total_balance: totals.balance_sum,
            actual_net_reward,
            expected_reward: metrics::round_to(expected, 2),
            profit_deviation: metrics::round_to(deviation, 2),
            early_exit_rate: metrics::round_to(metrics::percentage(totals.total_early_exits, rounds), 1),
            bomb_rate: metrics::round_to(metrics::percentage(totals.total_bomb_triggers, rounds), 1),
            avg_flips_per_round: metrics::round_to(avg_flips, 2),
            risk_error: metrics::round_to(metrics::risk_error(avg_flips, self.game.optimal_flips), 2),
        }
    }
}
