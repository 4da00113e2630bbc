//! Pure metric formulas. None of them return NaN or infinity: an empty denominator
//! yields zero.

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    finite_or_zero((value * factor).round() / factor)
}

/// Percentage of rounds for which `count` holds.
pub fn percentage(count: i64, rounds: i64) -> f64 {
    if rounds <= 0 {
        return 0.0;
    }
    finite_or_zero(100.0 * count as f64 / rounds as f64)
}

pub fn avg_flips_per_round(total_flips: i64, rounds: i64) -> f64 {
    if rounds <= 0 {
        return 0.0;
    }
    finite_or_zero(total_flips as f64 / rounds as f64)
}

/// Reward a player could expect from `games` sessions at the given stake and factor.
pub fn expected_reward(games: i64, stake_per_game: f64, reward_factor: f64) -> f64 {
    finite_or_zero(games as f64 * stake_per_game * reward_factor)
}

/// Per-player deviation. The denominator never drops below `floor`, which keeps a
/// single short session from producing huge ratios.
pub fn user_profit_deviation(actual: f64, expected: f64, floor: f64) -> f64 {
    if expected == 0.0 {
        return 0.0;
    }
    let denominator = expected.max(floor);
    if denominator <= 0.0 {
        return 0.0;
    }
    finite_or_zero((actual - expected).abs() / denominator)
}

pub fn global_profit_deviation(actual: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        return 0.0;
    }
    finite_or_zero((actual - expected).abs() / expected.abs())
}

/// Relative distance of the observed flips per round from the optimum.
pub fn risk_error(avg_flips: f64, optimal_flips: f64) -> f64 {
    if avg_flips == 0.0 || optimal_flips <= 0.0 {
        return 0.0;
    }
    finite_or_zero((avg_flips - optimal_flips).abs() / optimal_flips)
}
