use serde::Deserialize;

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 3000,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
    pub max_connections: u32,
    pub operation_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: String::from("bombcard.sqlite3"),
            max_connections: 5,
            operation_timeout_secs: 5,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

fn default_token_ttl_hours() -> u64 {
    24
}

fn default_min_password_length() -> usize {
    6
}

/// Operator credential; `password_hash` is an argon2 PHC string.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceMode {
    /// The client pushes its computed balance, the server stores it as is.
    Client,
    /// The server applies each round's bonus and penalty to the balance.
    Ledger,
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub starting_stake: i64,
    pub stake_per_game: f64,
    /// Expected net return per game used for per-user profit deviation.
    pub user_reward_factor: f64,
    /// Expected net return per game used for the global profit deviation.
    pub global_reward_factor: f64,
    pub min_expected_reward: f64,
    pub optimal_flips: f64,
    pub balance_mode: BalanceMode,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            starting_stake: 2000,
            stake_per_game: 200.0,
            user_reward_factor: 0.6,
            global_reward_factor: 0.3,
            min_expected_reward: 100.0,
            optimal_flips: 8.0,
            balance_mode: BalanceMode::Client,
        }
    }
}
