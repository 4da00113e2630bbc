use super::types::*;
use crate::balance::MAX_BALANCE;
use crate::error_handling::types::ConfigError;
use clap::Args;
use log::{debug, info};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file and can be partially overridden from the command
/// line or the environment through [`ConfigOverrides`].
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use bombcard::configuration::Config;
///
/// let config = Config::from_file(Path::new("config/bombcard.toml")).unwrap();
/// println!("Binding to: {}:{}", config.server.bind_address, config.server.port);
/// ```
///
/// # Sections Overview
///
/// - `server`: address and port of the HTTP API
/// - `storage`: SQLite file, pool size and the timeout applied to every store call
/// - `auth`: token signing secret, token lifetime and password policy
/// - `admin`: the operator credential, stored as an argon2 hash
/// - `game`: starting stake and the constants used by the statistics
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub game: GameConfig,
}

/// Command-line and environment overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Network address to bind the HTTP API to
    #[arg(long, env = "BOMBCARD_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Port of the HTTP API
    #[arg(long, env = "BOMBCARD_PORT")]
    pub port: Option<u16>,

    /// SQLite database file
    #[arg(long, env = "BOMBCARD_DATABASE_PATH")]
    pub database_path: Option<String>,

    /// Secret used to sign bearer tokens
    #[arg(long, env = "BOMBCARD_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides and validates the result again.
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(ref addr) = overrides.bind_address {
            debug!("Overriding bind address with {}", addr);
            self.server.bind_address = addr.clone();
        }
        if let Some(port) = overrides.port {
            debug!("Overriding port with {}", port);
            self.server.port = port;
        }
        if let Some(ref path) = overrides.database_path {
            debug!("Overriding database path with {}", path);
            self.storage.database_path = path.clone();
        }
        if let Some(ref secret) = overrides.jwt_secret {
            self.auth.jwt_secret = secret.clone();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidValue(format!(
                "server.bind_address '{}' is not an IP address",
                self.server.bind_address
            )))?;

        if self.storage.database_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "storage.database_path must not be empty".to_string(),
            ));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::NotInRange(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }
        if self.storage.operation_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "storage.operation_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "auth.jwt_secret must not be empty".to_string(),
            ));
        }
        if self.auth.token_ttl_hours == 0 {
            return Err(ConfigError::NotInRange(
                "auth.token_ttl_hours must be at least 1".to_string(),
            ));
        }

        if self.admin.username.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "admin.username must not be empty".to_string(),
            ));
        }
        if !self.admin.password_hash.starts_with("$argon2") {
            return Err(ConfigError::InvalidValue(
                "admin.password_hash must be an argon2 hash, see `bombcard --hash-password`"
                    .to_string(),
            ));
        }

        let game = &self.game;
        if !(0..=MAX_BALANCE).contains(&game.starting_stake) {
            return Err(ConfigError::NotInRange(format!(
                "game.starting_stake must be between 0 and {}",
                MAX_BALANCE
            )));
        }
        for (name, value) in [
            ("game.stake_per_game", game.stake_per_game),
            ("game.user_reward_factor", game.user_reward_factor),
            ("game.global_reward_factor", game.global_reward_factor),
            ("game.min_expected_reward", game.min_expected_reward),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NotInRange(format!(
                    "{} must be a finite non-negative number",
                    name
                )));
            }
        }
        if !game.optimal_flips.is_finite() || game.optimal_flips <= 0.0 {
            return Err(ConfigError::NotInRange(
                "game.optimal_flips must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
