use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use regex::Regex;
use serde::Serialize;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::token::{Claims, TokenIssuer};
use crate::configuration::{AdminConfig, AuthConfig};
use crate::error_handling::types::{ServiceError, StorageError};
use crate::storage::types::{User, SYSTEM_USER_ID};
use crate::storage::Storage;

const USERNAME_PATTERN: &str = r"^[A-Za-z0-9_-]{3,32}$";
const BAD_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub user: User,
}

/// Registration and login for players, plus the operator login.
///
/// The operator credential comes from configuration and goes through the same argon2
/// check as player passwords.
pub struct AuthService {
    storage: Arc<dyn Storage>,
    tokens: TokenIssuer,
    admin: AdminConfig,
    starting_stake: i64,
    min_password_length: usize,
    username_pattern: Regex,
}

impl AuthService {
    pub fn new(
        storage: Arc<dyn Storage>,
        auth: &AuthConfig,
        admin: AdminConfig,
        starting_stake: i64,
    ) -> Result<Self, ServiceError> {
        let username_pattern = Regex::new(USERNAME_PATTERN)
            .map_err(|e| ServiceError::Internal(format!("username pattern: {}", e)))?;
        Ok(Self {
            storage,
            tokens: TokenIssuer::new(&auth.jwt_secret, auth.token_ttl_hours),
            admin,
            starting_stake,
            min_password_length: auth.min_password_length,
            username_pattern,
        })
    }

    pub fn register(&self, username: &str, password: &str) -> Result<User, ServiceError> {
        let username = username.trim();
        if !self.username_pattern.is_match(username) {
            return Err(ServiceError::Validation(
                "Username must be 3-32 letters, digits, '_' or '-'".to_string(),
            ));
        }
        if password.chars().count() < self.min_password_length {
            return Err(ServiceError::Validation(format!(
                "Password must be at least {} characters",
                self.min_password_length
            )));
        }
        if username == self.admin.username {
            return Err(ServiceError::Conflict("Username already exists".to_string()));
        }

        let hash = hash_password(password)?;
        let user = self
            .storage
            .create_user(username, &hash, self.starting_stake)
            .map_err(|e| match e {
                StorageError::Conflict(_) => {
                    ServiceError::Conflict("Username already exists".to_string())
                }
                e => e.into(),
            })?;
        info!("Registered user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, ServiceError> {
        let credentials = self
            .storage
            .find_credentials(username.trim())?
            .filter(|c| c.id != SYSTEM_USER_ID)
            .ok_or_else(|| ServiceError::Auth(BAD_CREDENTIALS.to_string()))?;
        if !verify_password(password, &credentials.password_hash) {
            warn!("Failed login for {}", credentials.username);
            return Err(ServiceError::Auth(BAD_CREDENTIALS.to_string()));
        }

        self.storage.touch_last_login(credentials.id, Utc::now())?;
        let user = self.storage.get_user(credentials.id)?;
        let token = self.tokens.issue(user.id, &user.username, false)?;
        Ok(LoginOutcome { token, user })
    }

    pub fn admin_login(&self, username: &str, password: &str) -> Result<LoginOutcome, ServiceError> {
        if username.trim() != self.admin.username
            || !verify_password(password, &self.admin.password_hash)
        {
            warn!("Failed operator login for {}", username);
            return Err(ServiceError::Auth(BAD_CREDENTIALS.to_string()));
        }

        self.storage.touch_last_login(SYSTEM_USER_ID, Utc::now())?;
        let user = self.storage.get_user(SYSTEM_USER_ID)?;
        let token = self.tokens.issue(SYSTEM_USER_ID, &self.admin.username, true)?;
        info!("Operator {} logged in", self.admin.username);
        Ok(LoginOutcome { token, user })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        self.tokens.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DatabaseStorage;
    use tempfile::TempDir;

    fn service() -> AuthService {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.sqlite3");
        Box::leak(Box::new(dir));
        let storage: Arc<dyn Storage> = Arc::new(DatabaseStorage::new_file(path).unwrap());
        let admin = AdminConfig {
            username: "operator".to_string(),
            password_hash: hash_password("admin-pass").unwrap(),
        };
        storage
            .ensure_system_user(&admin.username, &admin.password_hash)
            .unwrap();
        let auth = AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_ttl_hours: 1,
            min_password_length: 6,
        };
        AuthService::new(storage, &auth, admin, 2000).unwrap()
    }

    #[test]
    fn test_register_and_login() {
        let auth = service();
        let user = auth.register("alice", "hunter22").unwrap();
        assert_eq!(user.balance, 2000);

        let outcome = auth.login("alice", "hunter22").unwrap();
        assert_eq!(outcome.user.id, user.id);
        assert!(outcome.user.last_login.is_some());

        let claims = auth.verify(&outcome.token).unwrap();
        assert_eq!(claims.user_id, user.id);
        assert!(!claims.is_admin);
    }

    #[test]
    fn test_register_validation() {
        let auth = service();
        assert!(matches!(auth.register("ab", "hunter22"), Err(ServiceError::Validation(_))));
        assert!(matches!(auth.register("bad name", "hunter22"), Err(ServiceError::Validation(_))));
        assert!(matches!(auth.register("alice", "short"), Err(ServiceError::Validation(_))));

        auth.register("alice", "hunter22").unwrap();
        assert!(matches!(auth.register("alice", "another1"), Err(ServiceError::Conflict(_))));
        assert!(matches!(auth.register("operator", "another1"), Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn test_login_failures_are_auth_errors() {
        let auth = service();
        auth.register("alice", "hunter22").unwrap();
        assert!(matches!(auth.login("alice", "wrong-pass"), Err(ServiceError::Auth(_))));
        assert!(matches!(auth.login("nobody", "hunter22"), Err(ServiceError::Auth(_))));
        // the operator account cannot sign in as a player
        assert!(matches!(auth.login("operator", "admin-pass"), Err(ServiceError::Auth(_))));
    }

    #[test]
    fn test_admin_login() {
        let auth = service();
        let outcome = auth.admin_login("operator", "admin-pass").unwrap();
        let claims = auth.verify(&outcome.token).unwrap();
        assert!(claims.is_admin);
        assert_eq!(claims.user_id, SYSTEM_USER_ID);

        assert!(matches!(auth.admin_login("operator", "nope"), Err(ServiceError::Auth(_))));
        assert!(matches!(auth.admin_login("root", "admin-pass"), Err(ServiceError::Auth(_))));
    }
}
