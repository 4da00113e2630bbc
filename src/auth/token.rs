use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::ServiceError;

/// Bearer token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks HS256 tokens signed with the configured secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_hours: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours as i64),
        }
    }

    pub fn issue(&self, user_id: i64, username: &str, is_admin: bool) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            username: username.to_string(),
            is_admin,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::Internal(format!("token signing failed: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::Auth("Token expired".to_string()),
                _ => ServiceError::Auth("Invalid token".to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_then_verify() {
        let issuer = TokenIssuer::new("secret", 2);
        let token = issuer.issue(7, "alice", false).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.username, "alice");
        assert!(!claims.is_admin);
        assert_eq!(claims.exp - claims.iat, 2 * 3600);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = TokenIssuer::new("one", 1).issue(1, "a", true).unwrap();
        let err = TokenIssuer::new("two", 1).verify(&token).unwrap_err();
        assert_eq!(err, ServiceError::Auth("Invalid token".to_string()));
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = TokenIssuer::new("secret", 1);
        let past = Utc::now() - Duration::hours(3);
        let claims = Claims {
            user_id: 1,
            username: "late".to_string(),
            is_admin: false,
            iat: past.timestamp(),
            exp: (past + Duration::hours(1)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert_eq!(
            issuer.verify(&token).unwrap_err(),
            ServiceError::Auth("Token expired".to_string())
        );
    }

    #[test]
    fn test_claims_wire_names() {
        let issuer = TokenIssuer::new("secret", 1);
        let claims = issuer.verify(&issuer.issue(3, "bob", false).unwrap()).unwrap();
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["userId"], 3);
        assert_eq!(json["isAdmin"], false);
    }
}
