//! Player and operator authentication: argon2 password hashes and HS256 bearer tokens.

pub mod auth_service;
pub mod password;
pub mod token;

pub use auth_service::{AuthService, LoginOutcome};
pub use token::{Claims, TokenIssuer};
