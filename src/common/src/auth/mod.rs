//! Basic authentication for the SimpleJSON endpoints
//!
//! Grafana's JSON data sources authenticate with a single configured
//! username/password pair sent as an `Authorization: Basic` header.

pub mod authenticator;
pub mod middleware;

pub use authenticator::Authenticator;
pub use middleware::{BASIC_REALM, auth_middleware};

/// Credentials decoded from an `Authorization: Basic` header
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authentication error with HTTP status code
#[derive(Debug, Clone)]
pub struct AuthError {
    /// HTTP status code (401, 403)
    pub status_code: u16,
    /// Error message for client
    pub message: String,
}

impl AuthError {
    /// Create a 401 Unauthorized error (missing or unreadable credentials)
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status_code: 401,
            message: message.into(),
        }
    }

    /// Create a 403 Forbidden error (credentials don't match)
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status_code: 403,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status_code, self.message)
    }
}

impl std::error::Error for AuthError {}
