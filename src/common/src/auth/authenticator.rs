use super::{AuthError, BasicCredentials};
use crate::config::AuthConfig;

/// Checks presented credentials against the configured pair
pub struct Authenticator {
    username: String,
    password: Option<String>,
}

impl Authenticator {
    pub fn new(auth_config: AuthConfig) -> Self {
        Self {
            username: auth_config.username,
            password: auth_config.password.filter(|p| !p.is_empty()),
        }
    }

    /// Returns the authenticated username.
    ///
    /// * no credentials → 401
    /// * wrong username, or wrong password when one is configured → 403
    pub fn authenticate(&self, credentials: Option<&BasicCredentials>) -> Result<String, AuthError> {
        let credentials =
            credentials.ok_or_else(|| AuthError::unauthorized("Authentication required"))?;

        if credentials.username != self.username {
            return Err(AuthError::forbidden("Bad username or password"));
        }

        if self
            .password
            .as_ref()
            .is_some_and(|password| credentials.password != *password)
        {
            return Err(AuthError::forbidden("Bad username or password"));
        }

        Ok(credentials.username.clone())
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("username", &self.username)
            .field("password_required", &self.password.is_some())
            .finish()
    }
}
