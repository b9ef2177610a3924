// ── Cloud session ──
//
// Credentials plus the tokens of the current login. Passed explicitly to
// the poll loop and the command dispatcher; `ArcSwapOption` lets both
// read the token without locking while a reconnect swaps it.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use secrecy::SecretString;
use tracing::{debug, info};

use gardenly_api::SessionTokens;

use crate::cloud::CloudApi;
use crate::error::CoreError;

pub struct Session {
    username: String,
    password: SecretString,
    tokens: ArcSwapOption<SessionTokens>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("connected", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            tokens: ArcSwapOption::empty(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Log in and replace the current tokens.
    pub async fn login(&self, api: &dyn CloudApi) -> Result<Arc<SessionTokens>, CoreError> {
        debug!(username = %self.username, "opening cloud session");
        let tokens = Arc::new(api.login(&self.username, &self.password).await?);
        self.tokens.store(Some(Arc::clone(&tokens)));
        info!(user_id = %tokens.user_id, "cloud session established");
        Ok(tokens)
    }

    /// Current tokens, or `NotConnected`.
    pub fn tokens(&self) -> Result<Arc<SessionTokens>, CoreError> {
        self.tokens.load_full().ok_or(CoreError::NotConnected)
    }

    pub fn token(&self) -> Result<SecretString, CoreError> {
        Ok(self.tokens()?.token.clone())
    }

    pub fn user_id(&self) -> Result<String, CoreError> {
        Ok(self.tokens()?.user_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.tokens.load().is_some()
    }

    /// Drop the tokens; the next operation needs a fresh login.
    pub fn clear(&self) {
        self.tokens.store(None);
    }
}
