use drive_core::{OAuthClient, OAuthError};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Credentials;
use crate::sync::backoff::Backoff;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] OAuthError),
    #[error("oauth refresh failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: OAuthError,
    },
}

/// Turns configured credentials into an access token once at startup.
/// Transient token-endpoint failures are retried with backoff; nothing
/// else in the sync path retries.
pub struct TokenProvider {
    source: TokenSource,
    backoff: Backoff,
    max_attempts: u32,
}

enum TokenSource {
    Static(String),
    Refresh {
        refresh_token: String,
        client: OAuthClient,
    },
}

impl TokenProvider {
    pub fn new(
        credentials: Credentials,
        oauth_base_url: Option<&str>,
    ) -> Result<Self, TokenProviderError> {
        let source = match credentials {
            Credentials::AccessToken(token) => TokenSource::Static(token),
            Credentials::RefreshToken {
                refresh_token,
                client_id,
                client_secret,
            } => TokenSource::Refresh {
                refresh_token,
                client: match oauth_base_url {
                    Some(url) => OAuthClient::with_base_url(url, client_id, client_secret)?,
                    None => OAuthClient::new(client_id, client_secret)?,
                },
            },
        };
        Ok(Self {
            source,
            backoff: Backoff::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_retry(mut self, backoff: Backoff, max_attempts: u32) -> Self {
        self.backoff = backoff;
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn access_token(&self) -> Result<String, TokenProviderError> {
        let (refresh_token, client) = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Refresh {
                refresh_token,
                client,
            } => (refresh_token, client),
        };

        let mut attempt = 0;
        loop {
            match client.refresh_token(refresh_token).await {
                Ok(token) => {
                    info!(attempt, "access token acquired");
                    return Ok(token.access_token);
                }
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "token refresh failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(TokenProviderError::Exhausted {
                        attempts: self.max_attempts,
                        source: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
