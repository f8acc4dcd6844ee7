//! Service-token acquisition for upstream calls.
//!
//! The auth service mints short-lived bearer tokens for service-to-service
//! calls. A rollup run mints exactly one token up front and reuses it across
//! every fan-out request of that run.

use crate::sources::SourceFailure;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// An opaque bearer token for the sibling services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Mints a fresh token. Called once per run.
    async fn mint(&self) -> Result<AccessToken, SourceFailure>;
}

/// Talks to the platform auth service.
pub struct HttpTokenProvider {
    client: reqwest::Client,
    auth_url: Url,
    timeout: Duration,
}

#[derive(Deserialize)]
struct TokenEnvelope {
    data: TokenData,
}

#[derive(Deserialize)]
struct TokenData {
    token: String,
}

impl HttpTokenProvider {
    pub fn new(client: reqwest::Client, auth_url: Url, timeout: Duration) -> Self {
        Self {
            client,
            auth_url,
            timeout,
        }
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn mint(&self) -> Result<AccessToken, SourceFailure> {
        let url = self
            .auth_url
            .join("api/auth/service-token")
            .map_err(|e| SourceFailure::Unavailable(format!("invalid auth url: {e}")))?;

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceFailure::TimedOut(self.timeout.as_secs())
                } else {
                    SourceFailure::Unavailable(format!("token request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(SourceFailure::Unavailable(format!(
                "token service returned {}",
                response.status()
            )));
        }

        let envelope: TokenEnvelope = response
            .json()
            .await
            .map_err(|e| SourceFailure::Malformed(format!("token payload: {e}")))?;

        Ok(AccessToken::new(envelope.data.token))
    }
}
