//! Client-credentials token exchange for the authenticated content API.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Tokens are refreshed this long before the server says they expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub oauth_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug)]
pub struct TokenCache {
    creds: Credentials,
    token: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(creds: Credentials) -> Self {
        Self { creds, token: Mutex::new(None) }
    }

    pub fn client_id(&self) -> &str {
        &self.creds.client_id
    }

    /// Cached token, or a freshly exchanged one when the cached one is near expiry.
    pub async fn bearer(&self, http: &Client) -> Result<String> {
        let mut slot = self.token.lock().await;
        if let Some(tok) = slot.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(tok.value.clone());
        }
        let resp = self.exchange(http).await?;
        let tok = store(resp, Instant::now());
        tracing::debug!(expires_in = ?tok.expires_at.duration_since(Instant::now()), "oauth token refreshed");
        let value = tok.value.clone();
        *slot = Some(tok);
        Ok(value)
    }

    async fn exchange(&self, http: &Client) -> Result<TokenResponse> {
        let url = format!("{}/oauth2/token", self.creds.oauth_url.trim_end_matches('/'));
        http.post(&url)
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", "content")])
            .send()
            .await
            .with_context(|| format!("send failed: {url}"))?
            .error_for_status()
            .context("token exchange rejected")?
            .json::<TokenResponse>()
            .await
            .context("decode token response failed")
    }

    #[cfg(test)]
    async fn seed(&self, resp: TokenResponse) {
        *self.token.lock().await = Some(store(resp, Instant::now()));
    }

    #[cfg(test)]
    async fn cached(&self) -> Option<String> {
        self.token
            .lock()
            .await
            .as_ref()
            .filter(|t| t.is_fresh(Instant::now()))
            .map(|t| t.value.clone())
    }
}

fn store(resp: TokenResponse, now: Instant) -> AccessToken {
    AccessToken {
        value: resp.access_token,
        expires_at: now + Duration::from_secs(resp.expires_in),
    }
}
