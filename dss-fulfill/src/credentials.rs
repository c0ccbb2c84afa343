//! Credential providers
//!
//! The fulfillment API and the live feed both authenticate with a bearer
//! token. Callers ask for a token that stays valid for at least
//! `min_validity`; providers refresh behind the scenes when needed.
//!
//! - [`StaticCredentials`]: fixed token, replaceable at runtime
//! - [`OidcCredentials`]: OpenID Connect refresh-token grant
//! - [`Credentials`]: either of the above, used by the binary

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default minimum remaining lifetime requested from providers
pub const DEFAULT_MIN_VALIDITY: Duration = Duration::from_secs(30);

/// Assumed lifetime when a token response carries no `expires_in`
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

pub trait CredentialProvider: Send + Sync + 'static {
    /// Current token without refreshing
    fn token(&self) -> Option<String>;

    /// Token valid for at least `min_validity`, refreshing if necessary
    fn refresh(&self, min_validity: Duration) -> impl Future<Output = Result<String>> + Send;

    /// Force the next `refresh` to obtain a new token
    fn invalidate(&self) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ========================================
// Static token
// ========================================

/// Fixed bearer token
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: Mutex<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    /// Provider with no token; every refresh fails until one is set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the token
    pub fn set(&self, token: Option<String>) {
        *lock(&self.token) = token;
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    async fn refresh(&self, _min_validity: Duration) -> Result<String> {
        self.token()
            .ok_or_else(|| Error::Credential("no access token configured".to_string()))
    }
}

// ========================================
// OpenID Connect refresh-token grant
// ========================================

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    fn valid_for(&self, min_validity: Duration, now: DateTime<Utc>) -> Option<String> {
        let token = self.access_token.as_ref()?;
        let expires_at = self.expires_at?;
        let margin = chrono::Duration::from_std(min_validity).unwrap_or(chrono::Duration::zero());
        (expires_at - margin > now).then(|| token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Refreshes access tokens from an OpenID Connect token endpoint
pub struct OidcCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    state: Mutex<TokenState>,
    // Serializes refreshes so concurrent callers share one token request
    refresh_gate: tokio::sync::Mutex<()>,
}

impl OidcCredentials {
    /// `issuer_url` is the realm URL, e.g. `https://host/auth/realms/<realm>`
    pub fn new(
        http: reqwest::Client,
        issuer_url: &str,
        client_id: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        let token_url = format!(
            "{}/protocol/openid-connect/token",
            issuer_url.trim_end_matches('/')
        );
        Self {
            http,
            token_url,
            client_id: client_id.into(),
            state: Mutex::new(TokenState {
                refresh_token: Some(refresh_token.into()),
                ..TokenState::default()
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Seed with an access token whose expiry is unknown
    ///
    /// The first refresh replaces it.
    pub fn with_access_token(self, access_token: impl Into<String>) -> Self {
        lock(&self.state).access_token = Some(access_token.into());
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn request_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<TokenResponse>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<TokenError>(&body) {
            Ok(err) => Err(Error::Credential(format!(
                "{}: {}",
                err.error,
                err.error_description.unwrap_or_default()
            ))),
            Err(_) => Err(Error::Api {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

impl CredentialProvider for OidcCredentials {
    fn token(&self) -> Option<String> {
        lock(&self.state).access_token.clone()
    }

    async fn refresh(&self, min_validity: Duration) -> Result<String> {
        let _gate = self.refresh_gate.lock().await;

        let refresh_token = {
            let state = lock(&self.state);
            if let Some(token) = state.valid_for(min_validity, Utc::now()) {
                debug!("Access token still valid");
                return Ok(token);
            }
            state
                .refresh_token
                .clone()
                .ok_or_else(|| Error::Credential("no refresh token available".to_string()))?
        };

        let response = match self.request_token(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return Err(e);
            }
        };

        let mut state = lock(&self.state);
        let lifetime = match response.expires_in {
            Some(secs) => chrono::Duration::seconds(secs),
            None => {
                debug!("Token response has no expires_in; assuming default lifetime");
                chrono::Duration::from_std(DEFAULT_TOKEN_LIFETIME).unwrap_or(chrono::Duration::zero())
            }
        };
        state.expires_at = Some(Utc::now() + lifetime);
        if let Some(rotated) = response.refresh_token {
            state.refresh_token = Some(rotated);
        }
        state.access_token = Some(response.access_token.clone());
        info!(expires_at = ?state.expires_at, "Access token refreshed");

        Ok(response.access_token)
    }

    fn invalidate(&self) {
        lock(&self.state).expires_at = None;
    }
}

// ========================================
// Either
// ========================================

/// Provider selected from configuration
pub enum Credentials {
    Static(StaticCredentials),
    Oidc(OidcCredentials),
}

impl CredentialProvider for Credentials {
    fn token(&self) -> Option<String> {
        match self {
            Credentials::Static(c) => c.token(),
            Credentials::Oidc(c) => c.token(),
        }
    }

    async fn refresh(&self, min_validity: Duration) -> Result<String> {
        match self {
            Credentials::Static(c) => c.refresh(min_validity).await,
            Credentials::Oidc(c) => c.refresh(min_validity).await,
        }
    }

    fn invalidate(&self) {
        match self {
            Credentials::Static(c) => c.invalidate(),
            Credentials::Oidc(c) => c.invalidate(),
        }
    }
}

impl From<StaticCredentials> for Credentials {
    fn from(c: StaticCredentials) -> Self {
        Credentials::Static(c)
    }
}

impl From<OidcCredentials> for Credentials {
    fn from(c: OidcCredentials) -> Self {
        Credentials::Oidc(c)
    }
}
