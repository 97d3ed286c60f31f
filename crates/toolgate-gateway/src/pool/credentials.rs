//! Managed bearer tokens with silent refresh.
//!
//! One provider per backend with a stored credential. Tokens nearing expiry
//! are refreshed over the token endpoint and the rotation is persisted
//! immediately. Interactive authorization is never driven from the gateway:
//! when refresh is impossible the caller gets a `ReauthorizationRequired`
//! error naming the authorization endpoint.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use toolgate_core::{CredentialError, CredentialRecord, CredentialRepository};

/// Tokens refreshed this close to expiry are considered stale.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Wire shape of a token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Credential source for one backend.
pub struct CredentialProvider {
    backend: String,
    record: RwLock<CredentialRecord>,
    repo: Arc<dyn CredentialRepository>,
    http: reqwest::Client,
}

impl CredentialProvider {
    pub fn new(record: CredentialRecord, repo: Arc<dyn CredentialRepository>) -> Self {
        Self {
            backend: record.backend.clone(),
            record: RwLock::new(record),
            repo,
            http: reqwest::Client::new(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Current access token, refreshed first when it expires within the
    /// margin.
    pub async fn bearer_token(&self) -> Result<String, CredentialError> {
        {
            let record = self.record.read().await;
            if !record.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)) {
                return Ok(record.access_token.clone());
            }
        }
        self.refresh().await
    }

    /// Proof-of-possession verifier from the original authorization. Absent
    /// for records pushed from environments that discard it; only code
    /// redemption needs it, refresh grants never do.
    pub async fn pkce_verifier(&self) -> Result<String, CredentialError> {
        let record = self.record.read().await;
        record
            .pkce_verifier
            .clone()
            .ok_or_else(|| CredentialError::MissingVerifier {
                backend: self.backend.clone(),
            })
    }

    /// Interactive authorization is refused: the gateway has no browser and
    /// no callback surface. Callers complete the flow out of band and push
    /// the resulting credential.
    pub async fn begin_authorization(&self) -> Result<(), CredentialError> {
        let record = self.record.read().await;
        Err(CredentialError::ReauthorizationRequired {
            backend: self.backend.clone(),
            authorize_url: record.authorize_url.clone(),
        })
    }

    async fn refresh(&self) -> Result<String, CredentialError> {
        let mut record = self.record.write().await;

        // Another caller may have refreshed while we waited on the lock.
        if !record.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(record.access_token.clone());
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            warn!(backend = %self.backend, "Token expired with no refresh token");
            return Err(CredentialError::ReauthorizationRequired {
                backend: self.backend.clone(),
                authorize_url: record.authorize_url.clone(),
            });
        };

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
            ("client_id", record.client_id.clone()),
        ];
        if let Some(secret) = &record.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if let Some(scope) = &record.scope {
            form.push(("scope", scope.clone()));
        }

        let response = self
            .http
            .post(&record.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::RefreshFailed {
                backend: self.backend.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::RefreshFailed {
                backend: self.backend.clone(),
                reason: format!("token endpoint returned {status}: {body}"),
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| CredentialError::RefreshFailed {
                    backend: self.backend.clone(),
                    reason: format!("invalid token response: {e}"),
                })?;

        let expires_at = token.expires_in.map(expiry_from_now);
        record.apply_rotation(token.access_token.clone(), token.refresh_token, expires_at);

        // Persist before handing the token out; a crash between refresh and
        // save would orphan the rotation server-side.
        self.repo
            .save(&record)
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))?;

        info!(backend = %self.backend, "Refreshed access token");
        Ok(token.access_token)
    }
}

fn expiry_from_now(expires_in: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in)
}
