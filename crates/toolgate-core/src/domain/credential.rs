//! Credential record - per-backend authorization material.
//!
//! One record per backend. Token values are encrypted at rest by the storage
//! layer; this entity holds the decrypted form.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Authorization material for a single backend.
///
/// Carries both the issued tokens and the registration details needed to
/// refresh them. Interactive authorization is never driven from here - when
/// a refresh is impossible the caller is pointed at `authorize_url` and must
/// push a fresh record out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Backend this credential belongs to.
    pub backend: String,

    /// Token scheme, e.g. "Bearer".
    pub token_type: String,

    pub access_token: String,

    pub refresh_token: Option<String>,

    /// Absolute expiry of the access token. `None` means non-expiring.
    pub expires_at: Option<DateTime<Utc>>,

    pub scope: Option<String>,

    /// Registered client identifier at the authorization endpoint.
    pub client_id: String,

    pub client_secret: Option<String>,

    pub redirect_uri: Option<String>,

    /// Where a human completes authorization when refresh is impossible.
    pub authorize_url: String,

    /// Endpoint for refresh-token grants.
    pub token_url: String,

    /// Proof-of-possession verifier from the original authorization.
    /// Refresh grants do not need it; its absence only matters when a caller
    /// tries to redeem an authorization code.
    pub pkce_verifier: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Create a bearer-token record with the registration details needed for
    /// refresh.
    pub fn bearer(
        backend: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        client_id: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            backend: backend.into(),
            token_type: "Bearer".to_string(),
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            scope: None,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            pkce_verifier: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the access token expires within `margin` from now.
    /// Non-expiring tokens never report expiry.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(exp) => exp <= Utc::now() + margin,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Apply a rotation from a refresh response. A missing refresh token in
    /// the response keeps the previous one.
    pub fn apply_rotation(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.access_token = access_token;
        if let Some(rt) = refresh_token {
            self.refresh_token = Some(rt);
        }
        self.expires_at = expires_at;
        self.updated_at = Utc::now();
    }
}
