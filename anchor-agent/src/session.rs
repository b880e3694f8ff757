use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Lifecycle state of a session within one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Tokens believed good; calls go straight out
    Valid,
    /// An auth failure was observed; a refresh is in flight
    Refreshing,
    /// Refresh failed; the user must re-authenticate out of band
    Invalid,
}

/// One user's authenticated session against their PDS.
///
/// Owned by the [`Agent`](crate::Agent); persisted between requests through a
/// [`SessionStore`](crate::SessionStore) and reconstructed per operation.
/// Mutated in place on refresh. Concurrent operations for one identity race to
/// refresh independently; refresh is idempotent upstream, so no lock is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Current lifecycle state
    pub state: SessionState,

    /// User's DID
    pub did: String,

    /// User's handle (optional)
    pub handle: Option<String>,

    /// Base URL of the user's PDS
    pub pds_url: Url,

    /// Access token for PDS requests (short-lived)
    pub access_token: String,

    /// Refresh token for obtaining new access tokens
    pub refresh_token: Option<String>,

    /// Private DPoP key bound to this session
    pub dpop_key: jose_jwk::Jwk,

    /// When the access token expires
    pub expires_at: DateTime<Utc>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When this session was last used
    pub last_used_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        did: impl Into<String>,
        pds_url: Url,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        dpop_key: jose_jwk::Jwk,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            state: SessionState::Valid,
            did: did.into(),
            handle: None,
            pds_url,
            access_token: access_token.into(),
            refresh_token,
            dpop_key,
            expires_at,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
        }
    }

    /// Check if the access token needs refresh
    pub fn needs_refresh(&self, buffer_minutes: i64) -> bool {
        self.expires_at < Utc::now() + chrono::Duration::minutes(buffer_minutes)
    }
}
