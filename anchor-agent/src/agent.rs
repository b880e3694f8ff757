//! The session lifecycle manager: DPoP-stamped authenticated calls with nonce
//! negotiation and a single refresh-and-retry on auth failure.

use crate::config::AgentConfig;
use crate::dpop::{self, NonceCache};
use crate::error::{Error, Result};
use crate::session::{Session, SessionState};
use crate::store::SessionStore;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use http::Method;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Bytes { content_type: String, data: Vec<u8> },
}

/// An outgoing HTTP request, transport-agnostic.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::InvalidRequest(format!("invalid response body: {}", e)))
    }

    /// The `error` field of a JSON error body, if there is one.
    pub fn error_code(&self) -> Option<String> {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()?
            .get("error")?
            .as_str()
            .map(String::from)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport abstraction so the retry policy can be tested against a scripted
/// double instead of a live PDS.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed transport with the configured per-call timeout.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Form(pairs)) => builder.form(&pairs),
            Some(RequestBody::Bytes { content_type, data }) => builder
                .header(http::header::CONTENT_TYPE, content_type)
                .body(data),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkError(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Manages one user's session and hides token/proof mechanics from callers.
///
/// Each authenticated call gets a fresh DPoP proof. Policy, enforced here and
/// nowhere else: at most one nonce retry and at most one refresh-and-retry per
/// external call; a second failure of the same kind is surfaced.
pub struct Agent<S: SessionStore> {
    session: RwLock<Session>,
    store: Arc<S>,
    nonces: NonceCache,
    http: Arc<dyn HttpClient>,
    config: AgentConfig,
}

impl<S: SessionStore> Agent<S> {
    pub fn new(session: Session, store: Arc<S>, config: AgentConfig) -> Result<Self> {
        let http = Arc::new(ReqwestClient::new(&config)?);
        Ok(Self::with_http_client(session, store, config, http))
    }

    /// Construct with an injected transport (tests, alternative clients).
    pub fn with_http_client(
        session: Session,
        store: Arc<S>,
        config: AgentConfig,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            session: RwLock::new(session),
            store,
            nonces: NonceCache::new(),
            http,
            config,
        }
    }

    pub async fn did(&self) -> String {
        self.session.read().await.did.clone()
    }

    pub async fn pds_url(&self) -> Url {
        self.session.read().await.pds_url.clone()
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.read().await.state
    }

    pub fn nonce_cache(&self) -> &NonceCache {
        &self.nonces
    }

    /// Make one authenticated call against the user's PDS.
    ///
    /// Returns the final HTTP response, whatever its status, once the retry
    /// policy is exhausted; `Err` means transport, signing, or refresh failed.
    pub async fn authenticated_call(
        &self,
        method: Method,
        url: Url,
        body: Option<RequestBody>,
    ) -> Result<HttpResponse> {
        let origin = dpop::origin(&url);
        let mut nonce_retried = false;
        let mut refreshed = false;

        loop {
            let (token, key) = {
                let session = self.session.read().await;
                (session.access_token.clone(), session.dpop_key.clone())
            };
            let nonce = self.nonces.get(&origin).await;
            let proof =
                dpop::create_proof(method.as_str(), &url, Some(&token), nonce.as_deref(), &key)?;

            let request = HttpRequest {
                method: method.clone(),
                url: url.clone(),
                headers: vec![
                    ("Authorization".to_string(), format!("DPoP {}", token)),
                    ("DPoP".to_string(), proof),
                ],
                body: body.clone(),
            };

            let response = self.http.send(request).await?;

            // Any response nonce updates the cache, success or not.
            if let Some(new_nonce) = response.header("dpop-nonce") {
                self.nonces.insert(&origin, new_nonce).await;
            }

            if response.is_success() {
                self.session.write().await.last_used_at = Utc::now();
                return Ok(response);
            }

            let error_code = response.error_code();
            tracing::debug!(
                status = response.status,
                error = error_code.as_deref().unwrap_or(""),
                url = %url,
                "authenticated call failed"
            );

            // Nonce challenge: the server just told us the nonce to use. A
            // bare rejection carrying the header counts; only a body that
            // names a token failure routes to the refresh path instead.
            if !nonce_retried
                && (response.status == 400 || response.status == 401)
                && response.header("dpop-nonce").is_some()
                && !names_auth_failure(error_code.as_deref())
            {
                tracing::info!(origin = %origin, "PDS requires a DPoP nonce, retrying with it");
                nonce_retried = true;
                continue;
            }

            if !refreshed && is_auth_failure(response.status, error_code.as_deref()) {
                refreshed = true;
                if error_code.as_deref() == Some("invalid_dpop_key_binding") {
                    // Key rotated out of band; the stored session may already
                    // carry the replacement.
                    self.reload_session().await;
                }
                self.refresh_session().await?;
                continue;
            }

            return Ok(response);
        }
    }

    /// Refresh proactively when the access token is inside the configured
    /// expiry buffer, instead of eating a guaranteed rejection first.
    pub async fn refresh_if_needed(&self) -> Result<()> {
        let needs_refresh = {
            let session = self.session.read().await;
            session.needs_refresh(self.config.refresh_buffer_minutes)
        };
        if needs_refresh {
            self.refresh_session().await
        } else {
            Ok(())
        }
    }

    /// Refresh the access token with the refresh grant, once.
    ///
    /// `Valid -> Refreshing -> Valid` on success, `-> Invalid` on failure;
    /// an `Invalid` session needs out-of-band re-authentication. Persisting
    /// the refreshed tuple is best-effort.
    pub async fn refresh_session(&self) -> Result<()> {
        let (refresh_token, pds_url, key) = {
            let mut session = self.session.write().await;
            session.state = SessionState::Refreshing;
            let refresh_token = match session.refresh_token.clone() {
                Some(token) => token,
                None => {
                    session.state = SessionState::Invalid;
                    return Err(Error::SessionExpired);
                }
            };
            (refresh_token, session.pds_url.clone(), session.dpop_key.clone())
        };

        let token_url = pds_url
            .join("/oauth/token")
            .map_err(|e| Error::Internal(e.to_string()))?;
        let origin = dpop::origin(&token_url);
        let mut nonce = self.nonces.get(&origin).await;
        let mut nonce_retried = false;

        let response = loop {
            // No ath on token endpoint calls: the access token is not in play.
            let proof = dpop::create_proof("POST", &token_url, None, nonce.as_deref(), &key)?;
            let request = HttpRequest {
                method: Method::POST,
                url: token_url.clone(),
                headers: vec![("DPoP".to_string(), proof)],
                body: Some(RequestBody::Form(vec![
                    ("grant_type".to_string(), "refresh_token".to_string()),
                    ("refresh_token".to_string(), refresh_token.clone()),
                    ("client_id".to_string(), self.config.client_id.clone()),
                ])),
            };

            let response = match self.http.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    self.mark_invalid().await;
                    return Err(e);
                }
            };

            if let Some(new_nonce) = response.header("dpop-nonce") {
                nonce = Some(new_nonce.to_string());
                self.nonces.insert(&origin, new_nonce).await;
            }

            if !response.is_success()
                && !nonce_retried
                && (response.status == 400 || response.status == 401)
                && response.header("dpop-nonce").is_some()
            {
                nonce_retried = true;
                continue;
            }

            break response;
        };

        if !response.is_success() {
            tracing::warn!(
                status = response.status,
                "token refresh rejected: {}",
                response.body_text()
            );
            self.mark_invalid().await;
            return Err(Error::RefreshFailed(format!(
                "status {}: {}",
                response.status,
                response.body_text()
            )));
        }

        let token_response: TokenResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(e) => {
                self.mark_invalid().await;
                return Err(e);
            }
        };

        let updated = {
            let mut session = self.session.write().await;
            session.access_token = token_response.access_token;
            if let Some(refresh) = token_response.refresh_token {
                session.refresh_token = Some(refresh);
            }
            session.expires_at =
                Utc::now() + Duration::seconds(token_response.expires_in.unwrap_or(3600));
            session.last_used_at = Utc::now();
            session.state = SessionState::Valid;
            session.clone()
        };

        tracing::info!(did = %updated.did, "refreshed session tokens");

        if let Err(e) = self.store.put_session(&updated).await {
            // Only costs an extra refresh next time.
            tracing::warn!(did = %updated.did, "failed to persist refreshed session: {}", e);
        }

        Ok(())
    }

    /// Replace the in-memory session with the stored copy, if one exists.
    async fn reload_session(&self) {
        let did = self.did().await;
        match self.store.get_session(&did).await {
            Ok(Some(stored)) => {
                let mut session = self.session.write().await;
                *session = stored;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(did = %did, "failed to reload stored session: {}", e);
            }
        }
    }

    async fn mark_invalid(&self) {
        self.session.write().await.state = SessionState::Invalid;
    }
}

/// Does the error body explicitly name a token failure?
fn names_auth_failure(error_code: Option<&str>) -> bool {
    matches!(
        error_code,
        Some("invalid_token")
            | Some("invalid_grant")
            | Some("ExpiredToken")
            | Some("InvalidToken")
            | Some("invalid_dpop_key_binding")
    )
}

/// Is this the token-expired/invalid class that warrants a refresh?
fn is_auth_failure(status: u16, error_code: Option<&str>) -> bool {
    if error_code == Some("use_dpop_nonce") {
        return false;
    }
    match status {
        401 => true,
        400 => names_auth_failure(error_code),
        _ => false,
    }
}
