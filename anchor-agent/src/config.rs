use std::time::Duration;

/// Configuration for an [`Agent`](crate::Agent).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// OAuth client_id sent on token refresh
    pub client_id: String,

    /// Per-call timeout for every remote request
    pub request_timeout: Duration,

    /// Refresh the access token when it expires within this many minutes
    pub refresh_buffer_minutes: i64,

    /// User-Agent header for outbound requests
    pub user_agent: String,
}

impl AgentConfig {
    /// Create a new configuration with sensible defaults
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            request_timeout: Duration::from_secs(30),
            refresh_buffer_minutes: 5,
            user_agent: format!("anchor-agent/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the per-call request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the refresh buffer in minutes
    pub fn with_refresh_buffer_minutes(mut self, minutes: i64) -> Self {
        self.refresh_buffer_minutes = minutes;
        self
    }

    /// Set the User-Agent header
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
