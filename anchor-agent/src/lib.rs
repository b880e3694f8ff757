//! # anchor-agent
//!
//! The authenticated-call core for the anchor check-in app: everything needed
//! to make DPoP-bound OAuth calls against a user's PDS without the callers
//! touching tokens, keys, or nonces.
//!
//! ## Features
//!
//! - **DPoP proofs**: ES256-signed, single-use proofs bound to method, URL,
//!   access token, and the server's current nonce
//! - **Nonce negotiation**: per-origin nonce cache with a single speculative
//!   retry when the PDS demands a nonce
//! - **Session lifecycle**: one refresh-and-retry on auth failure, never more
//! - **Pluggable storage and transport**: abstract traits for session
//!   persistence and the HTTP client, so tests run against scripted doubles

pub mod agent;
pub mod config;
pub mod dpop;
pub mod error;
pub mod keys;
pub mod session;
pub mod store;

pub use agent::{Agent, HttpClient, HttpRequest, HttpResponse, RequestBody};
pub use config::AgentConfig;
pub use dpop::NonceCache;
pub use error::{Error, Result};
pub use session::{Session, SessionState};
pub use store::{MemorySessionStore, SessionStore};
