//! DPoP proof construction and the per-origin nonce cache.

use crate::error::{Error, Result};
use crate::keys;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Last `DPoP-Nonce` observed from each remote origin.
///
/// Advisory only: a stale or missing entry costs one extra round trip, never
/// correctness. Safe to share across operations or not share at all.
#[derive(Debug, Clone, Default)]
pub struct NonceCache {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, origin: &str) -> Option<String> {
        self.inner.read().await.get(origin).cloned()
    }

    pub async fn insert(&self, origin: &str, nonce: impl Into<String>) {
        self.inner
            .write()
            .await
            .insert(origin.to_string(), nonce.into());
    }
}

/// The `scheme://host[:port]` origin a nonce is scoped to.
pub fn origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Create a DPoP proof bound to one outgoing call.
///
/// The proof binds to the method and the path (query and fragment stripped),
/// hashes the access token into `ath` when one is in play, and carries the
/// server nonce when the caller has one. Never reuse a proof: the `jti` is
/// what the server replay-checks.
pub fn create_proof(
    method: &str,
    url: &Url,
    access_token: Option<&str>,
    nonce: Option<&str>,
    dpop_jwk: &jose_jwk::Jwk,
) -> Result<String> {
    let now = Utc::now().timestamp();
    let jti = generate_random_string(32);

    // htu binds to the path, not the query
    let mut htu = url.clone();
    htu.set_query(None);
    htu.set_fragment(None);

    let jkt = keys::thumbprint(dpop_jwk)?;

    // Hash the access token if provided (token-bound requests)
    let ath = access_token.map(|token| {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    });

    // Prefer the audience baked into the token; fall back to the origin.
    let aud = access_token
        .and_then(token_audience)
        .unwrap_or_else(|| origin(url));

    let mut claims = serde_json::json!({
        "htm": method,
        "htu": htu.as_str(),
        "jkt": jkt,
        "iat": now,
        "jti": jti,
        "aud": aud,
    });
    if let Some(ath) = ath {
        claims["ath"] = serde_json::Value::String(ath);
    }
    if let Some(nonce) = nonce {
        claims["nonce"] = serde_json::Value::String(nonce.to_string());
    }

    let public_jwk = keys::public_jwk(dpop_jwk);
    let jwk_value = serde_json::to_value(&public_jwk)
        .map_err(|e| Error::InvalidKey(format!("failed to serialize JWK: {}", e)))?;
    let header = serde_json::json!({
        "typ": "dpop+jwt",
        "alg": "ES256",
        "jwk": jwk_value,
    });

    let signing_key = keys::signing_key(dpop_jwk)?;
    keys::sign_compact(&header, &claims, &signing_key)
}

/// Read the `aud` claim out of an access token without verifying it.
///
/// The token is opaque to this client; the claim is only a routing hint, so
/// skipping signature verification is fine here.
pub fn token_audience(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let payload_b64 = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return None,
    };
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    match claims.get("aud")? {
        serde_json::Value::String(aud) => Some(aud.clone()),
        serde_json::Value::Array(auds) => auds.first()?.as_str().map(String::from),
        _ => None,
    }
}

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub(crate) fn generate_random_string(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_dpop_key;

    fn decode_claims(proof: &str) -> serde_json::Value {
        let payload = proof.split('.').nth(1).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
    }

    fn decode_header(proof: &str) -> serde_json::Value {
        let header = proof.split('.').next().unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap()
    }

    #[test]
    fn ath_is_the_urlsafe_sha256_of_the_token() {
        let jwk = generate_dpop_key().unwrap();
        let url: Url = "https://pds.example.com/xrpc/com.atproto.repo.createRecord"
            .parse()
            .unwrap();
        let token = "opaque-access-token";

        let proof = create_proof("POST", &url, Some(token), None, &jwk).unwrap();
        let claims = decode_claims(&proof);

        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(claims["ath"], expected);

        // Deterministic: a second proof for the same token hashes identically.
        let proof2 = create_proof("GET", &url, Some(token), None, &jwk).unwrap();
        assert_eq!(decode_claims(&proof2)["ath"], expected);
    }

    #[test]
    fn jkt_is_stable_across_methods_urls_and_nonces() {
        let jwk = generate_dpop_key().unwrap();
        let a: Url = "https://pds.example.com/a".parse().unwrap();
        let b: Url = "https://other.example.com/b".parse().unwrap();

        let p1 = create_proof("POST", &a, Some("t"), None, &jwk).unwrap();
        let p2 = create_proof("DELETE", &b, Some("t"), Some("nonce-1"), &jwk).unwrap();
        assert_eq!(decode_claims(&p1)["jkt"], decode_claims(&p2)["jkt"]);
    }

    #[test]
    fn htu_strips_query_and_fragment() {
        let jwk = generate_dpop_key().unwrap();
        let url: Url = "https://pds.example.com/xrpc/com.atproto.repo.getRecord?repo=did:plc:x&rkey=3k#frag"
            .parse()
            .unwrap();
        let proof = create_proof("GET", &url, None, None, &jwk).unwrap();
        assert_eq!(
            decode_claims(&proof)["htu"],
            "https://pds.example.com/xrpc/com.atproto.repo.getRecord"
        );
    }

    #[test]
    fn nonce_appears_only_when_supplied() {
        let jwk = generate_dpop_key().unwrap();
        let url: Url = "https://pds.example.com/x".parse().unwrap();

        let without = create_proof("POST", &url, Some("t"), None, &jwk).unwrap();
        assert!(decode_claims(&without).get("nonce").is_none());

        let with = create_proof("POST", &url, Some("t"), Some("server-nonce"), &jwk).unwrap();
        assert_eq!(decode_claims(&with)["nonce"], "server-nonce");
    }

    #[test]
    fn jti_is_fresh_per_proof() {
        let jwk = generate_dpop_key().unwrap();
        let url: Url = "https://pds.example.com/x".parse().unwrap();
        let p1 = create_proof("POST", &url, Some("t"), None, &jwk).unwrap();
        let p2 = create_proof("POST", &url, Some("t"), None, &jwk).unwrap();
        assert_ne!(decode_claims(&p1)["jti"], decode_claims(&p2)["jti"]);
    }

    #[test]
    fn aud_prefers_token_claim_and_falls_back_to_origin() {
        let jwk = generate_dpop_key().unwrap();
        let url: Url = "https://pds.example.com/xrpc/x".parse().unwrap();

        // A structurally JWT-ish token whose payload carries an aud claim.
        let payload = URL_SAFE_NO_PAD.encode(r#"{"aud":"did:web:pds.example.com"}"#);
        let jwt_token = format!("eyJhbGciOiJFUzI1NiJ9.{}.c2ln", payload);
        let proof = create_proof("POST", &url, Some(&jwt_token), None, &jwk).unwrap();
        assert_eq!(decode_claims(&proof)["aud"], "did:web:pds.example.com");

        // An opaque token yields the target origin instead.
        let proof = create_proof("POST", &url, Some("not-a-jwt"), None, &jwk).unwrap();
        assert_eq!(decode_claims(&proof)["aud"], "https://pds.example.com");
    }

    #[test]
    fn header_embeds_public_key_only() {
        let jwk = generate_dpop_key().unwrap();
        let url: Url = "https://pds.example.com/x".parse().unwrap();
        let proof = create_proof("POST", &url, None, None, &jwk).unwrap();
        let header = decode_header(&proof);
        assert_eq!(header["typ"], "dpop+jwt");
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["jwk"]["kty"], "EC");
        assert!(header["jwk"].get("d").is_none());
    }

    #[tokio::test]
    async fn nonce_cache_is_keyed_by_origin() {
        let cache = NonceCache::new();
        let a: Url = "https://pds-a.example.com/xrpc/x".parse().unwrap();
        let b: Url = "https://pds-b.example.com/xrpc/x".parse().unwrap();

        cache.insert(&origin(&a), "nonce-a").await;
        assert_eq!(cache.get(&origin(&a)).await.as_deref(), Some("nonce-a"));
        assert_eq!(cache.get(&origin(&b)).await, None);

        cache.insert(&origin(&a), "nonce-a2").await;
        assert_eq!(cache.get(&origin(&a)).await.as_deref(), Some("nonce-a2"));
    }
}
