//! JWK helpers: key generation, RFC 7638 thumbprints, and compact ES256
//! signing for DPoP proofs.

use crate::error::{Error, Result};
use base64::prelude::*;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};

/// Generate a fresh P-256 keypair as a private JWK (x, y, d).
pub fn generate_dpop_key() -> Result<jose_jwk::Jwk> {
    use rand::rngs::OsRng;
    let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);

    let verifying_key = signing_key.verifying_key();
    let encoded_point = verifying_key.to_encoded_point(false);
    let x = encoded_point
        .x()
        .ok_or_else(|| Error::InvalidKey("missing x coordinate".to_string()))?;
    let y = encoded_point
        .y()
        .ok_or_else(|| Error::InvalidKey("missing y coordinate".to_string()))?;
    let d_bytes = signing_key.to_bytes();

    Ok(jose_jwk::Jwk {
        key: jose_jwk::Key::Ec(jose_jwk::Ec {
            crv: jose_jwk::EcCurves::P256,
            x: jose_jwk::jose_b64::serde::Bytes::from(x.iter().as_slice().to_vec()),
            y: jose_jwk::jose_b64::serde::Bytes::from(y.iter().as_slice().to_vec()),
            d: Some(jose_jwk::jose_b64::serde::Secret::from(
                d_bytes.iter().as_slice().to_vec(),
            )),
        }),
        prm: jose_jwk::Parameters::default(),
    })
}

/// Public-only copy of a JWK: keeps crv/x/y, strips the private d member.
pub fn public_jwk(jwk: &jose_jwk::Jwk) -> jose_jwk::Jwk {
    jose_jwk::Jwk {
        key: match &jwk.key {
            jose_jwk::Key::Ec(ec) => jose_jwk::Key::Ec(jose_jwk::Ec {
                crv: ec.crv.clone(),
                x: ec.x.clone(),
                y: ec.y.clone(),
                d: None,
            }),
            _ => jwk.key.clone(),
        },
        prm: jwk.prm.clone(),
    }
}

/// Extract the P-256 secret signing key from a private JWK.
///
/// Malformed key material is fatal; nothing upstream retries this.
pub fn signing_key(jwk: &jose_jwk::Jwk) -> Result<p256::ecdsa::SigningKey> {
    match jose_jwk::crypto::Key::try_from(&jwk.key)
        .map_err(|e| Error::InvalidKey(format!("{:?}", e)))?
    {
        jose_jwk::crypto::Key::P256(jose_jwk::crypto::Kind::Secret(secret)) => {
            Ok(p256::ecdsa::SigningKey::from(secret))
        }
        _ => Err(Error::InvalidKey(
            "DPoP key must be a P256 secret key".to_string(),
        )),
    }
}

/// Compute the RFC 7638 thumbprint of a JWK.
pub fn thumbprint(jwk: &jose_jwk::Jwk) -> Result<String> {
    let jwk_value = serde_json::to_value(jwk)
        .map_err(|e| Error::InvalidKey(format!("failed to serialize JWK: {}", e)))?;
    thumbprint_from_json(&jwk_value)
}

/// Compute the RFC 7638 thumbprint from a JWK in JSON form.
pub fn thumbprint_from_json(jwk: &serde_json::Value) -> Result<String> {
    let kty = jwk
        .get("kty")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidKey("JWK missing kty field".to_string()))?;

    // Canonical representation per RFC 7638: only the required members for
    // the key type, in lexicographic order.
    let canonical = match kty {
        "EC" => {
            let crv = jwk
                .get("crv")
                .ok_or_else(|| Error::InvalidKey("EC JWK missing crv".to_string()))?;
            let x = jwk
                .get("x")
                .ok_or_else(|| Error::InvalidKey("EC JWK missing x".to_string()))?;
            let y = jwk
                .get("y")
                .ok_or_else(|| Error::InvalidKey("EC JWK missing y".to_string()))?;

            serde_json::json!({
                "crv": crv,
                "kty": kty,
                "x": x,
                "y": y,
            })
        }
        "RSA" => {
            let e = jwk
                .get("e")
                .ok_or_else(|| Error::InvalidKey("RSA JWK missing e".to_string()))?;
            let n = jwk
                .get("n")
                .ok_or_else(|| Error::InvalidKey("RSA JWK missing n".to_string()))?;

            serde_json::json!({
                "e": e,
                "kty": kty,
                "n": n,
            })
        }
        "OKP" => {
            let crv = jwk
                .get("crv")
                .ok_or_else(|| Error::InvalidKey("OKP JWK missing crv".to_string()))?;
            let x = jwk
                .get("x")
                .ok_or_else(|| Error::InvalidKey("OKP JWK missing x".to_string()))?;

            serde_json::json!({
                "crv": crv,
                "kty": kty,
                "x": x,
            })
        }
        _ => {
            return Err(Error::InvalidKey(format!(
                "unsupported JWK key type: {}",
                kty
            )));
        }
    };

    let canonical_json = serde_json::to_string(&canonical)
        .map_err(|e| Error::InvalidKey(format!("failed to serialize JWK: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    let hash = hasher.finalize();

    Ok(BASE64_URL_SAFE_NO_PAD.encode(hash))
}

/// Sign a compact JWS (header.payload.signature) with ES256.
pub fn sign_compact(
    header: &serde_json::Value,
    claims: &serde_json::Value,
    signing_key: &p256::ecdsa::SigningKey,
) -> Result<String> {
    use p256::ecdsa::signature::Signer;

    let header_json = serde_json::to_string(header)
        .map_err(|e| Error::SigningFailed(format!("failed to serialize header: {}", e)))?;
    let claims_json = serde_json::to_string(claims)
        .map_err(|e| Error::SigningFailed(format!("failed to serialize claims: {}", e)))?;

    let header_b64 = BASE64_URL_SAFE_NO_PAD.encode(&header_json);
    let payload_b64 = BASE64_URL_SAFE_NO_PAD.encode(&claims_json);
    let signature_input = format!("{}.{}", header_b64, payload_b64);

    let signature: p256::ecdsa::Signature = signing_key.sign(signature_input.as_bytes());
    let signature_b64 = BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes());

    Ok(format!("{}.{}.{}", header_b64, payload_b64, signature_b64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbprint_is_stable_for_a_fixed_key() {
        let jwk = generate_dpop_key().unwrap();
        let a = thumbprint(&jwk).unwrap();
        let b = thumbprint(&jwk).unwrap();
        assert_eq!(a, b);
        // The private member must not feed into the thumbprint.
        let public = public_jwk(&jwk);
        assert_eq!(a, thumbprint(&public).unwrap());
    }

    #[test]
    fn thumbprint_matches_rfc7638_example() {
        // The RSA key from RFC 7638 §3.1 and its published thumbprint.
        let jwk = serde_json::json!({
            "kty": "RSA",
            "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
            "e": "AQAB",
            "alg": "RS256",
            "kid": "2011-04-29"
        });
        assert_eq!(
            thumbprint_from_json(&jwk).unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn signed_jws_verifies_with_the_public_half() {
        use p256::ecdsa::signature::Verifier;

        let jwk = generate_dpop_key().unwrap();
        let key = signing_key(&jwk).unwrap();
        let jws = sign_compact(
            &serde_json::json!({"alg": "ES256", "typ": "dpop+jwt"}),
            &serde_json::json!({"htm": "POST"}),
            &key,
        )
        .unwrap();

        let parts: Vec<&str> = jws.split('.').collect();
        assert_eq!(parts.len(), 3);
        let message = format!("{}.{}", parts[0], parts[1]);
        let sig_bytes = BASE64_URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        let sig = p256::ecdsa::Signature::from_bytes(sig_bytes.as_slice().into()).unwrap();
        key.verifying_key().verify(message.as_bytes(), &sig).unwrap();
    }

    #[test]
    fn signing_key_rejects_public_only_jwk() {
        let jwk = generate_dpop_key().unwrap();
        let public = public_jwk(&jwk);
        assert!(signing_key(&public).is_err());
    }
}
