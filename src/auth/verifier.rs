use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::{AuthAlgorithm, AuthConfig};
use crate::error::{AppError, Result};

use super::claims::{Claims, RawClaims};

/// Verifies bearer credentials and produces [`Claims`].
///
/// Two verification modes per configuration: a symmetric shared secret (HS256) or
/// an asymmetric key fetched from a JWKS endpoint (RS256), with a cached copy
/// refreshed on an interval so a transient JWKS outage does not take down auth.
pub struct AuthVerifier {
    algorithm: AuthAlgorithm,
    hs256_key: Option<DecodingKey>,
    rs256_keys: Option<Arc<ArcSwap<HashMap<String, DecodingKey>>>>,
    static_rs256_key: Option<DecodingKey>,
    clock_skew_secs: u64,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    n: String,
    e: String,
}

impl AuthVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        match config.algorithm {
            AuthAlgorithm::Hs256 => {
                if config.secret.is_empty() {
                    return Err(AppError::Config("auth.secret is required for hs256".to_string()));
                }
                Ok(Self {
                    algorithm: AuthAlgorithm::Hs256,
                    hs256_key: Some(DecodingKey::from_secret(config.secret.as_bytes())),
                    rs256_keys: None,
                    static_rs256_key: None,
                    clock_skew_secs: config.clock_skew_secs,
                })
            }
            AuthAlgorithm::Rs256 => {
                let static_rs256_key = match &config.public_key_pem {
                    Some(pem) => Some(
                        DecodingKey::from_rsa_pem(pem.as_bytes())
                            .map_err(|e| AppError::Config(format!("invalid rsa public key: {e}")))?,
                    ),
                    None => None,
                };
                let rs256_keys = if config.jwks_url.is_some() {
                    Some(Arc::new(ArcSwap::from_pointee(HashMap::new())))
                } else {
                    None
                };
                if static_rs256_key.is_none() && rs256_keys.is_none() {
                    return Err(AppError::Config(
                        "auth.public_key_pem or auth.jwks_url is required for rs256".to_string(),
                    ));
                }
                Ok(Self {
                    algorithm: AuthAlgorithm::Rs256,
                    hs256_key: None,
                    rs256_keys,
                    static_rs256_key,
                    clock_skew_secs: config.clock_skew_secs,
                })
            }
        }
    }

    /// Spawn the background JWKS refresh task, if this verifier is JWKS-backed.
    pub fn spawn_jwks_refresh(self: &Arc<Self>, jwks_url: String, refresh_secs: u64) {
        let Some(keys) = self.rs256_keys.clone() else { return };
        let client = reqwest::Client::new();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(refresh_secs.max(1)));
            loop {
                interval.tick().await;
                match fetch_jwks(&client, &jwks_url).await {
                    Ok(fetched) => keys.store(Arc::new(fetched)),
                    Err(e) => tracing::warn!(error = %e, "failed to refresh jwks, keeping cached copy"),
                }
            }
        });
    }

    /// Verify a bearer token and return its claims, or `AUTH_FAILED`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = {
            let mut v = Validation::new(match self.algorithm {
                AuthAlgorithm::Hs256 => Algorithm::HS256,
                AuthAlgorithm::Rs256 => Algorithm::RS256,
            });
            v.leeway = self.clock_skew_secs;
            v.validate_exp = true;
            v
        };

        let decoding_key = match self.algorithm {
            AuthAlgorithm::Hs256 => self
                .hs256_key
                .clone()
                .ok_or_else(|| AppError::Internal("hs256 key not configured".to_string()))?,
            AuthAlgorithm::Rs256 => self.resolve_rs256_key(token)?,
        };

        let token_data = decode::<RawClaims>(token, &decoding_key, &validation)
            .map_err(|e| AppError::AuthFailed(e.to_string()))?;
        let raw = token_data.claims;

        let issued_at = timestamp(raw.iat)?;
        let expires_at = timestamp(raw.exp)?;
        let roles = raw.known_roles();
        let scopes = raw.known_scopes();

        Ok(Claims::from_raw(raw.sub, roles, scopes, issued_at, expires_at))
    }

    /// Resolve the RSA key to verify `token` against: a statically configured
    /// public key takes priority, otherwise the cached JWKS copy is consulted by
    /// the token's `kid` header.
    fn resolve_rs256_key(&self, token: &str) -> Result<DecodingKey> {
        if let Some(key) = &self.static_rs256_key {
            return Ok(key.clone());
        }
        let keys = self
            .rs256_keys
            .as_ref()
            .ok_or_else(|| AppError::Internal("rs256 keys not configured".to_string()))?;
        let header = decode_header(token).map_err(|e| AppError::AuthFailed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::AuthFailed("token missing kid".to_string()))?;
        keys.load()
            .get(&kid)
            .cloned()
            .ok_or_else(|| AppError::AuthFailed("unknown signing key".to_string()))
    }
}

fn timestamp(value: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(value, 0)
        .single()
        .ok_or_else(|| AppError::AuthFailed("invalid timestamp in token".to_string()))
}

async fn fetch_jwks(client: &reqwest::Client, url: &str) -> Result<HashMap<String, DecodingKey>> {
    let jwks: Jwks = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::DependencyFailed(e.to_string()))?
        .json()
        .await
        .map_err(|e| AppError::DependencyFailed(e.to_string()))?;

    let mut map = HashMap::new();
    for entry in jwks.keys {
        let Some(kid) = entry.kid else { continue };
        if let Ok(key) = DecodingKey::from_rsa_components(&entry.n, &entry.e) {
            map.insert(kid, key);
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn hs256_verifier(secret: &str) -> AuthVerifier {
        AuthVerifier::new(&AuthConfig {
            algorithm: AuthAlgorithm::Hs256,
            secret: secret.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn token_with_role(secret: &str, role: &str, skew_secs: i64) -> String {
        let now = Utc::now();
        let claims = json!({
            "sub": "user-1",
            "iat": now.timestamp(),
            "exp": (now + chrono::Duration::seconds(skew_secs)).timestamp(),
            "roles": [role],
        });
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn viewer_role_implies_read_scope_only() {
        let verifier = hs256_verifier("s3cret");
        let token = token_with_role("s3cret", "viewer", 300);
        let claims = verifier.verify(&token).unwrap();
        assert!(claims.has_scope(crate::auth::claims::Scope::Read));
        assert!(!claims.has_scope(crate::auth::claims::Scope::Control));
    }

    #[test]
    fn admin_role_implies_all_scopes() {
        let verifier = hs256_verifier("s3cret");
        let token = token_with_role("s3cret", "admin", 300);
        let claims = verifier.verify(&token).unwrap();
        assert!(claims.has_scope(crate::auth::claims::Scope::AdminOps));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = hs256_verifier("s3cret");
        let token = token_with_role("s3cret", "viewer", -120);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = hs256_verifier("s3cret");
        let token = token_with_role("wrong", "viewer", 300);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn unknown_role_is_ignored_not_rejected() {
        let verifier = hs256_verifier("s3cret");
        let now = Utc::now();
        let claims_json = json!({
            "sub": "user-1",
            "iat": now.timestamp(),
            "exp": (now + chrono::Duration::seconds(300)).timestamp(),
            "roles": ["viewer", "some_future_role"],
        });
        let token = encode(&Header::new(Algorithm::HS256), &claims_json, &EncodingKey::from_secret(b"s3cret")).unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert!(claims.has_scope(crate::auth::claims::Scope::Read));
        assert!(!claims.has_scope(crate::auth::claims::Scope::Control));
        assert_eq!(claims.roles.len(), 1);
    }

    #[test]
    fn unknown_scope_is_ignored_not_rejected() {
        let verifier = hs256_verifier("s3cret");
        let now = Utc::now();
        let claims_json = json!({
            "sub": "user-1",
            "iat": now.timestamp(),
            "exp": (now + chrono::Duration::seconds(300)).timestamp(),
            "roles": ["viewer"],
            "scopes": ["control", "some_future_scope"],
        });
        let token = encode(&Header::new(Algorithm::HS256), &claims_json, &EncodingKey::from_secret(b"s3cret")).unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert!(claims.has_scope(crate::auth::claims::Scope::Read));
        assert!(claims.has_scope(crate::auth::claims::Scope::Control));
    }
}
