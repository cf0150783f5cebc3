// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching for the identity provider.
//!
//! ## Security
//!
//! - JWKS is fetched via HTTPS (rustls)
//! - Keys are cached with a configurable TTL
//! - A `kid` missing from the cached set forces one refetch, which covers
//!   provider key rotation between cache refreshes

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Timeout for a single JWKS request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// JWKS errors. These never reach clients; the federated verifier collapses
/// them into a single rejection.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("failed to fetch JWKS: {0}")]
    Fetch(String),

    #[error("no matching key in JWKS")]
    NoMatchingKey,

    #[error("unusable key in JWKS: {0}")]
    UnsupportedKey(String),
}

/// JWKS cache entry.
struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// JWKS manager with caching.
#[derive(Clone)]
pub struct JwksManager {
    /// JWKS URL
    jwks_url: String,
    /// Cache TTL
    cache_ttl: Duration,
    /// Cached JWKS
    cache: Arc<RwLock<Option<CacheEntry>>>,
    /// HTTP client
    client: reqwest::Client,
}

impl JwksManager {
    /// Create a new JWKS manager for the given endpoint.
    pub fn new(jwks_url: impl Into<String>) -> Result<Self, JwksError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| JwksError::Fetch(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            jwks_url: jwks_url.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(None)),
            client,
        })
    }

    /// Fetch JWKS (with caching).
    async fn get_jwks(&self) -> Result<JwkSet, JwksError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = &*cache {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.jwks.clone());
                }
            }
        }

        self.refresh_and_get().await
    }

    async fn refresh_and_get(&self) -> Result<JwkSet, JwksError> {
        let jwks = self.fetch_jwks().await?;
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch_jwks(&self) -> Result<JwkSet, JwksError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        tracing::debug!(url = %self.jwks_url, keys = jwks.keys.len(), "Fetched JWKS");
        Ok(jwks)
    }

    /// Get a decoding key for the given key ID.
    pub async fn get_decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), JwksError> {
        let jwks = self.get_jwks().await?;
        if let Some(jwk) = find_key(&jwks, kid) {
            return jwk_to_decoding_key(jwk);
        }

        // Unknown kid: the provider may have rotated keys since our fetch
        let jwks = self.refresh_and_get().await?;
        let jwk = find_key(&jwks, kid).ok_or(JwksError::NoMatchingKey)?;
        jwk_to_decoding_key(jwk)
    }

    /// Force refresh the JWKS cache.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        self.refresh_and_get().await.map(|_| ())
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        let cache = self.cache.read().await;
        if let Some(entry) = &*cache {
            entry.fetched_at.elapsed() < self.cache_ttl
        } else {
            false
        }
    }

    /// Seed the cache with a key set.
    #[cfg(test)]
    pub(crate) async fn prime(&self, jwks: JwkSet) {
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks,
            fetched_at: Instant::now(),
        });
    }
}

fn find_key<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), JwksError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| JwksError::UnsupportedKey(format!("RSA key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                _ => Algorithm::RS256,
            };

            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| JwksError::UnsupportedKey(format!("EC key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };

            Ok((key, alg))
        }
        _ => Err(JwksError::UnsupportedKey(
            "unsupported key type".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_jwks(kid: &str) -> JwkSet {
        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "kid": kid,
                "use": "sig",
                "alg": "RS256",
                "n": "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw",
                "e": "AQAB"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn jwks_manager_creation() {
        let manager = JwksManager::new("https://example.com/.well-known/jwks.json").unwrap();
        assert_eq!(manager.jwks_url, "https://example.com/.well-known/jwks.json");
        assert_eq!(manager.cache_ttl, DEFAULT_CACHE_TTL);
    }

    #[tokio::test]
    async fn cache_initially_empty() {
        let manager = JwksManager::new("https://example.com/.well-known/jwks.json").unwrap();
        assert!(!manager.is_cached().await);
    }

    #[tokio::test]
    async fn primed_cache_serves_matching_key() {
        let manager = JwksManager::new("https://invalid.invalid/jwks.json").unwrap();
        manager.prime(rsa_jwks("key-1")).await;
        assert!(manager.is_cached().await);

        let (_, alg) = manager.get_decoding_key("key-1").await.unwrap();
        assert_eq!(alg, Algorithm::RS256);
    }

    #[tokio::test]
    async fn unknown_kid_refetches_and_fails_when_unreachable() {
        let manager = JwksManager::new("http://127.0.0.1:9/jwks.json").unwrap();
        manager.prime(rsa_jwks("key-1")).await;
        let result = manager.get_decoding_key("key-2").await;
        assert!(matches!(result, Err(JwksError::Fetch(_))));
    }
}
