// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Federated identity verification.
//!
//! The identity provider is a black box: every failure, whether a network
//! error, a timeout, a bad signature or a token without an email, becomes
//! [`AuthError::InvalidFederatedToken`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;

use super::error::{AuthError, AuthResult};
use super::jwks::JwksManager;
use crate::config::FederatedConfig;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Identity asserted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    /// Provider-side user id
    pub external_uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
}

/// Verifies identity-provider tokens.
#[async_trait]
pub trait FederatedVerifier: Send + Sync {
    async fn verify(&self, provider_token: &str) -> AuthResult<FederatedIdentity>;
}

/// Claims of a Firebase / Google secure token ID token.
#[derive(Debug, Deserialize)]
struct ProviderClaims {
    /// Firebase uid
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Reasons a provider token was rejected; logged, never returned.
#[derive(Debug, thiserror::Error)]
enum RejectReason {
    #[error("malformed token header: {0}")]
    Header(jsonwebtoken::errors::Error),
    #[error("token header has no kid")]
    MissingKid,
    #[error(transparent)]
    Keys(#[from] super::jwks::JwksError),
    #[error("token validation failed: {0}")]
    Validation(jsonwebtoken::errors::Error),
    #[error("token carries no email")]
    MissingEmail,
    #[error("verification timed out")]
    Timeout,
}

/// Verifies Firebase ID tokens against Google's published signing keys.
pub struct FirebaseVerifier {
    jwks: Arc<JwksManager>,
    project_id: String,
    timeout: Duration,
}

impl FirebaseVerifier {
    pub fn new(jwks: Arc<JwksManager>, config: &FederatedConfig) -> Self {
        Self {
            jwks,
            project_id: config.project_id.clone(),
            timeout: config.timeout,
        }
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    async fn verify_inner(&self, token: &str) -> Result<FederatedIdentity, RejectReason> {
        let header = decode_header(token).map_err(RejectReason::Header)?;
        let kid = header.kid.ok_or(RejectReason::MissingKid)?;
        let (decoding_key, algorithm) = self.jwks.get_decoding_key(&kid).await?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[self.issuer()]);
        validation.set_audience(&[&self.project_id]);

        let claims = decode::<ProviderClaims>(token, &decoding_key, &validation)
            .map_err(RejectReason::Validation)?
            .claims;

        let email = claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or(RejectReason::MissingEmail)?;

        Ok(FederatedIdentity {
            external_uid: claims.sub,
            email,
            display_name: claims.name.filter(|n| !n.trim().is_empty()),
            picture_url: claims.picture.filter(|p| !p.is_empty()),
        })
    }
}

#[async_trait]
impl FederatedVerifier for FirebaseVerifier {
    async fn verify(&self, provider_token: &str) -> AuthResult<FederatedIdentity> {
        let outcome = match tokio::time::timeout(self.timeout, self.verify_inner(provider_token))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RejectReason::Timeout),
        };

        outcome.map_err(|reason| {
            tracing::debug!(reason = %reason, "Federated token rejected");
            AuthError::InvalidFederatedToken
        })
    }
}
