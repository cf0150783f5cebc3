// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token codec for access, refresh and password-reset JWTs.
//!
//! Tokens are compact HMAC-signed JWTs carrying `sub`, `exp`, `iat` and a
//! private `kind` claim. Claims are signed, not encrypted.
//!
//! Expiry is checked against the codec's [`Clock`] rather than inside
//! `jsonwebtoken`, so tests can pin time.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{AuthError, AuthResult};
use crate::config::TokenConfig;

/// Claim names owned by the codec; callers cannot override them.
const RESERVED_CLAIMS: [&str; 4] = ["sub", "exp", "iat", "kind"];

/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Authorizes API requests
    Access,
    /// Mints new access/refresh pairs
    Refresh,
    /// Authorizes one password reset
    Reset,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
            TokenKind::Reset => write!(f, "reset"),
        }
    }
}

/// Decoded token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Email for access/refresh tokens, public id for reset tokens
    pub sub: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    pub iat: i64,
    pub kind: TokenKind,
    /// Any additional claims supplied at issue time
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Signs and verifies tokens with a process-wide symmetric key.
#[derive(Clone)]
pub struct TokenCodec {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(config: TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for `iat`/`exp` and expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured lifetime of a token kind.
    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.config.access_ttl,
            TokenKind::Refresh => self.config.refresh_ttl,
            TokenKind::Reset => self.config.reset_ttl,
        }
    }

    /// Issue a token for `subject`.
    pub fn issue(&self, subject: &str, kind: TokenKind) -> AuthResult<String> {
        self.issue_with_claims(subject, kind, Map::new())
    }

    /// Issue a token carrying additional claims. Reserved claim names in
    /// `extra` are dropped.
    pub fn issue_with_claims(
        &self,
        subject: &str,
        kind: TokenKind,
        mut extra: Map<String, Value>,
    ) -> AuthResult<String> {
        for name in RESERVED_CLAIMS {
            extra.remove(name);
        }

        let now = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            exp: now + self.lifetime(kind).num_seconds(),
            iat: now,
            kind,
            extra,
        };

        encode(
            &Header::new(self.config.algorithm),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| AuthError::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify signature and expiry.
    ///
    /// Every failure is reported as [`AuthError::InvalidToken`].
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::new(self.config.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.exp <= self.clock.now() {
            tracing::debug!(kind = %claims.kind, "Token rejected: expired");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    /// Verify and additionally require a specific token kind.
    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> AuthResult<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            tracing::debug!(expected = %kind, actual = %claims.kind, "Token rejected: wrong kind");
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}
