// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated users.
//!
//! Use the `CurrentUser` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn me(CurrentUser(user): CurrentUser) -> impl IntoResponse {
//!     // user is the stored User the access token belongs to
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::AuthError;
use crate::state::AppState;
use crate::storage::User;

/// The user owning the request's bearer access token.
///
/// Rejects with [`AuthError::Unauthorized`] (401 + `WWW-Authenticate: Bearer`)
/// when the header is missing or malformed, or the token does not resolve.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::Unauthorized)?;
        let user = state.sessions.resolve(token).await?;
        Ok(CurrentUser(user))
    }
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
