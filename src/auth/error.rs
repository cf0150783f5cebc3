// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::password::PasswordRule;
use crate::storage::StoreError;

/// Authentication error type.
///
/// Signature and expiry failures are deliberately undifferentiated
/// (`InvalidToken`), as are identity-provider failures
/// (`InvalidFederatedToken`).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Token signature invalid, expired, malformed or of the wrong kind
    #[error("Invalid or expired token")]
    InvalidToken,
    /// Identity provider rejected the token (or could not be reached)
    #[error("Invalid federated identity token")]
    InvalidFederatedToken,
    /// Unknown user, federated-only account or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// Neither a federated token nor a username/password pair was supplied
    #[error("Missing login credentials")]
    MissingCredentials,
    /// Refresh token invalid or its subject no longer exists
    #[error("Invalid refresh token")]
    InvalidRefreshToken,
    /// Reset token invalid or expired
    #[error("Invalid or expired reset token")]
    InvalidResetToken,
    #[error("User not found")]
    UserNotFound,
    #[error("Username or email already registered")]
    DuplicateUser,
    #[error("Password too weak: {0}")]
    WeakPassword(PasswordRule),
    /// Reset token was issued for a different account
    #[error("Reset token does not belong to this account")]
    TokenUserMismatch,
    #[error("Not authenticated")]
    Unauthorized,
    /// Anything else. The detail is logged, never returned to clients.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidToken => "invalid_token",
            AuthError::InvalidFederatedToken => "invalid_federated_token",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::InvalidResetToken => "invalid_reset_token",
            AuthError::UserNotFound => "user_not_found",
            AuthError::DuplicateUser => "duplicate_user",
            AuthError::WeakPassword(_) => "weak_password",
            AuthError::TokenUserMismatch => "token_user_mismatch",
            AuthError::Unauthorized => "unauthorized",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidToken
            | AuthError::InvalidFederatedToken
            | AuthError::InvalidRefreshToken
            | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::InvalidCredentials
            | AuthError::MissingCredentials
            | AuthError::InvalidResetToken
            | AuthError::TokenUserMismatch => StatusCode::BAD_REQUEST,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::DuplicateUser => StatusCode::CONFLICT,
            AuthError::WeakPassword(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-safe message. Internal detail is replaced by a generic text.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => AuthError::DuplicateUser,
            StoreError::NotFound(_) => AuthError::UserNotFound,
            other => {
                tracing::error!(error = %other, "User store failure");
                AuthError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.client_message(),
            error_code: self.error_code().to_string(),
        });
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn unauthorized_returns_401_with_challenge() {
        let response = AuthError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "unauthorized");
    }

    #[tokio::test]
    async fn internal_detail_is_not_exposed() {
        let response = AuthError::Internal("redb: disk full at /data".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["error_code"], "internal_error");
    }

    #[test]
    fn weak_password_names_rule() {
        let err = AuthError::WeakPassword(PasswordRule::MissingDigit);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.to_string().contains("digit"));
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        assert!(matches!(
            AuthError::from(StoreError::Duplicate("email")),
            AuthError::DuplicateUser
        ));
        assert!(matches!(
            AuthError::from(StoreError::NotFound("user 7".into())),
            AuthError::UserNotFound
        ));
    }
}
