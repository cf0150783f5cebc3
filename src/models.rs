// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive `ToSchema`
//! for OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Sessions**: login and refresh requests
//! - **Users**: registration, profile update and the public user view
//! - **Passwords**: reset request, reset confirmation and change

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::LoginCredentials;
use crate::storage::User;

/// Longest accepted username.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Most ids accepted by one batch lookup.
pub const MAX_BATCH_IDS: usize = 100;

/// Multipart field carrying an uploaded icon.
pub const ICON_FIELD: &str = "file";

/// Acknowledgement code returned after a successful password reset.
pub const PASSWORD_RESET_CODE: &str = "AUTH_004";

// =============================================================================
// Session Models
// =============================================================================

/// Login with either a federated identity token or username and password.
///
/// When `token` is present the username and password are ignored.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Identity-provider ID token.
    #[serde(default)]
    pub token: Option<String>,
}

impl From<LoginRequest> for LoginCredentials {
    fn from(request: LoginRequest) -> Self {
        LoginCredentials {
            username: request.username,
            password: request.password,
            token: request.token,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RefreshRequest {
    /// Refresh token from a previous login.
    pub token: String,
}

// =============================================================================
// User Models
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Profile update; omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Multipart body of an icon upload.
#[derive(Debug, ToSchema)]
pub struct IconUpload {
    /// PNG, JPEG, GIF or WebP image, at most 5 MiB.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Public view of a user. Never includes the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UserResponse {
    pub id: u64,
    /// Opaque public identifier.
    pub uid: String,
    pub username: String,
    pub email: String,
    /// Avatar filename, served under `/static/icons/`.
    pub icon: Option<String>,
    /// Account was created through the identity provider.
    pub federated: bool,
    pub date_created: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            uid: user.public_id,
            username: user.username,
            email: user.email,
            icon: user.icon,
            federated: user.federated,
            date_created: user.created_at,
        }
    }
}

// =============================================================================
// Password Models
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PasswordResetConfirm {
    pub email: String,
    /// Reset token from the emailed link.
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PasswordChangeRequest {
    pub new_password: String,
}

/// Acknowledgement for operations without a resource to return.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AckResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl AckResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Whether `email` is a syntactically valid mailbox address.
pub fn is_valid_email(email: &str) -> bool {
    lettre::Address::from_str(email).is_ok()
}

/// Whether `username` is non-blank and within the length limit.
pub fn is_valid_username(username: &str) -> bool {
    let trimmed = username.trim();
    !trimmed.is_empty() && trimmed == username && username.chars().count() <= MAX_USERNAME_LENGTH
}
