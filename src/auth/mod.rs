// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Credential and session handling for the Postboard API.
//!
//! ## Auth Flow
//!
//! 1. Client logs in with username/password or an identity-provider token
//! 2. Server returns an access token (60 min) and a refresh token (7 days)
//! 3. Client sends `Authorization: Bearer <access token>`
//! 4. Server:
//!    - Verifies signature, expiry and token kind
//!    - Resolves `sub` (email) to the stored user
//!
//! ## Security
//!
//! - Passwords are stored as Argon2id PHC strings
//! - Tokens are HMAC-signed; no server-side session state
//! - Identity-provider tokens are verified against the provider's JWKS
//! - Every token failure is reported without detail

pub mod error;
pub mod extractor;
pub mod federated;
pub mod jwks;
pub mod password;
pub mod session;
pub mod tokens;

pub use error::{AuthError, AuthResult};
pub use extractor::CurrentUser;
pub use federated::{FederatedIdentity, FederatedVerifier, FirebaseVerifier};
pub use jwks::JwksManager;
pub use password::{validate_password, CredentialHasher, PasswordRule};
pub use session::{LoginCredentials, SessionAuthority, TokenPair};
pub use tokens::{Claims, Clock, SystemClock, TokenCodec, TokenKind};
