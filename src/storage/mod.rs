// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # User Storage
//!
//! The session authority depends only on the [`UserStore`] trait. The
//! production implementation is [`RedbUserStore`], an embedded ACID database
//! file under `DATA_DIR`.
//!
//! ## Table Layout
//!
//! ```text
//! users           id → serialized User (JSON bytes)
//! email_index     email → id
//! username_index  username → id
//! public_id_index public_id → id
//! sequences       "user_id" → last assigned id
//! ```
//!
//! Uniqueness of email and username is checked inside the same write
//! transaction that inserts the row, so concurrent creations of the same
//! account cannot both succeed.

pub mod users;

pub use users::{
    NewUser, ProfileUpdate, RedbUserStore, StoreError, StoreResult, User, UserId, UserStore,
};
