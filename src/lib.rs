// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Postboard Server - Credential and Session Authority
//!
//! This crate provides account authentication for the Postboard social app:
//! password and federated login, short-lived access tokens with refresh,
//! and password reset by email.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Hashing, tokens, federated verification and the session authority
//! - `storage` - User store (redb)
//! - `tasks` - Background job queue for mail and avatar downloads

pub mod api;
pub mod auth;
pub mod avatar;
pub mod config;
pub mod error;
pub mod logging;
pub mod mail;
pub mod models;
pub mod state;
pub mod storage;
pub mod tasks;
