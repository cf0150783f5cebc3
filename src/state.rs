// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{JwksManager, SessionAuthority};
use crate::storage::UserStore;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionAuthority,
    pub users: Arc<dyn UserStore>,
    /// Provider key cache, present when federated login is enabled
    pub jwks: Option<Arc<JwksManager>>,
    pub data_dir: PathBuf,
    /// Uploaded and downloaded icons, served under `/static/icons`
    pub icons_dir: PathBuf,
}

impl AppState {
    pub fn new(
        sessions: SessionAuthority,
        users: Arc<dyn UserStore>,
        data_dir: PathBuf,
        icons_dir: PathBuf,
    ) -> Self {
        Self {
            sessions,
            users,
            jwks: None,
            data_dir,
            icons_dir,
        }
    }

    pub fn with_jwks(mut self, jwks: Arc<JwksManager>) -> Self {
        self.jwks = Some(jwks);
        self
    }
}
