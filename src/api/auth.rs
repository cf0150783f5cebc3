// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints.

use axum::{extract::State, Json};

use crate::{
    auth::TokenPair,
    error::ApiError,
    models::{LoginRequest, RefreshRequest},
    state::AppState,
};

/// Log in with username/password or an identity-provider token.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "Access and refresh tokens", body = TokenPair),
        (status = 400, description = "Invalid or missing credentials"),
        (status = 401, description = "Identity-provider token rejected"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state.sessions.login(request.into()).await?;
    Ok(Json(pair))
}

/// Exchange a refresh token for a new token pair.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "New access and refresh tokens", body = TokenPair),
        (status = 401, description = "Invalid refresh token"),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state.sessions.refresh(&request.token).await?;
    Ok(Json(pair))
}
