// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderName,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::TokenPair,
    avatar::MAX_AVATAR_BYTES,
    models::{
        AckResponse, CreateUserRequest, IconUpload, LoginRequest, PasswordChangeRequest,
        PasswordResetConfirm, PasswordResetRequest, RefreshRequest, UpdateUserRequest,
        UserResponse,
    },
    state::AppState,
};

pub mod auth;
pub mod health;
pub mod users;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Icon uploads may exceed axum's default body limit; allow room for the
/// multipart framing around a maximum-size image.
const ICON_BODY_LIMIT: usize = MAX_AVATAR_BYTES + 64 * 1024;

pub fn router(state: AppState) -> Router {
    let icons = ServeDir::new(&state.icons_dir);
    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/me", get(users::get_current_user))
        .route("/users/batch", post(users::batch_get_users))
        .route(
            "/users/request-password-reset",
            post(users::request_password_reset),
        )
        .route("/users/reset-password", post(users::reset_password))
        .route("/users/change-password", post(users::change_password))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/users/{id}/icon",
            put(users::upload_icon).layer(DefaultBodyLimit::max(ICON_BODY_LIMIT)),
        )
        .with_state(state);

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .merge(api_routes)
        .nest_service("/static/icons", icons)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

/// Registers the bearer scheme referenced by `security(("bearer" = []))`.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::login,
        auth::refresh,
        users::create_user,
        users::list_users,
        users::get_current_user,
        users::batch_get_users,
        users::get_user,
        users::update_user,
        users::upload_icon,
        users::delete_user,
        users::request_password_reset,
        users::reset_password,
        users::change_password
    ),
    components(
        schemas(
            TokenPair,
            LoginRequest,
            RefreshRequest,
            CreateUserRequest,
            UpdateUserRequest,
            UserResponse,
            IconUpload,
            PasswordResetRequest,
            PasswordResetConfirm,
            PasswordChangeRequest,
            AckResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Login and token refresh"),
        (name = "Users", description = "Account management"),
        (name = "Passwords", description = "Password reset and change")
    )
)]
struct ApiDoc;
