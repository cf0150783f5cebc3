// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use std::collections::HashSet;

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::{AuthError, CurrentUser},
    avatar::{image_extension, remove_icon, store_icon, MAX_AVATAR_BYTES},
    error::ApiError,
    models::{
        is_valid_email, is_valid_username, AckResponse, CreateUserRequest, IconUpload,
        PasswordChangeRequest, PasswordResetConfirm, PasswordResetRequest, UpdateUserRequest,
        UserResponse, ICON_FIELD, MAX_BATCH_IDS, PASSWORD_RESET_CODE,
    },
    state::AppState,
    storage::{ProfileUpdate, UserId},
};

fn check_email(email: &str) -> Result<(), ApiError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(ApiError::unprocessable("Invalid email address"))
    }
}

fn check_username(username: &str) -> Result<(), ApiError> {
    if is_valid_username(username) {
        Ok(())
    } else {
        Err(ApiError::unprocessable("Invalid username"))
    }
}

/// Register a password account.
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    tag = "Users",
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 409, description = "Username or email already registered"),
        (status = 422, description = "Invalid email, username or weak password"),
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    check_username(&request.username)?;
    check_email(&request.email)?;

    let user = state
        .sessions
        .register(&request.username, &request.email, &request.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// List all users.
#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, body = [UserResponse]),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn list_users(
    CurrentUser(_caller): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.users.list().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Look up several users by id.
///
/// Results follow request order; unknown ids are skipped and repeated ids
/// appear once.
#[utoipa::path(
    post,
    path = "/users/batch",
    request_body = Vec<u64>,
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, body = [UserResponse]),
        (status = 400, description = "Too many ids"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn batch_get_users(
    CurrentUser(_caller): CurrentUser,
    State(state): State<AppState>,
    Json(ids): Json<Vec<UserId>>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    if ids.len() > MAX_BATCH_IDS {
        return Err(ApiError::bad_request(format!(
            "At most {MAX_BATCH_IDS} ids per request"
        )));
    }

    let mut seen = HashSet::new();
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            continue;
        }
        if let Some(user) = state.users.find_by_id(id).await? {
            users.push(UserResponse::from(user));
        }
    }
    Ok(Json(users))
}

/// Get the current authenticated user.
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "User information", body = UserResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn get_current_user(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.into())
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = u64, Path, description = "Internal user id")),
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, body = UserResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 404, description = "User not found"),
    )
)]
pub async fn get_user(
    CurrentUser(_caller): CurrentUser,
    Path(id): Path<UserId>,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user.into()))
}

/// Update the caller's own username or email.
///
/// Changing the email invalidates outstanding tokens, whose subject is the
/// old address.
#[utoipa::path(
    put,
    path = "/users/{id}",
    params(("id" = u64, Path, description = "Internal user id")),
    request_body = UpdateUserRequest,
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, body = UserResponse),
        (status = 403, description = "Not the caller's account"),
        (status = 409, description = "Username or email already registered"),
    )
)]
pub async fn update_user(
    CurrentUser(current): CurrentUser,
    Path(id): Path<UserId>,
    State(state): State<AppState>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if current.id != id {
        return Err(ApiError::forbidden("Cannot modify another user's account"));
    }
    if let Some(username) = &request.username {
        check_username(username)?;
    }
    if let Some(email) = &request.email {
        check_email(email)?;
    }

    let update = ProfileUpdate {
        username: request.username,
        email: request.email,
        icon: None,
    };
    let user = state.users.update_profile(id, update).await?;
    tracing::info!(user_id = id, "Profile updated");
    Ok(Json(user.into()))
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::new(err.status(), "invalid_multipart", err.body_text())
}

/// Read the icon part: its file extension and bytes.
async fn read_icon(multipart: &mut Multipart) -> Result<(&'static str, Vec<u8>), ApiError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(ICON_FIELD) {
            continue;
        }
        let extension = image_extension(field.content_type()).ok_or_else(|| {
            ApiError::unprocessable("Icon must be a PNG, JPEG, GIF or WebP image")
        })?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > MAX_AVATAR_BYTES {
                return Err(ApiError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "payload_too_large",
                    "Icon exceeds 5 MiB",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(ApiError::unprocessable("Icon is empty"));
        }
        return Ok((extension, bytes));
    }
    Err(ApiError::bad_request(format!("Missing `{ICON_FIELD}` part")))
}

/// Upload or replace the caller's own icon.
#[utoipa::path(
    put,
    path = "/users/{id}/icon",
    params(("id" = u64, Path, description = "Internal user id")),
    request_body(content = IconUpload, content_type = "multipart/form-data"),
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, body = UserResponse),
        (status = 400, description = "Malformed multipart body or missing file part"),
        (status = 403, description = "Not the caller's account"),
        (status = 413, description = "Icon exceeds 5 MiB"),
        (status = 422, description = "Unsupported image type or empty file"),
    )
)]
pub async fn upload_icon(
    CurrentUser(current): CurrentUser,
    Path(id): Path<UserId>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UserResponse>, ApiError> {
    if current.id != id {
        return Err(ApiError::forbidden("Cannot modify another user's account"));
    }

    let (extension, bytes) = read_icon(&mut multipart).await?;
    let filename = store_icon(&state.icons_dir, &current.public_id, extension, &bytes)
        .await
        .map_err(|e| {
            tracing::error!(user_id = id, error = %e, "Failed to store icon");
            ApiError::from(AuthError::Internal(e.to_string()))
        })?;

    if let Err(e) = state.users.set_icon(id, &filename).await {
        remove_icon(&state.icons_dir, &filename).await;
        return Err(e.into());
    }
    if let Some(previous) = current.icon.as_deref() {
        remove_icon(&state.icons_dir, previous).await;
    }

    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    tracing::info!(user_id = id, size = bytes.len(), "Icon updated");
    Ok(Json(user.into()))
}

/// Delete the caller's own account.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = u64, Path, description = "Internal user id")),
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, body = AckResponse),
        (status = 403, description = "Not the caller's account"),
    )
)]
pub async fn delete_user(
    CurrentUser(current): CurrentUser,
    Path(id): Path<UserId>,
    State(state): State<AppState>,
) -> Result<Json<AckResponse>, ApiError> {
    if current.id != id {
        return Err(ApiError::forbidden("Cannot delete another user's account"));
    }
    state.users.delete(id).await?;
    Ok(Json(AckResponse::new("User deleted successfully")))
}

/// Email a password-reset link.
#[utoipa::path(
    post,
    path = "/users/request-password-reset",
    request_body = PasswordResetRequest,
    tag = "Passwords",
    responses(
        (status = 200, body = AckResponse),
        (status = 404, description = "User not found"),
    )
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    state.sessions.request_password_reset(&request.email).await?;
    Ok(Json(AckResponse::new("Password reset email sent.")))
}

/// Set a new password with a reset token.
#[utoipa::path(
    post,
    path = "/users/reset-password",
    request_body = PasswordResetConfirm,
    tag = "Passwords",
    responses(
        (status = 200, body = AckResponse),
        (status = 400, description = "Invalid reset token or token for another account"),
        (status = 404, description = "User not found"),
        (status = 422, description = "Password too weak"),
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetConfirm>,
) -> Result<Json<AckResponse>, ApiError> {
    state
        .sessions
        .confirm_password_reset(&request.email, &request.token, &request.new_password)
        .await?;
    Ok(Json(AckResponse::with_code(
        PASSWORD_RESET_CODE,
        "Password reset successfully",
    )))
}

/// Change the authenticated user's password.
#[utoipa::path(
    post,
    path = "/users/change-password",
    request_body = PasswordChangeRequest,
    tag = "Passwords",
    security(("bearer" = [])),
    responses(
        (status = 200, body = AckResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 422, description = "Password too weak"),
    )
)]
pub async fn change_password(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(request): Json<PasswordChangeRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    state
        .sessions
        .change_password(&user, &request.new_password)
        .await?;
    Ok(Json(AckResponse::new("Password updated successfully.")))
}
