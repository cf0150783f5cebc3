// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User icons: provider avatar downloads for federated sign-ups and direct
//! uploads.
//!
//! Files land in the icons directory as `<public_id>I<uuid>.<ext>` and are
//! served read-only under `/static/icons`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

/// Timeout for the whole download.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest accepted image (5 MiB).
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    #[error("avatar request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("avatar host returned HTTP {0}")]
    Status(u16),

    #[error("avatar exceeds {MAX_AVATAR_BYTES} bytes")]
    TooLarge,

    #[error("failed to store avatar: {0}")]
    Io(#[from] std::io::Error),
}

/// Downloads a remote picture and stores it as the user's icon.
#[async_trait]
pub trait AvatarFetcher: Send + Sync {
    /// Returns the stored filename.
    async fn fetch_and_store(&self, url: &str, owner_public_id: &str)
        -> Result<String, AvatarError>;
}

/// File extension for a supported raster image content type.
pub fn image_extension(content_type: Option<&str>) -> Option<&'static str> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("image/jpeg") | Some("image/jpg") => Some("jpg"),
        Some("image/png") => Some("png"),
        Some("image/gif") => Some("gif"),
        Some("image/webp") => Some("webp"),
        _ => None,
    }
}

/// Like [`image_extension`], falling back to `png` for unknown types.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    image_extension(content_type).unwrap_or("png")
}

pub fn avatar_filename(owner_public_id: &str, extension: &str) -> String {
    format!("{owner_public_id}I{}.{extension}", Uuid::new_v4().simple())
}

/// Write icon bytes under a fresh filename and return that filename.
pub async fn store_icon(
    icons_dir: &Path,
    owner_public_id: &str,
    extension: &str,
    bytes: &[u8],
) -> Result<String, AvatarError> {
    let filename = avatar_filename(owner_public_id, extension);
    tokio::fs::create_dir_all(icons_dir).await?;
    tokio::fs::write(icons_dir.join(&filename), bytes).await?;
    tracing::debug!(filename = %filename, size = bytes.len(), "Stored icon");
    Ok(filename)
}

/// Delete a replaced icon. Missing files are ignored.
pub async fn remove_icon(icons_dir: &Path, filename: &str) {
    // Only names produced by `avatar_filename` live here
    if filename.contains(['/', '\\']) || filename.starts_with('.') {
        return;
    }
    match tokio::fs::remove_file(icons_dir.join(filename)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(filename, error = %e, "Failed to remove old icon"),
    }
}

pub struct HttpAvatarFetcher {
    client: reqwest::Client,
    icons_dir: PathBuf,
}

impl HttpAvatarFetcher {
    pub fn new(icons_dir: PathBuf) -> Result<Self, AvatarError> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client, icons_dir })
    }
}

#[async_trait]
impl AvatarFetcher for HttpAvatarFetcher {
    async fn fetch_and_store(
        &self,
        url: &str,
        owner_public_id: &str,
    ) -> Result<String, AvatarError> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AvatarError::Status(response.status().as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_AVATAR_BYTES as u64)
        {
            return Err(AvatarError::TooLarge);
        }

        let extension = extension_for(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_AVATAR_BYTES {
                return Err(AvatarError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }

        store_icon(&self.icons_dir, owner_public_id, extension, &bytes).await
    }
}
