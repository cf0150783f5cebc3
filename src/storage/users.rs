// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User records and the redb-backed user store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: id → serialized User (JSON bytes).
const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Unique index: email → id.
const EMAIL_INDEX: TableDefinition<&str, u64> = TableDefinition::new("email_index");

/// Unique index: username → id.
const USERNAME_INDEX: TableDefinition<&str, u64> = TableDefinition::new("username_index");

/// Unique index: public_id → id.
const PUBLIC_ID_INDEX: TableDefinition<&str, u64> = TableDefinition::new("public_id_index");

/// Id sequences.
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

const USER_SEQUENCE: &str = "user_id";

// =============================================================================
// Models
// =============================================================================

/// Internal user id. Never placed in tokens.
pub type UserId = u64;

/// Stored user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Opaque identifier exposed to clients; reset-token subject
    pub public_id: String,
    pub username: String,
    /// Access/refresh token subject
    pub email: String,
    /// `None` for federated-only accounts
    pub password_hash: Option<String>,
    /// Account was created through the identity provider
    pub federated: bool,
    /// Avatar filename under the icons directory
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether password login is possible for this account.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Fields for a new user. The store assigns `id`, `public_id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub icon: Option<String>,
    pub federated: bool,
}

/// Partial profile update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub icon: Option<String>,
}

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// A unique field (`email` or `username`) is already taken
    #[error("duplicate {0}")]
    Duplicate(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Store Trait
// =============================================================================

/// Persistence of user records.
///
/// Each call is atomic on its own; `create` must reject duplicate email or
/// username with [`StoreError::Duplicate`] even under concurrent inserts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_by_public_id(&self, public_id: &str) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>>;
    async fn list(&self) -> StoreResult<Vec<User>>;
    async fn create(&self, new_user: NewUser) -> StoreResult<User>;
    async fn update_password(&self, id: UserId, password_hash: &str) -> StoreResult<()>;
    async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> StoreResult<User>;
    async fn set_icon(&self, id: UserId, icon: &str) -> StoreResult<()>;
    async fn delete(&self, id: UserId) -> StoreResult<()>;
    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> StoreResult<()>;
}

// =============================================================================
// RedbUserStore
// =============================================================================

/// Embedded ACID user store.
pub struct RedbUserStore {
    db: Database,
}

impl RedbUserStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(EMAIL_INDEX)?;
            let _ = write_txn.open_table(USERNAME_INDEX)?;
            let _ = write_txn.open_table(PUBLIC_ID_INDEX)?;
            let _ = write_txn.open_table(SEQUENCES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn get_by_index(
        &self,
        index: TableDefinition<&str, u64>,
        key: &str,
    ) -> StoreResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(index)?;
        let Some(id) = index_table.get(key)?.map(|v| v.value()) else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS)?;
        match users.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write of a single user row inside one write transaction.
    fn modify<F>(&self, id: UserId, apply: F) -> StoreResult<User>
    where
        F: FnOnce(&mut User),
    {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let existing = users
                .get(id)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;

            let mut user: User = serde_json::from_slice(&existing)?;
            apply(&mut user);

            let json = serde_json::to_vec(&user)?;
            users.insert(id, json.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for RedbUserStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.get_by_index(EMAIL_INDEX, email)
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.get_by_index(USERNAME_INDEX, username)
    }

    async fn find_by_public_id(&self, public_id: &str) -> StoreResult<Option<User>> {
        self.get_by_index(PUBLIC_ID_INDEX, public_id)
    }

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.get_by_id(id)
    }

    async fn list(&self) -> StoreResult<Vec<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        let mut users = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            users.push(serde_json::from_slice(value.value())?);
        }
        Ok(users)
    }

    async fn create(&self, new_user: NewUser) -> StoreResult<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut emails = write_txn.open_table(EMAIL_INDEX)?;
            if emails.get(new_user.email.as_str())?.is_some() {
                return Err(StoreError::Duplicate("email"));
            }
            let mut usernames = write_txn.open_table(USERNAME_INDEX)?;
            if usernames.get(new_user.username.as_str())?.is_some() {
                return Err(StoreError::Duplicate("username"));
            }

            let mut sequences = write_txn.open_table(SEQUENCES)?;
            let id = sequences.get(USER_SEQUENCE)?.map(|v| v.value()).unwrap_or(0) + 1;
            sequences.insert(USER_SEQUENCE, id)?;

            let user = User {
                id,
                public_id: Uuid::new_v4().simple().to_string(),
                username: new_user.username,
                email: new_user.email,
                password_hash: new_user.password_hash,
                federated: new_user.federated,
                icon: new_user.icon,
                created_at: Utc::now(),
            };

            let json = serde_json::to_vec(&user)?;
            let mut users = write_txn.open_table(USERS)?;
            let mut public_ids = write_txn.open_table(PUBLIC_ID_INDEX)?;
            users.insert(id, json.as_slice())?;
            emails.insert(user.email.as_str(), id)?;
            usernames.insert(user.username.as_str(), id)?;
            public_ids.insert(user.public_id.as_str(), id)?;
            user
        };
        write_txn.commit()?;

        tracing::info!(user_id = user.id, federated = user.federated, "Created user");
        Ok(user)
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> StoreResult<()> {
        self.modify(id, |user| user.password_hash = Some(password_hash.to_string()))?;
        Ok(())
    }

    async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> StoreResult<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let existing = users
                .get(id)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
            let mut user: User = serde_json::from_slice(&existing)?;

            if let Some(email) = update.email.filter(|e| *e != user.email) {
                let mut emails = write_txn.open_table(EMAIL_INDEX)?;
                if emails.get(email.as_str())?.is_some() {
                    return Err(StoreError::Duplicate("email"));
                }
                emails.remove(user.email.as_str())?;
                emails.insert(email.as_str(), id)?;
                user.email = email;
            }
            if let Some(username) = update.username.filter(|u| *u != user.username) {
                let mut usernames = write_txn.open_table(USERNAME_INDEX)?;
                if usernames.get(username.as_str())?.is_some() {
                    return Err(StoreError::Duplicate("username"));
                }
                usernames.remove(user.username.as_str())?;
                usernames.insert(username.as_str(), id)?;
                user.username = username;
            }
            if let Some(icon) = update.icon {
                user.icon = Some(icon);
            }

            let json = serde_json::to_vec(&user)?;
            users.insert(id, json.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    async fn set_icon(&self, id: UserId, icon: &str) -> StoreResult<()> {
        self.modify(id, |user| user.icon = Some(icon.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: UserId) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            let existing = users
                .remove(id)?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
            let user: User = serde_json::from_slice(&existing)?;

            let mut emails = write_txn.open_table(EMAIL_INDEX)?;
            let mut usernames = write_txn.open_table(USERNAME_INDEX)?;
            let mut public_ids = write_txn.open_table(PUBLIC_ID_INDEX)?;
            emails.remove(user.email.as_str())?;
            usernames.remove(user.username.as_str())?;
            public_ids.remove(user.public_id.as_str())?;
        }
        write_txn.commit()?;

        tracing::info!(user_id = id, "Deleted user");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
