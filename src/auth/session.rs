// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Authority
//!
//! Owns every credential-to-token decision: login (password or federated),
//! refresh, password reset and password change, plus resolving a bearer
//! access token back to its user.
//!
//! ## Token subjects
//!
//! | Kind    | `sub`          |
//! |---------|----------------|
//! | access  | user email     |
//! | refresh | user email     |
//! | reset   | user public id |
//!
//! Side effects that would slow a response (reset mail, avatar download) are
//! submitted to [`BackgroundTasks`]; their failures only reach the log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{AuthError, AuthResult};
use super::federated::{FederatedIdentity, FederatedVerifier};
use super::password::{validate_password, CredentialHasher};
use super::tokens::{TokenCodec, TokenKind};
use crate::avatar::AvatarFetcher;
use crate::mail::MailSender;
use crate::models::MAX_USERNAME_LENGTH;
use crate::storage::{NewUser, StoreError, User, UserStore};
use crate::tasks::BackgroundTasks;

/// Length of the provider uid fragment appended to a colliding username.
const UID_SUFFIX_LEN: usize = 8;

/// Credentials accepted by [`SessionAuthority::login`].
///
/// A federated `token` takes precedence over `username`/`password`. Blank
/// fields count as absent.
#[derive(Debug, Clone, Default)]
pub struct LoginCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl LoginCredentials {
    fn without_blanks(self) -> Self {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        Self {
            username: present(self.username),
            password: present(self.password),
            token: present(self.token),
        }
    }
}

/// Access and refresh tokens returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `bearer`
    #[schema(example = "bearer")]
    pub token_type: String,
}

#[derive(Clone)]
pub struct SessionAuthority {
    users: Arc<dyn UserStore>,
    tokens: TokenCodec,
    hasher: CredentialHasher,
    mailer: Arc<dyn MailSender>,
    tasks: BackgroundTasks,
    federated: Option<Arc<dyn FederatedVerifier>>,
    avatars: Option<Arc<dyn AvatarFetcher>>,
}

impl SessionAuthority {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: TokenCodec,
        hasher: CredentialHasher,
        mailer: Arc<dyn MailSender>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            users,
            tokens,
            hasher,
            mailer,
            tasks,
            federated: None,
            avatars: None,
        }
    }

    /// Enable federated login.
    pub fn with_federated(mut self, verifier: Arc<dyn FederatedVerifier>) -> Self {
        self.federated = Some(verifier);
        self
    }

    /// Download provider pictures for newly created federated users.
    pub fn with_avatars(mut self, fetcher: Arc<dyn AvatarFetcher>) -> Self {
        self.avatars = Some(fetcher);
        self
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    pub fn federated_enabled(&self) -> bool {
        self.federated.is_some()
    }

    // =========================================================================
    // Login / Refresh
    // =========================================================================

    /// Authenticate and issue an access/refresh pair keyed on the user's email.
    pub async fn login(&self, credentials: LoginCredentials) -> AuthResult<TokenPair> {
        let user = match credentials.without_blanks() {
            LoginCredentials {
                token: Some(provider_token),
                ..
            } => self.login_federated(&provider_token).await?,
            LoginCredentials {
                username: Some(username),
                password: Some(password),
                ..
            } => self.login_password(&username, password).await?,
            _ => return Err(AuthError::MissingCredentials),
        };

        tracing::info!(user_id = user.id, federated = user.federated, "User logged in");
        self.issue_pair(&user.email)
    }

    async fn login_password(&self, username: &str, password: String) -> AuthResult<User> {
        let user = match self.users.find_by_username(username).await? {
            Some(user) => user,
            None => self
                .users
                .find_by_email(username)
                .await?
                .ok_or(AuthError::InvalidCredentials)?,
        };

        // Federated-only accounts have no password to check
        let Some(stored_hash) = user.password_hash.clone() else {
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .hasher
            .verify_blocking(password.clone(), stored_hash.clone())
            .await
        {
            tracing::debug!(user_id = user.id, "Password verification failed");
            return Err(AuthError::InvalidCredentials);
        }

        if self.hasher.needs_rehash(&stored_hash) {
            self.rehash(&user, password).await;
        }

        Ok(user)
    }

    /// Upgrade a stored hash to the current cost parameters. Never fails the
    /// login.
    async fn rehash(&self, user: &User, password: String) {
        let result = match self.hasher.hash_blocking(password).await {
            Ok(hash) => self
                .users
                .update_password(user.id, &hash)
                .await
                .map_err(AuthError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => tracing::info!(user_id = user.id, "Upgraded password hash parameters"),
            Err(e) => tracing::warn!(user_id = user.id, error = %e, "Password rehash failed"),
        }
    }

    async fn login_federated(&self, provider_token: &str) -> AuthResult<User> {
        let verifier = self
            .federated
            .as_ref()
            .ok_or(AuthError::InvalidFederatedToken)?;
        let identity = verifier.verify(provider_token).await?;

        if let Some(user) = self.users.find_by_email(&identity.email).await? {
            return Ok(user);
        }
        self.create_federated_user(identity).await
    }

    async fn create_federated_user(&self, identity: FederatedIdentity) -> AuthResult<User> {
        let base_username = federated_username(&identity);

        let mut username = base_username.clone();
        let mut retried = false;
        let user = loop {
            let new_user = NewUser {
                username: username.clone(),
                email: identity.email.clone(),
                password_hash: None,
                icon: None,
                federated: true,
            };
            match self.users.create(new_user).await {
                Ok(user) => break user,
                // Another request created this account first
                Err(StoreError::Duplicate("email")) => {
                    return self
                        .users
                        .find_by_email(&identity.email)
                        .await?
                        .ok_or(AuthError::DuplicateUser);
                }
                Err(StoreError::Duplicate(_)) if !retried => {
                    retried = true;
                    let suffix: String =
                        identity.external_uid.chars().take(UID_SUFFIX_LEN).collect();
                    let room = MAX_USERNAME_LENGTH - 1 - suffix.chars().count();
                    username = format!("{}_{suffix}", truncate_chars(&base_username, room));
                    tracing::debug!(username = %username, "Federated username taken; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        if let Some(url) = identity.picture_url {
            self.submit_avatar_fetch(&user, url);
        }
        Ok(user)
    }

    fn submit_avatar_fetch(&self, user: &User, url: String) {
        let Some(fetcher) = self.avatars.clone() else {
            return;
        };
        let users = self.users.clone();
        let user_id = user.id;
        let public_id = user.public_id.clone();

        self.tasks.submit("avatar_fetch", async move {
            match fetcher.fetch_and_store(&url, &public_id).await {
                Ok(filename) => {
                    if let Err(e) = users.set_icon(user_id, &filename).await {
                        tracing::warn!(user_id, error = %e, "Failed to store avatar filename");
                    }
                }
                Err(e) => tracing::warn!(user_id, error = %e, "Avatar download failed"),
            }
        });
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self
            .tokens
            .verify_kind(refresh_token, TokenKind::Refresh)
            .map_err(|_| AuthError::InvalidRefreshToken)?;

        let user = self
            .users
            .find_by_email(&claims.sub)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        self.issue_pair(&user.email)
    }

    fn issue_pair(&self, email: &str) -> AuthResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.tokens.issue(email, TokenKind::Access)?,
            refresh_token: self.tokens.issue(email, TokenKind::Refresh)?,
            token_type: "bearer".to_string(),
        })
    }

    // =========================================================================
    // Passwords
    // =========================================================================

    /// Issue a reset token and mail it. Delivery happens in the background.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let token = self.tokens.issue(&user.public_id, TokenKind::Reset)?;
        let mailer = self.mailer.clone();
        let to = user.email.clone();
        let user_id = user.id;

        self.tasks.submit("password_reset_mail", async move {
            if let Err(e) = mailer.send_password_reset(&to, &token).await {
                tracing::warn!(user_id, error = %e, "Password reset mail failed");
            }
        });

        tracing::info!(user_id, "Password reset requested");
        Ok(())
    }

    /// Set a new password using a reset token.
    pub async fn confirm_password_reset(
        &self,
        email: &str,
        reset_token: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        validate_password(new_password).map_err(AuthError::WeakPassword)?;

        let claims = self
            .tokens
            .verify_kind(reset_token, TokenKind::Reset)
            .map_err(|_| AuthError::InvalidResetToken)?;

        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if claims.sub != user.public_id {
            tracing::warn!(user_id = user.id, "Reset token presented for another account");
            return Err(AuthError::TokenUserMismatch);
        }

        let hash = self.hasher.hash_blocking(new_password.to_string()).await?;
        self.users.update_password(user.id, &hash).await?;

        tracing::info!(user_id = user.id, "Password reset completed");
        Ok(())
    }

    /// Replace the password of an already authenticated user.
    pub async fn change_password(&self, user: &User, new_password: &str) -> AuthResult<()> {
        validate_password(new_password).map_err(AuthError::WeakPassword)?;

        let hash = self.hasher.hash_blocking(new_password.to_string()).await?;
        self.users.update_password(user.id, &hash).await?;

        tracing::info!(user_id = user.id, "Password changed");
        Ok(())
    }

    /// Create a password account.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> AuthResult<User> {
        validate_password(password).map_err(AuthError::WeakPassword)?;

        let hash = self.hasher.hash_blocking(password.to_string()).await?;
        let user = self
            .users
            .create(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: Some(hash),
                icon: None,
                federated: false,
            })
            .await?;
        Ok(user)
    }

    // =========================================================================
    // Identity resolution
    // =========================================================================

    /// Resolve a bearer access token to its user.
    pub async fn resolve(&self, access_token: &str) -> AuthResult<User> {
        let claims = self
            .tokens
            .verify_kind(access_token, TokenKind::Access)
            .map_err(|_| AuthError::Unauthorized)?;

        match self.users.find_by_email(&claims.sub).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(AuthError::Unauthorized),
            Err(e) => {
                tracing::error!(error = %e, "User lookup failed during token resolution");
                Err(AuthError::Unauthorized)
            }
        }
    }
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// Username for a new federated account: the trimmed display name, else the
/// email local part, cut to [`MAX_USERNAME_LENGTH`] characters.
fn federated_username(identity: &FederatedIdentity) -> String {
    let name = identity
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| email_local_part(&identity.email).trim());
    truncate_chars(name, MAX_USERNAME_LENGTH)
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::federated::tests::StaticVerifier;
    use crate::auth::tokens::tests::FixedClock;
    use crate::avatar::tests::StubAvatars;
    use crate::config::{HashingConfig, TokenConfig};
    use crate::mail::tests::RecordingMailer;
    use crate::storage::RedbUserStore;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    pub(crate) const T0: i64 = 1_700_000_000;
    pub(crate) const FEDERATED_TOKEN: &str = "provider-token-alice";

    /// Authority wired to a temp redb store and recording collaborators.
    pub(crate) struct Harness {
        pub(crate) authority: SessionAuthority,
        pub(crate) users: Arc<RedbUserStore>,
        pub(crate) mailer: Arc<RecordingMailer>,
        pub(crate) avatars: Arc<StubAvatars>,
        pub(crate) clock: Arc<FixedClock>,
        shutdown: CancellationToken,
        pub(crate) dir: tempfile::TempDir,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            Self::with_mailer(RecordingMailer::new())
        }

        pub(crate) fn with_mailer(mailer: Arc<RecordingMailer>) -> Self {
            Self::build(mailer, fast_hashing())
        }

        pub(crate) fn build(mailer: Arc<RecordingMailer>, hashing: HashingConfig) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let users = Arc::new(RedbUserStore::open(&dir.path().join("users.redb")).unwrap());
            let clock = FixedClock::at(T0);
            let tokens = TokenCodec::new(TokenConfig::new("session-test-key")).with_clock(clock.clone());
            let hasher = CredentialHasher::new(hashing).unwrap();
            let avatars = StubAvatars::new();

            let (tasks, worker) = BackgroundTasks::new();
            let shutdown = CancellationToken::new();
            tokio::spawn(worker.run(shutdown.clone()));

            let verifier = StaticVerifier::with(
                FEDERATED_TOKEN,
                FederatedIdentity {
                    external_uid: "firebase-uid-123456789".into(),
                    email: "alice@example.com".into(),
                    display_name: Some("Alice".into()),
                    picture_url: Some("https://img.example.com/alice.jpg".into()),
                },
            );

            let authority = SessionAuthority::new(users.clone(), tokens, hasher, mailer.clone(), tasks)
                .with_federated(verifier)
                .with_avatars(avatars.clone());

            Self {
                authority,
                users,
                mailer,
                avatars,
                clock,
                shutdown,
                dir,
            }
        }

        pub(crate) async fn register(&self, username: &str, email: &str, password: &str) -> User {
            self.authority.register(username, email, password).await.unwrap()
        }

        /// Wait for background jobs to produce an observable effect.
        pub(crate) async fn wait_until<F>(&self, mut done: F)
        where
            F: FnMut() -> bool,
        {
            for _ in 0..200 {
                if done() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("background job did not complete in time");
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    pub(crate) fn fast_hashing() -> HashingConfig {
        HashingConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn password_login(username: &str, password: &str) -> LoginCredentials {
        LoginCredentials {
            username: Some(username.into()),
            password: Some(password.into()),
            token: None,
        }
    }

    fn federated_login(token: &str) -> LoginCredentials {
        LoginCredentials {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn password_login_issues_pair_keyed_on_email() {
        let h = Harness::new();
        h.register("alice", "alice@example.com", "correct-horse1").await;

        let pair = h
            .authority
            .login(password_login("alice", "correct-horse1"))
            .await
            .unwrap();
        assert_eq!(pair.token_type, "bearer");

        let access = h.authority.tokens().verify(&pair.access_token).unwrap();
        assert_eq!(access.sub, "alice@example.com");
        assert_eq!(access.kind, TokenKind::Access);
        let refresh = h.authority.tokens().verify(&pair.refresh_token).unwrap();
        assert_eq!(refresh.kind, TokenKind::Refresh);
    }

    #[tokio::test]
    async fn login_accepts_email_as_username() {
        let h = Harness::new();
        h.register("alice", "alice@example.com", "correct-horse1").await;
        assert!(h
            .authority
            .login(password_login("alice@example.com", "correct-horse1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let h = Harness::new();
        h.register("alice", "alice@example.com", "correct-horse1").await;

        let wrong = h.authority.login(password_login("alice", "wrong-horse1")).await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
        let unknown = h.authority.login(password_login("bob", "correct-horse1")).await;
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn missing_credentials_rejected() {
        let h = Harness::new();
        let only_user = LoginCredentials {
            username: Some("alice".into()),
            ..Default::default()
        };
        assert!(matches!(
            h.authority.login(only_user).await,
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            h.authority.login(LoginCredentials::default()).await,
            Err(AuthError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn blank_token_falls_back_to_password_login() {
        let h = Harness::new();
        h.register("alice", "alice@example.com", "correct-horse1").await;

        let credentials = LoginCredentials {
            token: Some(String::new()),
            ..password_login("alice", "correct-horse1")
        };
        let pair = h.authority.login(credentials).await.unwrap();
        let claims = h.authority.tokens().verify(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "alice@example.com");

        let blank = LoginCredentials {
            username: Some("  ".into()),
            password: Some(String::new()),
            token: Some(" ".into()),
        };
        assert!(matches!(
            h.authority.login(blank).await,
            Err(AuthError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn federated_login_creates_user_once() {
        let h = Harness::new();

        let first = h.authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();
        let second = h.authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();
        assert_eq!(
            h.authority.tokens().verify(&first.access_token).unwrap().sub,
            h.authority.tokens().verify(&second.access_token).unwrap().sub
        );

        let all = h.users.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].username, "Alice");
        assert!(all[0].federated);
        assert!(!all[0].has_password());
    }

    #[tokio::test]
    async fn federated_signup_fetches_avatar_in_background() {
        let h = Harness::new();
        h.authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();

        let users = h.users.clone();
        let mut icon = None;
        for _ in 0..200 {
            icon = users
                .find_by_email("alice@example.com")
                .await
                .unwrap()
                .and_then(|u| u.icon);
            if icon.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let icon = icon.expect("avatar filename stored");
        assert!(icon.ends_with("Istub.png"));
        assert_eq!(
            h.avatars.requested.lock().unwrap().as_slice(),
            ["https://img.example.com/alice.jpg"]
        );
    }

    #[tokio::test]
    async fn federated_username_collision_gets_uid_suffix() {
        let h = Harness::new();
        h.register("Alice", "someone-else@example.com", "correct-horse1").await;

        h.authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();
        let created = h.users.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(created.username, "Alice_firebase");
    }

    fn identity_named(display_name: Option<&str>) -> FederatedIdentity {
        FederatedIdentity {
            external_uid: "firebase-uid-123456789".into(),
            email: "carol@example.com".into(),
            display_name: display_name.map(str::to_string),
            picture_url: None,
        }
    }

    #[test]
    fn federated_username_is_trimmed_and_bounded() {
        assert_eq!(federated_username(&identity_named(Some("  Carol  "))), "Carol");
        assert_eq!(federated_username(&identity_named(Some("   "))), "carol");
        assert_eq!(federated_username(&identity_named(None)), "carol");

        let long = "x".repeat(MAX_USERNAME_LENGTH * 2);
        let name = federated_username(&identity_named(Some(&long)));
        assert_eq!(name.chars().count(), MAX_USERNAME_LENGTH);
        assert!(crate::models::is_valid_username(&name));
    }

    #[tokio::test]
    async fn long_federated_name_collision_stays_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let users = Arc::new(RedbUserStore::open(&dir.path().join("users.redb")).unwrap());
        let (tasks, _worker) = BackgroundTasks::new();
        let long = "é".repeat(MAX_USERNAME_LENGTH + 10);
        let authority = SessionAuthority::new(
            users.clone(),
            TokenCodec::new(TokenConfig::new("k")),
            CredentialHasher::new(fast_hashing()).unwrap(),
            RecordingMailer::new(),
            tasks,
        )
        .with_federated(StaticVerifier::with(
            FEDERATED_TOKEN,
            identity_named(Some(&long)),
        ));

        let taken: String = long.chars().take(MAX_USERNAME_LENGTH).collect();
        authority
            .register(&taken, "other@example.com", "correct-horse1")
            .await
            .unwrap();

        authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();
        let created = users.find_by_email("carol@example.com").await.unwrap().unwrap();
        assert_eq!(created.username.chars().count(), MAX_USERNAME_LENGTH);
        assert!(created.username.ends_with("_firebase"));
        assert!(crate::models::is_valid_username(&created.username));
    }

    #[tokio::test]
    async fn federated_login_reuses_existing_password_account() {
        let h = Harness::new();
        let existing = h.register("alice", "alice@example.com", "correct-horse1").await;

        h.authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();
        let all = h.users.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, existing.id);
    }

    #[tokio::test]
    async fn unknown_federated_token_rejected() {
        let h = Harness::new();
        let result = h.authority.login(federated_login("forged")).await;
        assert!(matches!(result, Err(AuthError::InvalidFederatedToken)));
    }

    #[tokio::test]
    async fn federated_disabled_rejects_token_login() {
        let dir = tempfile::tempdir().unwrap();
        let users = Arc::new(RedbUserStore::open(&dir.path().join("users.redb")).unwrap());
        let (tasks, _worker) = BackgroundTasks::new();
        let authority = SessionAuthority::new(
            users,
            TokenCodec::new(TokenConfig::new("k")),
            CredentialHasher::new(fast_hashing()).unwrap(),
            RecordingMailer::new(),
            tasks,
        );
        assert!(!authority.federated_enabled());
        let result = authority.login(federated_login(FEDERATED_TOKEN)).await;
        assert!(matches!(result, Err(AuthError::InvalidFederatedToken)));
    }

    #[tokio::test]
    async fn federated_only_account_cannot_password_login() {
        let h = Harness::new();
        h.authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();
        let result = h.authority.login(password_login("Alice", "anything1")).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn login_migrates_outdated_hash_parameters() {
        let h = Harness::new();
        let user = h.register("alice", "alice@example.com", "correct-horse1").await;

        let legacy = CredentialHasher::new(HashingConfig {
            memory_kib: 2048,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
        .hash("correct-horse1")
        .unwrap();
        h.users.update_password(user.id, &legacy).await.unwrap();

        h.authority
            .login(password_login("alice", "correct-horse1"))
            .await
            .unwrap();

        let stored = h.users.find_by_id(user.id).await.unwrap().unwrap();
        let stored_hash = stored.password_hash.unwrap();
        assert_ne!(stored_hash, legacy);
        assert!(stored_hash.contains("m=1024"));
    }

    #[tokio::test]
    async fn refresh_issues_new_pair() {
        let h = Harness::new();
        h.register("alice", "alice@example.com", "correct-horse1").await;
        let pair = h
            .authority
            .login(password_login("alice", "correct-horse1"))
            .await
            .unwrap();

        h.clock.set(T0 + 120);
        let renewed = h.authority.refresh(&pair.refresh_token).await.unwrap();
        let claims = h.authority.tokens().verify(&renewed.access_token).unwrap();
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.iat, T0 + 120);
    }

    #[tokio::test]
    async fn refresh_rejects_access_tokens_and_deleted_users() {
        let h = Harness::new();
        let user = h.register("alice", "alice@example.com", "correct-horse1").await;
        let pair = h
            .authority
            .login(password_login("alice", "correct-horse1"))
            .await
            .unwrap();

        assert!(matches!(
            h.authority.refresh(&pair.access_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));

        h.users.delete(user.id).await.unwrap();
        assert!(matches!(
            h.authority.refresh(&pair.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn refresh_token_expires() {
        let h = Harness::new();
        h.register("alice", "alice@example.com", "correct-horse1").await;
        let pair = h
            .authority
            .login(password_login("alice", "correct-horse1"))
            .await
            .unwrap();

        h.clock.set(T0 + 7 * 24 * 3600);
        assert!(matches!(
            h.authority.refresh(&pair.refresh_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn reset_flow_end_to_end() {
        let h = Harness::new();
        let user = h.register("alice", "alice@example.com", "correct-horse1").await;

        h.authority
            .request_password_reset("alice@example.com")
            .await
            .unwrap();
        let mailer = h.mailer.clone();
        h.wait_until(|| !mailer.sent().is_empty()).await;

        let (to, token) = h.mailer.sent().remove(0);
        assert_eq!(to, "alice@example.com");
        let claims = h.authority.tokens().verify(&token).unwrap();
        assert_eq!(claims.kind, TokenKind::Reset);
        assert_eq!(claims.sub, user.public_id);

        h.authority
            .confirm_password_reset("alice@example.com", &token, "new-horse22")
            .await
            .unwrap();

        assert!(h
            .authority
            .login(password_login("alice", "new-horse22"))
            .await
            .is_ok());
        assert!(matches!(
            h.authority.login(password_login("alice", "correct-horse1")).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn reset_request_for_unknown_email() {
        let h = Harness::new();
        let result = h.authority.request_password_reset("ghost@example.com").await;
        assert!(matches!(result, Err(AuthError::UserNotFound)));
    }

    #[tokio::test]
    async fn reset_request_succeeds_even_if_mail_fails() {
        let h = Harness::with_mailer(RecordingMailer::failing());
        h.register("alice", "alice@example.com", "correct-horse1").await;
        assert!(h
            .authority
            .request_password_reset("alice@example.com")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn reset_token_for_other_user_is_mismatch() {
        let h = Harness::new();
        let alice = h.register("alice", "alice@example.com", "correct-horse1").await;
        h.register("bob", "bob@example.com", "correct-horse1").await;

        let alice_token = h
            .authority
            .tokens()
            .issue(&alice.public_id, TokenKind::Reset)
            .unwrap();
        let result = h
            .authority
            .confirm_password_reset("bob@example.com", &alice_token, "new-horse22")
            .await;
        assert!(matches!(result, Err(AuthError::TokenUserMismatch)));

        // Bob's password is untouched
        assert!(h
            .authority
            .login(password_login("bob", "correct-horse1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn reset_confirm_rejects_bad_tokens_and_weak_passwords() {
        let h = Harness::new();
        let alice = h.register("alice", "alice@example.com", "correct-horse1").await;
        let token = h
            .authority
            .tokens()
            .issue(&alice.public_id, TokenKind::Reset)
            .unwrap();

        assert!(matches!(
            h.authority
                .confirm_password_reset("alice@example.com", &token, "short1")
                .await,
            Err(AuthError::WeakPassword(_))
        ));

        let access = h
            .authority
            .tokens()
            .issue("alice@example.com", TokenKind::Access)
            .unwrap();
        assert!(matches!(
            h.authority
                .confirm_password_reset("alice@example.com", &access, "new-horse22")
                .await,
            Err(AuthError::InvalidResetToken)
        ));

        assert!(matches!(
            h.authority
                .confirm_password_reset("ghost@example.com", &token, "new-horse22")
                .await,
            Err(AuthError::UserNotFound)
        ));

        h.clock.set(T0 + 3600);
        assert!(matches!(
            h.authority
                .confirm_password_reset("alice@example.com", &token, "new-horse22")
                .await,
            Err(AuthError::InvalidResetToken)
        ));
    }

    #[tokio::test]
    async fn change_password_enforces_policy() {
        let h = Harness::new();
        let user = h.register("alice", "alice@example.com", "correct-horse1").await;

        assert!(matches!(
            h.authority.change_password(&user, "nodigitshere").await,
            Err(AuthError::WeakPassword(_))
        ));
        h.authority.change_password(&user, "battery-staple9").await.unwrap();
        assert!(h
            .authority
            .login(password_login("alice", "battery-staple9"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn change_password_gives_federated_user_a_password() {
        let h = Harness::new();
        h.authority.login(federated_login(FEDERATED_TOKEN)).await.unwrap();
        let user = h.users.find_by_email("alice@example.com").await.unwrap().unwrap();

        h.authority.change_password(&user, "battery-staple9").await.unwrap();
        assert!(h
            .authority
            .login(password_login("Alice", "battery-staple9"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_weak_passwords() {
        let h = Harness::new();
        h.register("alice", "alice@example.com", "correct-horse1").await;

        assert!(matches!(
            h.authority
                .register("alice", "other@example.com", "correct-horse1")
                .await,
            Err(AuthError::DuplicateUser)
        ));
        assert!(matches!(
            h.authority
                .register("alice2", "alice@example.com", "correct-horse1")
                .await,
            Err(AuthError::DuplicateUser)
        ));
        assert!(matches!(
            h.authority.register("bob", "bob@example.com", "12345678").await,
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[tokio::test]
    async fn resolve_accepts_only_access_tokens() {
        let h = Harness::new();
        let user = h.register("alice", "alice@example.com", "correct-horse1").await;
        let pair = h
            .authority
            .login(password_login("alice", "correct-horse1"))
            .await
            .unwrap();

        assert_eq!(h.authority.resolve(&pair.access_token).await.unwrap().id, user.id);
        assert!(matches!(
            h.authority.resolve(&pair.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));
        let reset = h
            .authority
            .tokens()
            .issue(&user.public_id, TokenKind::Reset)
            .unwrap();
        assert!(matches!(
            h.authority.resolve(&reset).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            h.authority.resolve("garbage").await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn resolve_rejects_expired_and_orphaned_tokens() {
        let h = Harness::new();
        let user = h.register("alice", "alice@example.com", "correct-horse1").await;
        let access = h
            .authority
            .tokens()
            .issue(&user.email, TokenKind::Access)
            .unwrap();

        h.clock.set(T0 + 3599);
        assert!(h.authority.resolve(&access).await.is_ok());
        h.clock.set(T0 + 3600);
        assert!(matches!(
            h.authority.resolve(&access).await,
            Err(AuthError::Unauthorized)
        ));

        h.clock.set(T0);
        h.users.delete(user.id).await.unwrap();
        assert!(matches!(
            h.authority.resolve(&access).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[test]
    fn local_part_of_email() {
        assert_eq!(email_local_part("alice@example.com"), "alice");
        assert_eq!(email_local_part("no-at-sign"), "no-at-sign");
    }
}
