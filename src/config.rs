// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into an
//! immutable [`AppConfig`], which is then handed to the components that need
//! it. Nothing reads the environment after startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Root directory for the user database | `./data` |
//! | `ICONS_DIR` | Directory for stored avatar icons | `$DATA_DIR/static/icons` |
//! | `SECRET_KEY` | Symmetric JWT signing key | Required |
//! | `ALGORITHM` | JWT algorithm (`HS256`, `HS384`, `HS512`) | `HS256` |
//! | `ACCESS_TOKEN_EXPIRE_MINUTES` | Access token lifetime (positive) | `60` |
//! | `REFRESH_TOKEN_EXPIRE_DAYS` | Refresh token lifetime (positive) | `7` |
//! | `RESET_TOKEN_EXPIRE_MINUTES` | Password reset token lifetime (positive) | `60` |
//! | `ARGON2_MEMORY_KIB` | Argon2 memory cost | `19456` |
//! | `ARGON2_ITERATIONS` | Argon2 time cost | `2` |
//! | `ARGON2_PARALLELISM` | Argon2 lanes | `1` |
//! | `FIREBASE_PROJECT_ID` | Enables federated login when set | Optional |
//! | `FIREBASE_JWKS_URL` | Provider signing keys | Google secure token JWKS |
//! | `FEDERATED_TIMEOUT_SECS` | Bound on provider verification | `5` |
//! | `SES_SMTP_SERVER` | SMTP relay; log mailer when unset | Optional |
//! | `SES_SMTP_PORT` | SMTP port | `587` |
//! | `SES_SMTP_USERNAME` / `SES_SMTP_PASSWORD` | SMTP credentials | Optional |
//! | `MAIL_FROM` | Sender address for reset mail | `no-reply@localhost` |
//! | `RESET_PASSWORD_URL` | Link target for reset mail | `http://localhost:8080/reset-password` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | Serve HTTPS when both set | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use jsonwebtoken::Algorithm;

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Default JWKS endpoint for Firebase / Google secure token ID tokens.
pub const DEFAULT_FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Token signing configuration shared by the token codec.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub reset_ttl: Duration,
}

impl TokenConfig {
    /// Config with default lifetimes and HS256.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: Algorithm::HS256,
            access_ttl: Duration::minutes(60),
            refresh_ttl: Duration::days(7),
            reset_ttl: Duration::minutes(60),
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("reset_ttl", &self.reset_ttl)
            .finish()
    }
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Federated identity provider settings.
#[derive(Debug, Clone)]
pub struct FederatedConfig {
    pub project_id: String,
    pub jwks_url: String,
    pub timeout: StdDuration,
}

/// SMTP relay settings.
#[derive(Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Outgoing mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp: Option<SmtpConfig>,
    pub from: String,
    pub reset_url: String,
}

/// Certificate and key files for HTTPS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub icons_dir: PathBuf,
    pub tokens: TokenConfig,
    pub hashing: HashingConfig,
    pub federated: Option<FederatedConfig>,
    pub mail: MailConfig,
    pub tls: Option<TlsConfig>,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret = get("SECRET_KEY").ok_or(ConfigError::Missing("SECRET_KEY"))?;
        let algorithm = match get("ALGORITHM").as_deref() {
            None | Some("HS256") => Algorithm::HS256,
            Some("HS384") => Algorithm::HS384,
            Some("HS512") => Algorithm::HS512,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "ALGORITHM",
                    value: other.to_string(),
                })
            }
        };

        let tokens = TokenConfig {
            secret,
            algorithm,
            access_ttl: parse_lifetime(
                &get,
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                60,
                Duration::try_minutes,
            )?,
            refresh_ttl: parse_lifetime(&get, "REFRESH_TOKEN_EXPIRE_DAYS", 7, Duration::try_days)?,
            reset_ttl: parse_lifetime(
                &get,
                "RESET_TOKEN_EXPIRE_MINUTES",
                60,
                Duration::try_minutes,
            )?,
        };

        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: parse_or(&get, "ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&get, "ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&get, "ARGON2_PARALLELISM", defaults.parallelism)?,
        };

        let federated = match get("FIREBASE_PROJECT_ID") {
            Some(project_id) => Some(FederatedConfig {
                project_id,
                jwks_url: get("FIREBASE_JWKS_URL")
                    .unwrap_or_else(|| DEFAULT_FIREBASE_JWKS_URL.to_string()),
                timeout: StdDuration::from_secs(parse_or(&get, "FEDERATED_TIMEOUT_SECS", 5)?),
            }),
            None => None,
        };

        let smtp = match get("SES_SMTP_SERVER") {
            Some(server) => Some(SmtpConfig {
                server,
                port: parse_or(&get, "SES_SMTP_PORT", 587)?,
                username: get("SES_SMTP_USERNAME"),
                password: get("SES_SMTP_PASSWORD"),
            }),
            None => None,
        };
        let mail = MailConfig {
            smtp,
            from: get("MAIL_FROM").unwrap_or_else(|| "no-reply@localhost".to_string()),
            reset_url: get("RESET_PASSWORD_URL")
                .unwrap_or_else(|| "http://localhost:8080/reset-password".to_string()),
        };

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            _ => None,
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            None | Some("pretty") => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let data_dir = PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| "./data".to_string()));
        let icons_dir = get("ICONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("static").join("icons"));

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            data_dir,
            icons_dir,
            tokens,
            hashing,
            federated,
            mail,
            tls,
            log_format,
        })
    }

    /// Path of the embedded user database file.
    pub fn user_db_path(&self) -> PathBuf {
        self.data_dir.join("users.redb")
    }
}

fn parse_or<T, F>(get: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

/// Token lifetime in whole `unit`s; must be positive and representable.
fn parse_lifetime<F>(
    get: &F,
    var: &'static str,
    default: u32,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let count: u32 = parse_or(get, var, default)?;
    if count == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: count.to_string(),
        });
    }
    unit(i64::from(count)).ok_or_else(|| ConfigError::Invalid {
        var,
        value: count.to_string(),
    })
}
