// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outgoing mail for password resets.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{MailConfig, SmtpConfig};

pub const RESET_SUBJECT: &str = "Password Reset Request";

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address {0:?}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// Delivers password-reset messages.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError>;
}

/// Link embedded in the reset email.
pub fn reset_link(base_url: &str, token: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}token={token}")
}

/// Reset link with the token masked, safe for logs.
pub fn redacted_reset_link(base_url: &str) -> String {
    reset_link(base_url, "<redacted>")
}

pub fn reset_body(link: &str) -> String {
    format!("Click the following link to reset your password: {link}")
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|_| MailError::Address(address.to_string()))
}

/// SMTP delivery with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reset_url: String,
}

impl SmtpMailer {
    pub fn new(smtp: &SmtpConfig, from: &str, reset_url: &str) -> Result<Self, MailError> {
        let from = parse_mailbox(from)?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.server)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(smtp.port);

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            reset_url: reset_url.to_string(),
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError> {
        let link = reset_link(&self.reset_url, token);
        let message = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to)?)
            .subject(RESET_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(reset_body(&link))
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        tracing::info!("Password reset email sent");
        Ok(())
    }
}

/// Logs reset requests instead of sending them. Used when no SMTP relay is
/// configured. The usable link only appears at `debug`.
pub struct LogMailer {
    reset_url: String,
}

impl LogMailer {
    pub fn new(reset_url: &str) -> Self {
        Self {
            reset_url: reset_url.to_string(),
        }
    }
}

#[async_trait]
impl MailSender for LogMailer {
    async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError> {
        parse_mailbox(to)?;
        tracing::warn!(
            to,
            link = %redacted_reset_link(&self.reset_url),
            "SMTP not configured; password reset mail not sent"
        );
        tracing::debug!(link = %reset_link(&self.reset_url, token), "Password reset link");
        Ok(())
    }
}

/// Pick the mail backend for the configuration.
pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn MailSender>, MailError> {
    match &config.smtp {
        Some(smtp) => Ok(Arc::new(SmtpMailer::new(
            smtp,
            &config.from,
            &config.reset_url,
        )?)),
        None => Ok(Arc::new(LogMailer::new(&config.reset_url))),
    }
}
