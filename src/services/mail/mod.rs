//! Outgoing e-mail.
//!
//! `Mailer` is cheap to clone and is shared through `AppState`. Without SMTP
//! configuration it falls back to `LogTransport`, which only records the
//! message in the log.

pub mod messages;

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;

use crate::config::{Config, SmtpConfig};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("recipient has no e-mail address")]
    NoRecipient,
}

/// A rendered message with plain-text and HTML bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, from: &str, email: &Email) -> Result<(), MailError>;
}

pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, from: &str, email: &Email) -> Result<(), MailError> {
        let message = Message::builder()
            .from(from.parse::<Mailbox>()?)
            .to(email.to.parse::<Mailbox>()?)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, from: &str, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            from,
            to = %email.to,
            subject = %email.subject,
            "SMTP not configured, e-mail not sent:\n{}",
            email.text
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    from: String,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>, from: impl Into<String>) -> Self {
        Self {
            transport,
            from: from.into(),
        }
    }

    pub fn log_only(from: impl Into<String>) -> Self {
        Self::new(Arc::new(LogTransport), from)
    }

    pub fn from_config(config: &Config) -> Result<Self, MailError> {
        match &config.smtp {
            Some(smtp) => {
                tracing::info!(host = %smtp.host, port = smtp.port, "SMTP mailer configured");
                Ok(Self::new(Arc::new(SmtpMailTransport::new(smtp)?), &config.email_from))
            }
            None => {
                tracing::warn!("SMTP_HOST not set, outgoing e-mail will only be logged");
                Ok(Self::log_only(&config.email_from))
            }
        }
    }

    pub async fn send(&self, email: &Email) -> Result<(), MailError> {
        if email.to.trim().is_empty() {
            return Err(MailError::NoRecipient);
        }
        self.transport.deliver(&self.from, email).await
    }

    /// Sends on a background task. Failures are logged, never returned.
    pub fn send_in_background(&self, email: Email) {
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&email).await {
                tracing::warn!(to = %email.to, subject = %email.subject, "Failed to send e-mail: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Email)>>,
    }

    #[async_trait]
    impl MailTransport for Recorder {
        async fn deliver(&self, from: &str, email: &Email) -> Result<(), MailError> {
            self.sent.lock().unwrap().push((from.to_string(), email.clone()));
            Ok(())
        }
    }

    fn email(to: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "Hello".to_string(),
            text: "plain".to_string(),
            html: "<p>html</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn mailer_uses_configured_sender() {
        let recorder = Arc::new(Recorder::default());
        let mailer = Mailer::new(recorder.clone(), "quiz@example.com");

        mailer.send(&email("user@example.com")).await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "quiz@example.com");
        assert_eq!(sent[0].1.to, "user@example.com");
    }

    #[tokio::test]
    async fn blank_recipient_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let mailer = Mailer::new(recorder.clone(), "quiz@example.com");

        let err = mailer.send(&email("  ")).await.unwrap_err();
        assert!(matches!(err, MailError::NoRecipient));
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn log_transport_always_succeeds() {
        let mailer = Mailer::log_only("quiz@example.com");
        assert!(mailer.send(&email("user@example.com")).await.is_ok());
    }
}
