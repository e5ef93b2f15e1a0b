//! Outgoing mail for verification codes.
//!
//! [`SmtpMailer`] wraps the `lettre` async SMTP transport. [`LogMailer`] is
//! for development and tests: it records what would have been sent and logs
//! only the recipient.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType, transport::smtp::authentication::Credentials,
};

/// Default SMTP port (STARTTLS)
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Mail delivery errors
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// SMTP transport-level failure (authentication, connection, etc.)
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// Sender or recipient address could not be parsed
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled
    #[error("Email build error: {0}")]
    Build(String),

    /// Delivery refused without reaching a transport
    #[error("Mail delivery rejected: {0}")]
    Rejected(String),
}

/// Anything that can deliver a plain-text message
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// SMTP connection settings
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

/// Sends mail through an SMTP relay
pub struct SmtpMailer {
    config: MailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the transport once; connections are opened per message.
    pub fn new(config: MailConfig) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            config,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let email = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport.send(email).await?;
        log::info!("Mail '{subject}' sent to {to}");
        Ok(())
    }
}

/// A message captured by [`LogMailer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Development mailer: keeps messages in memory instead of sending them
#[derive(Clone, Default)]
pub struct LogMailer {
    outbox: Arc<Mutex<Vec<SentMail>>>,
    fail: bool,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every delivery fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Messages "sent" so far, oldest first
    pub fn sent(&self) -> Vec<SentMail> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<SentMail> {
        self.sent().pop()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Rejected(format!("delivery to {to} disabled")));
        }

        log::info!("Mail '{subject}' queued for {to} (not delivered)");
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        }
        Ok(())
    }
}
