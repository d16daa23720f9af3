//! Outbound email.
//!
//! Handlers build an [`EmailMessage`] and hand it to an [`EmailSender`]. The
//! default sender only logs, which is what local development wants. Delivery
//! errors are returned to the caller untouched.

use async_trait::async_trait;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> anyhow::Result<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: EmailMessage) -> anyhow::Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            body = %message.body,
            "email send stub"
        );
        Ok(())
    }
}
