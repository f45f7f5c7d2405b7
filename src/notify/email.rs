//! Sending email notifications

use super::credentials::EmailServerCredentials;
use crate::config::SmtpType;
use crate::error::{MlopsError, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub subject: String,
    /// HTML body
    pub body: String,
    pub email_to: String,
    pub email_from: String,
}

/// Alert for a drift share: any drifted column counts as drift
pub fn drift_message(share_of_drifted_columns: f64, email_to: &str, email_from: &str) -> EmailMessage {
    let (subject, body) = if share_of_drifted_columns > 0.0 {
        (
            "Data drift detected!".to_string(),
            format!(
                "We have identified a data drift between heart.csv and reference.csv with a 'share_of_drifted_columns' of, {:.5}",
                share_of_drifted_columns
            ),
        )
    } else {
        (
            "No data drift detected!".to_string(),
            "We have identified no data drift between heart.csv and reference.csv".to_string(),
        )
    };
    EmailMessage {
        subject,
        body,
        email_to: email_to.to_string(),
        email_from: email_from.to_string(),
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Sends through an SMTP relay
pub struct SmtpNotifier {
    credentials: EmailServerCredentials,
}

impl SmtpNotifier {
    pub fn new(credentials: EmailServerCredentials) -> Self {
        Self { credentials }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let c = &self.credentials;
        let builder = match c.smtp_type {
            SmtpType::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&c.smtp_server)?,
            SmtpType::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&c.smtp_server)?,
            SmtpType::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&c.smtp_server),
        };
        Ok(builder
            .port(c.smtp_port)
            .credentials(Credentials::new(c.username.clone(), c.password.clone()))
            .build())
    }
}

fn build_email(message: &EmailMessage) -> Result<Message> {
    Ok(Message::builder()
        .from(message.email_from.parse()?)
        .to(message.email_to.parse()?)
        .subject(&message.subject)
        .header(ContentType::TEXT_HTML)
        .body(message.body.clone())?)
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let email = build_email(message)?;
        let mailer = self.transport()?;
        let response = mailer.send(email).await?;
        if !response.is_positive() {
            return Err(MlopsError::NotificationError(format!(
                "relay answered {}",
                response.code()
            )));
        }
        info!(to = %message.email_to, subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Keeps messages in memory instead of sending them
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<EmailMessage>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        build_email(message)?;
        self.sent
            .lock()
            .map_err(|_| MlopsError::NotificationError("outbox lock poisoned".to_string()))?
            .push(message.clone());
        info!(to = %message.email_to, subject = %message.subject, "Email recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_message_texts() {
        let msg = drift_message(0.2142857, "me@example.com", "noreply@mlops.com");
        assert_eq!(msg.subject, "Data drift detected!");
        assert_eq!(
            msg.body,
            "We have identified a data drift between heart.csv and reference.csv with a 'share_of_drifted_columns' of, 0.21429"
        );

        let msg = drift_message(0.0, "me@example.com", "noreply@mlops.com");
        assert_eq!(msg.subject, "No data drift detected!");
        assert_eq!(
            msg.body,
            "We have identified no data drift between heart.csv and reference.csv"
        );
        assert_eq!(msg.email_from, "noreply@mlops.com");
    }

    #[tokio::test]
    async fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        let msg = drift_message(0.5, "me@example.com", "noreply@mlops.com");
        notifier.send(&msg).await.unwrap();
        assert_eq!(notifier.sent(), vec![msg]);
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let notifier = MemoryNotifier::new();
        let msg = drift_message(0.5, "not an address", "noreply@mlops.com");
        let err = notifier.send(&msg).await.unwrap_err();
        assert!(matches!(err, MlopsError::NotificationError(_)));
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn test_transport_builds_for_each_mode() {
        for smtp_type in [SmtpType::Ssl, SmtpType::StartTls, SmtpType::Plain] {
            let notifier = SmtpNotifier::new(EmailServerCredentials {
                username: "u".to_string(),
                password: "p".to_string(),
                smtp_server: "smtp.example.com".to_string(),
                smtp_port: 465,
                smtp_type,
            });
            assert!(notifier.transport().is_ok());
        }
    }
}
