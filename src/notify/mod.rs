//! Email notifications
//!
//! SMTP credentials are stored as named JSON blocks. Flows send through the
//! [`Notifier`] trait so tests and dry runs can swap in [`MemoryNotifier`].

mod credentials;
mod email;

pub use credentials::EmailServerCredentials;
pub use email::{drift_message, EmailMessage, MemoryNotifier, Notifier, SmtpNotifier};
