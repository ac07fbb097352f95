//! Delivery of activation tokens to newly registered users.
//!
//! Registration hands the plaintext activation token to a [`Mailer`]. The
//! default [`LogMailer`] writes it to the log, which is enough for local
//! development; a deployment plugs in a real transport through
//! [`crate::AppState::with_mailer`].

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::models::{Token, User};

/// Failure while handing a message to the transport.
#[derive(Error, Debug)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Sends account emails.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Send the welcome message carrying `token` to `user`.
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError>;
}

/// Logs activation tokens instead of emailing them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError> {
        info!(
            user_id = user.id,
            email = %user.email,
            activation_token = %token.plaintext,
            expiry = %token.expiry,
            "Activation token issued (not emailed: log mailer in use)"
        );
        Ok(())
    }
}
