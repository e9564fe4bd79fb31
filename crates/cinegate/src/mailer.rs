//! Outbound mail.
//!
//! The SMTP transport is an external collaborator; [`LogMailer`] records what
//! would be sent. Sending always happens on a background task so a slow or
//! failing mail server never holds up a response.

use std::time::Duration;

use async_trait::async_trait;
use cinegate_config::SmtpConfig;
use cinegate_core::{PlaintextToken, UserId};
use parking_lot::Mutex;
use thiserror::Error;

/// An e-mail ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Delivery failure.
#[derive(Debug, Error)]
pub enum MailError {
    /// The server refused the message.
    #[error("message to {to} rejected: {reason}")]
    Rejected {
        /// Recipient address.
        to: String,
        /// Server explanation.
        reason: String,
    },

    /// The server could not be reached.
    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// Delivers e-mail.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Sends one message.
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Mailer that writes each message to the log instead of a mail server.
#[derive(Debug, Clone)]
pub struct LogMailer {
    host: String,
    port: u16,
    sender: String,
}

impl LogMailer {
    /// Creates a mailer reporting the configured server and sender.
    pub fn new(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            sender: config.sender.clone(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            smtp_host = %self.host,
            smtp_port = self.port,
            from = %self.sender,
            to = %email.to,
            subject = %email.subject,
            "email sent"
        );
        Ok(())
    }
}

/// Mailer that keeps messages in memory, failing the first `failures` sends.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
    failures: Mutex<u32>,
}

impl MemoryMailer {
    /// Creates a mailer that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `failures` sends fail with a transport error.
    #[must_use]
    pub fn failing(self, failures: u32) -> Self {
        *self.failures.lock() = failures;
        self
    }

    /// Returns the messages delivered so far.
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(MailError::Transport("connection refused".to_string()));
            }
        }
        self.sent.lock().push(email.clone());
        Ok(())
    }
}

/// Sends `email`, retrying up to `attempts` times with `backoff` between
/// tries. Returns the last error if every attempt fails.
pub async fn send_with_retry(
    mailer: &dyn Mailer,
    email: &Email,
    attempts: u32,
    backoff: Duration,
) -> Result<(), MailError> {
    let mut attempt = 1;
    loop {
        match mailer.send(email).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < attempts.max(1) => {
                tracing::warn!(attempt, error = %err, to = %email.to, "email send failed, retrying");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Builds the welcome message carrying the activation token.
pub fn welcome_email(to: &str, user_id: UserId, token: &PlaintextToken) -> Email {
    Email {
        to: to.to_string(),
        subject: "Welcome to CinemaGo!".to_string(),
        body: format!(
            "Hi,\n\n\
             Thanks for signing up for a CinemaGo account. Your user ID number is {user_id}.\n\n\
             Please send a request to the `PUT /v1/users/activated` endpoint with the \
             following JSON body to activate your account:\n\n\
             {{\"token\": \"{token}\"}}\n\n\
             Please note that this is a one-time use token and it will expire in 3 days.\n\n\
             Thanks,\n\nThe CinemaGo Team\n",
            token = token.as_str(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> Email {
        Email {
            to: "alice@example.com".to_string(),
            subject: "hello".to_string(),
            body: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failures() {
        let mailer = MemoryMailer::new().failing(2);
        send_with_retry(&mailer, &email(), 3, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let mailer = MemoryMailer::new().failing(5);
        let started = tokio::time::Instant::now();
        let err = send_with_retry(&mailer, &email(), 3, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Transport(_)));
        assert!(mailer.sent().is_empty());
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        let mailer = LogMailer::new(&SmtpConfig::default());
        assert!(mailer.send(&email()).await.is_ok());
    }

    #[test]
    fn test_welcome_email_carries_token() {
        let token = PlaintextToken::generate();
        let email = welcome_email("bob@example.com", UserId::new(42), &token);
        assert_eq!(email.to, "bob@example.com");
        assert!(email.body.contains(token.as_str()));
        assert!(email.body.contains("42"));
        assert!(email.body.contains("PUT /v1/users/activated"));
    }
}
