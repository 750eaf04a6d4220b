//! SMTP client for e-mail notifications

use async_trait::async_trait;
use crate::config::SmtpConfig;
use crate::error::{ApprovalError, Result};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Delivers a plain-text e-mail
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let builder = if config.enable_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| ApprovalError::Config(format!("Invalid SMTP relay {}: {}", config.host, e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        if !config.user.is_empty() {
            builder = builder.credentials(Credentials::new(config.user.clone(), config.password.clone()));
        }

        let from: Mailbox = config.from.parse()
            .map_err(|e| ApprovalError::Config(format!("Invalid SMTP from address '{}': {}", config.from, e)))?;

        log::info!(
            "SMTP notifications via {}:{} (tls: {})",
            config.host, config.port, config.enable_tls
        );

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let to: Mailbox = to.parse()
            .map_err(|e| ApprovalError::TransientIo(format!("Invalid recipient address '{}': {}", to, e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| ApprovalError::TransientIo(format!("Failed to build e-mail: {}", e)))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| ApprovalError::TransientIo(format!("SMTP delivery failed: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_config(from: &str) -> SmtpConfig {
        SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            enable_tls: false,
            user: String::new(),
            password: String::new(),
            from: from.to_string(),
        }
    }

    #[test]
    fn test_invalid_from_address_rejected() {
        let result = SmtpMailer::new(&smtp_config("not an address"));
        assert!(matches!(result, Err(ApprovalError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_transient() {
        let mailer = SmtpMailer::new(&smtp_config("gate@example.com")).unwrap();
        let result = mailer.send("nobody", "subject", "body").await;
        assert!(matches!(result, Err(ApprovalError::TransientIo(_))));
    }
}
