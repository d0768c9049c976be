//! HTML digest delivery over SMTP.
//!
//! [`SmtpMailer`] wraps the `lettre` async SMTP transport. Configuration comes
//! from the environment; when `SMTP_HOST` is unset [`SmtpConfig::from_env`]
//! returns `None` and the caller decides how to run without mail.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::{AdapterError, MailTransport};

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

const DEFAULT_FROM_ADDRESS: &str = "sofia@localhost";

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Implicit TLS (port 465 style) instead of STARTTLS.
    pub implicit_tls: bool,
}

impl SmtpConfig {
    /// | Variable        | Required | Default           |
    /// |-----------------|----------|-------------------|
    /// | `SMTP_HOST`     | yes      |                   |
    /// | `SMTP_PORT`     | no       | `587`             |
    /// | `SMTP_FROM`     | no       | `sofia@localhost` |
    /// | `SMTP_USER`     | no       |                   |
    /// | `SMTP_PASSWORD` | no       |                   |
    /// | `SMTP_SECURE`   | no       | `false`           |
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok().filter(|h| !h.trim().is_empty())?;
        Some(Self {
            host,
            port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            user: std::env::var("SMTP_USER").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            implicit_tls: std::env::var("SMTP_SECURE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
        })
    }
}

pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, AdapterError> {
        let builder = if config.implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let mut builder = builder.port(config.port);
        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from: config.from_address.parse()?,
            transport: builder.build(),
        })
    }
}

pub fn build_html_message(
    from: &Mailbox,
    to: &str,
    subject: &str,
    html: &str,
) -> Result<Message, AdapterError> {
    Message::builder()
        .from(from.clone())
        .to(to.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())
        .map_err(|e| AdapterError::Build(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<(), AdapterError> {
        let email = build_html_message(&self.from, to, subject, html)?;
        self.transport.send(email).await?;
        info!(recipient = to, subject, "email sent");
        Ok(())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        if self.transport.test_connection().await? {
            Ok(())
        } else {
            Err(AdapterError::Build("SMTP server rejected the connection test".to_string()))
        }
    }
}
