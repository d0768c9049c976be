//! Client contracts and HTTP/SMTP implementations for the services SOFIA talks to.

use async_trait::async_trait;
use thiserror::Error;

pub mod mail;
pub mod openai;
pub mod samgov;
pub mod sheets;

pub use mail::{SmtpConfig, SmtpMailer};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use samgov::{html_to_text, OpportunityHit, SamGovClient, SearchQuery};
pub use sheets::{GoogleSheetsClient, ServiceAccountKey};

const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("smtp transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("email build error: {0}")]
    Build(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Opportunity search plus lazy description lookup.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<OpportunityHit>, AdapterError>;

    /// Full description text behind a hit's description reference.
    async fn fetch_description(&self, description_url: &str) -> Result<String, AdapterError>;

    async fn ping(&self) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AdapterError>;

    async fn ping(&self) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<(), AdapterError>;

    async fn ping(&self) -> Result<(), AdapterError>;
}

/// Destination spreadsheet for documented notices.
#[async_trait]
pub trait SheetSink: Send + Sync {
    async fn first_row_is_empty(&self) -> Result<bool, AdapterError>;

    /// Insert `rows` below the existing data in one call.
    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<(), AdapterError>;

    async fn ping(&self) -> Result<(), AdapterError>;
}

/// Pass successful responses through; turn the rest into `HttpStatus` without leaking query strings.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut url = response.url().clone();
    url.set_query(None);
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(AdapterError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
        body,
    })
}
