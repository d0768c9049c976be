use std::sync::Arc;

use askama::Template;
use serde::Serialize;
use sofia_adapters::MailTransport;
use sofia_core::{NoticeStatus, Record};
use sofia_storage::RecordStore;
use tracing::{info, warn};

use crate::StageError;

pub const DIGEST_SUBJECT: &str = "New Opportunities Roll-Up";
pub const NO_NEW_SUBJECT: &str = "No New Opportunities";

const NOT_SPECIFIED: &str = "Not specified";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub notice_id: String,
    pub title: String,
    pub one_liner: String,
    pub summary: String,
    pub date_posted: String,
    pub due_date: String,
    pub federal_org: String,
    pub set_aside: String,
    pub naics: String,
    pub location: String,
    pub sam_url: String,
}

impl From<&Record> for DigestEntry {
    fn from(record: &Record) -> Self {
        let sections = record.summary_sections();
        let or_unspecified = |value: Option<&str>| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(NOT_SPECIFIED)
                .to_string()
        };
        let naics = record.naics_label();
        Self {
            notice_id: record.notice_id.clone(),
            title: record.title.clone(),
            one_liner: sections.one_liner,
            summary: sections.summary,
            date_posted: record.date_posted.format("%Y-%m-%d").to_string(),
            due_date: or_unspecified(record.due_date.as_deref()),
            federal_org: record.federal_org.clone(),
            set_aside: or_unspecified(record.set_aside.as_deref()),
            naics: or_unspecified(Some(naics.as_str())),
            location: record.location_label(),
            sam_url: record.sam_url.clone().unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "digest.html")]
struct DigestTemplate {
    entries: Vec<DigestEntry>,
}

#[derive(Template)]
#[template(path = "no_opportunities.html")]
struct NoOpportunitiesTemplate;

pub fn render_digest(records: &[Record]) -> Result<String, askama::Error> {
    DigestTemplate {
        entries: records.iter().map(DigestEntry::from).collect(),
    }
    .render()
}

pub fn render_no_opportunities() -> Result<String, askama::Error> {
    NoOpportunitiesTemplate.render()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotifyOutcome {
    /// No recipients configured; nothing sent and nothing changed.
    NoRecipients,
    NothingNew { recipients: usize },
    Sent { recipients: usize, records: usize },
}

/// Emails the digest of `summarized` records and marks them `emailed`.
///
/// Records move only after every recipient accepted the message, so a failed
/// send leaves them `summarized` and the next run mails them again.
pub struct Notifier {
    mailer: Arc<dyn MailTransport>,
    store: Arc<RecordStore>,
    recipients: Vec<String>,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn MailTransport>, store: Arc<RecordStore>, recipients: Vec<String>) -> Self {
        Self {
            mailer,
            store,
            recipients,
        }
    }

    pub async fn run(&self) -> Result<NotifyOutcome, StageError> {
        if self.recipients.is_empty() {
            warn!("no notification recipients configured; skipping email roll-up");
            return Ok(NotifyOutcome::NoRecipients);
        }

        let candidates = self.store.with_status(NoticeStatus::Summarized).await?;
        if candidates.is_empty() {
            let html = render_no_opportunities()?;
            self.send_to_all(NO_NEW_SUBJECT, &html).await?;
            info!(recipients = self.recipients.len(), "no new opportunities notice sent");
            return Ok(NotifyOutcome::NothingNew {
                recipients: self.recipients.len(),
            });
        }

        let html = render_digest(&candidates)?;
        self.send_to_all(DIGEST_SUBJECT, &html).await?;

        let records = candidates.len();
        for mut record in candidates {
            record.advance_to(NoticeStatus::Emailed)?;
            self.store.upsert(record).await?;
        }
        info!(recipients = self.recipients.len(), records, "email roll-up delivered");
        Ok(NotifyOutcome::Sent {
            recipients: self.recipients.len(),
            records,
        })
    }

    async fn send_to_all(&self, subject: &str, html: &str) -> Result<(), StageError> {
        for recipient in &self.recipients {
            self.mailer.send_html(recipient, subject, html).await?;
            info!(recipient = %recipient, subject, "email accepted");
        }
        Ok(())
    }
}
