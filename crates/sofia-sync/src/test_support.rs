use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use sofia_adapters::{
    AdapterError, CompletionClient, MailTransport, OpportunityHit, OpportunitySource, SearchQuery, SheetSink,
};
use sofia_core::{NoticeStatus, Record};
use sofia_storage::{DocumentBackend, MemoryBackend, RecordStore, StoreError};

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 20).unwrap()
}

pub fn memory_store() -> Arc<RecordStore> {
    Arc::new(RecordStore::new(MemoryBackend::new()))
}

pub fn hit(notice_id: &str, posted: &str) -> OpportunityHit {
    OpportunityHit {
        notice_id: Some(notice_id.to_string()),
        title: Some(format!("Opportunity {notice_id}")),
        full_parent_path_name: Some("DEPT OF DEFENSE".into()),
        posted_date: Some(posted.to_string()),
        type_of_set_aside_description: Some("Total Small Business Set-Aside (FAR 19.5)".into()),
        naics_codes: Some(vec!["541330".into()]),
        description: Some(format!("https://api.sam.gov/desc?noticeid={notice_id}")),
        ui_link: Some(format!("https://sam.gov/opp/{notice_id}/view")),
        ..Default::default()
    }
}

pub fn record(notice_id: &str, status: NoticeStatus) -> Record {
    let mut record = hit(notice_id, "2025-05-10").into_record(today()).unwrap();
    record.notice_status = status;
    if status != NoticeStatus::New {
        record.summary_text = Some(format!(
            "**One-line Description:** Brief {notice_id}\n**Summary:** Longer {notice_id}"
        ));
    }
    record
}

pub async fn seed(store: &RecordStore, records: Vec<Record>) {
    for record in records {
        store.upsert(record).await.unwrap();
    }
}

fn fake_failure(what: &str) -> AdapterError {
    AdapterError::HttpStatus {
        status: 503,
        url: format!("https://fake/{what}"),
        body: "unavailable".into(),
    }
}

#[derive(Default)]
pub struct FakeSource {
    hits: HashMap<String, Vec<OpportunityHit>>,
    failing_codes: HashSet<String>,
    failing_descriptions: HashSet<String>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(mut self, naics: &str, hits: Vec<OpportunityHit>) -> Self {
        self.hits.insert(naics.to_string(), hits);
        self
    }

    pub fn failing(mut self, naics: &str) -> Self {
        self.failing_codes.insert(naics.to_string());
        self
    }

    pub fn failing_description_for(mut self, notice_id: &str) -> Self {
        self.failing_descriptions.insert(notice_id.to_string());
        self
    }
}

#[async_trait]
impl OpportunitySource for FakeSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<OpportunityHit>, AdapterError> {
        if self.failing_codes.contains(&query.naics_code) {
            return Err(fake_failure("search"));
        }
        Ok(self.hits.get(&query.naics_code).cloned().unwrap_or_default())
    }

    async fn fetch_description(&self, description_url: &str) -> Result<String, AdapterError> {
        if self.failing_descriptions.iter().any(|id| description_url.ends_with(id.as_str())) {
            return Err(fake_failure("description"));
        }
        Ok(format!("Full description behind {description_url}"))
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Returns a fixed answer and records every prompt it was given.
pub struct FakeAi {
    answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeAi {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionClient for FakeAi {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, AdapterError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Err(fake_failure("models"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<SentMail>>,
    failing_recipients: HashSet<String>,
}

impl FakeMailer {
    pub fn failing_for(recipient: &str) -> Self {
        Self {
            failing_recipients: HashSet::from([recipient.to_string()]),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<(), AdapterError> {
        if self.failing_recipients.contains(to) {
            return Err(AdapterError::Build(format!("refused {to}")));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSheet {
    pub has_header: bool,
    pub fail_append: bool,
    pub appended: Mutex<Vec<Vec<Vec<String>>>>,
}

impl FakeSheet {
    pub fn appended(&self) -> Vec<Vec<Vec<String>>> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl SheetSink for FakeSheet {
    async fn first_row_is_empty(&self) -> Result<bool, AdapterError> {
        Ok(!self.has_header)
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<(), AdapterError> {
        if self.fail_append {
            return Err(fake_failure("append"));
        }
        self.appended.lock().unwrap().push(rows);
        Ok(())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Backend whose writes fail once the returned switch is set.
#[derive(Default)]
pub struct BreakableBackend {
    inner: MemoryBackend,
    broken: Arc<AtomicBool>,
}

impl BreakableBackend {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let backend = Self::default();
        let switch = backend.broken.clone();
        (backend, switch)
    }
}

#[async_trait]
impl DocumentBackend for BreakableBackend {
    fn describe(&self) -> String {
        "breakable".to_string()
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.load().await
    }

    async fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Blob("disk full".into()));
        }
        self.inner.save(bytes).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
