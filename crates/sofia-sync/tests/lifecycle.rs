use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sofia_adapters::{AdapterError, CompletionClient, MailTransport, OpportunityHit, OpportunitySource, SearchQuery};
use sofia_core::{NoticeStatus, Record};
use sofia_storage::{FileBackend, RecordStore};
use sofia_sync::{Notifier, NotifyOutcome, Summarizer, SummarizerSettings};

struct NoSearch;

#[async_trait]
impl OpportunitySource for NoSearch {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<OpportunityHit>, AdapterError> {
        Ok(Vec::new())
    }

    async fn fetch_description(&self, _description_url: &str) -> Result<String, AdapterError> {
        Ok("<p>Provide <b>bridge</b> inspection services.</p>".to_string())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

struct CannedAi(&'static str);

#[async_trait]
impl CompletionClient for CannedAi {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, AdapterError> {
        Ok(self.0.to_string())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[derive(Default)]
struct Outbox(Mutex<Vec<(String, String)>>);

#[async_trait]
impl MailTransport for Outbox {
    async fn send_html(&self, to: &str, _subject: &str, html: &str) -> Result<(), AdapterError> {
        self.0.lock().unwrap().push((to.to_string(), html.to_string()));
        Ok(())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

fn new_record() -> Record {
    Record {
        notice_id: "abc123".into(),
        notice_type: Some("Solicitation".into()),
        related_to: None,
        date_fetched: NaiveDate::from_ymd_opt(2025, 5, 20).unwrap(),
        title: "Bridge Inspection".into(),
        federal_org: "DEPT OF TRANSPORTATION".into(),
        date_posted: NaiveDate::from_ymd_opt(2025, 5, 18).unwrap(),
        due_date: Some("2025-06-18".into()),
        set_aside: Some("SBA".into()),
        naics_codes: vec!["541330".into()],
        location_city: "Richmond".into(),
        location_state: "Virginia".into(),
        description_url: Some("https://api.sam.gov/prod/opportunities/v1/noticedesc?noticeid=abc123".into()),
        sam_url: Some("https://sam.gov/opp/abc123/view".into()),
        summary_text: None,
        notice_status: NoticeStatus::New,
    }
}

#[tokio::test]
async fn record_moves_from_new_to_emailed_through_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(FileBackend::new(dir.path().join("storage.json"))));
    store.upsert(new_record()).await.unwrap();

    let answer = "**One-line Description:** Foo\n**Summary:** Bar";
    let summarizer = Summarizer::new(
        Arc::new(NoSearch),
        Arc::new(CannedAi(answer)),
        store.clone(),
        SummarizerSettings {
            batch_size: 2,
            batch_delay: Duration::ZERO,
        },
    );
    let report = summarizer.run().await.unwrap();
    assert_eq!(report.summarized, 1);

    let summarized = store.get("abc123").await.unwrap().unwrap();
    assert_eq!(summarized.summary_text.as_deref(), Some(answer));
    assert_eq!(summarized.notice_status, NoticeStatus::Summarized);

    let outbox = Arc::new(Outbox::default());
    let silent = Notifier::new(outbox.clone(), store.clone(), Vec::new());
    assert_eq!(silent.run().await.unwrap(), NotifyOutcome::NoRecipients);
    assert!(outbox.0.lock().unwrap().is_empty());
    assert_eq!(
        store.get("abc123").await.unwrap().unwrap().notice_status,
        NoticeStatus::Summarized
    );

    let notifier = Notifier::new(outbox.clone(), store.clone(), vec!["team@example.com".into()]);
    let outcome = notifier.run().await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Sent { recipients: 1, records: 1 });

    let sent = outbox.0.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "team@example.com");
    assert!(sent[0].1.contains("Foo"));
    assert!(sent[0].1.contains("Bar"));

    let reopened = RecordStore::new(FileBackend::new(dir.path().join("storage.json")));
    let emailed = reopened.get("abc123").await.unwrap().unwrap();
    assert_eq!(emailed.notice_status, NoticeStatus::Emailed);
    assert_eq!(emailed.summary_text.as_deref(), Some(answer));
}
