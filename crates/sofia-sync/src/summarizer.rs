use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sofia_adapters::{CompletionClient, OpportunitySource};
use sofia_core::{NoticeStatus, Record, ONE_LINER_MARKER, SUMMARY_MARKER};
use sofia_storage::RecordStore;
use tracing::{info, warn};

use crate::StageError;

pub const SYSTEM_PROMPT: &str = "You summarize U.S. federal contracting opportunities for a small \
business development team. Answer in Markdown and use exactly the headings you are given.";

const NO_DESCRIPTION: &str = "No description provided.";
const NOT_SPECIFIED: &str = "Not specified";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizerSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            batch_size: 2,
            batch_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummarizeReport {
    pub batches: usize,
    pub delays: usize,
    pub summarized: usize,
    pub failed: usize,
}

/// Deterministic user prompt for one record.
pub fn compose_prompt(record: &Record, description: &str) -> String {
    let or_unspecified = |value: String| if value.trim().is_empty() { NOT_SPECIFIED.to_string() } else { value };
    let description = if description.trim().is_empty() { NO_DESCRIPTION } else { description.trim() };

    format!(
        "Summarize the following federal contracting opportunity.\n\
         \n\
         Notice ID: {notice_id}\n\
         Title: {title}\n\
         Posted: {posted}\n\
         Organization: {org}\n\
         Set-aside: {set_aside}\n\
         NAICS codes: {naics}\n\
         Place of performance: {location}\n\
         Response due: {due}\n\
         \n\
         Description:\n\
         {description}\n\
         \n\
         Respond in exactly this format:\n\
         {ONE_LINER_MARKER} <one sentence describing the work>\n\
         {SUMMARY_MARKER} <one paragraph on the scope of work and who may bid>",
        notice_id = record.notice_id,
        title = or_unspecified(record.title.clone()),
        posted = record.date_posted.format("%Y-%m-%d"),
        org = or_unspecified(record.federal_org.clone()),
        set_aside = or_unspecified(record.set_aside.clone().unwrap_or_default()),
        naics = or_unspecified(record.naics_label()),
        location = or_unspecified(record.location_label()),
        due = or_unspecified(record.due_date.clone().unwrap_or_default()),
    )
}

/// Summarizes `new` records in fixed-size batches, pausing between batches.
pub struct Summarizer {
    source: Arc<dyn OpportunitySource>,
    ai: Arc<dyn CompletionClient>,
    store: Arc<RecordStore>,
    settings: SummarizerSettings,
}

impl Summarizer {
    pub fn new(
        source: Arc<dyn OpportunitySource>,
        ai: Arc<dyn CompletionClient>,
        store: Arc<RecordStore>,
        settings: SummarizerSettings,
    ) -> Self {
        Self {
            source,
            ai,
            store,
            settings,
        }
    }

    pub async fn run(&self) -> Result<SummarizeReport, StageError> {
        let pending = self.store.with_status(NoticeStatus::New).await?;
        let mut report = SummarizeReport::default();
        if pending.is_empty() {
            info!("no new records to summarize");
            return Ok(report);
        }

        let batch_size = self.settings.batch_size.max(1);
        let total_batches = pending.len().div_ceil(batch_size);
        for (index, batch) in pending.chunks(batch_size).enumerate() {
            report.batches += 1;
            info!(batch = index + 1, of = total_batches, records = batch.len(), "summarizing batch");

            for record in batch {
                let notice_id = record.notice_id.clone();
                match self.summarize_one(record.clone()).await {
                    Ok(()) => report.summarized += 1,
                    Err(err) if err.aborts_pipeline() => return Err(err),
                    Err(err) => {
                        report.failed += 1;
                        warn!(notice_id = %notice_id, error = %err, "summary failed; record stays new");
                    }
                }
            }

            if index + 1 < total_batches {
                report.delays += 1;
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        info!(
            batches = report.batches,
            summarized = report.summarized,
            failed = report.failed,
            "summarize stage finished"
        );
        Ok(report)
    }

    async fn summarize_one(&self, mut record: Record) -> Result<(), StageError> {
        let description = match record.description_url.as_deref() {
            Some(url) => self.source.fetch_description(url).await?,
            None => String::new(),
        };
        let prompt = compose_prompt(&record, &description);
        let text = self.ai.complete(SYSTEM_PROMPT, &prompt).await?;
        record.mark_summarized(text)?;
        self.store.upsert(record).await?;
        Ok(())
    }
}
