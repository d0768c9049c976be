use std::sync::Arc;

use serde::Serialize;
use sofia_adapters::SheetSink;
use sofia_core::{NoticeStatus, Record};
use sofia_storage::RecordStore;
use tracing::info;

use crate::StageError;

pub const SHEET_HEADER: [&str; 10] = [
    "Notice ID",
    "NAICS Codes",
    "Location",
    "Title",
    "One-line Description",
    "Set Aside",
    "SAM URL",
    "Due Date",
    "Related Notice",
    "Notes",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub rows: usize,
    pub header_written: bool,
}

/// One spreadsheet row, in `SHEET_HEADER` order. The notes column is left blank.
pub fn sheet_row(record: &Record) -> Vec<String> {
    vec![
        record.notice_id.clone(),
        record.naics_label(),
        record.location_label(),
        record.title.clone(),
        record.summary_sections().one_liner,
        record.set_aside.clone().unwrap_or_default(),
        record.sam_url.clone().unwrap_or_default(),
        record.due_date.clone().unwrap_or_default(),
        record.related_to.clone().unwrap_or_default(),
        String::new(),
    ]
}

/// Appends `emailed` records to the sheet and marks them `documented`.
pub struct SheetPublisher {
    sheet: Arc<dyn SheetSink>,
    store: Arc<RecordStore>,
}

impl SheetPublisher {
    pub fn new(sheet: Arc<dyn SheetSink>, store: Arc<RecordStore>) -> Self {
        Self { sheet, store }
    }

    pub async fn run(&self) -> Result<PublishReport, StageError> {
        let candidates = self.store.with_status(NoticeStatus::Emailed).await?;
        if candidates.is_empty() {
            info!("no emailed records to publish");
            return Ok(PublishReport::default());
        }

        let header_written = self.sheet.first_row_is_empty().await?;
        let mut rows = Vec::with_capacity(candidates.len() + 1);
        if header_written {
            rows.push(SHEET_HEADER.iter().map(|h| h.to_string()).collect());
        }
        rows.extend(candidates.iter().map(sheet_row));
        self.sheet.append_rows(rows).await?;

        let published = candidates.len();
        for mut record in candidates {
            record.advance_to(NoticeStatus::Documented)?;
            self.store.upsert(record).await?;
        }
        info!(rows = published, header_written, "sheet publish finished");
        Ok(PublishReport {
            rows: published,
            header_written,
        })
    }
}
