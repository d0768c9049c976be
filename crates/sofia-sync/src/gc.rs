use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sofia_storage::RecordStore;
use tracing::{debug, info};

use crate::StageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub cutoff: NaiveDate,
    pub kept: usize,
    pub dropped: usize,
}

/// Evict records posted before `today - retention_days`, whatever their status.
pub async fn collect_garbage(
    store: &RecordStore,
    today: NaiveDate,
    retention_days: i64,
) -> Result<GcReport, StageError> {
    let cutoff = today - Duration::days(retention_days);
    let outcome = store.retain(|record| record.date_posted >= cutoff).await?;
    for notice_id in &outcome.dropped {
        debug!(notice_id = %notice_id, "evicted expired record");
    }
    info!(%cutoff, kept = outcome.kept, dropped = outcome.dropped.len(), "garbage collection finished");
    Ok(GcReport {
        cutoff,
        kept: outcome.kept,
        dropped: outcome.dropped.len(),
    })
}
