use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sofia_adapters::{OpportunitySource, SearchQuery};
use sofia_storage::RecordStore;
use tracing::{info, warn};

use crate::config::FilterSet;
use crate::StageError;

pub const SEARCH_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub queries: usize,
    pub failed_queries: usize,
    pub hits: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub rejected: usize,
}

/// Discovers opportunities and inserts the ones the store has not seen.
pub struct Fetcher {
    source: Arc<dyn OpportunitySource>,
    store: Arc<RecordStore>,
    filters: FilterSet,
    lookback_days: i64,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn OpportunitySource>,
        store: Arc<RecordStore>,
        filters: FilterSet,
        lookback_days: i64,
    ) -> Self {
        Self {
            source,
            store,
            filters,
            lookback_days,
        }
    }

    pub fn queries_for(&self, today: NaiveDate) -> Vec<SearchQuery> {
        self.filters
            .naics_codes
            .iter()
            .map(|naics| SearchQuery {
                naics_code: naics.clone(),
                notice_types: self.filters.notice_types.clone(),
                set_asides: self.filters.set_asides.clone(),
                posted_from: today - Duration::days(self.lookback_days),
                posted_to: today,
                limit: SEARCH_PAGE_LIMIT,
            })
            .collect()
    }

    /// One search per NAICS code. A failed search is logged and skipped; a store failure aborts.
    pub async fn run(&self, today: NaiveDate) -> Result<FetchReport, StageError> {
        let mut report = FetchReport::default();

        for query in self.queries_for(today) {
            report.queries += 1;
            let hits = match self.source.search(&query).await {
                Ok(hits) => hits,
                Err(err) => {
                    report.failed_queries += 1;
                    warn!(naics = %query.naics_code, error = %err, "opportunity search failed");
                    continue;
                }
            };
            report.hits += hits.len();

            for hit in hits {
                let record = match hit.into_record(today) {
                    Ok(record) => record,
                    Err(err) => {
                        report.rejected += 1;
                        warn!(naics = %query.naics_code, error = %err, "skipping malformed opportunity");
                        continue;
                    }
                };
                if self.store.exists(&record.notice_id).await? {
                    report.skipped_existing += 1;
                    info!(notice_id = %record.notice_id, "already stored; skipping");
                    continue;
                }
                self.store.upsert(record).await?;
                report.inserted += 1;
            }
        }

        info!(
            queries = report.queries,
            failed = report.failed_queries,
            hits = report.hits,
            inserted = report.inserted,
            skipped = report.skipped_existing,
            "fetch stage finished"
        );
        Ok(report)
    }
}
