//! Pipeline stages, the daily/weekly runners and their cron schedule.

use sofia_adapters::AdapterError;
use sofia_core::TransitionError;
use sofia_storage::StoreError;
use thiserror::Error;

pub mod config;
pub mod fetcher;
pub mod gc;
pub mod notifier;
pub mod pipeline;
pub mod publisher;
pub mod summarizer;

#[cfg(test)]
mod test_support;

pub use config::{FilterSet, GoogleSheetConfig, SofiaConfig, StorageConfig};
pub use fetcher::{FetchReport, Fetcher};
pub use gc::{collect_garbage, GcReport};
pub use notifier::{NotifyOutcome, Notifier};
pub use pipeline::{build_scheduler, HealthReport, Pipeline, PipelineKind, PipelineSummary, RunError, StageOutcome};
pub use publisher::{PublishReport, SheetPublisher};
pub use summarizer::{SummarizeReport, Summarizer, SummarizerSettings};

/// Stage failure. `Store` and `Transition` abort the whole pipeline; the rest
/// only abort the stage that raised them.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("transport failure: {0}")]
    Transport(#[from] AdapterError),
    #[error("rendering digest: {0}")]
    Render(#[from] askama::Error),
}

impl StageError {
    pub fn aborts_pipeline(&self) -> bool {
        matches!(self, StageError::Store(_) | StageError::Transition(_))
    }
}
