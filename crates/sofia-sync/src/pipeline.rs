use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sofia_adapters::{CompletionClient, MailTransport, OpportunitySource, SheetSink};
use sofia_storage::RecordStore;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::FilterSet;
use crate::fetcher::{FetchReport, Fetcher};
use crate::gc::{collect_garbage, GcReport};
use crate::notifier::{Notifier, NotifyOutcome};
use crate::publisher::{PublishReport, SheetPublisher};
use crate::summarizer::{SummarizeReport, Summarizer, SummarizerSettings};
use crate::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// fetch, summarize
    Daily,
    /// fetch, summarize, notify, publish, collect
    Weekly,
}

impl PipelineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Daily => "daily",
            PipelineKind::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Completed(T),
    /// Transport-class failure; later stages still ran.
    Failed(String),
    Skipped(String),
}

impl<T> StageOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub kind: PipelineKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetch: StageOutcome<FetchReport>,
    pub summarize: StageOutcome<SummarizeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<StageOutcome<NotifyOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<StageOutcome<PublishReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collect: Option<StageOutcome<GcReport>>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a pipeline run is already in progress")]
    Busy,
    #[error("pipeline aborted: {0}")]
    Aborted(#[from] StageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub services: BTreeMap<&'static str, bool>,
}

impl HealthReport {
    pub fn from_services(services: BTreeMap<&'static str, bool>) -> Self {
        let healthy = services.values().all(|ok| *ok);
        Self {
            status: if healthy { "ok" } else { "fail" },
            services,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Owns the stage collaborators and serializes pipeline runs behind one job lock.
pub struct Pipeline {
    store: Arc<RecordStore>,
    source: Arc<dyn OpportunitySource>,
    ai: Arc<dyn CompletionClient>,
    mailer: Option<Arc<dyn MailTransport>>,
    sheet: Option<Arc<dyn SheetSink>>,
    recipients: Vec<String>,
    filters: FilterSet,
    summarizer: SummarizerSettings,
    lookback_days: i64,
    retention_days: i64,
    job_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(store: Arc<RecordStore>, source: Arc<dyn OpportunitySource>, ai: Arc<dyn CompletionClient>) -> Self {
        Self {
            store,
            source,
            ai,
            mailer: None,
            sheet: None,
            recipients: Vec::new(),
            filters: FilterSet::default(),
            summarizer: SummarizerSettings::default(),
            lookback_days: 30,
            retention_days: 30,
            job_lock: Mutex::new(()),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn MailTransport>, recipients: Vec<String>) -> Self {
        self.mailer = Some(mailer);
        self.recipients = recipients;
        self
    }

    pub fn with_sheet(mut self, sheet: Arc<dyn SheetSink>) -> Self {
        self.sheet = Some(sheet);
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_summarizer(mut self, settings: SummarizerSettings) -> Self {
        self.summarizer = settings;
        self
    }

    pub fn with_windows(mut self, lookback_days: i64, retention_days: i64) -> Self {
        self.lookback_days = lookback_days;
        self.retention_days = retention_days;
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn fetcher(&self) -> Fetcher {
        Fetcher::new(
            self.source.clone(),
            self.store.clone(),
            self.filters.clone(),
            self.lookback_days,
        )
    }

    pub fn summarizer(&self) -> Summarizer {
        Summarizer::new(self.source.clone(), self.ai.clone(), self.store.clone(), self.summarizer)
    }

    pub fn notifier(&self) -> Option<Notifier> {
        self.mailer
            .as_ref()
            .map(|mailer| Notifier::new(mailer.clone(), self.store.clone(), self.recipients.clone()))
    }

    pub fn publisher(&self) -> Option<SheetPublisher> {
        self.sheet
            .as_ref()
            .map(|sheet| SheetPublisher::new(sheet.clone(), self.store.clone()))
    }

    pub async fn collect(&self, today: NaiveDate) -> Result<GcReport, StageError> {
        collect_garbage(&self.store, today, self.retention_days).await
    }

    /// Run `kind`, waiting for any run already in progress.
    pub async fn run(&self, kind: PipelineKind) -> Result<PipelineSummary, RunError> {
        let _guard = self.job_lock.lock().await;
        self.run_locked(kind, Utc::now().date_naive()).await
    }

    /// Run `kind` only if no other run holds the job lock.
    pub async fn try_run(&self, kind: PipelineKind) -> Result<PipelineSummary, RunError> {
        let _guard = self.job_lock.try_lock().map_err(|_| RunError::Busy)?;
        self.run_locked(kind, Utc::now().date_naive()).await
    }

    pub async fn run_on(&self, kind: PipelineKind, today: NaiveDate) -> Result<PipelineSummary, RunError> {
        let _guard = self.job_lock.lock().await;
        self.run_locked(kind, today).await
    }

    /// Entry point for cron jobs and the startup run; failures are logged, never raised.
    pub async fn run_logged(&self, kind: PipelineKind, trigger: &'static str) {
        info!(trigger, kind = kind.as_str(), "pipeline starting");
        match self.run(kind).await {
            Ok(summary) => info!(trigger, run_id = %summary.run_id, "pipeline completed"),
            Err(err) => error!(trigger, kind = kind.as_str(), error = %err, "pipeline failed"),
        }
    }

    async fn run_locked(&self, kind: PipelineKind, today: NaiveDate) -> Result<PipelineSummary, RunError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id, kind = kind.as_str());
        async move {
            let started_at = Utc::now();
            let fetch = settle("fetch", self.fetcher().run(today).await)?;
            let summarize = settle("summarize", self.summarizer().run().await)?;

            let (notify, publish, collect) = match kind {
                PipelineKind::Daily => (None, None, None),
                PipelineKind::Weekly => {
                    let notify = match self.notifier() {
                        Some(notifier) => settle("notify", notifier.run().await)?,
                        None => skipped("notify", "SMTP is not configured"),
                    };
                    let publish = match self.publisher() {
                        Some(publisher) => settle("publish", publisher.run().await)?,
                        None => skipped("publish", "Google Sheets is not configured"),
                    };
                    let collect = settle("collect", self.collect(today).await)?;
                    (Some(notify), Some(publish), Some(collect))
                }
            };

            let summary = PipelineSummary {
                run_id,
                kind,
                started_at,
                finished_at: Utc::now(),
                fetch,
                summarize,
                notify,
                publish,
                collect,
            };
            info!(
                elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
                "pipeline finished"
            );
            Ok::<_, RunError>(summary)
        }
        .instrument(span)
        .await
    }

    /// Ping every collaborator. Unconfigured collaborators count as unhealthy.
    pub async fn health(&self) -> HealthReport {
        let mut services = BTreeMap::new();
        services.insert("samgov", probe("samgov", self.source.ping().await));
        services.insert("openai", probe("openai", self.ai.ping().await));
        services.insert(
            "sheets",
            match &self.sheet {
                Some(sheet) => probe("sheets", sheet.ping().await),
                None => unconfigured("sheets"),
            },
        );
        services.insert(
            "smtp",
            match &self.mailer {
                Some(mailer) => probe("smtp", mailer.ping().await),
                None => unconfigured("smtp"),
            },
        );
        services.insert("storage", probe("storage", self.store.ping().await));

        let report = HealthReport::from_services(services);
        if report.is_healthy() {
            info!("health check passed");
        } else {
            warn!(services = ?report.services, "health check failed");
        }
        report
    }
}

fn settle<T>(stage: &'static str, result: Result<T, StageError>) -> Result<StageOutcome<T>, StageError> {
    match result {
        Ok(report) => Ok(StageOutcome::Completed(report)),
        Err(err) if err.aborts_pipeline() => {
            error!(stage, error = %err, "stage failed; aborting pipeline");
            Err(err)
        }
        Err(err) => {
            error!(stage, error = %err, "stage failed; continuing with next stage");
            Ok(StageOutcome::Failed(err.to_string()))
        }
    }
}

fn skipped<T>(stage: &'static str, reason: &str) -> StageOutcome<T> {
    warn!(stage, reason, "stage skipped");
    StageOutcome::Skipped(reason.to_string())
}

fn probe<E: std::fmt::Display>(service: &'static str, result: Result<(), E>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(service, error = %err, "health probe failed");
            false
        }
    }
}

fn unconfigured(service: &'static str) -> bool {
    warn!(service, "health probe skipped; service not configured");
    false
}

/// Register the daily and weekly cron jobs (UTC, seconds field first).
pub async fn build_scheduler(pipeline: Arc<Pipeline>, daily_cron: &str, weekly_cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for (cron, kind) in [(daily_cron, PipelineKind::Daily), (weekly_cron, PipelineKind::Weekly)] {
        let pipeline = pipeline.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                pipeline.run_logged(kind, "cron").await;
            })
        })
        .with_context(|| format!("creating {} job for cron {cron}", kind.as_str()))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(cron, kind = kind.as_str(), "scheduled pipeline");
    }
    Ok(sched)
}
