use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sofia_adapters::{
    GoogleSheetsClient, MailTransport, OpenAiClient, OpenAiConfig, SamGovClient, ServiceAccountKey, SheetSink,
    SmtpConfig, SmtpMailer,
};
use sofia_core::NoticeStatus;
use sofia_storage::{build_http_client, FileBackend, HttpClientConfig, RecordStore, S3Backend};
use sofia_sync::{build_scheduler, FilterSet, Pipeline, PipelineKind, SofiaConfig, StorageConfig, SummarizerSettings};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "sofia")]
#[command(about = "Solicitation Opportunity Finder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scheduler, startup run and HTTP service (default)
    Serve,
    /// Fetch then summarize
    Daily,
    /// Fetch, summarize, email, publish, collect
    Weekly,
    Fetch,
    Summarize,
    Notify,
    Publish,
    Collect,
    /// Record counts per status
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SofiaConfig::from_env()?;
    let _log_guard = init_tracing(&config.log_dir)?;

    let pipeline = Arc::new(build_pipeline(&config).await?);
    let today = chrono::Utc::now().date_naive();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(pipeline, &config).await?,
        Commands::Daily => print_json(&pipeline.run(PipelineKind::Daily).await?)?,
        Commands::Weekly => print_json(&pipeline.run(PipelineKind::Weekly).await?)?,
        Commands::Fetch => print_json(&pipeline.fetcher().run(today).await?)?,
        Commands::Summarize => print_json(&pipeline.summarizer().run().await?)?,
        Commands::Notify => {
            let notifier = pipeline.notifier().context("SMTP_HOST is not set")?;
            print_json(&notifier.run().await?)?;
        }
        Commands::Publish => {
            let publisher = pipeline
                .publisher()
                .context("GOOGLE_SHEET_ID, GOOGLE_CLIENT_EMAIL and GOOGLE_PRIVATE_KEY must be set")?;
            print_json(&publisher.run().await?)?;
        }
        Commands::Collect => print_json(&pipeline.collect(today).await?)?,
        Commands::List => {
            let records = pipeline.store().get_all().await?;
            for status in NoticeStatus::ALL {
                let count = records.iter().filter(|r| r.notice_status == status).count();
                println!("{status:<11} {count}");
            }
            for record in &records {
                println!(
                    "{} {:<11} {} {}",
                    record.date_posted, record.notice_status, record.notice_id, record.title
                );
            }
        }
    }

    Ok(())
}

async fn serve(pipeline: Arc<Pipeline>, config: &SofiaConfig) -> Result<()> {
    let _scheduler = if config.scheduler_enabled {
        let sched = build_scheduler(pipeline.clone(), &config.daily_cron, &config.weekly_cron).await?;
        sched.start().await.context("starting scheduler")?;
        Some(sched)
    } else {
        warn!("scheduler disabled; pipelines run only on demand");
        None
    };

    if config.run_on_startup {
        let startup = pipeline.clone();
        tokio::spawn(async move {
            startup.run_logged(PipelineKind::Weekly, "startup").await;
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    sofia_web::serve(listener, sofia_web::AppState::new(pipeline)).await
}

async fn build_store(config: &SofiaConfig) -> Result<RecordStore> {
    let store = match &config.storage {
        StorageConfig::File { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            RecordStore::new(FileBackend::new(path.clone()))
        }
        StorageConfig::Spaces {
            endpoint,
            region,
            bucket,
            object_key,
        } => RecordStore::new(
            S3Backend::connect(endpoint.as_deref(), region, bucket.clone(), object_key.clone()).await,
        ),
    };
    Ok(store)
}

async fn build_pipeline(config: &SofiaConfig) -> Result<Pipeline> {
    let store = Arc::new(build_store(config).await?);
    info!(backend = %store.describe(), "record store ready");

    let http = build_http_client(&HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })?;

    if config.sam_api_key.is_empty() {
        warn!("SAM_API_KEY is not set; opportunity searches will be rejected");
    }
    let source = SamGovClient::new(http.clone(), config.sam_api_key.as_str())
        .with_search_url(config.sam_search_url.as_str());
    let ai = OpenAiClient::new(
        http.clone(),
        OpenAiConfig {
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.clone(),
            model: config.openai_model.clone(),
        },
    );
    let filters = FilterSet::load(&config.filters_path).await?;
    info!(naics = ?filters.naics_codes, "search filters loaded");

    let mut pipeline = Pipeline::new(store, Arc::new(source), Arc::new(ai))
        .with_filters(filters)
        .with_summarizer(SummarizerSettings {
            batch_size: config.summary_batch_size,
            batch_delay: config.summary_batch_delay,
        })
        .with_windows(config.lookback_days, config.retention_days);

    match SmtpConfig::from_env() {
        Some(smtp) => {
            if config.notify_emails.is_empty() {
                warn!("NOTIFY_EMAILS is empty; email roll-ups will be skipped");
            }
            let mailer: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new(&smtp).context("configuring SMTP")?);
            pipeline = pipeline.with_mailer(mailer, config.notify_emails.clone());
        }
        None => warn!("SMTP_HOST is not set; email roll-ups are disabled"),
    }

    match &config.google_sheet {
        Some(sheet) => {
            let client: Arc<dyn SheetSink> = Arc::new(GoogleSheetsClient::new(
                http,
                ServiceAccountKey::new(sheet.client_email.as_str(), &sheet.private_key),
                sheet.spreadsheet_id.as_str(),
                sheet.sheet_name.as_str(),
            ));
            pipeline = pipeline.with_sheet(client);
        }
        None => warn!("Google Sheets credentials are not set; sheet publishing is disabled"),
    }

    Ok(pipeline)
}

fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("sofia.log")
        .max_log_files(14)
        .build(log_dir)
        .with_context(|| format!("creating log files under {}", log_dir.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
