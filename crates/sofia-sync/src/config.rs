use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sofia_adapters::openai::{DEFAULT_MODEL, OPENAI_API_URL};
use sofia_adapters::samgov::SAM_SEARCH_URL;
use tracing::info;

pub const DEFAULT_DAILY_CRON: &str = "0 1 6 * * Sun,Mon,Tue,Wed,Thu,Sat";
pub const DEFAULT_WEEKLY_CRON: &str = "0 1 6 * * Fri";

/// Upper bound for `RETENTION_DAYS` and `LOOKBACK_DAYS`.
pub const MAX_WINDOW_DAYS: u64 = 3650;

/// Search filter codes, loaded from `filters.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    pub naics_codes: Vec<String>,
    pub set_asides: Vec<String>,
    pub notice_types: Vec<String>,
}

impl Default for FilterSet {
    fn default() -> Self {
        let owned = |codes: &[&str]| codes.iter().map(|c| c.to_string()).collect();
        Self {
            naics_codes: owned(&["541330"]),
            set_asides: owned(&["SBA", "SDVOSBC", "SDVOSBS", "IEE", "ISBEE", "BICiv", "VSA", "VSS"]),
            notice_types: owned(&["p", "a", "r", "s", "o", "k", "i"]),
        }
    }
}

impl FilterSet {
    /// Read filters from `path`, falling back to the built-in set when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::from_yaml(&raw).with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "filter file not found; using built-in filters");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let filters: Self = serde_yaml::from_str(raw)?;
        if filters.naics_codes.is_empty() {
            bail!("filter file lists no naics_codes");
        }
        Ok(filters)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    File {
        path: PathBuf,
    },
    Spaces {
        endpoint: Option<String>,
        region: String,
        bucket: String,
        object_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleSheetConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub client_email: String,
    pub private_key: String,
}

#[derive(Debug, Clone)]
pub struct SofiaConfig {
    pub sam_api_key: String,
    pub sam_search_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub notify_emails: Vec<String>,
    pub google_sheet: Option<GoogleSheetConfig>,
    pub storage: StorageConfig,
    pub filters_path: PathBuf,
    pub port: u16,
    pub log_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub run_on_startup: bool,
    pub daily_cron: String,
    pub weekly_cron: String,
    pub summary_batch_size: usize,
    pub summary_batch_delay: Duration,
    pub retention_days: i64,
    pub lookback_days: i64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl SofiaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str, default: bool| {
            var(key)
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(default)
        };
        let number = |key: &str, default: u64| -> Result<u64> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a non-negative integer, got {v:?}")),
                None => Ok(default),
            }
        };

        let storage = match var("STORAGE_BACKEND").as_deref().unwrap_or("file") {
            "file" => StorageConfig::File {
                path: var("STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/storage.json")),
            },
            "s3" | "spaces" => StorageConfig::Spaces {
                endpoint: var("SPACES_ENDPOINT"),
                region: var("SPACES_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                bucket: var("SPACES_BUCKET").context("SPACES_BUCKET is required when STORAGE_BACKEND=s3")?,
                object_key: var("SPACES_OBJECT_KEY").unwrap_or_else(|| "storage.json".to_string()),
            },
            other => bail!("unknown STORAGE_BACKEND {other:?}; expected \"file\" or \"s3\""),
        };

        let google_sheet = match (var("GOOGLE_SHEET_ID"), var("GOOGLE_CLIENT_EMAIL"), var("GOOGLE_PRIVATE_KEY")) {
            (Some(spreadsheet_id), Some(client_email), Some(private_key)) => Some(GoogleSheetConfig {
                spreadsheet_id,
                sheet_name: var("GOOGLE_SHEET_NAME").unwrap_or_else(|| "Sheet1".to_string()),
                client_email,
                private_key,
            }),
            _ => None,
        };

        let window = |key: &str| -> Result<i64> {
            let days = number(key, 30)?;
            if days > MAX_WINDOW_DAYS {
                bail!("{key} must be at most {MAX_WINDOW_DAYS} days");
            }
            Ok(days as i64)
        };

        let summary_batch_size = number("SUMMARY_BATCH_SIZE", 2)?;
        if summary_batch_size == 0 {
            bail!("SUMMARY_BATCH_SIZE must be at least 1");
        }

        Ok(Self {
            sam_api_key: var("SAM_API_KEY").unwrap_or_default(),
            sam_search_url: var("SAM_API_URL").unwrap_or_else(|| SAM_SEARCH_URL.to_string()),
            openai_api_key: var("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| OPENAI_API_URL.to_string()),
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            notify_emails: var("NOTIFY_EMAILS")
                .map(|raw| parse_recipients(&raw))
                .unwrap_or_default(),
            google_sheet,
            storage,
            filters_path: var("SOFIA_FILTERS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("filters.yaml")),
            port: number("PORT", 3000)?
                .try_into()
                .context("PORT must fit in 16 bits")?,
            log_dir: var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
            scheduler_enabled: flag("SOFIA_SCHEDULER_ENABLED", true),
            run_on_startup: flag("SOFIA_RUN_ON_STARTUP", true),
            daily_cron: var("DAILY_CRON").unwrap_or_else(|| DEFAULT_DAILY_CRON.to_string()),
            weekly_cron: var("WEEKLY_CRON").unwrap_or_else(|| DEFAULT_WEEKLY_CRON.to_string()),
            summary_batch_size: summary_batch_size as usize,
            summary_batch_delay: Duration::from_secs(number("SUMMARY_BATCH_DELAY_SECS", 60)?),
            retention_days: window("RETENTION_DAYS")?,
            lookback_days: window("LOOKBACK_DAYS")?,
            http_timeout_secs: number("SOFIA_HTTP_TIMEOUT_SECS", 30)?,
            user_agent: var("SOFIA_USER_AGENT").unwrap_or_else(|| "sofia-bot/0.1".to_string()),
        })
    }
}

/// Comma-separated list with blanks dropped.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
