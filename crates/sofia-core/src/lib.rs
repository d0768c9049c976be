//! Core domain model and notice lifecycle for SOFIA.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ONE_LINER_MARKER: &str = "**One-line Description:**";
pub const SUMMARY_MARKER: &str = "**Summary:**";
pub const ONE_LINER_FALLBACK: &str = "No one-liner available.";
pub const SUMMARY_FALLBACK: &str = "No summary available.";

/// Lifecycle position of a stored notice. Transitions only move forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeStatus {
    New,
    Summarized,
    Emailed,
    Documented,
}

impl NoticeStatus {
    pub const ALL: [NoticeStatus; 4] = [
        NoticeStatus::New,
        NoticeStatus::Summarized,
        NoticeStatus::Emailed,
        NoticeStatus::Documented,
    ];

    pub fn next(self) -> Option<NoticeStatus> {
        match self {
            Self::New => Some(Self::Summarized),
            Self::Summarized => Some(Self::Emailed),
            Self::Emailed => Some(Self::Documented),
            Self::Documented => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Summarized => "summarized",
            Self::Emailed => "emailed",
            Self::Documented => "documented",
        }
    }
}

impl fmt::Display for NoticeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notice {notice_id}: illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub notice_id: String,
    pub from: NoticeStatus,
    pub to: NoticeStatus,
}

/// One discovered opportunity, persisted as a camelCase JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub notice_id: String,
    #[serde(default)]
    pub notice_type: Option<String>,
    #[serde(default)]
    pub related_to: Option<String>,
    pub date_fetched: NaiveDate,
    pub title: String,
    pub federal_org: String,
    pub date_posted: NaiveDate,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub set_aside: Option<String>,
    #[serde(default)]
    pub naics_codes: Vec<String>,
    #[serde(default)]
    pub location_city: String,
    #[serde(default)]
    pub location_state: String,
    #[serde(default)]
    pub description_url: Option<String>,
    #[serde(default)]
    pub sam_url: Option<String>,
    #[serde(default)]
    pub summary_text: Option<String>,
    pub notice_status: NoticeStatus,
}

impl Record {
    /// Move to `target`, which must be the immediate successor of the current status.
    pub fn advance_to(&mut self, target: NoticeStatus) -> Result<(), TransitionError> {
        if self.notice_status.next() != Some(target) {
            return Err(TransitionError {
                notice_id: self.notice_id.clone(),
                from: self.notice_status,
                to: target,
            });
        }
        self.notice_status = target;
        Ok(())
    }

    /// Store the AI text verbatim and advance `new -> summarized`.
    pub fn mark_summarized(&mut self, summary_text: String) -> Result<(), TransitionError> {
        self.advance_to(NoticeStatus::Summarized)?;
        self.summary_text = Some(summary_text);
        Ok(())
    }

    pub fn summary_sections(&self) -> SummarySections {
        SummarySections::parse(self.summary_text.as_deref())
    }

    /// "city, state" with empty parts dropped.
    pub fn location_label(&self) -> String {
        [self.location_city.trim(), self.location_state.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn naics_label(&self) -> String {
        self.naics_codes.join(", ")
    }
}

/// The two parts of an AI summary, with literal fallbacks for missing markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySections {
    pub one_liner: String,
    pub summary: String,
}

impl SummarySections {
    pub fn parse(text: Option<&str>) -> Self {
        let text = text.unwrap_or_default();

        let one_liner = after_marker(text, ONE_LINER_MARKER)
            .map(str::trim_start)
            .and_then(|rest| rest.lines().next())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .unwrap_or(ONE_LINER_FALLBACK);

        let summary = after_marker(text, SUMMARY_MARKER)
            .map(str::trim)
            .filter(|body| !body.is_empty())
            .unwrap_or(SUMMARY_FALLBACK);

        Self {
            one_liner: one_liner.to_string(),
            summary: summary.to_string(),
        }
    }
}

fn after_marker<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.find(marker).map(|idx| &text[idx + marker.len()..])
}

/// Parse the date part of an upstream date or timestamp (`2025-01-31`, `2025-01-31T17:00:00-05:00`, `01/31/2025`).
pub fn parse_api_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%m/%d/%Y") {
            return Some(date);
        }
    }
    None
}
