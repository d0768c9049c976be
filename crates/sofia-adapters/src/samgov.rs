use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use scraper::Html;
use serde::{Deserialize, Serialize};
use sofia_core::{parse_api_date, NoticeStatus, Record};
use tracing::debug;

use crate::{ensure_success, AdapterError, OpportunitySource};

pub const SAM_SEARCH_URL: &str = "https://api.sam.gov/opportunities/v2/search";

const SAM_DATE_FORMAT: &str = "%m/%d/%Y";

/// One search request: a single NAICS code combined with every notice type and set-aside code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub naics_code: String,
    pub notice_types: Vec<String>,
    pub set_asides: Vec<String>,
    pub posted_from: NaiveDate,
    pub posted_to: NaiveDate,
    pub limit: u32,
}

impl SearchQuery {
    /// Query pairs without the API key; repeated codes become repeated parameters.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("ncode", self.naics_code.clone())];
        params.extend(self.notice_types.iter().map(|p| ("ptype", p.clone())));
        params.extend(self.set_asides.iter().map(|s| ("typeOfSetAside", s.clone())));
        params.push(("postedFrom", self.posted_from.format(SAM_DATE_FORMAT).to_string()));
        params.push(("postedTo", self.posted_to.format(SAM_DATE_FORMAT).to_string()));
        params.push(("limit", self.limit.to_string()));
        params.push(("offset", "0".to_string()));
        params.push(("sortBy", "createdDate".to_string()));
        params.push(("sortOrder", "desc".to_string()));
        params
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub total_records: Option<u64>,
    #[serde(default)]
    pub opportunities_data: Option<Vec<OpportunityHit>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityHit {
    pub notice_id: Option<String>,
    pub title: Option<String>,
    pub solicitation_number: Option<String>,
    pub full_parent_path_name: Option<String>,
    pub posted_date: Option<String>,
    #[serde(rename = "type")]
    pub notice_type: Option<String>,
    pub response_dead_line: Option<String>,
    pub type_of_set_aside_description: Option<String>,
    pub type_of_set_aside: Option<String>,
    pub naics_code: Option<String>,
    pub naics_codes: Option<Vec<String>>,
    pub place_of_performance: Option<PlaceOfPerformance>,
    pub description: Option<String>,
    pub ui_link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOfPerformance {
    pub city: Option<NamedCode>,
    pub state: Option<NamedCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCode {
    pub code: Option<String>,
    pub name: Option<String>,
}

impl OpportunityHit {
    /// Normalize into a fresh `new` record first seen on `today`.
    pub fn into_record(self, today: NaiveDate) -> Result<Record, AdapterError> {
        let notice_id = self
            .notice_id
            .and_then(non_blank)
            .ok_or_else(|| AdapterError::Decode("opportunity without noticeId".to_string()))?;
        let date_posted = self
            .posted_date
            .as_deref()
            .and_then(parse_api_date)
            .ok_or_else(|| {
                AdapterError::Decode(format!(
                    "opportunity {notice_id} has unusable postedDate {:?}",
                    self.posted_date
                ))
            })?;

        let naics_codes = match self.naics_codes {
            Some(codes) if !codes.is_empty() => codes,
            _ => self.naics_code.into_iter().collect(),
        };
        let place = self.place_of_performance.unwrap_or_default();
        let place_name = |part: Option<NamedCode>| {
            part.and_then(|p| p.name)
                .map(|name| name.trim().to_string())
                .unwrap_or_default()
        };

        Ok(Record {
            notice_id,
            notice_type: self.notice_type.and_then(non_blank),
            related_to: self.solicitation_number.and_then(non_blank),
            date_fetched: today,
            title: self.title.unwrap_or_default(),
            federal_org: self.full_parent_path_name.unwrap_or_default(),
            date_posted,
            due_date: self.response_dead_line.and_then(non_blank),
            set_aside: self
                .type_of_set_aside_description
                .and_then(non_blank)
                .or(self.type_of_set_aside.and_then(non_blank)),
            naics_codes,
            location_city: place_name(place.city),
            location_state: place_name(place.state),
            description_url: self.description.and_then(non_blank),
            sam_url: self.ui_link.and_then(non_blank),
            summary_text: None,
            notice_status: NoticeStatus::New,
        })
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct DescriptionResponse {
    description: Option<String>,
}

/// Collapse an HTML fragment into whitespace-normalized text.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Description bodies come back as `{"description": "<html>"}`; anything else is used as-is.
pub fn decode_description(body: &str) -> String {
    match serde_json::from_str::<DescriptionResponse>(body) {
        Ok(parsed) => html_to_text(parsed.description.as_deref().unwrap_or_default()),
        Err(_) => html_to_text(body),
    }
}

pub struct SamGovClient {
    http: reqwest::Client,
    api_key: String,
    search_url: String,
}

impl SamGovClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            search_url: SAM_SEARCH_URL.to_string(),
        }
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }
}

#[async_trait]
impl OpportunitySource for SamGovClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<OpportunityHit>, AdapterError> {
        debug!(naics = %query.naics_code, "SAM.gov search request");
        let response = self
            .http
            .get(&self.search_url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(&query.params())
            .send()
            .await?;
        let parsed: SearchResponse = ensure_success(response).await?.json().await?;
        debug!(
            naics = %query.naics_code,
            total_records = parsed.total_records.unwrap_or_default(),
            "SAM.gov search response"
        );
        Ok(parsed.opportunities_data.unwrap_or_default())
    }

    async fn fetch_description(&self, description_url: &str) -> Result<String, AdapterError> {
        let response = self
            .http
            .get(description_url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        Ok(decode_description(&body))
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        let today = Utc::now().date_naive().format(SAM_DATE_FORMAT).to_string();
        let response = self
            .http
            .get(&self.search_url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("postedFrom", today.as_str()),
                ("postedTo", today.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}
