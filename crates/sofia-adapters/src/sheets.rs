use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ensure_success, AdapterError, SheetSink};

pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
}

impl ServiceAccountKey {
    /// Accepts keys pasted into env files with literal `\n` sequences.
    pub fn new(client_email: impl Into<String>, private_key: &str) -> Self {
        Self {
            client_email: client_email.into(),
            private_key: private_key.replace("\\n", "\n"),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Option<Vec<Vec<serde_json::Value>>>,
}

#[derive(Debug, Serialize)]
struct AppendBody {
    values: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct GoogleSheetsClient {
    http: reqwest::Client,
    key: ServiceAccountKey,
    spreadsheet_id: String,
    sheet_name: String,
    base_url: String,
    token_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsClient {
    pub fn new(
        http: reqwest::Client,
        key: ServiceAccountKey,
        spreadsheet_id: impl Into<String>,
        sheet_name: impl Into<String>,
    ) -> Self {
        Self {
            http,
            key,
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
            base_url: SHEETS_API_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            token: Mutex::new(None),
        }
    }

    fn signed_assertion(&self) -> Result<String, AdapterError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_url,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| AdapterError::Auth(format!("invalid service account key: {e}")))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AdapterError::Auth(format!("signing token assertion: {e}")))
    }

    async fn access_token(&self) -> Result<String, AdapterError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let response = self
            .http
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = ensure_success(response).await?.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS as u64));
        debug!(expires_in = lifetime.as_secs(), "obtained Google access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn spreadsheet_url(&self, tail: &[&str]) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AdapterError::Decode(format!("bad Sheets base url: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AdapterError::Decode("Sheets base url cannot take a path".into()))?;
            segments.push(&self.spreadsheet_id);
            segments.extend(tail);
        }
        Ok(url)
    }

    pub fn header_range(&self) -> String {
        format!("{}!A1:J1", quote_sheet_name(&self.sheet_name))
    }
}

/// Sheet names with anything beyond letters, digits and underscores must be single-quoted in A1 notation.
pub fn quote_sheet_name(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

fn first_row_blank(range: &ValueRange) -> bool {
    match range.values.as_ref().and_then(|rows| rows.first()) {
        None => true,
        Some(row) => row.iter().all(|cell| match cell {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.trim().is_empty(),
            _ => false,
        }),
    }
}

#[async_trait]
impl SheetSink for GoogleSheetsClient {
    async fn first_row_is_empty(&self) -> Result<bool, AdapterError> {
        let token = self.access_token().await?;
        let range = self.header_range();
        let url = self.spreadsheet_url(&["values", range.as_str()])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let range: ValueRange = ensure_success(response).await?.json().await?;
        Ok(first_row_blank(&range))
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<(), AdapterError> {
        let token = self.access_token().await?;
        let target = format!("{}:append", quote_sheet_name(&self.sheet_name));
        let url = self.spreadsheet_url(&["values", target.as_str()])?;
        let row_count = rows.len();
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&AppendBody { values: rows })
            .send()
            .await?;
        ensure_success(response).await?;
        debug!(rows = row_count, "appended rows to sheet");
        Ok(())
    }

    async fn ping(&self) -> Result<(), AdapterError> {
        let token = self.access_token().await?;
        let url = self.spreadsheet_url(&[])?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[("fields", "spreadsheetId")])
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}
