//! Google Sheets values API over plain REST.
//!
//! Token minting is not done here: the credential file holds a ready OAuth
//! access token (bare, or as `{"access_token": "..."}`) refreshed by whatever
//! provisions the job.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{a1, StoreError, TableStore, WriteSummary};

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub struct SheetsStore {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    token: String,
}

#[derive(Deserialize)]
struct TokenFile {
    access_token: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    updated_cells: usize,
}

impl SheetsStore {
    /// Build a client from a credential file. A missing or unreadable file
    /// is an `Auth` error.
    pub fn from_token_file(
        spreadsheet_id: impl Into<String>,
        token_file: impl AsRef<Path>,
    ) -> Result<Self, StoreError> {
        let path = token_file.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Auth(format!("credential file {}: {}", path.display(), e)))?;
        let token = parse_token(&raw)
            .ok_or_else(|| StoreError::Auth(format!("no access token in {}", path.display())))?;
        Ok(Self::new(spreadsheet_id, token))
    }

    pub fn new(spreadsheet_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            token: token.into(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn sheet_url(&self) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}/edit", self.spreadsheet_id)
    }

    fn values_url(&self, range: &str, action: Option<&str>) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| StoreError::Other(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Other(format!("bad API base {}", self.base_url)))?;
            segments.push(&self.spreadsheet_id).push("values");
            match action {
                Some(action) => segments.push(&format!("{}:{}", range, action)),
                None => segments.push(range),
            };
        }
        Ok(url)
    }
}

fn parse_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str::<TokenFile>(trimmed)
            .ok()
            .map(|t| t.access_token)
            .filter(|t| !t.is_empty());
    }
    Some(trimmed.to_string())
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(StoreError::Auth(format!("{}: {}", status, body)));
    }
    Err(StoreError::Server {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl TableStore for SheetsStore {
    async fn read_column(&self, sheet: &str, column: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let range = a1(sheet, &format!("{0}:{0}", column));
        let url = self.values_url(&range, None)?;
        debug!(range = %range, "reading column");
        let resp = self.client.get(url).bearer_auth(&self.token).send().await?;
        let body: ValueRange = check(resp).await?.json().await?;
        Ok(body.values)
    }

    async fn write(
        &self,
        sheet: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Result<WriteSummary, StoreError> {
        let range = a1(sheet, &format!("A{}", start_row));
        let mut url = self.values_url(&range, None)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = ValueRangeBody {
            range: &range,
            major_dimension: "ROWS",
            values: rows,
        };
        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let updated: UpdateResponse = check(resp).await?.json().await?;
        info!(range = %range, cells = updated.updated_cells, "sheet updated");
        Ok(WriteSummary {
            cells_written: updated.updated_cells,
        })
    }

    async fn clear(&self, sheet: &str) -> Result<bool, StoreError> {
        let range = a1(sheet, "A:Z");
        let url = self.values_url(&range, Some("clear"))?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check(resp).await?;
        info!(range = %range, "sheet cleared");
        Ok(true)
    }
}
