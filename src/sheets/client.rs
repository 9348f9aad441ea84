use std::sync::Arc;

use async_trait::async_trait;
use error_stack::{IntoReport, Report, ResultExt};
use log::debug;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Credential;
use crate::config::AppConfig;
use crate::sheets::{Row, SheetStore, SheetsError, SheetsResult, SpreadsheetHandle, TabRange};

#[derive(Deserialize, Debug)]
struct CreateResponse {
    #[serde(rename = "spreadsheetId")]
    spreadsheet_id: String,
}

#[derive(Deserialize, Debug)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Google Sheets API v4 store.
pub struct GoogleSheets {
    client: reqwest::Client,
    base_url: String,
    credential: Arc<Credential>,
}

impl GoogleSheets {
    pub fn new(credential: Arc<Credential>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: AppConfig::SHEETS_API_URL.to_string(),
            credential,
        }
    }

    fn values_url(&self, handle: &SpreadsheetHandle, range: &TabRange) -> String {
        format!(
            "{}/{}/values/{}",
            self.base_url,
            handle.id(),
            urlencoding::encode(&range.to_string())
        )
    }

    async fn send(&self, request: RequestBuilder) -> SheetsResult<Response> {
        let token = self
            .credential
            .fresh_access_token()
            .await
            .change_context(SheetsError::Unauthorized)?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .into_report()
            .change_context(SheetsError::Request)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Report::new(classify_failure(status, &body))
            .attach_printable(format!("Google Sheets returned {status}: {body}")))
    }
}

/// Maps a failed response onto the error kinds callers branch on.
fn classify_failure(status: StatusCode, body: &str) -> SheetsError {
    match status {
        StatusCode::UNAUTHORIZED => SheetsError::Unauthorized,
        StatusCode::NOT_FOUND => SheetsError::RangeNotFound,
        StatusCode::BAD_REQUEST if body.contains("Unable to parse range") => {
            SheetsError::RangeNotFound
        }
        _ => SheetsError::Request,
    }
}

fn cell_to_string(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetStore for GoogleSheets {
    async fn create(&self, title: &str) -> SheetsResult<SpreadsheetHandle> {
        let request = self
            .client
            .post(&self.base_url)
            .query(&[("fields", "spreadsheetId")])
            .json(&json!({ "properties": { "title": title } }));
        let created = self
            .send(request)
            .await
            .attach_printable_lazy(|| format!("Failed to create spreadsheet {title:?}"))?
            .json::<CreateResponse>()
            .await
            .into_report()
            .change_context(SheetsError::Request)?;
        debug!("Created spreadsheet {}", created.spreadsheet_id);
        Ok(SpreadsheetHandle::new(created.spreadsheet_id))
    }

    async fn add_tab(&self, handle: &SpreadsheetHandle, tab_name: &str) -> SheetsResult<()> {
        let request = self
            .client
            .post(format!("{}/{}:batchUpdate", self.base_url, handle.id()))
            .json(&json!({
                "requests": [
                    { "addSheet": { "properties": { "title": tab_name } } }
                ]
            }));
        self.send(request)
            .await
            .attach_printable_lazy(|| format!("Failed to add tab {tab_name:?}"))?;
        Ok(())
    }

    async fn append_rows(
        &self,
        handle: &SpreadsheetHandle,
        rows: &[Row],
        range: &TabRange,
    ) -> SheetsResult<()> {
        let request = self
            .client
            .post(format!("{}:append", self.values_url(handle, range)))
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": rows }));
        self.send(request)
            .await
            .attach_printable_lazy(|| format!("Failed to append {} rows at {range}", rows.len()))?;
        Ok(())
    }

    async fn read_rows(
        &self,
        handle: &SpreadsheetHandle,
        range: &TabRange,
    ) -> SheetsResult<Vec<Vec<String>>> {
        let request = self.client.get(self.values_url(handle, range));
        let value_range = self
            .send(request)
            .await
            .attach_printable_lazy(|| format!("Failed to read {range}"))?
            .json::<ValueRange>()
            .await
            .into_report()
            .change_context(SheetsError::Request)?;
        Ok(value_range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}
