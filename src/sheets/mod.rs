use std::fmt;

use async_trait::async_trait;
use error_stack::ResultExt;
use log::info;
use serde::Serialize;

use crate::config::AppConfig;
use crate::spotify::track::Track;
use crate::youtube::ErrorLabel;

pub mod client;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetsError {
    Unauthorized,
    /// The named tab or range does not exist in the spreadsheet.
    RangeNotFound,
    Request,
}

impl fmt::Display for SheetsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetsError::Unauthorized => f.write_str("Google Sheets authorization error"),
            SheetsError::RangeNotFound => f.write_str("Google Sheets range not found"),
            SheetsError::Request => f.write_str("Google Sheets error"),
        }
    }
}

impl std::error::Error for SheetsError {}

pub type SheetsResult<T> = error_stack::Result<T, SheetsError>;

/// Identifier of a spreadsheet created or opened during a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpreadsheetHandle(String);

impl SpreadsheetHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Accepts a bare id or a `docs.google.com/spreadsheets/d/<id>/...` url.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let id = match input.split_once("/spreadsheets/d/") {
            Some((_, rest)) => rest.split(&['/', '?', '#'][..]).next().unwrap_or_default(),
            None => input,
        };
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self::new(id))
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn url(&self) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}", self.0)
    }
}

impl fmt::Display for SpreadsheetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One four-cell sheet row: name, artist, album and a link or error label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Row([String; 4]);

impl Row {
    fn header(cells: [&str; 4]) -> Self {
        Self(cells.map(str::to_string))
    }

    pub fn success_header() -> Self {
        Self::header(AppConfig::SUCCESS_HEADER)
    }

    pub fn error_header() -> Self {
        Self::header(AppConfig::ERROR_HEADER)
    }

    pub fn success(track: &Track, link: &str) -> Self {
        Self([
            track.name.clone(),
            track.artist.clone(),
            track.album.clone(),
            link.to_string(),
        ])
    }

    pub fn error(track: &Track, label: ErrorLabel) -> Self {
        Self([
            track.name.clone(),
            track.artist.clone(),
            track.album.clone(),
            label.to_string(),
        ])
    }

    #[cfg(test)]
    pub fn cells(&self) -> &[String; 4] {
        &self.0
    }
}

/// A tab-qualified A1 address such as `Sheet1!A501` or `Errors!A2:D`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabRange {
    tab: String,
    start_row: usize,
    end_column: Option<char>,
}

impl TabRange {
    /// Column A of `start_row` (1-based).
    pub fn anchor(tab: &str, start_row: usize) -> Self {
        Self {
            tab: tab.to_string(),
            start_row,
            end_column: None,
        }
    }

    /// Columns A through `end_column`, from `start_row` to the end of the tab.
    pub fn columns(tab: &str, start_row: usize, end_column: char) -> Self {
        Self {
            tab: tab.to_string(),
            start_row,
            end_column: Some(end_column),
        }
    }

    #[cfg(test)]
    pub fn tab(&self) -> &str {
        &self.tab
    }

    #[cfg(test)]
    pub fn start_row(&self) -> usize {
        self.start_row
    }

    #[cfg(test)]
    pub fn end_column(&self) -> Option<char> {
        self.end_column
    }

    fn quoted_tab(&self) -> String {
        let plain = self
            .tab
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if plain {
            self.tab.clone()
        } else {
            format!("'{}'", self.tab.replace('\'', "''"))
        }
    }
}

impl fmt::Display for TabRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!A{}", self.quoted_tab(), self.start_row)?;
        if let Some(end_column) = self.end_column {
            write!(f, ":{}", end_column)?;
        }
        Ok(())
    }
}

/// Remote spreadsheet storage.
#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn create(&self, title: &str) -> SheetsResult<SpreadsheetHandle>;

    async fn add_tab(&self, handle: &SpreadsheetHandle, tab_name: &str) -> SheetsResult<()>;

    /// Appends `rows` at `range` without overwriting existing content.
    async fn append_rows(
        &self,
        handle: &SpreadsheetHandle,
        rows: &[Row],
        range: &TabRange,
    ) -> SheetsResult<()>;

    async fn read_rows(
        &self,
        handle: &SpreadsheetHandle,
        range: &TabRange,
    ) -> SheetsResult<Vec<Vec<String>>>;
}

/// Writes `rows` to `tab` in chunks of `AppConfig::BATCH_SIZE`, the first
/// chunk anchored at `start_row` and every following one shifted by the rows
/// already written. Returns the number of rows written.
///
/// A failing chunk stops the write; earlier chunks stay in the sheet.
pub async fn append_rows_batched<S: SheetStore + ?Sized>(
    store: &S,
    handle: &SpreadsheetHandle,
    tab: &str,
    rows: &[Row],
    start_row: usize,
) -> SheetsResult<usize> {
    let mut written = 0;
    for chunk in rows.chunks(AppConfig::BATCH_SIZE) {
        let range = TabRange::anchor(tab, start_row + written);
        store
            .append_rows(handle, chunk, &range)
            .await
            .attach_printable_lazy(|| format!("{written} of {} rows were already written", rows.len()))?;
        written += chunk.len();
        info!("Wrote batch to {range}: rows {} to {written}", written - chunk.len());
    }
    Ok(written)
}
