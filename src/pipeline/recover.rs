use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::pipeline::progress::{ProgressEvent, ProgressSink};
use crate::pipeline::rate_limiter::RateLimiter;
use crate::pipeline::{describe, lift, PipelineError, PipelineResult, Services};
use crate::sheets::{append_rows_batched, Row, SpreadsheetHandle, TabRange};
use crate::spotify::track::Track;
use crate::youtube::{ErrorLabel, ResolutionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoverySummary {
    /// Rows read from the Errors tab.
    pub attempted: usize,
    pub recovered: usize,
    /// Rows not searched again because the YouTube quota ran out.
    pub skipped: usize,
}

/// Re-runs the lookups recorded in a spreadsheet's Errors tab.
pub struct RecoveryPipeline {
    services: Services,
    limiter: Arc<dyn RateLimiter>,
}

impl RecoveryPipeline {
    pub fn new(services: Services, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { services, limiter }
    }

    /// Appends every row of the Errors tab that now resolves to a link to the
    /// primary tab. Rows stay in the Errors tab either way.
    pub async fn retry(
        &self,
        handle: &SpreadsheetHandle,
        sink: &dyn ProgressSink,
    ) -> PipelineResult<RecoverySummary> {
        let result = self.run(handle, sink).await;
        if let Err(report) = &result {
            error!("Retry of spreadsheet {} failed: {}", handle, describe(report));
            let message = match report.current_context() {
                PipelineError::RangeNotFound => format!(
                    "Could not find \"{tab}\" sheet. Please check the Spreadsheet ID or ensure the sheet has an \"{tab}\" tab.",
                    tab = AppConfig::ERRORS_TAB
                ),
                _ => describe(report),
            };
            sink.emit(ProgressEvent::Error(message));
        }
        sink.close();
        result
    }

    async fn run(
        &self,
        handle: &SpreadsheetHandle,
        sink: &dyn ProgressSink,
    ) -> PipelineResult<RecoverySummary> {
        let sheets = self.services.sheets.as_ref();

        sink.emit(ProgressEvent::info(format!(
            "Reading \"{}\" sheet...",
            AppConfig::ERRORS_TAB
        )));
        let rows = sheets
            .read_rows(handle, &TabRange::columns(AppConfig::ERRORS_TAB, 2, 'D'))
            .await
            .map_err(|report| lift(report, PipelineError::from_read))?;

        if rows.is_empty() {
            sink.emit(ProgressEvent::info(format!(
                "No errors found in \"{}\" sheet.",
                AppConfig::ERRORS_TAB
            )));
            return Ok(RecoverySummary::default());
        }
        sink.emit(ProgressEvent::info(format!(
            "Found {} error entries. Retrying...",
            rows.len()
        )));

        let mut recovered = vec![];
        let mut skipped = 0;
        let mut quota_exceeded = false;
        for (index, row) in rows.iter().enumerate() {
            let track = track_from_row(row);
            let previous = previous_label(row);

            let label = if quota_exceeded {
                skipped += 1;
                ErrorLabel::QuotaSkipped
            } else {
                self.limiter.acquire().await;
                let outcome = self
                    .services
                    .resolver
                    .resolve(&track.get_track_search_term())
                    .await
                    .map_err(|report| lift(report, PipelineError::from))?;

                match outcome {
                    ResolutionOutcome::Link(link) => {
                        sink.emit(ProgressEvent::Success(format!(
                            "Recovered: {} - {}",
                            track.name, link
                        )));
                        recovered.push(Row::success(&track, &link));
                        continue;
                    }
                    ResolutionOutcome::QuotaExceeded => {
                        warn!(
                            "YouTube quota exceeded at row {}/{}, not searching the rest",
                            index + 1,
                            rows.len()
                        );
                        sink.emit(ProgressEvent::Warning(
                            "YouTube API Quota Exceeded! Stopping search.".to_string(),
                        ));
                        quota_exceeded = true;
                        ErrorLabel::QuotaSkipped
                    }
                    failed => failed.error_label().unwrap_or(ErrorLabel::Error),
                }
            };
            let message = match previous {
                Some(previous) if previous != label => format!(
                    "Still Failed: {} - {} (was {})",
                    track.name, label, previous
                ),
                _ => format!("Still Failed: {} - {}", track.name, label),
            };
            sink.emit(ProgressEvent::Failure(message));
        }

        if recovered.is_empty() {
            sink.emit(ProgressEvent::info("Could not recover any tracks."));
        } else {
            sink.emit(ProgressEvent::info(format!(
                "Writing recovered data to \"{}\"...",
                AppConfig::PRIMARY_TAB
            )));
            append_rows_batched(sheets, handle, AppConfig::PRIMARY_TAB, &recovered, 1)
                .await
                .map_err(|report| lift(report, PipelineError::from_write))?;
            info!("Recovered {} of {} tracks in {}", recovered.len(), rows.len(), handle);
            sink.emit(ProgressEvent::Success(format!(
                "Success! Added {} tracks to {}.",
                recovered.len(),
                AppConfig::PRIMARY_TAB
            )));
        }

        sink.emit(ProgressEvent::Done { url: handle.url() });
        Ok(RecoverySummary {
            attempted: rows.len(),
            recovered: recovered.len(),
            skipped,
        })
    }
}

/// The Sheets API drops trailing empty cells, so short rows are padded.
fn track_from_row(row: &[String]) -> Track {
    let cell = |index: usize| row.get(index).cloned().unwrap_or_default();
    Track::new(cell(0), cell(1), cell(2))
}

fn previous_label(row: &[String]) -> Option<ErrorLabel> {
    let label = row.get(3)?;
    match label.parse() {
        Ok(label) => Some(label),
        Err(_) => {
            debug!("Unrecognised error label {:?}", label);
            None
        }
    }
}
