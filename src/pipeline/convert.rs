use std::sync::Arc;

use log::{error, info, warn};

use crate::config::AppConfig;
use crate::pipeline::progress::{ProgressEvent, ProgressSink};
use crate::pipeline::rate_limiter::RateLimiter;
use crate::pipeline::{describe, lift, PipelineError, PipelineResult, Services};
use crate::sheets::{append_rows_batched, Row, SpreadsheetHandle};
use crate::spotify::track::Track;
use crate::youtube::{ErrorLabel, ResolutionOutcome};

/// Counts reported by a finished conversion. Header rows are not counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    pub handle: SpreadsheetHandle,
    pub total_tracks: usize,
    pub written: usize,
    /// Tracks that were searched and not linked.
    pub failed: usize,
    /// Tracks never searched because the quota ran out.
    pub skipped: usize,
    pub quota_exceeded: bool,
}

/// Rows gathered while resolving, each list starting with its header.
struct Partition {
    successes: Vec<Row>,
    errors: Vec<Row>,
    skipped: usize,
    quota_exceeded: bool,
}

impl Partition {
    fn new() -> Self {
        Self {
            successes: vec![Row::success_header()],
            errors: vec![Row::error_header()],
            skipped: 0,
            quota_exceeded: false,
        }
    }

    fn success_count(&self) -> usize {
        self.successes.len() - 1
    }

    fn error_count(&self) -> usize {
        self.errors.len() - 1
    }

    fn skip_remaining(&mut self, remaining: &[Track]) {
        self.errors.extend(
            remaining
                .iter()
                .map(|track| Row::error(track, ErrorLabel::QuotaSkipped)),
        );
        self.skipped = remaining.len();
        self.quota_exceeded = true;
    }
}

/// Playlist to spreadsheet conversion.
pub struct ConversionPipeline {
    services: Services,
    limiter: Arc<dyn RateLimiter>,
}

impl ConversionPipeline {
    pub fn new(services: Services, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { services, limiter }
    }

    /// Converts `playlist_id` into a new spreadsheet, reporting every step to
    /// `sink`. The sink is closed on every exit path; a failure is reported
    /// to it before being returned.
    pub async fn convert(
        &self,
        playlist_id: &str,
        sink: &dyn ProgressSink,
    ) -> PipelineResult<ConversionSummary> {
        let result = self.run(playlist_id, sink).await;
        if let Err(report) = &result {
            let message = describe(report);
            error!("Conversion of playlist {} failed: {}", playlist_id, message);
            sink.emit(ProgressEvent::Error(message));
        }
        sink.close();
        result
    }

    async fn run(
        &self,
        playlist_id: &str,
        sink: &dyn ProgressSink,
    ) -> PipelineResult<ConversionSummary> {
        sink.emit(ProgressEvent::info("Fetching Spotify tracks..."));
        let tracks = self
            .services
            .tracks
            .fetch_all_tracks(playlist_id)
            .await
            .map_err(|report| lift(report, PipelineError::from))?;
        let total = tracks.len();
        info!("Playlist {} has {} tracks", playlist_id, total);
        sink.emit(ProgressEvent::info(format!(
            "Found {} tracks. Searching YouTube...",
            total
        )));

        let partition = self.resolve_all(&tracks, sink).await?;
        let handle = self.write(playlist_id, &partition, sink).await?;

        sink.emit(ProgressEvent::Done { url: handle.url() });
        if partition.quota_exceeded {
            sink.emit(ProgressEvent::Warning(format!(
                "Note: Process stopped early due to YouTube Quota. Check the \"{}\" tab for skipped tracks.",
                AppConfig::ERRORS_TAB
            )));
        }

        let skipped = partition.skipped;
        Ok(ConversionSummary {
            handle,
            total_tracks: total,
            written: partition.success_count(),
            failed: partition.error_count() - skipped,
            skipped,
            quota_exceeded: partition.quota_exceeded,
        })
    }

    async fn resolve_all(
        &self,
        tracks: &[Track],
        sink: &dyn ProgressSink,
    ) -> PipelineResult<Partition> {
        let total = tracks.len();
        let mut partition = Partition::new();
        for (index, track) in tracks.iter().enumerate() {
            self.limiter.acquire().await;
            if index % AppConfig::PING_INTERVAL == 0 {
                sink.emit(ProgressEvent::Ping {
                    processed: index,
                    total,
                });
            }

            let query = track.get_track_search_term();
            let outcome = self
                .services
                .resolver
                .resolve(&query)
                .await
                .map_err(|report| lift(report, PipelineError::from))?;

            let label = match outcome {
                ResolutionOutcome::Link(link) => {
                    sink.emit(ProgressEvent::Success(format!(
                        "Processed ({}/{}): {} - {}",
                        index + 1,
                        total,
                        track.name,
                        link
                    )));
                    partition.successes.push(Row::success(track, &link));
                    continue;
                }
                ResolutionOutcome::QuotaExceeded => {
                    warn!(
                        "YouTube quota exceeded at track {}/{}, skipping the rest",
                        index + 1,
                        total
                    );
                    sink.emit(ProgressEvent::Warning(
                        "YouTube API Quota Exceeded! Stopping search.".to_string(),
                    ));
                    partition.skip_remaining(&tracks[index..]);
                    break;
                }
                failed => failed.error_label().unwrap_or(ErrorLabel::Error),
            };
            sink.emit(ProgressEvent::Failure(format!(
                "Failed: {} - {}",
                track.name, label
            )));
            partition.errors.push(Row::error(track, label));
        }
        Ok(partition)
    }

    async fn write(
        &self,
        playlist_id: &str,
        partition: &Partition,
        sink: &dyn ProgressSink,
    ) -> PipelineResult<SpreadsheetHandle> {
        let sheets = self.services.sheets.as_ref();

        sink.emit(ProgressEvent::info("Creating Google Sheet..."));
        let handle = sheets
            .create(&format!("Spotify Playlist: {}", playlist_id))
            .await
            .map_err(|report| lift(report, PipelineError::from_write))?;
        info!("Created spreadsheet {}", handle);

        if partition.success_count() > 0 {
            sink.emit(ProgressEvent::info(format!(
                "Writing {} successful tracks...",
                partition.success_count()
            )));
            append_rows_batched(
                sheets,
                &handle,
                AppConfig::PRIMARY_TAB,
                &partition.successes,
                1,
            )
            .await
            .map_err(|report| lift(report, PipelineError::from_write))?;
        }

        if partition.error_count() > 0 {
            sink.emit(ProgressEvent::info(format!(
                "Found errors/skipped tracks. Creating {} sheet...",
                AppConfig::ERRORS_TAB
            )));
            sheets
                .add_tab(&handle, AppConfig::ERRORS_TAB)
                .await
                .map_err(|report| lift(report, PipelineError::from_write))?;
            sink.emit(ProgressEvent::info(format!(
                "Writing {} error entries...",
                partition.error_count()
            )));
            append_rows_batched(sheets, &handle, AppConfig::ERRORS_TAB, &partition.errors, 1)
                .await
                .map_err(|report| lift(report, PipelineError::from_write))?;
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use error_stack::Report;
    use tokio::time::Instant;

    use super::*;
    use crate::pipeline::fakes::{
        link_for, tracks, FakeTracks, MemorySheets, RecordingSink, ScriptedResolver,
    };
    use crate::pipeline::rate_limiter::FixedDelay;
    use crate::spotify::SpotifyError;
    use crate::youtube::YouTubeError;

    fn pipeline(
        source: FakeTracks,
        resolver: Arc<ScriptedResolver>,
        sheets: Arc<MemorySheets>,
        delay: Duration,
    ) -> ConversionPipeline {
        let services = Services {
            tracks: Arc::new(source),
            resolver,
            sheets,
        };
        ConversionPipeline::new(services, Arc::new(FixedDelay::new(delay)))
    }

    fn labels(rows: &[Vec<String>]) -> Vec<&str> {
        rows.iter().skip(1).map(|row| row[3].as_str()).collect()
    }

    #[tokio::test]
    async fn test_link_and_not_found_are_partitioned() {
        let sheets = Arc::new(MemorySheets::default());
        let resolver = Arc::new(ScriptedResolver::new(|_, query| {
            Ok(if query.starts_with("Song1") {
                ResolutionOutcome::Link(link_for(query))
            } else {
                ResolutionOutcome::NotFound
            })
        }));
        let sink = RecordingSink::default();

        let summary = pipeline(FakeTracks::ok(tracks(2)), resolver, sheets.clone(), Duration::ZERO)
            .convert("37i9dQZF1DXcBWIGoYBM5M", &sink)
            .await
            .unwrap();

        let primary = sheets.rows(&summary.handle, "Sheet1");
        assert_eq!(primary.len(), 2);
        assert_eq!(primary[0], AppConfig::SUCCESS_HEADER.map(String::from).to_vec());
        assert_eq!(
            primary[1],
            vec!["Song1", "Artist1", "Album1", "https://www.youtube.com/watch?v=Song1"]
        );
        let errors = sheets.rows(&summary.handle, "Errors");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0][3], "Error Details");
        assert_eq!(errors[1], vec!["Song2", "Artist2", "Album2", "Not found"]);

        assert_eq!(summary.written, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.quota_exceeded);
        assert_eq!(
            sheets.titles(),
            vec!["Spotify Playlist: 37i9dQZF1DXcBWIGoYBM5M".to_string()]
        );
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_quota_on_first_track_skips_everything() {
        let sheets = Arc::new(MemorySheets::default());
        let resolver = Arc::new(ScriptedResolver::new(|_, _| {
            Ok(ResolutionOutcome::QuotaExceeded)
        }));
        let sink = RecordingSink::default();

        let summary = pipeline(
            FakeTracks::ok(tracks(5)),
            resolver.clone(),
            sheets.clone(),
            Duration::ZERO,
        )
        .convert("p", &sink)
        .await
        .unwrap();

        assert!(sheets.rows(&summary.handle, "Sheet1").is_empty());
        let errors = sheets.rows(&summary.handle, "Errors");
        assert_eq!(errors.len(), 6);
        assert!(labels(&errors)
            .iter()
            .all(|label| *label == "Skipped - Quota Exceeded"));
        assert_eq!(resolver.queries().len(), 1);
        assert_eq!(summary.skipped, 5);
        assert_eq!(summary.failed, 0);
        assert!(summary.quota_exceeded);

        let events = sink.events();
        assert!(events.contains(&ProgressEvent::Warning(
            "YouTube API Quota Exceeded! Stopping search.".to_string()
        )));
        assert!(matches!(events.last(), Some(ProgressEvent::Warning(note)) if note.starts_with("Note:")));
    }

    #[tokio::test]
    async fn test_quota_at_index_accounts_for_every_track() {
        let n = 7;
        for quota_at in 0..n {
            let sheets = Arc::new(MemorySheets::default());
            let resolver = Arc::new(ScriptedResolver::new(move |index, query| {
                Ok(match index {
                    i if i == quota_at => ResolutionOutcome::QuotaExceeded,
                    i if i % 2 == 1 => ResolutionOutcome::TransientError,
                    _ => ResolutionOutcome::Link(link_for(query)),
                })
            }));
            let sink = RecordingSink::default();

            let summary = pipeline(
                FakeTracks::ok(tracks(n)),
                resolver.clone(),
                sheets.clone(),
                Duration::ZERO,
            )
            .convert("p", &sink)
            .await
            .unwrap();

            let genuine_errors = (0..quota_at).filter(|i| i % 2 == 1).count();
            let errors = sheets.rows(&summary.handle, "Errors");
            let labels = labels(&errors);
            assert_eq!(
                labels
                    .iter()
                    .filter(|label| **label == "Skipped - Quota Exceeded")
                    .count(),
                n - quota_at,
                "quota at {quota_at}"
            );
            assert_eq!(labels.iter().filter(|label| **label == "Error").count(), genuine_errors);
            assert_eq!(resolver.queries().len(), quota_at + 1);
            assert_eq!(
                summary.written + summary.failed + summary.skipped,
                n,
                "quota at {quota_at}"
            );
            // Skipped rows keep playlist order after the earlier failures.
            assert_eq!(errors.last().unwrap()[0], format!("Song{n}"));
        }
    }

    #[tokio::test]
    async fn test_all_found_writes_no_errors_tab() {
        let n = 12;
        let sheets = Arc::new(MemorySheets::default());
        let sink = RecordingSink::default();

        let summary = pipeline(
            FakeTracks::ok(tracks(n)),
            Arc::new(ScriptedResolver::always_found()),
            sheets.clone(),
            Duration::ZERO,
        )
        .convert("p", &sink)
        .await
        .unwrap();

        assert_eq!(sheets.rows(&summary.handle, "Sheet1").len(), n + 1);
        assert!(!sheets.has_tab(&summary.handle, "Errors"));
        assert_eq!(summary.written, n);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            sink.events().iter().filter(|e| matches!(e, ProgressEvent::Success(_))).count(),
            n
        );
        assert!(sink
            .events()
            .contains(&ProgressEvent::Done { url: summary.handle.url() }));
    }

    #[tokio::test]
    async fn test_ping_every_tenth_track() {
        let sink = RecordingSink::default();

        pipeline(
            FakeTracks::ok(tracks(25)),
            Arc::new(ScriptedResolver::always_found()),
            Arc::new(MemorySheets::default()),
            Duration::ZERO,
        )
        .convert("p", &sink)
        .await
        .unwrap();

        assert_eq!(sink.pings(), vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn test_large_error_list_is_batched_into_errors_tab() {
        let sheets = Arc::new(MemorySheets::default());
        let resolver = Arc::new(ScriptedResolver::new(|_, _| Ok(ResolutionOutcome::NotFound)));

        let summary = pipeline(
            FakeTracks::ok(tracks(1201)),
            resolver,
            sheets.clone(),
            Duration::ZERO,
        )
        .convert("p", &RecordingSink::default())
        .await
        .unwrap();

        let shape: Vec<(String, usize)> = sheets
            .appends()
            .iter()
            .map(|(range, rows)| (range.to_string(), rows.len()))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("Errors!A1".to_string(), 500),
                ("Errors!A501".to_string(), 500),
                ("Errors!A1001".to_string(), 202),
            ]
        );
        assert_eq!(summary.failed, 1201);
    }

    #[tokio::test]
    async fn test_track_source_failure_aborts_before_any_sheet() {
        let sheets = Arc::new(MemorySheets::default());
        let resolver = Arc::new(ScriptedResolver::always_found());
        let sink = RecordingSink::default();

        let report = pipeline(
            FakeTracks::failing(SpotifyError::Request),
            resolver.clone(),
            sheets.clone(),
            Duration::ZERO,
        )
        .convert("missing", &sink)
        .await
        .unwrap_err();

        assert_eq!(*report.current_context(), PipelineError::Upstream);
        assert!(sheets.titles().is_empty());
        assert!(resolver.queries().is_empty());
        assert!(matches!(
            sink.events().last(),
            Some(ProgressEvent::Error(message)) if message.contains("playlist missing unavailable")
        ));
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_rejected_google_credential_aborts_run() {
        let sheets = Arc::new(MemorySheets::default());
        let resolver = Arc::new(ScriptedResolver::new(|index, query| {
            if index == 1 {
                Err(Report::new(YouTubeError::Unauthorized))
            } else {
                Ok(ResolutionOutcome::Link(link_for(query)))
            }
        }));
        let sink = RecordingSink::default();

        let report = pipeline(FakeTracks::ok(tracks(3)), resolver, sheets.clone(), Duration::ZERO)
            .convert("p", &sink)
            .await
            .unwrap_err();

        assert_eq!(*report.current_context(), PipelineError::UpstreamAuth);
        assert!(sheets.titles().is_empty());
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_sheet_write_failure_is_reported() {
        let sheets = Arc::new(MemorySheets::default());
        sheets.fail_append_after(0);
        let sink = RecordingSink::default();

        let report = pipeline(
            FakeTracks::ok(tracks(2)),
            Arc::new(ScriptedResolver::always_found()),
            sheets.clone(),
            Duration::ZERO,
        )
        .convert("p", &sink)
        .await
        .unwrap_err();

        assert_eq!(*report.current_context(), PipelineError::SheetWrite);
        let events = sink.events();
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Done { .. })));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Error(message)) if message.starts_with("Could not write the spreadsheet")
        ));
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_is_a_sheet_write_error() {
        let sheets = Arc::new(MemorySheets::default());
        sheets.fail_create();

        let report = pipeline(
            FakeTracks::ok(tracks(1)),
            Arc::new(ScriptedResolver::always_found()),
            sheets,
            Duration::ZERO,
        )
        .convert("p", &RecordingSink::default())
        .await
        .unwrap_err();

        assert_eq!(*report.current_context(), PipelineError::SheetWrite);
    }

    #[tokio::test]
    async fn test_empty_playlist_creates_empty_sheet() {
        let sheets = Arc::new(MemorySheets::default());
        let sink = RecordingSink::default();

        let summary = pipeline(
            FakeTracks::ok(vec![]),
            Arc::new(ScriptedResolver::always_found()),
            sheets.clone(),
            Duration::ZERO,
        )
        .convert("p", &sink)
        .await
        .unwrap();

        assert_eq!(summary.total_tracks, 0);
        assert!(sheets.appends().is_empty());
        assert!(sink.pings().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_search_waits_for_the_limiter() {
        let start = Instant::now();

        pipeline(
            FakeTracks::ok(tracks(4)),
            Arc::new(ScriptedResolver::always_found()),
            Arc::new(MemorySheets::default()),
            Duration::from_millis(AppConfig::DEFAULT_SEARCH_DELAY_MS),
        )
        .convert("p", &RecordingSink::default())
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(1200));
    }
}
