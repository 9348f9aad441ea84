//! In-memory stand-ins for the external services, used by the pipeline and
//! sheet tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use error_stack::Report;

use crate::config::AppConfig;
use crate::pipeline::progress::{ProgressEvent, ProgressSink};
use crate::sheets::{Row, SheetStore, SheetsError, SheetsResult, SpreadsheetHandle, TabRange};
use crate::spotify::track::Track;
use crate::spotify::{SpotifyError, SpotifyResult, TrackSource};
use crate::youtube::{ResolutionOutcome, VideoResolver, YouTubeResult};

pub(crate) struct FakeTracks {
    result: Result<Vec<Track>, SpotifyError>,
}

impl FakeTracks {
    pub(crate) fn ok(tracks: Vec<Track>) -> Self {
        Self { result: Ok(tracks) }
    }

    pub(crate) fn failing(error: SpotifyError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl TrackSource for FakeTracks {
    async fn fetch_all_tracks(&self, playlist_id: &str) -> SpotifyResult<Vec<Track>> {
        match &self.result {
            Ok(tracks) => Ok(tracks.clone()),
            Err(error) => Err(Report::new(*error)
                .attach_printable(format!("playlist {playlist_id} unavailable"))),
        }
    }
}

pub(crate) fn tracks(n: usize) -> Vec<Track> {
    (1..=n)
        .map(|i| Track::new(format!("Song{i}"), format!("Artist{i}"), format!("Album{i}")))
        .collect()
}

type Script = Box<dyn Fn(usize, &str) -> YouTubeResult<ResolutionOutcome> + Send + Sync>;

/// Answers each query through a script that sees the call index and query.
pub(crate) struct ScriptedResolver {
    script: Script,
    queries: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    pub(crate) fn new<F>(script: F) -> Self
    where
        F: Fn(usize, &str) -> YouTubeResult<ResolutionOutcome> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            queries: Mutex::new(vec![]),
        }
    }

    /// Links every query to a video named after its first word.
    pub(crate) fn always_found() -> Self {
        Self::new(|_, query| Ok(ResolutionOutcome::Link(link_for(query))))
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

pub(crate) fn link_for(query: &str) -> String {
    let word = query.split(' ').next().unwrap_or_default();
    format!("https://www.youtube.com/watch?v={word}")
}

#[async_trait]
impl VideoResolver for ScriptedResolver {
    async fn resolve(&self, query: &str) -> YouTubeResult<ResolutionOutcome> {
        let index = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.to_string());
            queries.len() - 1
        };
        (self.script)(index, query)
    }
}

#[derive(Default)]
struct MemoryState {
    spreadsheets: HashMap<String, HashMap<String, Vec<Vec<String>>>>,
    titles: Vec<String>,
    appends: Vec<(TabRange, Vec<Row>)>,
    fail_append_after: Option<usize>,
    fail_create: bool,
}

/// A spreadsheet service kept in memory. New spreadsheets start with an empty
/// primary tab; appends land after the tab's existing rows.
#[derive(Default)]
pub(crate) struct MemorySheets {
    state: Mutex<MemoryState>,
    created: AtomicUsize,
}

impl MemorySheets {
    pub(crate) fn appends(&self) -> Vec<(TabRange, Vec<Row>)> {
        self.state.lock().unwrap().appends.clone()
    }

    pub(crate) fn titles(&self) -> Vec<String> {
        self.state.lock().unwrap().titles.clone()
    }

    /// Every append after the first `n` fails.
    pub(crate) fn fail_append_after(&self, n: usize) {
        self.state.lock().unwrap().fail_append_after = Some(n);
    }

    pub(crate) fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub(crate) fn has_tab(&self, handle: &SpreadsheetHandle, tab: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .spreadsheets
            .get(handle.id())
            .map(|tabs| tabs.contains_key(tab))
            .unwrap_or(false)
    }

    pub(crate) fn rows(&self, handle: &SpreadsheetHandle, tab: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .spreadsheets
            .get(handle.id())
            .and_then(|tabs| tabs.get(tab))
            .cloned()
            .unwrap_or_default()
    }

    /// Puts an existing spreadsheet in place, as if made by an earlier run.
    pub(crate) fn seed(&self, handle: &SpreadsheetHandle, tab: &str, rows: Vec<Vec<String>>) {
        let mut state = self.state.lock().unwrap();
        let tabs = state
            .spreadsheets
            .entry(handle.id().to_string())
            .or_insert_with(|| HashMap::from([(AppConfig::PRIMARY_TAB.to_string(), vec![])]));
        tabs.insert(tab.to_string(), rows);
    }
}

#[async_trait]
impl SheetStore for MemorySheets {
    async fn create(&self, title: &str) -> SheetsResult<SpreadsheetHandle> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(Report::new(SheetsError::Request).attach_printable("create refused"));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = SpreadsheetHandle::new(format!("sheet-{n}"));
        state.titles.push(title.to_string());
        state.spreadsheets.insert(
            handle.id().to_string(),
            HashMap::from([(AppConfig::PRIMARY_TAB.to_string(), vec![])]),
        );
        Ok(handle)
    }

    async fn add_tab(&self, handle: &SpreadsheetHandle, tab_name: &str) -> SheetsResult<()> {
        let mut state = self.state.lock().unwrap();
        let tabs = state
            .spreadsheets
            .get_mut(handle.id())
            .ok_or_else(|| Report::new(SheetsError::RangeNotFound))?;
        if tabs.contains_key(tab_name) {
            return Err(Report::new(SheetsError::Request).attach_printable("tab already exists"));
        }
        tabs.insert(tab_name.to_string(), vec![]);
        Ok(())
    }

    async fn append_rows(
        &self,
        handle: &SpreadsheetHandle,
        rows: &[Row],
        range: &TabRange,
    ) -> SheetsResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.fail_append_after {
            if state.appends.len() >= limit {
                return Err(Report::new(SheetsError::Request).attach_printable("append refused"));
            }
        }
        let tab = state
            .spreadsheets
            .get_mut(handle.id())
            .and_then(|tabs| tabs.get_mut(range.tab()))
            .ok_or_else(|| {
                Report::new(SheetsError::RangeNotFound)
                    .attach_printable(format!("Unable to parse range: {range}"))
            })?;
        tab.extend(rows.iter().map(|row| row.cells().to_vec()));
        state.appends.push((range.clone(), rows.to_vec()));
        Ok(())
    }

    async fn read_rows(
        &self,
        handle: &SpreadsheetHandle,
        range: &TabRange,
    ) -> SheetsResult<Vec<Vec<String>>> {
        let state = self.state.lock().unwrap();
        let tab = state
            .spreadsheets
            .get(handle.id())
            .and_then(|tabs| tabs.get(range.tab()))
            .ok_or_else(|| {
                Report::new(SheetsError::RangeNotFound)
                    .attach_printable(format!("Unable to parse range: {range}"))
            })?;
        let width = range
            .end_column()
            .map(|c| (c as usize) - ('A' as usize) + 1)
            .unwrap_or(usize::MAX);
        Ok(tab
            .iter()
            .skip(range.start_row().saturating_sub(1))
            .map(|row| row.iter().take(width).cloned().collect())
            .collect())
    }
}

/// Keeps every event for inspection.
#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    closes: AtomicUsize,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Ping { processed, .. } => Some(processed),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        assert_eq!(self.closes(), 0, "event emitted after close: {event:?}");
        self.events.lock().unwrap().push(event);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
