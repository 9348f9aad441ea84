use std::fmt;
use std::sync::Arc;

use error_stack::{AttachmentKind, FrameKind, Report};

use crate::auth::AuthContext;
use crate::sheets::client::GoogleSheets;
use crate::sheets::{SheetStore, SheetsError};
use crate::spotify::playlist::SpotifyPlaylistSource;
use crate::spotify::{SpotifyError, TrackSource};
use crate::youtube::search::YouTubeSearch;
use crate::youtube::{VideoResolver, YouTubeError};

pub mod convert;
pub mod progress;
pub mod rate_limiter;
pub mod recover;

#[cfg(test)]
pub(crate) mod fakes;

/// Failures that end a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// A credential was rejected, or renewing it failed.
    UpstreamAuth,
    /// The playlist could not be read.
    Upstream,
    /// The Errors tab (or the spreadsheet) does not exist.
    RangeNotFound,
    /// Creating or writing to the spreadsheet failed.
    SheetWrite,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::UpstreamAuth => f.write_str("Authorization failed"),
            PipelineError::Upstream => f.write_str("Could not read the playlist"),
            PipelineError::RangeNotFound => f.write_str("Sheet not found"),
            PipelineError::SheetWrite => f.write_str("Could not write the spreadsheet"),
        }
    }
}

impl std::error::Error for PipelineError {}

pub type PipelineResult<T> = error_stack::Result<T, PipelineError>;

impl From<SpotifyError> for PipelineError {
    fn from(error: SpotifyError) -> Self {
        match error {
            SpotifyError::Unauthorized => PipelineError::UpstreamAuth,
            SpotifyError::Request => PipelineError::Upstream,
        }
    }
}

impl From<YouTubeError> for PipelineError {
    fn from(error: YouTubeError) -> Self {
        match error {
            YouTubeError::Unauthorized => PipelineError::UpstreamAuth,
        }
    }
}

impl PipelineError {
    /// Kind for a sheet failure while writing results.
    fn from_write(error: SheetsError) -> Self {
        match error {
            SheetsError::Unauthorized => PipelineError::UpstreamAuth,
            SheetsError::RangeNotFound | SheetsError::Request => PipelineError::SheetWrite,
        }
    }

    /// Kind for a sheet failure while reading the Errors tab.
    fn from_read(error: SheetsError) -> Self {
        match error {
            SheetsError::Unauthorized => PipelineError::UpstreamAuth,
            SheetsError::RangeNotFound => PipelineError::RangeNotFound,
            SheetsError::Request => PipelineError::Upstream,
        }
    }
}

/// Lifts a service report into a pipeline report of the matching kind.
fn lift<C, F>(report: Report<C>, kind: F) -> Report<PipelineError>
where
    C: Copy + fmt::Display + fmt::Debug + Send + Sync + 'static,
    F: FnOnce(C) -> PipelineError,
{
    let context = *report.current_context();
    report.change_context(kind(context))
}

/// One-line description of a report: its current context followed by every
/// printable attachment, most recent first.
pub fn describe<C>(report: &Report<C>) -> String
where
    C: fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    let mut parts = vec![report.current_context().to_string()];
    for frame in report.frames() {
        match frame.kind() {
            FrameKind::Context(context) => {
                let text = context.to_string();
                if !parts.contains(&text) {
                    parts.push(text);
                }
            }
            FrameKind::Attachment(AttachmentKind::Printable(printable)) => {
                parts.push(printable.to_string())
            }
            _ => {}
        }
    }
    parts.join(": ")
}

/// The external collaborators a pipeline drives.
#[derive(Clone)]
pub struct Services {
    pub tracks: Arc<dyn TrackSource>,
    pub resolver: Arc<dyn VideoResolver>,
    pub sheets: Arc<dyn SheetStore>,
}

impl Services {
    pub fn google(context: &AuthContext) -> Self {
        Self {
            tracks: Arc::new(SpotifyPlaylistSource::new(context.spotify.clone())),
            resolver: Arc::new(YouTubeSearch::new(context.google.clone())),
            sheets: Arc::new(GoogleSheets::new(context.google.clone())),
        }
    }
}
