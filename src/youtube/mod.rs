use std::fmt;

use async_trait::async_trait;

pub mod search;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YouTubeError {
    /// The Google credential was rejected or could not be refreshed.
    Unauthorized,
}

impl fmt::Display for YouTubeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YouTubeError::Unauthorized => f.write_str("YouTube authorization error"),
        }
    }
}

impl std::error::Error for YouTubeError {}

pub type YouTubeResult<T> = error_stack::Result<T, YouTubeError>;

/// Result of looking up the best matching video for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Link(String),
    NotFound,
    TransientError,
    QuotaExceeded,
}

/// Labels written to the fourth column of the Errors tab.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString,
)]
pub enum ErrorLabel {
    #[strum(serialize = "Not found")]
    NotFound,
    #[strum(serialize = "Error")]
    Error,
    #[strum(serialize = "Skipped - Quota Exceeded")]
    QuotaSkipped,
}

impl ResolutionOutcome {
    /// The Errors-tab label for a failed lookup, `None` for a link.
    pub fn error_label(&self) -> Option<ErrorLabel> {
        match self {
            ResolutionOutcome::Link(_) => None,
            ResolutionOutcome::NotFound => Some(ErrorLabel::NotFound),
            ResolutionOutcome::TransientError => Some(ErrorLabel::Error),
            ResolutionOutcome::QuotaExceeded => Some(ErrorLabel::QuotaSkipped),
        }
    }
}

/// Resolves a free-text query to its single best video.
///
/// Expected failures are outcomes, not errors; only a rejected credential
/// comes back as `Err`.
#[async_trait]
pub trait VideoResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> YouTubeResult<ResolutionOutcome>;
}
