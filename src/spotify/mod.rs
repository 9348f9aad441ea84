use std::fmt;

use async_trait::async_trait;

use crate::spotify::track::Track;

pub mod playlist;
pub mod track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotifyError {
    /// The credential was rejected and could not be renewed.
    Unauthorized,
    Request,
}

impl fmt::Display for SpotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpotifyError::Unauthorized => f.write_str("Spotify authorization error"),
            SpotifyError::Request => f.write_str("Spotify error"),
        }
    }
}

impl std::error::Error for SpotifyError {}

pub type SpotifyResult<T> = error_stack::Result<T, SpotifyError>;

/// Yields the tracks of a playlist in playlist order.
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn fetch_all_tracks(&self, playlist_id: &str) -> SpotifyResult<Vec<Track>>;
}
