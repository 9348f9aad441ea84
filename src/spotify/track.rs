use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub name: String,
    /// Every credited artist, joined with ", ".
    pub artist: String,
    pub album: String,
}

impl Track {
    pub fn new(name: impl Into<String>, artist: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
            album: album.into(),
        }
    }

    pub fn get_track_search_term(&self) -> String {
        format!("{} {} {}", self.name, self.artist, self.album)
    }
}
