use std::sync::Arc;

use async_trait::async_trait;
use error_stack::{IntoReport, Report, ResultExt};
use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::auth::Credential;
use crate::config::AppConfig;
use crate::spotify::track::Track;
use crate::spotify::{SpotifyError, SpotifyResult, TrackSource};

#[derive(Deserialize, Clone, Debug)]
struct ApiArtist {
    name: String,
}

#[derive(Deserialize, Clone, Debug)]
struct ApiAlbum {
    name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApiTrack {
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    album: Option<ApiAlbum>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Deserialize, Clone, Debug)]
struct PlaylistPage {
    items: Vec<PlaylistItem>,
}

impl PlaylistItem {
    fn into_track(self) -> Option<Track> {
        let track = self.track?;
        let artists = track
            .artists
            .iter()
            .map(|a| a.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let album = track.album.map(|album| album.name).unwrap_or_default();
        Some(Track::new(track.name, artists, album))
    }
}

/// Fetches one page of playlist items.
///
/// An expired or revoked token must surface as `SpotifyError::Unauthorized`
/// so the caller can refresh and retry.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
        access_token: &str,
    ) -> SpotifyResult<Vec<PlaylistItem>>;
}

pub struct SpotifyApi {
    client: reqwest::Client,
    base_url: String,
}

impl SpotifyApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: AppConfig::SPOTIFY_API_URL.to_string(),
        }
    }
}

#[async_trait]
impl PageFetcher for SpotifyApi {
    async fn fetch_page(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
        access_token: &str,
    ) -> SpotifyResult<Vec<PlaylistItem>> {
        let url = format!("{}/playlists/{}/tracks", self.base_url, playlist_id);
        debug!("GET {url} offset={offset} limit={limit}");
        let response = self
            .client
            .get(&url)
            .query(&[("offset", offset), ("limit", limit)])
            .bearer_auth(access_token)
            .send()
            .await
            .into_report()
            .change_context(SpotifyError::Request)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Report::new(SpotifyError::Unauthorized)
                .attach_printable("Spotify rejected the access token"));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Report::new(SpotifyError::Request)
                .attach_printable(format!("Spotify returned {status} for playlist {playlist_id}: {body}")));
        }

        let page = response
            .json::<PlaylistPage>()
            .await
            .into_report()
            .change_context(SpotifyError::Request)
            .attach_printable("Failed to parse the playlist page")?;
        Ok(page.items)
    }
}

/// Pages through a playlist until a short page comes back.
///
/// An authorization failure on a page triggers exactly one credential refresh
/// and one retry of that page. Any other failure abandons the pages fetched
/// so far.
pub async fn collect_tracks<F: PageFetcher + ?Sized>(
    fetcher: &F,
    credential: &Credential,
    playlist_id: &str,
    page_size: usize,
) -> SpotifyResult<Vec<Track>> {
    let mut tracks = vec![];
    let mut offset = 0;

    loop {
        let token = credential.access_token().await;
        let items = match fetcher.fetch_page(playlist_id, offset, page_size, &token).await {
            Err(report) if *report.current_context() == SpotifyError::Unauthorized => {
                warn!("Spotify token rejected at offset {offset}, refreshing");
                let token = credential
                    .refresh(&token)
                    .await
                    .change_context(SpotifyError::Unauthorized)?;
                fetcher
                    .fetch_page(playlist_id, offset, page_size, &token)
                    .await
                    .attach_printable("Retry after token refresh failed")?
            }
            result => result?,
        };

        let page_len = items.len();
        let before = tracks.len();
        tracks.extend(items.into_iter().filter_map(PlaylistItem::into_track));
        debug!(
            "Page at offset {offset}: {page_len} items, {} tracks",
            tracks.len() - before
        );

        if page_len < page_size {
            break;
        }
        offset += page_size;
    }

    info!("Fetched {} tracks from playlist {playlist_id}", tracks.len());
    Ok(tracks)
}

/// Spotify Web API track source.
pub struct SpotifyPlaylistSource<F: PageFetcher = SpotifyApi> {
    fetcher: F,
    credential: Arc<Credential>,
}

impl SpotifyPlaylistSource<SpotifyApi> {
    pub fn new(credential: Arc<Credential>) -> Self {
        Self::with_fetcher(SpotifyApi::new(), credential)
    }
}

impl<F: PageFetcher> SpotifyPlaylistSource<F> {
    pub fn with_fetcher(fetcher: F, credential: Arc<Credential>) -> Self {
        Self { fetcher, credential }
    }
}

#[async_trait]
impl<F: PageFetcher> TrackSource for SpotifyPlaylistSource<F> {
    async fn fetch_all_tracks(&self, playlist_id: &str) -> SpotifyResult<Vec<Track>> {
        collect_tracks(
            &self.fetcher,
            &self.credential,
            playlist_id,
            AppConfig::SPOTIFY_PAGE_SIZE,
        )
        .await
    }
}

/// Accepts a bare playlist id, an `open.spotify.com/playlist/<id>` url or a
/// `spotify:playlist:<id>` uri.
pub fn parse_playlist_id(input: &str) -> SpotifyResult<String> {
    let input = input.trim();
    if let Some(id) = input.strip_prefix("spotify:playlist:") {
        return validate_id(id);
    }
    if let Ok(url) = Url::parse(input) {
        let mut sections = url
            .path_segments()
            .ok_or(SpotifyError::Request)
            .into_report()
            .attach_printable_lazy(|| format!("Url has no path: {input}"))?;
        return match sections.by_ref().find(|section| *section == "playlist") {
            Some(_) => validate_id(sections.next().unwrap_or_default()),
            None => Err(Report::new(SpotifyError::Request).attach_printable("Url is not a playlist url")),
        };
    }
    validate_id(input)
}

fn validate_id(id: &str) -> SpotifyResult<String> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Report::new(SpotifyError::Request)
            .attach_printable(format!("Not a Spotify playlist id: {id:?}")));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use super::*;
    use crate::auth::tests::{credential, CountingRefresher};

    fn item(name: &str, artists: &[&str], album: &str) -> PlaylistItem {
        PlaylistItem {
            track: Some(ApiTrack {
                name: name.to_string(),
                artists: artists
                    .iter()
                    .map(|a| ApiArtist { name: a.to_string() })
                    .collect(),
                album: Some(ApiAlbum {
                    name: album.to_string(),
                }),
            }),
        }
    }

    /// Serves a fixed number of items in pages and records every call.
    struct FakePages {
        total: usize,
        unauthorized_offsets: Mutex<Vec<usize>>,
        fail_at: Option<usize>,
        calls: Mutex<Vec<(usize, String)>>,
    }

    impl FakePages {
        fn new(total: usize) -> Self {
            Self {
                total,
                unauthorized_offsets: Mutex::new(vec![]),
                fail_at: None,
                calls: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for FakePages {
        async fn fetch_page(
            &self,
            _playlist_id: &str,
            offset: usize,
            limit: usize,
            access_token: &str,
        ) -> SpotifyResult<Vec<PlaylistItem>> {
            self.calls
                .lock()
                .unwrap()
                .push((offset, access_token.to_string()));
            {
                let mut unauthorized = self.unauthorized_offsets.lock().unwrap();
                if let Some(pos) = unauthorized.iter().position(|o| *o == offset) {
                    unauthorized.remove(pos);
                    return Err(Report::new(SpotifyError::Unauthorized));
                }
            }
            if self.fail_at == Some(offset) {
                return Err(Report::new(SpotifyError::Request).attach_printable("boom"));
            }
            let end = (offset + limit).min(self.total);
            Ok((offset..end)
                .map(|i| item(&format!("Song{i}"), &["Artist"], "Album"))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_pages_until_short_page() {
        let fetcher = FakePages::new(250);
        let credential = credential(Arc::new(CountingRefresher::new(false)));

        let tracks = collect_tracks(&fetcher, &credential, "p", 100).await.unwrap();

        assert_eq!(tracks.len(), 250);
        assert_eq!(tracks[0].name, "Song0");
        assert_eq!(tracks[249].name, "Song249");
        let offsets: Vec<usize> = fetcher.calls.lock().unwrap().iter().map(|c| c.0).collect();
        assert_eq!(offsets, vec![0, 100, 200]);
    }

    #[tokio::test]
    async fn test_exact_multiple_fetches_one_empty_page() {
        let fetcher = FakePages::new(200);
        let credential = credential(Arc::new(CountingRefresher::new(false)));

        let tracks = collect_tracks(&fetcher, &credential, "p", 100).await.unwrap();

        assert_eq!(tracks.len(), 200);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unauthorized_page_refreshes_once_and_retries_same_offset() {
        let fetcher = FakePages::new(150);
        fetcher.unauthorized_offsets.lock().unwrap().push(100);
        let refresher = Arc::new(CountingRefresher::new(false));
        let credential = credential(refresher.clone());

        let tracks = collect_tracks(&fetcher, &credential, "p", 100).await.unwrap();

        assert_eq!(tracks.len(), 150);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        let calls = fetcher.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                (0, "stale".to_string()),
                (100, "stale".to_string()),
                (100, "fresh-1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_unauthorized_on_same_page_is_auth_error() {
        let fetcher = FakePages::new(50);
        fetcher.unauthorized_offsets.lock().unwrap().extend([0, 0]);
        let credential = credential(Arc::new(CountingRefresher::new(false)));

        let report = collect_tracks(&fetcher, &credential, "p", 100).await.unwrap_err();

        assert_eq!(*report.current_context(), SpotifyError::Unauthorized);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_auth_error() {
        let fetcher = FakePages::new(50);
        fetcher.unauthorized_offsets.lock().unwrap().push(0);
        let credential = credential(Arc::new(CountingRefresher::new(true)));

        let report = collect_tracks(&fetcher, &credential, "p", 100).await.unwrap_err();

        assert_eq!(*report.current_context(), SpotifyError::Unauthorized);
    }

    #[tokio::test]
    async fn test_other_failure_discards_fetched_pages() {
        let mut fetcher = FakePages::new(300);
        fetcher.fail_at = Some(200);
        let credential = credential(Arc::new(CountingRefresher::new(false)));

        let report = collect_tracks(&fetcher, &credential, "p", 100).await.unwrap_err();

        assert_eq!(*report.current_context(), SpotifyError::Request);
    }

    #[test]
    fn test_items_without_track_are_skipped() {
        let page: PlaylistPage = serde_json::from_str(
            r#"{"items": [
                {"track": null},
                {"track": {"name": "Song1", "artists": [{"name": "A"}, {"name": "B"}], "album": {"name": "Album1"}}},
                {"track": {"name": "Episode", "show": {"name": "Podcast"}}}
            ]}"#,
        )
        .unwrap();

        let tracks: Vec<Track> = page.items.into_iter().filter_map(PlaylistItem::into_track).collect();

        assert_eq!(
            tracks,
            vec![Track::new("Song1", "A, B", "Album1"), Track::new("Episode", "", "")]
        );
    }

    #[test]
    fn test_parse_playlist_id() {
        assert_eq!(parse_playlist_id("6YYCPN91F4xI1Z17Hzn7ir").unwrap(), "6YYCPN91F4xI1Z17Hzn7ir");
        assert_eq!(
            parse_playlist_id("https://open.spotify.com/playlist/6YYCPN91F4xI1Z17Hzn7ir?si=abc").unwrap(),
            "6YYCPN91F4xI1Z17Hzn7ir"
        );
        assert_eq!(
            parse_playlist_id("spotify:playlist:6YYCPN91F4xI1Z17Hzn7ir").unwrap(),
            "6YYCPN91F4xI1Z17Hzn7ir"
        );
        assert!(parse_playlist_id("https://open.spotify.com/album/123").is_err());
        assert!(parse_playlist_id("").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a logged-in Spotify token and network access. Run with `cargo test -- --ignored`
    async fn test_get_playlist() {
        dotenvy::dotenv().ok();
        let settings = crate::config::Settings::from_env().unwrap();
        let context = crate::auth::AuthContext::load(&settings).await.unwrap();
        let source = SpotifyPlaylistSource::new(context.spotify);
        let tracks = source.fetch_all_tracks("6YYCPN91F4xI1Z17Hzn7ir").await.unwrap();
        assert!(!tracks.is_empty());
    }
}
