use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{IntoReport, ResultExt};
use futures_util::stream;
use log::{info, warn};
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use warp::hyper::Body;
use warp::Filter;

use crate::pipeline::convert::ConversionPipeline;
use crate::pipeline::progress::{ChannelSink, ProgressEvent, ProgressSink};
use crate::pipeline::rate_limiter::FixedDelay;
use crate::pipeline::recover::RecoveryPipeline;
use crate::pipeline::{describe, Services};
use crate::sheets::SpreadsheetHandle;
use crate::spotify::playlist::parse_playlist_id;

#[derive(Debug)]
pub struct ServerError;

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HTTP server error")
    }
}

impl std::error::Error for ServerError {}

pub type ServerResult<T> = error_stack::Result<T, ServerError>;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Spotify to YouTube Sheets</title></head>
<body>
<h1>Spotify Playlist to YouTube Sheet</h1>
<form action="/process" method="post">
  <label for="playlistId">Spotify playlist id or link:</label>
  <input type="text" id="playlistId" name="playlistId" required>
  <button type="submit">Convert</button>
</form>
<p><a href="/retry">Retry the errors of an existing sheet</a></p>
</body>
</html>
"#;

const RETRY_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Retry Errors</title></head>
<body>
<h1>Retry Failed Tracks</h1>
<form action="/retry" method="post">
  <label for="spreadsheetId">Spreadsheet id or link:</label>
  <input type="text" id="spreadsheetId" name="spreadsheetId" required>
  <button type="submit">Retry</button>
</form>
<p><a href="/">Back</a></p>
</body>
</html>
"#;

const FORM_LIMIT: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
struct ProcessForm {
    #[serde(rename = "playlistId")]
    playlist_id: String,
}

#[derive(Debug, Deserialize)]
struct RetryForm {
    #[serde(rename = "spreadsheetId")]
    spreadsheet_id: String,
}

/// What every request needs to start a pipeline run.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub search_delay: Duration,
    pub retry_delay: Duration,
}

pub async fn serve(state: AppState, address: SocketAddr) -> ServerResult<()> {
    let (address, server) = warp::serve(routes(state))
        .try_bind_ephemeral(address)
        .into_report()
        .change_context(ServerError)
        .attach_printable_lazy(|| format!("Could not bind {address}"))?;
    info!("Server running at http://{}", address);
    server.await;
    Ok(())
}

pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(INDEX_PAGE));

    let process = warp::path("process")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form::<ProcessForm>())
        .and(with_state(state.clone()))
        .map(process_playlist);

    let retry_page = warp::path("retry")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::html(RETRY_PAGE));

    let retry = warp::path("retry")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form::<RetryForm>())
        .and(with_state(state))
        .map(retry_errors);

    index.or(process).or(retry_page).or(retry)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn process_playlist(form: ProcessForm, state: AppState) -> warp::reply::Html<Body> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let sink = ChannelSink::new(sender);
    sink.send_raw("<h1>Processing...</h1>\n".to_string());

    match parse_playlist_id(&form.playlist_id) {
        Ok(playlist_id) => {
            let limiter = Arc::new(FixedDelay::new(state.search_delay));
            let pipeline = ConversionPipeline::new(state.services, limiter);
            tokio::spawn(async move {
                if let Ok(summary) = pipeline.convert(&playlist_id, &sink).await {
                    info!(
                        "Playlist {} converted into {}: {} written, {} failed, {} skipped",
                        playlist_id, summary.handle, summary.written, summary.failed, summary.skipped
                    );
                }
            });
        }
        Err(report) => {
            warn!("Rejected playlist id {:?}", form.playlist_id);
            sink.emit(ProgressEvent::Error(describe(&report)));
            sink.close();
        }
    }

    warp::reply::html(stream_body(receiver))
}

fn retry_errors(form: RetryForm, state: AppState) -> warp::reply::Html<Body> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let sink = ChannelSink::new(sender);
    sink.send_raw("<h1>Retrying Errors...</h1>\n".to_string());

    match SpreadsheetHandle::parse(&form.spreadsheet_id) {
        Some(handle) => {
            let limiter = Arc::new(FixedDelay::new(state.retry_delay));
            let pipeline = RecoveryPipeline::new(state.services, limiter);
            tokio::spawn(async move {
                if let Ok(summary) = pipeline.retry(&handle, &sink).await {
                    info!(
                        "Recovered {} of {} tracks in {}",
                        summary.recovered, summary.attempted, handle
                    );
                }
            });
        }
        None => {
            warn!("Rejected spreadsheet id {:?}", form.spreadsheet_id);
            sink.emit(ProgressEvent::Error(format!(
                "Invalid spreadsheet id: {}",
                form.spreadsheet_id
            )));
            sink.close();
        }
    }

    warp::reply::html(stream_body(receiver))
}

/// Streams fragments as the pipeline produces them. The body ends when the
/// sink is closed.
fn stream_body(receiver: UnboundedReceiver<String>) -> Body {
    let chunks = stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), receiver))
    });
    Body::wrap_stream(chunks)
}
