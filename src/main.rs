use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use error_stack::fmt::{Charset, ColorMode};
use error_stack::{IntoReport, Report, ResultExt};

use crate::auth::google_auth::GoogleAuth;
use crate::auth::spotify_auth::SpotifyAuth;
use crate::auth::{AuthContext, TokenCache};
use crate::config::Settings;
use crate::dialoguer::Dialoguer;
use crate::pipeline::convert::ConversionPipeline;
use crate::pipeline::progress::ConsoleSink;
use crate::pipeline::rate_limiter::FixedDelay;
use crate::pipeline::recover::RecoveryPipeline;
use crate::pipeline::Services;
use crate::server::AppState;
use crate::sheets::SpreadsheetHandle;
use crate::spotify::playlist::parse_playlist_id;

mod auth;
mod config;
mod dialoguer;
mod pipeline;
mod server;
mod sheets;
mod spotify;
mod youtube;

#[derive(Debug)]
pub struct PlaylistSheetsError;
impl fmt::Display for PlaylistSheetsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist Sheets error")
    }
}
impl std::error::Error for PlaylistSheetsError {}

pub type PlaylistSheetsResult<T> = error_stack::Result<T, PlaylistSheetsError>;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Spotify playlists to YouTube links in a Google Sheet")]
struct Cli {
    #[command(subcommand)]
    command: PlaylistSheetsCommands,
}

#[derive(Subcommand, Debug, PartialEq, Clone)]
enum PlaylistSheetsCommands {
    /// Authorize Spotify and Google and store the tokens
    Login {
        #[clap(long, action, conflicts_with = "google_only")]
        spotify_only: bool,
        #[clap(long, action)]
        google_only: bool,
    },
    /// Search every track of a playlist on YouTube and write the links to a new sheet
    Convert {
        /// Playlist id, open.spotify.com link or spotify: uri
        playlist: Option<String>,
    },
    /// Search again the tracks listed in the Errors tab of a sheet
    Retry {
        /// Spreadsheet id or docs.google.com link
        spreadsheet: Option<String>,
    },
    /// Serve the web forms
    Serve {
        #[clap(long, short)]
        port: Option<u16>,
    },
    /// Prints the current settings
    Config,
}

impl PlaylistSheetsCommands {
    pub async fn execute(&self) -> PlaylistSheetsResult<()> {
        let settings = Settings::from_env().change_context(PlaylistSheetsError)?;
        match self {
            PlaylistSheetsCommands::Login {
                spotify_only,
                google_only,
            } => {
                let (spotify, google) = match (*spotify_only, *google_only) {
                    (true, _) => (true, false),
                    (_, true) => (false, true),
                    _ => {
                        let options = vec!["Spotify and Google", "Spotify only", "Google only"];
                        let selection = Dialoguer::select(
                            "Which accounts do you want to connect?".to_string(),
                            options,
                            None,
                        )
                        .change_context(PlaylistSheetsError)?;
                        (selection != 2, selection != 1)
                    }
                };
                if spotify {
                    let token = SpotifyAuth::new(settings.spotify.clone())
                        .login()
                        .await
                        .change_context(PlaylistSheetsError)?;
                    let cache = TokenCache::spotify(&settings);
                    cache.save(&token).change_context(PlaylistSheetsError)?;
                    println!(
                        "{} {}",
                        "Spotify connected, token saved to".green(),
                        cache.path().display()
                    );
                }
                if google {
                    let token = GoogleAuth::new(settings.google.clone())
                        .login()
                        .await
                        .change_context(PlaylistSheetsError)?;
                    let cache = TokenCache::google(&settings);
                    cache.save(&token).change_context(PlaylistSheetsError)?;
                    println!(
                        "{} {}",
                        "Google connected, token saved to".green(),
                        cache.path().display()
                    );
                }
                Ok(())
            }
            PlaylistSheetsCommands::Convert { playlist } => {
                let playlist = match playlist {
                    Some(playlist) => playlist.clone(),
                    None => Dialoguer::input("Spotify playlist".to_string())
                        .change_context(PlaylistSheetsError)?,
                };
                let playlist_id =
                    parse_playlist_id(&playlist).change_context(PlaylistSheetsError)?;
                let services = Self::services(&settings).await?;
                let pipeline =
                    ConversionPipeline::new(services, Arc::new(FixedDelay::new(settings.search_delay)));
                let summary = pipeline
                    .convert(&playlist_id, &ConsoleSink::stdout())
                    .await
                    .change_context(PlaylistSheetsError)?;
                println!(
                    "{} tracks: {} linked, {} failed, {} skipped",
                    summary.total_tracks,
                    summary.written.to_string().green(),
                    summary.failed.to_string().red(),
                    summary.skipped.to_string().yellow()
                );
                Ok(())
            }
            PlaylistSheetsCommands::Retry { spreadsheet } => {
                let spreadsheet = match spreadsheet {
                    Some(spreadsheet) => spreadsheet.clone(),
                    None => Dialoguer::input("Spreadsheet".to_string())
                        .change_context(PlaylistSheetsError)?,
                };
                let handle = SpreadsheetHandle::parse(&spreadsheet)
                    .ok_or(PlaylistSheetsError)
                    .into_report()
                    .attach_printable_lazy(|| format!("Invalid spreadsheet id: {spreadsheet}"))?;
                let services = Self::services(&settings).await?;
                let pipeline =
                    RecoveryPipeline::new(services, Arc::new(FixedDelay::new(settings.retry_delay)));
                let summary = pipeline
                    .retry(&handle, &ConsoleSink::stdout())
                    .await
                    .change_context(PlaylistSheetsError)?;
                println!(
                    "Recovered {} of {} tracks, {} not searched",
                    summary.recovered.to_string().green(),
                    summary.attempted,
                    summary.skipped.to_string().yellow()
                );
                Ok(())
            }
            PlaylistSheetsCommands::Serve { port } => {
                let state = AppState {
                    services: Self::services(&settings).await?,
                    search_delay: settings.search_delay,
                    retry_delay: settings.retry_delay,
                };
                let address = SocketAddr::new(settings.host, port.unwrap_or(settings.port));
                println!("{} http://{}", "Listening on".green(), address);
                server::serve(state, address)
                    .await
                    .change_context(PlaylistSheetsError)
            }
            PlaylistSheetsCommands::Config => {
                settings.print();
                Ok(())
            }
        }
    }

    async fn services(settings: &Settings) -> PlaylistSheetsResult<Services> {
        let context = AuthContext::load(settings)
            .await
            .change_context(PlaylistSheetsError)?;
        Ok(Services::google(&context))
    }
}

pub struct Suggestion(String);

impl Suggestion {
    pub fn set_report() {
        Report::set_charset(Charset::Utf8);
        Report::set_color_mode(ColorMode::Color);
        Report::install_debug_hook::<Self>(|Self(value), context| {
            context.push_body(format!("{}: {value}", "suggestion".yellow()))
        });
    }
}

async fn run() -> PlaylistSheetsResult<()> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.parse_default_env();
    clog.init();

    Suggestion::set_report();

    cli.command.execute().await
}

#[tokio::main]
async fn main() -> PlaylistSheetsResult<()> {
    run().await
}
