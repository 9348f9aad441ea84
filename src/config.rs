use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fmt};

use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};

use crate::Suggestion;

/// `AppConfig` holds static configuration values for the application,
/// such as API endpoints and the fixed limits of the conversion flow.
pub struct AppConfig;

impl AppConfig {
    pub const SPOTIFY_API_URL: &'static str = "https://api.spotify.com/v1";
    pub const SPOTIFY_AUTH_URL: &'static str = "https://accounts.spotify.com/authorize";
    pub const SPOTIFY_TOKEN_URL: &'static str = "https://accounts.spotify.com/api/token";
    pub const SPOTIFY_SCOPES: &'static str = "playlist-read-private playlist-read-collaborative";

    pub const GOOGLE_AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    pub const GOOGLE_TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";
    pub const GOOGLE_SCOPES: [&'static str; 2] = [
        "https://www.googleapis.com/auth/youtube.readonly",
        "https://www.googleapis.com/auth/spreadsheets",
    ];

    pub const YOUTUBE_API_URL: &'static str = "https://www.googleapis.com/youtube/v3";
    pub const SHEETS_API_URL: &'static str = "https://sheets.googleapis.com/v4/spreadsheets";

    /// Spotify caps playlist pages at 100 items.
    pub const SPOTIFY_PAGE_SIZE: usize = 100;
    /// Maximum number of rows sent in a single append call.
    pub const BATCH_SIZE: usize = 500;
    pub const DEFAULT_SEARCH_DELAY_MS: u64 = 300;
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 0;
    pub const PING_INTERVAL: usize = 10;

    pub const PRIMARY_TAB: &'static str = "Sheet1";
    pub const ERRORS_TAB: &'static str = "Errors";
    pub const SUCCESS_HEADER: [&'static str; 4] = ["Track Name", "Artist", "Album", "YouTube Link"];
    pub const ERROR_HEADER: [&'static str; 4] = ["Track Name", "Artist", "Album", "Error Details"];

    pub const OAUTH_CALLBACK_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
}

#[derive(Debug)]
pub struct ConfigError;

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Config error")
    }
}

impl std::error::Error for ConfigError {}

pub type ConfigResult<T> = error_stack::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub spotify: OAuthClientConfig,
    pub google: OAuthClientConfig,
    /// Address the web server binds; `0.0.0.0` serves every interface.
    pub host: IpAddr,
    pub port: u16,
    pub search_delay: Duration,
    pub retry_delay: Duration,
    pub home_dir: PathBuf,
}

impl Settings {
    /// Reads the settings from the process environment, loading a `.env`
    /// file from the working directory first when one exists.
    pub fn from_env() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> ConfigResult<String> {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    Report::new(ConfigError)
                        .attach_printable(format!("{key} environment variable not set"))
                        .attach(Suggestion(format!(
                            "add {key} to the environment or to a .env file"
                        )))
                })
        };

        let spotify = OAuthClientConfig {
            client_id: required("SPOTIFY_CLIENT_ID")?,
            client_secret: required("SPOTIFY_CLIENT_SECRET")?,
            redirect_uri: lookup("SPOTIFY_REDIRECT_URI")
                .unwrap_or_else(|| "http://127.0.0.1:8888/callback".to_string()),
        };
        let google = OAuthClientConfig {
            client_id: required("GOOGLE_CLIENT_ID")?,
            client_secret: required("GOOGLE_CLIENT_SECRET")?,
            redirect_uri: lookup("GOOGLE_REDIRECT_URI")
                .unwrap_or_else(|| "http://localhost:8080/callback".to_string()),
        };

        let port = match lookup("PORT") {
            Some(port) => port
                .parse::<u16>()
                .into_report()
                .change_context(ConfigError)
                .attach_printable_lazy(|| format!("PORT is not a valid port: {port}"))?,
            None => AppConfig::DEFAULT_PORT,
        };
        let host = match lookup("HOST") {
            Some(host) => host
                .parse::<IpAddr>()
                .into_report()
                .change_context(ConfigError)
                .attach_printable_lazy(|| format!("HOST is not an IP address: {host}"))?,
            None => AppConfig::DEFAULT_HOST,
        };
        let search_delay = Self::millis(&lookup, "SEARCH_DELAY_MS", AppConfig::DEFAULT_SEARCH_DELAY_MS)?;
        let retry_delay = Self::millis(&lookup, "RETRY_DELAY_MS", AppConfig::DEFAULT_RETRY_DELAY_MS)?;

        let home_dir = match lookup("PLAYLIST_SHEETS_HOME") {
            Some(path) => PathBuf::from(path),
            None => dirs::home_dir()
                .ok_or(ConfigError)
                .into_report()
                .attach_printable("Could not resolve the home directory")?
                .join(".playlist_sheets"),
        };

        Ok(Self {
            spotify,
            google,
            host,
            port,
            search_delay,
            retry_delay,
            home_dir,
        })
    }

    fn millis<F>(lookup: &F, key: &str, default: u64) -> ConfigResult<Duration>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = match lookup(key) {
            Some(raw) => raw
                .parse::<u64>()
                .into_report()
                .change_context(ConfigError)
                .attach_printable_lazy(|| format!("{key} is not a number of milliseconds: {raw}"))?,
            None => default,
        };
        Ok(Duration::from_millis(value))
    }

    pub fn print(&self) {
        println!("{}", "Current settings:".cyan());
        println!("  Spotify client id:     {}", self.spotify.client_id);
        println!("  Spotify client secret: {}", mask(&self.spotify.client_secret));
        println!("  Spotify redirect uri:  {}", self.spotify.redirect_uri);
        println!("  Google client id:      {}", self.google.client_id);
        println!("  Google client secret:  {}", mask(&self.google.client_secret));
        println!("  Google redirect uri:   {}", self.google.redirect_uri);
        println!("  Host:                  {}", self.host);
        println!("  Port:                  {}", self.port);
        println!("  Search delay:          {:?}", self.search_delay);
        println!("  Retry delay:           {:?}", self.retry_delay);
        println!("  Token directory:       {}", self.home_dir.display());
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}{}", "*".repeat(secret.chars().count().saturating_sub(4)))
}
