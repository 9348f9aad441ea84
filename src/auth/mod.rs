use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_stack::{IntoReport, Report, ResultExt};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::Settings;
use crate::Suggestion;

pub mod callback;
pub mod google_auth;
pub mod spotify_auth;

#[derive(Debug)]
pub struct AuthError;

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Authentication error")
    }
}

impl std::error::Error for AuthError {}

pub type AuthResult<T> = error_stack::Result<T, AuthError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in_secs: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(chrono::Duration::zero())
    }

    pub fn expires_within(&self, margin: chrono::Duration) -> bool {
        self.expires_at <= Utc::now() + margin
    }
}

/// Tokens this close to expiry are refreshed before they are handed out.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, token: &AuthToken) -> AuthResult<AuthToken>;
}

/// Where a provider's token lives on disk between runs.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn spotify(settings: &Settings) -> Self {
        Self::new(settings.home_dir.join("spotify_token.json"))
    }

    pub fn google(settings: &Settings) -> Self {
        Self::new(settings.home_dir.join("google_token.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, token: &AuthToken) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .into_report()
                .change_context(AuthError)
                .attach_printable_lazy(|| format!("Failed to create {}", parent.display()))?;
        }
        let token_json = serde_json::to_string_pretty(token)
            .into_report()
            .change_context(AuthError)?;
        std::fs::write(&self.path, token_json)
            .into_report()
            .change_context(AuthError)
            .attach_printable_lazy(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn load(&self) -> AuthResult<AuthToken> {
        let token_json = std::fs::read_to_string(&self.path)
            .into_report()
            .change_context(AuthError)
            .attach_printable_lazy(|| format!("No token found at {}", self.path.display()))
            .attach(Suggestion("run `playlist-sheets login` first".to_string()))?;
        serde_json::from_str(&token_json)
            .into_report()
            .change_context(AuthError)
            .attach_printable_lazy(|| format!("Token file {} is corrupt", self.path.display()))
    }
}

/// Shared authorization handle for one provider.
///
/// Every service holding the same `Arc<Credential>` sees a refresh as soon as
/// it lands. `refresh` is the only place the stored token is replaced.
pub struct Credential {
    provider: &'static str,
    token: RwLock<AuthToken>,
    refresh_gate: Mutex<()>,
    refresher: Arc<dyn TokenRefresher>,
    cache: Option<TokenCache>,
}

impl Credential {
    pub fn new(
        provider: &'static str,
        token: AuthToken,
        refresher: Arc<dyn TokenRefresher>,
        cache: Option<TokenCache>,
    ) -> Self {
        Self {
            provider,
            token: RwLock::new(token),
            refresh_gate: Mutex::new(()),
            refresher,
            cache,
        }
    }

    pub async fn access_token(&self) -> String {
        self.token.read().await.access_token.clone()
    }

    /// The current access token, refreshed first when it is expired or about
    /// to expire. A token without a refresh token is returned as is.
    pub async fn fresh_access_token(&self) -> AuthResult<String> {
        let current = self.token.read().await.clone();
        if current.refresh_token.is_none()
            || !current.expires_within(chrono::Duration::seconds(EXPIRY_MARGIN_SECS))
        {
            return Ok(current.access_token);
        }
        self.refresh(&current.access_token).await
    }

    /// Replaces `stale_access_token` with a fresh one.
    ///
    /// Concurrent callers that observed the same stale token are serialized on
    /// the gate; only the first one reaches the provider, the rest get the
    /// token it stored.
    pub async fn refresh(&self, stale_access_token: &str) -> AuthResult<String> {
        let _gate = self.refresh_gate.lock().await;
        let current = self.token.read().await.clone();
        if current.access_token != stale_access_token {
            debug!("{} token already refreshed by another run", self.provider);
            return Ok(current.access_token);
        }

        info!("{} access token expired, refreshing", self.provider);
        let mut fresh = self
            .refresher
            .refresh(&current)
            .await
            .attach_printable_lazy(|| format!("Failed to refresh the {} token", self.provider))?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = current.refresh_token.clone();
        }
        if let Some(cache) = &self.cache {
            cache.save(&fresh)?;
        }
        let access_token = fresh.access_token.clone();
        *self.token.write().await = fresh;
        Ok(access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Credentials for both providers, built once per process and passed to every
/// service explicitly.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub spotify: Arc<Credential>,
    pub google: Arc<Credential>,
}

impl AuthContext {
    pub async fn load(settings: &Settings) -> AuthResult<Self> {
        let spotify_cache = TokenCache::spotify(settings);
        let spotify_token = spotify_cache
            .load()
            .attach_printable("Spotify is not logged in")?;
        let spotify = Arc::new(Credential::new(
            "Spotify",
            spotify_token,
            Arc::new(spotify_auth::SpotifyAuth::new(settings.spotify.clone())),
            Some(spotify_cache),
        ));

        let google_cache = TokenCache::google(settings);
        let google_token = google_cache
            .load()
            .attach_printable("Google is not logged in")?;
        let google = Arc::new(Credential::new(
            "Google",
            google_token.clone(),
            Arc::new(google_auth::GoogleAuth::new(settings.google.clone())),
            Some(google_cache),
        ));
        if google_token.is_expired() {
            if google_token.refresh_token.is_none() {
                return Err(Report::new(AuthError)
                    .attach_printable("Google token expired and has no refresh token")
                    .attach(Suggestion("run `playlist-sheets login --google-only`".to_string())));
            }
            google.refresh(&google_token.access_token).await?;
        }

        Ok(Self { spotify, google })
    }
}
