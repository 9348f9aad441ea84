use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};
use oauth2::CsrfToken;
use serde::Deserialize;
use url::Url;

use super::callback::{open_browser, wait_for_callback};
use super::{AuthError, AuthResult, AuthToken, TokenRefresher};
use crate::config::{AppConfig, OAuthClientConfig};

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Spotify authorization code flow.
pub struct SpotifyAuth {
    config: OAuthClientConfig,
    client: reqwest::Client,
}

impl SpotifyAuth {
    pub fn new(config: OAuthClientConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn authorize_url(&self, state: &str) -> AuthResult<Url> {
        Url::parse_with_params(
            AppConfig::SPOTIFY_AUTH_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("scope", AppConfig::SPOTIFY_SCOPES),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("state", state),
            ],
        )
        .into_report()
        .change_context(AuthError)
    }

    pub async fn login(&self) -> AuthResult<AuthToken> {
        println!("{}", "🔐 Initiating Spotify authentication...".cyan());
        let state = CsrfToken::new_random();
        let auth_url = self.authorize_url(state.secret())?;

        open_browser(auth_url.as_str());
        let params = wait_for_callback(&self.config.redirect_uri).await?;
        if params.state != *state.secret() {
            return Err(Report::new(AuthError).attach_printable("OAuth state mismatch"));
        }

        let token = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", params.code.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;
        println!("{}", "✅ Spotify authentication successful!".green());
        Ok(token)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> AuthResult<AuthToken> {
        let auth_string = format!("{}:{}", self.config.client_id, self.config.client_secret);
        let encoded_auth = general_purpose::STANDARD.encode(auth_string);

        let response = self
            .client
            .post(AppConfig::SPOTIFY_TOKEN_URL)
            .header("Authorization", format!("Basic {}", encoded_auth))
            .form(form)
            .send()
            .await
            .into_report()
            .change_context(AuthError)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Report::new(AuthError)
                .attach_printable(format!("Spotify token endpoint returned {status}: {body}")));
        }
        let token_response = response
            .json::<TokenResponse>()
            .await
            .into_report()
            .change_context(AuthError)?;
        Ok(AuthToken::new(
            token_response.access_token,
            token_response.refresh_token,
            token_response.expires_in.unwrap_or(3600),
        ))
    }
}

#[async_trait]
impl TokenRefresher for SpotifyAuth {
    async fn refresh(&self, token: &AuthToken) -> AuthResult<AuthToken> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or(AuthError)
            .into_report()
            .attach_printable("Spotify token has no refresh token")?;
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ])
        .await
    }
}
