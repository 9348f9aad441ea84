use async_trait::async_trait;
use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, RedirectUrl,
    RefreshToken, Scope, TokenResponse, TokenUrl,
};

use super::callback::{open_browser, wait_for_callback};
use super::{AuthError, AuthResult, AuthToken, TokenRefresher};
use crate::config::{AppConfig, OAuthClientConfig};

const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Google OAuth for the YouTube search and Sheets scopes.
pub struct GoogleAuth {
    config: OAuthClientConfig,
}

impl GoogleAuth {
    pub fn new(config: OAuthClientConfig) -> Self {
        Self { config }
    }

    fn client(&self) -> AuthResult<BasicClient> {
        Ok(BasicClient::new(
            ClientId::new(self.config.client_id.clone()),
            Some(ClientSecret::new(self.config.client_secret.clone())),
            AuthUrl::new(AppConfig::GOOGLE_AUTH_URL.to_string())
                .into_report()
                .change_context(AuthError)?,
            Some(
                TokenUrl::new(AppConfig::GOOGLE_TOKEN_URL.to_string())
                    .into_report()
                    .change_context(AuthError)?,
            ),
        )
        .set_redirect_uri(
            RedirectUrl::new(self.config.redirect_uri.clone())
                .into_report()
                .change_context(AuthError)?,
        ))
    }

    pub async fn login(&self) -> AuthResult<AuthToken> {
        println!("{}", "🔐 Initiating Google authentication...".cyan());
        let client = self.client()?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let mut request = client.authorize_url(CsrfToken::new_random);
        for scope in AppConfig::GOOGLE_SCOPES {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        // Google only hands out a refresh token on offline access with a fresh consent.
        let (auth_url, csrf_token) = request
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        open_browser(auth_url.as_str());
        let params = wait_for_callback(&self.config.redirect_uri).await?;
        if params.state != *csrf_token.secret() {
            return Err(Report::new(AuthError).attach_printable("OAuth state mismatch"));
        }

        println!("Exchanging authorization code for access token...");
        let token_response = client
            .exchange_code(AuthorizationCode::new(params.code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| Report::new(AuthError).attach_printable(format!("Token exchange failed: {e}")))?;

        println!("{}", "✅ Google authentication successful!".green());
        Ok(AuthToken::new(
            token_response.access_token().secret().to_string(),
            token_response.refresh_token().map(|t| t.secret().to_string()),
            token_response
                .expires_in()
                .map(|d| d.as_secs() as i64)
                .unwrap_or(DEFAULT_EXPIRY_SECS),
        ))
    }
}

#[async_trait]
impl TokenRefresher for GoogleAuth {
    async fn refresh(&self, token: &AuthToken) -> AuthResult<AuthToken> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or(AuthError)
            .into_report()
            .attach_printable("Google token has no refresh token")?;
        let token_response = self
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(async_http_client)
            .await
            .map_err(|e| Report::new(AuthError).attach_printable(format!("Google refresh failed: {e}")))?;
        Ok(AuthToken::new(
            token_response.access_token().secret().to_string(),
            token_response.refresh_token().map(|t| t.secret().to_string()),
            token_response
                .expires_in()
                .map(|d| d.as_secs() as i64)
                .unwrap_or(DEFAULT_EXPIRY_SECS),
        ))
    }
}
