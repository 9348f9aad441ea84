use std::time::Duration;

use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};
use log::debug;
use tiny_http::{Header, Response, Server};
use url::Url;

use super::{AuthError, AuthResult};
use crate::config::AppConfig;

const SUCCESS_PAGE: &str = r#"
<html>
<head><title>Authentication Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 80px;">
    <h1>Authentication Successful!</h1>
    <p>You can close this window and return to playlist-sheets.</p>
</body>
</html>
"#;

/// Query parameters delivered to the OAuth redirect URI.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

impl CallbackParams {
    /// Extracts `code` and `state` from a request path such as
    /// `/callback?code=abc&state=xyz`. Returns `None` when the path does not
    /// match or carries no code.
    pub fn parse(request_url: &str, expected_path: &str) -> AuthResult<Option<Self>> {
        let url = Url::parse("http://localhost")
            .and_then(|base| base.join(request_url))
            .into_report()
            .change_context(AuthError)?;
        if url.path() != expected_path {
            return Ok(None);
        }
        let mut code = None;
        let mut state = String::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = value.into_owned(),
                "error" => {
                    return Err(Report::new(AuthError)
                        .attach_printable(format!("Authorization was denied: {value}")))
                }
                _ => {}
            }
        }
        Ok(code.map(|code| Self { code, state }))
    }
}

/// Waits for the provider to redirect the browser back to `redirect_uri` and
/// returns the authorization code it carries.
pub async fn wait_for_callback(redirect_uri: &str) -> AuthResult<CallbackParams> {
    let redirect = Url::parse(redirect_uri)
        .into_report()
        .change_context(AuthError)
        .attach_printable_lazy(|| format!("Invalid redirect uri: {redirect_uri}"))?;
    let host = redirect.host_str().unwrap_or("localhost").to_string();
    let port = redirect.port_or_known_default().unwrap_or(80);
    let path = redirect.path().to_string();

    let server = Server::http(format!("{host}:{port}"))
        .map_err(|e| Report::new(AuthError).attach_printable(format!("Failed to bind {host}:{port}: {e}")))?;
    println!("Waiting for authentication callback on {}", redirect_uri.cyan());

    let timeout = Duration::from_secs(AppConfig::OAUTH_CALLBACK_TIMEOUT_SECS);
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            println!("{}", "Authentication timeout!".red());
            return Err(Report::new(AuthError).attach_printable("Timed out waiting for the OAuth callback"));
        }

        match server.try_recv() {
            Ok(Some(request)) => {
                debug!("Received callback request: {}", request.url());
                match CallbackParams::parse(request.url(), &path) {
                    Ok(Some(params)) => {
                        let content_type = Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..])
                            .map_err(|_| Report::new(AuthError))?;
                        let response = Response::from_string(SUCCESS_PAGE).with_header(content_type);
                        let _ = request.respond(response);
                        return Ok(params);
                    }
                    Ok(None) => {
                        let _ = request.respond(Response::from_string("Not Found").with_status_code(404));
                    }
                    Err(report) => {
                        let _ = request.respond(
                            Response::from_string("Authentication failed").with_status_code(400),
                        );
                        return Err(report);
                    }
                }
            }
            Ok(None) => tokio::time::sleep(Duration::from_millis(100)).await,
            Err(e) => {
                return Err(Report::new(AuthError).attach_printable(format!("Callback server failed: {e}")))
            }
        }
    }
}

/// Opens `auth_url` in the default browser, printing it as a fallback.
pub fn open_browser(auth_url: &str) {
    println!("Opening browser for authentication...");
    println!("If browser doesn't open, visit: {}", auth_url.blue());
    if webbrowser::open(auth_url).is_err() {
        println!("{}", "Failed to open browser automatically".yellow());
    }
}
