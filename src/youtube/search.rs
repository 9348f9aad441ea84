use std::sync::Arc;

use async_trait::async_trait;
use error_stack::{Report, ResultExt};
use log::{debug, error, warn};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::auth::Credential;
use crate::config::AppConfig;
use crate::youtube::{ResolutionOutcome, VideoResolver, YouTubeError, YouTubeResult};

const QUOTA_REASONS: [&str; 4] = [
    "quotaExceeded",
    "rateLimitExceeded",
    "dailyLimitExceeded",
    "userRateLimitExceeded",
];

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize, Debug)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Deserialize, Debug)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: ErrorDetails,
}

#[derive(Deserialize, Debug)]
struct ErrorDetails {
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Deserialize, Debug)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

pub fn video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Classifies a non-success search response.
pub fn classify_failure(status: StatusCode, body: &str) -> YouTubeResult<ResolutionOutcome> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(Report::new(YouTubeError::Unauthorized)
            .attach_printable(format!("YouTube rejected the access token: {body}")));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(ResolutionOutcome::QuotaExceeded);
    }
    let quota_hit = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| {
            parsed
                .error
                .errors
                .iter()
                .any(|e| QUOTA_REASONS.contains(&e.reason.as_str()))
        })
        .unwrap_or(false);
    if quota_hit {
        return Ok(ResolutionOutcome::QuotaExceeded);
    }
    Ok(ResolutionOutcome::TransientError)
}

fn classify_success(body: &str) -> ResolutionOutcome {
    match serde_json::from_str::<SearchResponse>(body) {
        Ok(response) => match response.items.into_iter().next() {
            Some(SearchItem {
                id: SearchItemId {
                    video_id: Some(video_id),
                },
            }) => ResolutionOutcome::Link(video_url(&video_id)),
            _ => ResolutionOutcome::NotFound,
        },
        Err(e) => {
            warn!("Unparseable YouTube search response: {e}");
            ResolutionOutcome::TransientError
        }
    }
}

/// YouTube Data API v3 top-1 video search.
pub struct YouTubeSearch {
    client: reqwest::Client,
    base_url: String,
    credential: Arc<Credential>,
}

impl YouTubeSearch {
    pub fn new(credential: Arc<Credential>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: AppConfig::YOUTUBE_API_URL.to_string(),
            credential,
        }
    }
}

#[async_trait]
impl VideoResolver for YouTubeSearch {
    async fn resolve(&self, query: &str) -> YouTubeResult<ResolutionOutcome> {
        let token = self
            .credential
            .fresh_access_token()
            .await
            .change_context(YouTubeError::Unauthorized)?;
        debug!("Searching YouTube for {query:?}");
        let response = match self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("maxResults", "1"),
                ("q", query),
            ])
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Error searching YouTube: {e}");
                return Ok(ResolutionOutcome::TransientError);
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!("Error reading YouTube response: {e}");
                return Ok(ResolutionOutcome::TransientError);
            }
        };
        if status.is_success() {
            return Ok(classify_success(&body));
        }

        let outcome = classify_failure(status, &body)?;
        match outcome {
            ResolutionOutcome::QuotaExceeded => warn!("YouTube quota exceeded"),
            _ => error!("YouTube search failed with {status}: {body}"),
        }
        Ok(outcome)
    }
}
