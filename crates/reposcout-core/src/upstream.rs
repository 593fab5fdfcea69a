//! Upstream repository search.
//!
//! [`RepoSearch`] is the seam the dispatcher depends on; [`GithubClient`] is the
//! production implementation against the GitHub REST search API. Only the first
//! page of results is requested.

use crate::config::UpstreamConfig;
use crate::types::{RepoItem, SearchPage};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Source of repositories for a topic.
#[async_trait]
pub trait RepoSearch: Send + Sync {
    /// Fetch the first page of repositories tagged with `topic`, in the order
    /// the upstream service returned them.
    async fn search(&self, topic: &str) -> Result<SearchPage>;
}

/// GitHub search API client
pub struct GithubClient {
    client: Client,
    search_url: Url,
    token: Option<String>,
    per_page: u8,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    items: Vec<RepoItem>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl GithubClient {
    /// Build a client from configuration, using `timeout_secs` for every call.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        Self::with_timeout(config, Duration::from_secs(config.timeout_secs))
    }

    /// Build a client with an explicit per-call timeout (primarily for tests)
    pub fn with_timeout(config: &UpstreamConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reposcout/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            search_url: search_url(&config.base_url)?,
            token: config.token.clone(),
            per_page: config.per_page,
        })
    }
}

#[async_trait]
impl RepoSearch for GithubClient {
    async fn search(&self, topic: &str) -> Result<SearchPage> {
        let mut request = self
            .client
            .get(self.search_url.clone())
            .query(&[
                ("q", topic_qualifier(topic)),
                ("per_page", self.per_page.to_string()),
            ])
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        let remaining = header_number(response.headers(), RATE_LIMIT_REMAINING);

        if !status.is_success() {
            let reset_at = header_number(response.headers(), RATE_LIMIT_RESET);
            if is_rate_limited(status, remaining) {
                warn!(topic, status = status.as_u16(), ?reset_at, "upstream rate limit exhausted");
                return Err(Error::RateLimited { reset_at });
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|parsed| parsed.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(classify_transport)?;
        let parsed: SearchResponse = serde_json::from_str(&body)?;

        debug!(
            topic,
            total_count = parsed.total_count,
            returned = parsed.items.len(),
            rate_limit_remaining = ?remaining,
            "upstream search completed"
        );

        Ok(SearchPage {
            items: parsed.items,
            rate_limit_remaining: remaining.and_then(|r| u32::try_from(r).ok()),
        })
    }
}

/// `{base}/search/repositories`, keeping any path prefix on `base`.
fn search_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::Config(format!("Invalid upstream base_url '{base}': {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join("search/repositories")
        .map_err(|e| Error::Config(format!("Invalid upstream base_url '{base}': {e}")))
}

/// `topic:<topic>` search qualifier. Topics containing whitespace are quoted so
/// GitHub reads them as one qualifier value instead of extra free-text terms.
fn topic_qualifier(topic: &str) -> String {
    if topic.contains(|c: char| c.is_whitespace() || c == '"') {
        let inner: String = topic.chars().filter(|&c| c != '"').collect();
        format!("topic:\"{inner}\"")
    } else {
        format!("topic:{topic}")
    }
}

fn classify_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::Network(err)
    }
}

// GitHub signals an exhausted primary limit with 403 or 429 and a zero
// remaining count. A 429 without the header is a secondary limit.
fn is_rate_limited(status: StatusCode, remaining: Option<u64>) -> bool {
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => remaining == Some(0),
        _ => false,
    }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
