use serde::{Deserialize, Serialize};

/// One repository as served to clients.
///
/// Serialised with the field names clients already depend on:
/// `{"Name", "Description", "Url", "StarsCount", "ForksCount"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepoSummary {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(rename = "StarsCount")]
    pub stars: u64,
    #[serde(rename = "ForksCount")]
    pub forks: u64,
}

/// One search hit as returned by the GitHub search API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
}

impl From<RepoItem> for RepoSummary {
    fn from(item: RepoItem) -> Self {
        Self {
            name: item.name,
            description: item.description.unwrap_or_default(),
            url: item.html_url,
            stars: item.stargazers_count,
            forks: item.forks_count,
        }
    }
}

/// First page of upstream results plus the rate-limit readout that came with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<RepoItem>,
    /// `X-RateLimit-Remaining`, when the service sent it. Diagnostic only.
    pub rate_limit_remaining: Option<u32>,
}
