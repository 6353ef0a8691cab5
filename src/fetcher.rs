//! Public key fetching
//!
//! GitHub serves every user's public keys as plain text at
//! `https://github.com/<user>.keys`, one key per line.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::SyncError;

/// Default URL template, `{user}` is replaced with the username
pub const DEFAULT_KEY_URL: &str = "https://github.com/{user}.keys";

/// Source of a user's public keys
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch raw key lines for `user`, without line terminators
    async fn fetch(&self, user: &str) -> Result<Vec<String>, SyncError>;
}

/// Fetches keys over HTTP from a templated URL
pub struct GithubKeyFetcher {
    client: Client,
    url_template: String,
}

impl GithubKeyFetcher {
    /// Create a fetcher for the given URL template
    pub fn new(url_template: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("github-key-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(client, url_template))
    }

    pub fn with_client(client: Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    /// URL the keys of `user` are fetched from
    pub fn url_for(&self, user: &str) -> String {
        self.url_template.replace("{user}", user)
    }
}

#[async_trait]
impl KeyFetcher for GithubKeyFetcher {
    async fn fetch(&self, user: &str) -> Result<Vec<String>, SyncError> {
        let url = self.url_for(user);
        debug!(url = %url, "Fetching public keys");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| SyncError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| SyncError::Body {
            url: url.clone(),
            source,
        })?;

        let keys = parse_key_lines(&body);
        debug!(url = %url, count = keys.len(), "Fetched public keys");
        Ok(keys)
    }
}

/// Split a response body into key lines.
///
/// Line terminators (`\n` or `\r\n`) are removed and blank lines skipped.
pub fn parse_key_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
