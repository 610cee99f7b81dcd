//! HTTP helpers: cover downloads and reachability checks.

use std::time::Duration;

use async_trait::async_trait;

use super::CoverFetcher;
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("syncy/", env!("CARGO_PKG_VERSION"));

/// Timeout for reachability checks.
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Downloads cover images over HTTP(S).
pub struct HttpCoverFetcher {
    http_client: reqwest::Client,
}

impl HttpCoverFetcher {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http_client }
    }
}

impl Default for HttpCoverFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoverFetcher for HttpCoverFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(target: "syncy::remote", url, "Downloading cover");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::not_found(format!("cover {url}")));
        }
        if !status.is_success() {
            return Err(Error::network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(data.to_vec())
    }
}

/// Whether `url` answers a HEAD request within a few seconds.
///
/// Any HTTP response counts as reachable; only transport failures do not.
pub async fn check_url_reachable(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).timeout(REACHABILITY_TIMEOUT).send().await {
        Ok(response) => {
            tracing::debug!(target: "syncy::remote", url, status = %response.status(), "Reachability check answered");
            true
        }
        Err(e) => {
            tracing::warn!(target: "syncy::remote", url, error = %e, "Reachability check failed");
            false
        }
    }
}
