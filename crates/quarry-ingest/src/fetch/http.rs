//! Blocking HTTP fetcher.

use super::{Fetcher, RemoteStatus};
use crate::{Error, Result};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use std::time::Duration;

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("quarry/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Fetches over HTTP(S). No caching; wrap in a
/// [`CachedFetcher`](super::CachedFetcher) for that.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, _max_age: Option<Duration>) -> Result<Vec<u8>> {
        tracing::debug!(url = %url, "GET");
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: status.to_string(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }

    fn status(&self, url: &str) -> Result<Option<RemoteStatus>> {
        let response = self.client.head(url).send()?;
        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "HEAD not successful");
            return Ok(None);
        }
        let headers = response.headers();
        let header = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let status = RemoteStatus {
            size: header(CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            mtime: header(LAST_MODIFIED),
            etag: header(ETAG),
        };
        Ok(status.is_informative().then_some(status))
    }
}
