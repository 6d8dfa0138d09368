//! Fetching remote content.
//!
//! - [`HttpFetcher`] - blocking HTTP(S) client
//! - [`CachedFetcher`] - wraps another fetcher with a SQLite body cache

mod cache;
mod http;

pub use cache::CachedFetcher;
pub use http::{FetchConfig, HttpFetcher};

use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the remote end reports about a resource without transferring it.
///
/// Used to decide whether a previously captured file needs to be
/// downloaded again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl RemoteStatus {
    /// A status with no fields set carries no information.
    pub fn is_informative(&self) -> bool {
        self.size.is_some() || self.mtime.is_some() || self.etag.is_some()
    }
}

/// Source of remote content.
pub trait Fetcher {
    /// Retrieve the body at `url`.
    ///
    /// `max_age` bounds how stale a locally cached copy may be; `None`
    /// always goes to the network.
    fn fetch(&self, url: &str, max_age: Option<Duration>) -> Result<Vec<u8>>;

    /// Query the remote status of `url`, `None` when the remote does not say.
    fn status(&self, url: &str) -> Result<Option<RemoteStatus>>;
}

/// Fetch and decode as UTF-8 text (lossy).
pub fn fetch_text(fetcher: &dyn Fetcher, url: &str, max_age: Option<Duration>) -> Result<String> {
    let body = fetcher.fetch(url, max_age)?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}
