//! Page fetching with optional recursive link following.

use crate::fetch::{Fetcher, fetch_text};
use crate::pipeline::{Flow, Node, RunContext, Scope};
use crate::Result;
use metrics::counter;
use quarry_core::Record;
use std::sync::Arc;
use std::time::Duration;

/// Fetches a page and yields it as `{url, response}`.
///
/// With matchers configured, every record a matcher produces from the page is
/// visited in turn (depth-first), so one node can walk listing page to
/// dataset page to download page. Pages are fetched at most once per run.
pub struct CrawlUrl {
    seed: Option<String>,
    matchers: Arc<Vec<Box<dyn Node>>>,
    fetcher: Arc<dyn Fetcher>,
    max_age: Option<Duration>,
    scope: Scope,
}

/// Build a [`CrawlUrl`] node. Without a seed the incoming record's `url` is
/// fetched.
pub fn crawl_url(seed: Option<&str>, fetcher: Arc<dyn Fetcher>) -> CrawlUrl {
    CrawlUrl {
        seed: seed.map(str::to_string),
        matchers: Arc::new(Vec::new()),
        fetcher,
        max_age: None,
        scope: Scope::new(),
    }
}

impl CrawlUrl {
    pub fn matchers(mut self, matchers: Vec<Box<dyn Node>>) -> Self {
        self.matchers = Arc::new(matchers);
        self
    }

    /// Accept cached pages up to this age.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// A node that re-fetches the `url` of each incoming record with the same
    /// matchers and the same visited set.
    pub fn recurse(&self) -> CrawlUrl {
        CrawlUrl {
            seed: None,
            matchers: Arc::clone(&self.matchers),
            fetcher: Arc::clone(&self.fetcher),
            max_age: self.max_age,
            scope: self.scope,
        }
    }

    fn visit(&self, ctx: &RunContext, record: Record) -> Result<Option<(Record, Vec<Record>)>> {
        let url = record.require_str("url")?.to_string();
        if !ctx.first_seen(self.scope, &url) {
            tracing::debug!(url = %url, "Already visited");
            return Ok(None);
        }

        tracing::info!(url = %url, "Fetching page");
        let body = fetch_text(self.fetcher.as_ref(), &url, self.max_age)?;
        counter!("crawl_pages_fetched_total").increment(1);
        let page = record.with("response", body);

        let mut children = Vec::new();
        for matcher in self.matchers.iter() {
            if let Flow::Records(stream) = matcher.process(ctx, page.clone())? {
                for child in stream {
                    children.push(child?);
                }
            }
        }
        Ok(Some((page, children)))
    }
}

impl Node for CrawlUrl {
    fn name(&self) -> &str {
        "crawl_url"
    }

    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let start = match &self.seed {
            Some(seed) => record.with("url", seed.as_str()),
            None => record,
        };
        Ok(Flow::stream(CrawlIter {
            node: self,
            ctx,
            pending: vec![start],
        }))
    }
}

/// Depth-first walk over pages still to visit.
struct CrawlIter<'a> {
    node: &'a CrawlUrl,
    ctx: &'a RunContext,
    pending: Vec<Record>,
}

impl Iterator for CrawlIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(record) = self.pending.pop() {
            match self.node.visit(self.ctx, record) {
                Ok(Some((page, children))) => {
                    self.pending.extend(children.into_iter().rev());
                    return Some(Ok(page));
                }
                Ok(None) => continue,
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
