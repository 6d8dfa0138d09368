//! Link extraction from fetched pages.

use crate::pipeline::{Flow, Node, RunContext, Scope};
use crate::{Error, Result};
use metrics::counter;
use once_cell::sync::Lazy;
use quarry_core::Record;
use regex::Regex;
use url::Url;

static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))[^>]*>(.*?)</a\s*>"#)
        .expect("valid anchor pattern")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid space pattern"));

/// An `<a href>` occurrence on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub text: String,
}

/// Extract all anchors from an HTML document, in document order.
pub fn extract_links(html: &str) -> Vec<Link> {
    ANCHOR
        .captures_iter(html)
        .filter_map(|caps| {
            let href = caps.get(1).or(caps.get(2)).or(caps.get(3))?.as_str();
            let inner = caps.get(4).map_or("", |m| m.as_str());
            let text = TAG.replace_all(inner, " ");
            let text = SPACE.replace_all(text.trim(), " ");
            Some(Link {
                href: decode_entities(href.trim()),
                text: decode_entities(&text),
            })
        })
        .collect()
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// Matches links on the page carried in a record's `response` field.
///
/// Each link is resolved against the record's `url` and matched against the
/// pattern anchored at the start of the absolute URL. Every hit becomes a
/// record with `url`, `url_href`, `url_text` and the pattern's named groups;
/// a group named `url` replaces the resolved URL. A URL already emitted by
/// this matcher earlier in the run is not emitted again.
pub struct AHrefMatch {
    pattern: String,
    regex: Regex,
    min_count: usize,
    scope: Scope,
}

/// Build an [`AHrefMatch`] node.
pub fn a_href_match(pattern: &str) -> Result<AHrefMatch> {
    Ok(AHrefMatch {
        pattern: pattern.to_string(),
        regex: Regex::new(&format!("^(?:{})", pattern))?,
        min_count: 0,
        scope: Scope::new(),
    })
}

impl AHrefMatch {
    /// Fail when a page yields fewer matches than `min_count`.
    pub fn min_count(mut self, min_count: usize) -> Self {
        self.min_count = min_count;
        self
    }

    /// All matches on one page, before de-duplication.
    pub fn find(&self, record: &Record) -> Result<Vec<Record>> {
        let html = record.require_str("response")?;
        let base = match record.get_str("url") {
            Some(url) => Some(Url::parse(url)?),
            None => None,
        };

        let mut template = record.clone();
        template.remove("response");

        let mut matches = Vec::new();
        for link in extract_links(html) {
            let absolute = match &base {
                Some(base) => match base.join(&link.href) {
                    Ok(url) => url.to_string(),
                    Err(e) => {
                        tracing::debug!(href = %link.href, error = %e, "Unresolvable link");
                        continue;
                    }
                },
                None => link.href.clone(),
            };
            let Some(caps) = self.regex.captures(&absolute) else {
                continue;
            };

            let mut out = template
                .clone()
                .with("url", absolute.as_str())
                .with("url_href", link.href.as_str())
                .with("url_text", link.text.as_str());
            for name in self.regex.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    out.insert(name, m.as_str());
                }
            }
            matches.push(out);
        }

        if matches.len() < self.min_count {
            return Err(Error::TooFewMatches {
                url: record.get_str("url").unwrap_or("-").to_string(),
                pattern: self.pattern.clone(),
                expected: self.min_count,
                found: matches.len(),
            });
        }
        Ok(matches)
    }
}

impl Node for AHrefMatch {
    fn name(&self) -> &str {
        "a_href_match"
    }

    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let matches = self.find(&record)?;
        tracing::debug!(
            url = record.get_str("url").unwrap_or("-"),
            pattern = %self.pattern,
            count = matches.len(),
            "Matched links"
        );
        Ok(Flow::stream(matches.into_iter().filter_map(move |m| {
            let url = m.get_str("url").unwrap_or_default();
            if ctx.first_seen(self.scope, url) {
                counter!("match_records_total").increment(1);
                Some(Ok(m))
            } else {
                tracing::debug!(url = %url, "Already matched in this run");
                counter!("match_duplicates_total").increment(1);
                None
            }
        })))
    }
}
