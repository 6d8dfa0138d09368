//! Generic pipeline nodes: crawling, link matching, manifests and field
//! combinators.

mod checksums;
mod crawl;
mod matches;
mod misc;

pub use checksums::{KNOWN_DIGESTS, ParseChecksums, parse_checksums};
pub use crawl::{CrawlUrl, crawl_url};
pub use matches::{AHrefMatch, Link, a_href_match, extract_links};
pub use misc::{Assign, FieldTest, SkipIf, Sub, assign, skip_if, sub};
