//! Prometheus metrics helpers for quarry.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quarry_core::metrics::init_metrics;
//!
//! // Installs the recorder and serves /metrics on the given port
//! init_metrics(9091)?;
//!
//! use metrics::counter;
//! counter!("crawl_pages_fetched_total").increment(1);
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`crawl_`, `match_`, `annex_`, `archive_`)
//! - Suffix: unit or type (`_total`, `_bytes`)

use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// The exporter runs on its own background thread, so this works from the
/// synchronous pipeline binaries without an async runtime.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    register_common_metrics();
    Ok(())
}

/// Register descriptions for the metrics emitted by the pipeline.
///
/// Called automatically by [`init_metrics`].
pub fn register_common_metrics() {
    // =========================================================================
    // Crawling
    // =========================================================================

    describe_counter!(
        "crawl_pages_fetched_total",
        "Number of pages fetched by crawl nodes"
    );
    describe_counter!(
        "crawl_cache_hits_total",
        "Number of fetches served from the local URL cache"
    );
    describe_counter!(
        "match_records_total",
        "Number of records emitted by link matchers"
    );
    describe_counter!(
        "match_duplicates_total",
        "Number of matcher hits suppressed because the URL was already emitted"
    );

    // =========================================================================
    // Store adapter
    // =========================================================================

    describe_counter!(
        "annex_files_added_total",
        "Number of captured files that changed the store"
    );
    describe_counter!(
        "annex_downloads_skipped_total",
        "Number of downloads skipped because the remote file was unchanged"
    );
    describe_counter!(
        "annex_records_failed_total",
        "Number of records skipped after a download or verification failure"
    );
    describe_counter!(
        "archives_extracted_total",
        "Number of archives expanded during normalization"
    );
    describe_counter!(
        "archive_files_added_total",
        "Number of files added from extracted archives"
    );
    describe_counter!("merge_total", "Number of branch merges that introduced changes");
    describe_counter!(
        "datasets_initiated_total",
        "Number of dataset stores created by discovery pipelines"
    );
}
