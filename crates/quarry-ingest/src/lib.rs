//! Pipeline engine and branch-staged ingestion for quarry.
//!
//! A crawl is a [`Pipeline`] of [`Node`]s passing [`Record`](quarry_core::Record)s.
//! Generic nodes walk web pages and checksum manifests; the
//! [`Annexificator`] nodes put what they find into a
//! [`ContentStore`](quarry_store::ContentStore) in three stages:
//!
//! ```text
//! ┌──────────────────┐
//! │     incoming     │  raw downloads, exactly as published
//! └────────┬─────────┘
//!          │  merge (theirs)
//!          ▼
//! ┌──────────────────┐
//! │incoming-processed│  archives expanded, leading dirs stripped, renamed
//! └────────┬─────────┘
//!          │  merge
//!          ▼
//! ┌──────────────────┐
//! │      master      │  what users check out
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`pipeline`] - nodes, flows and composition
//! - [`nodes`] - crawling, link matching, manifests, field combinators
//! - [`fetch`] - HTTP and cached fetchers
//! - [`annex`] - store-facing nodes (capture, branches, archives)
//! - [`dataset`] / [`datacite`] - discovering and initialising datasets
//! - [`templates`] - the ready-made dataset and collection pipelines

pub mod annex;
pub mod config;
pub mod datacite;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod nodes;
pub mod pipeline;
pub mod templates;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

pub use annex::{AnnexConfig, Annexificator, ArchiveOptions, Collision};
pub use config::{CollectionConfig, CrawlConfig};
pub use dataset::{DatasetOptions, Existing, initiate_dataset};
pub use fetch::{CachedFetcher, FetchConfig, Fetcher, HttpFetcher, RemoteStatus};
pub use pipeline::{Flow, Node, Pipeline, RunContext, RunStats};
pub use templates::{Template, collection_pipeline, dataset_pipeline};
