//! Ready-made pipelines.
//!
//! - [`dataset`] - the staged ingestion pipeline run inside one dataset
//! - [`collection`] - the discovery pipeline that initialises datasets from
//!   a listing page
//!
//! A dataset records which template crawls it in `.quarry/crawl.toml`;
//! [`Template::from_config`] validates that file completely before any
//! network or store access happens.

pub mod collection;
pub mod dataset;

pub use collection::collection_pipeline;
pub use dataset::{DataOrigin, DatasetPipelineConfig, dataset_pipeline};

use crate::annex::{AnnexConfig, Annexificator};
use crate::config::CrawlConfig;
use crate::fetch::Fetcher;
use crate::pipeline::Pipeline;
use crate::{Error, Result};
use quarry_store::ContentStore;
use std::sync::Arc;

/// A validated pipeline template with its arguments.
#[derive(Debug, Clone)]
pub enum Template {
    Dataset(DatasetPipelineConfig),
}

impl Template {
    pub fn from_config(config: &CrawlConfig) -> Result<Self> {
        match config.crawl.template.as_str() {
            dataset::TEMPLATE_NAME => Ok(Self::Dataset(DatasetPipelineConfig::from_args(
                &config.crawl.args,
            )?)),
            other => Err(Error::config(format!(
                "unknown pipeline template '{}' (known: {})",
                other,
                dataset::TEMPLATE_NAME
            ))),
        }
    }

    /// Assemble the pipeline over `store`.
    pub fn build<S: ContentStore + 'static>(
        &self,
        store: S,
        fetcher: Arc<dyn Fetcher>,
        annex_config: AnnexConfig,
    ) -> Result<Pipeline> {
        match self {
            Self::Dataset(config) => {
                let annex = Annexificator::new(store, Arc::clone(&fetcher), annex_config)?;
                dataset_pipeline(config, &annex, fetcher)
            }
        }
    }
}
