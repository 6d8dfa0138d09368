//! Discovery pipeline: walks a collection listing and initialises one store
//! per dataset it finds.

use crate::config::CollectionConfig;
use crate::datacite::attach_metadata;
use crate::dataset::{DatasetOptions, Existing, initiate_dataset};
use crate::fetch::Fetcher;
use crate::nodes::{a_href_match, assign, crawl_url};
use crate::pipeline::{Node, Pipeline};
use crate::{Error, Result};
use quarry_store::{Backend, ContentStore, StoreOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Build the discovery pipeline for `config`, creating datasets under `root`.
///
/// Datasets that already exist are left untouched, so the pipeline can be
/// re-run to pick up newly published datasets.
pub fn collection_pipeline<S: ContentStore + 'static>(
    config: &CollectionConfig,
    root: &Path,
    fetcher: Arc<dyn Fetcher>,
) -> Result<Pipeline> {
    let backend: Backend = config
        .backend
        .parse()
        .map_err(|e: quarry_store::Error| Error::config(e.to_string()))?;
    if config.data_fields.is_empty() {
        return Err(Error::config("data_fields must name at least one field"));
    }
    let max_age = Duration::from_secs(config.max_age_secs);

    let listing: Vec<Box<dyn Node>> = vec![Box::new(a_href_match(&config.listing_pattern)?)];
    let mut pipeline = Pipeline::new("discover")
        .then(
            crawl_url(Some(&config.url), Arc::clone(&fetcher))
                .matchers(listing)
                .max_age(max_age),
        )
        .then(a_href_match(&config.dataset_pattern)?)
        .then(assign([("dataset_name", "%(dataset)s")], true));
    if let Some(url) = &config.metadata_url {
        pipeline = pipeline.then(
            attach_metadata(url, &config.metadata_prefix, Arc::clone(&fetcher)).max_age(max_age),
        );
    }

    let options = DatasetOptions {
        root: root.to_path_buf(),
        template: config.dataset_template.clone(),
        path_template: config.path_template.clone(),
        data_fields: config.data_fields.clone(),
        add_fields: config.args.clone(),
        existing: Existing::Skip,
        store: StoreOptions {
            backend,
            largefiles_exclude: config.largefiles_exclude.clone(),
        },
        ..DatasetOptions::default()
    };
    Ok(pipeline.then(initiate_dataset::<S>(options)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::pipeline::{Control, RunContext};
    use crate::test_support::StaticFetcher;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use quarry_store::LocalStore;
    use tempfile::TempDir;

    const LISTING: &str = "http://crcns.org/data-sets";
    const DATACITE: &str = "http://search.datacite.example/api?q=crcns";

    fn site() -> StaticFetcher {
        StaticFetcher::new()
            .with_page(
                LISTING,
                r#"<a href="/data-sets/vc">Visual cortex</a>
                   <a href="/data-sets/hc">Hippocampus</a>
                   <a href="/about">About</a>"#,
            )
            .with_page(
                "http://crcns.org/data-sets/vc",
                r#"<a href="/data-sets/vc/pvc-1">pvc-1</a>
                   <a href="/data-sets/vc/pvc-1#download">download</a>
                   <a href="/data-sets/vc/pvc-2_about">about pvc-2</a>
                   <a href="/data-sets/hc/hc-3">see also hc-3</a>"#,
            )
            .with_page(
                "http://crcns.org/data-sets/hc",
                r#"<a href="/data-sets/hc/hc-3">hc-3</a>"#,
            )
    }

    fn collection(root: &Path, fetcher: &StaticFetcher, config: &CollectionConfig) -> Vec<String> {
        let pipeline =
            collection_pipeline::<LocalStore>(config, root, Arc::new(fetcher.clone())).unwrap();
        let ctx = RunContext::new();
        let mut paths = Vec::new();
        pipeline
            .run_with(&ctx, quarry_core::Record::new(), |record| {
                paths.push(record.get_str("dataset_path").unwrap_or("-").to_string());
                Ok(Control::Continue)
            })
            .unwrap();
        paths
    }

    #[test]
    fn test_discovers_each_dataset_once() {
        let root = TempDir::new().unwrap();
        let fetcher = site();
        let config = CollectionConfig {
            path_template: "%(dataset_category)s/%(dataset_name)s".to_string(),
            ..CollectionConfig::default()
        };

        let paths = collection(root.path(), &fetcher, &config);
        assert_eq!(paths.len(), 2);

        let pvc1 = root.path().join("vc/pvc-1");
        let store = LocalStore::open(&pvc1).unwrap();
        assert_eq!(store.backend(), Backend::Md5E);
        let crawl = CrawlConfig::load(&pvc1).unwrap();
        assert_eq!(crawl.crawl.template, "dataset");
        assert_eq!(crawl.crawl.args["dataset_category"].as_str(), Some("vc"));
        assert!(LocalStore::is_store(&root.path().join("hc/hc-3")));
        assert!(!root.path().join("vc/pvc-2").exists());
        assert_eq!(fetcher.fetch_count(LISTING), 1);
    }

    #[test]
    fn test_rerun_skips_existing_datasets() {
        let root = TempDir::new().unwrap();
        let fetcher = site();
        let config = CollectionConfig::default();
        collection(root.path(), &fetcher, &config);

        let crawl = CrawlConfig::location(&root.path().join("pvc-1"));
        let before = std::fs::read_to_string(&crawl).unwrap();
        let paths = collection(root.path(), &fetcher, &config);
        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read_to_string(&crawl).unwrap(), before);
    }

    #[test]
    fn test_metadata_is_attached_and_unknown_datasets_skipped() {
        let xml = "<resource><title>Single units from V1</title>\
                   <title titleType=\"AlternativeTitle\">CRCNS.org pvc-1</title></resource>";
        let response = serde_json::json!({ "response": { "docs": [
            { "doi": "10.6080/K0PC308P", "xml": STANDARD.encode(xml) }
        ]}});
        let fetcher = site().with_page(DATACITE, response.to_string());
        let root = TempDir::new().unwrap();
        let config = CollectionConfig {
            metadata_url: Some(DATACITE.to_string()),
            ..CollectionConfig::default()
        };

        let paths = collection(root.path(), &fetcher, &config);
        assert_eq!(paths.len(), 1);
        let store = LocalStore::open(&root.path().join("pvc-1")).unwrap();
        assert_eq!(
            store.config("dataset.title").unwrap().as_deref(),
            Some("Single units from V1")
        );
        assert!(!root.path().join("hc-3").exists());
    }

    #[test]
    fn test_invalid_backend_is_config_error() {
        let config = CollectionConfig {
            backend: "WORM".to_string(),
            ..CollectionConfig::default()
        };
        let err = collection_pipeline::<LocalStore>(
            &config,
            Path::new("."),
            Arc::new(StaticFetcher::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
