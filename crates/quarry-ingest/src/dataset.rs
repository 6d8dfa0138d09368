//! Creating dataset stores from discovery records.

use crate::config::CrawlConfig;
use crate::pipeline::{Flow, Node, RunContext, Scope};
use crate::{Error, Result};
use metrics::counter;
use quarry_core::{Record, Value, interpolate};
use quarry_store::{ContentStore, StoreOptions};
use std::marker::PhantomData;
use std::path::PathBuf;

/// What to do when the dataset directory already holds a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Existing {
    /// Leave it alone and pass the record on.
    #[default]
    Skip,
    /// Abort the run.
    Fail,
}

/// Options for [`initiate_dataset`].
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    /// Directory new datasets are created under.
    pub root: PathBuf,
    /// Pipeline template recorded in the dataset's crawl configuration.
    pub template: String,
    /// Dataset directory relative to `root`, with `%(field)s` placeholders.
    pub path_template: String,
    /// Fields that identify a dataset. They are stored as `dataset.<field>`
    /// config and passed to the template as arguments.
    pub data_fields: Vec<String>,
    /// Optional record fields (e.g. `doi`, `title`) stored as
    /// `dataset.<field>` config when present.
    pub metadata_fields: Vec<String>,
    /// Additional template arguments.
    pub add_fields: toml::Table,
    pub existing: Existing,
    pub store: StoreOptions,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            template: "dataset".to_string(),
            path_template: "%(dataset_name)s".to_string(),
            data_fields: Vec::new(),
            metadata_fields: vec!["doi".to_string(), "title".to_string()],
            add_fields: toml::Table::new(),
            existing: Existing::Skip,
            store: StoreOptions::default(),
        }
    }
}

/// Node that makes sure a store exists for every discovered dataset.
///
/// Emits each record with `dataset_path` set. Records that lack a data
/// field, or repeat an identity already seen in this run, are logged and
/// dropped.
pub struct InitiateDataset<S> {
    options: DatasetOptions,
    scope: Scope,
    _store: PhantomData<fn() -> S>,
}

pub fn initiate_dataset<S: ContentStore>(options: DatasetOptions) -> InitiateDataset<S> {
    InitiateDataset {
        options,
        scope: Scope::new(),
        _store: PhantomData,
    }
}

impl<S: ContentStore> InitiateDataset<S> {
    fn identity<'r>(&self, record: &'r Record) -> Option<Vec<(&str, &'r Value)>> {
        self.options
            .data_fields
            .iter()
            .map(|field| record.get(field).map(|value| (field.as_str(), value)))
            .collect()
    }

    fn create(&self, path: &std::path::Path, identity: &[(&str, &Value)], record: &Record) -> Result<()> {
        let mut store = S::create(path, self.options.store.clone())?;
        for field in &self.options.metadata_fields {
            if let Some(value) = record.get_str(field) {
                store.set_config(&format!("dataset.{}", field), value)?;
            }
        }
        let mut args = self.options.add_fields.clone();
        for (field, value) in identity {
            store.set_config(&format!("dataset.{}", field), &value.to_string())?;
            args.insert(field.to_string(), toml::Value::String(value.to_string()));
        }
        CrawlConfig::new(self.options.template.clone(), args).save(path)?;
        Ok(())
    }
}

impl<S: ContentStore> Node for InitiateDataset<S> {
    fn name(&self) -> &str {
        "initiate_dataset"
    }

    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let Some(identity) = self.identity(&record) else {
            tracing::warn!(
                url = record.get_str("url").unwrap_or("-"),
                fields = ?self.options.data_fields,
                "Skipping record without dataset identity"
            );
            return Ok(Flow::none());
        };
        let key = identity
            .iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join("/");
        if !ctx.first_seen(self.scope, &key) {
            tracing::warn!(dataset = %key, "Dataset already seen in this run, dropping duplicate");
            return Ok(Flow::none());
        }

        let path = self
            .options
            .root
            .join(interpolate(&self.options.path_template, &record)?);
        if S::is_store(&path) {
            match self.options.existing {
                Existing::Skip => {
                    tracing::info!(dataset = %key, path = %path.display(), "Dataset exists, skipping");
                }
                Existing::Fail => return Err(Error::DatasetExists(path.display().to_string())),
            }
        } else {
            self.create(&path, &identity, &record)?;
            counter!("datasets_initiated_total").increment(1);
            tracing::info!(dataset = %key, path = %path.display(), "Initiated dataset");
        }

        let path = path.display().to_string();
        Ok(Flow::one(record.with("dataset_path", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_store::LocalStore;
    use tempfile::TempDir;

    fn options(root: &TempDir) -> DatasetOptions {
        let mut add_fields = toml::Table::new();
        add_fields.insert("tarballs".into(), "false".into());
        DatasetOptions {
            root: root.path().to_path_buf(),
            path_template: "%(dataset_category)s/%(dataset)s".to_string(),
            data_fields: vec!["dataset_category".to_string(), "dataset".to_string()],
            add_fields,
            ..DatasetOptions::default()
        }
    }

    fn pvc1() -> Record {
        Record::new()
            .with("url", "http://crcns.org/data-sets/vc/pvc-1")
            .with("doi", "10.6080/K0PC308P")
            .with("dataset_category", "vc")
            .with("dataset", "pvc-1")
    }

    fn run(options: DatasetOptions, records: Vec<Record>) -> Result<Vec<Record>> {
        let node = initiate_dataset::<LocalStore>(options);
        let ctx = RunContext::new();
        let mut out = Vec::new();
        for record in records {
            let Flow::Records(stream) = node.process(&ctx, record)? else {
                unreachable!("initiate_dataset never stops");
            };
            for r in stream {
                out.push(r?);
            }
        }
        Ok(out)
    }

    #[test]
    fn test_creates_store_with_identity_and_crawl_config() {
        let root = TempDir::new().unwrap();
        let out = run(options(&root), vec![pvc1()]).unwrap();

        let path = root.path().join("vc/pvc-1");
        assert_eq!(out[0].get_str("dataset_path"), Some(path.display().to_string().as_str()));

        let store = LocalStore::open(&path).unwrap();
        assert_eq!(store.config("dataset.dataset").unwrap().as_deref(), Some("pvc-1"));
        assert_eq!(
            store.config("dataset.dataset_category").unwrap().as_deref(),
            Some("vc")
        );
        assert_eq!(
            store.config("dataset.doi").unwrap().as_deref(),
            Some("10.6080/K0PC308P")
        );
        assert_eq!(store.config("dataset.title").unwrap(), None);

        let crawl = CrawlConfig::load(&path).unwrap();
        assert_eq!(crawl.crawl.template, "dataset");
        assert_eq!(crawl.crawl.args["dataset"].as_str(), Some("pvc-1"));
        assert_eq!(crawl.crawl.args["tarballs"].as_str(), Some("false"));
    }

    #[test]
    fn test_second_invocation_skips_existing() {
        let root = TempDir::new().unwrap();
        run(options(&root), vec![pvc1()]).unwrap();
        let crawl = root.path().join("vc/pvc-1/.quarry/crawl.toml");
        std::fs::write(&crawl, "[crawl]\ntemplate = \"edited\"\n").unwrap();

        let out = run(options(&root), vec![pvc1()]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            std::fs::read_to_string(&crawl).unwrap(),
            "[crawl]\ntemplate = \"edited\"\n"
        );
    }

    #[test]
    fn test_existing_fail() {
        let root = TempDir::new().unwrap();
        run(options(&root), vec![pvc1()]).unwrap();
        let opts = DatasetOptions {
            existing: Existing::Fail,
            ..options(&root)
        };
        assert!(matches!(
            run(opts, vec![pvc1()]),
            Err(Error::DatasetExists(_))
        ));
    }

    #[test]
    fn test_duplicates_and_incomplete_records_are_dropped() {
        let root = TempDir::new().unwrap();
        let incomplete = Record::new().with("dataset", "hc-3");
        let out = run(options(&root), vec![pvc1(), pvc1(), incomplete]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(!root.path().join("hc-3").exists());
    }
}
