//! Process-lifetime cache of taxonomy trees and label tables.

use crate::error::{NormalizationError, Result};
use crate::labels::{LabelEntry, LabelTable};
use crate::schema::Taxonomy;
use crate::tree::{NodeDefinition, TaxonomyTrees};
use log::info;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Where taxonomy data comes from. Implementations are only asked once per taxonomy.
pub trait TaxonomySource: Send + Sync {
    fn load_tree(&self, taxonomy: Taxonomy) -> Result<TaxonomyTrees>;

    fn load_labels(&self, taxonomy: Taxonomy, min_occurrences: u32) -> Result<LabelTable>;
}

/// Reads `<dir>/<taxonomy>_trees.json` and `<dir>/<taxonomy>_labels.json`.
#[derive(Debug, Clone)]
pub struct JsonTaxonomySource {
    dir: PathBuf,
}

impl JsonTaxonomySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, taxonomy: Taxonomy, kind: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.json", taxonomy.as_str(), kind))
    }

    fn read(&self, taxonomy: Taxonomy, kind: &str) -> Result<String> {
        let path = self.path(taxonomy, kind);
        if !path.exists() {
            return Err(NormalizationError::TaxonomyNotLoaded(format!(
                "{} ({} not found)",
                taxonomy,
                path.display()
            )));
        }
        Ok(fs::read_to_string(path)?)
    }
}

impl TaxonomySource for JsonTaxonomySource {
    fn load_tree(&self, taxonomy: Taxonomy) -> Result<TaxonomyTrees> {
        TaxonomyTrees::from_json_str(&self.read(taxonomy, "trees")?)
    }

    fn load_labels(&self, taxonomy: Taxonomy, min_occurrences: u32) -> Result<LabelTable> {
        LabelTable::from_json_str(&self.read(taxonomy, "labels")?, min_occurrences)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTaxonomySource {
    trees: HashMap<Taxonomy, BTreeMap<String, Vec<NodeDefinition>>>,
    labels: HashMap<Taxonomy, Vec<LabelEntry>>,
}

impl InMemoryTaxonomySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_taxonomy(
        mut self,
        taxonomy: Taxonomy,
        trees: BTreeMap<String, Vec<NodeDefinition>>,
        labels: Vec<LabelEntry>,
    ) -> Self {
        self.trees.insert(taxonomy, trees);
        self.labels.insert(taxonomy, labels);
        self
    }
}

impl TaxonomySource for InMemoryTaxonomySource {
    fn load_tree(&self, taxonomy: Taxonomy) -> Result<TaxonomyTrees> {
        let definitions = self
            .trees
            .get(&taxonomy)
            .ok_or_else(|| NormalizationError::TaxonomyNotLoaded(taxonomy.to_string()))?;
        TaxonomyTrees::from_definitions(definitions.clone())
    }

    fn load_labels(&self, taxonomy: Taxonomy, min_occurrences: u32) -> Result<LabelTable> {
        let entries = self
            .labels
            .get(&taxonomy)
            .ok_or_else(|| NormalizationError::TaxonomyNotLoaded(taxonomy.to_string()))?;
        Ok(LabelTable::from_entries(entries.clone(), min_occurrences))
    }
}

/// Everything the engine needs for one taxonomy. Immutable once loaded.
#[derive(Debug)]
pub struct TaxonomyData {
    pub taxonomy: Taxonomy,
    pub trees: TaxonomyTrees,
    pub labels: LabelTable,
}

pub struct TaxonomyRegistry<S: TaxonomySource> {
    source: S,
    min_label_occurrences: u32,
    loaded: RwLock<HashMap<Taxonomy, Arc<TaxonomyData>>>,
}

impl<S: TaxonomySource> TaxonomyRegistry<S> {
    pub fn new(source: S, min_label_occurrences: u32) -> Self {
        Self {
            source,
            min_label_occurrences,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached data for `taxonomy`, loading it on first use.
    pub fn get(&self, taxonomy: Taxonomy) -> Result<Arc<TaxonomyData>> {
        {
            let loaded = self
                .loaded
                .read()
                .map_err(|e| NormalizationError::LockPoisoned(e.to_string()))?;
            if let Some(data) = loaded.get(&taxonomy) {
                return Ok(Arc::clone(data));
            }
        }

        // Loaded outside the lock; if two threads race, the first insert wins.
        let data = Arc::new(self.load(taxonomy)?);

        let mut loaded = self
            .loaded
            .write()
            .map_err(|e| NormalizationError::LockPoisoned(e.to_string()))?;
        Ok(Arc::clone(loaded.entry(taxonomy).or_insert(data)))
    }

    pub fn is_loaded(&self, taxonomy: Taxonomy) -> Result<bool> {
        let loaded = self
            .loaded
            .read()
            .map_err(|e| NormalizationError::LockPoisoned(e.to_string()))?;
        Ok(loaded.contains_key(&taxonomy))
    }

    fn load(&self, taxonomy: Taxonomy) -> Result<TaxonomyData> {
        let trees = self.source.load_tree(taxonomy)?;
        if trees.is_empty() {
            return Err(NormalizationError::TaxonomyNotLoaded(taxonomy.to_string()));
        }
        let labels = self.source.load_labels(taxonomy, self.min_label_occurrences)?;

        info!(
            "Loaded taxonomy {}: {} tree nodes, {} label rows",
            taxonomy,
            trees.node_count(),
            labels.len()
        );

        Ok(TaxonomyData {
            taxonomy,
            trees,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Polarity, StatementType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        inner: InMemoryTaxonomySource,
        loads: AtomicUsize,
    }

    impl TaxonomySource for CountingSource {
        fn load_tree(&self, taxonomy: Taxonomy) -> Result<TaxonomyTrees> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_tree(taxonomy)
        }

        fn load_labels(&self, taxonomy: Taxonomy, min_occurrences: u32) -> Result<LabelTable> {
            self.inner.load_labels(taxonomy, min_occurrences)
        }
    }

    fn source() -> InMemoryTaxonomySource {
        let mut trees = BTreeMap::new();
        trees.insert(
            "income".to_string(),
            vec![NodeDefinition::new("Revenues", Polarity::Credit)],
        );
        let labels = vec![LabelEntry {
            source_code: "Revenues".to_string(),
            line_item: "Total Revenue".to_string(),
            statement: StatementType::Income,
            confidence: 1.0,
            occurrences: Some(5),
        }];
        InMemoryTaxonomySource::new().with_taxonomy(Taxonomy::UsGaap, trees, labels)
    }

    #[test]
    fn test_loads_once_and_shares() {
        let registry = TaxonomyRegistry::new(
            CountingSource {
                inner: source(),
                loads: AtomicUsize::new(0),
            },
            2,
        );

        assert!(!registry.is_loaded(Taxonomy::UsGaap).unwrap());
        let first = registry.get(Taxonomy::UsGaap).unwrap();
        let second = registry.get(Taxonomy::UsGaap).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.is_loaded(Taxonomy::UsGaap).unwrap());
        assert_eq!(registry.source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(first.labels.len(), 1);
    }

    #[test]
    fn test_unknown_taxonomy_is_configuration_error() {
        let registry = TaxonomyRegistry::new(source(), 2);
        let err = registry.get(Taxonomy::IfrsFull).unwrap_err();
        assert!(matches!(err, NormalizationError::TaxonomyNotLoaded(_)));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let registry = TaxonomyRegistry::new(source(), 2);
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = registry.loaded.write().unwrap();
                    panic!("writer died holding the lock");
                })
                .join();
        });

        assert!(matches!(
            registry.is_loaded(Taxonomy::UsGaap),
            Err(NormalizationError::LockPoisoned(_))
        ));
        assert!(matches!(
            registry.get(Taxonomy::UsGaap),
            Err(NormalizationError::LockPoisoned(_))
        ));
    }

    #[test]
    fn test_json_source_missing_directory() {
        let registry = TaxonomyRegistry::new(JsonTaxonomySource::new("/nonexistent/taxonomies"), 2);
        assert!(matches!(
            registry.get(Taxonomy::UsGaap),
            Err(NormalizationError::TaxonomyNotLoaded(_))
        ));
    }
}
