//! Registry of customized index modules.
//!
//! A customized index names a module in the schema. The module's factory
//! provides the build-side [`CustomizedIndexer`] and the merge-side reducer;
//! neither the partition writer nor the merger knows anything else about it.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{IndexlibError, Result};
use crate::index::DocId;
use crate::index::schema::IndexConfig;
use crate::merge::reducer::DynIndexReducer;
use crate::storage::Storage;

/// Build-side writer of a customized index for one segment.
pub trait CustomizedIndexer: Send {
    /// Index document `doc_id`. `fields` holds the raw values of the fields
    /// the index declares, in declaration order.
    fn add_document(&mut self, doc_id: DocId, fields: &[Option<&str>]) -> Result<()>;

    /// Write the index into `storage`, rooted at `index/<name>`.
    fn dump(&self, storage: &dyn Storage) -> Result<()>;
}

/// Factory of a customized index module.
pub trait CustomizedIndexFactory: Send + Sync {
    fn create_indexer(&self, config: &IndexConfig) -> Result<Box<dyn CustomizedIndexer>>;

    fn create_reducer(&self, config: &IndexConfig) -> Result<Box<dyn DynIndexReducer>>;
}

/// Maps module names to factories.
#[derive(Clone, Default)]
pub struct ReducerRegistry {
    factories: AHashMap<String, Arc<dyn CustomizedIndexFactory>>,
}

impl fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ReducerRegistry")
            .field("modules", &names)
            .finish()
    }
}

impl ReducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `module`, replacing any previous one.
    pub fn register(
        &mut self,
        module: impl Into<String>,
        factory: Arc<dyn CustomizedIndexFactory>,
    ) -> &mut Self {
        self.factories.insert(module.into(), factory);
        self
    }

    pub fn contains(&self, module: &str) -> bool {
        self.factories.contains_key(module)
    }

    fn factory(&self, config: &IndexConfig) -> Result<&Arc<dyn CustomizedIndexFactory>> {
        let IndexConfig::Customized { name, module, .. } = config else {
            return Err(IndexlibError::invalid_argument(format!(
                "index '{}' is not a customized index",
                config.name()
            )));
        };
        self.factories.get(module).ok_or_else(|| {
            IndexlibError::config(format!(
                "no module '{module}' registered for customized index '{name}'"
            ))
        })
    }

    pub fn create_indexer(&self, config: &IndexConfig) -> Result<Box<dyn CustomizedIndexer>> {
        self.factory(config)?.create_indexer(config)
    }

    pub fn create_reducer(&self, config: &IndexConfig) -> Result<Box<dyn DynIndexReducer>> {
        self.factory(config)?.create_reducer(config)
    }
}
