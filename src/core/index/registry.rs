use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::core::common::error::EngineError;
use crate::core::common::types::{AttributeType, IndexId};
use crate::core::index::schema::{Index, IndexSchema};

/// The process-wide mapping from index name to live index.
///
/// Owned by the engine and passed by reference; guards creation, lookup,
/// and deletion under a single mutex.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    indexes: Mutex<HashMap<String, Arc<Index>>>,
    next_index_id: AtomicU64,
}

impl IndexRegistry {
    pub fn new() -> Self {
        IndexRegistry::default()
    }

    /// Creates a fresh, empty index under a unique name.
    pub fn create(
        &self,
        name: &str,
        attribute_types: &[AttributeType],
    ) -> Result<(), EngineError> {
        let mut indexes = self.indexes.lock().unwrap();
        if indexes.contains_key(name) {
            return Err(EngineError::IndexExists(name.to_string()));
        }
        let id = IndexId(self.next_index_id.fetch_add(1, Ordering::SeqCst));
        let index = Index::new(id, name.to_string(), IndexSchema::new(attribute_types));
        indexes.insert(name.to_string(), index);
        debug!(index = name, attributes = attribute_types.len(), "index created");
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes.lock().unwrap().get(name).cloned()
    }

    /// Removes an index from the registry. The index is first made
    /// read-only, which fails with `OpenTransactions` while unresolved
    /// transactions have written to it. The returned index is handed to the
    /// caller so its remaining handles can be closed outside the registry
    /// mutex.
    pub fn remove(&self, name: &str) -> Result<Arc<Index>, EngineError> {
        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes.get(name).cloned().ok_or(EngineError::UnknownIndex)?;
        index.make_read_only()?;
        indexes.remove(name);
        debug!(index = name, "index deleted");
        Ok(index)
    }
}
