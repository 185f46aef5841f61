use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::debug;

use crate::core::codec;
use crate::core::common::error::EngineError;
use crate::core::common::types::{AttributeType, IndexId, Key, KeyPattern, TransactionId};
use crate::core::index::handle::HandleState;
use crate::core::storage::OrderedMultimap;

/// The immutable shape of an index: its attribute-type vector and the
/// derived width of an encoded key. Fixed at index creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    attribute_types: Vec<AttributeType>,
    key_size: usize,
}

impl IndexSchema {
    pub fn new(attribute_types: &[AttributeType]) -> Self {
        IndexSchema {
            attribute_types: attribute_types.to_vec(),
            key_size: codec::encoded_key_size(attribute_types),
        }
    }

    pub fn attribute_count(&self) -> usize {
        self.attribute_types.len()
    }

    pub fn attribute_types(&self) -> &[AttributeType] {
        &self.attribute_types
    }

    /// Width in bytes of a key encoded under this schema.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// A record key is compatible iff its attribute count equals the
    /// schema's and every attribute matches the schema's type at its
    /// position and fits its encoded slot.
    pub fn compatible_key(&self, key: &Key) -> bool {
        key.attribute_count() == self.attribute_count()
            && key
                .attributes()
                .iter()
                .zip(&self.attribute_types)
                .all(|(attribute, &ty)| attribute.attribute_type() == ty && attribute.is_valid())
    }

    /// As [`IndexSchema::compatible_key`], with wildcard slots compatible by
    /// position.
    pub fn compatible_pattern(&self, pattern: &KeyPattern) -> bool {
        pattern.attribute_count() == self.attribute_count()
            && pattern.attributes().iter().zip(&self.attribute_types).all(|(slot, &ty)| {
                slot.as_ref()
                    .map_or(true, |attribute| attribute.attribute_type() == ty && attribute.is_valid())
            })
    }
}

#[derive(Debug, Default)]
struct IndexState {
    /// Set when the index is being deleted; rejects new writers and handles.
    read_only: bool,
    /// Transactions that have written to this index and are not yet
    /// resolved.
    writers: HashSet<TransactionId>,
    /// Live handles onto this index.
    handles: Vec<(u64, Weak<HandleState>)>,
}

/// A live index: schema, record data, and bookkeeping of handles and
/// unresolved writer transactions.
#[derive(Debug)]
pub struct Index {
    id: IndexId,
    name: String,
    schema: IndexSchema,
    data: RwLock<OrderedMultimap>,
    state: Mutex<IndexState>,
}

impl Index {
    pub(crate) fn new(id: IndexId, name: String, schema: IndexSchema) -> Arc<Self> {
        Arc::new(Index {
            id,
            name,
            schema,
            data: RwLock::new(OrderedMultimap::new()),
            state: Mutex::new(IndexState::default()),
        })
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// The record store. This latch orders structural access only; record
    /// visibility is governed by the lock manager, and the latch must never
    /// be held across a lock acquisition.
    pub(crate) fn data(&self) -> &RwLock<OrderedMultimap> {
        &self.data
    }

    /// Registers a transaction as a writer on this index. Fails when the
    /// index has been made read-only by a pending deletion.
    pub(crate) fn begin_write(&self, transaction_id: TransactionId) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.read_only {
            return Err(EngineError::UnknownIndex);
        }
        state.writers.insert(transaction_id);
        Ok(())
    }

    pub(crate) fn end_write(&self, transaction_id: TransactionId) {
        self.state.lock().unwrap().writers.remove(&transaction_id);
    }

    pub(crate) fn register_handle(
        &self,
        handle_id: u64,
        handle: &Arc<HandleState>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.read_only {
            return Err(EngineError::UnknownIndex);
        }
        state.handles.push((handle_id, Arc::downgrade(handle)));
        Ok(())
    }

    pub(crate) fn unregister_handle(&self, handle_id: u64) {
        self.state.lock().unwrap().handles.retain(|(id, _)| *id != handle_id);
    }

    /// Marks the index read-only in preparation for deletion. Fails with
    /// `OpenTransactions` while unresolved transactions have written to it.
    pub(crate) fn make_read_only(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if !state.writers.is_empty() {
            return Err(EngineError::OpenTransactions);
        }
        state.read_only = true;
        debug!(index = %self.name, "index marked read-only");
        Ok(())
    }

    /// Drains the registered handles for a cascading close. The state mutex
    /// is not held while the caller closes them.
    pub(crate) fn take_handles(&self) -> Vec<Arc<HandleState>> {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.handles)
            .into_iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}
