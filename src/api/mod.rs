//! The operation layer: the externally visible verbs of the engine.
//!
//! [`Engine`] glues the registry, the transaction manager, and the lock
//! manager together, validates arguments, wraps transaction-less mutations
//! in autocommit transactions, and maps internal failures to the public
//! error taxonomy. All methods are safe to call from multiple threads;
//! individual transactions, handles, and iterators belong to their opener.

use std::sync::Arc;

use crate::core::codec;
use crate::core::common::error::EngineError;
use crate::core::common::types::{
    AttributeType, KeyPattern, ModFlags, Record, MAX_KEY_ATTRIBUTES, MAX_PAYLOAD_LENGTH,
};
use crate::core::config::EngineConfig;
use crate::core::index::handle::HandleState;
use crate::core::index::iterator::IterState;
use crate::core::index::{IndexHandle, IndexRegistry, RecordIterator};
use crate::core::storage::EntryKey;
use crate::core::transaction::lock_manager::{LockKey, LockManager, LockMode};
use crate::core::transaction::transaction::{TxState, UndoOperation};
use crate::core::transaction::{Transaction, TransactionManager};

/// The transactional multidimensional index engine.
///
/// All state is owned by the engine instance; there are no process-global
/// registries. Wrap the engine in an [`Arc`] to share it across threads.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    lock_manager: Arc<LockManager>,
    transactions: TransactionManager,
    registry: IndexRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    /// An engine with default configuration.
    pub fn new() -> Self {
        Engine::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let lock_manager = Arc::new(LockManager::new());
        let transactions =
            TransactionManager::new(Arc::clone(&lock_manager), config.max_active_transactions);
        Engine { config, lock_manager, transactions, registry: IndexRegistry::new() }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a new transaction.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the maximum number of concurrent transactions has
    /// been reached.
    pub fn begin_transaction(&self) -> Result<Transaction, EngineError> {
        self.transactions.begin()
    }

    /// Commits the transaction; its writes become visible atomically and
    /// its iterators are closed.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` when the transaction has already ended.
    pub fn commit_transaction(&self, tx: &Transaction) -> Result<(), EngineError> {
        self.transactions.commit(tx)
    }

    /// Aborts the transaction and rolls back all changes made during its
    /// course.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` when the transaction has already ended.
    pub fn abort_transaction(&self, tx: &Transaction) -> Result<(), EngineError> {
        self.transactions.abort(tx)
    }

    /// Creates an empty index under a unique name, keyed by the given
    /// attribute types.
    ///
    /// # Errors
    ///
    /// `IndexExists` when the name is taken; `GenericFailure` on an empty
    /// name or an attribute count outside 1..=255.
    pub fn create_index(
        &self,
        name: &str,
        attribute_types: &[AttributeType],
    ) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::GenericFailure("index name must not be empty".to_string()));
        }
        if attribute_types.is_empty() || attribute_types.len() > MAX_KEY_ATTRIBUTES {
            return Err(EngineError::GenericFailure(format!(
                "attribute count must be between 1 and {MAX_KEY_ATTRIBUTES}"
            )));
        }
        self.registry.create(name, attribute_types)
    }

    /// Opens a handle onto the named index.
    ///
    /// # Errors
    ///
    /// `UnknownIndex` when no index of that name exists.
    pub fn open_index(&self, name: &str) -> Result<IndexHandle, EngineError> {
        let index = self.registry.find(name).ok_or(EngineError::UnknownIndex)?;
        let state = HandleState::open(index)?;
        Ok(IndexHandle { state })
    }

    /// Closes an index handle, closing all iterators opened through it
    /// first.
    ///
    /// # Errors
    ///
    /// `UnknownIndex` when the handle has already been closed.
    pub fn close_index(&self, handle: &IndexHandle) -> Result<(), EngineError> {
        handle.state.close(&self.lock_manager, &self.transactions)
    }

    /// Deletes the named index, closing its remaining handles.
    ///
    /// # Errors
    ///
    /// `UnknownIndex` when no index of that name exists; `OpenTransactions`
    /// when unresolved transactions have written to it.
    pub fn delete_index(&self, name: &str) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::GenericFailure("index name must not be empty".to_string()));
        }
        let index = self.registry.remove(name)?;
        for handle in index.take_handles() {
            let _ = handle.close(&self.lock_manager, &self.transactions);
        }
        Ok(())
    }

    /// Inserts a record. Without a transaction the insert autocommits.
    ///
    /// # Errors
    ///
    /// `UnknownIndex`, `IncompatibleKey`, `Deadlock` (the transaction is
    /// rolled back before returning), `OutOfMemory`.
    pub fn insert_record(
        &self,
        tx: Option<&Transaction>,
        handle: &IndexHandle,
        record: &Record,
    ) -> Result<(), EngineError> {
        let state = &handle.state;
        if !state.is_open() {
            return Err(EngineError::UnknownIndex);
        }
        let index = Arc::clone(state.index());
        if !index.schema().compatible_key(&record.key) {
            return Err(EngineError::IncompatibleKey);
        }
        check_payload_length(&record.payload)?;

        self.with_write_transaction(tx, |tx_state| {
            index.begin_write(tx_state.id())?;
            tx_state.register_index(&index);
            let key_bytes = codec::encode_key(&record.key, index.schema().attribute_types());
            let lock = LockKey { index: index.id(), key: key_bytes.clone() };
            self.lock_manager.acquire(tx_state.id(), &lock, LockMode::Exclusive)?;
            let payload = copy_payload(&record.payload)?;
            let entry = index.data().write().unwrap().insert(key_bytes, payload);
            tx_state
                .push_undo(UndoOperation::RevertInsert { index: Arc::clone(&index), entry });
            Ok(())
        })
    }

    /// Searches for a record matching key and payload (or key alone with
    /// [`ModFlags::IGNORE_PAYLOAD`]) and replaces its payload. With
    /// [`ModFlags::MATCH_DUPLICATES`] the whole same-key duplicate group is
    /// swept and every entry matching the original predicate is updated;
    /// non-matching duplicates are skipped.
    ///
    /// # Errors
    ///
    /// `UnknownIndex`, `IncompatibleKey`, `NotFound` when nothing matched,
    /// `Deadlock`, `OutOfMemory`.
    pub fn update_record(
        &self,
        tx: Option<&Transaction>,
        handle: &IndexHandle,
        record: &Record,
        new_payload: &[u8],
        flags: ModFlags,
    ) -> Result<(), EngineError> {
        let state = &handle.state;
        if !state.is_open() {
            return Err(EngineError::UnknownIndex);
        }
        let index = Arc::clone(state.index());
        if !index.schema().compatible_key(&record.key) {
            return Err(EngineError::IncompatibleKey);
        }
        check_payload_length(new_payload)?;

        self.with_write_transaction(tx, |tx_state| {
            index.begin_write(tx_state.id())?;
            tx_state.register_index(&index);
            let key_bytes = codec::encode_key(&record.key, index.schema().attribute_types());
            let lock = LockKey { index: index.id(), key: key_bytes.clone() };
            self.lock_manager.acquire(tx_state.id(), &lock, LockMode::Exclusive)?;

            let mut data = index.data().write().unwrap();
            let group: Vec<EntryKey> = data
                .duplicate_group(&key_bytes)
                .filter(|(_, slot)| !slot.tombstone)
                .map(|(entry, _)| entry.clone())
                .collect();
            let mut matched = false;
            for entry in group {
                let payload_matches = flags.ignore_payload
                    || data.get(&entry).is_some_and(|slot| slot.payload == record.payload);
                if !payload_matches {
                    continue;
                }
                let payload = copy_payload(new_payload)?;
                if let Some(old_payload) = data.set_payload(&entry, payload) {
                    tx_state.push_undo(UndoOperation::RevertUpdate {
                        index: Arc::clone(&index),
                        entry,
                        old_payload,
                    });
                    matched = true;
                }
                if !flags.match_duplicates {
                    break;
                }
            }
            if matched {
                Ok(())
            } else {
                Err(EngineError::NotFound)
            }
        })
    }

    /// Searches for a record matching key and payload (or key alone with
    /// [`ModFlags::IGNORE_PAYLOAD`]) and removes it. Flag semantics as for
    /// [`Engine::update_record`].
    ///
    /// # Errors
    ///
    /// `UnknownIndex`, `IncompatibleKey`, `NotFound` when nothing matched,
    /// `Deadlock`.
    pub fn delete_record(
        &self,
        tx: Option<&Transaction>,
        handle: &IndexHandle,
        record: &Record,
        flags: ModFlags,
    ) -> Result<(), EngineError> {
        let state = &handle.state;
        if !state.is_open() {
            return Err(EngineError::UnknownIndex);
        }
        let index = Arc::clone(state.index());
        if !index.schema().compatible_key(&record.key) {
            return Err(EngineError::IncompatibleKey);
        }

        self.with_write_transaction(tx, |tx_state| {
            index.begin_write(tx_state.id())?;
            tx_state.register_index(&index);
            let key_bytes = codec::encode_key(&record.key, index.schema().attribute_types());
            let lock = LockKey { index: index.id(), key: key_bytes.clone() };
            self.lock_manager.acquire(tx_state.id(), &lock, LockMode::Exclusive)?;

            let mut data = index.data().write().unwrap();
            let group: Vec<EntryKey> = data
                .duplicate_group(&key_bytes)
                .filter(|(_, slot)| !slot.tombstone)
                .map(|(entry, _)| entry.clone())
                .collect();
            let mut matched = false;
            for entry in group {
                let payload_matches = flags.ignore_payload
                    || data.get(&entry).is_some_and(|slot| slot.payload == record.payload);
                if !payload_matches {
                    continue;
                }
                data.set_tombstone(&entry, true);
                tx_state.push_undo(UndoOperation::RevertDelete {
                    index: Arc::clone(&index),
                    entry,
                });
                matched = true;
                if !flags.match_duplicates {
                    break;
                }
            }
            if matched {
                Ok(())
            } else {
                Err(EngineError::NotFound)
            }
        })
    }

    /// Opens an iterator over all records inside the rectangular range
    /// spanned by `min_key` and `max_key` (both inclusive; wildcard slots
    /// are unbounded on their side). Without a transaction the iterator is
    /// wrapped in its own transaction, resolved by `close_iterator`.
    ///
    /// # Errors
    ///
    /// `UnknownIndex`, `IncompatibleKey`.
    pub fn get_records(
        &self,
        tx: Option<&Transaction>,
        handle: &IndexHandle,
        min_key: &KeyPattern,
        max_key: &KeyPattern,
    ) -> Result<RecordIterator, EngineError> {
        let state = &handle.state;
        if !state.is_open() {
            return Err(EngineError::UnknownIndex);
        }
        let index = state.index();
        let schema = index.schema();
        if !schema.compatible_pattern(min_key) || !schema.compatible_pattern(max_key) {
            return Err(EngineError::IncompatibleKey);
        }
        let lower = codec::encode_lower_bound(min_key, schema.attribute_types());
        let upper = codec::encode_upper_bound(max_key, schema.attribute_types());

        let (tx_state, owns_tx): (Arc<TxState>, bool) = match tx {
            Some(tx) => {
                if !tx.state.is_active() {
                    return Err(EngineError::TransactionClosed);
                }
                (Arc::clone(&tx.state), false)
            }
            None => (Arc::clone(&self.transactions.begin()?.state), true),
        };

        let iterator =
            IterState::new(Arc::clone(&tx_state), owns_tx, Arc::clone(state), lower, upper);
        if let Err(e) = state.register_iterator(&iterator) {
            if owns_tx {
                self.transactions.rollback(&tx_state);
            }
            return Err(e);
        }
        tx_state.register_iterator(&iterator);
        Ok(RecordIterator { state: iterator })
    }

    /// Moves the iterator to the next record of its range and returns an
    /// owned copy.
    ///
    /// # Errors
    ///
    /// `NotFound` when the range is exhausted; `IteratorClosed` once the
    /// iterator (or its handle or transaction) has been closed; `Deadlock`
    /// (the owning transaction is rolled back before returning).
    pub fn get_next(&self, iterator: &RecordIterator) -> Result<Record, EngineError> {
        let result = iterator.state.next(&self.lock_manager);
        if matches!(result, Err(EngineError::Deadlock)) {
            self.transactions.rollback(iterator.state.tx_state());
        }
        result
    }

    /// Closes the iterator, releasing its read locks. An iterator opened
    /// without a transaction resolves its own transaction here.
    ///
    /// # Errors
    ///
    /// `IteratorClosed` when the iterator has already been closed.
    pub fn close_iterator(&self, iterator: &RecordIterator) -> Result<(), EngineError> {
        let owned_tx = iterator.state.close(&self.lock_manager)?;
        if let Some(tx_state) = owned_tx {
            let _ = self.transactions.finish(&tx_state, true);
        }
        Ok(())
    }

    /// Runs a mutating operation under the given transaction, or under a
    /// fresh autocommit transaction when none is given. A deadlock rolls the
    /// transaction back before the error is surfaced; an autocommit
    /// transaction is committed on success and rolled back on any failure.
    fn with_write_transaction<F>(
        &self,
        tx: Option<&Transaction>,
        operation: F,
    ) -> Result<(), EngineError>
    where
        F: FnOnce(&Arc<TxState>) -> Result<(), EngineError>,
    {
        match tx {
            Some(tx) => {
                if !tx.state.is_active() {
                    return Err(EngineError::TransactionClosed);
                }
                let result = operation(&tx.state);
                if matches!(result, Err(EngineError::Deadlock)) {
                    self.transactions.rollback(&tx.state);
                }
                result
            }
            None => {
                let autocommit = self.transactions.begin()?;
                match operation(&autocommit.state) {
                    Ok(()) => self.transactions.commit(&autocommit),
                    Err(e) => {
                        self.transactions.rollback(&autocommit.state);
                        Err(e)
                    }
                }
            }
        }
    }
}

fn check_payload_length(payload: &[u8]) -> Result<(), EngineError> {
    if payload.len() > MAX_PAYLOAD_LENGTH {
        return Err(EngineError::GenericFailure(format!(
            "payload exceeds {MAX_PAYLOAD_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Copies a caller-provided payload into an engine-owned allocation,
/// reporting allocation failure instead of aborting.
fn copy_payload(payload: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut copy = Vec::new();
    copy.try_reserve_exact(payload.len()).map_err(|_| EngineError::OutOfMemory)?;
    copy.extend_from_slice(payload);
    Ok(copy)
}
