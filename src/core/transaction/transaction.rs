use std::sync::{Arc, Mutex, Weak};

use crate::core::common::types::TransactionId;
use crate::core::index::iterator::IterState;
use crate::core::index::schema::Index;
use crate::core::storage::EntryKey;

/// Represents the state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is currently active and ongoing.
    Active,
    /// Transaction has been successfully committed.
    Committed,
    /// Transaction has been aborted and changes rolled back.
    Aborted,
}

/// One entry of the undo log: the inverse of a single mutation, replayed in
/// reverse order on abort.
#[derive(Debug)]
pub enum UndoOperation {
    /// Undo an insert by removing the inserted entry.
    RevertInsert { index: Arc<Index>, entry: EntryKey },
    /// Undo an update by restoring the previous payload.
    RevertUpdate { index: Arc<Index>, entry: EntryKey, old_payload: Vec<u8> },
    /// Undo a delete by clearing the tombstone mark; the entry itself is
    /// only removed physically at commit.
    RevertDelete { index: Arc<Index>, entry: EntryKey },
}

#[derive(Debug)]
pub(crate) struct TxInner {
    pub(crate) state: TransactionState,
    pub(crate) undo_log: Vec<UndoOperation>,
    /// Indexes this transaction has registered as a writer on; unregistered
    /// when the transaction ends.
    pub(crate) used_indexes: Vec<Arc<Index>>,
    /// Iterators opened under this transaction; closed when it ends.
    pub(crate) iterators: Vec<Weak<IterState>>,
}

/// Shared state of one transaction.
#[derive(Debug)]
pub struct TxState {
    id: TransactionId,
    pub(crate) inner: Mutex<TxInner>,
}

impl TxState {
    pub(crate) fn new(id: TransactionId) -> Arc<Self> {
        Arc::new(TxState {
            id,
            inner: Mutex::new(TxInner {
                state: TransactionState::Active,
                undo_log: Vec::new(),
                used_indexes: Vec::new(),
                iterators: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().unwrap().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    pub(crate) fn push_undo(&self, operation: UndoOperation) {
        self.inner.lock().unwrap().undo_log.push(operation);
    }

    /// Remembers the index as written by this transaction. The index's own
    /// writer set is maintained separately via `Index::begin_write`.
    pub(crate) fn register_index(&self, index: &Arc<Index>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.used_indexes.iter().any(|i| i.id() == index.id()) {
            inner.used_indexes.push(Arc::clone(index));
        }
    }

    pub(crate) fn register_iterator(&self, iterator: &Arc<IterState>) {
        self.inner.lock().unwrap().iterators.push(Arc::downgrade(iterator));
    }
}

/// A handle to an active transaction.
///
/// Obtained from `Engine::begin_transaction` and consumed conceptually by
/// commit or abort; operations on a finished transaction report
/// `TransactionClosed`. A transaction must not be driven from more than one
/// thread at a time.
#[derive(Debug)]
pub struct Transaction {
    pub(crate) state: Arc<TxState>,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.state.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_active() {
        let tx = TxState::new(TransactionId(7));
        assert_eq!(tx.id(), TransactionId(7));
        assert!(tx.is_active());
        assert_eq!(tx.state(), TransactionState::Active);
    }
}
