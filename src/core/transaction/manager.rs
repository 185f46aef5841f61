use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::core::common::error::EngineError;
use crate::core::common::types::TransactionId;
use crate::core::transaction::lock_manager::LockManager;
use crate::core::transaction::transaction::{
    Transaction, TransactionState, TxState, UndoOperation,
};

/// Issues transaction identifiers and drives commit and abort.
///
/// Mutations are applied in place under exclusive locks, so commit has no
/// redo work: it removes tombstoned entries physically, discards the undo
/// log, and releases locks. Abort replays the undo log in reverse before
/// releasing locks. Both paths close the transaction's iterators first so
/// that no iterator ever spans a transaction boundary.
#[derive(Debug)]
pub struct TransactionManager {
    next_transaction_id: AtomicU64,
    active_count: AtomicUsize,
    max_active: usize,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, max_active: usize) -> Self {
        TransactionManager {
            next_transaction_id: AtomicU64::new(1),
            active_count: AtomicUsize::new(0),
            max_active,
            lock_manager,
        }
    }

    /// Starts a new transaction. Fails with `OutOfMemory` when the number of
    /// concurrently active transactions has reached the configured maximum.
    pub fn begin(&self) -> Result<Transaction, EngineError> {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst);
        if active >= self.max_active {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::OutOfMemory);
        }
        let id = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::SeqCst));
        debug!(tx = id.0, "transaction started");
        Ok(Transaction { state: TxState::new(id) })
    }

    /// Commits the transaction, making its writes visible atomically.
    pub fn commit(&self, transaction: &Transaction) -> Result<(), EngineError> {
        self.finish(&transaction.state, true)
    }

    /// Aborts the transaction, rolling back all of its changes.
    pub fn abort(&self, transaction: &Transaction) -> Result<(), EngineError> {
        self.finish(&transaction.state, false)
    }

    /// Rolls back a transaction that lost a deadlock arbitration. Safe to
    /// call on an already-finished transaction (then a no-op).
    pub(crate) fn rollback(&self, transaction: &Arc<TxState>) {
        let _ = self.finish(transaction, false);
    }

    pub(crate) fn finish(
        &self,
        transaction: &Arc<TxState>,
        commit: bool,
    ) -> Result<(), EngineError> {
        let (undo_log, used_indexes, iterators) = {
            let mut inner = transaction.inner.lock().unwrap();
            if inner.state != TransactionState::Active {
                return Err(EngineError::TransactionClosed);
            }
            inner.state =
                if commit { TransactionState::Committed } else { TransactionState::Aborted };
            (
                mem::take(&mut inner.undo_log),
                mem::take(&mut inner.used_indexes),
                mem::take(&mut inner.iterators),
            )
        };

        // Iterators must not span transactions; closing them also drops any
        // read locks they still hold.
        for weak in iterators {
            if let Some(iterator) = weak.upgrade() {
                let _ = iterator.close(&self.lock_manager);
            }
        }

        if commit {
            // Deletes were applied as tombstones; make them physical now.
            for operation in &undo_log {
                if let UndoOperation::RevertDelete { index, entry } = operation {
                    index.data().write().unwrap().remove(entry);
                }
            }
        } else {
            for operation in undo_log.into_iter().rev() {
                match operation {
                    UndoOperation::RevertInsert { index, entry } => {
                        index.data().write().unwrap().remove(&entry);
                    }
                    UndoOperation::RevertUpdate { index, entry, old_payload } => {
                        index.data().write().unwrap().set_payload(&entry, old_payload);
                    }
                    UndoOperation::RevertDelete { index, entry } => {
                        index.data().write().unwrap().set_tombstone(&entry, false);
                    }
                }
            }
        }

        for index in used_indexes {
            index.end_write(transaction.id());
        }
        self.lock_manager.release_all(transaction.id());
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        debug!(tx = transaction.id().0, commit, "transaction finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_active: usize) -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new()), max_active)
    }

    #[test]
    fn test_begin_assigns_fresh_ids() {
        let manager = manager(16);
        let a = manager.begin().unwrap();
        let b = manager.begin().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_commit_then_commit_reports_closed() {
        let manager = manager(16);
        let tx = manager.begin().unwrap();
        manager.commit(&tx).unwrap();
        assert_eq!(manager.commit(&tx), Err(EngineError::TransactionClosed));
        assert_eq!(manager.abort(&tx), Err(EngineError::TransactionClosed));
    }

    #[test]
    fn test_abort_marks_aborted() {
        let manager = manager(16);
        let tx = manager.begin().unwrap();
        manager.abort(&tx).unwrap();
        assert_eq!(tx.state.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_active_transaction_cap() {
        let manager = manager(2);
        let a = manager.begin().unwrap();
        let _b = manager.begin().unwrap();
        assert_eq!(manager.begin().map(|_| ()), Err(EngineError::OutOfMemory));
        // Finishing one frees a slot.
        manager.commit(&a).unwrap();
        assert!(manager.begin().is_ok());
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let manager = manager(16);
        let tx = manager.begin().unwrap();
        manager.rollback(&tx.state);
        manager.rollback(&tx.state);
        assert_eq!(tx.state.state(), TransactionState::Aborted);
    }
}
