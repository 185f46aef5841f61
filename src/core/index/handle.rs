use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::core::common::error::EngineError;
use crate::core::index::iterator::IterState;
use crate::core::index::schema::Index;
use crate::core::transaction::lock_manager::LockManager;
use crate::core::transaction::manager::TransactionManager;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct HandleInner {
    open: bool,
    iterators: Vec<(u64, Weak<IterState>)>,
}

/// Shared state of one index handle: the open flag and the iterators opened
/// through it.
#[derive(Debug)]
pub(crate) struct HandleState {
    handle_id: u64,
    index: Arc<Index>,
    inner: Mutex<HandleInner>,
}

impl HandleState {
    /// Opens a new handle onto the index and registers it there. Fails when
    /// the index is being deleted.
    pub(crate) fn open(index: Arc<Index>) -> Result<Arc<Self>, EngineError> {
        let handle = Arc::new(HandleState {
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::SeqCst),
            index: Arc::clone(&index),
            inner: Mutex::new(HandleInner { open: true, iterators: Vec::new() }),
        });
        index.register_handle(handle.handle_id, &handle)?;
        Ok(handle)
    }

    pub(crate) fn index(&self) -> &Arc<Index> {
        &self.index
    }

    pub(crate) fn is_open(&self) -> bool {
        self.inner.lock().unwrap().open
    }

    /// Tracks an iterator opened through this handle. Fails when the handle
    /// has already been closed.
    pub(crate) fn register_iterator(&self, iterator: &Arc<IterState>) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.open {
            return Err(EngineError::UnknownIndex);
        }
        inner.iterators.push((iterator.id(), Arc::downgrade(iterator)));
        Ok(())
    }

    pub(crate) fn unregister_iterator(&self, iterator_id: u64) {
        self.inner.lock().unwrap().iterators.retain(|(id, _)| *id != iterator_id);
    }

    /// Closes the handle: first all iterators opened through it, then the
    /// handle itself. The first close wins; any further close reports
    /// `UnknownIndex`.
    pub(crate) fn close(
        &self,
        lock_manager: &LockManager,
        transactions: &TransactionManager,
    ) -> Result<(), EngineError> {
        let iterators = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.open {
                return Err(EngineError::UnknownIndex);
            }
            inner.open = false;
            mem::take(&mut inner.iterators)
        };
        for (_, weak) in iterators {
            if let Some(iterator) = weak.upgrade() {
                // An autocommit iterator carries its own transaction, which
                // ends with the iterator.
                if let Ok(Some(owned_tx)) = iterator.close(lock_manager) {
                    let _ = transactions.finish(&owned_tx, true);
                }
            }
        }
        self.index.unregister_handle(self.handle_id);
        Ok(())
    }
}

/// A per-opener reference to an index.
///
/// Handles are the unit of open/close: closing a handle closes the iterators
/// opened through it without affecting the underlying index or other
/// handles. A handle and the iterators opened through it belong to their
/// opener and must not be driven from several threads at once.
#[derive(Debug)]
pub struct IndexHandle {
    pub(crate) state: Arc<HandleState>,
}

impl IndexHandle {
    /// Name of the underlying index.
    pub fn index_name(&self) -> &str {
        self.state.index().name()
    }
}
