//! Positioned range iteration over one index.
//!
//! An iterator is initialized with an encoded lower and upper bound and
//! walks the ordered multimap from the first entry at or above the lower
//! bound. Because entries are ordered lexicographically but the requested
//! range is rectangular, an entry inside the lexicographic span may still
//! fall outside the range on a later attribute; such entries are post-
//! filtered and skipped. The first attribute drives early termination: once
//! the encoded key passes the upper bound, no further entry can match.
//! Partial-match queries that leave the first attribute unconstrained
//! therefore degrade to a scan of the whole index.
//!
//! While the iterator is positioned on a record it holds a read lock on that
//! record's key, so no other transaction can modify or delete the record
//! until the iterator advances or closes. Advancing, exhausting the range,
//! and closing all release the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::codec;
use crate::core::common::error::EngineError;
use crate::core::common::types::Record;
use crate::core::index::handle::HandleState;
use crate::core::storage::EntryKey;
use crate::core::transaction::lock_manager::{LockKey, LockManager, LockMode};
use crate::core::transaction::transaction::TxState;

static NEXT_ITERATOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
enum IterPhase {
    /// Created, first `next` not yet issued.
    Uninitialized,
    /// Positioned on the entry returned by the last `next`.
    Positioned(EntryKey),
    /// The range is exhausted; all read locks have been released.
    Exhausted,
    /// Closed explicitly or by its handle or transaction.
    Closed,
}

#[derive(Debug)]
struct IterInner {
    phase: IterPhase,
    /// Key the cursor currently holds a read lock on.
    held_lock: Option<LockKey>,
}

/// Shared state of one iterator.
#[derive(Debug)]
pub(crate) struct IterState {
    iterator_id: u64,
    tx: Arc<TxState>,
    /// True when the iterator was opened without a transaction and wraps its
    /// own single-iterator transaction, resolved when the iterator closes.
    owns_tx: bool,
    handle: Arc<HandleState>,
    lower: Vec<u8>,
    upper: Vec<u8>,
    /// Byte ranges of the encoded attribute slots, for the rectangular
    /// post-filter.
    slot_ranges: Vec<(usize, usize)>,
    inner: Mutex<IterInner>,
}

impl IterState {
    pub(crate) fn new(
        tx: Arc<TxState>,
        owns_tx: bool,
        handle: Arc<HandleState>,
        lower: Vec<u8>,
        upper: Vec<u8>,
    ) -> Arc<Self> {
        let mut slot_ranges = Vec::new();
        let mut offset = 0;
        for &attribute_type in handle.index().schema().attribute_types() {
            let size = codec::encoded_attribute_size(attribute_type);
            slot_ranges.push((offset, offset + size));
            offset += size;
        }
        Arc::new(IterState {
            iterator_id: NEXT_ITERATOR_ID.fetch_add(1, Ordering::SeqCst),
            tx,
            owns_tx,
            handle,
            lower,
            upper,
            slot_ranges,
            inner: Mutex::new(IterInner { phase: IterPhase::Uninitialized, held_lock: None }),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.iterator_id
    }

    pub(crate) fn tx_state(&self) -> &Arc<TxState> {
        &self.tx
    }

    /// Advances to the next record inside the range and returns an owned
    /// copy of it. Reports `NotFound` on exhaustion and `IteratorClosed`
    /// once closed.
    pub(crate) fn next(&self, lock_manager: &LockManager) -> Result<Record, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.phase {
            IterPhase::Closed => return Err(EngineError::IteratorClosed),
            IterPhase::Exhausted => return Err(EngineError::NotFound),
            _ => {}
        }

        let index = self.handle.index();
        let tx_id = self.tx.id();

        // Advancing: the previous record's read lock is dropped first.
        if let Some(previous) = inner.held_lock.take() {
            lock_manager.unlock_read(tx_id, &previous);
        }

        let mut position = match &inner.phase {
            IterPhase::Positioned(entry) => Some(entry.clone()),
            _ => None,
        };

        loop {
            let candidate = {
                let data = index.data().read().unwrap();
                let next = match &position {
                    None => data.first_at_least(&self.lower),
                    Some(entry) => data.next_after(entry),
                };
                next.map(|(entry, _)| entry.clone())
            };
            let Some(entry) = candidate else {
                inner.phase = IterPhase::Exhausted;
                return Err(EngineError::NotFound);
            };
            position = Some(entry.clone());

            // Entries are ordered by the first attribute first: once the
            // encoded key passes the upper bound the range is exceeded for
            // good.
            if entry.key > self.upper {
                inner.phase = IterPhase::Exhausted;
                return Err(EngineError::NotFound);
            }

            // Lock the observed key. This may block behind an unresolved
            // writer; read-committed visibility comes from waiting here.
            let lock = LockKey { index: index.id(), key: entry.key.clone() };
            lock_manager.acquire(tx_id, &lock, LockMode::Shared)?;

            // Rectangular post-filter: attribute-wise containment in
            // [lower, upper], even where the lexicographic order already
            // passed the entry.
            if !self.in_range(&entry.key) {
                lock_manager.unlock_read(tx_id, &lock);
                continue;
            }

            // Re-read under the latch; the entry may have been removed or
            // tombstoned while we waited for the lock.
            let payload = {
                let data = index.data().read().unwrap();
                match data.get(&entry) {
                    Some(slot) if !slot.tombstone => Some(slot.payload.clone()),
                    _ => None,
                }
            };
            let Some(payload) = payload else {
                lock_manager.unlock_read(tx_id, &lock);
                continue;
            };

            let key = codec::decode_key(&entry.key, index.schema().attribute_types());
            inner.held_lock = Some(lock);
            inner.phase = IterPhase::Positioned(entry);
            return Ok(Record::new(key, payload));
        }
    }

    fn in_range(&self, encoded_key: &[u8]) -> bool {
        self.slot_ranges.iter().all(|&(start, end)| {
            let slot = &encoded_key[start..end];
            &self.lower[start..end] <= slot && slot <= &self.upper[start..end]
        })
    }

    /// Closes the iterator, dropping its read lock and unregistering it from
    /// its handle. Returns the iterator-owned transaction, if any, for the
    /// caller to resolve. Idempotent: a second close reports
    /// `IteratorClosed`.
    pub(crate) fn close(
        &self,
        lock_manager: &LockManager,
    ) -> Result<Option<Arc<TxState>>, EngineError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.phase, IterPhase::Closed) {
                return Err(EngineError::IteratorClosed);
            }
            if let Some(lock) = inner.held_lock.take() {
                lock_manager.unlock_read(self.tx.id(), &lock);
            }
            inner.phase = IterPhase::Closed;
        }
        self.handle.unregister_iterator(self.iterator_id);
        Ok(self.owns_tx.then(|| Arc::clone(&self.tx)))
    }
}

/// A positioned forward iterator over one index, produced by `get_records`.
///
/// Each `get_next` on the engine yields one record of the requested range as
/// a fresh owned copy. The iterator belongs to the handle and transaction it
/// was opened under and is closed with them.
#[derive(Debug)]
pub struct RecordIterator {
    pub(crate) state: Arc<IterState>,
}
