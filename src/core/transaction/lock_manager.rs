// src/core/transaction/lock_manager.rs
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

use tracing::{trace, warn};

use crate::core::common::error::EngineError;
use crate::core::common::types::{IndexId, TransactionId};

/// Represents the type of lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock (read lock).
    Shared,
    /// Exclusive lock (write lock).
    Exclusive,
}

/// Identifies a lockable resource: one encoded key of one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub index: IndexId,
    pub key: Vec<u8>,
}

/// One granted lock on a resource.
///
/// Shared grants carry a count: the same transaction may observe a key
/// through several cursors at once, and each cursor releases its read lock
/// independently. Exclusive grants are held until the transaction ends and
/// never carry a count.
#[derive(Debug)]
struct LockGrant {
    owner: TransactionId,
    mode: LockMode,
    shared_count: u32,
}

#[derive(Debug, Default)]
struct LockTables {
    /// Granted locks per resource.
    lock_table: HashMap<LockKey, Vec<LockGrant>>,
    /// Resources locked by each transaction.
    transaction_locks: HashMap<TransactionId, HashSet<LockKey>>,
    /// Wait-for graph: a blocked transaction maps to the holders it waits on.
    wait_for: HashMap<TransactionId, HashSet<TransactionId>>,
    /// Transactions nominated as deadlock victims; their pending acquisition
    /// fails with `Deadlock` on wakeup.
    doomed: HashSet<TransactionId>,
}

/// Grants shared and exclusive key locks on behalf of transactions.
///
/// Acquisition blocks on contention. Every time a transaction is about to
/// block, its wait-for edges are recorded and the graph is searched for a
/// cycle through the waiter; on a cycle the member holding the fewest write
/// locks (ties broken by lowest transaction id) is nominated as the victim
/// and its acquisition fails with [`EngineError::Deadlock`].
#[derive(Debug, Default)]
pub struct LockManager {
    tables: Mutex<LockTables>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager::default()
    }

    /// Acquires a lock, blocking while conflicting grants of other
    /// transactions exist. A transaction already holding the resource
    /// re-enters: shared acquisitions stack, an exclusive grant absorbs any
    /// later request, and a sole shared holder upgrades to exclusive.
    pub fn acquire(
        &self,
        transaction_id: TransactionId,
        key: &LockKey,
        mode: LockMode,
    ) -> Result<(), EngineError> {
        let mut tables = self.tables.lock().unwrap();
        loop {
            if tables.doomed.contains(&transaction_id) {
                tables.wait_for.remove(&transaction_id);
                return Err(EngineError::Deadlock);
            }

            let conflicts = Self::try_grant(&mut tables, transaction_id, key, mode);
            match conflicts {
                None => {
                    tables.wait_for.remove(&transaction_id);
                    trace!(tx = transaction_id.0, ?mode, "lock granted");
                    return Ok(());
                }
                Some(holders) => {
                    tables.wait_for.insert(transaction_id, holders);
                    if let Some(victim) = Self::choose_victim(&tables, transaction_id) {
                        warn!(
                            victim = victim.0,
                            waiter = transaction_id.0,
                            "deadlock cycle detected, aborting victim"
                        );
                        if victim == transaction_id {
                            tables.wait_for.remove(&transaction_id);
                            return Err(EngineError::Deadlock);
                        }
                        tables.doomed.insert(victim);
                        self.released.notify_all();
                    }
                    tables = self.released.wait(tables).unwrap();
                }
            }
        }
    }

    /// Releases one shared acquisition of the given resource. A no-op when
    /// the transaction holds the resource exclusively (write locks are kept
    /// until the transaction ends) or does not hold it at all.
    pub fn unlock_read(&self, transaction_id: TransactionId, key: &LockKey) {
        let mut tables = self.tables.lock().unwrap();
        let Some(grants) = tables.lock_table.get_mut(key) else {
            return;
        };
        let Some(position) = grants
            .iter()
            .position(|g| g.owner == transaction_id && g.mode == LockMode::Shared)
        else {
            return;
        };
        grants[position].shared_count -= 1;
        if grants[position].shared_count == 0 {
            grants.remove(position);
            if grants.is_empty() {
                tables.lock_table.remove(key);
            }
            if let Some(keys) = tables.transaction_locks.get_mut(&transaction_id) {
                keys.remove(key);
                if keys.is_empty() {
                    tables.transaction_locks.remove(&transaction_id);
                }
            }
            self.released.notify_all();
        }
    }

    /// Releases every lock held by the transaction and clears it from the
    /// wait-for graph and the victim set. Called when the transaction
    /// commits or aborts.
    pub fn release_all(&self, transaction_id: TransactionId) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(keys) = tables.transaction_locks.remove(&transaction_id) {
            for key in keys {
                if let Some(grants) = tables.lock_table.get_mut(&key) {
                    grants.retain(|g| g.owner != transaction_id);
                    if grants.is_empty() {
                        tables.lock_table.remove(&key);
                    }
                }
            }
        }
        tables.wait_for.remove(&transaction_id);
        for holders in tables.wait_for.values_mut() {
            holders.remove(&transaction_id);
        }
        tables.doomed.remove(&transaction_id);
        self.released.notify_all();
    }

    /// Attempts to grant without blocking. Returns `None` on success or the
    /// set of conflicting holders.
    fn try_grant(
        tables: &mut LockTables,
        transaction_id: TransactionId,
        key: &LockKey,
        mode: LockMode,
    ) -> Option<HashSet<TransactionId>> {
        let grants = tables.lock_table.entry(key.clone()).or_default();

        let conflicts: HashSet<TransactionId> = grants
            .iter()
            .filter(|g| {
                g.owner != transaction_id
                    && (g.mode == LockMode::Exclusive || mode == LockMode::Exclusive)
            })
            .map(|g| g.owner)
            .collect();
        if !conflicts.is_empty() {
            return Some(conflicts);
        }

        // No conflicting grants from other transactions; fold the request
        // into the transaction's own grant.
        match grants.iter_mut().find(|g| g.owner == transaction_id) {
            Some(grant) => match (grant.mode, mode) {
                // The strongest lock prevails.
                (LockMode::Exclusive, _) => {}
                (LockMode::Shared, LockMode::Exclusive) => grant.mode = LockMode::Exclusive,
                (LockMode::Shared, LockMode::Shared) => grant.shared_count += 1,
            },
            None => grants.push(LockGrant {
                owner: transaction_id,
                mode,
                shared_count: u32::from(mode == LockMode::Shared),
            }),
        }
        tables
            .transaction_locks
            .entry(transaction_id)
            .or_default()
            .insert(key.clone());
        None
    }

    /// Searches the wait-for graph for a cycle through `waiter` and returns
    /// the member to abort: the one holding the fewest write locks, ties
    /// broken by lowest transaction id.
    fn choose_victim(tables: &LockTables, waiter: TransactionId) -> Option<TransactionId> {
        let cycle = Self::find_cycle(tables, waiter)?;
        cycle
            .into_iter()
            .min_by_key(|&member| (Self::write_lock_count(tables, member), member))
    }

    fn find_cycle(tables: &LockTables, start: TransactionId) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        Self::dfs_cycle(tables, start, start, &mut visited, &mut path)
    }

    fn dfs_cycle(
        tables: &LockTables,
        start: TransactionId,
        current: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        visited.insert(current);
        path.push(current);
        for &next in tables.wait_for.get(&current).into_iter().flatten() {
            if next == start {
                return Some(path.clone());
            }
            if !visited.contains(&next) {
                if let Some(cycle) = Self::dfs_cycle(tables, start, next, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }

    fn write_lock_count(tables: &LockTables, transaction_id: TransactionId) -> usize {
        tables
            .transaction_locks
            .get(&transaction_id)
            .map_or(0, |keys| {
                keys.iter()
                    .filter(|key| {
                        tables.lock_table.get(key).is_some_and(|grants| {
                            grants.iter().any(|g| {
                                g.owner == transaction_id && g.mode == LockMode::Exclusive
                            })
                        })
                    })
                    .count()
            })
    }
}
