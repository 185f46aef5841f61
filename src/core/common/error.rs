//! Error types for Oxidx
//!
//! Every operation on the engine reports its outcome through [`EngineError`];
//! errors are values on the operation boundary and are never thrown across it.

use thiserror::Error;

/// Main error type for Oxidx operations.
///
/// Each variant is emitted at a well-defined condition; see the individual
/// operation documentation for which variants an operation can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The transaction could not be committed and had to be aborted.
    #[error("transaction has been aborted")]
    TransactionAborted,

    /// The operation was not completed because a resource limit was reached.
    #[error("out of memory")]
    OutOfMemory,

    /// The operation ran into a deadlock and its transaction was chosen as
    /// the victim. The transaction is fully rolled back before this error is
    /// returned; the caller must begin a new transaction.
    #[error("deadlock detected, transaction aborted")]
    Deadlock,

    /// An index with the given name already exists.
    #[error("an index named `{0}` already exists")]
    IndexExists(String),

    /// The requested index does not exist or has been closed already.
    #[error("unknown index")]
    UnknownIndex,

    /// The iterator has been closed already or was never opened.
    #[error("iterator has been closed")]
    IteratorClosed,

    /// The requested record was not found. Also used by `get_next` to signal
    /// that the iterator has exhausted its range.
    #[error("record not found")]
    NotFound,

    /// The transaction has already been committed or aborted.
    #[error("transaction has been closed")]
    TransactionClosed,

    /// The given key or record is not compatible with the index schema.
    #[error("key is not compatible with the index")]
    IncompatibleKey,

    /// The index could not be deleted because it has been modified by
    /// transactions that are still unresolved.
    #[error("index has open transactions")]
    OpenTransactions,

    /// Configuration errors (file access or parse failures).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catch-all for unclassifiable failures.
    #[error("{0}")]
    GenericFailure(String),
}
