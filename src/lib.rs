#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::significant_drop_tightening,
    clippy::type_complexity
)]

//! # Oxidx — a transactional multidimensional index engine
//!
//! Oxidx is an embedded, in-memory indexing engine. Named indexes are keyed
//! by ordered tuples of typed attributes (32-bit integers, 64-bit integers,
//! and byte strings) and map keys to opaque byte payloads. The engine
//! supports concurrent readers and writers under ACID semantics with
//! read-committed isolation, deadlock detection with automatic victim
//! rollback, and cursor-based range and partial-match queries over the
//! multidimensional key space.
//!
//! ## Features
//!
//! - Order-preserving multi-attribute key encoding
//! - Duplicate keys and full duplicate records
//! - Transactions with undo-log rollback, plus autocommit for single
//!   operations
//! - Range and partial-match iteration with wildcard attributes
//! - Bulk update/delete with duplicate-sweep and ignore-payload matching
//!
//! ## Example
//!
//! ```
//! use oxidx::{Attribute, AttributeType, Engine, Key, KeyPattern, Record};
//!
//! let engine = Engine::new();
//! engine.create_index("books", &[AttributeType::Int, AttributeType::Varchar])?;
//! let books = engine.open_index("books")?;
//!
//! let key = Key::new(vec![Attribute::Int(42), Attribute::varchar("dune")]);
//! engine.insert_record(None, &books, &Record::new(key.clone(), b"F. Herbert".to_vec()))?;
//!
//! let point = KeyPattern::from(&key);
//! let iterator = engine.get_records(None, &books, &point, &point)?;
//! let found = engine.get_next(&iterator)?;
//! assert_eq!(found.payload, b"F. Herbert");
//! engine.close_iterator(&iterator)?;
//! # Ok::<(), oxidx::EngineError>(())
//! ```

pub mod api;
pub mod core;

pub use api::Engine;
pub use core::common::error::EngineError;
pub use core::common::types::{
    Attribute, AttributeType, Key, KeyPattern, ModFlags, Record, MAX_KEY_ATTRIBUTES,
    MAX_PAYLOAD_LENGTH, MAX_VARCHAR_LENGTH,
};
pub use core::config::EngineConfig;
pub use core::index::{IndexHandle, RecordIterator};
pub use core::transaction::{Transaction, TransactionState};
