pub mod lock_manager;
pub mod manager;
pub mod transaction;

pub use lock_manager::{LockKey, LockManager, LockMode};
pub use manager::TransactionManager;
pub use transaction::{Transaction, TransactionState};
