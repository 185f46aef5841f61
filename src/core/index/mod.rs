pub mod handle;
pub mod iterator;
pub mod registry;
pub mod schema;

pub use handle::IndexHandle;
pub use iterator::RecordIterator;
pub use registry::IndexRegistry;
pub use schema::{Index, IndexSchema};
