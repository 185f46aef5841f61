pub mod multimap;

pub use multimap::{EntryKey, EntrySlot, OrderedMultimap};
