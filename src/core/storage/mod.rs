// src/core/storage/mod.rs

//! Store contracts used by the builders and their in-memory and file-backed
//! implementations.

pub mod file_range;
pub mod memory;
pub mod traits;

pub use self::file_range::{FileRangeStore, FileRangeStoreFactory};
pub use self::memory::{MemoryRangeStore, MemoryStore};
pub use self::traits::{KeyedStore, RangeStore, RangeStoreFactory};
