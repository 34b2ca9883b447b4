// src/core/indexing/mod.rs

pub mod builder;
pub mod memory;
pub mod stats;

pub use self::builder::{BuildSummary, IndexRange, IterativeBuilder, RecursiveBuilder, SplitDescriptor};
pub use self::memory::{MemoryVectorIndex, VectorRecord};
pub use self::stats::{Stats, StatsKey};
