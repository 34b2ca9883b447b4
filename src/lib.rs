#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::cast_possible_wrap)]
#![warn(clippy::cast_sign_loss)]
#![forbid(unsafe_code)]
#![deny(clippy::todo, clippy::module_inception, clippy::correctness)]
#![warn(clippy::missing_const_for_fn, clippy::all)]

//! # Oxivec: spatial partition trees for high-dimensional points
//!
//! `oxivec` indexes feature vectors for radius queries. It offers:
//! - [`MemoryVectorIndex`], an online index that splits its leaves in place
//!   as records arrive and answers closed-ball queries lazily
//! - [`RecursiveBuilder`] and [`IterativeBuilder`], two batch strategies
//!   that build a partition tree over datasets held in external stores and
//!   emit one [`IndexRange`] per node
//! - store contracts ([`KeyedStore`], [`RangeStore`]) with in-memory and
//!   spill-to-disk implementations

pub mod core;

pub use crate::core::common::OxivecError;
pub use crate::core::config::Config;
pub use crate::core::indexing::{
    BuildSummary, IndexRange, IterativeBuilder, MemoryVectorIndex, RecursiveBuilder, SplitDescriptor, VectorRecord,
};
pub use crate::core::storage::{
    FileRangeStore, FileRangeStoreFactory, KeyedStore, MemoryRangeStore, MemoryStore, RangeStore, RangeStoreFactory,
};
pub use crate::core::types::{NodeId, Point, PointId};

/// Core result type for the library
pub type Result<T> = std::result::Result<T, OxivecError>;
