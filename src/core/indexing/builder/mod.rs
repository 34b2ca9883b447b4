// src/core/indexing/builder/mod.rs

//! Batch construction of partition trees.
//!
//! Two strategies produce the same kind of tree: [`RecursiveBuilder`] works
//! depth first over node-local range stores, [`IterativeBuilder`] works in
//! waves over keyed stores holding the whole dataset. Both emit one
//! [`IndexRange`] per node, with children of node `n` at `2n + 1` (low) and
//! `2n + 2` (high). Nodes whose id would not fit in 64 bits are split like
//! any other but not emitted, unless `strict_node_ids` turns the overflow
//! into an error.

mod coordination;
pub mod descriptor;
pub mod iterative;
pub mod recursive;

pub use self::descriptor::{IndexRange, SplitDescriptor};
pub use self::iterative::{BuildSummary, IterativeBuilder};
pub use self::recursive::RecursiveBuilder;
