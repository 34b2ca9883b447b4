// src/core/indexing/memory/mod.rs

//! Online adaptive index over normalized vectors.
//!
//! Records whose vector components lie in `[-1, 1]` are kept in a binary
//! space-partitioning tree stored as an arena of nodes. A node at level `L`
//! splits dimension `L % d` at the center of its cell; cells are halved on
//! every visit of a dimension and are rebuilt during traversal instead of
//! being stored. Records outside `[-1, 1]` are still found, they just end
//! up in less balanced leaves.
//!
//! The index has no internal locking. Callers that share it across threads
//! must serialize mutation against traversal themselves.

use crate::core::common::OxivecError;
use crate::core::config::Config;
use crate::core::types::Branch;
use std::collections::HashMap;
use tracing::debug;

mod cursor;
pub mod hierarchy;
pub mod search;

pub use self::hierarchy::{Hierarchy, HierarchyNode};
pub use self::search::Find;

use self::cursor::{Cursor, Geometry};

/// Levels each dimension may be split before midpoints stop being
/// distinguishable in `f32`.
pub const MAX_DEPTH: usize = f32::MANTISSA_DIGITS as usize;

const ROOT: usize = 0;

/// A record that carries its vector.
pub trait VectorRecord {
    fn vector(&self) -> &[f32];
}

impl VectorRecord for Vec<f32> {
    fn vector(&self) -> &[f32] {
        self
    }
}

impl VectorRecord for Box<[f32]> {
    fn vector(&self) -> &[f32] {
        self
    }
}

impl<K> VectorRecord for (K, Vec<f32>) {
    fn vector(&self) -> &[f32] {
        &self.1
    }
}

/// Arena element. A node without children is a leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Entry {
    low: Option<usize>,
    high: Option<usize>,
}

impl Entry {
    const fn is_leaf(self) -> bool {
        self.low.is_none() && self.high.is_none()
    }

    fn set(&mut self, branch: Branch, child: Option<usize>) {
        match branch {
            Branch::Low => self.low = child,
            Branch::High => self.high = child,
        }
    }
}

/// In-memory vector index supporting insertion, radius search and removal.
#[derive(Debug, Clone)]
pub struct MemoryVectorIndex<R> {
    entries: Vec<Entry>,
    records: HashMap<usize, Vec<R>>,
    count: usize,
    dimension: usize,
    list_threshold: usize,
}

impl<R> Default for MemoryVectorIndex<R> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            records: HashMap::new(),
            count: 0,
            dimension: 0,
            list_threshold: Config::default().list_threshold,
        }
    }
}

impl<R: VectorRecord> MemoryVectorIndex<R> {
    /// Creates an empty index whose leaves split once they hold more than
    /// `list_threshold` records.
    ///
    /// # Errors
    ///
    /// Returns `OxivecError::InvalidConfiguration` if `list_threshold` is zero.
    pub fn new(list_threshold: usize) -> Result<Self, OxivecError> {
        if list_threshold == 0 {
            return Err(OxivecError::InvalidConfiguration(
                "list_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(Self { list_threshold, ..Self::default() })
    }

    pub fn with_config(config: &Config) -> Result<Self, OxivecError> {
        config.validate()?;
        Self::new(config.list_threshold)
    }

    /// Creates an index holding `records`.
    pub fn from_records<I>(records: I, config: &Config) -> Result<Self, OxivecError>
    where
        I: IntoIterator<Item = R>,
    {
        let mut index = Self::with_config(config)?;
        for record in records {
            index.add(record)?;
        }
        Ok(index)
    }

    /// Number of records in the index.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Vector size fixed by the first insertion, `None` while nothing was added.
    pub fn dimension(&self) -> Option<usize> {
        (!self.entries.is_empty()).then_some(self.dimension)
    }

    pub fn list_threshold(&self) -> usize {
        self.list_threshold
    }

    /// Iterates over all records in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.values().flatten()
    }

    /// Removes every record and forgets the dimension.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.records.clear();
        self.count = 0;
        self.dimension = 0;
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns `OxivecError::InvalidVector` if the record's vector is empty
    /// on the first insertion or differs in size from earlier records.
    pub fn add(&mut self, record: R) -> Result<(), OxivecError> {
        let size = record.vector().len();

        if self.entries.is_empty() {
            if size == 0 {
                return Err(OxivecError::InvalidVector { expected: 0, actual: 0 });
            }
            self.dimension = size;
            self.entries.push(Entry::default());
            self.records.insert(ROOT, vec![record]);
            self.count = 1;
            return Ok(());
        }

        OxivecError::check_dimension(self.dimension, size)?;

        let mut geometry = Geometry::new(self.dimension);
        let mut node = ROOT;
        let mut level = 0;

        loop {
            let dim = level % self.dimension;
            let branch = if record.vector()[dim] < geometry.centers[dim] {
                Branch::Low
            } else {
                Branch::High
            };
            let entry = self.entries[node];
            let child = match branch {
                Branch::Low => entry.low,
                Branch::High => entry.high,
            };

            match child {
                Some(child) => {
                    geometry.descend(dim, branch);
                    node = child;
                    level += 1;
                }
                None if entry.is_leaf() => break,
                None => {
                    let leaf = self.push_node(Some(vec![record]));
                    self.entries[node].set(branch, Some(leaf));
                    self.count += 1;
                    return Ok(());
                }
            }
        }

        let list = self.records.entry(node).or_default();
        list.push(record);
        self.count += 1;

        if list.len() > self.list_threshold && level < self.max_level() {
            let list = self.records.remove(&node).unwrap_or_default();
            self.split(node, level, geometry, list);
        }
        Ok(())
    }

    /// Finds the records that may lie within `radius` of `origin` and pass
    /// `predicate`.
    ///
    /// The tree only discards records whose cell is provably too far away,
    /// so `predicate` must check the actual distance.
    ///
    /// # Errors
    ///
    /// Returns `OxivecError::InvalidVector` if `origin` has the wrong size and
    /// `OxivecError::InvalidInput` for a negative or NaN radius.
    pub fn find<P>(&self, origin: &[f32], radius: f32, predicate: P) -> Result<Find<'_, R, P>, OxivecError>
    where
        P: FnMut(&R, &[f32]) -> bool,
    {
        let cursor = self.query_cursor(origin, radius)?;
        Ok(Find::new(self, cursor, origin.to_vec(), predicate))
    }

    /// Removes the records within `radius` of `origin` that pass `predicate`
    /// and returns how many were removed.
    ///
    /// Emptied leaves are detached from their parents. The tree is not
    /// rebalanced, so an internal node may be left with a single child.
    pub fn remove<P>(&mut self, origin: &[f32], radius: f32, mut predicate: P) -> Result<usize, OxivecError>
    where
        P: FnMut(&R, &[f32]) -> bool,
    {
        let mut cursor = self.query_cursor(origin, radius)?;
        let mut removed = 0;

        while let Some(visit) = cursor.next_visit(&self.entries) {
            if !visit.leaf {
                continue;
            }
            let Some(list) = self.records.get_mut(&visit.node) else {
                continue;
            };

            let before = list.len();
            list.retain(|record| !predicate(record, origin));
            removed += before - list.len();

            if list.is_empty() {
                self.records.remove(&visit.node);
                self.detach(cursor.path());
            }
        }

        self.count -= removed;
        Ok(removed)
    }

    /// Walks every node with its reconstructed cell.
    pub fn hierarchy(&self) -> Hierarchy<'_, R> {
        Hierarchy::new(self, Cursor::all(self.dimension, !self.entries.is_empty()))
    }

    fn query_cursor(&self, origin: &[f32], radius: f32) -> Result<Cursor, OxivecError> {
        if radius.is_nan() || radius < 0.0 {
            return Err(OxivecError::InvalidInput {
                message: format!("radius must be a non-negative number, got {radius}"),
            });
        }
        if self.entries.is_empty() {
            return Ok(Cursor::within(origin, radius, false));
        }
        OxivecError::check_dimension(self.dimension, origin.len())?;
        Ok(Cursor::within(origin, radius, true))
    }

    fn max_level(&self) -> usize {
        MAX_DEPTH * self.dimension
    }

    fn push_node(&mut self, records: Option<Vec<R>>) -> usize {
        let index = self.entries.len();
        self.entries.push(Entry::default());
        if let Some(records) = records {
            self.records.insert(index, records);
        }
        index
    }

    /// Splits an overfull leaf, walking down through single-child nodes
    /// until its records separate or the depth budget runs out.
    fn split(&mut self, mut node: usize, mut level: usize, mut geometry: Geometry, mut list: Vec<R>) {
        while level < self.max_level() {
            let dim = level % self.dimension;
            let center = geometry.centers[dim];
            let (low, high): (Vec<R>, Vec<R>) =
                list.into_iter().partition(|record| record.vector()[dim] < center);

            let branch = if low.is_empty() {
                list = high;
                Branch::High
            } else if high.is_empty() {
                list = low;
                Branch::Low
            } else {
                let low = self.push_node(Some(low));
                let high = self.push_node(Some(high));
                self.entries[node] = Entry { low: Some(low), high: Some(high) };
                return;
            };

            let child = self.push_node(None);
            self.entries[node].set(branch, Some(child));
            geometry.descend(dim, branch);
            node = child;
            level += 1;
        }

        debug!(node, level, records = list.len(), "leaf depth exhausted, keeping an oversized leaf");
        self.records.insert(node, list);
    }

    /// Detaches the emptied leaf at the end of `path` and every ancestor
    /// left without children. The root is never detached.
    fn detach(&mut self, path: &[usize]) {
        let Some((&leaf, ancestors)) = path.split_last() else {
            return;
        };

        let mut child = leaf;
        for &parent in ancestors.iter().rev() {
            let entry = &mut self.entries[parent];
            if entry.low == Some(child) {
                entry.low = None;
            } else if entry.high == Some(child) {
                entry.high = None;
            }
            if !entry.is_leaf() {
                break;
            }
            child = parent;
        }
    }
}

impl<'a, R> IntoIterator for &'a MemoryVectorIndex<R> {
    type Item = &'a R;
    type IntoIter = std::iter::Flatten<std::collections::hash_map::Values<'a, usize, Vec<R>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values().flatten()
    }
}

/// Euclidean distance between two vectors of the same size.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}
