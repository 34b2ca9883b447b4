// src/core/indexing/builder/coordination.rs

//! Bookkeeping shared by the workers of one iterative build.

use crate::core::common::lock_utils::lock_poisoned;
use crate::core::common::OxivecError;
use super::descriptor::SplitDescriptor;
use crate::core::types::{Branch, NodeId, PointId};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-build state. Created by `IterativeBuilder::build` and dropped with it.
#[derive(Debug, Default)]
pub(super) struct BuildContext {
    pub(super) segments: SegmentTable,
    pub(super) locks: NodeLocks,
    pub(super) unresolved: AtomicU64,
    pub(super) multi_segment: AtomicBool,
    pub(super) aliased: AliasedNodes,
    pub(super) ranges: AtomicU64,
    pub(super) singletons: AtomicU64,
    pub(super) degenerate: AtomicU64,
    pub(super) aliased_ranges: AtomicU64,
    pub(super) segment_merges: AtomicU64,
    pub(super) overflow_reported: AtomicBool,
}

impl BuildContext {
    pub(super) fn unresolved(&self) -> u64 {
        self.unresolved.load(Ordering::Acquire)
    }
}

/// Nodes whose id wrapped around 2^64. They only live for one wave, under
/// their wrapped id, and their ranges are kept here instead of the ranges
/// store.
///
/// All unresolved points sit at the same depth, so a wrapped id can only
/// clash with another wrapped id of the same wave, never with a stored node.
#[derive(Debug, Default)]
pub(super) struct AliasedNodes {
    /// Wrapped ids of the next wave and the parent side each stands for.
    next: Mutex<HashMap<NodeId, (NodeId, Branch)>>,
    /// Wrapped ids of the current wave, with their descriptor once derived.
    current: Mutex<HashMap<NodeId, Option<SplitDescriptor>>>,
}

impl AliasedNodes {
    pub(super) fn contains(&self, node: NodeId) -> Result<bool, OxivecError> {
        Ok(self.current.lock().map_err(lock_poisoned)?.contains_key(&node))
    }

    pub(super) fn set_descriptor(&self, node: NodeId, descriptor: SplitDescriptor) -> Result<(), OxivecError> {
        self.current.lock().map_err(lock_poisoned)?.insert(node, Some(descriptor));
        Ok(())
    }

    pub(super) fn descriptor(&self, node: NodeId) -> Result<Option<SplitDescriptor>, OxivecError> {
        Ok(self.current.lock().map_err(lock_poisoned)?.get(&node).copied().flatten())
    }

    /// Registers `child` as the wrapped id of `parent`'s `branch` side.
    ///
    /// # Errors
    ///
    /// `OxivecError::NodeIdOverflow` when another node of the wave already
    /// wrapped onto `child`.
    pub(super) fn claim(&self, child: NodeId, parent: NodeId, branch: Branch) -> Result<(), OxivecError> {
        let mut next = self.next.lock().map_err(lock_poisoned)?;
        match next.entry(child) {
            Entry::Occupied(entry) if *entry.get() != (parent, branch) => {
                Err(OxivecError::NodeIdOverflow { node: parent })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert((parent, branch));
                Ok(())
            }
        }
    }

    /// Makes the ids claimed during the last descent the current ones.
    pub(super) fn advance(&self) -> Result<(), OxivecError> {
        let next = std::mem::take(&mut *self.next.lock().map_err(lock_poisoned)?);
        *self.current.lock().map_err(lock_poisoned)? = next.into_keys().map(|node| (node, None)).collect();
        Ok(())
    }
}

/// Hands out statistics segments so that workers updating the same node
/// never share an accumulator.
#[derive(Debug, Default)]
pub(super) struct SegmentTable {
    nodes: Mutex<HashMap<NodeId, HashMap<PointId, u32>>>,
}

impl SegmentTable {
    /// Takes the lowest segment of `node` not held by another point.
    pub(super) fn acquire(&self, node: NodeId, id: PointId) -> Result<SegmentGuard<'_>, OxivecError> {
        let mut nodes = self.nodes.lock().map_err(lock_poisoned)?;
        let held = nodes.entry(node).or_default();
        let used: HashSet<u32> = held.values().copied().collect();
        let segment = (0..).find(|segment| !used.contains(segment)).unwrap_or_default();
        held.insert(id, segment);

        Ok(SegmentGuard { table: self, node, id, segment })
    }

    fn release(&self, node: NodeId, id: PointId) {
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(held) = nodes.get_mut(&node) {
            held.remove(&id);
            if held.is_empty() {
                nodes.remove(&node);
            }
        }
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.nodes.lock().map(|nodes| nodes.values().map(HashMap::len).sum()).unwrap_or_default()
    }
}

/// A held segment, returned to its table on drop.
#[derive(Debug)]
pub(super) struct SegmentGuard<'a> {
    table: &'a SegmentTable,
    node: NodeId,
    id: PointId,
    segment: u32,
}

impl SegmentGuard<'_> {
    pub(super) const fn segment(&self) -> u32 {
        self.segment
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.node, self.id);
    }
}

/// Reference-counted per-node locks, created on demand and removed once the
/// last holder or waiter lets go.
#[derive(Debug, Default)]
pub(super) struct NodeLocks {
    locks: Mutex<HashMap<NodeId, (Arc<AsyncMutex<()>>, usize)>>,
}

impl NodeLocks {
    pub(super) async fn lock(&self, node: NodeId) -> Result<NodeLockGuard<'_>, OxivecError> {
        let handle = {
            let mut locks = self.locks.lock().map_err(lock_poisoned)?;
            let (handle, refcount) = locks.entry(node).or_insert_with(|| (Arc::new(AsyncMutex::new(())), 0));
            *refcount += 1;
            Arc::clone(handle)
        };

        // The reference is counted from here on, even if this future is
        // dropped while waiting.
        let mut guard = NodeLockGuard { locks: self, node, held: None };
        guard.held = Some(handle.lock_owned().await);
        Ok(guard)
    }

    fn release(&self, node: NodeId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, refcount)) = locks.get_mut(&node) {
            *refcount -= 1;
            if *refcount == 0 {
                locks.remove(&node);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

#[derive(Debug)]
pub(super) struct NodeLockGuard<'a> {
    locks: &'a NodeLocks,
    node: NodeId,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for NodeLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        self.locks.release(self.node);
    }
}
