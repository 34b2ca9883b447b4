// src/core/indexing/builder/recursive.rs

//! Depth-first construction over node-local range stores.
//!
//! Each pending node owns a range store with exactly its points. Processing
//! a node reads the store twice, once for statistics and once to move the
//! points into the two child stores, and then drops it. Only the stores of
//! the nodes waiting on the stack are alive at any time.
//!
//! Below the depth where `2n + 1` and `2n + 2` overflow a `NodeId`, nodes
//! are still split, so every point is separated, but their ranges are
//! counted instead of returned: their wrapped ids would collide with
//! shallower nodes.

use super::descriptor::{IndexRange, SplitDescriptor};
use crate::core::common::OxivecError;
use crate::core::indexing::stats::accumulate;
use crate::core::storage::traits::{RangeStore, RangeStoreFactory};
use crate::core::types::{Branch, NodeId, Point, ROOT_NODE};
use futures::stream::{self, Stream, TryStreamExt};
use tracing::{debug, trace, warn};

struct Pending {
    node: NodeId,
    /// Set for nodes whose id wrapped around.
    aliased: bool,
    store: Box<dyn RangeStore>,
}

/// Pull-based builder: every call to [`next_range`](Self::next_range)
/// processes one node and returns its range.
pub struct RecursiveBuilder<F> {
    factory: F,
    stack: Vec<Pending>,
    strict_node_ids: bool,
    aliased: u64,
    overflow_reported: bool,
}

impl<F: RangeStoreFactory> RecursiveBuilder<F> {
    /// Starts a build over the points already held by `root`.
    pub fn new(root: Box<dyn RangeStore>, factory: F) -> Self {
        Self {
            factory,
            stack: vec![Pending { node: ROOT_NODE, aliased: false, store: root }],
            strict_node_ids: false,
            aliased: 0,
            overflow_reported: false,
        }
    }

    /// Makes [`next_range`](Self::next_range) fail with
    /// `OxivecError::NodeIdOverflow` instead of skipping nodes whose id
    /// does not fit in a `NodeId`.
    #[must_use]
    pub fn strict_node_ids(mut self, strict: bool) -> Self {
        self.strict_node_ids = strict;
        self
    }

    /// Loads `points` into a root store created by `factory` and starts a
    /// build over them.
    pub async fn from_stream<S>(points: S, factory: F) -> Result<Self, OxivecError>
    where
        S: Stream<Item = Result<Point, OxivecError>>,
    {
        let mut root = factory.create(ROOT_NODE, 0)?;
        let mut points = std::pin::pin!(points);
        while let Some((id, vector)) = points.try_next().await? {
            root.add(id, vector).await?;
        }
        Ok(Self::new(root, factory))
    }

    /// Number of nodes waiting to be processed.
    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    /// Nodes processed so far whose range was not returned because their id
    /// overflowed.
    pub const fn aliased(&self) -> u64 {
        self.aliased
    }

    /// Processes the next pending node. Returns `None` once the tree is
    /// complete.
    ///
    /// # Errors
    ///
    /// Store errors are returned unchanged. `OxivecError::InvalidVector` is
    /// returned for vectors of mixed sizes and `OxivecError::InvalidInput`
    /// when a node's points cannot be separated, which only happens when
    /// point ids are repeated. In strict mode `OxivecError::NodeIdOverflow`
    /// names the first node whose children have no 64-bit id.
    pub async fn next_range(&mut self) -> Result<Option<IndexRange>, OxivecError> {
        while let Some(Pending { node, aliased, store }) = self.stack.pop() {
            let mut stats = Vec::new();
            {
                let mut points = store.points();
                while let Some((id, vector)) = points.try_next().await? {
                    accumulate(&mut stats, id, &vector)?;
                }
            }

            // Only an empty input leaves a store without points.
            if stats.is_empty() {
                continue;
            }

            let descriptor = SplitDescriptor::from_stats(&stats)?;
            if !descriptor.is_leaf() {
                let low = self.child(node, aliased, Branch::Low)?;
                let high = self.child(node, aliased, Branch::High)?;
                let (low_store, high_store) =
                    self.partition(node, (low.0, high.0), store.as_ref(), &descriptor, stats[0].count).await?;
                self.stack.push(Pending { node: high.0, aliased: high.1, store: high_store });
                self.stack.push(Pending { node: low.0, aliased: low.1, store: low_store });
            }

            if let SplitDescriptor::Degenerate { pivot_id } = descriptor {
                debug!(node, pivot_id, points = stats[0].count, "node holds identical points, splitting by id");
            }
            if aliased {
                self.aliased += 1;
                continue;
            }
            trace!(node, ?descriptor, "range");
            return Ok(Some(IndexRange { node, descriptor }));
        }
        Ok(None)
    }

    /// Id of a child of `node` and whether it is aliased.
    fn child(&mut self, node: NodeId, aliased: bool, branch: Branch) -> Result<(NodeId, bool), OxivecError> {
        if !aliased {
            if let Some(child) = branch.child_of(node) {
                return Ok((child, false));
            }
            if self.strict_node_ids {
                return Err(OxivecError::NodeIdOverflow { node });
            }
            if !std::mem::replace(&mut self.overflow_reported, true) {
                warn!(node, "node ids overflow below this node; deeper ranges are built but not returned");
            }
        }
        Ok((branch.wrapping_child_of(node), true))
    }

    async fn partition(
        &self,
        node: NodeId,
        (low_node, high_node): (NodeId, NodeId),
        store: &dyn RangeStore,
        descriptor: &SplitDescriptor,
        count: u64,
    ) -> Result<(Box<dyn RangeStore>, Box<dyn RangeStore>), OxivecError> {
        let mut low = self.factory.create(low_node, count)?;
        let mut high = self.factory.create(high_node, count)?;

        let mut points = store.points();
        while let Some((id, vector)) = points.try_next().await? {
            match descriptor.route(id, &vector) {
                Some(Branch::Low) => low.add(id, vector).await?,
                _ => high.add(id, vector).await?,
            }
        }

        if low.is_empty() || high.is_empty() {
            return Err(OxivecError::InvalidInput {
                message: format!("points of node {node} cannot be separated; point ids must be unique"),
            });
        }
        Ok((low, high))
    }

    /// Adapts the builder into a stream of ranges.
    pub fn into_stream(self) -> impl Stream<Item = Result<IndexRange, OxivecError>> {
        stream::try_unfold(self, |mut builder| async move {
            Ok(builder.next_range().await?.map(|range| (range, builder)))
        })
    }
}

impl<F> std::fmt::Debug for RecursiveBuilder<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending: Vec<NodeId> = self.stack.iter().map(|pending| pending.node).collect();
        f.debug_struct("RecursiveBuilder")
            .field("pending", &pending)
            .field("aliased", &self.aliased)
            .finish_non_exhaustive()
    }
}
