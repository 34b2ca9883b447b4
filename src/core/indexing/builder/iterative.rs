// src/core/indexing/builder/iterative.rs

//! Breadth-oriented construction over keyed stores.
//!
//! Points never move. A `point -> node` mapping is refined wave by wave:
//! each wave gathers statistics for every node still holding more than one
//! point, derives the nodes' ranges and moves every unresolved point one
//! level down. A point leaves the mapping once it is alone in its node.
//!
//! Every pass runs its store operations through `try_for_each_concurrent`,
//! which polls them on the task awaiting [`IterativeBuilder::build`]. They
//! overlap whenever store operations suspend; with stores that never
//! suspend they run one after another.

use super::coordination::BuildContext;
use super::descriptor::{IndexRange, SplitDescriptor};
use crate::core::common::OxivecError;
use crate::core::config::Config;
use crate::core::indexing::stats::{accumulate, merge_into, Stats, StatsKey};
use crate::core::storage::traits::KeyedStore;
use crate::core::types::{NodeId, PointId, ROOT_NODE};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tracing::{debug, info, trace, warn};

/// Counters of a finished build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub waves: u64,
    /// Nodes split or resolved, including aliased ones.
    pub ranges: u64,
    pub singletons: u64,
    pub degenerate: u64,
    /// Nodes below the 64-bit id limit, built but not written to the ranges
    /// store.
    pub aliased: u64,
    /// Statistics segments folded into another one because concurrent
    /// updates of the same node overlapped.
    pub segment_merges: u64,
}

/// Builds a tree with up to `parallelism` store operations in flight per
/// pass, all driven by the calling task.
#[derive(Debug, Clone)]
pub struct IterativeBuilder {
    parallelism: usize,
    strict_node_ids: bool,
}

impl IterativeBuilder {
    pub fn new(config: &Config) -> Result<Self, OxivecError> {
        config.validate()?;
        Ok(Self { parallelism: config.parallelism, strict_node_ids: config.strict_node_ids })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Builds the tree of `points` into `ranges`.
    ///
    /// `ranges`, `point_nodes` and `stats` should start empty. On success
    /// `point_nodes` and `stats` are empty again and `ranges` holds one
    /// entry per node with a 64-bit id.
    ///
    /// # Errors
    ///
    /// Store errors are returned unchanged. `OxivecError::InvalidVector` is
    /// returned for vectors of mixed sizes. `OxivecError::NodeIdOverflow` is
    /// returned in strict mode once node ids overflow, and otherwise if two
    /// overflowed ids of one wave collide.
    pub async fn build<P, G, M, S>(
        &self,
        points: &P,
        ranges: &G,
        point_nodes: &M,
        stats: &S,
    ) -> Result<BuildSummary, OxivecError>
    where
        P: KeyedStore<PointId, Vec<f32>> + ?Sized,
        G: KeyedStore<NodeId, IndexRange> + ?Sized,
        M: KeyedStore<PointId, NodeId> + ?Sized,
        S: KeyedStore<StatsKey, Vec<Stats>> + ?Sized,
    {
        let context = BuildContext::default();
        let context = &context;
        let limit = self.parallelism;

        points
            .items()
            .try_for_each_concurrent(limit, move |(id, _)| async move {
                point_nodes.set(id, ROOT_NODE).await?;
                context.unresolved.fetch_add(1, Ordering::AcqRel);
                Ok::<(), OxivecError>(())
            })
            .await?;

        let mut waves = 0;
        while context.unresolved() > 0 {
            waves += 1;
            context.multi_segment.store(false, Ordering::Release);

            Self::collect_stats(limit, context, points, point_nodes, stats).await?;
            if context.multi_segment.load(Ordering::Acquire) {
                Self::merge_segments(limit, context, stats).await?;
            }
            Self::emit_ranges(limit, context, ranges, point_nodes, stats).await?;

            info!(
                wave = waves,
                unresolved = context.unresolved(),
                ranges = context.ranges.load(Ordering::Acquire),
                "wave complete"
            );

            if context.unresolved() == 0 {
                break;
            }
            Self::descend(limit, self.strict_node_ids, context, points, ranges, point_nodes).await?;
            context.aliased.advance()?;
        }

        let summary = BuildSummary {
            waves,
            ranges: context.ranges.load(Ordering::Acquire),
            singletons: context.singletons.load(Ordering::Acquire),
            degenerate: context.degenerate.load(Ordering::Acquire),
            aliased: context.aliased_ranges.load(Ordering::Acquire),
            segment_merges: context.segment_merges.load(Ordering::Acquire),
        };
        info!(?summary, "iterative build finished");
        Ok(summary)
    }

    /// Folds every unresolved point into the statistics of its node.
    async fn collect_stats<P, M, S>(
        limit: usize,
        context: &BuildContext,
        points: &P,
        point_nodes: &M,
        stats: &S,
    ) -> Result<(), OxivecError>
    where
        P: KeyedStore<PointId, Vec<f32>> + ?Sized,
        M: KeyedStore<PointId, NodeId> + ?Sized,
        S: KeyedStore<StatsKey, Vec<Stats>> + ?Sized,
    {
        point_nodes
            .items()
            .try_for_each_concurrent(limit, move |(id, node)| async move {
                let segment = context.segments.acquire(node, id)?;
                if segment.segment() > 0 {
                    context.multi_segment.store(true, Ordering::Release);
                }

                let vector = points.get(&id).await?.ok_or_else(|| missing_point(id))?;
                let key = StatsKey { segment: segment.segment(), node };
                let mut item = stats.get(&key).await?.unwrap_or_default();
                accumulate(&mut item, id, &vector)?;
                stats.set(key, item).await
            })
            .await
    }

    /// Folds every non-zero segment into segment zero of its node.
    async fn merge_segments<S>(limit: usize, context: &BuildContext, stats: &S) -> Result<(), OxivecError>
    where
        S: KeyedStore<StatsKey, Vec<Stats>> + ?Sized,
    {
        stats
            .items()
            .try_for_each_concurrent(limit, move |(key, item)| async move {
                if key.segment == 0 {
                    return Ok(());
                }

                let _lock = context.locks.lock(key.node).await?;
                let group_key = StatsKey { segment: 0, node: key.node };
                let group = match stats.get(&group_key).await? {
                    Some(mut group) => {
                        merge_into(&mut group, &item)?;
                        group
                    }
                    None => item,
                };
                stats.set(group_key, group).await?;
                context.segment_merges.fetch_add(1, Ordering::AcqRel);
                stats.remove(&key).await
            })
            .await
    }

    /// Turns the statistics of every node into its range.
    async fn emit_ranges<G, M, S>(
        limit: usize,
        context: &BuildContext,
        ranges: &G,
        point_nodes: &M,
        stats: &S,
    ) -> Result<(), OxivecError>
    where
        G: KeyedStore<NodeId, IndexRange> + ?Sized,
        M: KeyedStore<PointId, NodeId> + ?Sized,
        S: KeyedStore<StatsKey, Vec<Stats>> + ?Sized,
    {
        stats
            .items()
            .try_for_each_concurrent(limit, move |(key, item)| async move {
                let node = key.node;
                let descriptor = SplitDescriptor::from_stats(&item)?;
                if context.aliased.contains(node)? {
                    context.aliased.set_descriptor(node, descriptor)?;
                    context.aliased_ranges.fetch_add(1, Ordering::AcqRel);
                } else {
                    ranges.set(node, IndexRange { node, descriptor }).await?;
                }

                match descriptor {
                    SplitDescriptor::Singleton { id } => {
                        point_nodes.remove(&id).await?;
                        context.unresolved.fetch_sub(1, Ordering::AcqRel);
                        context.singletons.fetch_add(1, Ordering::AcqRel);
                    }
                    SplitDescriptor::Degenerate { pivot_id } => {
                        debug!(node, pivot_id, "node holds identical points, splitting by id");
                        context.degenerate.fetch_add(1, Ordering::AcqRel);
                    }
                    SplitDescriptor::Hyperplane { .. } => {}
                }
                trace!(node, ?descriptor, "range");
                context.ranges.fetch_add(1, Ordering::AcqRel);

                stats.remove(&key).await
            })
            .await
    }

    /// Moves every unresolved point to the child of its node it routes to.
    async fn descend<P, G, M>(
        limit: usize,
        strict: bool,
        context: &BuildContext,
        points: &P,
        ranges: &G,
        point_nodes: &M,
    ) -> Result<(), OxivecError>
    where
        P: KeyedStore<PointId, Vec<f32>> + ?Sized,
        G: KeyedStore<NodeId, IndexRange> + ?Sized,
        M: KeyedStore<PointId, NodeId> + ?Sized,
    {
        point_nodes
            .items()
            .try_for_each_concurrent(limit, move |(id, node)| async move {
                let aliased = context.aliased.contains(node)?;
                let descriptor = if aliased {
                    context.aliased.descriptor(node)?
                } else {
                    ranges.get(&node).await?.map(|range| range.descriptor)
                };
                let descriptor = descriptor.ok_or_else(|| OxivecError::Store(format!("node {node} has no range")))?;

                let vector = if descriptor.needs_vector() {
                    points.get(&id).await?.ok_or_else(|| missing_point(id))?
                } else {
                    Vec::new()
                };

                let branch = descriptor.route(id, &vector).ok_or_else(|| {
                    OxivecError::Store(format!("point {id} is still mapped to singleton node {node}"))
                })?;

                let child = match branch.child_of(node) {
                    Some(child) if !aliased => child,
                    _ if strict => return Err(OxivecError::NodeIdOverflow { node }),
                    _ => {
                        let child = branch.wrapping_child_of(node);
                        context.aliased.claim(child, node, branch)?;
                        if !aliased && !context.overflow_reported.swap(true, Ordering::AcqRel) {
                            warn!(node, "node ids overflow below this node; deeper ranges are built but not stored");
                        }
                        child
                    }
                };
                point_nodes.set(id, child).await
            })
            .await
    }
}

fn missing_point(id: PointId) -> OxivecError {
    OxivecError::InvalidInput { message: format!("point {id} is mapped but missing from the point store") }
}
