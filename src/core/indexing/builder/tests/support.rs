// src/core/indexing/builder/tests/support.rs

use crate::core::common::OxivecError;
use crate::core::indexing::builder::{IndexRange, SplitDescriptor};
use crate::core::storage::memory::{MemoryRangeStore, MemoryStore};
use crate::core::storage::traits::{KeyedStore, RangeStore};
use crate::core::types::{Branch, NodeId, Point, PointId, ROOT_NODE};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn random_points(seed: u64, count: u64, dimension: usize) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|id| (id * 3 + 1, (0..dimension).map(|_| rng.gen_range(-1.0..=1.0)).collect()))
        .collect()
}

/// Unit vectors along each axis, each with its own id.
pub fn basis_vectors(dimension: usize) -> Vec<Point> {
    (0..dimension)
        .map(|axis| {
            let mut vector = vec![0.0; dimension];
            vector[axis] = 1.0;
            (axis as PointId, vector)
        })
        .collect()
}

pub async fn memory_root(points: &[Point]) -> Box<dyn RangeStore> {
    let mut root = MemoryRangeStore::new();
    for (id, vector) in points.iter().cloned() {
        root.add(id, vector).await.unwrap();
    }
    Box::new(root)
}

/// Checks that `ranges` form a complete tree over `points`: node ids are
/// unique, every split sends at least one point each way following its
/// routing rule, and every point ends in a singleton holding its own id.
pub fn check_tree(points: &[Point], ranges: &[IndexRange]) {
    let mut nodes: HashMap<NodeId, SplitDescriptor> = HashMap::new();
    for range in ranges {
        assert!(nodes.insert(range.node, range.descriptor).is_none(), "node {} emitted twice", range.node);
    }

    let mut reached: HashMap<NodeId, Vec<&Point>> = HashMap::new();
    for point in points {
        let (id, vector) = point;
        let mut node = ROOT_NODE;
        for _ in 0..=points.len() {
            reached.entry(node).or_default().push(point);
            let descriptor = nodes.get(&node).unwrap_or_else(|| panic!("point {id} reached missing node {node}"));
            match descriptor.route(*id, vector) {
                None => {
                    assert_eq!(*descriptor, SplitDescriptor::Singleton { id: *id });
                    break;
                }
                Some(branch) => node = branch.child_of(node).unwrap(),
            }
        }
        assert!(matches!(nodes[&node], SplitDescriptor::Singleton { .. }), "point {id} never resolved");
    }

    for (&node, descriptor) in &nodes {
        let members = &reached[&node];
        if descriptor.is_leaf() {
            assert_eq!(members.len(), 1);
            continue;
        }
        let low = Branch::Low.child_of(node).unwrap();
        let high = Branch::High.child_of(node).unwrap();
        let low_ids: HashSet<PointId> = reached[&low].iter().map(|(id, _)| *id).collect();
        let high_ids: HashSet<PointId> = reached[&high].iter().map(|(id, _)| *id).collect();
        assert!(!low_ids.is_empty() && !high_ids.is_empty());
        assert!(low_ids.is_disjoint(&high_ids));
        assert_eq!(low_ids.len() + high_ids.len(), members.len());

        if let SplitDescriptor::Hyperplane { dimension, mid, pivot_id } = *descriptor {
            for (id, vector) in members {
                let value = vector[dimension];
                let goes_low = value < mid || (value == mid && *id <= pivot_id);
                assert_eq!(low_ids.contains(id), goes_low, "point {id} at node {node}");
            }
        }
    }

    let singletons = nodes.values().filter(|d| matches!(d, SplitDescriptor::Singleton { .. })).count();
    assert_eq!(singletons, points.len());
    assert_eq!(nodes.len(), 2 * points.len() - 1);
    assert!(nodes.keys().all(|&node| node == ROOT_NODE || nodes.contains_key(&parent_of(node))));
}

fn parent_of(node: NodeId) -> NodeId {
    (node - 1) / 2
}

/// Checks the published part of a tree over `basis_vectors(dimension)` once
/// node ids overflow. Each split isolates one unit vector, so the tree is a
/// chain `2^k - 1` with a singleton `2^k` hanging off each link. Links up to
/// `u64::MAX` (depth 64) and singletons up to depth 63 have real ids: 128
/// ranges, 63 of them singletons.
pub fn check_published_basis_tree(dimension: usize, ranges: &[IndexRange]) {
    assert!(dimension > 65, "the chain must reach depth 64");
    let nodes: HashMap<NodeId, SplitDescriptor> = ranges.iter().map(|range| (range.node, range.descriptor)).collect();
    assert_eq!(nodes.len(), ranges.len(), "node ids are not unique");
    assert_eq!(nodes.len(), 128);

    assert!(matches!(nodes[&ROOT_NODE], SplitDescriptor::Hyperplane { .. }));
    for depth in 0..=64_u32 {
        let link = ((1_u128 << depth) - 1) as NodeId;
        assert!(!nodes[&link].is_leaf(), "link at depth {depth}");
        if (1..=63).contains(&depth) {
            assert!(nodes[&(link + 1)].is_leaf(), "singleton at depth {depth}");
        }
    }

    let singletons: HashSet<PointId> = nodes
        .values()
        .filter_map(|descriptor| match descriptor {
            SplitDescriptor::Singleton { id } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(singletons.len(), 63);
    assert!(singletons.iter().all(|&id| id < dimension as PointId));
}

/// Range store that counts how many instances are alive.
pub struct CountingStore {
    inner: MemoryRangeStore,
    live: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn factory(
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> impl Fn(NodeId, u64) -> Result<Box<dyn RangeStore>, OxivecError> + Send + Sync {
        move |_, _| {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(Self { inner: MemoryRangeStore::new(), live: Arc::clone(&live) }))
        }
    }
}

impl Drop for CountingStore {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RangeStore for CountingStore {
    async fn add(&mut self, id: PointId, vector: Vec<f32>) -> Result<(), OxivecError> {
        self.inner.add(id, vector).await
    }

    fn points(&self) -> BoxStream<'_, Result<Point, OxivecError>> {
        self.inner.points()
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }
}

/// Keyed store that yields to the scheduler before every operation so that
/// concurrent builder workers interleave.
pub struct YieldingStore<K, V> {
    inner: MemoryStore<K, V>,
}

impl<K: Eq + Hash, V> Default for YieldingStore<K, V> {
    fn default() -> Self {
        Self { inner: MemoryStore::new() }
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for YieldingStore<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { inner: iter.into_iter().collect() }
    }
}

#[async_trait]
impl<K, V> KeyedStore<K, V> for YieldingStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, OxivecError> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: K, value: V) -> Result<(), OxivecError> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &K) -> Result<(), OxivecError> {
        tokio::task::yield_now().await;
        self.inner.remove(key).await
    }

    fn items(&self) -> BoxStream<'_, Result<(K, V), OxivecError>> {
        self.inner
            .items()
            .then(|item| async move {
                tokio::task::yield_now().await;
                item
            })
            .boxed()
    }
}

/// Every entry of a keyed store.
pub async fn collect<K, V, S>(store: &S) -> Vec<V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: KeyedStore<K, V>,
{
    use futures::TryStreamExt;
    store.items().map_ok(|(_, value)| value).try_collect().await.unwrap()
}
