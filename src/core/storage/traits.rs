// src/core/storage/traits.rs

use crate::core::common::OxivecError;
use crate::core::types::{NodeId, Point, PointId};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::hash::Hash;

/// A keyed get/set/remove/enumerate store.
///
/// Implementations must tolerate concurrent callers working on different
/// keys, including enumeration running alongside writes to other keys.
#[async_trait]
pub trait KeyedStore<K, V>: Send + Sync
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Gets the value stored for `key`, if any.
    async fn get(&self, key: &K) -> Result<Option<V>, OxivecError>;

    /// Inserts or replaces the value for `key`.
    async fn set(&self, key: K, value: V) -> Result<(), OxivecError>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &K) -> Result<(), OxivecError>;

    /// Streams all entries. The order is not guaranteed.
    ///
    /// Entries present for the whole enumeration are yielded exactly once.
    /// Entries written or removed while it runs may or may not be seen.
    fn items(&self) -> BoxStream<'_, Result<(K, V), OxivecError>>;
}

/// A write-once/read-many buffer holding the points of one node while the
/// recursive builder processes it.
///
/// Dropping the store releases whatever it spilled.
#[async_trait]
pub trait RangeStore: Send + Sync {
    /// Appends one point. A failed add leaves every earlier point readable.
    async fn add(&mut self, id: PointId, vector: Vec<f32>) -> Result<(), OxivecError>;

    /// Replays every added point, in insertion order.
    fn points(&self) -> BoxStream<'_, Result<Point, OxivecError>>;

    /// Number of points added so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates the range store for a node about to receive up to `capacity` points.
pub trait RangeStoreFactory: Send + Sync {
    fn create(&self, node: NodeId, capacity: u64) -> Result<Box<dyn RangeStore>, OxivecError>;
}

impl<F> RangeStoreFactory for F
where
    F: Fn(NodeId, u64) -> Result<Box<dyn RangeStore>, OxivecError> + Send + Sync,
{
    fn create(&self, node: NodeId, capacity: u64) -> Result<Box<dyn RangeStore>, OxivecError> {
        self(node, capacity)
    }
}
