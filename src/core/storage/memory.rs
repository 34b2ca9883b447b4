// src/core/storage/memory.rs

use crate::core::common::OxivecError;
use crate::core::storage::traits::{KeyedStore, RangeStore};
use crate::core::types::{NodeId, Point, PointId};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::hash::Hash;

/// In-memory [`KeyedStore`] over a sharded concurrent map.
///
/// [`items`](KeyedStore::items) copies one shard at a time, when the
/// consumer reaches it. Entries present for the whole enumeration are
/// yielded exactly once. Entries written or removed meanwhile show up
/// according to whether their shard was already copied.
pub struct MemoryStore<K, V> {
    data: DashMap<K, V>,
}

impl<K: Eq + Hash, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self { data: DashMap::new() }
    }
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<K: Eq + Hash, V> fmt::Debug for MemoryStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").field("len", &self.data.len()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for MemoryStore<K, V>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { data: iter.into_iter().collect() }
    }
}

#[async_trait]
impl<K, V> KeyedStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, OxivecError> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: K, value: V) -> Result<(), OxivecError> {
        self.data.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<(), OxivecError> {
        self.data.remove(key);
        Ok(())
    }

    fn items(&self) -> BoxStream<'_, Result<(K, V), OxivecError>> {
        // Shard guards are released before anything is yielded.
        stream::iter(self.data.shards())
            .flat_map(|shard| {
                let entries: Vec<(K, V)> =
                    shard.read().iter().map(|(key, value)| (key.clone(), value.get().clone())).collect();
                stream::iter(entries.into_iter().map(Ok))
            })
            .boxed()
    }
}

/// In-memory [`RangeStore`]. Not shared between tasks.
#[derive(Debug, Default)]
pub struct MemoryRangeStore {
    data: Vec<Point>,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory function usable wherever a `RangeStoreFactory` is expected.
    pub fn create(_node: NodeId, capacity: u64) -> Result<Box<dyn RangeStore>, OxivecError> {
        let capacity = usize::try_from(capacity).unwrap_or(usize::MAX).min(1 << 16);
        Ok(Box::new(Self { data: Vec::with_capacity(capacity) }))
    }
}

#[async_trait]
impl RangeStore for MemoryRangeStore {
    async fn add(&mut self, id: PointId, vector: Vec<f32>) -> Result<(), OxivecError> {
        self.data.push((id, vector));
        Ok(())
    }

    fn points(&self) -> BoxStream<'_, Result<Point, OxivecError>> {
        stream::iter(self.data.iter().cloned().map(Ok)).boxed()
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}
