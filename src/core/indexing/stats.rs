// src/core/indexing/stats.rs

//! Streaming per-dimension statistics used to choose split planes.

use crate::core::common::OxivecError;
use crate::core::types::{NodeId, PointId};
use serde::{Deserialize, Serialize};

/// Running statistics of one dimension over a set of points.
///
/// `m2` is the sum of squared deviations from the mean (variance times
/// count). `id_sum` is wide enough to sum millions of 64-bit ids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f32,
    pub m2: f32,
    pub count: u64,
    pub id_sum: u128,
    pub min: f32,
    pub max: f32,
}

impl Stats {
    /// Statistics of a single value.
    pub const fn first(id: PointId, value: f32) -> Self {
        Self { mean: value, m2: 0.0, count: 1, id_sum: id as u128, min: value, max: value }
    }

    /// Folds one more value in with Welford's update.
    pub fn update(&mut self, id: PointId, value: f32) {
        let count = self.count + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / count as f32;

        self.m2 += delta * (value - mean);
        self.mean = mean;
        self.count = count;
        self.id_sum += u128::from(id);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Combines the statistics of two disjoint point sets.
    ///
    /// The mean is the count-weighted average and `m2` is the plain sum of
    /// both sides; no cross term is added.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let count = self.count + other.count;
        let total = count as f32;

        Self {
            mean: self.count as f32 / total * self.mean + other.count as f32 / total * other.mean,
            m2: self.m2 + other.m2,
            count,
            id_sum: self.id_sum + other.id_sum,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Mean point id, rounded down.
    pub fn mean_id(&self) -> PointId {
        if self.count == 0 {
            return 0;
        }
        PointId::try_from(self.id_sum / u128::from(self.count)).unwrap_or(PointId::MAX)
    }
}

/// Starts or extends the statistics of every dimension of `vector`.
pub fn accumulate(
    stats: &mut Vec<Stats>,
    id: PointId,
    vector: &[f32],
) -> Result<(), OxivecError> {
    if stats.is_empty() {
        if vector.is_empty() {
            return Err(OxivecError::InvalidVector { expected: 0, actual: 0 });
        }
        stats.extend(vector.iter().map(|&value| Stats::first(id, value)));
        return Ok(());
    }

    OxivecError::check_dimension(stats.len(), vector.len())?;
    for (item, &value) in stats.iter_mut().zip(vector) {
        item.update(id, value);
    }
    Ok(())
}

/// Merges `other` into `target` dimension by dimension.
pub fn merge_into(target: &mut [Stats], other: &[Stats]) -> Result<(), OxivecError> {
    OxivecError::check_dimension(target.len(), other.len())?;
    for (item, other) in target.iter_mut().zip(other) {
        *item = item.merge(other);
    }
    Ok(())
}

/// Index of the dimension with the largest `m2`; the lowest index wins ties.
pub fn pick_split(stats: &[Stats]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, item) in stats.iter().enumerate() {
        match best {
            Some((_, m2)) if item.m2 <= m2 => {}
            _ => best = Some((index, item.m2)),
        }
    }
    best.map(|(index, _)| index)
}

/// Key of a statistics entry: one accumulator per node and concurrency segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatsKey {
    pub segment: u32,
    pub node: NodeId,
}
