// src/core/indexing/builder/descriptor.rs

//! Split descriptors and the node records emitted by the builders.

use crate::core::common::OxivecError;
use crate::core::indexing::stats::{pick_split, Stats};
use crate::core::types::{Branch, NodeId, PointId};
use serde::{Deserialize, Serialize};

/// How the points of a node are routed to its children.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitDescriptor {
    /// Exactly one point reached the node. It has no children.
    Singleton { id: PointId },
    /// All points of the node are equal. Ids up to `pivot_id` go low.
    Degenerate { pivot_id: PointId },
    /// Points below `mid` in `dimension` go low, as do points equal to
    /// `mid` with an id up to `pivot_id`.
    Hyperplane { dimension: usize, mid: f32, pivot_id: PointId },
}

impl SplitDescriptor {
    /// Derives the descriptor of a node from the statistics of its points.
    ///
    /// Whenever the node holds more than one distinct id, both children of
    /// the returned descriptor receive at least one point.
    pub fn from_stats(stats: &[Stats]) -> Result<Self, OxivecError> {
        let Some(dimension) = pick_split(stats) else {
            return Err(OxivecError::Store("cannot split a node without statistics".to_string()));
        };
        let item = &stats[dimension];
        let pivot_id = item.mean_id();

        if item.count == 1 {
            return Ok(Self::Singleton { id: pivot_id });
        }

        if item.m2 <= 0.0 || !(item.min < item.max) {
            return Ok(Self::Degenerate { pivot_id });
        }

        if item.min < item.mean && item.mean < item.max {
            Ok(Self::Hyperplane { dimension, mid: item.mean, pivot_id })
        } else {
            // The mean rounded onto an end of the range: keep every point at
            // the minimum low so the high side still gets the rest.
            Ok(Self::Hyperplane { dimension, mid: item.min, pivot_id: PointId::MAX })
        }
    }

    /// Side a point goes to, `None` for a singleton.
    ///
    /// A vector too short for the split dimension goes high.
    pub fn route(&self, id: PointId, vector: &[f32]) -> Option<Branch> {
        let low = match *self {
            Self::Singleton { .. } => return None,
            Self::Degenerate { pivot_id } => id <= pivot_id,
            Self::Hyperplane { dimension, mid, pivot_id } => vector
                .get(dimension)
                .is_some_and(|&value| value < mid || (value == mid && id <= pivot_id)),
        };
        Some(if low { Branch::Low } else { Branch::High })
    }

    /// Whether routing needs the point's vector.
    pub const fn needs_vector(&self) -> bool {
        matches!(self, Self::Hyperplane { .. })
    }

    /// Whether the node has no children.
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Singleton { .. })
    }
}

/// One node of a built tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexRange {
    pub node: NodeId,
    #[serde(flatten)]
    pub descriptor: SplitDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::indexing::stats::accumulate;

    fn stats_of(points: &[(PointId, Vec<f32>)]) -> Vec<Stats> {
        let mut stats = Vec::new();
        for (id, vector) in points {
            accumulate(&mut stats, *id, vector).unwrap();
        }
        stats
    }

    #[test]
    fn test_singleton() {
        let descriptor = SplitDescriptor::from_stats(&stats_of(&[(42, vec![0.1, 0.2])])).unwrap();
        assert_eq!(descriptor, SplitDescriptor::Singleton { id: 42 });
        assert!(descriptor.is_leaf());
        assert_eq!(descriptor.route(42, &[0.1, 0.2]), None);
    }

    #[test]
    fn test_hyperplane_uses_widest_dimension() {
        let points = vec![(1, vec![0.0, -1.0]), (2, vec![0.1, 1.0]), (3, vec![0.2, 0.5])];
        let descriptor = SplitDescriptor::from_stats(&stats_of(&points)).unwrap();

        let SplitDescriptor::Hyperplane { dimension, mid, pivot_id } = descriptor else {
            panic!("expected a hyperplane, got {descriptor:?}");
        };
        assert_eq!(dimension, 1);
        assert!((mid - 1.0 / 6.0).abs() < 1e-6);
        assert_eq!(pivot_id, 2);
        assert_eq!(descriptor.route(1, &points[0].1), Some(Branch::Low));
        assert_eq!(descriptor.route(2, &points[1].1), Some(Branch::High));
        assert_eq!(descriptor.route(3, &points[2].1), Some(Branch::High));
        assert!(!descriptor.is_leaf());
    }

    #[test]
    fn test_ties_on_mid_route_by_id() {
        let descriptor = SplitDescriptor::Hyperplane { dimension: 0, mid: 0.5, pivot_id: 10 };
        assert_eq!(descriptor.route(10, &[0.5]), Some(Branch::Low));
        assert_eq!(descriptor.route(11, &[0.5]), Some(Branch::High));
        assert_eq!(descriptor.route(11, &[0.25]), Some(Branch::Low));
        assert_eq!(descriptor.route(0, &[]), Some(Branch::High));
    }

    #[test]
    fn test_identical_points_split_by_id() {
        let points: Vec<_> = (5..9).map(|id| (id, vec![0.3, 0.3])).collect();
        let descriptor = SplitDescriptor::from_stats(&stats_of(&points)).unwrap();

        assert_eq!(descriptor, SplitDescriptor::Degenerate { pivot_id: 6 });
        let low: Vec<_> = points
            .iter()
            .filter(|(id, v)| descriptor.route(*id, v) == Some(Branch::Low))
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(low, vec![5, 6]);
    }

    #[test]
    fn test_mean_on_the_edge_still_separates() {
        // A mean equal to the minimum cannot separate with a strict `<`.
        let stats = vec![Stats { mean: 0.0, m2: 1.0, count: 3, id_sum: 6, min: 0.0, max: 1.0 }];
        let descriptor = SplitDescriptor::from_stats(&stats).unwrap();

        assert_eq!(
            descriptor,
            SplitDescriptor::Hyperplane { dimension: 0, mid: 0.0, pivot_id: PointId::MAX }
        );
        assert_eq!(descriptor.route(7, &[0.0]), Some(Branch::Low));
        assert_eq!(descriptor.route(8, &[1.0]), Some(Branch::High));
    }

    #[test]
    fn test_index_range_json() {
        let range = IndexRange {
            node: 4,
            descriptor: SplitDescriptor::Hyperplane { dimension: 2, mid: 0.5, pivot_id: 9 },
        };
        let json = serde_json::to_value(range).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"node": 4, "kind": "hyperplane", "dimension": 2, "mid": 0.5, "pivot_id": 9})
        );
        assert_eq!(serde_json::from_value::<IndexRange>(json).unwrap(), range);
    }
}
