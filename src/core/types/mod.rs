// src/core/types/mod.rs

//! Identifiers and small value types shared by the stores and the builders.

use serde::{Deserialize, Serialize};

/// Caller-assigned point identifier.
pub type PointId = u64;

/// Node identifier in a built partition tree.
///
/// Children of node `n` are `2n + 1` (low) and `2n + 2` (high). Ids stop
/// fitting in 64 bits around depth 64; see [`Branch::child_of`].
pub type NodeId = u64;

/// Id of the root node of a built tree.
pub const ROOT_NODE: NodeId = 0;

/// A point as it flows through the builders.
pub type Point = (PointId, Vec<f32>);

/// Which side of a split a point is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    Low,
    High,
}

impl Branch {
    /// Id of the child of `node` on this side, or `None` when it does not
    /// fit in a [`NodeId`].
    #[must_use]
    pub const fn child_of(self, node: NodeId) -> Option<NodeId> {
        match node.checked_mul(2) {
            Some(doubled) => doubled.checked_add(self.offset()),
            None => None,
        }
    }

    /// Child id reduced modulo 2^64. Distinct nodes may share a wrapped id,
    /// so the result is only meaningful next to its parent.
    #[must_use]
    pub const fn wrapping_child_of(self, node: NodeId) -> NodeId {
        node.wrapping_mul(2).wrapping_add(self.offset())
    }

    const fn offset(self) -> NodeId {
        match self {
            Self::Low => 1,
            Self::High => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_ids() {
        assert_eq!(Branch::Low.child_of(ROOT_NODE), Some(1));
        assert_eq!(Branch::High.child_of(ROOT_NODE), Some(2));
        assert_eq!(Branch::Low.child_of(2), Some(5));
        assert_eq!(Branch::High.child_of(2), Some(6));
    }

    #[test]
    fn test_child_ids_report_overflow() {
        let last_full = (1_u64 << 63) - 1;
        assert_eq!(Branch::Low.child_of(last_full), Some(u64::MAX));
        assert_eq!(Branch::High.child_of(last_full), None);
        assert_eq!(Branch::Low.child_of(u64::MAX), None);
        assert_eq!(Branch::High.child_of(1 << 63), None);
    }

    #[test]
    fn test_wrapped_child_ids_collide() {
        assert_eq!(Branch::High.wrapping_child_of((1 << 63) - 1), 0);
        assert_eq!(Branch::Low.wrapping_child_of(u64::MAX), u64::MAX);
        // Nodes 2^63 and 0 wrap onto the same children.
        assert_eq!(Branch::Low.wrapping_child_of(1 << 63), Branch::Low.wrapping_child_of(ROOT_NODE));
    }
}
