// src/core/indexing/memory/cursor.rs

//! Stack-driven traversal over the node arena.
//!
//! Cells are never stored. The traversal rebuilds them in a handful of
//! per-dimension arrays: every entered node applies its own interval in its
//! parent's split dimension and leaves a frame behind that restores the
//! parent's interval once the node's subtree is done.

use super::Entry;
use crate::core::types::Branch;

/// Center and half-width of the current cell in every dimension.
#[derive(Debug, Clone)]
pub(super) struct Geometry {
    pub(super) centers: Vec<f32>,
    pub(super) widths: Vec<f32>,
}

impl Geometry {
    /// The root cell `[-1, 1]^dimension`.
    pub(super) fn new(dimension: usize) -> Self {
        Self { centers: vec![0.0; dimension], widths: vec![1.0; dimension] }
    }

    /// Center and half-width of the `branch` child's cell in `dim`.
    pub(super) fn child(&self, dim: usize, branch: Branch) -> (f32, f32) {
        let half = self.widths[dim] / 2.0;
        match branch {
            Branch::Low => (self.centers[dim] - half, half),
            Branch::High => (self.centers[dim] + half, half),
        }
    }

    pub(super) fn descend(&mut self, dim: usize, branch: Branch) {
        let (center, width) = self.child(dim, branch);
        self.centers[dim] = center;
        self.widths[dim] = width;
    }
}

/// The slice of a cell along one dimension.
#[derive(Debug, Clone, Copy)]
struct Interval {
    dim: usize,
    center: f32,
    width: f32,
    lower: f64,
    upper: f64,
}

#[derive(Debug)]
enum Frame {
    Enter { node: usize, parent: Option<usize>, level: usize, bound: f64, interval: Option<Interval> },
    Leave { restore: Option<Interval> },
}

/// A node reached by the cursor.
#[derive(Debug, Clone, Copy)]
pub(super) struct Visit {
    pub(super) node: usize,
    pub(super) parent: Option<usize>,
    pub(super) level: usize,
    pub(super) leaf: bool,
}

#[derive(Debug)]
pub(super) struct Cursor {
    origin: Option<Vec<f32>>,
    radius2: f64,
    geometry: Geometry,
    lower: Vec<f64>,
    upper: Vec<f64>,
    stack: Vec<Frame>,
    path: Vec<usize>,
}

impl Cursor {
    /// Visits every node, leaves included, depth first with low before high.
    pub(super) fn all(dimension: usize, has_root: bool) -> Self {
        Self::start(None, f64::INFINITY, dimension, has_root)
    }

    /// Visits only nodes whose cell may hold a point within `radius` of `origin`.
    pub(super) fn within(origin: &[f32], radius: f32, has_root: bool) -> Self {
        let radius = f64::from(radius);
        Self::start(Some(origin.to_vec()), radius * radius, origin.len(), has_root)
    }

    fn start(origin: Option<Vec<f32>>, radius2: f64, dimension: usize, has_root: bool) -> Self {
        let mut stack = Vec::new();
        if has_root {
            stack.push(Frame::Enter { node: 0, parent: None, level: 0, bound: 0.0, interval: None });
        }
        Self {
            origin,
            radius2,
            geometry: Geometry::new(dimension),
            lower: vec![f64::NEG_INFINITY; dimension],
            upper: vec![f64::INFINITY; dimension],
            stack,
            path: Vec::new(),
        }
    }

    pub(super) fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Nodes from the root down to the last visited node.
    pub(super) fn path(&self) -> &[usize] {
        &self.path
    }

    /// Advances to the next node.
    ///
    /// `entries` may change between calls as long as only nodes on the
    /// current path are modified.
    pub(super) fn next_visit(&mut self, entries: &[Entry]) -> Option<Visit> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Leave { restore } => {
                    if let Some(interval) = restore {
                        self.apply(interval);
                    }
                    self.path.pop();
                }
                Frame::Enter { node, parent, level, bound, interval } => {
                    let restore = interval.map(|interval| {
                        let saved = self.interval(interval.dim);
                        self.apply(interval);
                        saved
                    });
                    self.stack.push(Frame::Leave { restore });
                    self.path.push(node);

                    let entry = entries[node];
                    if entry.is_leaf() {
                        return Some(Visit { node, parent, level, leaf: true });
                    }

                    let dim = level % self.geometry.centers.len();
                    for (branch, child) in [(Branch::High, entry.high), (Branch::Low, entry.low)] {
                        let Some(child) = child else { continue };
                        let interval = self.child_interval(dim, branch);
                        let bound = self.child_bound(bound, interval);
                        if bound <= self.radius2 {
                            self.stack.push(Frame::Enter {
                                node: child,
                                parent: Some(node),
                                level: level + 1,
                                bound,
                                interval: Some(interval),
                            });
                        }
                    }
                    return Some(Visit { node, parent, level, leaf: false });
                }
            }
        }
        None
    }

    fn interval(&self, dim: usize) -> Interval {
        Interval {
            dim,
            center: self.geometry.centers[dim],
            width: self.geometry.widths[dim],
            lower: self.lower[dim],
            upper: self.upper[dim],
        }
    }

    fn apply(&mut self, interval: Interval) {
        let dim = interval.dim;
        self.geometry.centers[dim] = interval.center;
        self.geometry.widths[dim] = interval.width;
        self.lower[dim] = interval.lower;
        self.upper[dim] = interval.upper;
    }

    fn child_interval(&self, dim: usize, branch: Branch) -> Interval {
        let split = f64::from(self.geometry.centers[dim]);
        let (center, width) = self.geometry.child(dim, branch);
        let (lower, upper) = match branch {
            Branch::Low => (self.lower[dim], split),
            Branch::High => (split, self.upper[dim]),
        };
        Interval { dim, center, width, lower, upper }
    }

    /// Squared-distance bound of a child: the parent's bound with the gap
    /// along the split dimension replaced by the gap to the child's interval.
    fn child_bound(&self, bound: f64, child: Interval) -> f64 {
        let Some(origin) = &self.origin else {
            return bound;
        };
        let value = f64::from(origin[child.dim]);
        let before = gap(value, self.lower[child.dim], self.upper[child.dim]);
        let after = gap(value, child.lower, child.upper);
        bound - before * before + after * after
    }
}

fn gap(value: f64, lower: f64, upper: f64) -> f64 {
    if value < lower {
        lower - value
    } else if value > upper {
        value - upper
    } else {
        0.0
    }
}
