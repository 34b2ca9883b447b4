// src/core/indexing/memory/hierarchy.rs

//! Diagnostic walk over the node arena.

use super::cursor::Cursor;
use super::MemoryVectorIndex;

/// A node of the index with its reconstructed cell.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyNode<'a, R> {
    pub index: usize,
    pub parent: Option<usize>,
    pub level: usize,
    pub center: Vec<f32>,
    pub half_widths: Vec<f32>,
    /// Records of a leaf; `None` for internal nodes.
    pub records: Option<&'a [R]>,
}

/// Iterator returned by [`MemoryVectorIndex::hierarchy`]. Visits parents
/// before children and low children before high ones.
#[derive(Debug)]
pub struct Hierarchy<'a, R> {
    index: &'a MemoryVectorIndex<R>,
    cursor: Cursor,
}

impl<'a, R> Hierarchy<'a, R> {
    pub(super) fn new(index: &'a MemoryVectorIndex<R>, cursor: Cursor) -> Self {
        Self { index, cursor }
    }
}

impl<'a, R> Iterator for Hierarchy<'a, R> {
    type Item = HierarchyNode<'a, R>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.index;
        let visit = self.cursor.next_visit(&index.entries)?;
        let geometry = self.cursor.geometry();
        let empty: &'a [R] = &[];
        let records = visit.leaf.then(|| index.records.get(&visit.node).map_or(empty, Vec::as_slice));

        Some(HierarchyNode {
            index: visit.node,
            parent: visit.parent,
            level: visit.level,
            center: geometry.centers.clone(),
            half_widths: geometry.widths.clone(),
            records,
        })
    }
}
