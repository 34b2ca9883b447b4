// src/core/indexing/memory/search.rs

use super::cursor::Cursor;
use super::MemoryVectorIndex;
use std::fmt;
use std::slice;

/// Lazy result of [`MemoryVectorIndex::find`].
///
/// Leaves are visited as the iterator is driven; dropping it early stops
/// the traversal.
pub struct Find<'a, R, P> {
    index: &'a MemoryVectorIndex<R>,
    cursor: Cursor,
    origin: Vec<f32>,
    predicate: P,
    leaf: slice::Iter<'a, R>,
}

impl<'a, R, P> Find<'a, R, P> {
    pub(super) fn new(index: &'a MemoryVectorIndex<R>, cursor: Cursor, origin: Vec<f32>, predicate: P) -> Self {
        let empty: &'a [R] = &[];
        Self { index, cursor, origin, predicate, leaf: empty.iter() }
    }
}

impl<'a, R, P> Iterator for Find<'a, R, P>
where
    P: FnMut(&R, &[f32]) -> bool,
{
    type Item = &'a R;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for record in self.leaf.by_ref() {
                if (self.predicate)(record, &self.origin) {
                    return Some(record);
                }
            }

            let visit = self.cursor.next_visit(&self.index.entries)?;
            if visit.leaf {
                if let Some(records) = self.index.records.get(&visit.node) {
                    self.leaf = records.iter();
                }
            }
        }
    }
}

impl<R, P> fmt::Debug for Find<'_, R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Find").field("origin", &self.origin).finish_non_exhaustive()
    }
}
