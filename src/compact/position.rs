//! The position-table merge.
//!
//! Position cursors already rebuild their keys with shifted docids, so the
//! merge is a plain heap passthrough.

use std::collections::BinaryHeap;

use crate::compact::cursor::{PositionCursor, PositionHeapEntry};
use crate::error::Result;
use crate::sstable::SSTable;
use crate::DocId;

/// Merge the position tables of `inputs` into `out`.
pub fn merge_positions(
    out: &mut SSTable,
    inputs: Vec<&mut SSTable>,
    offsets: &[DocId],
) -> Result<()> {
    let mut pq = BinaryHeap::new();
    for (i, table) in inputs.into_iter().enumerate() {
        if table.empty() {
            continue;
        }
        if let Some(cursor) = PositionCursor::new(table, offsets[i], i)? {
            pq.push(PositionHeapEntry(cursor));
        }
    }

    while let Some(entry) = pq.pop() {
        let mut cursor = entry.0;
        out.add(&cursor.key, cursor.tag(), false)?;
        if cursor.next()? {
            pq.push(PositionHeapEntry(cursor));
        }
    }
    Ok(())
}
