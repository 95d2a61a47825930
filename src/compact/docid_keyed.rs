//! Merging of document-keyed tables (document data and term lists).
//!
//! These tables are keyed by the sort-preserving docid encoding, and docid
//! offsets are disjoint and ascending across inputs, so the merge is a
//! sequential copy of each input in turn. A non-zero offset rewrites the
//! leading docid; any key tail (such as a term name) and the tag are
//! copied untouched.

use crate::compact::cursor::MergeCursor;
use crate::error::{NaginataError, Result};
use crate::sstable::SSTable;
use crate::util::sortable::{pack_uint_preserving_sort, unpack_uint_preserving_sort};
use crate::DocId;

/// Merge the docid-keyed tables of `inputs` into `out`.
pub fn merge_docid_keyed(
    out: &mut SSTable,
    inputs: Vec<&mut SSTable>,
    offsets: &[DocId],
) -> Result<()> {
    for (i, table) in inputs.into_iter().enumerate() {
        let offset = offsets[i];
        if table.empty() {
            continue;
        }
        let table_desc = table
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "input table".to_string());

        let mut cursor = match MergeCursor::new(table, i)? {
            Some(cursor) => cursor,
            None => continue,
        };
        loop {
            let key = if offset != 0 {
                let mut p = &cursor.current_key[..];
                let did = unpack_uint_preserving_sort(&mut p)
                    .map_err(|_| NaginataError::corrupt(format!("bad key in {table_desc}")))?;
                let mut key = Vec::with_capacity(cursor.current_key.len() + 1);
                pack_uint_preserving_sort(&mut key, did + offset);
                key.extend_from_slice(p);
                key
            } else {
                cursor.current_key.clone()
            };
            let compressed = cursor.read_tag(true)?;
            out.add(&key, &cursor.current_tag, compressed)?;
            if !cursor.next()? {
                break;
            }
        }
    }
    Ok(())
}
