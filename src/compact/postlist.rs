//! The postings-table merge.
//!
//! A postings table interleaves four key classes, each with its own merge
//! policy, in a fixed key order: user metadata, value statistics, value
//! chunks, then postings and doclen chunks. The merge consumes each class
//! in turn from a single min-heap of cursors.

use std::collections::BinaryHeap;
use std::path::Path;

use crate::compact::cursor::{PostlistCursor, PostlistHeapEntry};
use crate::compact::observer::CompactionObserver;
use crate::error::{NaginataError, Result};
use crate::keys;
use crate::sstable::SSTable;
use crate::util::sortable::unpack_string_preserving_sort;
use crate::util::varint::{pack_string, pack_uint, unpack_string, unpack_uint};
use crate::version::{RootInfo, TABLE_EXTENSION};
use crate::DocId;

/// Merge the postings tables of `inputs` into `out`.
///
/// `offsets[i]` is added to every document id drawn from `inputs[i]`.
pub fn merge_postlists(
    observer: &mut dyn CompactionObserver,
    out: &mut SSTable,
    offsets: &[DocId],
    inputs: Vec<&mut SSTable>,
) -> Result<()> {
    let mut pq = BinaryHeap::new();
    for (i, table) in inputs.into_iter().enumerate() {
        if table.empty() {
            continue;
        }
        if let Some(cursor) = PostlistCursor::new(table, offsets[i], i)? {
            pq.push(PostlistHeapEntry(cursor));
        }
    }

    let mut last_key: Vec<u8> = Vec::new();

    // Merge user metadata: collect all tags for a key, resolve duplicates
    // through the observer.
    {
        let mut tags: Vec<Vec<u8>> = Vec::new();
        loop {
            match pq.peek() {
                Some(entry) if keys::is_user_metadata_key(&entry.0.key) => {}
                _ => break,
            }
            let mut cursor = pq.pop().unwrap().0;
            if cursor.key != last_key {
                if !tags.is_empty() {
                    emit_metadata(observer, out, &last_key, &tags)?;
                    tags.clear();
                }
                last_key = cursor.key.clone();
            }
            tags.push(std::mem::take(&mut cursor.tag));
            if cursor.next()? {
                pq.push(PostlistHeapEntry(cursor));
            }
        }
        if !tags.is_empty() {
            emit_metadata(observer, out, &last_key, &tags)?;
        }
    }

    // Merge value statistics: sum frequencies, widen bounds.
    {
        let mut freq: u64 = 0;
        let mut lbound: Vec<u8> = Vec::new();
        let mut ubound: Vec<u8> = Vec::new();
        loop {
            match pq.peek() {
                Some(entry) if keys::is_valuestats_key(&entry.0.key) => {}
                _ => break,
            }
            let mut cursor = pq.pop().unwrap().0;
            if cursor.key != last_key {
                // For the first stats key last_key still holds the last
                // metadata key; freq == 0 marks that nothing is pending.
                if freq != 0 {
                    out.add(&last_key, &encode_valuestats(freq, &lbound, &ubound), false)?;
                    freq = 0;
                }
                last_key = cursor.key.clone();
            }

            let (f, l, u) = decode_valuestats(&cursor.tag)?;
            if freq == 0 {
                freq = f;
                lbound = l;
                ubound = u;
            } else {
                freq += f;
                if l < lbound {
                    lbound = l;
                }
                if u > ubound {
                    ubound = u;
                }
            }

            if cursor.next()? {
                pq.push(PostlistHeapEntry(cursor));
            }
        }
        if freq != 0 {
            out.add(&last_key, &encode_valuestats(freq, &lbound, &ubound), false)?;
        }
    }

    // Value chunks pass straight through; the cursor already shifted
    // their docids.
    loop {
        match pq.peek() {
            Some(entry) if keys::is_valuechunk_key(&entry.0.key) => {}
            _ => break,
        }
        let mut cursor = pq.pop().unwrap().0;
        out.add(&cursor.key, &cursor.tag, false)?;
        if cursor.next()? {
            pq.push(PostlistHeapEntry(cursor));
        }
    }

    // Merge postings and doclen chunks: gather every chunk of a term in
    // firstdid order, then re-emit with a fresh initial chunk.
    let mut tf: u64 = 0;
    let mut cf: u64 = 0;
    let mut chunks: Vec<(DocId, Vec<u8>)> = Vec::new();
    loop {
        let mut cursor = match pq.pop() {
            Some(entry) => Some(entry.0),
            None => None,
        };
        if cursor.as_ref().map_or(true, |c| c.key != last_key) {
            if !chunks.is_empty() {
                emit_postlist_term(out, &last_key, tf, cf, &mut chunks)?;
            }
            let fresh = match cursor.take() {
                Some(c) => c,
                None => break,
            };
            tf = 0;
            cf = 0;
            last_key = fresh.key.clone();
            cursor = Some(fresh);
        }
        let mut cursor = cursor.unwrap();
        tf += cursor.tf;
        cf += cursor.cf;
        chunks.push((cursor.firstdid, std::mem::take(&mut cursor.tag)));
        if cursor.next()? {
            pq.push(PostlistHeapEntry(cursor));
        }
    }

    Ok(())
}

fn emit_metadata(
    observer: &mut dyn CompactionObserver,
    out: &mut SSTable,
    key: &[u8],
    tags: &[Vec<u8>],
) -> Result<()> {
    if tags.len() > 1 {
        let resolved = observer.resolve_duplicate_metadata(key, tags);
        out.add(key, &resolved, false)
    } else {
        out.add(key, &tags[0], false)
    }
}

fn encode_valuestats(freq: u64, lbound: &[u8], ubound: &[u8]) -> Vec<u8> {
    let mut value = Vec::new();
    pack_uint(&mut value, freq);
    pack_string(&mut value, lbound);
    // Empty values are never stored or counted, so neither bound can be
    // empty and an elided upper bound is unambiguous.
    if lbound != ubound {
        value.extend_from_slice(ubound);
    }
    value
}

fn decode_valuestats(tag: &[u8]) -> Result<(u64, Vec<u8>, Vec<u8>)> {
    let mut p = tag;
    let freq = unpack_uint(&mut p).map_err(|e| match e {
        NaginataError::Range(_) => {
            NaginataError::range("frequency statistic in value table is too large")
        }
        _ => NaginataError::corrupt("incomplete stats item in value table"),
    })?;
    let lbound = unpack_string(&mut p).map_err(|e| match e {
        NaginataError::Range(_) => NaginataError::range("lower bound in value table is too large"),
        _ => NaginataError::corrupt("incomplete stats item in value table"),
    })?;
    let ubound = if p.is_empty() { lbound.clone() } else { p.to_vec() };
    Ok((freq, lbound, ubound))
}

/// Write out every chunk gathered for one term (or the doclen namespace).
///
/// The first chunk gets the `(tf, cf, firstdid - 1)` header prepended;
/// continuation bytes are rewritten so that exactly the last chunk
/// carries `'1'`.
fn emit_postlist_term(
    out: &mut SSTable,
    key: &[u8],
    tf: u64,
    cf: u64,
    chunks: &mut Vec<(DocId, Vec<u8>)>,
) -> Result<()> {
    let first_did = chunks[0]
        .0
        .checked_sub(1)
        .ok_or_else(|| NaginataError::corrupt("postlist chunk with docid 0"))?;
    let mut first_tag = Vec::new();
    pack_uint(&mut first_tag, tf);
    pack_uint(&mut first_tag, cf);
    pack_uint(&mut first_tag, first_did);

    let is_single = chunks.len() == 1;
    let chunk = &mut chunks[0].1;
    if chunk.is_empty() {
        return Err(NaginataError::corrupt("empty postlist chunk"));
    }
    chunk[0] = if is_single { b'1' } else { b'0' };
    first_tag.extend_from_slice(chunk);
    out.add(key, &first_tag, false)?;

    let term = if keys::is_doclenchunk_key(key) {
        Vec::new()
    } else {
        let mut p = key;
        let term = unpack_string_preserving_sort(&mut p);
        if !p.is_empty() {
            return Err(NaginataError::corrupt("bad postlist chunk key"));
        }
        term
    };

    for i in 1..chunks.len() {
        let last = i + 1 == chunks.len();
        let (did, chunk) = &mut chunks[i];
        if chunk.is_empty() {
            return Err(NaginataError::corrupt("empty postlist chunk"));
        }
        chunk[0] = if last { b'1' } else { b'0' };
        out.add(&keys::postlist_key_with_did(&term, *did), chunk, false)?;
    }

    chunks.clear();
    Ok(())
}

/// Cascaded multi-pass postings merge.
///
/// Consecutive inputs are merged pairwise (the final group takes three
/// when the count is odd) into temporary tables under `tmpdir`, repeating
/// until at most three tables remain, which merge directly into `out`.
/// Temporary tables are written without syncing and deleted as soon as
/// the next pass has consumed them.
pub fn multimerge_postlists(
    observer: &mut dyn CompactionObserver,
    out: &mut SSTable,
    tmpdir: &Path,
    inputs: Vec<&mut SSTable>,
    offsets: &[DocId],
) -> Result<()> {
    if inputs.len() <= 3 {
        return merge_postlists(observer, out, offsets, inputs);
    }

    let mut off: Vec<DocId> = offsets.to_vec();
    let mut pass: u32 = 0;

    // First pass consumes the caller's inputs, which are not ours to
    // delete.
    let mut tmp: Vec<SSTable> = Vec::new();
    {
        let mut rest = inputs;
        let mut newoff: Vec<DocId> = Vec::new();
        let mut consumed = 0;
        while !rest.is_empty() {
            let take = if rest.len() == 3 { 3 } else { 2 };
            let group: Vec<&mut SSTable> = rest.drain(..take).collect();
            let mut table = create_temp_table(tmpdir, pass, newoff.len())?;
            merge_postlists(observer, &mut table, &off[consumed..consumed + take], group)?;
            table.flush_db()?;
            let mut root_info = RootInfo::default();
            table.commit(1, &mut root_info)?;
            tmp.push(table);
            newoff.push(0);
            consumed += take;
        }
        off = newoff;
        pass += 1;
    }

    while tmp.len() > 3 {
        let mut rest = tmp;
        let mut tmpout: Vec<SSTable> = Vec::new();
        let mut newoff: Vec<DocId> = Vec::new();
        let mut consumed = 0;
        while !rest.is_empty() {
            let take = if rest.len() == 3 { 3 } else { 2 };
            let mut group: Vec<SSTable> = rest.drain(..take).collect();
            let mut table = create_temp_table(tmpdir, pass, newoff.len())?;
            merge_postlists(
                observer,
                &mut table,
                &off[consumed..consumed + take],
                group.iter_mut().collect(),
            )?;
            table.flush_db()?;
            let mut root_info = RootInfo::default();
            table.commit(1, &mut root_info)?;
            for spent in group {
                spent.unlink()?;
            }
            tmpout.push(table);
            newoff.push(0);
            consumed += take;
        }
        tmp = tmpout;
        off = newoff;
        pass += 1;
    }

    merge_postlists(observer, out, &off, tmp.iter_mut().collect())?;
    for spent in tmp {
        spent.unlink()?;
    }
    Ok(())
}

fn create_temp_table(tmpdir: &Path, pass: u32, group: usize) -> Result<SSTable> {
    // Temporary tables skip compression and syncing; already-compressed
    // chunks are copied through in compressed form.
    let path = tmpdir.join(format!("tmp{pass}_{group}.{TABLE_EXTENSION}"));
    SSTable::create(&path)
}
