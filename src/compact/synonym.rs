//! The synonym-table merge.
//!
//! A synonym tag is a list of byte-length-prefixed words, with each length
//! byte XORed with a fixed magic so that it usually lands among printable
//! characters. Merging takes the sorted set union of the word lists; a key
//! held by one input is copied verbatim.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::compact::cursor::{MergeCursor, MergeHeapEntry};
use crate::error::{NaginataError, Result};
use crate::sstable::SSTable;

const MAGIC_XOR_VALUE: u8 = 96;

/// Streaming decoder for a byte-length-prefixed word list.
pub struct ByteLengthPrefixedStringReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteLengthPrefixedStringReader<'a> {
    pub fn new(data: &'a [u8]) -> ByteLengthPrefixedStringReader<'a> {
        ByteLengthPrefixedStringReader { data }
    }

    /// Decode the next word, or `None` at the end of the list.
    pub fn next_word(&mut self) -> Result<Option<&'a [u8]>> {
        let (&len, rest) = match self.data.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        let len = (len ^ MAGIC_XOR_VALUE) as usize;
        if rest.len() < len {
            return Err(NaginataError::corrupt("truncated synonym tag"));
        }
        let (word, rest) = rest.split_at(len);
        self.data = rest;
        Ok(Some(word))
    }
}

/// Append `word` to a byte-length-prefixed list.
fn append_word(out: &mut Vec<u8>, word: &[u8]) {
    out.push(word.len() as u8 ^ MAGIC_XOR_VALUE);
    out.extend_from_slice(word);
}

struct WordStream<'a> {
    reader: ByteLengthPrefixedStringReader<'a>,
    current: &'a [u8],
    source: usize,
}

impl PartialEq for WordStream<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WordStream<'_> {}

impl PartialOrd for WordStream<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WordStream<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour.
        other
            .current
            .cmp(self.current)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merge several byte-length-prefixed word lists into their sorted union.
pub fn union_byte_length_prefixed(tags: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut heap = BinaryHeap::new();
    for (source, tag) in tags.iter().enumerate() {
        let mut reader = ByteLengthPrefixedStringReader::new(tag);
        if let Some(current) = reader.next_word()? {
            heap.push(WordStream {
                reader,
                current,
                source,
            });
        }
    }

    let mut out = Vec::new();
    let mut last_word: Option<Vec<u8>> = None;
    while let Some(mut stream) = heap.pop() {
        if last_word.as_deref() != Some(stream.current) {
            append_word(&mut out, stream.current);
            last_word = Some(stream.current.to_vec());
        }
        if let Some(word) = stream.reader.next_word()? {
            stream.current = word;
            heap.push(stream);
        }
    }
    Ok(out)
}

/// Merge the synonym tables of `inputs` into `out`.
pub fn merge_synonyms(out: &mut SSTable, inputs: Vec<&mut SSTable>) -> Result<()> {
    let mut pq = BinaryHeap::new();
    for (i, table) in inputs.into_iter().enumerate() {
        if table.empty() {
            continue;
        }
        if let Some(cursor) = MergeCursor::new(table, i)? {
            pq.push(MergeHeapEntry(cursor));
        }
    }

    while let Some(entry) = pq.pop() {
        let mut cursor = entry.0;
        let key = cursor.current_key.clone();

        let only_holder = match pq.peek() {
            Some(next) => next.0.current_key != key,
            None => true,
        };
        if only_holder {
            let compressed = cursor.read_tag(true)?;
            out.add(&key, &cursor.current_tag, compressed)?;
            if cursor.next()? {
                pq.push(MergeHeapEntry(cursor));
            }
            continue;
        }

        // Several inputs hold this key: union their word lists. Tags stay
        // alive until every holder has advanced.
        let mut tags: Vec<Vec<u8>> = Vec::new();
        let mut holders: Vec<MergeCursor> = Vec::new();
        loop {
            cursor.read_tag(false)?;
            tags.push(std::mem::take(&mut cursor.current_tag));
            holders.push(cursor);
            let same_key = matches!(pq.peek(), Some(next) if next.0.current_key == key);
            if !same_key {
                break;
            }
            cursor = pq.pop().unwrap().0;
        }

        let tag = union_byte_length_prefixed(&tags)?;
        for mut holder in holders {
            if holder.next()? {
                pq.push(MergeHeapEntry(holder));
            }
        }
        out.add(&key, &tag, false)?;
    }
    Ok(())
}
