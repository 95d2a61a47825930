//! The compaction driver.
//!
//! [`compact`] merges one or more source databases into a single compacted
//! destination, table kind by table kind, renumbering document ids by the
//! per-source offsets. Each table kind dispatches to its merge kernel;
//! the destination is finalised by installing the version file.

pub mod cursor;
pub mod docid_keyed;
pub mod observer;
pub mod position;
pub mod postlist;
pub mod spelling;
pub mod synonym;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::debug;

pub use observer::{CompactionObserver, NullObserver};

use crate::db::Database;
use crate::error::{NaginataError, Result};
use crate::sstable::SSTable;
use crate::storage::DirectoryLock;
use crate::version::{self, TableKind, VersionFile};
use crate::DocId;

/// Smallest accepted block size.
pub const MIN_BLOCK_SIZE: usize = 2048;
/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 65536;
/// Block size used when the requested one is invalid.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// How aggressively to compact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionLevel {
    /// Merge, keeping some slack for future updates.
    Standard,
    /// Merge into maximally full tables.
    Full,
    /// Like `Full`, but also split items as finely as possible.
    Fuller,
}

/// Settings for one compaction run.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Block size recorded for the destination; clamped to a power of two
    /// in `[MIN_BLOCK_SIZE, MAX_BLOCK_SIZE]`, falling back to
    /// [`DEFAULT_BLOCK_SIZE`] when invalid.
    pub block_size: usize,
    /// Compaction aggressiveness.
    pub level: CompactionLevel,
    /// Cascade the postings merge through temporary tables when more than
    /// three inputs are given. Ignored for single-file destinations.
    pub multipass: bool,
    /// Skip syncing destination files. The destination is not durable if
    /// the machine fails before the caller syncs it some other way.
    pub no_sync: bool,
    /// Accept reduced durability while compacting. Temporary multipass
    /// tables are always written in this mode.
    pub dangerous: bool,
    /// Directory for multipass temporaries; defaults to the destination
    /// directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        CompactionConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            level: CompactionLevel::Standard,
            multipass: false,
            no_sync: false,
            dangerous: false,
            temp_dir: None,
        }
    }
}

/// Where the compacted database goes.
#[derive(Debug, Clone, Copy)]
pub enum Destination<'a> {
    /// A database directory holding one file per table plus the version
    /// file.
    Directory(&'a Path),
    /// One file holding every table region followed by the version
    /// region.
    SingleFile(&'a Path),
}

const TABLES: [(TableKind, bool); 6] = [
    // (kind, lazy): lazy tables are only created when an input has them.
    (TableKind::Postlist, false),
    (TableKind::DocData, true),
    (TableKind::TermList, false),
    (TableKind::Position, true),
    (TableKind::Spelling, true),
    (TableKind::Synonym, true),
];

fn clamp_block_size(block_size: usize) -> usize {
    if block_size < MIN_BLOCK_SIZE
        || block_size > MAX_BLOCK_SIZE
        || !block_size.is_power_of_two()
    {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    }
}

/// Merge and compact `sources` into `dest`.
///
/// `offsets[i]` is added to every document id drawn from `sources[i]`;
/// offsets must keep the shifted id ranges disjoint and ascending with
/// input order. `last_docid` is recorded as the highest document id of
/// the destination.
///
/// Sources are read-only; the destination must not be one of them. On
/// error the partially written destination is left on disk and must be
/// treated as corrupt, since its version file was never installed.
pub fn compact(
    dest: Destination<'_>,
    sources: &mut [Database],
    offsets: &[DocId],
    last_docid: DocId,
    config: &CompactionConfig,
    observer: &mut dyn CompactionObserver,
) -> Result<()> {
    if offsets.len() != sources.len() {
        return Err(NaginataError::invalid_argument(format!(
            "{} docid offsets for {} sources",
            offsets.len(),
            sources.len()
        )));
    }

    let block_size = clamp_block_size(config.block_size);
    let single_file = matches!(dest, Destination::SingleFile(_));
    // Multipass needs somewhere to put temporary tables.
    let multipass = config.multipass && !single_file;

    let mut lock: Option<DirectoryLock> = None;
    let mut shared_file: Option<File> = None;
    match dest {
        Destination::Directory(dir) => {
            fs::create_dir_all(dir).map_err(|e| {
                NaginataError::create(format!("{}: {e}", dir.display()))
            })?;
            lock = Some(DirectoryLock::acquire(dir)?);
        }
        Destination::SingleFile(path) => {
            shared_file = Some(version::create_single_file(path)?);
        }
    }

    let mut version = VersionFile::new();
    for db in sources.iter() {
        version.merge_stats(db.version());
    }

    let mut outputs: Vec<SSTable> = Vec::new();
    let mut total_index_bytes: usize = 0;
    let mut prev_file_len: u64 = 0;

    for (kind, lazy) in TABLES {
        let name = kind.name();
        observer.set_status(name, "");

        let mut output_will_exist = !lazy;
        let mut inputs_present = 0usize;
        let mut in_size: u64 = 0; // KiB
        let mut bad_stat = false;
        let mut single_file_in = false;
        for db in sources.iter() {
            if !db.has_table(kind) {
                continue;
            }
            inputs_present += 1;
            output_will_exist = true;
            if db.is_single_file() {
                // Region sizes within a shared file are not visible here.
                single_file_in = true;
            } else {
                match fs::metadata(db.table_path(kind)) {
                    Ok(meta) => in_size += meta.len() / 1024,
                    Err(_) => bad_stat = true,
                }
            }
        }

        // A term list can only be looked up if every document's is there,
        // so one input without the table suppresses the output table.
        if kind == TableKind::TermList && inputs_present != sources.len() {
            if inputs_present != 0 {
                observer.set_status(
                    name,
                    &format!(
                        "{inputs_present} of {} inputs present, so suppressing output",
                        sources.len()
                    ),
                );
                continue;
            }
            output_will_exist = false;
        }

        if !output_will_exist {
            observer.set_status(name, "doesn't exist");
            continue;
        }

        let mut out = match dest {
            Destination::Directory(dir) => SSTable::create(&dir.join(kind.filename()))?,
            Destination::SingleFile(_) => {
                let file = shared_file.as_ref().unwrap().try_clone()?;
                SSTable::create_shared(file)?
            }
        };
        out.set_full_compaction(config.level != CompactionLevel::Standard);
        if config.level == CompactionLevel::Fuller {
            out.set_max_item_size(1);
        }

        let mut inputs: Vec<&mut SSTable> = Vec::new();
        let mut in_offsets: Vec<DocId> = Vec::new();
        for (db, &offset) in sources.iter_mut().zip(offsets) {
            if let Some(table) = db.table_mut(kind) {
                inputs.push(table);
                in_offsets.push(offset);
            }
        }

        match kind {
            TableKind::Postlist => {
                if multipass && inputs.len() > 3 {
                    let dir = match dest {
                        Destination::Directory(dir) => dir,
                        Destination::SingleFile(_) => unreachable!(),
                    };
                    let tmpdir = config.temp_dir.as_deref().unwrap_or(dir);
                    postlist::multimerge_postlists(observer, &mut out, tmpdir, inputs, &in_offsets)?;
                } else {
                    postlist::merge_postlists(observer, &mut out, &in_offsets, inputs)?;
                }
            }
            TableKind::Spelling => spelling::merge_spellings(&mut out, inputs)?,
            TableKind::Synonym => synonym::merge_synonyms(&mut out, inputs)?,
            TableKind::Position => position::merge_positions(&mut out, inputs, &in_offsets)?,
            TableKind::DocData | TableKind::TermList => {
                docid_keyed::merge_docid_keyed(&mut out, inputs, &in_offsets)?
            }
        }

        // Commit as revision 1.
        out.flush_db()?;
        out.commit(1, version.root_mut(kind))?;
        if !config.no_sync {
            out.sync()?;
        }

        total_index_bytes += out.index_size();
        debug!(
            "{name}: index {} bytes for {} entries; total index {} bytes",
            out.index_size(),
            out.index_entries(),
            total_index_bytes
        );

        let mut out_size: u64 = 0; // KiB
        if !bad_stat && !single_file_in {
            match dest {
                Destination::Directory(dir) => {
                    match fs::metadata(dir.join(kind.filename())) {
                        Ok(meta) => out_size = meta.len() / 1024,
                        Err(_) => bad_stat = true,
                    }
                }
                Destination::SingleFile(_) => {
                    let len = shared_file.as_ref().unwrap().metadata()?.len();
                    out_size = (len - prev_file_len) / 1024;
                    prev_file_len = len;
                }
            }
        }

        if bad_stat {
            observer.set_status(name, "Done (couldn't stat all the DB files)");
        } else if single_file_in {
            observer.set_status(name, "Done (table sizes unknown for single file DB input)");
        } else {
            let status = if out_size == in_size {
                format!("Size unchanged ({out_size}K)")
            } else {
                let (delta, mut status) = if out_size < in_size {
                    (in_size - out_size, String::from("Reduced by "))
                } else {
                    (out_size - in_size, String::from("INCREASED by "))
                };
                if in_size != 0 {
                    status += &format!("{}% ", 100 * delta / in_size);
                }
                status += &format!("{delta}K ({in_size}K -> {out_size}K)");
                status
            };
            observer.set_status(name, &status);
        }

        outputs.push(out);
    }

    version.set_last_docid(last_docid);

    match dest {
        Destination::Directory(dir) => {
            // Serialise the version file, sync every table, then install
            // it atomically; the destination only becomes a database once
            // the install lands.
            let tmp = version.write_to_dir(dir, 1)?;
            if !config.no_sync {
                for table in &mut outputs {
                    table.sync()?;
                }
            }
            version.install(dir, &tmp, config.no_sync)?;
        }
        Destination::SingleFile(_) => {
            let file = shared_file.as_mut().unwrap();
            // Pad an (almost) empty output up to one block so the file
            // cannot be mistaken for a stub, then append the version
            // region.
            if file.metadata()?.len() < block_size as u64 {
                file.set_len(block_size as u64)?;
            }
            version.append_to_file(file, 1)?;
            if !config.no_sync {
                file.sync_all()?;
            }
        }
    }

    if let Some(mut lock) = lock {
        lock.release()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::util::varint::{pack_string, pack_uint, pack_uint_last};
    use std::path::Path;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingObserver {
        statuses: Vec<(String, String)>,
    }

    impl CompactionObserver for RecordingObserver {
        fn set_status(&mut self, table: &str, status: &str) {
            self.statuses.push((table.to_string(), status.to_string()));
        }
    }

    struct JoinResolver;

    impl CompactionObserver for JoinResolver {
        fn resolve_duplicate_metadata(&mut self, _key: &[u8], tags: &[Vec<u8>]) -> Vec<u8> {
            let mut joined = Vec::new();
            for (i, tag) in tags.iter().enumerate() {
                if i > 0 {
                    joined.push(b'|');
                }
                joined.extend_from_slice(tag);
            }
            joined
        }
    }

    fn build_db(
        dir: &Path,
        tables: &[(TableKind, Vec<(Vec<u8>, Vec<u8>)>)],
        doc_count: u64,
        last_docid: DocId,
    ) {
        fs::create_dir_all(dir).unwrap();
        let mut version = VersionFile::new();
        version.set_doc_count(doc_count);
        version.set_last_docid(last_docid);
        for (kind, entries) in tables {
            let mut table = SSTable::create(&dir.join(kind.filename())).unwrap();
            for (k, v) in entries {
                table.add(k, v, false).unwrap();
            }
            table.flush_db().unwrap();
            table.commit(1, version.root_mut(*kind)).unwrap();
        }
        let tmp = version.write_to_dir(dir, 1).unwrap();
        version.install(dir, &tmp, true).unwrap();
    }

    fn all_tables_empty() -> Vec<(TableKind, Vec<(Vec<u8>, Vec<u8>)>)> {
        TableKind::ALL.iter().map(|&kind| (kind, Vec::new())).collect()
    }

    fn read_table(db: &mut Database, kind: TableKind) -> Vec<(Vec<u8>, Vec<u8>)> {
        let table = db.table_mut(kind).unwrap();
        let mut items = Vec::new();
        while let Some(item) = table.read_item().unwrap() {
            items.push((item.key, item.value));
        }
        items
    }

    fn initial_chunk_tag(tf: u64, cf: u64, firstdid: DocId, payload: &[u8]) -> Vec<u8> {
        let mut tag = Vec::new();
        pack_uint(&mut tag, tf);
        pack_uint(&mut tag, cf);
        pack_uint(&mut tag, firstdid - 1);
        tag.extend_from_slice(payload);
        tag
    }

    fn valuestats_tag(freq: u64, lbound: &[u8], ubound: &[u8]) -> Vec<u8> {
        let mut tag = Vec::new();
        pack_uint(&mut tag, freq);
        pack_string(&mut tag, lbound);
        if lbound != ubound {
            tag.extend_from_slice(ubound);
        }
        tag
    }

    fn docid_key(did: DocId) -> Vec<u8> {
        let mut key = Vec::new();
        crate::util::sortable::pack_uint_preserving_sort(&mut key, did);
        key
    }

    fn freq_tag(freq: u64) -> Vec<u8> {
        let mut tag = Vec::new();
        pack_uint_last(&mut tag, freq);
        tag
    }

    #[test]
    fn test_clamp_block_size() {
        assert_eq!(clamp_block_size(2048), 2048);
        assert_eq!(clamp_block_size(4096), 4096);
        assert_eq!(clamp_block_size(65536), 65536);
        // Too small, too large, or not a power of two.
        assert_eq!(clamp_block_size(1024), DEFAULT_BLOCK_SIZE);
        assert_eq!(clamp_block_size(131072), DEFAULT_BLOCK_SIZE);
        assert_eq!(clamp_block_size(3000), DEFAULT_BLOCK_SIZE);
        assert_eq!(clamp_block_size(0), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_empty_merge() {
        let root = TempDir::new().unwrap();
        let src1 = root.path().join("src1");
        let src2 = root.path().join("src2");
        build_db(&src1, &all_tables_empty(), 0, 0);
        build_db(&src2, &all_tables_empty(), 0, 0);

        let mut sources = vec![
            Database::open(&src1).unwrap(),
            Database::open(&src2).unwrap(),
        ];
        let dest = root.path().join("dest");
        let mut observer = RecordingObserver::default();
        compact(
            Destination::Directory(&dest),
            &mut sources,
            &[0, 0],
            0,
            &CompactionConfig::default(),
            &mut observer,
        )
        .unwrap();

        let mut merged = Database::open(&dest).unwrap();
        assert_eq!(merged.last_docid(), 0);
        assert_eq!(merged.doc_count(), 0);
        for kind in TableKind::ALL {
            assert!(merged.has_table(kind), "missing {}", kind.name());
            assert!(read_table(&mut merged, kind).is_empty());
        }

        // Every table reported status, and the lock is gone.
        for kind in TableKind::ALL {
            assert!(observer.statuses.iter().any(|(t, _)| t == kind.name()));
        }
        assert!(!dest.join("naginata.lock").exists());
    }

    #[test]
    fn test_offsets_must_match_sources() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        build_db(&src, &all_tables_empty(), 0, 0);

        let mut sources = vec![Database::open(&src).unwrap()];
        let dest = root.path().join("dest");
        match compact(
            Destination::Directory(&dest),
            &mut sources,
            &[0, 0],
            0,
            &CompactionConfig::default(),
            &mut NullObserver,
        ) {
            Err(NaginataError::InvalidArgument(_)) => {}
            other => panic!("expected invalid argument, got {other:?}"),
        }
    }

    #[test]
    fn test_full_merge_with_offsets() {
        let root = TempDir::new().unwrap();
        let src1 = root.path().join("src1");
        let src2 = root.path().join("src2");

        let mut position_key = Vec::new();
        crate::util::sortable::pack_string_preserving_sort(&mut position_key, b"cat", false);
        crate::util::sortable::pack_uint_preserving_sort(&mut position_key, 1);

        build_db(
            &src1,
            &[
                (
                    TableKind::Postlist,
                    vec![
                        (keys::user_metadata_key(b"style"), b"A".to_vec()),
                        (keys::valuestats_key(7), valuestats_tag(3, b"a", b"m")),
                        (keys::postlist_key(b"cat"), initial_chunk_tag(2, 3, 1, b"1xx")),
                    ],
                ),
                (TableKind::DocData, vec![
                    (docid_key(1), b"doc one".to_vec()),
                    (docid_key(2), b"doc two".to_vec()),
                ]),
                (TableKind::TermList, vec![(docid_key(1), b"cat".to_vec())]),
                (TableKind::Position, vec![(position_key.clone(), b"p1".to_vec())]),
                (TableKind::Spelling, vec![(b"Whello".to_vec(), freq_tag(3))]),
                (TableKind::Synonym, vec![]),
            ],
            2,
            2,
        );
        build_db(
            &src2,
            &[
                (
                    TableKind::Postlist,
                    vec![
                        (keys::user_metadata_key(b"style"), b"B".to_vec()),
                        (keys::valuestats_key(7), valuestats_tag(2, b"c", b"z")),
                        (keys::postlist_key(b"cat"), initial_chunk_tag(1, 5, 1, b"1yy")),
                    ],
                ),
                (TableKind::DocData, vec![(docid_key(1), b"doc three".to_vec())]),
                (TableKind::TermList, vec![(docid_key(1), b"cat".to_vec())]),
                (TableKind::Position, vec![(position_key.clone(), b"p2".to_vec())]),
                (TableKind::Spelling, vec![(b"Whello".to_vec(), freq_tag(4))]),
                (TableKind::Synonym, vec![]),
            ],
            1,
            1,
        );

        let mut sources = vec![
            Database::open(&src1).unwrap(),
            Database::open(&src2).unwrap(),
        ];
        let dest = root.path().join("dest");
        compact(
            Destination::Directory(&dest),
            &mut sources,
            &[0, 10],
            11,
            &CompactionConfig::default(),
            &mut NullObserver,
        )
        .unwrap();

        let mut merged = Database::open(&dest).unwrap();
        assert_eq!(merged.doc_count(), 3);
        assert_eq!(merged.last_docid(), 11);

        // Postlist: first-wins metadata, folded value stats, and "cat"
        // rebuilt with summed tf/cf and a fresh chunk sequence.
        let postlist = read_table(&mut merged, TableKind::Postlist);
        assert_eq!(
            postlist,
            vec![
                (keys::user_metadata_key(b"style"), b"A".to_vec()),
                (keys::valuestats_key(7), valuestats_tag(5, b"a", b"z")),
                (keys::postlist_key(b"cat"), initial_chunk_tag(3, 8, 1, b"0xx")),
                (keys::postlist_key_with_did(b"cat", 11), b"1yy".to_vec()),
            ]
        );

        // DocData: second input renumbered past the first.
        let docdata = read_table(&mut merged, TableKind::DocData);
        assert_eq!(
            docdata,
            vec![
                (docid_key(1), b"doc one".to_vec()),
                (docid_key(2), b"doc two".to_vec()),
                (docid_key(11), b"doc three".to_vec()),
            ]
        );

        let termlist = read_table(&mut merged, TableKind::TermList);
        assert_eq!(
            termlist,
            vec![
                (docid_key(1), b"cat".to_vec()),
                (docid_key(11), b"cat".to_vec()),
            ]
        );

        // Positions: both inputs' entries, second shifted.
        let mut shifted_key = Vec::new();
        crate::util::sortable::pack_string_preserving_sort(&mut shifted_key, b"cat", false);
        crate::util::sortable::pack_uint_preserving_sort(&mut shifted_key, 11);
        let positions = read_table(&mut merged, TableKind::Position);
        assert_eq!(
            positions,
            vec![
                (position_key, b"p1".to_vec()),
                (shifted_key, b"p2".to_vec()),
            ]
        );

        // Spelling frequencies summed.
        let spelling = read_table(&mut merged, TableKind::Spelling);
        assert_eq!(spelling, vec![(b"Whello".to_vec(), freq_tag(7))]);
    }

    #[test]
    fn test_metadata_resolver_drives_output() {
        let root = TempDir::new().unwrap();
        let src1 = root.path().join("src1");
        let src2 = root.path().join("src2");
        let key = keys::user_metadata_key(b"note");
        build_db(
            &src1,
            &[(TableKind::Postlist, vec![(key.clone(), b"A".to_vec())]),
              (TableKind::TermList, vec![])],
            0,
            0,
        );
        build_db(
            &src2,
            &[(TableKind::Postlist, vec![(key.clone(), b"B".to_vec())]),
              (TableKind::TermList, vec![])],
            0,
            0,
        );

        let mut sources = vec![
            Database::open(&src1).unwrap(),
            Database::open(&src2).unwrap(),
        ];
        let dest = root.path().join("dest");
        compact(
            Destination::Directory(&dest),
            &mut sources,
            &[0, 0],
            0,
            &CompactionConfig::default(),
            &mut JoinResolver,
        )
        .unwrap();

        let mut merged = Database::open(&dest).unwrap();
        assert_eq!(
            read_table(&mut merged, TableKind::Postlist),
            vec![(key, b"A|B".to_vec())]
        );
    }

    #[test]
    fn test_missing_termlist_suppresses_output() {
        let root = TempDir::new().unwrap();
        let src1 = root.path().join("src1");
        let src2 = root.path().join("src2");
        build_db(
            &src1,
            &[
                (TableKind::Postlist, vec![]),
                (TableKind::TermList, vec![(docid_key(1), b"cat".to_vec())]),
            ],
            1,
            1,
        );
        // src2 has no termlist at all.
        build_db(&src2, &[(TableKind::Postlist, vec![])], 1, 1);

        let mut sources = vec![
            Database::open(&src1).unwrap(),
            Database::open(&src2).unwrap(),
        ];
        let dest = root.path().join("dest");
        let mut observer = RecordingObserver::default();
        compact(
            Destination::Directory(&dest),
            &mut sources,
            &[0, 10],
            11,
            &CompactionConfig::default(),
            &mut observer,
        )
        .unwrap();

        let merged = Database::open(&dest).unwrap();
        assert!(!merged.has_table(TableKind::TermList));
        assert!(!dest.join(TableKind::TermList.filename()).exists());
        assert!(observer
            .statuses
            .iter()
            .any(|(t, s)| t == "termlist" && s.contains("suppressing output")));

        // Lazy tables absent from every input are not created either.
        assert!(!merged.has_table(TableKind::Spelling));
        assert!(observer
            .statuses
            .iter()
            .any(|(t, s)| t == "spelling" && s == "doesn't exist"));
    }

    #[test]
    fn test_multipass_driver_matches_single_pass() {
        let root = TempDir::new().unwrap();

        let mut source_dirs = Vec::new();
        for i in 0..4u64 {
            let dir = root.path().join(format!("src{i}"));
            let term = format!("term{i}");
            build_db(
                &dir,
                &[
                    (
                        TableKind::Postlist,
                        vec![
                            (
                                keys::postlist_key(term.as_bytes()),
                                initial_chunk_tag(1, i + 1, 1, b"1pp"),
                            ),
                            (keys::postlist_key(b"zz"), initial_chunk_tag(2, 2, 1, b"1qq")),
                        ],
                    ),
                    (TableKind::TermList, vec![]),
                ],
                1,
                1,
            );
            source_dirs.push(dir);
        }
        let offsets = [0u64, 100, 200, 300];

        let open_all = |dirs: &[PathBuf]| -> Vec<Database> {
            dirs.iter().map(|d| Database::open(d).unwrap()).collect()
        };

        let single_dest = root.path().join("single");
        let mut sources = open_all(&source_dirs);
        compact(
            Destination::Directory(&single_dest),
            &mut sources,
            &offsets,
            301,
            &CompactionConfig::default(),
            &mut NullObserver,
        )
        .unwrap();

        let multi_dest = root.path().join("multi");
        let tmpdir = TempDir::new().unwrap();
        let mut sources = open_all(&source_dirs);
        compact(
            Destination::Directory(&multi_dest),
            &mut sources,
            &offsets,
            301,
            &CompactionConfig {
                multipass: true,
                temp_dir: Some(tmpdir.path().to_path_buf()),
                ..CompactionConfig::default()
            },
            &mut NullObserver,
        )
        .unwrap();

        let mut single = Database::open(&single_dest).unwrap();
        let mut multi = Database::open(&multi_dest).unwrap();
        assert_eq!(
            read_table(&mut single, TableKind::Postlist),
            read_table(&mut multi, TableKind::Postlist)
        );
        // Multipass temporaries were cleaned up.
        assert_eq!(fs::read_dir(tmpdir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_single_file_empty_padding() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        build_db(&src, &all_tables_empty(), 0, 0);

        let mut sources = vec![Database::open(&src).unwrap()];
        let dest = root.path().join("dest.db");
        compact(
            Destination::SingleFile(&dest),
            &mut sources,
            &[0],
            0,
            &CompactionConfig {
                block_size: 4096,
                ..CompactionConfig::default()
            },
            &mut NullObserver,
        )
        .unwrap();

        // Padded to one block of nulls, then the version region.
        let bytes = fs::read(&dest).unwrap();
        assert!(bytes.len() > 4096);
        assert!(bytes[..4096].iter().all(|&b| b == 0));

        // Reopening identifies a database, not a stub.
        let merged = Database::open(&dest).unwrap();
        assert_eq!(merged.last_docid(), 0);
        assert!(merged.is_single_file());
        for kind in TableKind::ALL {
            assert!(merged.has_table(kind));
        }
    }

    #[test]
    fn test_single_file_round_trips_data() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        build_db(
            &src,
            &[
                (
                    TableKind::Postlist,
                    vec![(keys::postlist_key(b"cat"), initial_chunk_tag(1, 1, 1, b"1xx"))],
                ),
                (TableKind::DocData, vec![(docid_key(1), b"doc".to_vec())]),
                (TableKind::TermList, vec![(docid_key(1), b"cat".to_vec())]),
            ],
            1,
            1,
        );

        let mut sources = vec![Database::open(&src).unwrap()];
        let dest = root.path().join("dest.db");
        compact(
            Destination::SingleFile(&dest),
            &mut sources,
            &[0],
            1,
            &CompactionConfig::default(),
            &mut NullObserver,
        )
        .unwrap();

        let mut merged = Database::open(&dest).unwrap();
        assert_eq!(merged.doc_count(), 1);
        assert_eq!(
            read_table(&mut merged, TableKind::Postlist),
            vec![(keys::postlist_key(b"cat"), initial_chunk_tag(1, 1, 1, b"1xx"))]
        );
        assert_eq!(
            read_table(&mut merged, TableKind::DocData),
            vec![(docid_key(1), b"doc".to_vec())]
        );

        // And a single-file database can be a compaction input again.
        let mut sources = vec![Database::open(&dest).unwrap()];
        let dest2 = root.path().join("dest2");
        let mut observer = RecordingObserver::default();
        compact(
            Destination::Directory(&dest2),
            &mut sources,
            &[0],
            1,
            &CompactionConfig::default(),
            &mut observer,
        )
        .unwrap();

        let mut merged2 = Database::open(&dest2).unwrap();
        assert_eq!(
            read_table(&mut merged2, TableKind::DocData),
            vec![(docid_key(1), b"doc".to_vec())]
        );
        assert!(observer
            .statuses
            .iter()
            .any(|(_, s)| s.contains("single file DB input")));
    }

    #[test]
    fn test_recompaction_is_stable() {
        // Compacting a compacted database with offset 0 reproduces its
        // tables byte for byte.
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        build_db(
            &src,
            &[
                (
                    TableKind::Postlist,
                    vec![
                        (keys::valuestats_key(1), valuestats_tag(2, b"a", b"b")),
                        (keys::postlist_key(b"cat"), initial_chunk_tag(2, 4, 3, b"1xx")),
                    ],
                ),
                (TableKind::TermList, vec![(docid_key(3), b"cat".to_vec())]),
            ],
            1,
            3,
        );

        let dest1 = root.path().join("dest1");
        let mut sources = vec![Database::open(&src).unwrap()];
        compact(
            Destination::Directory(&dest1),
            &mut sources,
            &[0],
            3,
            &CompactionConfig::default(),
            &mut NullObserver,
        )
        .unwrap();

        let dest2 = root.path().join("dest2");
        let mut sources = vec![Database::open(&dest1).unwrap()];
        compact(
            Destination::Directory(&dest2),
            &mut sources,
            &[0],
            3,
            &CompactionConfig::default(),
            &mut NullObserver,
        )
        .unwrap();

        for kind in [TableKind::Postlist, TableKind::TermList] {
            let name = kind.filename();
            assert_eq!(
                fs::read(dest1.join(&name)).unwrap(),
                fs::read(dest2.join(&name)).unwrap(),
                "{name} changed across recompaction"
            );
        }
    }

    #[test]
    fn test_destination_lock_is_exclusive() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        build_db(&src, &all_tables_empty(), 0, 0);

        let dest = root.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        let _held = DirectoryLock::acquire(&dest).unwrap();

        let mut sources = vec![Database::open(&src).unwrap()];
        match compact(
            Destination::Directory(&dest),
            &mut sources,
            &[0],
            0,
            &CompactionConfig::default(),
            &mut NullObserver,
        ) {
            Err(NaginataError::Lock(_)) => {}
            other => panic!("expected lock error, got {other:?}"),
        }
    }
}
