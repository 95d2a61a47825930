//! Progress and conflict-resolution callbacks for compaction.

/// Observer of a running compaction.
///
/// The driver reports per-table progress through `set_status` and asks
/// `resolve_duplicate_metadata` to pick a winner when several inputs store
/// user metadata under the same key. Both methods have defaults, so an
/// implementation overrides only what it cares about. Observer methods
/// must not fail; compaction never checks them for errors.
pub trait CompactionObserver {
    /// Progress message for the named table. An empty message announces
    /// that work on the table is starting.
    fn set_status(&mut self, _table: &str, _status: &str) {}

    /// Resolve conflicting user-metadata tags stored under `key`.
    ///
    /// `tags` holds at least two entries, in merge order. The default
    /// keeps the first.
    fn resolve_duplicate_metadata(&mut self, _key: &[u8], tags: &[Vec<u8>]) -> Vec<u8> {
        tags[0].clone()
    }
}

/// An observer that ignores progress and keeps first-wins resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl CompactionObserver for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resolution_keeps_first() {
        let mut observer = NullObserver;
        let tags = vec![b"A".to_vec(), b"B".to_vec()];
        assert_eq!(observer.resolve_duplicate_metadata(b"key", &tags), b"A");
    }
}
