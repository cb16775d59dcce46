//! Identity reconciliation between a stored snapshot and an import pass.
//!
//! A [`SyncSet`] snapshots the existing records of one scope, keyed by a
//! caller-supplied identity function, and tracks which of them were seen
//! while a feed was processed. The seen flags live in a side map owned by the
//! set; records themselves carry no reconciliation state.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use log::{debug, warn};
use thiserror::Error;

/// Errors raised by a [`SyncSet`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The same identity was marked twice in one pass.
    #[error("record {key} was already marked in this pass")]
    DuplicateMark {
        /// Rendered identity of the record.
        key: String,
    },
    /// The destructive-change guard rejected the deletion set.
    #[error("refusing to delete {candidates} of {total} records")]
    ExcessiveDeletion {
        /// Number of unseen records.
        candidates: usize,
        /// Size of the snapshot the pass started from.
        total: usize,
    },
}

/// Thresholds above which a deletion set is treated as a degraded feed.
///
/// Deletion is refused when the candidate count exceeds both the absolute
/// threshold and the given percentage of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionGuard {
    /// Candidates allowed regardless of snapshot size.
    pub min_absolute: usize,
    /// Share of the snapshot, in percent, allowed to disappear.
    pub max_ratio_percent: usize,
}

impl Default for DeletionGuard {
    fn default() -> Self {
        Self {
            min_absolute: 5,
            max_ratio_percent: 20,
        }
    }
}

impl DeletionGuard {
    /// A guard that never trips, for explicit operator re-runs.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            min_absolute: usize::MAX,
            max_ratio_percent: 100,
        }
    }

    /// Whether deleting `candidates` out of `total` must be refused.
    #[must_use]
    pub fn trips(&self, candidates: usize, total: usize) -> bool {
        candidates > self.min_absolute
            && candidates.saturating_mul(100) > total.saturating_mul(self.max_ratio_percent)
    }
}

#[derive(Debug, Clone)]
struct SyncEntry<R> {
    record: R,
    seen: bool,
}

type Identity<R, K> = Box<dyn Fn(&R) -> K + Send + Sync>;

/// Reconciliation state for one import pass over one scope.
///
/// Lookups take a shared lock and may run from many workers at once; marks
/// take the exclusive lock briefly. Marking the same identity twice is a
/// caller error reported as [`SyncError::DuplicateMark`].
///
/// # Examples
/// ```
/// use munigeo_core::SyncSet;
///
/// let sync = SyncSet::new(vec!["a".to_owned(), "b".to_owned()], |r: &String| r.clone());
/// sync.mark(&"a".to_owned())?;
/// sync.mark(&"c".to_owned())?;
///
/// assert_eq!(sync.finalize()?, vec!["b".to_owned()]);
/// # Ok::<(), munigeo_core::SyncError>(())
/// ```
pub struct SyncSet<R, K> {
    identify: Identity<R, K>,
    entries: RwLock<HashMap<K, SyncEntry<R>>>,
    snapshot_len: usize,
}

impl<R, K> SyncSet<R, K> {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, SyncEntry<R>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, K> fmt::Debug for SyncSet<R, K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSet")
            .field("snapshot_len", &self.snapshot_len)
            .field("entries", &self.read().len())
            .finish_non_exhaustive()
    }
}

impl<R, K> SyncSet<R, K>
where
    R: Clone,
    K: Eq + Hash + fmt::Debug,
{
    /// Snapshot `existing`, keyed by `identify`, with every entry unseen.
    pub fn new<I, F>(existing: I, identify: F) -> Self
    where
        I: IntoIterator<Item = R>,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        let mut entries = HashMap::new();
        for record in existing {
            let key = identify(&record);
            if entries
                .insert(key, SyncEntry { record, seen: false })
                .is_some()
            {
                warn!("Snapshot holds more than one record per identity; keeping the last");
            }
        }
        let snapshot_len = entries.len();
        debug!("Reconciliation snapshot holds {snapshot_len} records");
        Self {
            identify: Box::new(identify),
            entries: RwLock::new(entries),
            snapshot_len,
        }
    }

    /// Existing or already-marked record for `key`.
    pub fn lookup(&self, key: &K) -> Option<R> {
        self.read().get(key).map(|entry| entry.record.clone())
    }

    /// Identity of `record` under this set's identity function.
    pub fn identify(&self, record: &R) -> K {
        (self.identify)(record)
    }

    /// Mark `record` as seen, inserting it when it was not in the snapshot.
    ///
    /// The stored copy is replaced by `record`, so deletion candidates and
    /// later lookups see the latest state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateMark`] when the identity was already
    /// marked in this pass.
    pub fn mark(&self, record: &R) -> Result<(), SyncError> {
        let key = self.identify(record);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().seen {
                    return Err(SyncError::DuplicateMark {
                        key: format!("{:?}", occupied.key()),
                    });
                }
                let entry = occupied.get_mut();
                entry.seen = true;
                entry.record = record.clone();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SyncEntry {
                    record: record.clone(),
                    seen: true,
                });
            }
        }
        Ok(())
    }

    /// Whether `key` was marked in this pass.
    pub fn is_seen(&self, key: &K) -> bool {
        self.read().get(key).is_some_and(|entry| entry.seen)
    }

    /// Number of records in the snapshot the pass started from.
    pub const fn snapshot_len(&self) -> usize {
        self.snapshot_len
    }

    /// Number of identities marked so far.
    pub fn seen_count(&self) -> usize {
        self.read().values().filter(|entry| entry.seen).count()
    }

    /// Records still unseen, without applying the guard.
    pub fn unseen(&self) -> Vec<R> {
        self.read()
            .values()
            .filter(|entry| !entry.seen)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Records eligible for deletion under the default guard.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ExcessiveDeletion`] when more than 5 records and
    /// more than 20 % of the snapshot would be deleted.
    pub fn finalize(&self) -> Result<Vec<R>, SyncError> {
        self.finalize_with(DeletionGuard::default())
    }

    /// Records eligible for deletion under `guard`.
    ///
    /// Only decides eligibility; the caller disposes of the records.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ExcessiveDeletion`] when `guard` trips.
    pub fn finalize_with(&self, guard: DeletionGuard) -> Result<Vec<R>, SyncError> {
        let candidates = self.unseen();
        if guard.trips(candidates.len(), self.snapshot_len) {
            warn!(
                "Deletion guard tripped: {} of {} records unseen",
                candidates.len(),
                self.snapshot_len
            );
            return Err(SyncError::ExcessiveDeletion {
                candidates: candidates.len(),
                total: self.snapshot_len,
            });
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;

    fn ids(range: std::ops::Range<u32>) -> Vec<String> {
        range.map(|n| format!("{n:03}")).collect()
    }

    fn set_of(existing: Vec<String>) -> SyncSet<String, String> {
        SyncSet::new(existing, String::clone)
    }

    #[rstest]
    fn unseen_records_become_candidates() {
        let sync = set_of(ids(0..10));
        for id in ids(0..9) {
            sync.mark(&id).expect("mark");
        }

        assert_eq!(sync.finalize().expect("within guard"), vec!["009".to_owned()]);
    }

    #[rstest]
    fn new_identities_are_inserted_as_seen() {
        let sync = set_of(ids(0..2));
        sync.mark(&"new".to_owned()).expect("mark");

        assert!(sync.is_seen(&"new".to_owned()));
        assert_eq!(sync.lookup(&"new".to_owned()), Some("new".to_owned()));
        assert_eq!(sync.snapshot_len(), 2);
    }

    #[rstest]
    fn second_mark_is_rejected() {
        let sync = set_of(ids(0..1));
        sync.mark(&"000".to_owned()).expect("first mark");

        let err = sync.mark(&"000".to_owned()).expect_err("duplicate");

        assert_eq!(err, SyncError::DuplicateMark { key: "\"000\"".to_owned() });
    }

    #[rstest]
    fn new_identity_marked_twice_is_rejected() {
        let sync = set_of(Vec::new());
        sync.mark(&"x".to_owned()).expect("first mark");

        assert!(sync.mark(&"x".to_owned()).is_err());
    }

    #[rstest]
    #[case(10, 6, true)]
    #[case(10, 5, false)]
    #[case(100, 6, false)]
    #[case(100, 21, true)]
    #[case(100, 20, false)]
    #[case(3, 3, false)]
    fn guard_requires_both_thresholds(
        #[case] total: u32,
        #[case] unseen: u32,
        #[case] trips: bool,
    ) {
        let sync = set_of(ids(0..total));
        for id in ids(unseen..total) {
            sync.mark(&id).expect("mark");
        }

        let result = sync.finalize();

        if trips {
            assert_eq!(
                result,
                Err(SyncError::ExcessiveDeletion {
                    candidates: unseen as usize,
                    total: total as usize,
                })
            );
            assert_eq!(sync.unseen().len(), unseen as usize, "records stay intact");
        } else {
            assert_eq!(result.expect("within guard").len(), unseen as usize);
        }
    }

    #[rstest]
    fn disabled_guard_releases_everything() {
        let sync = set_of(ids(0..10));

        assert_eq!(
            sync.finalize_with(DeletionGuard::disabled())
                .expect("guard disabled")
                .len(),
            10
        );
    }

    #[rstest]
    fn debug_output_reports_entry_counts() {
        let sync = set_of(ids(0..3));
        sync.mark(&"new".to_owned()).expect("mark");

        let rendered = format!("{sync:?}");

        assert!(rendered.contains("snapshot_len: 3"), "{rendered}");
        assert!(rendered.contains("entries: 4"), "{rendered}");
    }

    #[rstest]
    fn concurrent_marks_with_distinct_keys_all_land() {
        let sync = Arc::new(set_of(ids(0..64)));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let sync = Arc::clone(&sync);
                thread::spawn(move || {
                    for n in (worker..64).step_by(8) {
                        sync.mark(&format!("{n:03}")).expect("distinct keys");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker finished");
        }

        assert_eq!(sync.seen_count(), 64);
        assert!(sync.finalize().expect("nothing unseen").is_empty());
    }
}
