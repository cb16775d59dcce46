//! Property-based tests for [`SyncSet`].
//!
//! # Invariants tested
//!
//! - **Idempotence:** marking every stored record deletes nothing.
//! - **Disjointness:** a record is either marked or a deletion candidate,
//!   never both.
//! - **Guard arithmetic:** the guard trips exactly when more than five
//!   records and more than a fifth of the snapshot are unseen.

use std::collections::BTreeSet;

use munigeo_core::{DeletionGuard, SyncError, SyncSet};
use proptest::prelude::*;

fn snapshot(ids: &BTreeSet<u16>) -> SyncSet<u16, u16> {
    SyncSet::new(ids.iter().copied(), |id: &u16| *id)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Re-running a feed that lists every stored record deletes nothing.
    #[test]
    fn full_feed_deletes_nothing(ids in prop::collection::btree_set(any::<u16>(), 0..200)) {
        let sync = snapshot(&ids);
        for id in &ids {
            sync.mark(id).expect("distinct ids");
        }

        prop_assert!(sync.finalize().expect("nothing unseen").is_empty());
    }

    /// Seen and deletion-candidate sets never overlap.
    #[test]
    fn seen_and_candidates_are_disjoint(
        stored in prop::collection::btree_set(0_u16..500, 0..120),
        feed in prop::collection::btree_set(0_u16..500, 0..120),
    ) {
        let sync = snapshot(&stored);
        for id in &feed {
            sync.mark(id).expect("distinct ids");
        }

        let candidates: BTreeSet<u16> = sync
            .finalize_with(DeletionGuard::disabled())
            .expect("guard disabled")
            .into_iter()
            .collect();

        prop_assert!(candidates.is_disjoint(&feed));
        let expected: BTreeSet<u16> = stored.difference(&feed).copied().collect();
        prop_assert_eq!(candidates, expected);
    }

    /// The default guard follows the absolute and ratio thresholds exactly.
    #[test]
    fn guard_matches_thresholds(total in 0_usize..300, unseen_share in 0_usize..=100) {
        let unseen = total * unseen_share / 100;
        let ids: BTreeSet<u16> = (0..total).map(|n| u16::try_from(n).expect("small")).collect();
        let sync = snapshot(&ids);
        for id in ids.iter().skip(unseen) {
            sync.mark(id).expect("distinct ids");
        }

        let trips = unseen > 5 && unseen * 5 > total;
        match sync.finalize() {
            Ok(candidates) => {
                prop_assert!(!trips);
                prop_assert_eq!(candidates.len(), unseen);
            }
            Err(SyncError::ExcessiveDeletion { candidates, total: reported }) => {
                prop_assert!(trips);
                prop_assert_eq!(candidates, unseen);
                prop_assert_eq!(reported, total);
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
