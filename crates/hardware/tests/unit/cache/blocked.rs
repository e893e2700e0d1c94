//! Blocked-cause latching.
//!
//! A set reports the transition to blocked on its first cause and the transition back
//! only when its last cause is cleared.

use memsim_core::cache::blocked::{BlockedCause, BlockedSet};
use proptest::prelude::*;

fn cause() -> impl Strategy<Value = BlockedCause> {
    prop::sample::select(BlockedCause::ALL.to_vec())
}

proptest! {
    #[test]
    fn unblocks_only_when_every_cause_clears(
        ops in prop::collection::vec((any::<bool>(), cause()), 1..50),
    ) {
        let mut set = BlockedSet::new();
        let mut model = std::collections::BTreeSet::new();
        for (insert, cause) in ops {
            let was_blocked = !model.is_empty();
            if insert {
                let changed = set.insert(cause);
                let _ = model.insert(cause);
                prop_assert_eq!(changed, !was_blocked);
            } else {
                let changed = set.remove(cause);
                let had = model.remove(&cause);
                prop_assert_eq!(changed, had && model.is_empty());
            }
            prop_assert_eq!(set.is_blocked(), !model.is_empty());
            prop_assert_eq!(set.iter().collect::<Vec<_>>(), model.iter().copied().collect::<Vec<_>>());
        }
    }
}

#[test]
fn clearing_an_absent_cause_changes_nothing() {
    let mut set = BlockedSet::new();
    assert!(set.insert(BlockedCause::NoMshrs));
    assert!(!set.remove(BlockedCause::NoTargets));
    assert!(set.is_blocked());
    assert!(set.contains(BlockedCause::NoMshrs));
}

#[test]
fn causes_have_distinct_indices() {
    let mut indices: Vec<_> = BlockedCause::ALL.iter().map(|c| c.index()).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
}
