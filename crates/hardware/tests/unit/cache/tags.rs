//! LRU tag store under way partitioning.
//!
//! Most tests use a single set so every address competes for the same frames.

use memsim_core::PhysAddr;
use memsim_core::cache::tags::{Evicted, Geometry, Lookup, LruTags, TagStore};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const BLK: u64 = 64;

fn one_set(assoc: usize, requesters: usize) -> LruTags {
    LruTags::new(Geometry::new(BLK * assoc as u64, assoc, BLK).unwrap(), 0, requesters)
}

/// Fills block `n` of `requester`; blocks of different requesters never alias.
fn fill(tags: &mut LruTags, requester: usize, n: u64) -> Option<Evicted> {
    let addr = PhysAddr::new(((requester as u64) << 20) + n * BLK);
    let set = tags.geometry().set_of(addr);
    let pos = tags.find_victim(addr, requester);
    tags.replace(set, pos, addr, requester, 0)
}

fn block_of(requester: usize, n: u64) -> PhysAddr {
    PhysAddr::new(((requester as u64) << 20) + n * BLK)
}

#[test]
fn hits_move_to_the_front_of_the_stack() {
    let mut tags = one_set(4, 1);
    for n in 0..4 {
        assert!(fill(&mut tags, 0, n).is_none());
    }
    // Oldest block sits at the LRU end.
    assert_eq!(tags.lookup(block_of(0, 0), 0), Lookup::Hit { set: 0, pos: 3 });
    tags.touch(0, 3);
    assert_eq!(tags.lookup(block_of(0, 0), 0), Lookup::Hit { set: 0, pos: 0 });

    let evicted = fill(&mut tags, 0, 4).unwrap();
    assert_eq!(evicted.addr, block_of(0, 1));
    assert_eq!(tags.lookup(block_of(0, 1), 0), Lookup::Miss { set: 0 });
}

#[test]
fn max_use_ways_hides_the_lru_end() {
    let mut tags = LruTags::new(Geometry::new(BLK * 4, 4, BLK).unwrap(), 2, 1);
    let _ = fill(&mut tags, 0, 0);
    let _ = fill(&mut tags, 0, 1);
    let evicted = fill(&mut tags, 0, 2).unwrap();
    assert_eq!(evicted.addr, block_of(0, 0));
    assert_eq!(tags.lookup(block_of(0, 2), 0), Lookup::Hit { set: 0, pos: 0 });
    assert_eq!(tags.lookup(block_of(0, 1), 0), Lookup::Hit { set: 0, pos: 1 });
}

#[test]
fn own_blocks_beyond_the_quota_are_hidden() {
    let mut tags = one_set(4, 2);
    for n in 0..3 {
        let _ = fill(&mut tags, 0, n);
    }
    tags.set_quotas(Some(vec![2, 2]));
    // The third most recent block of requester 0 is outside its quota.
    assert_eq!(tags.lookup(block_of(0, 0), 0), Lookup::Hidden { set: 0, pos: 2 });
    assert_eq!(tags.lookup(block_of(0, 2), 0), Lookup::Hit { set: 0, pos: 0 });
    // Blocks owned by another requester stay visible.
    assert_eq!(tags.lookup(block_of(0, 0), 1), Lookup::Hit { set: 0, pos: 2 });
    assert_eq!(tags.probe(block_of(0, 0)), Some((0, 2)));

    tags.set_quotas(None);
    assert_eq!(tags.lookup(block_of(0, 0), 0), Lookup::Hit { set: 0, pos: 2 });
}

#[test]
fn quotas_settle_after_one_requester_floods_the_set() {
    let mut tags = one_set(4, 2);
    tags.set_quotas(Some(vec![3, 1]));
    for n in 0..4 {
        let _ = fill(&mut tags, 0, n);
    }
    assert_eq!(tags.occupancy(0), 4);

    // Below its quota, requester 1 takes the global LRU frame from requester 0.
    let evicted = fill(&mut tags, 1, 0).unwrap();
    assert_eq!(evicted.block.requester, Some(0));
    assert_eq!(tags.interference()[0][1], 1);

    // At its quota it only recycles its own frame.
    for n in 1..10 {
        let evicted = fill(&mut tags, 1, n).unwrap();
        assert_eq!(evicted.block.requester, Some(1));
    }
    for n in 4..10 {
        let evicted = fill(&mut tags, 0, n).unwrap();
        assert_eq!(evicted.block.requester, Some(0));
    }
    assert_eq!((tags.occupancy(0), tags.occupancy(1)), (3, 1));
    assert_eq!(tags.interference()[0][1], 1);
    assert_eq!(tags.interference()[1][0], 0);
}

#[test]
fn requester_without_own_blocks_reclaims_from_an_over_quota_owner() {
    let mut tags = one_set(4, 3);
    for n in 0..3 {
        let _ = fill(&mut tags, 0, n);
    }
    let _ = fill(&mut tags, 1, 0);
    // Requester 0 holds three ways with a quota of one; requester 2 has a quota of zero.
    tags.set_quotas(Some(vec![1, 3, 0]));
    let evicted = fill(&mut tags, 2, 0).unwrap();
    assert_eq!(evicted.block.requester, Some(0));
    assert_eq!(evicted.addr, block_of(0, 0));
}

#[test]
fn invalidated_frame_is_reused_first() {
    let mut tags = one_set(2, 1);
    let _ = fill(&mut tags, 0, 0);
    let _ = fill(&mut tags, 0, 1);
    let old = tags.invalidate(block_of(0, 1)).unwrap();
    assert!(old.valid);
    assert!(tags.invalidate(block_of(0, 1)).is_none());
    assert!(fill(&mut tags, 0, 2).is_none());
    assert_eq!(tags.lookup(block_of(0, 0), 0), Lookup::Hit { set: 0, pos: 1 });
}

#[test]
fn invalidated_frame_stays_within_the_visible_ways() {
    let mut full = one_set(4, 1);
    for n in 0..4 {
        let _ = fill(&mut full, 0, n);
    }
    let frames: Vec<_> = full.frames().into_iter().cloned().collect();
    let mut tags = LruTags::new(Geometry::new(BLK * 4, 4, BLK).unwrap(), 2, 1);
    tags.restore(frames).unwrap();

    let _ = tags.invalidate(block_of(0, 3)).unwrap();
    assert!(fill(&mut tags, 0, 9).is_none());
    assert_eq!(tags.lookup(block_of(0, 9), 0), Lookup::Hit { set: 0, pos: 0 });
    assert_eq!(tags.lookup(block_of(0, 2), 0), Lookup::Hit { set: 0, pos: 1 });
    assert_eq!(tags.probe(block_of(0, 1)), Some((0, 2)));
}

#[test]
fn restore_rejects_a_malformed_set() {
    let mut tags = one_set(2, 1);
    let _ = fill(&mut tags, 0, 0);
    let mut frames: Vec<_> = tags.frames().into_iter().cloned().collect();
    let _ = frames.pop();
    assert!(tags.restore(frames.clone()).is_err());

    let mut duplicated = frames.clone();
    duplicated.push(frames[0].clone());
    assert!(tags.restore(duplicated).is_err());
}

proptest! {
    /// Once a set is full, a requester at or above its quota never grows, and one below
    /// it never grows past the quota.
    #[test]
    fn full_set_never_grows_a_requester_past_its_quota(
        q0 in 1usize..4,
        fills in prop::collection::vec(0usize..2, 8..64),
    ) {
        let assoc = 4;
        let mut tags = one_set(assoc, 2);
        for n in 0..assoc as u64 {
            let _ = fill(&mut tags, 0, n);
        }
        let quotas = vec![q0, assoc - q0];
        tags.set_quotas(Some(quotas.clone()));

        let mut next = [assoc as u64, 0];
        for requester in fills {
            let before = tags.occupancy(requester);
            let _ = fill(&mut tags, requester, next[requester]);
            next[requester] += 1;
            let after = tags.occupancy(requester);
            prop_assert!(after <= before.max(quotas[requester]));
            prop_assert_eq!(tags.occupancy(0) + tags.occupancy(1), assoc);
        }
    }
}
