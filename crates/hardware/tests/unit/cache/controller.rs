//! Cache controller behaviour with hand-driven sends and fills.

use memsim_core::PhysAddr;
use memsim_core::cache::blocked::BlockedCause;
use memsim_core::cache::coherence::UniCoherence;
use memsim_core::cache::miss::{BlockingBuffer, BufferKind, MissHandling, MissQueue};
use memsim_core::cache::tags::{Geometry, LruTags};
use memsim_core::cache::{AccessOutcome, CacheController, CacheId, CacheParams, FillResult};
use memsim_core::request::{Holder, MemCmd, MemRequest, ReqId, RequestArena};
use memsim_core::Tick;
use pretty_assertions::assert_eq;

fn params(top_level: bool, write_allocate: bool, requesters: usize) -> CacheParams {
    CacheParams {
        hit_latency: 2,
        write_allocate,
        fill_bus_width: 8,
        top_level,
        requesters,
    }
}

/// Four-set, two-way cache with the given MSHR shape.
fn cache(mshrs: usize, max_targets: usize, write_buffers: usize) -> CacheController {
    CacheController::from_parts(
        CacheId::l1(0),
        Box::new(LruTags::new(Geometry::new(8 * 64, 2, 64).unwrap(), 0, 2)),
        Box::new(MissQueue::new(mshrs, 0, max_targets, write_buffers).unwrap()),
        Box::new(UniCoherence),
        params(true, true, 2),
    )
}

fn issue(arena: &mut RequestArena, cmd: MemCmd, addr: u64, requester: usize) -> ReqId {
    arena.insert(MemRequest::new(cmd, PhysAddr::new(addr), 8, requester, 0), Holder::Issuer)
}

/// Sends the next packet, which must be a fetch, and fills it at `now`.
fn fetch_and_fill(cache: &mut CacheController, arena: &mut RequestArena, now: Tick) -> FillResult {
    let (slot, packet) = cache.peek_send().unwrap();
    assert_eq!(slot.kind, BufferKind::Miss);
    let _ = cache.take_send(arena, slot, Holder::Interconnect, now).unwrap();
    let result = cache.handle_fill(arena, packet, now, None).unwrap();
    let _ = arena.release(packet, Holder::Interconnect).unwrap();
    result
}

#[test]
fn fill_turns_later_accesses_into_hits() {
    let mut arena = RequestArena::new();
    let mut l1 = cache(2, 2, 2);
    let r = issue(&mut arena, MemCmd::Read, 0x100, 0);
    assert_eq!(l1.access(&mut arena, r, 0).unwrap(), AccessOutcome::Miss);
    let fill = fetch_and_fill(&mut l1, &mut arena, 20);
    assert_eq!(fill.responses, vec![(r, 22)]);
    assert_eq!(fill.evicted, None);

    let again = issue(&mut arena, MemCmd::Write, 0x108, 0);
    assert_eq!(
        l1.access(&mut arena, again, 30).unwrap(),
        AccessOutcome::Hit { ready_at: 32, respond: true }
    );
    let stats = l1.stats(30);
    assert_eq!((stats.hits, stats.misses, stats.fills), (1, 1, 1));
    assert!(l1.is_idle());
}

#[test]
fn full_target_list_blocks_until_the_fill() {
    let mut arena = RequestArena::new();
    let mut l1 = cache(2, 2, 2);
    let a = issue(&mut arena, MemCmd::Read, 0x200, 0);
    let b = issue(&mut arena, MemCmd::Read, 0x208, 0);
    let c = issue(&mut arena, MemCmd::Read, 0x400, 0);
    assert_eq!(l1.access(&mut arena, a, 0).unwrap(), AccessOutcome::Miss);
    assert_eq!(l1.access(&mut arena, b, 1).unwrap(), AccessOutcome::MshrHit);
    assert!(l1.blocked().contains(BlockedCause::NoTargets));

    // Even an unrelated access is refused while blocked.
    assert_eq!(
        l1.access(&mut arena, c, 2).unwrap(),
        AccessOutcome::Blocked(BlockedCause::NoTargets)
    );
    assert!(arena.is_held_by(c, Holder::Issuer));
    assert!(!arena.is_held_by(c, Holder::Target));

    let fill = fetch_and_fill(&mut l1, &mut arena, 10);
    assert_eq!(fill.responses.len(), 2);
    assert!(!l1.is_blocked());
    assert_eq!(l1.access(&mut arena, c, 11).unwrap(), AccessOutcome::Miss);
    assert_eq!(l1.stats(11).blocked_rejections, 1);
}

#[test]
fn exhausted_mshrs_refuse_new_misses() {
    let mut arena = RequestArena::new();
    let mut l1 = cache(1, 4, 2);
    let a = issue(&mut arena, MemCmd::Read, 0x000, 0);
    let b = issue(&mut arena, MemCmd::Read, 0x040, 0);
    assert_eq!(l1.access(&mut arena, a, 0).unwrap(), AccessOutcome::Miss);
    assert!(l1.blocked().contains(BlockedCause::NoMshrs));
    assert_eq!(
        l1.access(&mut arena, b, 1).unwrap(),
        AccessOutcome::Blocked(BlockedCause::NoMshrs)
    );
    let _ = fetch_and_fill(&mut l1, &mut arena, 5);
    assert!(!l1.is_blocked());
}

#[test]
fn write_miss_without_allocation_goes_to_the_write_buffer() {
    let mut arena = RequestArena::new();
    let mut l1 = CacheController::from_parts(
        CacheId::l1(0),
        Box::new(LruTags::new(Geometry::new(8 * 64, 2, 64).unwrap(), 0, 1)),
        Box::new(MissQueue::new(2, 0, 2, 1).unwrap()),
        Box::new(UniCoherence),
        params(true, false, 1),
    );
    let w = issue(&mut arena, MemCmd::Write, 0x300, 0);
    assert_eq!(
        l1.access(&mut arena, w, 4).unwrap(),
        AccessOutcome::WriteBuffered { ready_at: 6, respond: true }
    );
    assert!(l1.blocked().contains(BlockedCause::NoWbBuffers));
    assert_eq!(l1.miss_handling().outstanding(), 1);

    let (slot, packet) = l1.peek_send().unwrap();
    assert_eq!(slot.kind, BufferKind::Write);
    assert_eq!(arena.get(packet).unwrap().cmd, MemCmd::Write);
    let sent = l1.take_send(&mut arena, slot, Holder::Interconnect, 5).unwrap();
    assert_eq!(sent.packet, packet);
    assert!(!l1.is_blocked());
    assert!(arena.is_held_by(packet, Holder::Interconnect));
    assert!(!arena.is_held_by(packet, Holder::Issuer));
}

#[test]
fn squash_drops_only_the_threads_targets() {
    let mut arena = RequestArena::new();
    let mut l2 = CacheController::from_parts(
        CacheId::l2(0),
        Box::new(LruTags::new(Geometry::new(8 * 64, 2, 64).unwrap(), 0, 2)),
        Box::new(MissQueue::new(4, 0, 4, 2).unwrap()),
        Box::new(UniCoherence),
        params(false, true, 2),
    );
    let a = issue(&mut arena, MemCmd::Read, 0x000, 0);
    let b = issue(&mut arena, MemCmd::Read, 0x010, 1);
    let c = issue(&mut arena, MemCmd::Read, 0x1000, 1);
    assert_eq!(l2.access(&mut arena, a, 0).unwrap(), AccessOutcome::Miss);
    assert_eq!(l2.access(&mut arena, b, 0).unwrap(), AccessOutcome::MshrHit);
    assert_eq!(l2.access(&mut arena, c, 0).unwrap(), AccessOutcome::Miss);
    assert_eq!(l2.miss_handling().outstanding(), 2);

    let removed = l2.squash(&mut arena, 1, 1).unwrap();
    assert_eq!(removed, vec![b, c]);
    assert!(arena.get(b).unwrap().waiting_on.is_none());
    assert!(!arena.is_held_by(c, Holder::Target));
    // The MSHR of 0x1000 lost its only target before being sent.
    assert_eq!(l2.miss_handling().outstanding(), 1);
    assert_eq!(l2.stats(1).squashed_targets, 2);

    let fill = fetch_and_fill(&mut l2, &mut arena, 8);
    assert_eq!(fill.responses.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a]);
    assert!(l2.is_idle());
}

#[test]
fn snoop_below_the_top_level_is_forwarded_upward() {
    let mut arena = RequestArena::new();
    let mut l2 = CacheController::from_parts(
        CacheId::l2(0),
        Box::new(LruTags::new(Geometry::new(8 * 64, 2, 64).unwrap(), 0, 1)),
        Box::new(MissQueue::new(2, 0, 2, 2).unwrap()),
        Box::new(UniCoherence),
        params(false, true, 1),
    );
    let w = issue(&mut arena, MemCmd::Write, 0x500, 0);
    assert_eq!(l2.access(&mut arena, w, 0).unwrap(), AccessOutcome::Miss);
    let _ = fetch_and_fill(&mut l2, &mut arena, 3);

    let snoop = l2.snoop_invalidate(PhysAddr::new(0x500)).unwrap();
    assert!(snoop.invalidated);
    assert!(snoop.dirty_supplied);
    assert!(snoop.forward_upward);
    let again = l2.snoop_invalidate(PhysAddr::new(0x500)).unwrap();
    assert!(!again.invalidated);
}

#[test]
fn blocking_buffer_serialises_misses() {
    let mut arena = RequestArena::new();
    let mut l1 = CacheController::from_parts(
        CacheId::l1(0),
        Box::new(LruTags::new(Geometry::new(8 * 64, 2, 64).unwrap(), 0, 1)),
        Box::new(BlockingBuffer::new().unwrap()),
        Box::new(UniCoherence),
        params(true, true, 1),
    );
    let a = issue(&mut arena, MemCmd::Read, 0x000, 0);
    let b = issue(&mut arena, MemCmd::Read, 0x008, 0);
    assert_eq!(l1.access(&mut arena, a, 0).unwrap(), AccessOutcome::Miss);
    assert!(l1.is_blocked());
    assert!(matches!(l1.access(&mut arena, b, 1).unwrap(), AccessOutcome::Blocked(_)));
    let _ = fetch_and_fill(&mut l1, &mut arena, 4);
    assert!(matches!(l1.access(&mut arena, b, 5).unwrap(), AccessOutcome::Hit { .. }));
}
