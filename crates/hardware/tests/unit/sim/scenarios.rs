//! End-to-end scenarios: accesses issued by cores and driven through the L1s, the
//! interconnect, the L2 banks and the memory controller.

use memsim_core::cache::blocked::BlockedCause;
use memsim_core::config::{InterconnectKind, PartitionPolicyKind, SchedulerKind};
use memsim_core::partition::Phase;
use memsim_core::{MemCmd, MemorySystem, PhysAddr, SimError};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::builder::ConfigBuilder;
use crate::common::harness::TestSystem;
use crate::common::mocks::MockSink;

#[test]
fn second_read_hits_in_the_l1() {
    let config = ConfigBuilder::new().build();
    let mut sys = TestSystem::new(&config);
    let miss = sys.timed_read(0, 0x1000);
    let hit = sys.timed_read(0, 0x1000);
    assert!(miss > hit, "miss {miss} should be slower than hit {hit}");
    assert_eq!(hit, config.l1.hit_latency);

    let stats = sys.system.stats();
    assert_eq!(stats.l1[0].hits, 1);
    assert_eq!(stats.l1[0].misses, 1);
    assert_eq!(stats.memory.reads, 1);
    assert!(sys.system.is_idle());
    assert!(sys.system.arena().is_empty());
}

#[test]
fn reads_to_one_block_share_an_mshr() {
    let mut sys = TestSystem::new(&ConfigBuilder::new().build());
    let first = sys.read(0, 0x1000);
    let second = sys.read(0, 0x1008);
    sys.drain();

    let stats = sys.system.stats();
    assert_eq!(stats.l1[0].mshr_misses, 1);
    assert_eq!(stats.l1[0].mshr_hits, 1);
    assert_eq!(stats.memory.reads, 1);
    let (a, b) = (sys.completion(first).unwrap(), sys.completion(second).unwrap());
    assert!(a.completed_at <= b.completed_at);
}

#[test]
fn other_core_finds_the_block_in_the_shared_l2() {
    let mut sys = TestSystem::new(&ConfigBuilder::new().build());
    let from_memory = sys.timed_read(0, 0x1000);
    let from_l2 = sys.timed_read(1, 0x1000);
    assert!(from_l2 < from_memory);

    let stats = sys.system.stats();
    assert_eq!(stats.memory.reads, 1);
    assert_eq!(stats.l2_total().hits, 1);
    assert_eq!(stats.l1[1].misses, 1);
}

#[test]
fn evicted_dirty_block_is_written_back() {
    // 1 KiB two-way L1: 0x000, 0x200 and 0x400 share set 0.
    let mut sys = TestSystem::new(&ConfigBuilder::new().build());
    for addr in [0x000, 0x200, 0x400] {
        let _ = sys.write(0, addr);
        sys.drain();
    }
    let stats = sys.system.stats();
    assert_eq!(stats.l1[0].writebacks, 1);
    assert_eq!(stats.l2_total().writebacks_received, 1);
    assert_eq!(stats.cores[0].completed, 3);
    assert!(sys.system.is_idle());
}

#[test]
fn blocked_core_retries_in_issue_order() {
    let config = ConfigBuilder::new().l1_mshrs(1, 1).build();
    let mut sys = TestSystem::new(&config);
    let reqs: Vec<_> = (0..4).map(|i| sys.read(0, 0x4000 + i * 0x40)).collect();
    sys.drain();

    let times: Vec<_> = reqs
        .iter()
        .map(|&r| sys.completion(r).unwrap().completed_at)
        .collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]), "{times:?}");
    let stats = sys.system.stats();
    assert!(stats.cores[0].rejected >= 3);
    assert!(stats.l1[0].blocked_events[BlockedCause::NoMshrs.index()] >= 1);
    assert_eq!(stats.cores[0].completed, 4);
}

#[test]
fn blocking_l1_handles_one_miss_at_a_time() {
    let mut sys = TestSystem::new(&ConfigBuilder::new().l1_blocking().build());
    let reqs: Vec<_> = (0..3).map(|i| sys.read(1, 0x6000 + i * 0x40)).collect();
    sys.drain();
    let times: Vec<_> = reqs
        .iter()
        .map(|&r| sys.completion(r).unwrap().completed_at)
        .collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]), "{times:?}");
    assert!(sys.system.stats().cores[1].rejected >= 2);
}

#[test]
fn single_write_buffer_still_drains_every_eviction() {
    // Direct-mapped two-set L1: all four blocks collide in set 0.
    let config = ConfigBuilder::new()
        .l1_geometry(128, 1)
        .l1_write_buffers(1)
        .build();
    let mut sys = TestSystem::new(&config);
    for addr in [0x000, 0x080, 0x100, 0x180] {
        let _ = sys.write(0, addr);
    }
    sys.drain();
    let stats = sys.system.stats();
    assert_eq!(stats.cores[0].completed, 4);
    assert_eq!(stats.l1[0].writebacks, 3);
    assert!(sys.system.is_idle());
}

#[test]
fn squash_drops_waiting_accesses() {
    let config = ConfigBuilder::new().l1_mshrs(1, 1).build();
    let mut sys = TestSystem::new(&config);
    let reqs: Vec<_> = (0..3).map(|i| sys.read(0, 0x8000 + i * 0x40)).collect();
    // Nothing has been sent yet, so every access is still waiting.
    let squashed = sys.system.squash(0).unwrap();
    assert_eq!(squashed.len(), 3);
    assert!(reqs.iter().all(|r| squashed.contains(r)));
    sys.drain();
    assert!(sys.done.is_empty());
    assert_eq!(sys.system.stats().cores[0].squashed, 3);

    // The core keeps working afterwards.
    let _ = sys.timed_read(0, 0x8000);
    assert!(sys.system.arena().is_empty());
}

#[test]
fn external_invalidate_reaches_every_level() {
    let config = ConfigBuilder::new().build();
    let mut sys = TestSystem::new(&config);
    let _ = sys.timed_read(0, 0x2000);
    let inv = sys.system.invalidate(PhysAddr::new(0x2010)).unwrap();
    assert_eq!(inv.invalidated, 2);
    assert!(!inv.dirty_supplied);
    assert!(sys.timed_read(0, 0x2000) > config.l1.hit_latency);
    assert_eq!(sys.system.stats().memory.reads, 2);
}

#[test]
fn directory_protocol_serves_shared_then_exclusive_copies() {
    let mut sys = TestSystem::new(&ConfigBuilder::new().directory().build());
    let a = sys.read(0, 0x3000);
    let b = sys.read(1, 0x3000);
    sys.drain();
    let c = sys.write(1, 0x3000);
    let d = sys.read(0, 0x3000);
    sys.drain();
    for req in [a, b, c, d] {
        assert!(sys.completion(req).is_some(), "{req} never completed");
    }
    assert!(sys.system.is_idle());
}

#[test]
fn completions_are_reported_to_the_sink() {
    let mut system = MemorySystem::new(&ConfigBuilder::new().build()).unwrap();
    let mut sink = MockSink::new();
    sink.expect_complete()
        .withf(|c| c.core == 1 && c.cmd == MemCmd::Read && c.completed_at > c.issued_at)
        .times(2)
        .return_const(());
    let _ = system.issue(1, MemCmd::Read, PhysAddr::new(0x500), 8).unwrap();
    let _ = system.issue(1, MemCmd::Read, PhysAddr::new(0x5c0), 8).unwrap();
    system.drain(&mut sink).unwrap();
}

#[test]
fn prefetches_complete_silently() {
    let mut system = MemorySystem::new(&ConfigBuilder::new().build()).unwrap();
    let mut sink = MockSink::new();
    sink.expect_complete().never();
    let _ = system.issue(0, MemCmd::Prefetch, PhysAddr::new(0x700), 8).unwrap();
    system.drain(&mut sink).unwrap();
    assert_eq!(system.stats().cores[0].completed, 1);
}

#[test]
fn bad_core_and_command_are_rejected() {
    let mut system = MemorySystem::new(&ConfigBuilder::new().build()).unwrap();
    let err = system.issue(7, MemCmd::Read, PhysAddr::new(0), 8).unwrap_err();
    assert!(matches!(err, SimError::Config { .. }));
    let err = system.issue(0, MemCmd::Writeback, PhysAddr::new(0), 64).unwrap_err();
    assert!(matches!(err, SimError::Invariant { .. }));
    assert!(MemorySystem::new(&ConfigBuilder::new().cores(0).build()).is_err());
}

#[rstest]
fn mixed_traffic_drains_on_every_fabric(
    #[values(InterconnectKind::Crossbar, InterconnectKind::Butterfly, InterconnectKind::Bus)] fabric: InterconnectKind,
    #[values(SchedulerKind::Fcfs, SchedulerKind::ReadFirst, SchedulerKind::Nfq, SchedulerKind::FixedBandwidth)]
    scheduler: SchedulerKind,
) {
    let config = ConfigBuilder::new()
        .l2_banks(2)
        .interconnect(fabric)
        .scheduler(scheduler)
        .build();
    let mut sys = TestSystem::new(&config);
    for i in 0..24u64 {
        for core in 0..2usize {
            // Strided so that both L1s evict and both banks see traffic.
            let addr = ((core as u64) << 16) + i * 5 * 64;
            let _ = if i % 3 == 0 { sys.write(core, addr) } else { sys.read(core, addr) };
        }
        let next = sys.system.now() + 3;
        sys.run_until(next);
    }
    sys.drain();

    assert_eq!(sys.done.len(), 48);
    let stats = sys.system.stats();
    for core in &stats.cores {
        assert_eq!(core.issued, core.completed);
    }
    assert!(stats.interconnect.grants > 0);
    assert!(stats.l2.iter().all(|bank| bank.accesses > 0));
    assert!(sys.system.is_idle());
    assert!(sys.system.arena().is_empty());
}

#[test]
fn partitioning_installs_quotas_in_the_shared_cache() {
    let config = ConfigBuilder::new()
        .l2_geometry(8192, 8)
        .partitioning(PartitionPolicyKind::UcpLookahead, 100, 400)
        .build();
    let mut sys = TestSystem::new(&config);
    for round in 0..4u64 {
        for i in 0..32u64 {
            // Core 0 reuses a small set; core 1 streams.
            let _ = sys.read(0, (i % 8) * 64);
            let _ = sys.read(1, 0x10_0000 + (round * 32 + i) * 64);
        }
        sys.drain();
    }
    let end = sys.system.now() + 2000;
    sys.run_until(end);

    let partition = sys.system.partition().unwrap();
    assert_ne!(partition.phase(), Phase::Measuring);
    let stats = sys.system.stats();
    assert!(stats.partition.epochs >= 1);
    assert!(stats.partition.repartitions >= 2);
    let quotas = stats.partition.current.unwrap();
    assert_eq!(quotas.len(), 2);
    assert_eq!(quotas.iter().sum::<usize>(), config.l2.assoc);
    assert!(quotas.iter().all(|&q| q >= 1));
}
