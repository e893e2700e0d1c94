//! DRAM schedulers and device timing.

use memsim_core::config::{MemoryConfig, SchedulerKind};
use memsim_core::memory::{
    DramCommand, DramDevice, Fcfs, FixedBandwidth, MemoryController, Nfq, ReadFirst,
    build_controller,
};
use memsim_core::request::{Holder, MemCmd, MemRequest, ReqId, RequestArena};
use memsim_core::{PhysAddr, SimError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

const PAGE: u64 = 2048;

fn config() -> MemoryConfig {
    MemoryConfig {
        t_cas: 12,
        t_ras: 20,
        t_pre: 10,
        page_size: PAGE,
        ..MemoryConfig::default()
    }
}

fn insert(ctrl: &mut dyn MemoryController, arena: &mut RequestArena, cmd: MemCmd, addr: u64, core: usize) -> ReqId {
    let req = MemRequest::new(cmd, PhysAddr::new(addr), 64, core, 0);
    let id = arena.insert(req.clone(), Holder::MemoryQueue);
    ctrl.insert_request(id, &req, 0).unwrap();
    id
}

/// Pulls commands until the scheduler has nothing left.
fn drain(ctrl: &mut dyn MemoryController) -> Vec<DramCommand> {
    let mut commands = Vec::new();
    while let Some(cmd) = ctrl.get_request(0).unwrap() {
        commands.push(cmd);
        assert!(commands.len() < 1000, "scheduler never ran dry");
    }
    commands
}

fn accesses(commands: &[DramCommand]) -> Vec<ReqId> {
    commands
        .iter()
        .filter_map(|c| match *c {
            DramCommand::Access { req, .. } => Some(req),
            _ => None,
        })
        .collect()
}

#[test]
fn fcfs_closes_every_page_after_use() {
    let mut arena = RequestArena::new();
    let mut fcfs = Fcfs::new(&config(), 2);
    let a = insert(&mut fcfs, &mut arena, MemCmd::Read, 0x0000, 0);
    let b = insert(&mut fcfs, &mut arena, MemCmd::Read, 0x1000, 1);
    let commands = drain(&mut fcfs);
    let (pa, pb) = (0, 0x1000 / PAGE);
    assert_eq!(
        commands,
        vec![
            DramCommand::Activate { page: pa },
            DramCommand::Access { req: a, requester: 0, page: pa, is_write: false, size: 64 },
            DramCommand::Close { page: pa },
            DramCommand::Activate { page: pb },
            DramCommand::Access { req: b, requester: 1, page: pb, is_write: false, size: 64 },
            DramCommand::Close { page: pb },
        ]
    );
    assert!(!fcfs.has_more_requests());
}

#[test]
fn read_first_serves_reads_before_older_writes() {
    let mut arena = RequestArena::new();
    let mut ctrl = ReadFirst::new(&config(), 2);
    let w = insert(&mut ctrl, &mut arena, MemCmd::Write, 0x0000, 0);
    let wb = insert(&mut ctrl, &mut arena, MemCmd::Writeback, 0x0040, 1);
    let r = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x4000, 1);
    let commands = drain(&mut ctrl);

    assert_eq!(commands[0], DramCommand::Activate { page: 0x4000 / PAGE });
    assert_eq!(accesses(&commands), vec![r, w, wb]);
    // Writebacks are accounted to the pseudo-requester after the cores.
    assert!(commands.contains(&DramCommand::Access {
        req: wb,
        requester: 2,
        page: 0,
        is_write: true,
        size: 64
    }));
    // Pages are closed once nothing references them.
    let closes = commands.iter().filter(|c| matches!(c, DramCommand::Close { .. })).count();
    assert_eq!(closes, 2);
}

#[test]
fn read_first_keeps_row_hits_together() {
    let mut arena = RequestArena::new();
    let mut ctrl = ReadFirst::new(
        &MemoryConfig {
            open_page_slots: 1,
            ..config()
        },
        1,
    );
    let a = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x0000, 0);
    let b = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x4000, 0);
    let c = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x0080, 0);
    let commands = drain(&mut ctrl);
    assert_eq!(accesses(&commands), vec![a, c, b]);
    let activates = commands.iter().filter(|c| matches!(c, DramCommand::Activate { .. })).count();
    assert_eq!(activates, 2);
}

#[test]
fn nfq_service_follows_the_weights() {
    let cfg = MemoryConfig {
        nfq_weights: vec![3.0, 1.0],
        ..config()
    };
    let mut arena = RequestArena::new();
    let mut nfq = Nfq::new(&cfg, 2).unwrap();
    // Both cores stay backlogged on one page so only the fair-queueing order matters.
    let mut next_addr = [0u64; 2];
    let mut owner = std::collections::HashMap::new();
    for core in 0..2 {
        for _ in 0..2 {
            let id = insert(&mut nfq, &mut arena, MemCmd::Read, next_addr[core] % PAGE, core);
            next_addr[core] += 64;
            let _ = owner.insert(id, core);
        }
    }

    let mut served = [0usize; 2];
    let mut total = 0;
    while total < 40 {
        match nfq.get_request(0).unwrap().unwrap() {
            DramCommand::Access { req, .. } => {
                let core = owner[&req];
                served[core] += 1;
                total += 1;
                let id = insert(&mut nfq, &mut arena, MemCmd::Read, next_addr[core] % PAGE, core);
                next_addr[core] += 64;
                let _ = owner.insert(id, core);
            }
            DramCommand::Activate { .. } => {}
            DramCommand::Close { .. } => panic!("the shared page never goes idle"),
        }
    }
    assert!((29..=31).contains(&served[0]), "core 0 served {}", served[0]);
    assert!((9..=11).contains(&served[1]), "core 1 served {}", served[1]);
    assert!(nfq.virtual_clock() > 0.0);
}

/// Keeps two cores backlogged on their own pages behind a single open-page slot and
/// counts accesses per core until `total` have been served.
fn serve_on_separate_pages(weights: [f64; 2], total: usize) -> [usize; 2] {
    let cfg = MemoryConfig {
        nfq_weights: weights.to_vec(),
        open_page_slots: 1,
        queue_size: 64,
        ..config()
    };
    let base = [0, 16 * PAGE];
    let mut arena = RequestArena::new();
    let mut nfq = Nfq::new(&cfg, 2).unwrap();
    let mut offset = [0u64; 2];
    let mut refill = |nfq: &mut Nfq, arena: &mut RequestArena, core: usize| {
        let _ = insert(nfq, arena, MemCmd::Read, base[core] + offset[core] % PAGE, core);
        offset[core] += 64;
    };
    for core in 0..2 {
        refill(&mut nfq, &mut arena, core);
        refill(&mut nfq, &mut arena, core);
    }
    let mut served = [0usize; 2];
    let mut commands = 0;
    while served.iter().sum::<usize>() < total {
        commands += 1;
        assert!(commands < 10 * total, "scheduler stopped serving");
        if let DramCommand::Access { requester, .. } = nfq.get_request(0).unwrap().unwrap() {
            served[requester] += 1;
            refill(&mut nfq, &mut arena, requester);
        }
    }
    served
}

#[test]
fn nfq_equal_weights_share_a_single_page_slot() {
    assert_eq!(serve_on_separate_pages([1.0, 1.0], 40), [20, 20]);
}

proptest! {
    #[test]
    fn nfq_share_tracks_weights_across_pages(w0 in 1u32..=4, w1 in 1u32..=4) {
        let served = serve_on_separate_pages([f64::from(w0), f64::from(w1)], 80);
        // Core 0 should get w0 / (w0 + w1) of the 80 accesses, give or take four.
        let share = i64::try_from(served[0]).unwrap() * i64::from(w0 + w1);
        let target = 80 * i64::from(w0);
        prop_assert!((share - target).abs() < 4 * i64::from(w0 + w1), "served {served:?} for weights {w0}:{w1}");
    }
}

#[test]
fn fixed_bandwidth_isolates_core_queues() {
    let cfg = MemoryConfig {
        scheduler: SchedulerKind::FixedBandwidth,
        per_core_queue: 2,
        open_page_slots: 1,
        ..config()
    };
    let mut arena = RequestArena::new();
    let mut ctrl = FixedBandwidth::new(&cfg, 2).unwrap();
    let a = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x0000, 0);
    let b = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x0040, 0);
    assert!(ctrl.is_blocked_for(0));
    assert!(!ctrl.is_blocked_for(1));
    assert!(ctrl.is_blocked());

    let extra = MemRequest::new(MemCmd::Read, PhysAddr::new(0x80), 64, 0, 0);
    let extra_id = arena.insert(extra.clone(), Holder::MemoryQueue);
    assert!(matches!(
        ctrl.insert_request(extra_id, &extra, 0),
        Err(SimError::Invariant { .. })
    ));

    let c = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x8000, 1);
    let commands = drain(&mut ctrl);
    assert_eq!(accesses(&commands), vec![a, b, c]);
    assert_eq!(ctrl.queued(), 0);
}

#[test]
fn block_copies_are_not_supported() {
    let mut arena = RequestArena::new();
    let mut ctrl = Fcfs::new(&config(), 1);
    let req = MemRequest::new(MemCmd::Copy, PhysAddr::new(0), 64, 0, 0);
    let id = arena.insert(req.clone(), Holder::MemoryQueue);
    assert!(matches!(
        ctrl.insert_request(id, &req, 0),
        Err(SimError::Unimplemented(_))
    ));
    assert!(!ctrl.has_more_requests());
}

#[test]
fn full_queue_blocks_the_controller() {
    let cfg = MemoryConfig {
        queue_size: 2,
        ..config()
    };
    let mut arena = RequestArena::new();
    let mut ctrl = ReadFirst::new(&cfg, 1);
    let _ = insert(&mut ctrl, &mut arena, MemCmd::Read, 0x0, 0);
    assert!(!ctrl.is_blocked());
    let _ = insert(&mut ctrl, &mut arena, MemCmd::Write, 0x40, 0);
    assert!(ctrl.is_blocked());
    assert_eq!(ctrl.queued(), 2);
}

#[test]
fn device_charges_each_command_and_counts_row_hits() {
    let mut arena = RequestArena::new();
    let req = arena.insert(
        MemRequest::new(MemCmd::Read, PhysAddr::new(0), 64, 0, 0),
        Holder::MemoryQueue,
    );
    let cfg = MemoryConfig {
        bus_width: 16,
        ..config()
    };
    let mut dram = DramDevice::new(&cfg, 2);
    let access = DramCommand::Access { req, requester: 1, page: 0, is_write: false, size: 64 };

    assert_eq!(dram.execute(&DramCommand::Activate { page: 0 }, 0), 20);
    // The device is busy, so the access starts when the activation ends.
    assert_eq!(dram.execute(&access, 5), 20 + 12 + 4);
    assert!(dram.is_busy(35));
    assert_eq!(dram.execute(&access, 40), 40 + 16);
    assert_eq!(dram.execute(&DramCommand::Close { page: 0 }, 56), 66);

    let stats = dram.stats();
    assert_eq!((stats.activates, stats.closes, stats.reads), (1, 1, 2));
    assert_eq!(stats.row_hits, 1);
    assert_eq!(stats.service_ticks, vec![0, 32]);
    assert_eq!(stats.busy_ticks, 20 + 16 + 16 + 10);
}

#[rstest]
#[case(SchedulerKind::Fcfs, "fcfs")]
#[case(SchedulerKind::ReadFirst, "read-first")]
#[case(SchedulerKind::Nfq, "nfq")]
#[case(SchedulerKind::FixedBandwidth, "fixed-bandwidth")]
fn configured_scheduler_is_built(#[case] scheduler: SchedulerKind, #[case] name: &str) {
    let cfg = MemoryConfig {
        scheduler,
        ..config()
    };
    let ctrl = build_controller(&cfg, 2).unwrap();
    assert_eq!(ctrl.name(), name);
    assert_eq!(ctrl.queued(), 0);
}
