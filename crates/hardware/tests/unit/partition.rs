//! Partitioning policies, shadow-tag curves and the epoch controller.

use memsim_core::PhysAddr;
use memsim_core::cache::shadow::{HitCurve, ShadowTags};
use memsim_core::cache::tags::Geometry;
use memsim_core::config::{PartitionConfig, PartitionPolicyKind};
use memsim_core::partition::{
    Mtp, PartitionController, PartitionPolicy, Phase, UcpExhaustive, UcpLookahead, build_policy,
    equal_share,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use tempfile::tempdir;

fn curve(hits: &[u64]) -> HitCurve {
    HitCurve {
        hits: hits.to_vec(),
        misses: 0,
    }
}

fn total_hits(curves: &[HitCurve], alloc: &[usize]) -> u64 {
    curves.iter().zip(alloc).map(|(c, &w)| c.hits_with(w)).sum()
}

/// `(assoc, curves)` with one to four requesters and at least one way each.
fn hit_curves() -> impl Strategy<Value = (usize, Vec<HitCurve>)> {
    (2usize..=12, 1usize..=4)
        .prop_filter("one way per requester", |(assoc, n)| n <= assoc)
        .prop_flat_map(|(assoc, n)| {
            let one = prop::collection::vec(0u64..100, assoc).prop_map(|hits| HitCurve { hits, misses: 0 });
            (Just(assoc), prop::collection::vec(one, n))
        })
}

proptest! {
    #[test]
    fn every_policy_hands_out_exactly_the_ways((assoc, curves) in hit_curves(), threshold in 0.0f64..=1.0) {
        let policies: [Box<dyn PartitionPolicy>; 3] =
            [Box::new(UcpExhaustive), Box::new(UcpLookahead), Box::new(Mtp::new(threshold))];
        for policy in &policies {
            let rotation = policy.compute(&curves, assoc);
            prop_assert!(!rotation.is_empty(), "{} returned no partition", policy.name());
            for quotas in &rotation {
                prop_assert_eq!(quotas.len(), curves.len());
                prop_assert_eq!(quotas.iter().sum::<usize>(), assoc);
                prop_assert!(quotas.iter().all(|&q| q >= 1));
            }
        }
    }

    #[test]
    fn exhaustive_search_is_never_beaten((assoc, curves) in hit_curves()) {
        let best = UcpExhaustive.compute(&curves, assoc);
        let greedy = UcpLookahead.compute(&curves, assoc);
        prop_assert!(total_hits(&curves, &best[0]) >= total_hits(&curves, &greedy[0]));
        prop_assert!(total_hits(&curves, &best[0]) >= total_hits(&curves, &equal_share(assoc, curves.len())));
    }
}

#[rstest]
#[case(16, 4, vec![4, 4, 4, 4])]
#[case(8, 3, vec![3, 3, 2])]
#[case(5, 5, vec![1, 1, 1, 1, 1])]
fn equal_share_gives_the_remainder_to_the_first(#[case] assoc: usize, #[case] n: usize, #[case] expected: Vec<usize>) {
    assert_eq!(equal_share(assoc, n), expected);
}

#[test]
fn lookahead_gives_a_streaming_requester_one_way() {
    // Requester 1 never reuses anything.
    let curves = [curve(&[30, 20, 10, 5, 5, 5, 5, 5]), curve(&[0; 8])];
    assert_eq!(UcpLookahead.compute(&curves, 8), vec![vec![7, 1]]);
}

#[test]
fn mtp_rotates_between_thrashing_requesters() {
    let flat = curve(&[5, 5, 5, 5, 5, 5, 5, 5]);
    let rotation = Mtp::new(0.95).compute(&[flat.clone(), flat], 8);
    assert_eq!(rotation, vec![vec![6, 2], vec![2, 6]]);
}

#[test]
fn disabled_policy_builds_nothing() {
    assert!(build_policy(PartitionPolicyKind::None, 0.9).is_none());
    let config = PartitionConfig::default();
    assert!(PartitionController::new(&config, 2, 16).unwrap().is_none());
    assert_eq!(build_policy(PartitionPolicyKind::Mtp, 0.9).unwrap().name(), "mtp");
}

#[test]
fn controller_rejects_more_requesters_than_ways() {
    let config = PartitionConfig {
        policy: PartitionPolicyKind::UcpLookahead,
        ..PartitionConfig::default()
    };
    assert!(PartitionController::new(&config, 5, 4).is_err());
}

#[test]
fn controller_traces_quotas_and_curves() {
    let dir = tempdir().unwrap();
    let alloc = dir.path().join("alloc.csv");
    let hits = dir.path().join("curves.csv");
    let config = PartitionConfig {
        policy: PartitionPolicyKind::UcpLookahead,
        epoch: 100,
        warmup: 50,
        allocation_trace: Some(alloc.display().to_string()),
        hit_curve_trace: Some(hits.display().to_string()),
        ..PartitionConfig::default()
    };
    let mut ctrl = PartitionController::new(&config, 2, 4).unwrap().unwrap();
    assert_eq!(ctrl.phase(), Phase::Measuring);
    assert_eq!(ctrl.first_boundary(0), 50);

    let curves = [curve(&[9, 8, 7, 0]), curve(&[1, 0, 0, 0])];
    let collect = ctrl.on_epoch(50, &curves).unwrap();
    assert_eq!(collect.quotas, vec![2, 2]);
    assert!(collect.reset_shadow);
    assert_eq!(collect.next, 150);

    let enforce = ctrl.on_epoch(150, &curves).unwrap();
    assert_eq!(ctrl.phase(), Phase::Enforce);
    assert_eq!(enforce.quotas, vec![3, 1]);
    assert_eq!(enforce.next, 250);
    assert_eq!(ctrl.rotation(), &[vec![3, 1]]);

    let back = ctrl.on_epoch(250, &curves).unwrap();
    assert_eq!(ctrl.phase(), Phase::Collect);
    assert_eq!(back.quotas, vec![2, 2]);

    let stats = ctrl.stats();
    assert_eq!((stats.epochs, stats.repartitions), (1, 3));
    assert_eq!(stats.current, Some(vec![2, 2]));
    drop(ctrl);

    let alloc = std::fs::read_to_string(alloc).unwrap();
    assert_eq!(
        alloc.lines().collect::<Vec<_>>(),
        vec!["tick,phase,q0,q1", "50,0,2,2", "150,1,3,1", "250,0,2,2"]
    );
    let hits = std::fs::read_to_string(hits).unwrap();
    assert_eq!(
        hits.lines().collect::<Vec<_>>(),
        vec!["tick,requester,h0,h1,h2,h3,misses", "150,0,9,8,7,0,0", "150,1,1,0,0,0,0"]
    );
}

#[test]
fn shadow_tags_bin_hits_by_stack_distance() {
    // Two sets, sampling both.
    let geometry = Geometry::new(2 * 4 * 64, 4, 64).unwrap();
    let mut shadow = ShadowTags::new(geometry, 2, 1);
    let blocks: Vec<_> = (0..3u64).map(|i| PhysAddr::new(i * 128)).collect();
    for &b in &blocks {
        assert_eq!(shadow.access(b, 0), None);
    }
    // Most recent block is at distance 0, oldest at 2.
    assert_eq!(shadow.access(blocks[2], 0), Some(0));
    assert_eq!(shadow.access(blocks[0], 0), Some(2));
    // Requester 1 has a private directory.
    assert_eq!(shadow.access(blocks[0], 1), None);

    let curves = shadow.curves();
    assert_eq!(curves[0].hits, vec![1, 0, 1, 0]);
    assert_eq!(curves[0].misses, 3);
    assert_eq!(curves[1].accesses(), 1);

    let mut sum = HitCurve::new(4);
    sum.accumulate(&curves[0]);
    sum.accumulate(&curves[0]);
    assert_eq!(sum.hits_with(3), 4);

    shadow.reset();
    assert_eq!(shadow.curves()[0].accesses(), 0);
    // The directory survives a reset.
    assert_eq!(shadow.access(blocks[0], 0), Some(0));
}
