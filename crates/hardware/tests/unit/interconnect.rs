//! Interconnect arbitration, blocking and topologies.

use memsim_core::cache::blocked::BlockedCause;
use memsim_core::config::{InterconnectConfig, InterconnectKind};
use memsim_core::interconnect::{
    Butterfly, Crossbar, Interconnect, SplitBus, Topology, Transfer,
};
use memsim_core::request::{Holder, ReqId, RequestArena};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::builder::read;
use crate::common::mocks::{FixedLatency, MockLinks, QueuedPorts};

/// Two masters (0, 1) and two slaves (2, 3) with a contention-free topology.
fn fixed(latency: u64, arbitration_delay: u64) -> Interconnect {
    Interconnect::with_topology(Box::new(FixedLatency(latency)), 2, 2, arbitration_delay)
}

fn transfers(arena: &mut RequestArena, sends: &[(usize, usize)]) -> (QueuedPorts, Vec<ReqId>) {
    let mut ports = QueuedPorts::new(4);
    let mut ids = Vec::new();
    for (i, &(from, dest)) in sends.iter().enumerate() {
        let req = read(arena, 0x1000 * i as u64, from % 2);
        ports.push(from, Transfer { req, dest, bytes: 8 });
        ids.push(req);
    }
    (ports, ids)
}

#[test]
fn oldest_request_wins_and_ties_go_to_the_lower_interface() {
    let mut arena = RequestArena::new();
    let (mut ports, _) = transfers(&mut arena, &[(0, 2), (1, 3), (2, 0)]);
    let mut xbar = fixed(3, 0);
    assert_eq!(xbar.request(2, 0), Some(0));
    assert_eq!(xbar.request(0, 1), Some(1));
    assert_eq!(xbar.request(1, 0), Some(0));
    // A second request from a queued interface is absorbed.
    assert_eq!(xbar.request(1, 1), None);
    assert_eq!(xbar.stats().requests, 3);

    let result = xbar.arbitrate(1, &mut ports).unwrap();
    let order: Vec<_> = result.granted.iter().map(|d| d.from).collect();
    assert_eq!(order, vec![1, 2, 0]);
    assert!(result.granted.iter().all(|d| d.ready_at == 4));
    assert_eq!(result.next, None);
    assert_eq!(xbar.stats().total_queue_ticks, 1 + 1);
}

#[test]
fn requests_wait_out_the_arbitration_delay() {
    let mut arena = RequestArena::new();
    let (mut ports, _) = transfers(&mut arena, &[(0, 2)]);
    let mut xbar = fixed(1, 2);
    assert_eq!(xbar.request(0, 5), Some(7));
    let early = xbar.arbitrate(6, &mut ports).unwrap();
    assert!(early.granted.is_empty());
    assert_eq!(early.next, Some(7));
    assert_eq!(xbar.arbitrate(7, &mut ports).unwrap().granted.len(), 1);
}

#[test]
fn blocked_destination_is_skipped_without_taking() {
    let mut arena = RequestArena::new();
    let req = read(&mut arena, 0x40, 0);
    let mut links = MockLinks::new();
    let _ = links
        .expect_peek()
        .returning(move |_| Ok(Some(Transfer { req, dest: 3, bytes: 8 })));
    let _ = links.expect_take().never();

    let mut xbar = fixed(1, 0);
    assert!(xbar.set_blocked(3, BlockedCause::NoMshrs));
    assert!(!xbar.set_blocked(3, BlockedCause::NoTargets));
    let _ = xbar.request(0, 0);
    let result = xbar.arbitrate(0, &mut links).unwrap();
    assert!(result.granted.is_empty());
    assert!(xbar.is_requesting(0));
    assert_eq!(xbar.stats().deferred_arbitrations, 1);

    assert!(!xbar.clear_blocked(3, BlockedCause::NoMshrs));
    assert!(xbar.clear_blocked(3, BlockedCause::NoTargets));
    assert!(!xbar.is_blocked(3));
}

#[test]
fn interface_with_nothing_to_send_leaves_the_queue() {
    let mut links = MockLinks::new();
    let _ = links.expect_peek().times(1).returning(|_| Ok(None));
    let _ = links.expect_take().never();
    let mut xbar = fixed(1, 0);
    let _ = xbar.request(1, 0);
    assert!(xbar.arbitrate(0, &mut links).unwrap().granted.is_empty());
    assert!(!xbar.is_requesting(1));
    assert!(xbar.is_idle());
}

#[test]
fn busy_port_retries_on_the_next_tick() {
    let mut arena = RequestArena::new();
    let (mut ports, ids) = transfers(&mut arena, &[(0, 2), (1, 2)]);
    let mut xbar = Interconnect::with_topology(Box::new(Crossbar::new(4, 2, 1, 8)), 2, 2, 0);
    let _ = xbar.request(0, 0);
    let _ = xbar.request(1, 0);

    let first = xbar.arbitrate(0, &mut ports).unwrap();
    assert_eq!(first.granted.len(), 1);
    assert_eq!(first.granted[0].req, ids[0]);
    assert_eq!(first.next, Some(1));
    assert_eq!(xbar.stats().resource_conflicts, 1);

    let second = xbar.arbitrate(1, &mut ports).unwrap();
    assert_eq!(second.granted.len(), 1);
    assert_eq!(ports.taken, vec![(0, ids[0]), (1, ids[1])]);
}

#[test]
fn deliveries_to_a_blocked_slave_wait_in_place() {
    let mut arena = RequestArena::new();
    let (mut ports, ids) = transfers(&mut arena, &[(0, 2), (1, 3)]);
    let mut xbar = fixed(2, 0);
    let _ = xbar.request(0, 0);
    let _ = xbar.request(1, 0);
    let _ = xbar.arbitrate(0, &mut ports).unwrap();
    assert_eq!(xbar.next_delivery(1), None);
    assert_eq!(xbar.next_delivery_tick(), Some(2));

    let _ = xbar.set_blocked(2, BlockedCause::NoMshrs);
    let to_three = xbar.next_delivery(2).unwrap();
    assert_eq!(to_three.req, ids[1]);
    assert_eq!(xbar.next_delivery(2), None);
    assert_eq!(xbar.stats().deferred_deliveries, 1);

    let _ = xbar.clear_blocked(2, BlockedCause::NoMshrs);
    let to_two = xbar.next_delivery(2).unwrap();
    assert_eq!(to_two.req, ids[0]);
    assert_eq!(xbar.stats().deliveries, 2);
    assert!(xbar.is_idle());
}

#[test]
fn refused_delivery_goes_back_to_the_front() {
    let mut arena = RequestArena::new();
    let (mut ports, ids) = transfers(&mut arena, &[(0, 2), (1, 2)]);
    let mut xbar = fixed(1, 0);
    let _ = xbar.request(0, 0);
    let _ = xbar.request(1, 0);
    let _ = xbar.arbitrate(0, &mut ports).unwrap();

    let refused = xbar.next_delivery(1).unwrap();
    assert_eq!(refused.req, ids[0]);
    xbar.defer(refused);
    assert_eq!(xbar.stats().deliveries, 0);
    assert_eq!(xbar.next_delivery(1).unwrap().req, ids[0]);
    assert_eq!(xbar.next_delivery(1).unwrap().req, ids[1]);
    assert!(arena.is_held_by(ids[0], Holder::Issuer));
}

#[test]
fn refused_delivery_stays_behind_earlier_ones() {
    let mut arena = RequestArena::new();
    let (mut ports, ids) = transfers(&mut arena, &[(1, 3), (0, 2)]);
    let mut xbar = fixed(1, 0);
    let _ = xbar.request(1, 0);
    let _ = xbar.arbitrate(0, &mut ports).unwrap();
    let _ = xbar.set_blocked(3, BlockedCause::NoMshrs);
    let _ = xbar.request(0, 2);
    let _ = xbar.arbitrate(2, &mut ports).unwrap();

    // The delivery due at 1 is held back by its blocked slave; the one due at 3 is refused.
    let refused = xbar.next_delivery(3).unwrap();
    assert_eq!(refused.req, ids[1]);
    xbar.defer(refused);
    assert_eq!(xbar.next_delivery_tick(), Some(1));

    let _ = xbar.clear_blocked(3, BlockedCause::NoMshrs);
    assert_eq!(xbar.next_delivery(3).unwrap().req, ids[0]);
    assert_eq!(xbar.next_delivery(3).unwrap().req, ids[1]);
    assert!(xbar.is_idle());
}

#[test]
fn split_bus_serialises_every_transfer() {
    let mut bus = SplitBus::new(8, 2);
    assert_eq!(bus.try_reserve(0, 2, 64, 0), Some(2 + 8));
    assert_eq!(bus.try_reserve(1, 3, 8, 4), None);
    assert_eq!(bus.try_reserve(1, 3, 8, 8), Some(3));
}

#[test]
fn crossbar_lets_disjoint_pairs_overlap() {
    let mut xbar = Crossbar::new(4, 2, 1, 8);
    assert_eq!(xbar.try_reserve(0, 2, 64, 0), Some(1 + 8));
    assert_eq!(xbar.try_reserve(1, 3, 64, 0), Some(1 + 8));
    assert_eq!(xbar.try_reserve(3, 0, 8, 4), None);
}

#[test]
fn butterfly_routes_by_destination_bits() {
    let net = Butterfly::new(4, 1, 0, 8).unwrap();
    assert_eq!(net.stages(), 2);
    assert_eq!(net.route(0, 3), vec![2, 3]);
    assert_eq!(net.route(3, 0), vec![1, 0]);
    assert!(Butterfly::new(0, 1, 0, 8).is_err());
}

#[test]
fn butterfly_paths_sharing_a_channel_conflict() {
    let mut net = Butterfly::new(4, 1, 0, 8).unwrap();
    // 0 -> 2 uses channels [2, 2]; 1 -> 3 uses [3, 3]; 2 -> 2 uses [2, 2].
    assert_eq!(net.try_reserve(0, 2, 8, 0), Some(2 + 1));
    assert_eq!(net.try_reserve(1, 3, 8, 0), Some(2 + 1));
    assert_eq!(net.try_reserve(2, 2, 8, 0), None);
}

#[rstest]
#[case(InterconnectKind::Crossbar, "crossbar")]
#[case(InterconnectKind::Butterfly, "butterfly")]
#[case(InterconnectKind::Bus, "bus")]
fn configured_topology_is_built(#[case] kind: InterconnectKind, #[case] name: &str) {
    let config = InterconnectConfig {
        kind,
        ..InterconnectConfig::default()
    };
    let net = Interconnect::new(&config, 4, 2).unwrap();
    assert_eq!(net.topology(), name);
    assert_eq!((net.masters(), net.ifaces()), (4, 6));
}
