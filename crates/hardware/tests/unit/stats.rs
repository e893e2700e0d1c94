//! Statistics reporting tests.

use memsim_core::stats::{CoreStats, STATS_SECTIONS, SimStats};
use pretty_assertions::assert_eq;

use crate::common::builder::ConfigBuilder;
use crate::common::harness::TestSystem;

fn after_some_traffic() -> SimStats {
    let mut sys = TestSystem::new(&ConfigBuilder::new().l2_banks(2).build());
    for i in 0..8 {
        let _ = sys.read(0, i * 64);
        let _ = sys.read(1, i * 64);
    }
    sys.drain();
    sys.system.stats()
}

#[test]
fn section_names_are_stable() {
    assert_eq!(
        STATS_SECTIONS,
        &["summary", "cores", "caches", "interconnect", "memory", "partition"]
    );
}

#[test]
fn average_latency_of_an_idle_core_is_zero() {
    assert!(CoreStats::default().avg_latency().abs() < f64::EPSILON);
    let busy = CoreStats {
        completed: 4,
        total_latency: 100,
        ..CoreStats::default()
    };
    assert!((busy.avg_latency() - 25.0).abs() < 1e-9);
}

#[test]
fn bank_totals_match_the_per_bank_counters() {
    let stats = after_some_traffic();
    assert_eq!(stats.l2.len(), 2);
    let total = stats.l2_total();
    assert_eq!(total.accesses, stats.l2.iter().map(|b| b.accesses).sum::<u64>());
    assert_eq!(total.hits + total.misses, stats.l2.iter().map(|b| b.hits + b.misses).sum::<u64>());
    assert_eq!(total.misses_by_requester.len(), 2);
    // Eight distinct blocks, each fetched from memory once.
    assert_eq!(stats.memory.reads, 8);
    assert_eq!(stats.memory.service_ticks.len(), 3);
}

#[test]
fn json_dump_carries_every_section() {
    let stats = after_some_traffic();
    let json = stats.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    for key in ["ticks", "cores", "l1", "l2", "interconnect", "memory", "partition"] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
    assert_eq!(value["l1"][1]["name"], "l1.1");
    assert_eq!(value["cores"][0]["completed"], 8);
}

#[test]
fn printing_selected_sections_does_not_panic() {
    let stats = after_some_traffic();
    stats.print_sections(&["memory".to_string(), "partition".to_string()]);
    stats.print();
}
