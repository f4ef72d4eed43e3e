use super::harness::{access, assert_unlocked, run_until_idle, small_config, system};
use crate::hybrid::config::HybridConfig;

const PAGE: u64 = 4096;

/// 4 GiB of backing pages, so addresses past the hole stay in range.
fn wide_config() -> HybridConfig {
    let mut config = small_config();
    config.controller.total_pages = 1 << 20;
    config
}

#[test]
fn io_hole_completes_immediately() {
    let mut sys = system(wide_config());
    assert!(sys.add_transaction(false, 0xE000_0000));
    let done = sys.poll_completion().unwrap();
    assert_eq!(done.addr, 0xE000_0000);
    assert_eq!(done.cycle, 0);
    assert!(sys.is_idle());
    assert_eq!(sys.stats().mmio_dropped, 1);
    assert_eq!(sys.stats().reads, 1);
    assert_eq!(sys.stats().misses(), 0);
}

#[test]
fn high_memory_reports_the_submitted_address() {
    let mut sys = system(wide_config());
    let done = access(&mut sys, true, (1 << 32) + 0x80);
    assert_eq!(done.addr, (1 << 32) + 0x80);
    assert_eq!(sys.stats().mmio_remapped, 1);
    assert_eq!(sys.stats().write_misses, 1);

    // the line holds the page just below the hole
    let page = 0xE000_0000;
    let set = sys.layout().set_index(page);
    let ways = sys.layout().ways(set);
    assert!(sys.lines().find(&ways, sys.layout().tag(page)).is_some());
}

#[test]
fn remapping_can_be_disabled() {
    let mut config = wide_config();
    config.controller.remap_mmio = false;
    let mut sys = system(config);
    access(&mut sys, false, 0xE000_1000);
    assert_eq!(sys.stats().mmio_dropped, 0);
    assert_eq!(sys.stats().read_misses, 1);
}

#[test]
fn prefetch_range_fills_without_completions() {
    let mut sys = system(small_config());
    sys.mmio(3, (1 << 48) | 0x4000).unwrap();
    assert!(run_until_idle(&mut sys).is_empty());
    let stats = sys.stats();
    assert_eq!(stats.prefetches_issued, 2);
    assert_eq!(stats.prefetch_fills, 2);
    assert_eq!(stats.misses(), 0);

    let line = sys
        .lines()
        .find(&sys.layout().ways(5), 0)
        .map(|addr| sys.lines().get(addr))
        .unwrap();
    assert!(line.prefetched && !line.used);

    access(&mut sys, false, 0x4000);
    assert_eq!(sys.stats().read_hits, 1);
    assert_unlocked(&sys);
}

#[test]
fn prefetch_of_cached_page_is_a_no_op() {
    let mut sys = system(small_config());
    access(&mut sys, false, 0x7000);
    sys.add_prefetch(0x7000);
    run_until_idle(&mut sys);
    assert_eq!(sys.stats().prefetch_hit_nops, 1);
    assert_eq!(sys.stats().prefetch_fills, 0);
}

#[test]
fn sync_all_cleans_every_dirty_line() {
    let mut sys = system(small_config());
    access(&mut sys, true, PAGE);
    access(&mut sys, true, 2 * PAGE);
    access(&mut sys, false, 3 * PAGE);

    sys.mmio(1, 0).unwrap();
    assert!(run_until_idle(&mut sys).is_empty());
    let stats = sys.stats();
    assert_eq!(stats.syncs, 2);
    assert_eq!(stats.sync_writebacks, 2);

    for page in 1..=3 {
        let set = sys.layout().set_index(page * PAGE);
        let line = sys
            .lines()
            .find(&sys.layout().ways(set), 0)
            .map(|addr| sys.lines().get(addr))
            .unwrap();
        assert!(line.valid && !line.dirty);
    }
    assert_unlocked(&sys);

    // nothing left to write the second time
    sys.sync_all();
    run_until_idle(&mut sys);
    assert_eq!(sys.stats().syncs, 2);
}

#[test]
fn other_ops_are_accepted_or_rejected() {
    let mut sys = system(small_config());
    sys.mmio(0, 0).unwrap();
    sys.mmio(2, 0x1234).unwrap();
    assert!(sys.is_idle());
    let err = sys.mmio(7, 0).unwrap_err();
    assert!(err.to_string().contains("unknown mmio operation"));
}
