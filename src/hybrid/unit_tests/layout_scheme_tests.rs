use super::harness::{access, assert_unlocked, row_config, run_until_idle, small_config, system};
use crate::hybrid::config::AssocScheme;

const PAGE: u64 = 4096;

#[test]
fn direct_mapped_hits_and_evicts() {
    let mut config = small_config();
    config.controller.assoc = AssocScheme::Direct;
    config.controller.set_size = 1;
    let mut sys = system(config);

    access(&mut sys, false, 0x3040);
    assert_eq!(sys.stats().read_misses, 1);
    access(&mut sys, false, 0x3040);
    assert_eq!(sys.stats().read_hits, 1);

    // page 19 shares set 3
    access(&mut sys, false, 19 * PAGE);
    assert_eq!(sys.stats().clean_evictions, 1);
    assert_eq!(sys.lines().get(3 * PAGE).tag, 1);

    access(&mut sys, true, 3 * PAGE);
    access(&mut sys, false, 19 * PAGE);
    assert_eq!(sys.stats().clean_evictions, 2);
    assert_eq!(sys.stats().dirty_evictions, 1);
    assert_eq!(sys.stats().tag_reads, 0);
    assert_unlocked(&sys);
}

#[test]
fn channel_ways_are_probed_together() {
    let mut config = small_config();
    config.controller.assoc = AssocScheme::Channel;
    let mut sys = system(config);
    let ways = sys.layout().ways(5);
    assert_eq!(ways.as_slice(), &[10 * PAGE, 11 * PAGE]);

    access(&mut sys, false, 0x5000);
    assert!(sys.lines().find(&ways, 0).is_some());
    access(&mut sys, true, 13 * PAGE);
    assert!(sys.lines().find(&ways, 1).is_some());

    let start = sys.cycle();
    let hit = access(&mut sys, false, 0x5080);
    assert_eq!(sys.stats().read_hits, 1);
    assert_eq!(sys.stats().read_misses, 1);
    assert_eq!(sys.stats().write_misses, 1);
    // the probe already carried the data
    assert!(hit.cycle - start < 2 * 11 + 10);
    assert_unlocked(&sys);
}

#[test]
fn loh_reads_tags_on_every_access() {
    let mut sys = system(row_config(AssocScheme::Loh));
    assert_eq!(sys.layout().actual_cache_pages, 32);
    assert!(sys.tag_buffer().is_none());

    access(&mut sys, false, 0x0);
    assert_eq!(sys.stats().tag_reads, 1);
    assert_eq!(sys.stats().tag_writes, 1);
    assert!(sys.lines().find(&sys.layout().ways(0), 0).is_some());

    access(&mut sys, false, 0x40);
    assert_eq!(sys.stats().tag_reads, 2);
    assert_eq!(sys.stats().read_hits, 1);
    assert_unlocked(&sys);
}

#[test]
fn sets_sharing_a_tag_group_wait_for_its_read() {
    let mut sys = system(row_config(AssocScheme::Loh));
    // sets 0 and 1 keep their tags at the same fast-tier address
    assert_eq!(sys.layout().tag_address(0), sys.layout().tag_address(1));
    sys.add_transaction(false, 0x0);
    sys.add_transaction(false, PAGE);
    let done = run_until_idle(&mut sys);
    assert_eq!(done.len(), 2);
    assert!(sys.stats().contention_conflicts > 0);
    assert_eq!(sys.stats().tag_reads, 2);
    assert_eq!(sys.stats().read_misses, 2);
    assert_unlocked(&sys);
}

#[test]
fn row_schemes_never_place_data_on_tags() {
    let mut sys = system(row_config(AssocScheme::Loh));
    let tags: Vec<u64> = (0..sys.layout().num_sets)
        .filter_map(|set| sys.layout().tag_address(set))
        .collect();
    for page in [0, 16, 32, 5, 21] {
        access(&mut sys, true, page * PAGE);
    }
    for (addr, _) in sys.lines().valid_lines() {
        assert!(!tags.contains(&addr), "data line at tag address {:#x}", addr);
    }
    assert_eq!(sys.stats().dirty_evictions, 1);
}
