use std::fs;

use super::harness::{access, assert_unlocked, run_until_idle, small_config, system, temp_path};

const PAGE: u64 = 4096;

#[test]
fn sequential_window_fetches_following_pages() {
    let mut config = small_config();
    config.prefetch.sequential_window = 2;
    let mut sys = system(config);

    access(&mut sys, false, PAGE);
    assert_eq!(sys.stats().prefetches_issued, 2);
    assert_eq!(sys.stats().prefetch_fills, 2);

    access(&mut sys, false, 2 * PAGE);
    access(&mut sys, true, 3 * PAGE + 0x40);
    let stats = sys.stats();
    assert_eq!(stats.read_misses, 1);
    assert_eq!(stats.read_hits, 1);
    assert_eq!(stats.write_hits, 1);
    // hits never trigger the window
    assert_eq!(stats.prefetches_issued, 2);
    assert_unlocked(&sys);
}

#[test]
fn window_stops_at_the_last_page() {
    let mut config = small_config();
    config.prefetch.sequential_window = 4;
    let mut sys = system(config);
    access(&mut sys, false, 254 * PAGE);
    assert_eq!(sys.stats().prefetches_issued, 1);
}

#[test]
fn unused_prefetch_is_counted_on_eviction() {
    let mut config = small_config();
    config.prefetch.sequential_window = 1;
    let mut sys = system(config);
    // 9 misses and pulls in 10; 18 then 26 push 10 out of set 2
    access(&mut sys, false, 9 * PAGE);
    access(&mut sys, false, 18 * PAGE);
    access(&mut sys, false, 26 * PAGE);
    assert_eq!(sys.stats().prefetches_unused, 1);
    assert_eq!(sys.stats().clean_evictions, 1);
}

#[test]
fn stream_buffer_follows_a_sequential_walk() {
    let mut config = small_config();
    config.prefetch.stream_buffer = true;
    config.prefetch.stream_buffer_length = 2;
    let mut sys = system(config);

    access(&mut sys, false, 5 * PAGE);
    access(&mut sys, false, 6 * PAGE);
    access(&mut sys, false, 7 * PAGE);

    let stats = sys.stats_snapshot();
    assert_eq!(stats.stream_allocations, 1);
    assert_eq!(stats.stream_hits, 1);
    assert_eq!(stats.stream_prefetches, 3);
    assert_eq!(stats.prefetches_issued, 3);
    assert_eq!(stats.read_misses, 2);
    assert_eq!(stats.read_hits, 1);
    // raw counters leave the stream out
    assert_eq!(sys.stats().stream_prefetches, 0);
    assert_unlocked(&sys);
}

#[test]
fn perfect_schedule_swaps_pages() {
    let schedule = temp_path("perfect.txt");
    fs::write(&schedule, format!("NUM_SETS 8\nSET 1 1\n0 {} {}\n", PAGE, 9 * PAGE)).unwrap();
    let mut config = small_config();
    config.prefetch.perfect_prefetch_file = Some(schedule.clone());
    let mut sys = system(config);

    access(&mut sys, false, PAGE);
    let stats = sys.stats();
    assert_eq!(stats.perfect_prefetches, 1);
    assert_eq!(stats.prefetch_fills, 1);
    assert_eq!(stats.flushes, 1);
    assert_eq!(sys.lines().get(PAGE).ts, 0);

    access(&mut sys, false, 9 * PAGE);
    assert_eq!(sys.stats().read_hits, 1);
    assert!(run_until_idle(&mut sys).is_empty());
    fs::remove_file(&schedule).unwrap();
}

#[test]
fn bad_schedule_fails_construction() {
    let schedule = temp_path("bad_perfect.txt");
    fs::write(&schedule, "NUM_SETS 2\nSET 5 0\n").unwrap();
    let mut config = small_config();
    config.prefetch.perfect_prefetch_file = Some(schedule.clone());
    assert!(crate::hybrid::HybridSystem::new(config).is_err());
    fs::remove_file(&schedule).unwrap();
}
