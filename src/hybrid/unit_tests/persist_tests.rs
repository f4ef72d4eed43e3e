use std::fs;

use super::harness::{access, small_config, system, temp_path};
use crate::hybrid::HybridSystem;

const PAGE: u64 = 4096;

fn resident(sys: &HybridSystem, addr: u64) -> Option<u64> {
    let layout = sys.layout();
    sys.lines()
        .find(&layout.ways(layout.set_index(addr)), layout.tag(addr))
}

#[test]
fn saved_table_restores_into_a_new_controller() {
    let table = temp_path("restore.table");
    let mut config = small_config();
    config.persist.save_file = Some(table.clone());
    let mut sys = system(config);
    access(&mut sys, true, 3 * PAGE);
    access(&mut sys, false, 12 * PAGE);
    sys.print_logfile().unwrap();

    let mut config = small_config();
    config.persist.restore_file = Some(table.clone());
    let mut restored = system(config.clone());
    let line = restored.lines().get(resident(&restored, 3 * PAGE).unwrap());
    assert!(line.valid && line.dirty && !line.is_locked());
    assert!(resident(&restored, 12 * PAGE).is_some());

    access(&mut restored, false, 3 * PAGE);
    assert_eq!(restored.stats().read_hits, 1);
    assert_eq!(restored.stats().misses(), 0);

    config.persist.restore_clean = true;
    let clean = system(config);
    let line = clean.lines().get(resident(&clean, 3 * PAGE).unwrap());
    assert!(line.valid && !line.dirty);
    fs::remove_file(&table).unwrap();
}

#[test]
fn mismatched_table_is_refused() {
    let table = temp_path("mismatch.table");
    let mut config = small_config();
    config.persist.save_file = Some(table.clone());
    let mut sys = system(config);
    access(&mut sys, false, PAGE);
    sys.print_logfile().unwrap();

    let mut config = small_config();
    config.controller.set_size = 4;
    config.persist.restore_file = Some(table.clone());
    assert!(HybridSystem::new(config).is_err());

    let mut config = small_config();
    config.persist.restore_file = Some(temp_path("missing.table"));
    assert!(HybridSystem::new(config).is_err());
    fs::remove_file(&table).unwrap();
}

#[test]
fn stats_and_access_log_are_written() {
    let stats = temp_path("stats.json");
    let log = temp_path("access.csv");
    let mut config = small_config();
    config.log.stats_file = Some(stats.clone());
    config.log.access_log = Some(log.clone());
    let mut sys = system(config);
    access(&mut sys, false, 0x2040);
    access(&mut sys, false, 0x2080);
    sys.print_logfile().unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&stats).unwrap()).unwrap();
    assert_eq!(json["read_misses"], 1);
    assert_eq!(json["read_hits"], 1);
    assert_eq!(json["completions"], 2);

    let text = fs::read_to_string(&log).unwrap();
    let mut rows = text.lines();
    assert_eq!(rows.next(), Some("cycle,event,kind,addr,cache_addr,latency"));
    let events: Vec<&str> = rows.map(|row| row.split(',').nth(1).unwrap()).collect();
    assert_eq!(
        events,
        vec!["start", "miss", "fill", "done", "release", "start", "hit", "done", "release"]
    );
    fs::remove_file(&stats).unwrap();
    fs::remove_file(&log).unwrap();
}

#[test]
fn tag_buffer_log_without_a_buffer_only_warns() {
    let report = temp_path("no_buffer.json");
    let mut config = small_config();
    config.log.tag_buffer_log = Some(report.clone());
    let mut sys = system(config);
    assert!(sys.tag_buffer().is_none());
    sys.print_logfile().unwrap();
    assert!(!report.exists());
}
