use std::collections::VecDeque;

use super::harness::{access, assert_unlocked, run_until_idle, small_config, system};
use crate::backing::{BackingMemory, MemEvent, TimedMemory};
use crate::hybrid::HybridSystem;

const PAGE: u64 = 4096;

#[test]
fn read_miss_fills_then_write_hits() {
    let mut sys = system(small_config());
    let done = access(&mut sys, false, 0x1040);
    assert_eq!(done.addr, 0x1040);
    assert!(!done.is_write);
    assert_eq!(sys.stats().read_misses, 1);

    let line = sys.lines().get(0x1000);
    assert!(line.valid && !line.dirty);
    assert_eq!(line.tag, 0);
    assert_unlocked(&sys);

    let done = access(&mut sys, true, 0x1080);
    assert!(done.is_write);
    assert_eq!(sys.stats().write_hits, 1);
    let line = sys.lines().get(0x1000);
    assert!(line.dirty);
    assert_eq!(line.tag, 0);
    assert!(line.used);
    assert_unlocked(&sys);
}

#[test]
fn hit_is_faster_than_miss() {
    let mut sys = system(small_config());
    let start = sys.cycle();
    let miss = access(&mut sys, false, 0x3000);
    let miss_latency = miss.cycle - start;

    let start = sys.cycle();
    let hit = access(&mut sys, false, 0x3000);
    assert!(hit.cycle - start < miss_latency);
    assert_eq!(sys.stats().read_hits, 1);
    assert_eq!(sys.stats().completions, 2);
}

#[test]
fn dirty_victim_is_written_back() {
    let mut sys = system(small_config());
    // pages 1, 9 and 17 all map to set 1
    access(&mut sys, true, PAGE);
    access(&mut sys, true, 9 * PAGE);
    assert_eq!(sys.lines().get(9 * PAGE).tag, 1);

    access(&mut sys, true, 17 * PAGE);
    let stats = sys.stats();
    assert_eq!(stats.dirty_evictions, 1);
    assert_eq!(stats.clean_evictions, 0);
    assert_eq!(stats.write_misses, 3);

    let line = sys.lines().get(PAGE);
    assert_eq!(line.tag, 2);
    assert!(line.dirty);
    assert_unlocked(&sys);
}

#[test]
fn clean_victim_needs_no_write_back() {
    let mut sys = system(small_config());
    for page in [2, 10, 18] {
        access(&mut sys, false, page * PAGE);
    }
    assert_eq!(sys.stats().clean_evictions, 1);
    assert_eq!(sys.stats().dirty_evictions, 0);
    assert_unlocked(&sys);
}

#[test]
fn one_transaction_per_page_in_flight() {
    let mut sys = system(small_config());
    sys.add_transaction(false, 0x2000);
    sys.add_transaction(false, 0x2040);
    for _ in 0..10 {
        sys.update().unwrap();
        assert!(sys.pending_count() <= 1);
    }
    assert_eq!(sys.queue_len(), 1);
    assert!(sys.stats().contention_conflicts > 0);

    let done = run_until_idle(&mut sys);
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].addr, 0x2000);
    assert_eq!(done[1].addr, 0x2040);
    assert_eq!(sys.stats().read_misses, 1);
    assert_eq!(sys.stats().read_hits, 1);
    assert_unlocked(&sys);
}

#[test]
fn independent_pages_overlap() {
    let mut sys = system(small_config());
    for page in 0..4 {
        sys.add_transaction(false, page * PAGE);
    }
    let mut max_admitted = 0;
    while !sys.is_idle() {
        sys.update().unwrap();
        max_admitted = max_admitted.max(sys.pending_count());
    }
    assert!(max_admitted > 1);
    assert_eq!(sys.stats().max_pending, max_admitted);
    assert_eq!(sys.stats().read_misses, 4);
    assert_unlocked(&sys);
}

#[test]
fn callbacks_replace_the_completion_queue() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let seen = Rc::new(RefCell::new(Vec::new()));
    let reads = Rc::clone(&seen);
    let writes = Rc::clone(&seen);
    let mut sys = system(small_config());
    sys.register_callbacks(
        Box::new(move |addr: u64, _cycle: u64| reads.borrow_mut().push((false, addr))),
        Box::new(move |addr: u64, _cycle: u64| writes.borrow_mut().push((true, addr))),
    );
    sys.add_transaction(false, 0x5000);
    sys.add_transaction(true, 0x6000);
    assert!(run_until_idle(&mut sys).is_empty());
    let mut seen = seen.borrow().clone();
    seen.sort();
    assert_eq!(seen, vec![(false, 0x5000), (true, 0x6000)]);
}

#[test]
fn flush_ages_the_line() {
    let mut sys = system(small_config());
    access(&mut sys, false, PAGE);
    access(&mut sys, false, 9 * PAGE);
    // 9 is newer, but flushing it makes it the next victim
    sys.add_flush(9 * PAGE);
    assert!(run_until_idle(&mut sys).is_empty());
    assert_eq!(sys.stats().flushes, 1);
    assert_eq!(sys.lines().get(9 * PAGE).ts, 0);

    access(&mut sys, false, 17 * PAGE);
    assert_eq!(sys.lines().get(9 * PAGE).tag, 2);
    assert_eq!(sys.lines().get(PAGE).tag, 0);

    sys.add_flush(33 * PAGE);
    run_until_idle(&mut sys);
    assert_eq!(sys.stats().flush_misses, 1);
    assert_unlocked(&sys);
}

#[test]
fn critical_line_completes_before_the_fill() {
    fn first_read(critical: bool) -> (u64, HybridSystem) {
        let mut config = small_config();
        config.controller.critical_line_first = critical;
        config.controller.back_burst_size = Some(1024);
        config.back_memory.burst_bytes = 1024;
        config.back_memory.bytes_per_cycle = 32;
        let mut sys = system(config);
        let done = access(&mut sys, false, 0x4000);
        (done.cycle, sys)
    }

    let (early, sys) = first_read(true);
    let (late, _) = first_read(false);
    assert!(early < late);
    assert_eq!(sys.stats().completions, 1);
    assert!(sys.lines().get(0x4000).valid);
}

#[test]
fn out_of_range_address_is_an_error() {
    let mut sys = system(small_config());
    sys.add_transaction(false, 256 * PAGE);
    let err = sys.update().unwrap_err();
    assert!(format!("{:#}", err).contains("outside"));
}

/// Bulk tier that announces every read's first burst `notices` times before it lands.
struct Announcing {
    inner: TimedMemory,
    notices: usize,
    events: VecDeque<MemEvent>,
}

impl BackingMemory for Announcing {
    fn add_transaction(&mut self, is_write: bool, addr: u64) -> bool {
        let accepted = self.inner.add_transaction(is_write, addr);
        if accepted && !is_write {
            for _ in 0..self.notices {
                self.events.push_back(MemEvent::CriticalLine { addr, cycle: 0 });
            }
        }
        accepted
    }

    fn update(&mut self) {
        self.inner.update();
        while let Some(event) = self.inner.poll_event() {
            self.events.push_back(event);
        }
    }

    fn poll_event(&mut self) -> Option<MemEvent> {
        self.events.pop_front()
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }
}

fn announcing_system(notices: usize) -> HybridSystem {
    let config = small_config();
    let fast = TimedMemory::new("fast", config.fast_memory);
    let back = Announcing {
        inner: TimedMemory::new("back", config.back_memory),
        notices,
        events: VecDeque::new(),
    };
    HybridSystem::with_memories(config, Box::new(fast), Box::new(back)).unwrap()
}

#[test]
fn critical_line_notice_completes_early() {
    let mut plain = announcing_system(0);
    let late = access(&mut plain, false, 0x4000);
    let mut sys = announcing_system(1);
    let early = access(&mut sys, false, 0x4000);
    assert!(early.cycle < late.cycle);
    assert_eq!(sys.stats().completions, 1);
    assert!(sys.lines().get(0x4000).valid);
    assert_unlocked(&sys);
}

#[test]
fn repeated_critical_line_notice_is_an_error() {
    let mut sys = announcing_system(2);
    sys.add_transaction(false, 0x4000);
    let err = (0..1_000)
        .find_map(|_| sys.update().err())
        .expect("second notice was accepted");
    assert!(format!("{:#}", err).contains("second critical-line notice"));
}
