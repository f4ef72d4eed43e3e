use std::path::PathBuf;

use crate::hybrid::config::{AssocScheme, HybridConfig};
use crate::hybrid::{Completion, HybridSystem};

/// 256 backing pages over 8 two-way sets, with quick memories.
pub fn small_config() -> HybridConfig {
    let mut config = HybridConfig::default();
    config.controller.total_pages = 256;
    config.controller.cache_pages = 16;
    config.controller.set_size = 2;
    config.fast_memory.base_latency = 10;
    config.fast_memory.bytes_per_cycle = 64;
    config.back_memory.base_latency = 40;
    config.back_memory.bytes_per_cycle = 256;
    config
}

/// Rows of 16 pages: two tag pages, then four sets of two ways. 16 sets in all.
pub fn row_config(assoc: AssocScheme) -> HybridConfig {
    let mut config = small_config();
    config.controller.assoc = assoc;
    config.controller.cache_pages = 64;
    config.tag_buffer.sets_per_line = 4;
    config.tag_buffer.sets_per_tag_group = 2;
    config.geometry.rows = 4;
    config.geometry.columns = 16;
    config
}

pub fn system(config: HybridConfig) -> HybridSystem {
    HybridSystem::new(config).unwrap()
}

/// Update until nothing is queued or in flight, returning the completions seen.
pub fn run_until_idle(system: &mut HybridSystem) -> Vec<Completion> {
    let mut done = Vec::new();
    for _ in 0..100_000 {
        while let Some(c) = system.poll_completion() {
            done.push(c);
        }
        if system.is_idle() {
            return done;
        }
        system.update().unwrap();
    }
    panic!("controller did not drain by cycle {}", system.cycle());
}

/// Submit one access and run it to completion.
pub fn access(system: &mut HybridSystem, is_write: bool, addr: u64) -> Completion {
    assert!(system.add_transaction(is_write, addr));
    let done = run_until_idle(system);
    assert_eq!(done.len(), 1, "expected one completion for {:#x}", addr);
    done[0]
}

pub fn assert_unlocked(system: &HybridSystem) {
    assert!(system.contention().is_idle());
    assert_eq!(system.lines().locked_lines(), 0);
    assert_eq!(system.pending_count(), 0);
}

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("hybridmem_{}_{}", std::process::id(), name))
}
