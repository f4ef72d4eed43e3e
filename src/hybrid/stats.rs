use serde::Serialize;

use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HybridStats {
    pub reads: u64,
    pub writes: u64,
    pub read_hits: u64,
    pub write_hits: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    pub clean_evictions: u64,
    pub dirty_evictions: u64,
    pub flushes: u64,
    pub flush_misses: u64,
    pub syncs: u64,
    pub sync_writebacks: u64,
    pub prefetches_issued: u64,
    pub prefetch_fills: u64,
    /// Prefetched lines evicted before any demand touched them.
    pub prefetches_unused: u64,
    /// Lines evicted by a prefetch fill.
    pub prefetch_victims: u64,
    /// Prefetches that found their page already cached.
    pub prefetch_hit_nops: u64,
    pub mmio_dropped: u64,
    pub mmio_remapped: u64,
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    pub tag_buffer_accesses: u64,
    pub tag_buffer_hits: u64,
    pub tag_buffer_prefetch_hits: u64,
    pub tag_reads: u64,
    pub tag_writes: u64,
    pub tag_prefetches: u64,
    pub stream_allocations: u64,
    pub stream_hits: u64,
    pub stream_prefetches: u64,
    pub perfect_prefetches: u64,
    /// Admission scans that found a transaction blocked on a busy page or set.
    pub contention_conflicts: u64,
    pub fast_rejects: u64,
    pub back_rejects: u64,
    pub max_queue: u64,
    pub max_pending: u64,
    pub completions: u64,
    pub total_latency: Cycle,
    pub max_latency: Cycle,
}

impl HybridStats {
    pub fn hits(&self) -> u64 {
        self.read_hits + self.write_hits
    }

    pub fn misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn average_latency(&self) -> f64 {
        if self.completions == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.completions as f64
        }
    }

    pub fn record_completion(&mut self, latency: Cycle) {
        self.completions = self.completions.saturating_add(1);
        self.total_latency = self.total_latency.saturating_add(latency);
        self.max_latency = self.max_latency.max(latency);
    }

    pub fn record_access(&mut self, is_write: bool, hit: bool) {
        match (is_write, hit) {
            (false, true) => self.read_hits += 1,
            (false, false) => self.read_misses += 1,
            (true, true) => self.write_hits += 1,
            (true, false) => self.write_misses += 1,
        }
    }

    pub fn update_occupancy(&mut self, queue: usize, pending: u64) {
        self.max_queue = self.max_queue.max(queue as u64);
        self.max_pending = self.max_pending.max(pending);
    }
}
