use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context};
use log::{debug, info, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::backing::{BackingMemory, TimedMemory};
use crate::timeq::Cycle;

use super::access_log::AccessLog;
use super::config::{AssocScheme, HybridConfig};
use super::contention::{ContentionController, Release};
use super::layout::Layout;
use super::line::LineDirectory;
use super::pending::PendingTable;
use super::persist;
use super::prefetch::{PerfectPrefetch, StreamPrefetcher};
use super::remap::{remap, Remapped};
use super::stats::HybridStats;
use super::tag_buffer::{TagBuffer, TagUsage};
use super::tlb::TagTlb;
use super::transaction::{Completion, Transaction, TransactionKind};
use super::victim::VictimSelector;

mod classify;
mod events;
mod hit;
mod miss;

pub type CompletionCallback = Box<dyn FnMut(u64, Cycle)>;

/// Control operations written to the controller's MMIO register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MmioOp {
    Nop = 0,
    SyncAll = 1,
    TaskSwitch = 2,
    /// Address packs a 48-bit base and a 16-bit page count minus one.
    PrefetchRange = 3,
}

const PREFETCH_BASE_MASK: u64 = (1 << 48) - 1;

pub struct HybridSystem {
    config: Arc<HybridConfig>,
    layout: Layout,
    fast: Box<dyn BackingMemory>,
    back: Box<dyn BackingMemory>,
    lines: LineDirectory,
    contention: ContentionController,
    pending: PendingTable,
    victims: VictimSelector,
    tag_buffer: Option<TagBuffer>,
    tlb: Option<TagTlb>,
    stream: Option<StreamPrefetcher>,
    perfect: Option<PerfectPrefetch>,
    stats: HybridStats,
    access_log: Option<AccessLog>,

    queue: VecDeque<Transaction>,
    fast_queue: VecDeque<(bool, u64)>,
    back_queue: VecDeque<(bool, u64)>,
    /// Admitted transaction waiting out the controller delay.
    active: Option<Transaction>,
    delay: u64,
    /// Admitted transactions not yet released.
    pending_count: u64,

    completions: VecDeque<Completion>,
    read_done: Option<CompletionCallback>,
    write_done: Option<CompletionCallback>,
    cycle: Cycle,
}

impl HybridSystem {
    /// Controller over two timed memory models built from the configuration.
    pub fn new(config: HybridConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let fast = TimedMemory::new("fast", config.fast_memory);
        let back = TimedMemory::new("back", config.back_memory);
        Self::with_memories(config, Box::new(fast), Box::new(back))
    }

    pub fn with_memories(
        config: HybridConfig,
        fast: Box<dyn BackingMemory>,
        back: Box<dyn BackingMemory>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let layout = Layout::new(&config);
        let c = &config.controller;

        let tag_buffer = (c.assoc == AssocScheme::ComboTag).then(|| {
            let mut tb = TagBuffer::new(&config.tag_buffer, config.geometry.channels, c.seed);
            if config.log.tag_buffer_log.is_some() {
                tb.set_observer(Box::new(TagUsage::new(config.tag_buffer.num_tag_sets)));
            }
            tb
        });
        let stream = config.prefetch.stream_buffer.then(|| {
            StreamPrefetcher::new(
                config.prefetch.one_miss_table_size,
                config.prefetch.num_stream_buffers,
                config.prefetch.stream_buffer_length,
                layout.total_pages,
            )
        });
        let perfect = match &config.prefetch.perfect_prefetch_file {
            Some(path) => Some(PerfectPrefetch::load(path)?),
            None => None,
        };
        let access_log = match &config.log.access_log {
            Some(path) => Some(
                AccessLog::create(path)
                    .with_context(|| format!("cannot create access log {}", path.display()))?,
            ),
            None => None,
        };

        let mut system = Self {
            layout,
            fast,
            back,
            lines: LineDirectory::new(),
            contention: ContentionController::new(),
            pending: PendingTable::new(),
            victims: VictimSelector::new(c.replacement, c.seed),
            tag_buffer,
            tlb: TagTlb::new(&config.tlb, c.page_size),
            stream,
            perfect,
            stats: HybridStats::default(),
            access_log,
            queue: VecDeque::new(),
            fast_queue: VecDeque::new(),
            back_queue: VecDeque::new(),
            active: None,
            delay: 0,
            pending_count: 0,
            completions: VecDeque::new(),
            read_done: None,
            write_done: None,
            cycle: 0,
            config,
        };

        if system.config.controller.prefill_cache {
            system.prefill();
        }
        if let Some(path) = system.config.persist.restore_file.clone() {
            let count = persist::restore(
                &path,
                &system.layout,
                &mut system.lines,
                system.config.persist.restore_clean,
            )?;
            info!("restored {} cache lines from {}", count, path.display());
        }
        info!(
            "hybrid controller: {:?}, {} sets x {} ways, {} usable cache pages",
            system.layout.scheme(),
            system.layout.num_sets,
            system.layout.set_size,
            system.layout.actual_cache_pages
        );
        Ok(system)
    }

    /// Map the first pages of the backing space, one per way.
    fn prefill(&mut self) {
        let dirty = self.config.controller.prefill_dirty;
        for page in 0..self.layout.actual_cache_pages.min(self.layout.total_pages) {
            let set = page % self.layout.num_sets;
            let tag = page / self.layout.num_sets;
            let line = self.lines.get_mut(self.layout.way_address(set, tag));
            line.valid = true;
            line.dirty = dirty;
            line.tag = tag;
        }
    }

    pub fn register_callbacks(&mut self, read_done: CompletionCallback, write_done: CompletionCallback) {
        self.read_done = Some(read_done);
        self.write_done = Some(write_done);
    }

    /// Queue a caller read or write. Never refuses; admission only delays.
    pub fn add_transaction(&mut self, is_write: bool, addr: u64) -> bool {
        if is_write {
            self.stats.writes += 1;
        } else {
            self.stats.reads += 1;
        }
        let kind = if is_write {
            TransactionKind::Write
        } else {
            TransactionKind::Read
        };
        match remap(addr, self.config.controller.remap_mmio) {
            Remapped::Dropped => {
                self.stats.mmio_dropped += 1;
                debug!("{}: dropping mmio access {:#x}", self.cycle, addr);
                self.complete(addr, is_write, self.cycle);
            }
            Remapped::Mapped(mapped) => {
                if mapped != addr {
                    self.stats.mmio_remapped += 1;
                }
                self.queue
                    .push_back(Transaction::new(kind, mapped, addr, self.cycle));
                self.contention.request_scan();
            }
        }
        true
    }

    /// Queue a prefetch of the page holding `addr`, ahead of waiting demand traffic.
    pub fn add_prefetch(&mut self, addr: u64) {
        if let Remapped::Mapped(mapped) = remap(addr, self.config.controller.remap_mmio) {
            self.enqueue_front(TransactionKind::Prefetch, mapped);
        }
    }

    pub fn add_flush(&mut self, addr: u64) {
        if let Remapped::Mapped(mapped) = remap(addr, self.config.controller.remap_mmio) {
            self.enqueue_front(TransactionKind::Flush, mapped);
        }
    }

    /// Write every dirty line back to the bulk tier.
    pub fn sync_all(&mut self) {
        info!("{}: sync-all over {} lines", self.cycle, self.layout.num_slots());
        self.queue.push_back(Transaction::new(
            TransactionKind::SyncAllCounter,
            0,
            0,
            self.cycle,
        ));
        self.contention.request_scan();
    }

    pub fn mmio(&mut self, op: u64, addr: u64) -> anyhow::Result<()> {
        let Some(op) = MmioOp::from_u64(op) else {
            bail!("unknown mmio operation {} (address {:#x})", op, addr);
        };
        match op {
            MmioOp::Nop => {}
            MmioOp::SyncAll => self.sync_all(),
            MmioOp::TaskSwitch => info!("{}: task switch marker {:#x}", self.cycle, addr),
            MmioOp::PrefetchRange => {
                let base = addr & PREFETCH_BASE_MASK;
                let pages = (addr >> 48) + 1;
                // queued front-first, so walk backwards to keep address order
                for i in (0..pages).rev() {
                    self.add_prefetch(base + i * self.layout.page_size);
                }
            }
        }
        Ok(())
    }

    /// Advance the controller and both memories by one cycle.
    pub fn update(&mut self) -> anyhow::Result<()> {
        if self.delay > 0 {
            self.delay -= 1;
        }
        if self.delay == 0 {
            if let Some(t) = self.active.take() {
                self.process(t)?;
            }
        }
        if self.delay == 0 && self.active.is_none() && self.contention.take_check_queue() {
            self.admit_next()?;
        }

        self.send_requests();

        self.fast.update();
        while let Some(event) = self.fast.poll_event() {
            self.on_fast_event(event)?;
        }
        self.back.update();
        while let Some(event) = self.back.poll_event() {
            self.on_back_event(event)?;
        }

        self.stats
            .update_occupancy(self.queue.len(), self.pending_count);
        self.cycle += 1;
        Ok(())
    }

    fn send_requests(&mut self) {
        if let Some(&(is_write, addr)) = self.fast_queue.front() {
            if self.fast.add_transaction(is_write, addr) {
                self.fast_queue.pop_front();
            } else {
                self.stats.fast_rejects += 1;
            }
        }
        if let Some(&(is_write, addr)) = self.back_queue.front() {
            if self.back.add_transaction(is_write, addr) {
                self.back_queue.pop_front();
            } else {
                self.stats.back_rejects += 1;
            }
        }
    }

    fn enqueue_front(&mut self, kind: TransactionKind, addr: u64) {
        if kind == TransactionKind::Prefetch {
            self.stats.prefetches_issued += 1;
        }
        self.queue
            .push_front(Transaction::new(kind, addr, addr, self.cycle));
        self.contention.request_scan();
    }

    /// Report a finished caller request.
    fn complete(&mut self, orig_addr: u64, is_write: bool, arrival: Cycle) {
        let now = self.cycle;
        self.stats.record_completion(now - arrival);
        let callback = if is_write {
            self.write_done.as_mut()
        } else {
            self.read_done.as_mut()
        };
        match callback {
            Some(callback) => callback(orig_addr, now),
            None => self.completions.push_back(Completion {
                addr: orig_addr,
                cycle: now,
                is_write,
            }),
        }
    }

    /// Release the locks a transaction holds on `page`; deferred while legs are outstanding.
    fn release(&mut self, t: &Transaction, page: u64, set: u64, line: Option<u64>) -> anyhow::Result<()> {
        let released = self
            .contention
            .unlock(&mut self.lines, page, set, line)
            .with_context(|| format!("releasing {} of {:#x}", t.kind.name(), t.orig_addr))?;
        if released == Release::Released {
            if self.pending_count == 0 {
                bail!("released {:#x} with no admitted transactions", page);
            }
            self.pending_count -= 1;
            if let Some(log) = self.access_log.as_mut() {
                log.write_event(
                    self.cycle,
                    "release",
                    t.kind,
                    t.orig_addr,
                    line,
                    Some(self.cycle - t.arrival),
                );
            }
        }
        Ok(())
    }

    fn log_event(&mut self, event: &str, t: &Transaction, cache_addr: Option<u64>) {
        if let Some(log) = self.access_log.as_mut() {
            log.write_event(self.cycle, event, t.kind, t.orig_addr, cache_addr, None);
        }
    }

    /// Save the cache table, write statistics and the tag buffer report.
    pub fn print_logfile(&mut self) -> anyhow::Result<()> {
        if let Some(path) = &self.config.persist.save_file {
            persist::save(path, &self.layout, &self.lines)?;
            info!("saved {} cache lines to {}", self.lines.valid_lines().len(), path.display());
        }
        if let Some(path) = &self.config.log.stats_file {
            let payload = serde_json::to_string_pretty(&self.stats_snapshot())?;
            fs::write(path, payload)
                .with_context(|| format!("cannot write stats {}", path.display()))?;
        }
        if let Some(path) = &self.config.log.tag_buffer_log {
            match self.tag_buffer.as_ref().and_then(TagBuffer::observer) {
                Some(observer) => observer.write_report(path)?,
                None => warn!("tag buffer log requested but no tag buffer is in use"),
            }
        }
        if let Some(log) = self.access_log.as_mut() {
            log.flush();
        }
        Ok(())
    }

    /// Statistics with the stream prefetcher's counters folded in.
    pub fn stats_snapshot(&self) -> HybridStats {
        let mut stats = self.stats;
        if let Some(stream) = &self.stream {
            let s = stream.stats();
            stats.stream_allocations = s.allocations;
            stats.stream_hits = s.hits;
            stats.stream_prefetches = s.prefetches;
        }
        stats
    }

    pub fn poll_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    pub fn stats(&self) -> &HybridStats {
        &self.stats
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn lines(&self) -> &LineDirectory {
        &self.lines
    }

    pub fn contention(&self) -> &ContentionController {
        &self.contention
    }

    pub fn tag_buffer(&self) -> Option<&TagBuffer> {
        self.tag_buffer.as_ref()
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn pending_count(&self) -> u64 {
        self.pending_count
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Nothing queued, admitted or in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
            && self.active.is_none()
            && self.pending_count == 0
            && self.pending.is_empty()
            && self.fast_queue.is_empty()
            && self.back_queue.is_empty()
            && self.fast.pending() == 0
            && self.back.pending() == 0
            && self.contention.is_idle()
    }
}
