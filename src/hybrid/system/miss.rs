use anyhow::bail;
use log::trace;

use super::HybridSystem;
use crate::hybrid::contention::Leg;
use crate::hybrid::pending::{Pending, PendingOp, Tier};
use crate::hybrid::prefetch::PrefetchList;
use crate::hybrid::transaction::{Transaction, TransactionKind};

impl HybridSystem {
    pub(super) fn on_miss(&mut self, t: Transaction, set: u64, ways: &[u64]) -> anyhow::Result<()> {
        let page = self.layout.page_address(t.addr);
        match t.kind {
            TransactionKind::Flush => {
                self.stats.flush_misses += 1;
                return self.release(&t, page, set, None);
            }
            // evicted since the walk looked at it
            TransactionKind::Sync => return self.release(&t, page, set, None),
            TransactionKind::SyncAllCounter => bail!("sync-all step reached miss handling"),
            _ => {}
        }
        if t.kind.is_demand() {
            self.miss_prefetches(&t);
        }

        let Some(victim) = self.victims.select(&self.lines, ways) else {
            bail!(
                "every way of set {} is locked for {} {:#x}",
                set,
                t.kind.name(),
                t.orig_addr
            );
        };
        self.contention.lock_page(page)?;

        let old = self.lines.get(victim);
        let mut p = Pending::new(PendingOp::LineRead, &t, page);
        p.cache_addr = victim;
        p.set = set;
        p.victim_valid = old.valid;
        p.victim_tag = old.tag;
        if old.valid {
            let victim_page = self.layout.back_address(old.tag, set);
            self.contention.lock_victim(page, victim_page)?;
            if old.dirty {
                self.stats.dirty_evictions += 1;
            } else {
                self.stats.clean_evictions += 1;
            }
            if old.prefetched && !old.used {
                self.stats.prefetches_unused += 1;
            }
            if t.kind == TransactionKind::Prefetch {
                self.stats.prefetch_victims += 1;
            }
            trace!(
                "{}: {:#x} evicts {:#x} from {:#x}",
                self.cycle,
                page,
                victim_page,
                victim
            );
        }
        self.contention.lock_line(&mut self.lines, victim, set);

        // the fill goes out first, the write-back trails it
        self.contention.increment(page, Leg::Fill)?;
        let back_burst = self.layout.back_burst_size;
        let bursts: Vec<_> = (0..self.layout.back_bursts_per_page())
            .map(|i| (Tier::Back, false, page + i * back_burst))
            .collect();
        self.pending.insert(p, &bursts)?;
        self.back_queue
            .extend(bursts.iter().map(|&(_, is_write, addr)| (is_write, addr)));

        if old.valid && old.dirty {
            self.contention.increment(page, Leg::Writeback)?;
            self.read_victim(p.with_op(PendingOp::VictimRead))?;
        }
        Ok(())
    }

    /// Sequential and stream prefetches after a demand miss, queued ahead of later demand.
    fn miss_prefetches(&mut self, t: &Transaction) {
        let page = self.layout.page_number(t.addr);
        let mut pages: PrefetchList = (1..=self.config.prefetch.sequential_window)
            .map(|i| page + i)
            .collect();
        let now = self.cycle;
        if let Some(stream) = self.stream.as_mut() {
            pages.extend(stream.on_miss(page, now));
        }
        for next in pages.into_iter().rev() {
            if next < self.layout.total_pages {
                self.enqueue_front(TransactionKind::Prefetch, next * self.layout.page_size);
            }
        }
    }

    /// The missing page arrived: install it, write it into the fast tier and finish the access.
    pub(super) fn line_read_finish(&mut self, p: Pending) -> anyhow::Result<()> {
        self.contention.decrement(p.back_addr, Leg::Fill)?;

        let tag = self.layout.tag(p.addr);
        let line = self.lines.get_mut(p.cache_addr);
        line.valid = true;
        line.dirty = false;
        line.tag = tag;
        line.ts = self.cycle;
        line.used = false;
        line.access_count = 1;
        line.prefetched = p.kind == TransactionKind::Prefetch;

        let burst_size = self.layout.burst_size;
        for i in 0..self.layout.fast_bursts_per_page() {
            self.fast_queue
                .push_back((true, p.cache_addr + i * burst_size));
        }
        if let Some(tag_addr) = self.layout.tag_address(p.set) {
            self.fast_queue.push_back((true, tag_addr));
            self.stats.tag_writes += 1;
        }

        let t = p.transaction();
        self.log_event("fill", &t, Some(p.cache_addr));
        match p.kind {
            TransactionKind::Read => self.cache_read_finish(p, true),
            TransactionKind::Write => self.cache_write_finish(p, true),
            TransactionKind::Prefetch => {
                self.stats.prefetch_fills += 1;
                self.release(&t, p.back_addr, p.set, Some(p.cache_addr))
            }
            kind => bail!("{} reached a line fill", kind.name()),
        }
    }
}
