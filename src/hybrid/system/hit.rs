use anyhow::bail;

use super::HybridSystem;
use crate::hybrid::config::AssocScheme;
use crate::hybrid::contention::Leg;
use crate::hybrid::pending::{Pending, PendingOp, Tier};
use crate::hybrid::transaction::{Transaction, TransactionKind};

impl HybridSystem {
    pub(super) fn on_hit(
        &mut self,
        t: Transaction,
        set: u64,
        line: u64,
        probed: bool,
    ) -> anyhow::Result<()> {
        let page = self.layout.page_address(t.addr);
        let burst = line + self.layout.align(self.layout.page_offset(t.addr));
        let mut p = Pending::new(PendingOp::CacheRead, &t, page);
        p.cache_addr = line;
        p.set = set;

        match t.kind {
            TransactionKind::Read => {
                self.contention.lock_line(&mut self.lines, line, set);
                if probed {
                    return self.cache_read_finish(p, false);
                }
                self.pending.insert(p, &[(Tier::Fast, false, burst)])?;
                self.fast_queue.push_back((false, burst));
                Ok(())
            }
            TransactionKind::Write => {
                self.contention.lock_line(&mut self.lines, line, set);
                self.fast_queue.push_back((true, burst));
                self.cache_write_finish(p, false)
            }
            TransactionKind::Flush => {
                self.contention.lock_line(&mut self.lines, line, set);
                let entry = self.lines.get_mut(line);
                entry.ts = 0;
                entry.access_count = 0;
                self.stats.flushes += 1;
                self.release(&t, page, set, Some(line))
            }
            TransactionKind::Prefetch => {
                self.stats.prefetch_hit_nops += 1;
                self.release(&t, page, set, None)
            }
            TransactionKind::Sync => {
                let entry = self.lines.get(line);
                if !entry.dirty {
                    return self.release(&t, page, set, None);
                }
                self.stats.sync_writebacks += 1;
                self.contention.lock_line(&mut self.lines, line, set);
                self.contention.lock_page(page)?;
                self.contention.increment(page, Leg::Writeback)?;
                p.victim_valid = true;
                p.victim_tag = entry.tag;
                self.read_victim(p.with_op(PendingOp::VictimRead))
            }
            TransactionKind::SyncAllCounter => bail!("sync-all step reached hit handling"),
        }
    }

    /// Data read from the fast tier; `line_read` when it is the tail of a fill.
    pub(super) fn cache_read_finish(&mut self, p: Pending, line_read: bool) -> anyhow::Result<()> {
        let line = self.lines.get_mut(p.cache_addr);
        line.ts = self.cycle;
        line.used = true;
        if !line_read {
            line.access_count += 1;
        }
        self.finish_demand(p, false)
    }

    pub(super) fn cache_write_finish(&mut self, p: Pending, line_read: bool) -> anyhow::Result<()> {
        let line = self.lines.get_mut(p.cache_addr);
        line.dirty = true;
        line.ts = self.cycle;
        line.used = true;
        if !line_read {
            line.access_count += 1;
        }
        self.finish_demand(p, true)
    }

    fn finish_demand(&mut self, p: Pending, is_write: bool) -> anyhow::Result<()> {
        let t = p.transaction();
        if !p.callback_sent {
            self.complete(p.orig_addr, is_write, p.arrival);
        }
        self.log_event("done", &t, Some(p.cache_addr));
        self.release(&t, p.back_addr, p.set, Some(p.cache_addr))
    }

    /// Read a line out of the fast tier so it can be written to the bulk tier.
    pub(super) fn read_victim(&mut self, p: Pending) -> anyhow::Result<()> {
        // probing layouts already brought the first burst in
        let skip = match self.layout.scheme() {
            AssocScheme::Direct | AssocScheme::Channel => 1,
            _ => 0,
        };
        let burst_size = self.layout.burst_size;
        let bursts: Vec<_> = (skip..self.layout.fast_bursts_per_page())
            .map(|i| (Tier::Fast, false, p.cache_addr + i * burst_size))
            .collect();
        if bursts.is_empty() {
            return self.victim_read_finish(p);
        }
        self.pending.insert(p, &bursts)?;
        self.fast_queue
            .extend(bursts.iter().map(|&(_, is_write, addr)| (is_write, addr)));
        Ok(())
    }

    pub(super) fn victim_read_finish(&mut self, p: Pending) -> anyhow::Result<()> {
        let victim_back = if p.kind == TransactionKind::Sync {
            self.lines.get_mut(p.cache_addr).dirty = false;
            p.back_addr
        } else {
            self.layout.back_address(p.victim_tag, p.set)
        };
        let back_burst = self.layout.back_burst_size;
        let bursts: Vec<_> = (0..self.layout.back_bursts_per_page())
            .map(|i| (Tier::Back, true, victim_back + i * back_burst))
            .collect();
        self.pending.insert(p.with_op(PendingOp::VictimWrite), &bursts)?;
        self.back_queue
            .extend(bursts.iter().map(|&(_, is_write, addr)| (is_write, addr)));
        Ok(())
    }

    pub(super) fn victim_write_finish(&mut self, p: Pending) -> anyhow::Result<()> {
        self.contention.decrement(p.back_addr, Leg::Writeback)?;
        let t = p.transaction();
        self.log_event("writeback", &t, Some(p.cache_addr));
        self.release(&t, p.back_addr, p.set, Some(p.cache_addr))
    }
}
