use anyhow::{bail, ensure};
use log::debug;

use super::HybridSystem;
use crate::hybrid::config::AssocScheme;
use crate::hybrid::pending::{Pending, PendingOp, Tier};
use crate::hybrid::tag_buffer::TagHit;
use crate::hybrid::transaction::{Transaction, TransactionKind};

/// What a queued transaction must find unlocked before it can start.
struct AdmissionKey {
    page: u64,
    set: u64,
    tag_addr: Option<u64>,
}

impl HybridSystem {
    fn admission_key(&self, t: &Transaction) -> anyhow::Result<AdmissionKey> {
        let layout = &self.layout;
        if t.kind == TransactionKind::SyncAllCounter {
            let k = t.addr / layout.page_size;
            ensure!(
                k < layout.num_slots(),
                "sync-all step {} is past the last of {} line slots",
                k,
                layout.num_slots()
            );
            let (set, _) = layout.slot(k);
            return Ok(AdmissionKey {
                page: t.addr,
                set,
                tag_addr: None,
            });
        }

        ensure!(
            t.addr < layout.address_space(),
            "{} {:#x} is outside the {:#x}-byte backing space",
            t.kind.name(),
            t.orig_addr,
            layout.address_space()
        );
        let set = layout.set_index(t.addr);
        let tag_addr = match layout.scheme() {
            AssocScheme::Channel => Some(layout.way_address(set, 0)),
            _ => layout.tag_address(set),
        };
        Ok(AdmissionKey {
            page: layout.page_address(t.addr),
            set,
            tag_addr,
        })
    }

    /// Start the first queued transaction whose page, set and tag group are free.
    pub(super) fn admit_next(&mut self) -> anyhow::Result<()> {
        if self.contention.locked_pages() as u64 >= self.layout.num_sets {
            return Ok(());
        }
        let set_limit = match self.layout.scheme() {
            AssocScheme::TagTlb => self.layout.set_size,
            _ => 1,
        };

        let mut chosen = None;
        let mut conflicts = 0;
        for (i, t) in self.queue.iter().enumerate() {
            let key = self.admission_key(t)?;
            if self
                .contention
                .is_unlocked(key.page, key.set, set_limit, key.tag_addr)
            {
                chosen = Some((i, key.page));
                break;
            }
            conflicts += 1;
        }
        self.stats.contention_conflicts += conflicts;

        let Some((i, page)) = chosen else {
            return Ok(());
        };
        let Some(t) = self.queue.remove(i) else {
            bail!("admission picked queue slot {} of {}", i, self.queue.len());
        };
        self.contention.lock_back(page)?;
        self.pending_count += 1;
        self.delay = self.config.controller.controller_delay;
        if t.kind != TransactionKind::SyncAllCounter {
            if let Some(tlb) = self.tlb.as_mut() {
                if tlb.access(t.addr, self.cycle) {
                    self.stats.tlb_hits += 1;
                } else {
                    self.stats.tlb_misses += 1;
                    self.delay += tlb.miss_delay();
                }
            }
        }
        debug!(
            "{}: admit {} {:#x} (delay {})",
            self.cycle,
            t.kind.name(),
            t.orig_addr,
            self.delay
        );
        self.log_event("start", &t, None);
        self.contention.request_scan();

        if self.delay == 0 {
            self.process(t)
        } else {
            self.active = Some(t);
            Ok(())
        }
    }

    /// Classify an admitted transaction under the configured layout.
    pub(super) fn process(&mut self, t: Transaction) -> anyhow::Result<()> {
        if t.kind == TransactionKind::SyncAllCounter {
            return self.sync_all_step(t);
        }
        let set = self.layout.set_index(t.addr);
        if t.kind.is_demand() {
            self.demand_prefetches(&t, set);
        }

        match self.layout.scheme() {
            AssocScheme::TagTlb => self.hit_check(t, false, false),
            AssocScheme::Direct => {
                let line = self.layout.way_address(set, 0);
                self.contention.lock_line(&mut self.lines, line, set);
                self.probe(t, set, &[line])
            }
            AssocScheme::Channel => {
                let ways = self.layout.ways(set);
                ensure!(
                    self.contention.add_pending_tag(ways[0]),
                    "set {} is already being probed",
                    set
                );
                self.probe(t, set, &ways)
            }
            AssocScheme::Loh => self.read_tags(t, set),
            AssocScheme::ComboTag => {
                let now = self.cycle;
                let Some(tb) = self.tag_buffer.as_mut() else {
                    bail!("combo-tag layout without a tag buffer");
                };
                let hit = tb.have_tags(set, now);
                self.stats.tag_buffer_accesses += 1;
                match hit {
                    TagHit::Miss => self.read_tags(t, set),
                    hit => {
                        self.stats.tag_buffer_hits += 1;
                        if hit == TagHit::PrefetchHit {
                            self.stats.tag_buffer_prefetch_hits += 1;
                        }
                        self.hit_check(t, false, false)
                    }
                }
            }
        }
    }

    /// Perfect and stream prefetches triggered by a demand access.
    fn demand_prefetches(&mut self, t: &Transaction, set: u64) {
        let due = self
            .perfect
            .as_mut()
            .and_then(|perfect| perfect.on_access(set));
        if let Some(plan) = due {
            self.stats.perfect_prefetches += 1;
            self.enqueue_front(TransactionKind::Prefetch, plan.new_addr);
            self.enqueue_front(TransactionKind::Flush, plan.flush_addr);
        }

        let page = self.layout.page_number(t.addr);
        let now = self.cycle;
        let next = self
            .stream
            .as_mut()
            .and_then(|stream| stream.on_access(page, now));
        if let Some(next) = next {
            self.enqueue_front(TransactionKind::Prefetch, next * self.layout.page_size);
        }
    }

    /// Read the first burst of each candidate way before deciding hit or miss.
    fn probe(&mut self, t: Transaction, set: u64, ways: &[u64]) -> anyhow::Result<()> {
        let page = self.layout.page_address(t.addr);
        let mut p = Pending::new(PendingOp::TagRead, &t, page);
        p.cache_addr = ways[0];
        p.set = set;
        let bursts: Vec<_> = ways.iter().map(|&way| (Tier::Fast, false, way)).collect();
        self.pending.insert(p, &bursts)?;
        self.fast_queue.extend(ways.iter().map(|&way| (false, way)));
        Ok(())
    }

    /// Fetch the tag group of `set` from its fast-tier row.
    fn read_tags(&mut self, t: Transaction, set: u64) -> anyhow::Result<()> {
        let Some(tag_addr) = self.layout.tag_address(set) else {
            bail!("{:?} keeps no tags in fast-tier rows", self.layout.scheme());
        };
        ensure!(
            self.contention.add_pending_tag(tag_addr),
            "tag group {:#x} of set {} is already being read",
            tag_addr,
            set
        );
        self.contention.lock_line(&mut self.lines, tag_addr, set);

        let page = self.layout.page_address(t.addr);
        let mut p = Pending::new(PendingOp::TagRead, &t, page);
        p.cache_addr = tag_addr;
        p.set = set;
        self.pending.insert(p, &[(Tier::Fast, false, tag_addr)])?;
        self.fast_queue.push_back((false, tag_addr));
        self.stats.tag_reads += 1;
        Ok(())
    }

    pub(super) fn tag_read_finish(&mut self, p: Pending) -> anyhow::Result<()> {
        let t = p.transaction();
        match self.layout.scheme() {
            AssocScheme::Direct => {
                self.contention
                    .unlock_line(&mut self.lines, p.cache_addr, p.set)?;
                self.hit_check(t, true, false)
            }
            AssocScheme::Channel => {
                self.contention.remove_pending_tag(p.cache_addr)?;
                self.hit_check(t, true, false)
            }
            AssocScheme::Loh | AssocScheme::ComboTag => {
                self.contention.remove_pending_tag(p.cache_addr)?;
                self.contention
                    .unlock_line(&mut self.lines, p.cache_addr, p.set)?;
                if let Some(tb) = self.tag_buffer.as_mut() {
                    tb.add_tags(self.layout.tag_group(p.set).sets(), false, Some(p.set), self.cycle);
                }
                self.hit_check(t, false, true)
            }
            AssocScheme::TagTlb => bail!("tag read finished under controller-held tags"),
        }
    }

    /// Look the page up among the ways of its set and continue as a hit or a miss.
    /// `probed` means the data burst was already read while classifying.
    fn hit_check(&mut self, t: Transaction, probed: bool, tag_miss: bool) -> anyhow::Result<()> {
        let set = self.layout.set_index(t.addr);
        let ways = self.layout.ways(set);
        let hit = self.lines.find(&ways, self.layout.tag(t.addr));

        if tag_miss
            && self.layout.scheme() == AssocScheme::ComboTag
            && self.config.tag_buffer.tag_prefetch
        {
            self.prefetch_tags(&t, set)?;
        }
        if t.kind.is_demand() {
            self.stats.record_access(t.kind.is_write(), hit.is_some());
        }
        self.log_event(if hit.is_some() { "hit" } else { "miss" }, &t, hit);

        match hit {
            Some(line) => self.on_hit(t, set, line, probed),
            None => self.on_miss(t, set, &ways),
        }
    }

    /// Tag group the transaction in the controller delay will read if it misses the buffer.
    /// Admission saw it free, so nothing else may claim it before that transaction does.
    fn reserved_tag_group(&self) -> Option<u64> {
        let t = self.active.as_ref()?;
        if t.kind == TransactionKind::SyncAllCounter {
            return None;
        }
        self.layout.tag_address(self.layout.set_index(t.addr))
    }

    /// Read the tag groups after `set` in its row that are neither buffered nor in flight.
    fn prefetch_tags(&mut self, t: &Transaction, set: u64) -> anyhow::Result<()> {
        let window = self.config.tag_buffer.tag_prefetch_window;
        let reserved = self.reserved_tag_group();
        for group in self.layout.following_tag_groups(set, window) {
            let Some(tag_addr) = self.layout.tag_address(group.start) else {
                continue;
            };
            let buffered = self
                .tag_buffer
                .as_ref()
                .map_or(false, |tb| tb.contains(group.start));
            if buffered || reserved == Some(tag_addr) || !self.contention.add_pending_tag(tag_addr) {
                continue;
            }
            let mut p = Pending::new(PendingOp::TagPrefetch, t, self.layout.page_address(t.addr));
            p.cache_addr = tag_addr;
            p.set = group.start;
            self.pending.insert(p, &[(Tier::Fast, false, tag_addr)])?;
            self.fast_queue.push_back((false, tag_addr));
            self.stats.tag_prefetches += 1;
        }
        Ok(())
    }

    pub(super) fn tag_prefetch_finish(&mut self, p: Pending) -> anyhow::Result<()> {
        self.contention.remove_pending_tag(p.cache_addr)?;
        if let Some(tb) = self.tag_buffer.as_mut() {
            tb.add_tags(self.layout.tag_group(p.set).sets(), true, None, self.cycle);
        }
        Ok(())
    }

    /// One slot of a sync-all walk: queue the next slot, then a sync of this slot if dirty.
    fn sync_all_step(&mut self, t: Transaction) -> anyhow::Result<()> {
        let page_size = self.layout.page_size;
        let k = t.addr / page_size;
        let (set, way) = self.layout.slot(k);
        if k + 1 < self.layout.num_slots() {
            let next = (k + 1) * page_size;
            self.queue.push_front(Transaction::new(
                TransactionKind::SyncAllCounter,
                next,
                next,
                self.cycle,
            ));
        }

        let line = self.lines.get(self.layout.way_address(set, way));
        if line.valid && line.dirty {
            let addr = self.layout.back_address(line.tag, set);
            self.queue
                .push_front(Transaction::new(TransactionKind::Sync, addr, addr, self.cycle));
            self.stats.syncs += 1;
        }
        self.release(&t, t.addr, set, None)
    }
}
