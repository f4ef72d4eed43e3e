use anyhow::{bail, ensure};

use super::HybridSystem;
use crate::backing::MemEvent;
use crate::hybrid::pending::{OpId, Pending, PendingOp, Progress, Tier};

impl HybridSystem {
    pub(super) fn on_fast_event(&mut self, event: MemEvent) -> anyhow::Result<()> {
        match event {
            MemEvent::ReadComplete { addr, .. } => {
                match self.pending.complete(Tier::Fast, false, addr)? {
                    Progress::Untracked => {
                        bail!("fast-tier read {:#x} completed with nothing waiting on it", addr)
                    }
                    Progress::Partial { .. } => Ok(()),
                    Progress::Complete(p) => self.resume_fast(p),
                }
            }
            // line and tag writes are posted
            MemEvent::WriteComplete { addr, .. } => {
                match self.pending.complete(Tier::Fast, true, addr)? {
                    Progress::Complete(p) => bail!("{:?} finished on a fast-tier write", p.op),
                    _ => Ok(()),
                }
            }
            MemEvent::CriticalLine { addr, .. } => self.critical_line(Tier::Fast, addr),
        }
    }

    fn resume_fast(&mut self, p: Pending) -> anyhow::Result<()> {
        match p.op {
            PendingOp::VictimRead => self.victim_read_finish(p),
            PendingOp::CacheRead => self.cache_read_finish(p, false),
            PendingOp::TagRead => self.tag_read_finish(p),
            PendingOp::TagPrefetch => self.tag_prefetch_finish(p),
            op => bail!("{:?} of {:#x} finished on a fast-tier read", op, p.orig_addr),
        }
    }

    pub(super) fn on_back_event(&mut self, event: MemEvent) -> anyhow::Result<()> {
        match event {
            MemEvent::ReadComplete { addr, .. } => {
                match self.pending.complete(Tier::Back, false, addr)? {
                    Progress::Untracked => {
                        bail!("bulk-tier read {:#x} completed with nothing waiting on it", addr)
                    }
                    Progress::Partial { id, first } => {
                        if first && self.config.controller.critical_line_first {
                            self.early_completion(id)?;
                        }
                        Ok(())
                    }
                    Progress::Complete(p) if p.op == PendingOp::LineRead => self.line_read_finish(p),
                    Progress::Complete(p) => {
                        bail!("{:?} of {:#x} finished on a bulk-tier read", p.op, p.orig_addr)
                    }
                }
            }
            MemEvent::WriteComplete { addr, .. } => {
                match self.pending.complete(Tier::Back, true, addr)? {
                    Progress::Untracked => {
                        bail!("bulk-tier write {:#x} completed with nothing waiting on it", addr)
                    }
                    Progress::Partial { .. } => Ok(()),
                    Progress::Complete(p) if p.op == PendingOp::VictimWrite => {
                        self.victim_write_finish(p)
                    }
                    Progress::Complete(p) => {
                        bail!("{:?} of {:#x} finished on a bulk-tier write", p.op, p.orig_addr)
                    }
                }
            }
            MemEvent::CriticalLine { addr, .. } => self.critical_line(Tier::Back, addr),
        }
    }

    /// A model reported the first burst of a read early.
    fn critical_line(&mut self, tier: Tier, addr: u64) -> anyhow::Result<()> {
        let Some(id) = self.pending.owner_of(tier, false, addr) else {
            bail!("critical-line notice for {:#x} on {:?} with no read outstanding", addr, tier);
        };
        let Some(p) = self.pending.get_mut(id) else {
            bail!("critical-line notice for {:#x} routed to a finished operation", addr);
        };
        ensure!(
            !p.critical_seen,
            "second critical-line notice for {:#x} ({:#x})",
            p.orig_addr,
            addr
        );
        p.critical_seen = true;
        if self.config.controller.critical_line_first {
            self.early_completion(id)?;
        }
        Ok(())
    }

    /// Complete the caller's access on the first burst of its fill.
    fn early_completion(&mut self, id: OpId) -> anyhow::Result<()> {
        let Some(p) = self.pending.get_mut(id) else {
            bail!("early completion for a finished operation");
        };
        if p.op != PendingOp::LineRead || !p.kind.is_demand() || p.callback_sent {
            return Ok(());
        }
        p.callback_sent = true;
        let (orig_addr, is_write, arrival) = (p.orig_addr, p.kind.is_write(), p.arrival);
        self.complete(orig_addr, is_write, arrival);
        Ok(())
    }
}
