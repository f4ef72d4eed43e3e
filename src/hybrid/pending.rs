use std::collections::HashMap;

use anyhow::{bail, ensure};

use super::transaction::{Transaction, TransactionKind};
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Fast,
    Back,
}

/// The sub-operation a pending record is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    /// Fast-tier read of a dirty line about to be written back.
    VictimRead,
    /// Bulk-tier write of that line.
    VictimWrite,
    /// Bulk-tier read of the missing page.
    LineRead,
    CacheRead,
    /// Fast-tier read done before hit/miss is known (tag group, direct line or channel ways).
    TagRead,
    /// Speculative tag-group read with no transaction behind it.
    TagPrefetch,
}

/// Continuation of one in-flight sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub op: PendingOp,
    pub kind: TransactionKind,
    pub addr: u64,
    pub orig_addr: u64,
    /// Page-aligned backing address.
    pub back_addr: u64,
    pub cache_addr: u64,
    pub set: u64,
    pub victim_tag: u64,
    pub victim_valid: bool,
    pub callback_sent: bool,
    pub critical_seen: bool,
    pub arrival: Cycle,
}

impl Pending {
    pub fn new(op: PendingOp, t: &Transaction, back_addr: u64) -> Self {
        Self {
            op,
            kind: t.kind,
            addr: t.addr,
            orig_addr: t.orig_addr,
            back_addr,
            cache_addr: 0,
            set: 0,
            victim_tag: 0,
            victim_valid: false,
            callback_sent: false,
            critical_seen: false,
            arrival: t.arrival,
        }
    }

    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.kind, self.addr, self.orig_addr, self.arrival)
    }

    pub fn with_op(self, op: PendingOp) -> Self {
        Self { op, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u64);

#[derive(Debug)]
struct Entry {
    pending: Pending,
    waits: u32,
    arrived: u32,
}

/// Result of routing one burst completion.
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    /// Nothing waits on this burst.
    Untracked,
    /// More bursts are outstanding; `first` marks the first arrival.
    Partial { id: OpId, first: bool },
    Complete(Pending),
}

/// In-flight continuations, with a route from every outstanding burst to its owner.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<OpId, Entry>,
    routes: HashMap<(Tier, bool, u64), OpId>,
    next_id: u64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pending` as waiting on every burst in `bursts` (tier, is_write, addr).
    pub fn insert(
        &mut self,
        pending: Pending,
        bursts: &[(Tier, bool, u64)],
    ) -> anyhow::Result<OpId> {
        ensure!(!bursts.is_empty(), "{:?} waits on no bursts", pending.op);
        for key in bursts {
            if let Some(owner) = self.routes.get(key) {
                let op = self.entries.get(owner).map(|e| e.pending.op);
                bail!(
                    "{:?} burst {:#x} on {:?} is already outstanding for {:?}",
                    pending.op,
                    key.2,
                    key.0,
                    op
                );
            }
        }
        let id = OpId(self.next_id);
        self.next_id += 1;
        for key in bursts {
            self.routes.insert(*key, id);
        }
        self.entries.insert(
            id,
            Entry {
                pending,
                waits: bursts.len() as u32,
                arrived: 0,
            },
        );
        Ok(id)
    }

    pub fn owner_of(&self, tier: Tier, is_write: bool, addr: u64) -> Option<OpId> {
        self.routes.get(&(tier, is_write, addr)).copied()
    }

    pub fn get(&self, id: OpId) -> Option<&Pending> {
        self.entries.get(&id).map(|e| &e.pending)
    }

    pub fn get_mut(&mut self, id: OpId) -> Option<&mut Pending> {
        self.entries.get_mut(&id).map(|e| &mut e.pending)
    }

    pub fn complete(&mut self, tier: Tier, is_write: bool, addr: u64) -> anyhow::Result<Progress> {
        let Some(id) = self.routes.remove(&(tier, is_write, addr)) else {
            return Ok(Progress::Untracked);
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            bail!("burst {:#x} routed to a finished operation", addr);
        };
        entry.arrived += 1;
        let first = entry.arrived == 1;
        if entry.arrived < entry.waits {
            return Ok(Progress::Partial { id, first });
        }
        match self.entries.remove(&id) {
            Some(entry) => Ok(Progress::Complete(entry.pending)),
            None => bail!("pending operation for {:#x} vanished", addr),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn outstanding_bursts(&self) -> usize {
        self.routes.len()
    }
}
