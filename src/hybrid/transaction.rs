use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
    Prefetch,
    /// Age a line so it is evicted next; never moves data.
    Flush,
    /// Write a dirty line back to the bulk tier and keep it cached.
    Sync,
    /// One step of a sync-all walk; the address encodes the line slot.
    SyncAllCounter,
}

impl TransactionKind {
    /// Kinds that complete with a callback to the caller.
    pub fn is_demand(self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }

    pub fn is_write(self) -> bool {
        self == Self::Write
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Prefetch => "prefetch",
            Self::Flush => "flush",
            Self::Sync => "sync",
            Self::SyncAllCounter => "sync_all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub kind: TransactionKind,
    /// Address inside the backing address space.
    pub addr: u64,
    /// Address as submitted, reported back in the completion.
    pub orig_addr: u64,
    pub arrival: Cycle,
}

impl Transaction {
    pub fn new(kind: TransactionKind, addr: u64, orig_addr: u64, arrival: Cycle) -> Self {
        Self {
            kind,
            addr,
            orig_addr,
            arrival,
        }
    }
}

/// A finished caller request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub addr: u64,
    pub cycle: Cycle,
    pub is_write: bool,
}
