//! Contract between the hybrid controller and the two memories behind it.
//!
//! A backing memory never calls back into the controller. It queues completion events that the
//! controller drains right after advancing the memory by one cycle, so every continuation is
//! resumed from the controller's own update loop.

mod timed;

use crate::timeq::Cycle;

pub use timed::{MemoryModelConfig, TimedMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemEvent {
    ReadComplete { addr: u64, cycle: Cycle },
    WriteComplete { addr: u64, cycle: Cycle },
    /// First burst of a multi-burst read is back; only meaningful for line fills.
    CriticalLine { addr: u64, cycle: Cycle },
}

impl MemEvent {
    pub fn addr(&self) -> u64 {
        match *self {
            MemEvent::ReadComplete { addr, .. }
            | MemEvent::WriteComplete { addr, .. }
            | MemEvent::CriticalLine { addr, .. } => addr,
        }
    }
}

pub trait BackingMemory {
    /// Returns false when the memory cannot take the request this cycle.
    fn add_transaction(&mut self, is_write: bool, addr: u64) -> bool;

    fn update(&mut self);

    fn poll_event(&mut self) -> Option<MemEvent>;

    /// Requests accepted but not yet completed.
    fn pending(&self) -> usize;
}
