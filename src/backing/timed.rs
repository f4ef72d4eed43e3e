use std::collections::VecDeque;

use log::debug;
use serde::Deserialize;

use crate::sim::config::Config;
use crate::timeq::{Cycle, ServerConfig, ServiceRequest, TimedServer};

use super::{BackingMemory, MemEvent};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemoryModelConfig {
    pub base_latency: Cycle,
    pub bytes_per_cycle: u32,
    /// Outstanding bursts per channel.
    pub queue_capacity: usize,
    /// Size charged for every request.
    pub burst_bytes: u32,
    pub channels: usize,
}

impl Config for MemoryModelConfig {}

impl Default for MemoryModelConfig {
    fn default() -> Self {
        Self {
            base_latency: 20,
            bytes_per_cycle: 16,
            queue_capacity: 32,
            burst_bytes: 64,
            channels: 1,
        }
    }
}

impl MemoryModelConfig {
    /// Slower, wider defaults for the bulk tier.
    pub fn bulk() -> Self {
        Self {
            base_latency: 100,
            bytes_per_cycle: 32,
            queue_capacity: 32,
            burst_bytes: 4096,
            channels: 1,
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            base_latency: self.base_latency,
            bytes_per_cycle: self.bytes_per_cycle,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Access {
    is_write: bool,
    addr: u64,
}

/// Latency/bandwidth model of one memory tier, built from one timed server per channel.
#[derive(Debug)]
pub struct TimedMemory {
    name: &'static str,
    config: MemoryModelConfig,
    channels: Vec<TimedServer<Access>>,
    events: VecDeque<MemEvent>,
    cycle: Cycle,
}

impl TimedMemory {
    pub fn new(name: &'static str, config: MemoryModelConfig) -> Self {
        assert!(config.channels > 0, "channels must be > 0");
        assert!(config.burst_bytes > 0, "burst_bytes must be > 0");
        let channels = (0..config.channels)
            .map(|_| TimedServer::new(config.server_config()))
            .collect();
        Self {
            name,
            config,
            channels,
            events: VecDeque::new(),
            cycle: 0,
        }
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    fn channel_for(&self, addr: u64) -> usize {
        ((addr / self.config.burst_bytes as u64) % self.channels.len() as u64) as usize
    }
}

impl BackingMemory for TimedMemory {
    fn add_transaction(&mut self, is_write: bool, addr: u64) -> bool {
        let channel = self.channel_for(addr);
        let request = ServiceRequest::new(Access { is_write, addr }, self.config.burst_bytes);
        match self.channels[channel].try_issue(self.cycle, request) {
            Ok(ticket) => {
                debug!(
                    "[{}] accepted {} {:#x} ch{} ready@{}",
                    self.name,
                    if is_write { "write" } else { "read" },
                    addr,
                    channel,
                    ticket.ready_at()
                );
                true
            }
            Err(_) => false,
        }
    }

    fn update(&mut self) {
        self.cycle += 1;
        let now = self.cycle;
        let events = &mut self.events;
        for channel in self.channels.iter_mut() {
            channel.service_ready(now, |done| {
                let Access { is_write, addr } = done.payload;
                events.push_back(if is_write {
                    MemEvent::WriteComplete { addr, cycle: now }
                } else {
                    MemEvent::ReadComplete { addr, cycle: now }
                });
            });
        }
    }

    fn poll_event(&mut self) -> Option<MemEvent> {
        self.events.pop_front()
    }

    fn pending(&self) -> usize {
        self.channels.iter().map(TimedServer::len).sum()
    }
}
