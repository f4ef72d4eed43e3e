use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context};
use smallvec::SmallVec;

use crate::timeq::Cycle;

pub type PrefetchList = SmallVec<[u64; 8]>;

#[derive(Debug, Clone, Copy)]
struct StreamBuffer {
    /// Next page the stream is expected to touch.
    next: u64,
    last_used: Cycle,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub allocations: u64,
    pub hits: u64,
    pub prefetches: u64,
}

/// Sequential stream detector. A miss is remembered in the one-miss table; a miss on the page
/// after a remembered one starts a stream, which prefetches `length` pages ahead and slides
/// forward each time the stream's next page is touched.
#[derive(Debug)]
pub struct StreamPrefetcher {
    one_miss: VecDeque<u64>,
    one_miss_capacity: usize,
    buffers: Vec<StreamBuffer>,
    buffer_capacity: usize,
    length: u64,
    last_page: u64,
    stats: StreamStats,
}

impl StreamPrefetcher {
    pub fn new(one_miss_capacity: usize, buffer_capacity: usize, length: u64, total_pages: u64) -> Self {
        Self {
            one_miss: VecDeque::with_capacity(one_miss_capacity),
            one_miss_capacity: one_miss_capacity.max(1),
            buffers: Vec::with_capacity(buffer_capacity),
            buffer_capacity: buffer_capacity.max(1),
            length: length.max(1),
            last_page: total_pages.saturating_sub(1),
            stats: StreamStats::default(),
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    fn in_range(&self, page: u64) -> bool {
        page != 0 && page < self.last_page
    }

    /// Demand access to `page`; returns the page to prefetch if it advanced a stream.
    pub fn on_access(&mut self, page: u64, now: Cycle) -> Option<u64> {
        let length = self.length;
        let buffer = self.buffers.iter_mut().find(|b| b.next == page)?;
        buffer.next = page + 1;
        buffer.last_used = now;
        self.stats.hits += 1;
        let ahead = page + length;
        if self.in_range(ahead) {
            self.stats.prefetches += 1;
            Some(ahead)
        } else {
            None
        }
    }

    /// Demand miss on `page`; returns the pages to prefetch if it starts a stream.
    pub fn on_miss(&mut self, page: u64, now: Cycle) -> PrefetchList {
        let mut issue = PrefetchList::new();
        if !self.in_range(page) {
            return issue;
        }
        let Some(pos) = self.one_miss.iter().position(|p| *p + 1 == page) else {
            if self.one_miss.len() == self.one_miss_capacity {
                self.one_miss.pop_front();
            }
            self.one_miss.push_back(page);
            return issue;
        };
        self.one_miss.remove(pos);

        if self.buffers.len() == self.buffer_capacity {
            if let Some(oldest) = self
                .buffers
                .iter()
                .enumerate()
                .min_by_key(|(_, b)| b.last_used)
                .map(|(i, _)| i)
            {
                self.buffers.swap_remove(oldest);
            }
        }
        self.buffers.push(StreamBuffer {
            next: page + 1,
            last_used: now,
        });
        self.stats.allocations += 1;

        for ahead in page + 1..=page + self.length {
            if !self.in_range(ahead) {
                break;
            }
            issue.push(ahead);
        }
        self.stats.prefetches += issue.len() as u64;
        issue
    }
}

/// One scheduled replacement: once the set has seen more than `access_number` accesses,
/// prefetch `new_addr` and flush `flush_addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPrefetch {
    pub access_number: u64,
    pub flush_addr: u64,
    pub new_addr: u64,
}

/// Replacement schedule computed offline, consumed in order per set.
#[derive(Debug, Default)]
pub struct PerfectPrefetch {
    plans: Vec<VecDeque<PlannedPrefetch>>,
    accesses: Vec<u64>,
}

impl PerfectPrefetch {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read prefetch file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("malformed prefetch file {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut tokens = text.split_whitespace();
        expect_keyword(&mut tokens, "NUM_SETS")?;
        let num_sets = next_u64(&mut tokens, "set count")?;
        let mut plans = vec![VecDeque::new(); num_sets as usize];
        while tokens.clone().next().is_some() {
            expect_keyword(&mut tokens, "SET")?;
            let set = next_u64(&mut tokens, "set index")?;
            ensure!(set < num_sets, "set {} out of range", set);
            let count = next_u64(&mut tokens, "entry count")?;
            for _ in 0..count {
                let access_number = next_u64(&mut tokens, "access number")?;
                let flush_addr = next_u64(&mut tokens, "flush address")?;
                let new_addr = next_u64(&mut tokens, "new address")?;
                plans[set as usize].push_back(PlannedPrefetch {
                    access_number,
                    flush_addr,
                    new_addr,
                });
            }
        }
        Ok(Self {
            accesses: vec![0; plans.len()],
            plans,
        })
    }

    /// Count one access to `set` and return the next replacement if it is due.
    /// At most one replacement is released per access.
    pub fn on_access(&mut self, set: u64) -> Option<PlannedPrefetch> {
        let count = self.accesses.get_mut(set as usize)?;
        let plan = self.plans.get_mut(set as usize)?;
        *count += 1;
        if plan.front()?.access_number < *count {
            plan.pop_front()
        } else {
            None
        }
    }

    pub fn remaining(&self) -> usize {
        self.plans.iter().map(VecDeque::len).sum()
    }
}

fn expect_keyword(tokens: &mut std::str::SplitWhitespace, expected: &str) -> anyhow::Result<()> {
    match tokens.next() {
        Some(word) if word == expected => Ok(()),
        Some(word) => bail!("expected {}, found '{}'", expected, word),
        None => bail!("expected {}", expected),
    }
}

fn next_u64(tokens: &mut std::str::SplitWhitespace, what: &str) -> anyhow::Result<u64> {
    let token = tokens.next().with_context(|| format!("missing {}", what))?;
    token
        .parse::<u64>()
        .with_context(|| format!("bad {} '{}'", what, token))
}
