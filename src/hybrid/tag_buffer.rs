/*
Tag buffer for layouts that keep tags in fast-tier rows.

Reading a set's tags costs a fast-tier access, so recently read tag groups are kept in a small
set-associative buffer inside the controller. A buffer set is picked from the cache set index
(divided by the channel count when sets are interleaved across channels), and each buffer set
holds `num_tag_ways` entries, one per cache set.

Entries remember whether they came from a prefetch and whether they were the set the reading
access actually wanted; lookups report that back so prefetch accounting can tell useful
prefetches from incidental ones. Lookups never consume entries.

Evicted entries go into a short history; a later lookup of the same set records the thrash
distance (cycles between eviction and re-request).
*/

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::config::{TagBufferConfig, TagReplacement};
use crate::timeq::Cycle;

/// Sets after a hit whose timestamps are refreshed under `Nnn`.
const NEIGHBOR_SPAN: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagLine {
    pub set: u64,
    pub used: bool,
    pub prefetched: bool,
    /// The set the fetching access asked for, as opposed to a neighbor read with it.
    pub demand: bool,
    pub ts: Cycle,
    pub inserted: Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictedTagEntry {
    pub set: u64,
    pub cycle: Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagHit {
    Miss,
    DemandHit,
    IncidentalHit,
    PrefetchHit,
}

impl TagHit {
    pub fn is_hit(self) -> bool {
        self != TagHit::Miss
    }
}

/// Hooks for usage accounting. All methods default to no-ops.
pub trait TagBufferObserver: std::fmt::Debug {
    fn on_insert(&mut self, _tag_set: usize, _line: &TagLine) {}
    fn on_hit(&mut self, _tag_set: usize, _line: &TagLine, _first_use: bool) {}
    fn on_evict(&mut self, _tag_set: usize, _line: &TagLine) {}
    fn on_thrash(&mut self, _set: u64, _distance: Cycle) {}
    fn write_report(&self, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct TagBuffer {
    policy: TagReplacement,
    ways: usize,
    num_tag_sets: u64,
    channels: u64,
    interleave: bool,
    sets: Vec<Vec<TagLine>>,
    history: VecDeque<EvictedTagEntry>,
    history_len: usize,
    rng: StdRng,
    observer: Option<Box<dyn TagBufferObserver>>,
}

impl TagBuffer {
    pub fn new(config: &TagBufferConfig, channels: u64, seed: u64) -> Self {
        let num_tag_sets = config.num_tag_sets.max(1);
        Self {
            policy: config.replacement,
            ways: config.num_tag_ways.max(1),
            num_tag_sets,
            channels: channels.max(1),
            interleave: config.channel_interleave,
            sets: vec![Vec::new(); num_tag_sets as usize],
            history: VecDeque::new(),
            history_len: config.victim_history,
            rng: StdRng::seed_from_u64(seed),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn TagBufferObserver>) {
        self.observer = Some(observer);
    }

    pub fn observer(&self) -> Option<&dyn TagBufferObserver> {
        self.observer.as_deref()
    }

    pub fn policy(&self) -> TagReplacement {
        self.policy
    }

    fn tag_set_of(&self, set: u64) -> usize {
        let index = if self.interleave {
            (set / self.channels) % self.num_tag_sets
        } else {
            set % self.num_tag_sets
        };
        index as usize
    }

    pub fn contains(&self, set: u64) -> bool {
        self.sets[self.tag_set_of(set)]
            .iter()
            .any(|line| line.set == set)
    }

    pub fn len(&self) -> usize {
        self.sets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn history(&self) -> impl Iterator<Item = &EvictedTagEntry> {
        self.history.iter()
    }

    /// Install the tags of `sets`, just read from the fast tier. Entries already present only
    /// have their timestamp refreshed.
    pub fn add_tags<I>(&mut self, sets: I, prefetched: bool, demand_set: Option<u64>, now: Cycle)
    where
        I: IntoIterator<Item = u64>,
    {
        for set in sets {
            let tag_set = self.tag_set_of(set);
            if let Some(line) = self.sets[tag_set].iter_mut().find(|line| line.set == set) {
                line.ts = now;
                continue;
            }

            let line = TagLine {
                set,
                used: false,
                prefetched,
                demand: demand_set == Some(set),
                ts: now,
                inserted: now,
            };
            if self.sets[tag_set].len() < self.ways {
                self.sets[tag_set].push(line);
            } else {
                let way = self.choose_victim(tag_set, now);
                let evicted = std::mem::replace(&mut self.sets[tag_set][way], line);
                self.record_eviction(tag_set, evicted, now);
            }
            if let Some(observer) = self.observer.as_mut() {
                observer.on_insert(tag_set, &line);
            }
        }
    }

    /// Look up `set`, marking it used.
    pub fn have_tags(&mut self, set: u64, now: Cycle) -> TagHit {
        self.note_rerequest(set, now);

        let tag_set = self.tag_set_of(set);
        let Some(line) = self.sets[tag_set].iter_mut().find(|line| line.set == set) else {
            return TagHit::Miss;
        };
        let first_use = !line.used;
        line.used = true;
        line.ts = now;
        let hit = if line.prefetched {
            TagHit::PrefetchHit
        } else if line.demand {
            TagHit::DemandHit
        } else {
            TagHit::IncidentalHit
        };
        let snapshot = *line;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_hit(tag_set, &snapshot, first_use);
        }

        if self.policy == TagReplacement::Nnn {
            for neighbor in set + 1..=set + NEIGHBOR_SPAN {
                let tag_set = self.tag_set_of(neighbor);
                if let Some(line) = self.sets[tag_set]
                    .iter_mut()
                    .find(|line| line.set == neighbor)
                {
                    line.ts = now;
                }
            }
        }
        hit
    }

    fn note_rerequest(&mut self, set: u64, now: Cycle) {
        let Some(pos) = self.history.iter().rposition(|entry| entry.set == set) else {
            return;
        };
        if let Some(entry) = self.history.remove(pos) {
            if let Some(observer) = self.observer.as_mut() {
                observer.on_thrash(set, now - entry.cycle);
            }
        }
    }

    fn record_eviction(&mut self, tag_set: usize, evicted: TagLine, now: Cycle) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_evict(tag_set, &evicted);
        }
        if self.history_len == 0 {
            return;
        }
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(EvictedTagEntry {
            set: evicted.set,
            cycle: now,
        });
    }

    fn choose_victim(&mut self, tag_set: usize, now: Cycle) -> usize {
        let lines = &self.sets[tag_set];
        // entries installed this cycle belong to the group being added
        let mut candidates: Vec<usize> = (0..lines.len()).filter(|&i| lines[i].ts != now).collect();
        if candidates.is_empty() {
            candidates = (0..lines.len()).collect();
        }

        let oldest_inserted = |lines: &[TagLine], pool: &[usize]| {
            pool.iter().copied().min_by_key(|&i| lines[i].inserted)
        };

        let picked = match self.policy {
            TagReplacement::Lru | TagReplacement::Nnn => {
                candidates.iter().copied().min_by_key(|&i| lines[i].ts)
            }
            TagReplacement::Mru => candidates
                .iter()
                .copied()
                .rev()
                .max_by_key(|&i| lines[i].ts),
            TagReplacement::Fifo => oldest_inserted(lines, &candidates),
            TagReplacement::Random => {
                Some(candidates[self.rng.gen_range(0..candidates.len())])
            }
            TagReplacement::Ru => {
                let used: Vec<usize> = candidates.iter().copied().filter(|&i| lines[i].used).collect();
                let pool = if used.is_empty() { &candidates } else { &used };
                Some(pool[self.rng.gen_range(0..pool.len())])
            }
            TagReplacement::UfLra => {
                let used: Vec<usize> = candidates.iter().copied().filter(|&i| lines[i].used).collect();
                oldest_inserted(lines, &used).or_else(|| oldest_inserted(lines, &candidates))
            }
            TagReplacement::Lrnu => return self.second_chance(tag_set, candidates, now),
        };
        picked.unwrap_or(0)
    }

    fn second_chance(&mut self, tag_set: usize, mut candidates: Vec<usize>, now: Cycle) -> usize {
        let lines = &mut self.sets[tag_set];
        candidates.sort_by_key(|&i| lines[i].inserted);
        for &i in &candidates {
            if !lines[i].used {
                return i;
            }
            lines[i].used = false;
            lines[i].inserted = now;
        }
        candidates.first().copied().unwrap_or(0)
    }
}

/// Per-buffer-set usage counters written to the tag buffer log.
#[derive(Debug, Default, Serialize)]
pub struct TagUsage {
    inserts: Vec<u64>,
    hits: Vec<u64>,
    tags_buffered: u64,
    tags_used: u64,
    prefetched_unused_evictions: u64,
    /// Thrash distances bucketed by power of two.
    thrash_histogram: BTreeMap<u64, u64>,
}

impl TagUsage {
    pub fn new(num_tag_sets: u64) -> Self {
        Self {
            inserts: vec![0; num_tag_sets as usize],
            hits: vec![0; num_tag_sets as usize],
            ..Self::default()
        }
    }

    pub fn tags_buffered(&self) -> u64 {
        self.tags_buffered
    }

    pub fn tags_used(&self) -> u64 {
        self.tags_used
    }
}

impl TagBufferObserver for TagUsage {
    fn on_insert(&mut self, tag_set: usize, _line: &TagLine) {
        if let Some(count) = self.inserts.get_mut(tag_set) {
            *count += 1;
        }
        self.tags_buffered += 1;
    }

    fn on_hit(&mut self, tag_set: usize, _line: &TagLine, first_use: bool) {
        if let Some(count) = self.hits.get_mut(tag_set) {
            *count += 1;
        }
        if first_use {
            self.tags_used += 1;
        }
    }

    fn on_evict(&mut self, _tag_set: usize, line: &TagLine) {
        if line.prefetched && !line.used {
            self.prefetched_unused_evictions += 1;
        }
    }

    fn on_thrash(&mut self, _set: u64, distance: Cycle) {
        let bucket = distance.max(1).next_power_of_two();
        *self.thrash_histogram.entry(bucket).or_default() += 1;
    }

    fn write_report(&self, path: &Path) -> anyhow::Result<()> {
        let payload = serde_json::to_string_pretty(self)?;
        fs::write(path, payload)
            .with_context(|| format!("cannot write tag buffer log {}", path.display()))
    }
}
