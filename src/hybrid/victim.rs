use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::VictimPolicy;
use super::line::{CacheLine, LineDirectory};

/// Picks the way to evict from a set. Locked ways are never returned.
#[derive(Debug)]
pub struct VictimSelector {
    policy: VictimPolicy,
    rng: StdRng,
}

impl VictimSelector {
    pub fn new(policy: VictimPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn policy(&self) -> VictimPolicy {
        self.policy
    }

    /// `None` when every way is locked.
    pub fn select(&mut self, lines: &LineDirectory, ways: &[u64]) -> Option<u64> {
        match self.policy {
            VictimPolicy::Lru | VictimPolicy::Nru => min_by_key(lines, ways, |line| line.ts),
            VictimPolicy::Lfu => min_by_key(lines, ways, |line| line.access_count),
            VictimPolicy::Cflru => clean_first(lines, ways, |line| line.ts),
            VictimPolicy::Cflfu => clean_first(lines, ways, |line| line.access_count),
            VictimPolicy::Random => self.random(lines, ways),
        }
    }

    fn random(&mut self, lines: &LineDirectory, ways: &[u64]) -> Option<u64> {
        if ways.iter().all(|addr| lines.is_locked(*addr)) {
            return None;
        }
        loop {
            let addr = ways[self.rng.gen_range(0..ways.len())];
            if !lines.is_locked(addr) {
                return Some(addr);
            }
        }
    }
}

fn unlocked<'a>(
    lines: &'a LineDirectory,
    ways: &'a [u64],
) -> impl Iterator<Item = (u64, CacheLine)> + 'a {
    ways.iter()
        .map(move |addr| (*addr, lines.get(*addr)))
        .filter(|(_, line)| !line.is_locked())
}

// min_by_key keeps the first minimum
fn min_by_key<F>(lines: &LineDirectory, ways: &[u64], key: F) -> Option<u64>
where
    F: Fn(&CacheLine) -> u64,
{
    unlocked(lines, ways)
        .min_by_key(|(_, line)| key(line))
        .map(|(addr, _)| addr)
}

fn clean_first<F>(lines: &LineDirectory, ways: &[u64], key: F) -> Option<u64>
where
    F: Fn(&CacheLine) -> u64,
{
    let mut clean: Option<(u64, u64)> = None;
    let mut dirty: Option<(u64, u64)> = None;
    for (addr, line) in unlocked(lines, ways) {
        let slot = if line.dirty { &mut dirty } else { &mut clean };
        let k = key(&line);
        if slot.map_or(true, |(_, best)| k < best) {
            *slot = Some((addr, k));
        }
    }
    clean.or(dirty).map(|(addr, _)| addr)
}
