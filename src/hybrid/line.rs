use std::collections::HashMap;

use anyhow::bail;

use crate::timeq::Cycle;

/// Metadata of one fast-tier page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheLine {
    pub valid: bool,
    pub dirty: bool,
    lock_count: u32,
    /// Backing-tier tag of the page held by this line.
    pub tag: u64,
    pub data: u64,
    pub ts: Cycle,
    pub access_count: u64,
    /// Filled by a prefetch.
    pub prefetched: bool,
    /// Touched by a demand access since the fill.
    pub used: bool,
}

impl CacheLine {
    pub fn is_locked(&self) -> bool {
        self.lock_count > 0
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    /// An unlocked line rebuilt from a saved table.
    pub fn restored(valid: bool, dirty: bool, tag: u64, data: u64, ts: Cycle) -> Self {
        Self {
            valid,
            dirty,
            tag,
            data,
            ts,
            ..Self::default()
        }
    }
}

/// Sparse table of lines keyed by fast-tier address. Entries are created on first touch and
/// never removed.
#[derive(Debug, Default)]
pub struct LineDirectory {
    lines: HashMap<u64, CacheLine>,
}

impl LineDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the line at `addr`, default if never touched.
    pub fn get(&self, addr: u64) -> CacheLine {
        self.lines.get(&addr).copied().unwrap_or_default()
    }

    pub fn get_mut(&mut self, addr: u64) -> &mut CacheLine {
        self.lines.entry(addr).or_default()
    }

    pub fn put(&mut self, addr: u64, line: CacheLine) {
        self.lines.insert(addr, line);
    }

    pub fn lock(&mut self, addr: u64) {
        self.get_mut(addr).lock_count += 1;
    }

    pub fn unlock(&mut self, addr: u64) -> anyhow::Result<()> {
        let line = self.get_mut(addr);
        if line.lock_count == 0 {
            bail!("unlocking line {:#x} that is not locked", addr);
        }
        line.lock_count -= 1;
        Ok(())
    }

    pub fn is_locked(&self, addr: u64) -> bool {
        self.lines.get(&addr).map_or(false, CacheLine::is_locked)
    }

    /// The way among `ways` holding `tag`, if any.
    pub fn find(&self, ways: &[u64], tag: u64) -> Option<u64> {
        ways.iter().copied().find(|addr| {
            self.lines
                .get(addr)
                .map_or(false, |line| line.valid && line.tag == tag)
        })
    }

    pub fn locked_lines(&self) -> usize {
        self.lines.values().filter(|line| line.is_locked()).count()
    }

    /// Valid lines ordered by fast-tier address.
    pub fn valid_lines(&self) -> Vec<(u64, CacheLine)> {
        let mut lines: Vec<(u64, CacheLine)> = self
            .lines
            .iter()
            .filter(|(_, line)| line.valid)
            .map(|(addr, line)| (*addr, *line))
            .collect();
        lines.sort_by_key(|(addr, _)| *addr);
        lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheLine, LineDirectory};

    #[test]
    fn unseen_lines_are_default() {
        let dir = LineDirectory::new();
        assert_eq!(dir.get(0x1000), CacheLine::default());
        assert!(dir.is_empty());
    }

    #[test]
    fn restored_line_is_unlocked() {
        let line = CacheLine::restored(true, true, 7, 0, 42);
        assert!(line.valid && line.dirty && !line.is_locked());
        assert_eq!((line.tag, line.ts, line.access_count), (7, 42, 0));
    }

    #[test]
    fn lock_is_counted() {
        let mut dir = LineDirectory::new();
        dir.lock(0x1000);
        dir.lock(0x1000);
        dir.unlock(0x1000).unwrap();
        assert!(dir.is_locked(0x1000));
        dir.unlock(0x1000).unwrap();
        assert!(!dir.is_locked(0x1000));
        assert!(dir.unlock(0x1000).is_err());
    }

    #[test]
    fn find_matches_valid_tag_only() {
        let mut dir = LineDirectory::new();
        dir.put(
            0x0,
            CacheLine {
                tag: 3,
                ..CacheLine::default()
            },
        );
        dir.put(
            0x1000,
            CacheLine {
                valid: true,
                tag: 3,
                ..CacheLine::default()
            },
        );
        assert_eq!(dir.find(&[0x0, 0x1000], 3), Some(0x1000));
        assert_eq!(dir.find(&[0x0, 0x1000], 4), None);
    }

    #[test]
    fn valid_lines_sorted() {
        let mut dir = LineDirectory::new();
        for addr in [0x3000u64, 0x1000, 0x2000] {
            dir.get_mut(addr).valid = addr != 0x2000;
        }
        let addrs: Vec<u64> = dir.valid_lines().into_iter().map(|(a, _)| a).collect();
        assert_eq!(addrs, vec![0x1000, 0x3000]);
    }
}
