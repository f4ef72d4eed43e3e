use super::config::TlbConfig;
use crate::timeq::Cycle;

/// Controller-side cache of tag reads. Each entry covers the pages whose tags come back in one
/// `bytes_per_read` access.
#[derive(Debug)]
pub struct TagTlb {
    span: u64,
    capacity: usize,
    entries: Vec<(u64, Cycle)>,
    miss_delay: u64,
}

impl TagTlb {
    /// `None` when the model is disabled.
    pub fn new(config: &TlbConfig, page_size: u64) -> Option<Self> {
        if config.size == 0 {
            return None;
        }
        let capacity = (config.size / config.bytes_per_read).max(1) as usize;
        Some(Self {
            span: page_size * config.bytes_per_read / config.tag_size,
            capacity,
            entries: Vec::with_capacity(capacity),
            miss_delay: config.miss_delay,
        })
    }

    pub fn span(&self) -> u64 {
        self.span
    }

    pub fn miss_delay(&self) -> u64 {
        self.miss_delay
    }

    /// Look up the span holding `addr`, filling it on a miss.
    pub fn access(&mut self, addr: u64, now: Cycle) -> bool {
        let base = addr / self.span * self.span;
        if let Some(entry) = self.entries.iter_mut().find(|(b, _)| *b == base) {
            entry.1 = now;
            return true;
        }
        if self.entries.len() == self.capacity {
            if let Some(lru) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(i, _)| i)
            {
                self.entries.swap_remove(lru);
            }
        }
        self.entries.push((base, now));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::TagTlb;
    use crate::hybrid::config::TlbConfig;

    fn tlb(entries: u64) -> TagTlb {
        let config = TlbConfig {
            size: 64 * entries,
            tag_size: 2,
            bytes_per_read: 64,
            miss_delay: 30,
        };
        TagTlb::new(&config, 4096).unwrap()
    }

    #[test]
    fn disabled_without_size() {
        assert!(TagTlb::new(&TlbConfig::default(), 4096).is_none());
    }

    #[test]
    fn one_entry_covers_a_span() {
        let mut t = tlb(2);
        assert_eq!(t.span(), 4096 * 32);
        assert!(!t.access(0x1000, 1));
        assert!(t.access(0x1f000, 2));
        assert!(!t.access(t.span(), 3));
    }

    #[test]
    fn evicts_least_recent() {
        let mut t = tlb(2);
        let span = t.span();
        t.access(0, 1);
        t.access(span, 2);
        t.access(0, 3);
        t.access(2 * span, 4);
        assert!(t.access(0, 5));
        assert!(!t.access(span, 6));
    }
}
