use std::collections::{HashMap, HashSet};

use anyhow::{bail, ensure};

use super::line::LineDirectory;

/// The two legs a miss can have outstanding against its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Bulk-tier read of the incoming page.
    Fill,
    /// Fast-tier read and bulk-tier write of the outgoing page.
    Writeback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Locked,
    AwaitingFill,
    AwaitingWriteback,
    AwaitingBoth,
}

#[derive(Debug, Default, Clone, Copy)]
struct PageLock {
    outstanding: u32,
    fill: bool,
    writeback: bool,
    victim: Option<u64>,
}

impl PageLock {
    fn state(&self) -> PageState {
        match (self.fill, self.writeback) {
            (true, true) => PageState::AwaitingBoth,
            (true, false) => PageState::AwaitingFill,
            (false, true) => PageState::AwaitingWriteback,
            (false, false) => PageState::Locked,
        }
    }

    fn leg_mut(&mut self, leg: Leg) -> &mut bool {
        match leg {
            Leg::Fill => &mut self.fill,
            Leg::Writeback => &mut self.writeback,
        }
    }
}

/// Outcome of an unlock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// Legs are still outstanding; the last one to finish releases the page.
    Deferred,
}

/// Admission bookkeeping: which backing pages and cache lines are busy.
///
/// Every admitted transaction back-locks its page. A miss additionally opens a page lock whose
/// counter tracks the fill and write-back legs, and victim-locks the page being evicted. Line
/// locks are counted per set so a set cannot be oversubscribed.
#[derive(Debug, Default)]
pub struct ContentionController {
    back: HashSet<u64>,
    pages: HashMap<u64, PageLock>,
    victims: HashSet<u64>,
    set_counter: HashMap<u64, u64>,
    pending_tags: HashSet<u64>,
    check_queue: bool,
}

impl ContentionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_back(&mut self, page: u64) -> anyhow::Result<()> {
        ensure!(self.back.insert(page), "page {:#x} is already back-locked", page);
        Ok(())
    }

    pub fn lock_page(&mut self, page: u64) -> anyhow::Result<()> {
        ensure!(
            !self.pages.contains_key(&page),
            "page {:#x} is already locked for a miss",
            page
        );
        self.pages.insert(page, PageLock::default());
        Ok(())
    }

    /// Victim-lock `victim` on behalf of the miss holding `page`.
    pub fn lock_victim(&mut self, page: u64, victim: u64) -> anyhow::Result<()> {
        let Some(lock) = self.pages.get_mut(&page) else {
            bail!("victim {:#x} locked without a page lock on {:#x}", victim, page);
        };
        ensure!(
            self.victims.insert(victim),
            "victim page {:#x} is already locked",
            victim
        );
        lock.victim = Some(victim);
        Ok(())
    }

    pub fn increment(&mut self, page: u64, leg: Leg) -> anyhow::Result<()> {
        let Some(lock) = self.pages.get_mut(&page) else {
            bail!("increment on unlocked page {:#x}", page);
        };
        let flag = lock.leg_mut(leg);
        ensure!(!*flag, "{:?} leg of page {:#x} is already outstanding", leg, page);
        *flag = true;
        lock.outstanding += 1;
        Ok(())
    }

    pub fn decrement(&mut self, page: u64, leg: Leg) -> anyhow::Result<()> {
        let Some(lock) = self.pages.get_mut(&page) else {
            bail!("decrement on unlocked page {:#x}", page);
        };
        let flag = lock.leg_mut(leg);
        ensure!(*flag, "{:?} leg of page {:#x} is not outstanding", leg, page);
        *flag = false;
        lock.outstanding -= 1;
        Ok(())
    }

    pub fn page_state(&self, page: u64) -> PageState {
        self.pages.get(&page).map_or(PageState::Idle, PageLock::state)
    }

    pub fn outstanding(&self, page: u64) -> u32 {
        self.pages.get(&page).map_or(0, |lock| lock.outstanding)
    }

    pub fn victim_of(&self, page: u64) -> Option<u64> {
        self.pages.get(&page).and_then(|lock| lock.victim)
    }

    /// Release `page` and, if given, the line lock it holds on `line`.
    pub fn unlock(
        &mut self,
        lines: &mut LineDirectory,
        page: u64,
        set: u64,
        line: Option<u64>,
    ) -> anyhow::Result<Release> {
        match self.pages.get(&page).copied() {
            None => {
                ensure!(self.back.remove(&page), "unlocking page {:#x} that is not locked", page);
            }
            Some(lock) if lock.outstanding > 0 => return Ok(Release::Deferred),
            Some(lock) => {
                self.pages.remove(&page);
                ensure!(
                    self.back.remove(&page),
                    "page {:#x} has a page lock but no back lock",
                    page
                );
                if let Some(victim) = lock.victim {
                    ensure!(
                        self.victims.remove(&victim),
                        "victim page {:#x} of {:#x} is not locked",
                        victim,
                        page
                    );
                }
            }
        }
        if let Some(addr) = line {
            self.unlock_line(lines, addr, set)?;
        }
        self.check_queue = true;
        Ok(Release::Released)
    }

    pub fn lock_line(&mut self, lines: &mut LineDirectory, addr: u64, set: u64) {
        lines.lock(addr);
        *self.set_counter.entry(set).or_default() += 1;
    }

    pub fn unlock_line(
        &mut self,
        lines: &mut LineDirectory,
        addr: u64,
        set: u64,
    ) -> anyhow::Result<()> {
        lines.unlock(addr)?;
        let Some(count) = self.set_counter.get_mut(&set) else {
            bail!("set {} has no locked lines", set);
        };
        *count -= 1;
        if *count == 0 {
            self.set_counter.remove(&set);
        }
        self.check_queue = true;
        Ok(())
    }

    pub fn locked_in_set(&self, set: u64) -> u64 {
        self.set_counter.get(&set).copied().unwrap_or(0)
    }

    pub fn add_pending_tag(&mut self, tag_addr: u64) -> bool {
        self.pending_tags.insert(tag_addr)
    }

    pub fn remove_pending_tag(&mut self, tag_addr: u64) -> anyhow::Result<()> {
        ensure!(
            self.pending_tags.remove(&tag_addr),
            "tag address {:#x} has no read outstanding",
            tag_addr
        );
        self.check_queue = true;
        Ok(())
    }

    pub fn tag_pending(&self, tag_addr: u64) -> bool {
        self.pending_tags.contains(&tag_addr)
    }

    /// Whether a transaction on `page` may be admitted. `set_limit` is the number of lines of
    /// `set` that may be locked at once.
    pub fn is_unlocked(&self, page: u64, set: u64, set_limit: u64, tag_addr: Option<u64>) -> bool {
        if self.locked_in_set(set) >= set_limit {
            return false;
        }
        if tag_addr.map_or(false, |addr| self.tag_pending(addr)) {
            return false;
        }
        !self.back.contains(&page) && !self.pages.contains_key(&page) && !self.victims.contains(&page)
    }

    /// Whether anything was released since the last call.
    pub fn take_check_queue(&mut self) -> bool {
        std::mem::take(&mut self.check_queue)
    }

    pub fn request_scan(&mut self) {
        self.check_queue = true;
    }

    /// No locks of any kind are held.
    pub fn is_idle(&self) -> bool {
        self.back.is_empty()
            && self.pages.is_empty()
            && self.victims.is_empty()
            && self.set_counter.is_empty()
            && self.pending_tags.is_empty()
    }

    pub fn locked_pages(&self) -> usize {
        self.back.len()
    }
}
