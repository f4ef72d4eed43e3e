use smallvec::SmallVec;

use super::config::{AssocScheme, HybridConfig};
use super::decode::AddressDecoder;

pub type WayList = SmallVec<[u64; 16]>;

/// Sets whose tags are read and written together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagGroup {
    pub start: u64,
    pub stride: u64,
    pub len: u64,
}

impl TagGroup {
    pub fn sets(&self) -> impl Iterator<Item = u64> {
        let TagGroup { start, stride, len } = *self;
        (0..len).map(move |i| start + i * stride)
    }

    pub fn contains(&self, set: u64) -> bool {
        set >= self.start
            && (set - self.start) % self.stride == 0
            && (set - self.start) / self.stride < self.len
    }
}

/// Placement of tags and data inside fast-tier rows. Each row holds the tag groups of
/// `sets_per_line` sets first, then unused columns, then the data ways of those sets.
#[derive(Debug, Clone, Copy)]
struct RowLayout {
    channels: u64,
    ranks: u64,
    banks: u64,
    rows: u64,
    sets_per_line: u64,
    sets_per_tag_group: u64,
    extra: u64,
    tag_offset: u64,
    waste_offset: u64,
    num_rows: u64,
    interleave: bool,
}

impl RowLayout {
    fn new(config: &HybridConfig) -> Self {
        let g = &config.geometry;
        let t = &config.tag_buffer;
        let set_size = config.controller.set_size;
        let extra = t.sets_per_line % t.sets_per_tag_group;
        let tag_offset = (t.sets_per_line - extra) / t.sets_per_tag_group;
        let waste_offset =
            g.columns - (t.sets_per_line / t.sets_per_tag_group + t.sets_per_line * set_size);
        Self {
            channels: g.channels,
            ranks: g.ranks,
            banks: g.banks,
            rows: g.rows,
            sets_per_line: t.sets_per_line,
            sets_per_tag_group: t.sets_per_tag_group,
            extra,
            tag_offset,
            waste_offset,
            num_rows: g.channels * g.ranks * g.banks * g.rows,
            interleave: t.channel_interleave,
        }
    }

    /// Position of `set` within its row.
    fn line_slot(&self, set: u64) -> u64 {
        if self.interleave {
            (set / self.channels) % self.sets_per_line
        } else {
            set % self.sets_per_line
        }
    }

    fn row_base(&self, channel: u64, rank: u64, bank: u64, row: u64) -> u64 {
        channel
            + rank * self.channels
            + bank * self.channels * self.ranks
            + row * self.channels * self.ranks * self.banks
    }

    fn data_page(&self, set: u64, way: u64, set_size: u64) -> u64 {
        let spl = self.sets_per_line;
        let ch = if self.interleave {
            set % self.channels
        } else {
            (set / spl) % self.channels
        };
        let rk_div = self.channels * spl;
        let rk = (set / rk_div) % self.ranks;
        let bk = (set / (rk_div * self.ranks)) % self.banks;
        let row = (set / (rk_div * self.ranks * self.banks)) % self.rows;
        let column = self.tag_offset + self.waste_offset + way + self.line_slot(set) * set_size;
        self.row_base(ch, rk, bk, row) + column * self.num_rows
    }

    fn tag_column(&self, set: u64) -> u64 {
        let slot = self.line_slot(set);
        let first = self.sets_per_tag_group + self.extra;
        if slot < first {
            0
        } else {
            (slot - self.extra) / self.sets_per_tag_group
        }
    }

    fn tag_group(&self, set: u64) -> TagGroup {
        let slot = self.line_slot(set);
        let stride = if self.interleave { self.channels } else { 1 };
        let first = self.sets_per_tag_group + self.extra;
        if slot < first {
            TagGroup {
                start: set - slot * stride,
                stride,
                len: first,
            }
        } else {
            let into = (slot - self.extra) % self.sets_per_tag_group;
            TagGroup {
                start: set - into * stride,
                stride,
                len: self.sets_per_tag_group,
            }
        }
    }
}

/// Geometry derived once from the configuration.
#[derive(Debug, Clone)]
pub struct Layout {
    pub page_size: u64,
    pub set_size: u64,
    pub burst_size: u64,
    pub back_burst_size: u64,
    pub total_pages: u64,
    pub cache_pages: u64,
    /// Pages usable for data once tag columns are carved out.
    pub actual_cache_pages: u64,
    pub num_sets: u64,
    scheme: AssocScheme,
    rows: Option<RowLayout>,
    decoder: AddressDecoder,
}

impl Layout {
    pub fn new(config: &HybridConfig) -> Self {
        let c = &config.controller;
        let rows = c.assoc.tags_in_rows().then(|| RowLayout::new(config));
        let actual_cache_pages = match &rows {
            Some(r) => c.cache_pages - r.num_rows * (r.tag_offset + r.waste_offset),
            None => c.cache_pages,
        };
        Self {
            page_size: c.page_size,
            set_size: c.set_size,
            burst_size: c.burst_size,
            back_burst_size: c.back_burst_size(),
            total_pages: c.total_pages,
            cache_pages: c.cache_pages,
            actual_cache_pages,
            num_sets: actual_cache_pages / c.set_size,
            scheme: c.assoc,
            rows,
            decoder: AddressDecoder::new(c.page_size, config.geometry),
        }
    }

    pub fn scheme(&self) -> AssocScheme {
        self.scheme
    }

    pub fn decoder(&self) -> &AddressDecoder {
        &self.decoder
    }

    pub fn address_space(&self) -> u64 {
        self.total_pages * self.page_size
    }

    pub fn page_number(&self, addr: u64) -> u64 {
        addr / self.page_size
    }

    pub fn page_address(&self, addr: u64) -> u64 {
        addr - self.page_offset(addr)
    }

    pub fn page_offset(&self, addr: u64) -> u64 {
        addr % self.page_size
    }

    pub fn set_index(&self, addr: u64) -> u64 {
        self.page_number(addr) % self.num_sets
    }

    pub fn tag(&self, addr: u64) -> u64 {
        self.page_number(addr) / self.num_sets
    }

    pub fn back_address(&self, tag: u64, set: u64) -> u64 {
        (tag * self.num_sets + set) * self.page_size
    }

    /// Burst-aligned address.
    pub fn align(&self, addr: u64) -> u64 {
        addr - addr % self.burst_size
    }

    pub fn fast_bursts_per_page(&self) -> u64 {
        self.page_size / self.burst_size
    }

    pub fn back_bursts_per_page(&self) -> u64 {
        self.page_size / self.back_burst_size
    }

    pub fn way_address(&self, set: u64, way: u64) -> u64 {
        let page = match (self.scheme, &self.rows) {
            (AssocScheme::Channel, _) => set * self.set_size + way,
            (_, Some(rows)) => rows.data_page(set, way, self.set_size),
            _ => way * self.num_sets + set,
        };
        page * self.page_size
    }

    pub fn ways(&self, set: u64) -> WayList {
        (0..self.set_size).map(|i| self.way_address(set, i)).collect()
    }

    /// Fast-tier address holding the tag group of `set`, for schemes that keep tags in rows.
    pub fn tag_address(&self, set: u64) -> Option<u64> {
        let rows = self.rows.as_ref()?;
        let placed = self.decoder.decode(self.way_address(set, 0));
        let base = rows.row_base(placed.channel, placed.rank, placed.bank, placed.row);
        Some((base + rows.tag_column(set) * rows.num_rows) * self.page_size)
    }

    pub fn tag_group(&self, set: u64) -> TagGroup {
        match &self.rows {
            Some(rows) => rows.tag_group(set),
            None => TagGroup {
                start: set,
                stride: 1,
                len: 1,
            },
        }
    }

    /// Tag groups after the one holding `set` in the same row, at most `window` of them
    /// (0 = the rest of the row).
    pub fn following_tag_groups(&self, set: u64, window: u64) -> SmallVec<[TagGroup; 8]> {
        let mut groups = SmallVec::new();
        let Some(rows) = &self.rows else {
            return groups;
        };
        let mut current = rows.tag_group(set);
        loop {
            if window != 0 && groups.len() as u64 >= window {
                break;
            }
            let next_start = current.start + current.len * current.stride;
            if next_start >= self.num_sets
                || rows.line_slot(next_start) <= rows.line_slot(current.start)
            {
                break;
            }
            current = rows.tag_group(next_start);
            groups.push(current);
        }
        groups
    }

    /// Line slot index `k` used by sync-all, split into (set, way).
    pub fn slot(&self, k: u64) -> (u64, u64) {
        (k / self.set_size, k % self.set_size)
    }

    pub fn num_slots(&self) -> u64 {
        self.num_sets * self.set_size
    }
}

#[cfg(test)]
mod tests {
    use super::{Layout, TagGroup};
    use crate::hybrid::config::{AssocScheme, HybridConfig};

    const PAGE: u64 = 4096;

    fn combo_config() -> HybridConfig {
        let mut config = HybridConfig::default();
        config.controller.assoc = AssocScheme::ComboTag;
        config.controller.set_size = 2;
        config.controller.cache_pages = 64;
        config.controller.total_pages = 256;
        config.tag_buffer.sets_per_line = 4;
        config.tag_buffer.sets_per_tag_group = 2;
        config.geometry.rows = 4;
        config.geometry.columns = 16;
        config
    }

    #[test]
    fn set_associative_ways_stride_by_sets() {
        let mut config = HybridConfig::default();
        config.controller.set_size = 4;
        config.controller.cache_pages = 64;
        config.controller.total_pages = 256;
        let layout = Layout::new(&config);
        assert_eq!(layout.num_sets, 16);
        assert_eq!(
            layout.ways(3).as_slice(),
            &[3 * PAGE, 19 * PAGE, 35 * PAGE, 51 * PAGE]
        );
        let addr = 37 * PAGE + 0x10;
        assert_eq!(layout.set_index(addr), 5);
        assert_eq!(layout.tag(addr), 2);
        assert_eq!(layout.back_address(2, 5), 37 * PAGE);
    }

    #[test]
    fn channel_ways_are_adjacent() {
        let mut config = HybridConfig::default();
        config.controller.assoc = AssocScheme::Channel;
        config.controller.set_size = 4;
        config.controller.cache_pages = 64;
        config.controller.total_pages = 256;
        let layout = Layout::new(&config);
        assert_eq!(
            layout.ways(2).as_slice(),
            &[8 * PAGE, 9 * PAGE, 10 * PAGE, 11 * PAGE]
        );
    }

    #[test]
    fn combo_rows_reserve_tag_columns() {
        let layout = Layout::new(&combo_config());
        assert_eq!(layout.actual_cache_pages, 32);
        assert_eq!(layout.num_sets, 16);
        assert_eq!(layout.ways(0).as_slice(), &[32 * PAGE, 36 * PAGE]);
        assert_eq!(layout.ways(1).as_slice(), &[40 * PAGE, 44 * PAGE]);
        assert_eq!(layout.ways(4).as_slice(), &[33 * PAGE, 37 * PAGE]);
        assert_eq!(layout.ways(5).as_slice(), &[41 * PAGE, 45 * PAGE]);

        assert_eq!(layout.tag_address(0), Some(0));
        assert_eq!(layout.tag_address(1), Some(0));
        assert_eq!(layout.tag_address(2), Some(4 * PAGE));
        assert_eq!(layout.tag_address(4), Some(PAGE));
        assert_eq!(layout.tag_address(6), Some(5 * PAGE));
    }

    #[test]
    fn combo_data_never_overlaps_tags() {
        let layout = Layout::new(&combo_config());
        let mut data: Vec<u64> = (0..layout.num_sets)
            .flat_map(|set| layout.ways(set).into_iter())
            .collect();
        let tags: Vec<u64> = (0..layout.num_sets)
            .filter_map(|set| layout.tag_address(set))
            .collect();
        data.sort();
        data.dedup();
        assert_eq!(data.len() as u64, layout.actual_cache_pages);
        assert!(data.iter().all(|addr| !tags.contains(addr)));
        assert!(data.iter().all(|addr| *addr < 64 * PAGE));
    }

    #[test]
    fn tag_groups_cover_line() {
        let layout = Layout::new(&combo_config());
        let group = layout.tag_group(3);
        assert_eq!(group, TagGroup { start: 2, stride: 1, len: 2 });
        assert_eq!(group.sets().collect::<Vec<_>>(), vec![2, 3]);
        assert!(group.contains(2) && !group.contains(4));
        assert_eq!(layout.tag_group(0).sets().collect::<Vec<_>>(), vec![0, 1]);

        let next = layout.following_tag_groups(0, 0);
        assert_eq!(next.as_slice(), &[TagGroup { start: 2, stride: 1, len: 2 }]);
        assert!(layout.following_tag_groups(2, 0).is_empty());
        assert!(layout.following_tag_groups(0, 1).len() == 1);
    }

    #[test]
    fn burst_helpers() {
        let layout = Layout::new(&HybridConfig::default());
        assert_eq!(layout.align(0x1234), 0x1200);
        assert_eq!(layout.fast_bursts_per_page(), 64);
        assert_eq!(layout.back_bursts_per_page(), 1);
        assert_eq!(layout.page_address(0x1234), 0x1000);
    }
}
