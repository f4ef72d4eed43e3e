use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{ensure, Context};
use serde::Deserialize;
use toml::Table;

use crate::backing::MemoryModelConfig;
use crate::sim::config::{Config, LogConfig};

/// Where the controller finds the tags for a set.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssocScheme {
    /// Tags live in controller SRAM; hit/miss is known before any fast-tier access.
    #[default]
    TagTlb,
    /// One way per set; the data read doubles as the tag check.
    Direct,
    /// Tags share a fast-tier row with their data and are read before every access.
    Loh,
    /// Like `Loh`, with recently read tag groups kept in a tag buffer.
    ComboTag,
    /// Each way of a set sits on its own channel; all ways are read in parallel.
    Channel,
}

impl AssocScheme {
    /// Schemes that reserve room for tag groups inside fast-tier rows.
    pub fn tags_in_rows(self) -> bool {
        matches!(self, Self::Loh | Self::ComboTag)
    }

}

impl FromStr for AssocScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tag_tlb" => Ok(Self::TagTlb),
            "direct" => Ok(Self::Direct),
            "loh" => Ok(Self::Loh),
            "combo_tag" => Ok(Self::ComboTag),
            "channel" => Ok(Self::Channel),
            _ => Err(format!(
                "unsupported associativity '{}', expected one of: tag_tlb, direct, loh, combo_tag, channel",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VictimPolicy {
    #[default]
    Lru,
    Nru,
    Lfu,
    Cflru,
    Cflfu,
    Random,
}

impl FromStr for VictimPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "lru" => Ok(Self::Lru),
            "nru" => Ok(Self::Nru),
            "lfu" => Ok(Self::Lfu),
            "cflru" => Ok(Self::Cflru),
            "cflfu" => Ok(Self::Cflfu),
            "random" => Ok(Self::Random),
            _ => Err(format!(
                "unsupported replacement policy '{}', expected one of: lru, nru, lfu, cflru, cflfu, random",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TagReplacement {
    #[default]
    Lru,
    /// Evict any entry that has been used, otherwise a random one.
    Ru,
    Fifo,
    Random,
    Mru,
    /// Second-chance FIFO: used entries are cleared and rotated to the back.
    Lrnu,
    /// Oldest used entry first, falling back to the oldest unused one.
    UfLra,
    /// LRU eviction, and a hit also refreshes the next few sets.
    Nnn,
}

impl FromStr for TagReplacement {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "lru" => Ok(Self::Lru),
            "ru" => Ok(Self::Ru),
            "fifo" => Ok(Self::Fifo),
            "random" => Ok(Self::Random),
            "mru" => Ok(Self::Mru),
            "lrnu" => Ok(Self::Lrnu),
            "uf_lra" => Ok(Self::UfLra),
            "nnn" => Ok(Self::Nnn),
            _ => Err(format!(
                "unsupported tag replacement '{}', expected one of: lru, ru, fifo, random, mru, lrnu, uf_lra, nnn",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    /// Cycles spent on the tag lookup before an admitted transaction is classified.
    pub controller_delay: u64,
    pub page_size: u64,
    /// Ways per set.
    pub set_size: u64,
    /// Fast-tier burst size in bytes.
    pub burst_size: u64,
    /// Bulk-tier burst size in bytes; a whole page when unset.
    pub back_burst_size: Option<u64>,
    pub total_pages: u64,
    pub cache_pages: u64,
    pub assoc: AssocScheme,
    pub replacement: VictimPolicy,
    pub seed: u64,
    pub critical_line_first: bool,
    /// Drop the 3.5-4 GiB hole and shift everything above it down by 0.5 GiB.
    pub remap_mmio: bool,
    pub prefill_cache: bool,
    pub prefill_dirty: bool,
}

impl Config for ControllerConfig {}

impl ControllerConfig {
    pub fn back_burst_size(&self) -> u64 {
        self.back_burst_size.unwrap_or(self.page_size)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_delay: 2,
            page_size: 4096,
            set_size: 64,
            burst_size: 64,
            back_burst_size: None,
            total_pages: 2097152 / 4,
            cache_pages: 1048576 / 4,
            assoc: AssocScheme::TagTlb,
            replacement: VictimPolicy::Lru,
            seed: 0,
            critical_line_first: true,
            remap_mmio: true,
            prefill_cache: false,
            prefill_dirty: false,
        }
    }
}

/// Organization of the fast tier, used by the address decoder and the row layouts.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct GeometryConfig {
    pub channels: u64,
    pub ranks: u64,
    pub banks: u64,
    pub rows: u64,
    /// Pages per row.
    pub columns: u64,
}

impl Config for GeometryConfig {}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            ranks: 1,
            banks: 1,
            rows: 1,
            columns: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TagBufferConfig {
    pub num_tag_ways: usize,
    pub num_tag_sets: u64,
    /// Sets whose tags share one fast-tier row.
    pub sets_per_line: u64,
    /// Sets covered by one tag-group read.
    pub sets_per_tag_group: u64,
    pub channel_interleave: bool,
    pub tag_prefetch: bool,
    /// Tag groups read ahead after a tag miss; 0 reads the rest of the row.
    pub tag_prefetch_window: u64,
    pub replacement: TagReplacement,
    /// Length of the evicted-tag history used for thrash distances.
    pub victim_history: usize,
}

impl Config for TagBufferConfig {}

impl Default for TagBufferConfig {
    fn default() -> Self {
        Self {
            num_tag_ways: 8,
            num_tag_sets: 64,
            sets_per_line: 1,
            sets_per_tag_group: 1,
            channel_interleave: false,
            tag_prefetch: false,
            tag_prefetch_window: 0,
            replacement: TagReplacement::Lru,
            victim_history: 32,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Pages fetched ahead of every demand miss; 0 disables.
    pub sequential_window: u64,
    pub stream_buffer: bool,
    pub one_miss_table_size: usize,
    pub num_stream_buffers: usize,
    pub stream_buffer_length: u64,
    pub perfect_prefetch_file: Option<PathBuf>,
}

impl Config for PrefetchConfig {}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            sequential_window: 0,
            stream_buffer: false,
            one_miss_table_size: 10,
            num_stream_buffers: 10,
            stream_buffer_length: 4,
            perfect_prefetch_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TlbConfig {
    /// Bytes of tag storage cached by the controller; 0 disables the model.
    pub size: u64,
    pub tag_size: u64,
    pub bytes_per_read: u64,
    pub miss_delay: u64,
}

impl Config for TlbConfig {}

impl Default for TlbConfig {
    fn default() -> Self {
        Self {
            size: 0,
            tag_size: 2,
            bytes_per_read: 64,
            miss_delay: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PersistConfig {
    pub restore_file: Option<PathBuf>,
    pub save_file: Option<PathBuf>,
    /// Restore every line clean.
    pub restore_clean: bool,
}

impl Config for PersistConfig {}

/// Everything the controller needs, validated once and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub controller: ControllerConfig,
    pub geometry: GeometryConfig,
    pub tag_buffer: TagBufferConfig,
    pub prefetch: PrefetchConfig,
    pub tlb: TlbConfig,
    pub persist: PersistConfig,
    pub log: LogConfig,
    pub fast_memory: MemoryModelConfig,
    pub back_memory: MemoryModelConfig,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            geometry: GeometryConfig::default(),
            tag_buffer: TagBufferConfig::default(),
            prefetch: PrefetchConfig::default(),
            tlb: TlbConfig::default(),
            persist: PersistConfig::default(),
            log: LogConfig::default(),
            fast_memory: MemoryModelConfig::default(),
            back_memory: MemoryModelConfig::bulk(),
        }
    }
}

impl HybridConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let table: Table = toml::from_str(&text)
            .with_context(|| format!("cannot parse config {}", path.display()))?;
        Self::from_table(&table)
    }

    pub fn from_table(table: &Table) -> anyhow::Result<Self> {
        let back_memory = match table.get("back_memory") {
            Some(section) => MemoryModelConfig::from_section(Some(section))?,
            None => MemoryModelConfig::bulk(),
        };
        let config = Self {
            controller: ControllerConfig::from_section(table.get("hybrid"))?,
            geometry: GeometryConfig::from_section(table.get("geometry"))?,
            tag_buffer: TagBufferConfig::from_section(table.get("tag_buffer"))?,
            prefetch: PrefetchConfig::from_section(table.get("prefetch"))?,
            tlb: TlbConfig::from_section(table.get("tlb"))?,
            persist: PersistConfig::from_section(table.get("persist"))?,
            log: LogConfig::from_section(table.get("log"))?,
            fast_memory: MemoryModelConfig::from_section(table.get("fast_memory"))?,
            back_memory,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let c = &self.controller;
        ensure!(c.page_size.is_power_of_two(), "page_size must be a power of two");
        ensure!(c.burst_size > 0, "burst_size must be > 0");
        let back_burst = c.back_burst_size();
        ensure!(back_burst > 0, "back_burst_size must be > 0");
        ensure!(
            c.page_size % c.burst_size == 0,
            "page_size must be a multiple of burst_size"
        );
        ensure!(
            back_burst <= c.page_size && c.page_size % back_burst == 0,
            "page_size must be a multiple of back_burst_size"
        );
        ensure!(c.set_size > 0, "set_size must be > 0");
        ensure!(c.cache_pages >= c.set_size, "cache_pages must be >= set_size");
        ensure!(
            c.cache_pages <= c.total_pages,
            "cache_pages must not exceed total_pages"
        );
        if c.assoc == AssocScheme::Direct {
            ensure!(c.set_size == 1, "direct mapping needs set_size = 1");
        }

        let g = &self.geometry;
        ensure!(
            g.channels > 0 && g.ranks > 0 && g.banks > 0 && g.rows > 0 && g.columns > 0,
            "geometry fields must be > 0"
        );

        if c.assoc.tags_in_rows() {
            let t = &self.tag_buffer;
            ensure!(t.sets_per_line > 0, "sets_per_line must be > 0");
            ensure!(t.sets_per_tag_group > 0, "sets_per_tag_group must be > 0");
            ensure!(
                t.sets_per_tag_group <= t.sets_per_line,
                "sets_per_tag_group must not exceed sets_per_line"
            );
            let used = t.sets_per_line / t.sets_per_tag_group + t.sets_per_line * c.set_size;
            ensure!(
                g.columns >= used,
                "a row of {} pages cannot hold {} pages of tags and data",
                g.columns,
                used
            );
            let rows = g.channels * g.ranks * g.banks * g.rows;
            ensure!(
                rows * g.columns == c.cache_pages,
                "geometry covers {} pages but cache_pages is {}",
                rows * g.columns,
                c.cache_pages
            );
        }
        if c.assoc == AssocScheme::ComboTag {
            ensure!(self.tag_buffer.num_tag_ways > 0, "num_tag_ways must be > 0");
            ensure!(self.tag_buffer.num_tag_sets > 0, "num_tag_sets must be > 0");
        }

        for (name, m) in [("fast_memory", &self.fast_memory), ("back_memory", &self.back_memory)] {
            ensure!(m.channels > 0, "{}.channels must be > 0", name);
            ensure!(m.burst_bytes > 0, "{}.burst_bytes must be > 0", name);
            ensure!(m.bytes_per_cycle > 0, "{}.bytes_per_cycle must be > 0", name);
            ensure!(m.queue_capacity > 0, "{}.queue_capacity must be > 0", name);
        }

        if self.tlb.size > 0 {
            ensure!(self.tlb.tag_size > 0, "tlb tag_size must be > 0");
            ensure!(
                self.tlb.bytes_per_read >= self.tlb.tag_size,
                "tlb bytes_per_read must hold at least one tag"
            );
            ensure!(
                self.tlb.size >= self.tlb.bytes_per_read,
                "tlb size must hold at least one entry"
            );
        }
        Ok(())
    }
}
