/// Start of the memory-mapped I/O hole.
pub const MMIO_START: u64 = 0xE000_0000;
pub const MMIO_END: u64 = 1 << 32;
pub const MMIO_HOLE: u64 = MMIO_END - MMIO_START;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remapped {
    /// Inside the I/O hole; completes immediately without touching memory.
    Dropped,
    Mapped(u64),
}

/// Close the 3.5-4 GiB hole: addresses inside it are dropped, addresses above it move down.
pub fn remap(addr: u64, enabled: bool) -> Remapped {
    if !enabled || addr < MMIO_START {
        Remapped::Mapped(addr)
    } else if addr < MMIO_END {
        Remapped::Dropped
    } else {
        Remapped::Mapped(addr - MMIO_HOLE)
    }
}

#[cfg(test)]
mod tests {
    use super::{remap, Remapped};

    #[test]
    fn hole_is_dropped() {
        assert_eq!(remap(3_758_096_384, true), Remapped::Dropped);
        assert_eq!(remap(4_294_967_295, true), Remapped::Dropped);
        assert_eq!(remap(3_758_096_383, true), Remapped::Mapped(3_758_096_383));
    }

    #[test]
    fn high_memory_moves_down() {
        assert_eq!(remap(4_294_967_296, true), Remapped::Mapped(3_758_096_384));
    }

    #[test]
    fn disabled_is_identity() {
        assert_eq!(remap(4_000_000_000, false), Remapped::Mapped(4_000_000_000));
    }
}
