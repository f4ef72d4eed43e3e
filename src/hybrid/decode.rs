use super::config::GeometryConfig;

/// Placement of a fast-tier address in the memory hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedAddress {
    pub channel: u64,
    pub rank: u64,
    pub bank: u64,
    pub row: u64,
    pub column: u64,
}

/// Splits a fast-tier address into (channel, rank, bank, row, column), channel least significant
/// once the page offset is dropped.
#[derive(Debug, Clone, Copy)]
pub struct AddressDecoder {
    page_bits: u32,
    geometry: GeometryConfig,
    shift: bool,
}

impl AddressDecoder {
    pub fn new(page_size: u64, geometry: GeometryConfig) -> Self {
        debug_assert!(page_size.is_power_of_two());
        let shift = [
            geometry.channels,
            geometry.ranks,
            geometry.banks,
            geometry.rows,
            geometry.columns,
        ]
        .iter()
        .all(|n| n.is_power_of_two());
        Self {
            page_bits: page_size.trailing_zeros(),
            geometry,
            shift,
        }
    }

    pub fn decode(&self, addr: u64) -> DecodedAddress {
        let page = addr >> self.page_bits;
        if self.shift {
            self.decode_shift(page)
        } else {
            self.decode_divmod(page)
        }
    }

    fn decode_shift(&self, mut page: u64) -> DecodedAddress {
        let g = &self.geometry;
        let mut take = |width: u64| {
            let bits = width.trailing_zeros();
            let field = page & (width - 1);
            page >>= bits;
            field
        };
        let channel = take(g.channels);
        let rank = take(g.ranks);
        let bank = take(g.banks);
        let row = take(g.rows);
        let column = take(g.columns);
        DecodedAddress {
            channel,
            rank,
            bank,
            row,
            column,
        }
    }

    fn decode_divmod(&self, mut page: u64) -> DecodedAddress {
        let g = &self.geometry;
        let mut take = |width: u64| {
            let field = page % width;
            page /= width;
            field
        };
        let channel = take(g.channels);
        let rank = take(g.ranks);
        let bank = take(g.banks);
        let row = take(g.rows);
        let column = take(g.columns);
        DecodedAddress {
            channel,
            rank,
            bank,
            row,
            column,
        }
    }
}
