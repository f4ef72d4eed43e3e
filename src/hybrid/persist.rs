use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{ensure, Context};

use super::layout::Layout;
use super::line::{CacheLine, LineDirectory};

fn header(layout: &Layout) -> [u64; 4] {
    [
        layout.page_size,
        layout.set_size,
        layout.actual_cache_pages,
        layout.total_pages,
    ]
}

/// Write the header and every valid line, in address order.
pub fn write_table<W: Write>(out: &mut W, layout: &Layout, lines: &LineDirectory) -> anyhow::Result<()> {
    let [page, ways, pages, total] = header(layout);
    writeln!(out, "{} {} {} {}", page, ways, pages, total)?;
    for (addr, line) in lines.valid_lines() {
        writeln!(
            out,
            "{} {} {} {} {} {}",
            addr, line.valid as u8, line.dirty as u8, line.tag, line.data, line.ts
        )?;
    }
    Ok(())
}

pub fn save(path: &Path, layout: &Layout, lines: &LineDirectory) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create cache table {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_table(&mut out, layout, lines)?;
    out.flush()?;
    Ok(())
}

/// Parse a saved table. Restored lines are unlocked; `clean` clears every dirty bit.
pub fn read_table(text: &str, layout: &Layout, clean: bool) -> anyhow::Result<Vec<(u64, CacheLine)>> {
    let mut rows = text.lines().filter(|l| !l.trim().is_empty());
    let first = rows.next().context("cache table is empty")?;
    let found = parse_fields::<4>(first).context("bad cache table header")?;
    let expected = header(layout);
    ensure!(
        found == expected,
        "cache table header {:?} does not match configuration {:?} (page_size set_size cache_pages total_pages)",
        found,
        expected
    );

    let mut restored = Vec::new();
    for (n, row) in rows.enumerate() {
        let [addr, valid, dirty, tag, data, ts] =
            parse_fields::<6>(row).with_context(|| format!("bad cache table line {}", n + 2))?;
        let line = CacheLine::restored(valid != 0, dirty != 0 && !clean, tag, data, ts);
        restored.push((addr, line));
    }
    Ok(restored)
}

pub fn restore(
    path: &Path,
    layout: &Layout,
    lines: &mut LineDirectory,
    clean: bool,
) -> anyhow::Result<usize> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read cache table {}", path.display()))?;
    let restored = read_table(&text, layout, clean)
        .with_context(|| format!("cannot restore {}", path.display()))?;
    let count = restored.len();
    for (addr, line) in restored {
        lines.put(addr, line);
    }
    Ok(count)
}

fn parse_fields<const N: usize>(row: &str) -> anyhow::Result<[u64; N]> {
    let mut fields = [0u64; N];
    let mut words = row.split_whitespace();
    for field in fields.iter_mut() {
        let word = words.next().context("too few fields")?;
        *field = word
            .parse()
            .with_context(|| format!("'{}' is not a number", word))?;
    }
    ensure!(words.next().is_none(), "too many fields");
    Ok(fields)
}
