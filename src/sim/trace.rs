use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{bail, Context};

use crate::timeq::Cycle;

/// One request from a trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub cycle: Cycle,
    pub is_write: bool,
    pub addr: u64,
}

/// Reads `cycle rw addr` lines. Anything after `#` is a comment; an odd `rw` is a write.
pub struct TraceReader<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl TraceReader<BufReader<File>> {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open trace {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = anyhow::Result<TraceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            self.line_no += 1;
            match parse_line(&line) {
                Ok(None) => continue,
                Ok(Some(record)) => return Some(Ok(record)),
                Err(err) => {
                    return Some(Err(err.context(format!("trace line {}", self.line_no))))
                }
            }
        }
    }
}

fn parse_number(field: &str) -> anyhow::Result<u64> {
    let parsed = match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => field.parse(),
    };
    parsed.with_context(|| format!("`{}` is not a number", field))
}

/// Blank and comment-only lines parse to `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<TraceRecord>> {
    let body = line.split('#').next().unwrap_or_default();
    let fields: Vec<&str> = body.split_whitespace().collect();
    match fields.as_slice() {
        [] => Ok(None),
        [cycle, rw, addr] => Ok(Some(TraceRecord {
            cycle: parse_number(cycle)?,
            is_write: parse_number(rw)? % 2 == 1,
            addr: parse_number(addr)?,
        })),
        _ => bail!(
            "expected `cycle rw addr`, found {} fields in `{}`",
            fields.len(),
            line.trim()
        ),
    }
}
