use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::timeq::Cycle;

use super::transaction::TransactionKind;

/// Per-access CSV records: admission, classification and completion of each transaction.
pub(crate) struct AccessLog {
    writer: BufWriter<Box<dyn Write>>,
    wrote_header: bool,
}

impl AccessLog {
    pub(crate) fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub(crate) fn from_writer(writer: Box<dyn Write>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            wrote_header: false,
        }
    }

    pub(crate) fn write_event(
        &mut self,
        cycle: Cycle,
        event: &str,
        kind: TransactionKind,
        addr: u64,
        cache_addr: Option<u64>,
        latency: Option<Cycle>,
    ) {
        if !self.wrote_header {
            let _ = writeln!(self.writer, "cycle,event,kind,addr,cache_addr,latency");
            self.wrote_header = true;
        }

        let cache_str = cache_addr
            .map(|addr| format!("{:#x}", addr))
            .unwrap_or_default();
        let latency_str = latency.map(|l| l.to_string()).unwrap_or_default();
        let _ = writeln!(
            self.writer,
            "{},{},{},{:#x},{},{}",
            cycle,
            event,
            kind.name(),
            addr,
            cache_str,
            latency_str
        );
    }

    pub(crate) fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for AccessLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog")
            .field("wrote_header", &self.wrote_header)
            .finish()
    }
}
