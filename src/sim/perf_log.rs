use std::env;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::hybrid::HybridStats;
use crate::timeq::Cycle;

static PERF_RUN_DIR: OnceLock<PathBuf> = OnceLock::new();

pub fn perf_run_dir() -> Option<PathBuf> {
    if let Some(path) = PERF_RUN_DIR.get() {
        return Some(path.clone());
    }

    let root = env::var("HYBRIDMEM_PERF_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("performance_logs"));
    if fs::create_dir_all(&root).is_err() {
        return None;
    }

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let pid = std::process::id();
    let run_dir = root.join(format!("run_{ts}_{pid}"));
    if fs::create_dir_all(&run_dir).is_err() {
        return None;
    }

    let _ = PERF_RUN_DIR.set(run_dir.clone());
    Some(run_dir)
}

/// End-of-run totals of a trace-driven simulation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub submitted: u64,
    pub completed: u64,
    /// Cycles spent walking the trace, throttled cycles excluded.
    pub trace_cycles: Cycle,
    pub throttle_count: u64,
    pub throttle_cycles: Cycle,
    /// Cycles after the last submission until every transaction completed.
    pub final_cycles: Cycle,
    pub total_cycles: Cycle,
    pub hit_rate: f64,
    pub average_latency: f64,
    pub stats: HybridStats,
}

#[derive(Debug, Serialize)]
pub struct ProgressRecord {
    pub cycle: Cycle,
    pub completed: u64,
    pub outstanding: u64,
    pub queued: usize,
    pub admitted: u64,
}

pub struct StatsLog {
    writer: Mutex<BufWriter<File>>,
}

impl StatsLog {
    pub(crate) fn write_json<T: Serialize>(&self, record: &T) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Ok(payload) = serde_json::to_string(record) {
                let _ = writeln!(guard, "{payload}");
            }
        }
    }
}

static PROGRESS_LOGGER: OnceLock<Option<Arc<StatsLog>>> = OnceLock::new();

fn create_progress_logger() -> Option<Arc<StatsLog>> {
    let enabled = env::var("HYBRIDMEM_PROGRESS_LOG")
        .ok()
        .map(|val| {
            let lowered = val.to_ascii_lowercase();
            lowered == "1" || lowered == "true" || lowered == "yes"
        })
        .unwrap_or(false);
    if !enabled {
        return None;
    }
    perf_run_dir().and_then(|run_dir| {
        let path = run_dir.join("progress.jsonl");
        File::create(path).ok().map(|file| {
            Arc::new(StatsLog {
                writer: Mutex::new(BufWriter::new(file)),
            })
        })
    })
}

pub fn progress_logger() -> Option<Arc<StatsLog>> {
    PROGRESS_LOGGER.get_or_init(create_progress_logger).clone()
}

pub fn write_summary(summary: &RunSummary) {
    let run_dir = match perf_run_dir() {
        Some(dir) => dir,
        None => return,
    };
    let path = run_dir.join("summary.json");
    if let Ok(payload) = serde_json::to_string_pretty(summary) {
        let _ = fs::write(path, payload);
    }
}
