use std::path::PathBuf;

use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize config section"),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Settings for the trace-driven front end.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub trace: PathBuf,
    /// Number of trace lines to skip before submitting.
    pub start_trans: u64,
    /// Stop after this many transactions; 0 runs the whole trace.
    pub end_trans: u64,
    /// Divide trace cycles by this factor; 0 leaves them alone.
    pub speedup: u64,
    pub max_pending: u64,
    pub min_pending: u64,
    /// Extra cycles to run once every transaction has completed.
    pub drain_cycles: u64,
    /// Give up if the trace has not drained after this many cycles past the last submit.
    pub timeout: u64,
    /// Log progress every this many completions; 0 disables it.
    pub progress_interval: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            trace: PathBuf::from("traces/test.txt"),
            start_trans: 0,
            end_trans: 0,
            speedup: 0,
            max_pending: 36,
            min_pending: 35,
            drain_cycles: 1000,
            timeout: 10_000_000,
            progress_interval: 100,
        }
    }
}

/// Output locations; every entry is optional and disabled when absent.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Per-access CSV log.
    pub access_log: Option<PathBuf>,
    /// JSON statistics summary written by `print_logfile`.
    pub stats_file: Option<PathBuf>,
    /// Tag buffer usage report written by `print_logfile`.
    pub tag_buffer_log: Option<PathBuf>,
}

impl Config for LogConfig {}
