use anyhow::bail;
use log::{info, warn};

use crate::hybrid::HybridSystem;
use crate::sim::config::SimConfig;
use crate::sim::perf_log::{progress_logger, ProgressRecord, RunSummary};
use crate::sim::trace::{TraceReader, TraceRecord};
use crate::timeq::Cycle;

/// Replays a trace against the controller, throttling on outstanding requests.
pub struct TraceSim {
    config: SimConfig,
    system: HybridSystem,
    trace_cycle: Cycle,
    submitted: u64,
    completed: u64,
    throttle_count: u64,
    throttle_cycles: Cycle,
    final_cycles: Cycle,
}

impl TraceSim {
    pub fn new(config: SimConfig, system: HybridSystem) -> Self {
        Self {
            config,
            system,
            trace_cycle: 0,
            submitted: 0,
            completed: 0,
            throttle_count: 0,
            throttle_cycles: 0,
            final_cycles: 0,
        }
    }

    pub fn system(&self) -> &HybridSystem {
        &self.system
    }

    pub fn outstanding(&self) -> u64 {
        self.submitted - self.completed
    }

    /// Replay the configured trace file.
    pub fn simulate(&mut self) -> anyhow::Result<RunSummary> {
        let reader = TraceReader::open(&self.config.trace)?;
        self.run(reader)
    }

    pub fn run<I>(&mut self, trace: I) -> anyhow::Result<RunSummary>
    where
        I: IntoIterator<Item = anyhow::Result<TraceRecord>>,
    {
        let start = self.config.start_trans as usize;
        for record in trace.into_iter().skip(start) {
            let record = record?;
            let due = match self.config.speedup {
                0 => record.cycle,
                factor => record.cycle / factor,
            };
            while self.trace_cycle < due {
                self.step()?;
                self.trace_cycle += 1;
            }

            self.system.add_transaction(record.is_write, record.addr);
            self.submitted += 1;

            if self.outstanding() >= self.config.max_pending {
                self.throttle_count += 1;
                while self.outstanding() > self.config.min_pending {
                    self.step()?;
                    self.throttle_cycles += 1;
                }
            }

            if self.config.end_trans != 0 && self.submitted >= self.config.end_trans {
                break;
            }
        }

        while self.outstanding() > 0 {
            if self.final_cycles >= self.config.timeout {
                bail!(
                    "{} transactions still outstanding {} cycles after the last submission",
                    self.outstanding(),
                    self.final_cycles
                );
            }
            self.step()?;
            self.final_cycles += 1;
        }

        // let posted writes and write-backs land before saving state
        let mut extra = 0;
        while !self.system.is_idle() && extra < self.config.drain_cycles {
            self.system.update()?;
            extra += 1;
        }
        if !self.system.is_idle() {
            warn!("controller still busy after {} drain cycles", extra);
        }
        self.system.print_logfile()?;

        let summary = self.summary();
        info!(
            "{} transactions in {} cycles, hit rate {:.3}, average latency {:.1}",
            summary.completed, summary.total_cycles, summary.hit_rate, summary.average_latency
        );
        Ok(summary)
    }

    fn step(&mut self) -> anyhow::Result<()> {
        self.system.update()?;
        while self.system.poll_completion().is_some() {
            self.completed += 1;
            let interval = self.config.progress_interval;
            if interval != 0 && self.completed % interval == 0 {
                self.report_progress();
            }
        }
        Ok(())
    }

    fn report_progress(&self) {
        info!(
            "complete={} pending={} cycle={} throttle_count={}",
            self.completed,
            self.outstanding(),
            self.system.cycle(),
            self.throttle_count
        );
        if let Some(logger) = progress_logger() {
            logger.write_json(&ProgressRecord {
                cycle: self.system.cycle(),
                completed: self.completed,
                outstanding: self.outstanding(),
                queued: self.system.queue_len(),
                admitted: self.system.pending_count(),
            });
        }
    }

    pub fn summary(&self) -> RunSummary {
        let stats = self.system.stats_snapshot();
        RunSummary {
            submitted: self.submitted,
            completed: self.completed,
            trace_cycles: self.trace_cycle,
            throttle_count: self.throttle_count,
            throttle_cycles: self.throttle_cycles,
            final_cycles: self.final_cycles,
            total_cycles: self.system.cycle(),
            hit_rate: stats.hit_rate(),
            average_latency: stats.average_latency(),
            stats,
        }
    }
}
