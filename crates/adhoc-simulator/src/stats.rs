//! Reduction of end-of-run flow statistics into per-run and cross-run averages.
//!
//! All averages use integer division on the unsigned counters, so a run's
//! per-source figures and the overall figures truncate the same way.

use serde::Serialize;
use std::fmt;

use adhoc_abstract::{FlowId, FlowStatsMap};
use tracing::warn;

use crate::error::SimError;

/// Length of the observation window the throughput figures are normalised by.
// TODO: derive from the scenario's traffic stop time instead of a fixed 100s.
pub const MEASUREMENT_WINDOW_SECS: f64 = 100.0;

fn throughput_kbps(rx_bytes: u64) -> f64 {
    rx_bytes as f64 * 8.0 / MEASUREMENT_WINDOW_SECS / 1000.0
}

/// A flow counts toward a run iff its id is within the source count.
/// This keys on classifier order, not on the flow's actual endpoints.
pub fn is_source_flow(id: FlowId, source_count: u32) -> bool {
    id.get() <= source_count
}

/// Per-run counters. As returned by [`RunStats::reduce`] every field is already a
/// per-source average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Sum of per-flow average delays, in milliseconds.
    pub delay_ms: u64,
}

impl RunStats {
    /// Filter the source flows, sum their counters and divide by `source_count`.
    pub fn reduce(flows: &FlowStatsMap, source_count: u32) -> Result<Self, SimError> {
        let mut totals = RunStats::default();
        totals.accumulate(flows, source_count);
        totals.per_source(source_count)
    }

    /// Add the selected flows into this accumulator.
    ///
    /// Delay adds each flow's own average (`delay_sum / rx_packets`), so the run
    /// delay is a sum of per-flow averages rather than an average over packets.
    fn accumulate(&mut self, flows: &FlowStatsMap, source_count: u32) {
        let selected = flows
            .iter()
            .filter(|(id, _)| is_source_flow(**id, source_count));
        for (_, flow) in selected {
            self.tx_packets += flow.tx_packets;
            self.tx_bytes += flow.tx_bytes;
            self.rx_packets += flow.rx_packets;
            self.rx_bytes += flow.rx_bytes;
            if flow.rx_packets > 0 {
                self.delay_ms += flow.delay_sum.as_millis() as u64 / flow.rx_packets;
            }
        }
    }

    fn per_source(&self, source_count: u32) -> Result<Self, SimError> {
        if source_count == 0 {
            return Err(SimError::DegenerateConfiguration(
                "source count must be positive to average per source",
            ));
        }
        let n = u64::from(source_count);
        Ok(Self {
            tx_packets: self.tx_packets / n,
            tx_bytes: self.tx_bytes / n,
            rx_packets: self.rx_packets / n,
            rx_bytes: self.rx_bytes / n,
            delay_ms: self.delay_ms / n,
        })
    }

    pub fn throughput_kbps(&self) -> f64 {
        throughput_kbps(self.rx_bytes)
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Avg Tx Packets this run: {}", self.tx_packets)?;
        writeln!(f, "  Avg Tx Bytes this run:   {}", self.tx_bytes)?;
        writeln!(f, "  Avg Rx Packets this run: {}", self.rx_packets)?;
        writeln!(f, "  Avg Rx Bytes this run:   {}", self.rx_bytes)?;
        writeln!(f, "  Avg Delay this run:  {}", self.delay_ms)?;
        write!(f, "  Avg Throughput this run: {} kbps", self.throughput_kbps())
    }
}

/// Sum of per-run averages across iterations. Divided by the iteration count only
/// in [`AggregateStats::finalize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub delay_ms: u64,
}

impl AggregateStats {
    pub fn fold(&mut self, run: &RunStats) {
        self.tx_packets += run.tx_packets;
        self.tx_bytes += run.tx_bytes;
        self.rx_packets += run.rx_packets;
        self.rx_bytes += run.rx_bytes;
        self.delay_ms += run.delay_ms;
    }

    pub fn finalize(&self, iteration_count: usize) -> Result<FinalReport, SimError> {
        if iteration_count == 0 {
            return Err(SimError::ZeroIterations);
        }
        let n = iteration_count as u64;
        let rx_bytes = self.rx_bytes / n;
        Ok(FinalReport {
            iterations: iteration_count,
            tx_packets: self.tx_packets / n,
            tx_bytes: self.tx_bytes / n,
            rx_packets: self.rx_packets / n,
            rx_bytes,
            delay_ms: self.delay_ms / n,
            throughput_kbps: throughput_kbps(rx_bytes),
        })
    }
}

/// Overall averages, emitted once after the last iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FinalReport {
    pub iterations: usize,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub delay_ms: u64,
    pub throughput_kbps: f64,
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Avg Tx Packets overall: {}", self.tx_packets)?;
        writeln!(f, "  Avg Tx Bytes overall:   {}", self.tx_bytes)?;
        writeln!(f, "  Avg Rx Packets overall: {}", self.rx_packets)?;
        writeln!(f, "  Avg Rx Bytes overall:   {}", self.rx_bytes)?;
        writeln!(f, "  Avg Delay overall:  {}", self.delay_ms)?;
        write!(f, "  Avg Throughput overall: {} kbps", self.throughput_kbps)
    }
}

/// Owns the run accumulator and the cross-run aggregate for an experiment.
#[derive(Debug, Default)]
pub struct FlowStatsAggregator {
    run: RunStats,
    aggregate: AggregateStats,
    runs_folded: usize,
}

impl FlowStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce one run's flows, fold the per-source averages into the aggregate and
    /// zero the run accumulator for the next run.
    pub fn collect(
        &mut self,
        flows: &FlowStatsMap,
        source_count: u32,
    ) -> Result<RunStats, SimError> {
        self.run.accumulate(flows, source_count);
        let averaged = self.run.per_source(source_count);
        self.run = RunStats::default();
        let averaged = averaged?;

        if averaged.rx_packets == 0 {
            warn!("No packets received from source flows this run");
        }
        self.aggregate.fold(&averaged);
        self.runs_folded += 1;
        Ok(averaged)
    }

    pub fn aggregate(&self) -> &AggregateStats {
        &self.aggregate
    }

    pub fn runs_folded(&self) -> usize {
        self.runs_folded
    }

    pub fn finalize(&self, iteration_count: usize) -> Result<FinalReport, SimError> {
        self.aggregate.finalize(iteration_count)
    }
}
