use serde::Serialize;
use std::path::PathBuf;

use adhoc_abstract::{FlowStatsMap, ScenarioConfig};

use crate::sampler::ThroughputSample;
use crate::stats::{AggregateStats, FinalReport, RunStats};

/// Outcome of one completed iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    /// 1-based, matches the prefix of the iteration's CSV file.
    pub iteration: usize,
    pub scenario: ScenarioConfig,
    pub trace_name: String,
    pub run_stats: RunStats,
    pub flows: FlowStatsMap,
    pub samples_written: u64,
    pub received_packets: u64,
    pub received_bytes: u64,
    pub csv_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<ThroughputSample>>,
}

/// Serializable record of a whole experiment.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub iterations: Vec<IterationReport>,
    pub aggregate: AggregateStats,
    pub final_report: FinalReport,
}
