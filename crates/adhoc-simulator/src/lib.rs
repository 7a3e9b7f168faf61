pub mod engine;
pub mod error;
pub mod network;
pub mod runner;
pub mod sampler;
pub mod stats;
pub mod trace;

pub use engine::{ReceiveCounters, Simulator};
pub use error::SimError;
pub use network::{AdhocNetwork, NetworkFactory, SyntheticNetworkFactory};
pub use runner::{ExperimentRunner, OutputOptions, RunnerPhase};
pub use sampler::{
    CSV_HEADER, CsvSampleSink, MemorySampleSink, SampleLabels, SampleSink, SamplerState,
    ThroughputSample, ThroughputSampler, write_header,
};
pub use stats::{AggregateStats, FinalReport, FlowStatsAggregator, RunStats};
pub use trace::{ExperimentReport, IterationReport};
