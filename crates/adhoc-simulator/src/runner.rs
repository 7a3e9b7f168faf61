use std::fs;
use std::path::PathBuf;

use adhoc_abstract::{ScenarioConfig, ScenarioParams, TrafficPlan, secs_to_us};
use tracing::{debug, info};

use crate::engine::Simulator;
use crate::error::SimError;
use crate::network::{NetworkFactory, SyntheticNetworkFactory, format_course_changes};
use crate::sampler::{CsvSampleSink, MemorySampleSink, SampleLabels, SampleSink, ThroughputSampler};
use crate::stats::{AggregateStats, FinalReport, FlowStatsAggregator};
use crate::trace::{ExperimentReport, IterationReport};

/// Random-stream offset between consecutive iterations.
pub const STREAM_STRIDE: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Idle,
    Configuring,
    Simulating,
    Collecting,
    Done,
}

/// Where per-iteration artifacts go.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub dir: PathBuf,
    pub csv_basename: String,
    pub write_csv: bool,
    /// Keep every sample in memory and attach it to the iteration report.
    pub capture_samples: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            csv_basename: "Adhoc-routing.output.csv".to_string(),
            write_csv: true,
            capture_samples: false,
        }
    }
}

impl OutputOptions {
    pub fn in_memory() -> Self {
        Self {
            write_csv: false,
            capture_samples: true,
            ..Default::default()
        }
    }
}

/// Drives iterations strictly one after another: configure, simulate, collect.
pub struct ExperimentRunner<F: NetworkFactory = SyntheticNetworkFactory> {
    factory: F,
    params: ScenarioParams,
    protocol_selector: u32,
    output: OutputOptions,

    phase: RunnerPhase,
    completed: usize,
    stream_index: u64,
    aggregator: FlowStatsAggregator,
}

impl ExperimentRunner<SyntheticNetworkFactory> {
    pub fn new(params: ScenarioParams, protocol_selector: u32, output: OutputOptions) -> Self {
        Self::with_factory(SyntheticNetworkFactory, params, protocol_selector, output)
    }
}

impl<F: NetworkFactory> ExperimentRunner<F> {
    pub fn with_factory(
        factory: F,
        params: ScenarioParams,
        protocol_selector: u32,
        output: OutputOptions,
    ) -> Self {
        Self {
            factory,
            params,
            protocol_selector,
            output,
            phase: RunnerPhase::Idle,
            completed: 0,
            stream_index: 0,
            aggregator: FlowStatsAggregator::new(),
        }
    }

    pub fn phase(&self) -> RunnerPhase {
        self.phase
    }

    pub fn completed_iterations(&self) -> usize {
        self.completed
    }

    /// Random-stream index the next iteration will use.
    pub fn stream_index(&self) -> u64 {
        self.stream_index
    }

    pub fn aggregate(&self) -> &AggregateStats {
        self.aggregator.aggregate()
    }

    fn set_phase(&mut self, phase: RunnerPhase) {
        debug!("Runner phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn build_sampler(
        &self,
        config: &ScenarioConfig,
        iteration: usize,
    ) -> Result<(ThroughputSampler, Option<MemorySampleSink>, Option<PathBuf>), SimError> {
        let mut sinks: Vec<Box<dyn SampleSink>> = Vec::new();
        let mut csv_path = None;
        if self.output.write_csv {
            let csv =
                CsvSampleSink::create(&self.output.dir, iteration, &self.output.csv_basename)?;
            csv_path = Some(csv.path().to_path_buf());
            sinks.push(Box::new(csv));
        }
        let memory = self.output.capture_samples.then(MemorySampleSink::new);
        if let Some(memory) = &memory {
            sinks.push(Box::new(memory.clone()));
        }
        let sampler = ThroughputSampler::new(SampleLabels::from_config(config), Box::new(sinks));
        Ok((sampler, memory, csv_path))
    }

    /// Run the next iteration to completion and fold its statistics.
    ///
    /// A failed iteration leaves the runner `Idle` with nothing folded, so the
    /// caller may retry or finish with the iterations completed so far.
    pub fn run_iteration(&mut self) -> Result<IterationReport, SimError> {
        let result = self.execute_iteration();
        if result.is_err() {
            self.set_phase(RunnerPhase::Idle);
        }
        result
    }

    fn execute_iteration(&mut self) -> Result<IterationReport, SimError> {
        self.set_phase(RunnerPhase::Configuring);
        let iteration = self.completed + 1;
        let config =
            ScenarioConfig::build(self.protocol_selector, &self.params, self.stream_index)?;
        let plan = TrafficPlan::for_scenario(&config);
        let trace_name = config.trace_name(self.completed, &plan.rate_label());
        info!(
            "Iteration {}: {} with {} nodes, {} sources, stream index {}",
            iteration,
            config.protocol,
            config.node_count,
            config.source_count,
            config.stream_index
        );

        let network = self.factory.build(&config, &plan)?;
        let (sampler, memory, csv_path) = self.build_sampler(&config, iteration)?;

        self.set_phase(RunnerPhase::Simulating);
        let mut sim = Simulator::new(network).with_sampler(sampler);
        sim.run_until(secs_to_us(config.total_time_secs))?;

        self.set_phase(RunnerPhase::Collecting);
        if config.trace_mobility {
            let path = self.output.dir.join(format!("{trace_name}.mob"));
            fs::write(&path, format_course_changes(sim.network().course_changes()))
                .map_err(|e| SimError::io(&path, e))?;
        }

        let flows = sim.flow_stats();
        let run_stats = self.aggregator.collect(&flows, config.source_count)?;
        info!(
            "Iteration {} done: rx {} packets/source, delay {}ms, {} kbps",
            iteration,
            run_stats.rx_packets,
            run_stats.delay_ms,
            run_stats.throughput_kbps()
        );

        let report = IterationReport {
            iteration,
            trace_name,
            run_stats,
            flows,
            samples_written: sim.sampler().map_or(0, |s| s.rows_written()),
            received_packets: sim.counters().total_packets(),
            received_bytes: sim.counters().total_bytes(),
            csv_path,
            samples: memory.map(|m| m.samples()),
            scenario: config,
        };

        self.completed += 1;
        self.stream_index += STREAM_STRIDE;
        self.set_phase(RunnerPhase::Idle);
        Ok(report)
    }

    /// Overall averages across every completed iteration.
    pub fn finish(&mut self) -> Result<FinalReport, SimError> {
        let report = self.aggregator.finalize(self.completed)?;
        self.set_phase(RunnerPhase::Done);
        Ok(report)
    }

    pub fn run(&mut self, iterations: usize) -> Result<ExperimentReport, SimError> {
        if iterations == 0 {
            return Err(SimError::ZeroIterations);
        }
        let mut reports = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            reports.push(self.run_iteration()?);
        }
        let final_report = self.finish()?;
        Ok(ExperimentReport {
            iterations: reports,
            aggregate: *self.aggregate(),
            final_report,
        })
    }
}
