use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use adhoc_abstract::{
    FlowId, FlowStats, FlowStatsMap, NetworkModel, SECOND_US, ScenarioConfig, ScenarioParams,
    SimContext, TrafficPlan,
};
use adhoc_simulator::{
    CSV_HEADER, ExperimentRunner, NetworkFactory, OutputOptions, RunnerPhase, SimError,
};

/// Delivers `per_second` datagrams half-way through every second and reports fixed flows.
struct FixedNetwork {
    flows: FlowStatsMap,
    per_second: u32,
}

impl NetworkModel for FixedNetwork {
    fn install(&mut self, ctx: &mut dyn SimContext) {
        ctx.schedule_at(SECOND_US / 2, 0);
    }

    fn on_timer(&mut self, ctx: &mut dyn SimContext, _token: u64) {
        for _ in 0..self.per_second {
            ctx.receive_packet(72);
        }
        ctx.schedule_in(SECOND_US, 0);
    }

    fn flow_stats(&self) -> FlowStatsMap {
        self.flows.clone()
    }
}

#[derive(Clone)]
struct FixedFactory {
    flows: FlowStatsMap,
    per_second: u32,
    streams: Rc<RefCell<Vec<u64>>>,
}

impl FixedFactory {
    fn new(flows: FlowStatsMap) -> Self {
        Self {
            flows,
            per_second: 3,
            streams: Rc::default(),
        }
    }
}

impl NetworkFactory for FixedFactory {
    fn build(
        &self,
        config: &ScenarioConfig,
        _plan: &TrafficPlan,
    ) -> Result<Box<dyn NetworkModel>, SimError> {
        self.streams.borrow_mut().push(config.stream_index);
        Ok(Box::new(FixedNetwork {
            flows: self.flows.clone(),
            per_second: self.per_second,
        }))
    }
}

fn source_flows() -> FlowStatsMap {
    (1..=5)
        .map(|id| {
            (
                FlowId::new(id),
                FlowStats {
                    tx_packets: 12,
                    tx_bytes: 1200,
                    rx_packets: 10,
                    rx_bytes: 1000,
                    delay_sum: Duration::from_millis(50),
                },
            )
        })
        .collect()
}

fn short_params() -> ScenarioParams {
    ScenarioParams {
        total_time_secs: 10.0,
        ..Default::default()
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("adhoc-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn single_iteration_matches_per_run_average() {
    let factory = FixedFactory::new(source_flows());
    let mut runner =
        ExperimentRunner::with_factory(factory, short_params(), 2, OutputOptions::in_memory());

    let report = runner.run(1).unwrap();
    let run = report.iterations[0].run_stats;
    assert_eq!(run.rx_bytes, 1000);
    assert_eq!(run.delay_ms, 5);
    assert_eq!(run.rx_packets, 10);

    assert_eq!(report.final_report.rx_bytes, run.rx_bytes);
    assert_eq!(report.final_report.delay_ms, run.delay_ms);
    assert_eq!(report.final_report.throughput_kbps, run.throughput_kbps());
    assert_eq!(runner.phase(), RunnerPhase::Done);
}

#[test]
fn two_identical_iterations_sum_then_average() {
    let factory = FixedFactory::new(source_flows());
    let mut runner =
        ExperimentRunner::with_factory(factory, short_params(), 1, OutputOptions::in_memory());

    let first = runner.run_iteration().unwrap().run_stats;
    let second = runner.run_iteration().unwrap().run_stats;
    assert_eq!(first, second);
    assert_eq!(runner.aggregate().rx_bytes, 2 * first.rx_bytes);
    assert_eq!(runner.aggregate().delay_ms, 2 * first.delay_ms);

    let report = runner.finish().unwrap();
    assert_eq!(report.rx_bytes, first.rx_bytes);
    assert_eq!(report.tx_packets, first.tx_packets);
    assert_eq!(report.delay_ms, first.delay_ms);
    assert_eq!(report.iterations, 2);
}

#[test]
fn stream_index_advances_by_fixed_stride() {
    let factory = FixedFactory::new(source_flows());
    let streams = factory.streams.clone();
    let mut runner =
        ExperimentRunner::with_factory(factory, short_params(), 3, OutputOptions::in_memory());
    runner.run(3).unwrap();
    assert_eq!(*streams.borrow(), vec![0, 50, 100]);
    assert_eq!(runner.stream_index(), 150);
}

#[test]
fn unknown_protocol_aborts_before_any_output() {
    let dir = temp_dir("bad-protocol");
    let factory = FixedFactory::new(source_flows());
    let streams = factory.streams.clone();
    let output = OutputOptions {
        dir: dir.clone(),
        csv_basename: "out.csv".to_string(),
        ..Default::default()
    };
    let mut runner = ExperimentRunner::with_factory(factory, short_params(), 5, output);

    let err = runner.run(1).unwrap_err();
    assert!(matches!(err, SimError::Config(_)));
    assert_eq!(err.to_string(), "No such protocol: 5");
    assert!(streams.borrow().is_empty());
    assert!(!dir.join("1out.csv").exists());
    assert_eq!(runner.completed_iterations(), 0);
    assert_eq!(runner.phase(), RunnerPhase::Idle);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn csv_file_gets_one_row_per_simulated_second() {
    let dir = temp_dir("csv-rows");
    let factory = FixedFactory::new(source_flows());
    let output = OutputOptions {
        dir: dir.clone(),
        csv_basename: "out.csv".to_string(),
        ..Default::default()
    };
    let mut runner = ExperimentRunner::with_factory(factory, short_params(), 2, output);
    let report = runner.run_iteration().unwrap();
    assert_eq!(report.samples_written, 10);
    assert_eq!(report.csv_path.as_deref(), Some(dir.join("1out.csv").as_path()));

    let content = std::fs::read_to_string(dir.join("1out.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 11);
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines[1], "0,0,0,1,5,AODV,-5");
    // 3 datagrams of 72 bytes in the previous second.
    assert_eq!(lines[2], "1,1.728,3,1,5,AODV,-5");
    assert_eq!(lines[10], "9,1.728,3,1,5,AODV,-5");

    runner.run_iteration().unwrap();
    assert!(dir.join("2out.csv").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn zero_sources_is_rejected() {
    let params = ScenarioParams {
        source_count: 0,
        ..short_params()
    };
    let factory = FixedFactory::new(source_flows());
    let mut runner = ExperimentRunner::with_factory(factory, params, 2, OutputOptions::in_memory());
    let err = runner.run_iteration().unwrap_err();
    assert!(matches!(err, SimError::DegenerateConfiguration(_)));
    assert_eq!(runner.phase(), RunnerPhase::Idle);
    assert_eq!(runner.completed_iterations(), 0);
    assert_eq!(runner.stream_index(), 0);
}

#[test]
fn zero_area_and_unbounded_speed_still_complete() {
    let params = ScenarioParams {
        node_count: 8,
        area_bound: 0.0,
        total_time_secs: 3.0,
        ..Default::default()
    };
    let mut runner = ExperimentRunner::new(params, 2, OutputOptions::in_memory());
    let report = runner.run(1).unwrap();
    assert_eq!(report.iterations[0].samples_written, 3);
    assert!(report.final_report.rx_packets > 0);

    let mut params = short_params();
    params.node_count = 8;
    params.mobility.max_speed = f64::INFINITY;
    let mut runner = ExperimentRunner::new(params, 3, OutputOptions::in_memory());
    let report = runner.run(1).unwrap();
    assert_eq!(report.iterations[0].samples_written, 10);
}

#[test]
fn zero_iterations_is_rejected() {
    let factory = FixedFactory::new(source_flows());
    let mut runner =
        ExperimentRunner::with_factory(factory, short_params(), 2, OutputOptions::in_memory());
    assert!(matches!(runner.run(0), Err(SimError::ZeroIterations)));
    assert!(matches!(runner.finish(), Err(SimError::ZeroIterations)));
}

#[test]
fn nothing_received_degrades_to_zero() {
    let mut factory = FixedFactory::new(FlowStatsMap::new());
    factory.per_second = 0;
    let mut runner =
        ExperimentRunner::with_factory(factory, short_params(), 4, OutputOptions::in_memory());
    let report = runner.run(1).unwrap();
    assert_eq!(report.final_report.rx_bytes, 0);
    assert_eq!(report.final_report.throughput_kbps, 0.0);
    let samples = report.iterations[0].samples.as_ref().unwrap();
    assert!(samples.iter().all(|s| s.kilobits_per_sec == 0.0));
}

#[test]
fn synthetic_network_end_to_end() {
    let params = ScenarioParams {
        node_count: 15,
        total_time_secs: 6.0,
        trace_mobility: true,
        ..Default::default()
    };
    let dir = temp_dir("synthetic");
    let output = OutputOptions {
        dir: dir.clone(),
        csv_basename: "synthetic.csv".to_string(),
        write_csv: true,
        capture_samples: true,
    };
    let mut runner = ExperimentRunner::new(params, 2, output);
    let report = runner.run(2).unwrap();

    assert_eq!(report.iterations.len(), 2);
    for iteration in &report.iterations {
        assert_eq!(iteration.samples_written, 6);
        let samples = iteration.samples.as_ref().unwrap();
        let sampled: u64 = samples.iter().map(|s| s.packet_count).sum();
        assert!(sampled <= iteration.received_packets);
        assert!(dir.join(format!("{}.mob", iteration.trace_name)).exists());
    }
    assert_ne!(
        report.iterations[0].scenario.stream_index,
        report.iterations[1].scenario.stream_index
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["final_report"]["iterations"], 2);
    assert_eq!(json["iterations"][0]["scenario"]["protocol"], "OnDemandDistanceVector");
    std::fs::remove_dir_all(&dir).unwrap();
}
