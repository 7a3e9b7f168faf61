use serde::Serialize;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use adhoc_abstract::{SECOND_US, ScenarioConfig, us_to_secs};
use tracing::debug;

use crate::engine::ReceiveCounters;
use crate::error::SimError;

/// Column header of every throughput file. Rows carry one more column (the source
/// count) than the header names; readers rely on that layout.
pub const CSV_HEADER: &str =
    "SimulationSecond,ReceiveRate,PacketsReceived,NumberOfSinks,RoutingProtocol,TransmissionPower";

/// One sampler tick. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputSample {
    pub timestamp_secs: f64,
    pub kilobits_per_sec: f64,
    pub packet_count: u64,
    pub sink_count: u32,
    pub source_count: u32,
    pub protocol_name: String,
    pub tx_power_dbm: f64,
}

impl ThroughputSample {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.timestamp_secs,
            self.kilobits_per_sec,
            self.packet_count,
            self.sink_count,
            self.source_count,
            self.protocol_name,
            self.tx_power_dbm
        )
    }
}

/// Append-only destination for throughput samples.
pub trait SampleSink {
    fn append(&mut self, sample: &ThroughputSample) -> Result<(), SimError>;
}

/// Truncate `path` and write the column header.
pub fn write_header(path: &Path) -> Result<(), SimError> {
    let mut file = File::create(path).map_err(|e| SimError::io(path, e))?;
    writeln!(file, "{CSV_HEADER}").map_err(|e| SimError::io(path, e))
}

/// Per-iteration CSV file named `<iteration><basename>`.
pub struct CsvSampleSink {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl CsvSampleSink {
    pub fn path_for(dir: &Path, iteration: usize, basename: &str) -> PathBuf {
        dir.join(format!("{iteration}{basename}"))
    }

    /// Start a fresh file for `iteration`: truncate it, write the header, keep it open
    /// for appends.
    pub fn create(dir: &Path, iteration: usize, basename: &str) -> Result<Self, SimError> {
        let path = Self::path_for(dir, iteration, basename);
        write_header(&path)?;
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| SimError::io(&path, e))?;
        Ok(Self {
            path,
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for CsvSampleSink {
    fn append(&mut self, sample: &ThroughputSample) -> Result<(), SimError> {
        writeln!(self.writer, "{}", sample.to_csv_row()).map_err(|e| SimError::io(&self.path, e))
    }
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySampleSink {
    samples: Rc<RefCell<Vec<ThroughputSample>>>,
}

impl MemorySampleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<ThroughputSample> {
        self.samples.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.samples.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.borrow().is_empty()
    }
}

impl SampleSink for MemorySampleSink {
    fn append(&mut self, sample: &ThroughputSample) -> Result<(), SimError> {
        self.samples.borrow_mut().push(sample.clone());
        Ok(())
    }
}

/// Fan a sample out to several sinks in order.
impl SampleSink for Vec<Box<dyn SampleSink>> {
    fn append(&mut self, sample: &ThroughputSample) -> Result<(), SimError> {
        for sink in self.iter_mut() {
            sink.append(sample)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Armed { next_tick_us: u64 },
    Stopped,
}

/// Labels copied into every row.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLabels {
    pub sink_count: u32,
    pub source_count: u32,
    pub protocol_name: String,
    pub tx_power_dbm: f64,
}

impl SampleLabels {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            sink_count: config.sink_count,
            source_count: config.source_count,
            protocol_name: config.protocol_name().to_string(),
            tx_power_dbm: config.tx_power_dbm,
        }
    }
}

/// Periodic task that turns the receive window into one row per simulated second.
///
/// The sampler is owned by the simulator of a single run. It is never cancelled
/// explicitly: the run stops dispatching at its stop time and the pending tick is
/// dropped together with the event queue.
pub struct ThroughputSampler {
    state: SamplerState,
    interval_us: u64,
    labels: SampleLabels,
    sink: Box<dyn SampleSink>,
    rows_written: u64,
}

impl ThroughputSampler {
    pub fn new(labels: SampleLabels, sink: Box<dyn SampleSink>) -> Self {
        Self {
            state: SamplerState::Stopped,
            interval_us: SECOND_US,
            labels,
            sink,
            rows_written: 0,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub(crate) fn arm(&mut self, at_us: u64) {
        self.state = SamplerState::Armed { next_tick_us: at_us };
    }

    pub(crate) fn stop(&mut self) {
        self.state = SamplerState::Stopped;
    }

    /// Read then reset the receive window, append a row, and re-arm one interval later.
    /// Returns the time of the next tick, or `None` if the sampler was stopped.
    pub(crate) fn tick(
        &mut self,
        now_us: u64,
        counters: &mut ReceiveCounters,
    ) -> Result<Option<u64>, SimError> {
        if self.state == SamplerState::Stopped {
            return Ok(None);
        }

        let (bytes, packets) = counters.take_window();
        let sample = ThroughputSample {
            timestamp_secs: us_to_secs(now_us),
            kilobits_per_sec: bytes as f64 * 8.0 / 1000.0,
            packet_count: packets,
            sink_count: self.labels.sink_count,
            source_count: self.labels.source_count,
            protocol_name: self.labels.protocol_name.clone(),
            tx_power_dbm: self.labels.tx_power_dbm,
        };
        debug!(
            "Throughput sample at {}s: {} kbps, {} packets",
            sample.timestamp_secs, sample.kilobits_per_sec, sample.packet_count
        );
        self.sink.append(&sample)?;
        self.rows_written += 1;

        let next = now_us + self.interval_us;
        self.arm(next);
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> SampleLabels {
        SampleLabels {
            sink_count: 1,
            source_count: 5,
            protocol_name: "AODV".to_string(),
            tx_power_dbm: -5.0,
        }
    }

    #[test]
    fn row_layout() {
        let sample = ThroughputSample {
            timestamp_secs: 12.0,
            kilobits_per_sec: 11.52,
            packet_count: 20,
            sink_count: 1,
            source_count: 5,
            protocol_name: "AODV".to_string(),
            tx_power_dbm: -5.0,
        };
        assert_eq!(sample.to_csv_row(), "12,11.52,20,1,5,AODV,-5");
    }

    #[test]
    fn tick_reads_then_resets_window() {
        let memory = MemorySampleSink::new();
        let mut sampler = ThroughputSampler::new(labels(), Box::new(memory.clone()));
        let mut counters = ReceiveCounters::default();
        sampler.arm(0);

        counters.on_receive(72);
        counters.on_receive(72);
        let next = sampler.tick(SECOND_US, &mut counters).unwrap();
        assert_eq!(next, Some(2 * SECOND_US));
        assert_eq!(counters.window_bytes(), 0);
        assert_eq!(counters.window_packets(), 0);
        assert_eq!(counters.total_bytes(), 144);

        let rows = memory.samples();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp_secs, 1.0);
        assert_eq!(rows[0].kilobits_per_sec, 144.0 * 8.0 / 1000.0);
        assert_eq!(rows[0].packet_count, 2);
    }

    #[test]
    fn stopped_sampler_does_not_write() {
        let memory = MemorySampleSink::new();
        let mut sampler = ThroughputSampler::new(labels(), Box::new(memory.clone()));
        let mut counters = ReceiveCounters::default();
        counters.on_receive(100);
        assert_eq!(sampler.tick(0, &mut counters).unwrap(), None);
        assert!(memory.is_empty());
        assert_eq!(counters.window_bytes(), 100);
    }

    #[test]
    fn csv_sink_writes_header_then_rows() {
        let dir = std::env::temp_dir().join(format!("adhoc-sampler-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut sink = CsvSampleSink::create(&dir, 3, "out.csv").unwrap();
        assert!(sink.path().ends_with("3out.csv"));
        let sample = ThroughputSample {
            timestamp_secs: 0.0,
            kilobits_per_sec: 0.0,
            packet_count: 0,
            sink_count: 1,
            source_count: 5,
            protocol_name: "OLSR".to_string(),
            tx_power_dbm: -5.0,
        };
        sink.append(&sample).unwrap();
        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content, format!("{CSV_HEADER}\n0,0,0,1,5,OLSR,-5\n"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
