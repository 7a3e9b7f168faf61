use serde::Serialize;

use crate::config::ScenarioConfig;
use crate::interface::{SECOND_US, secs_to_us};

/// Offered load of a scenario: which nodes send, where to, and how fast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficPlan {
    /// Mobile node indices acting as constant-rate sources.
    pub sources: Vec<u32>,
    /// Sink node indices. Every source sends to the first one.
    pub sinks: Vec<u32>,
    /// Application payload per datagram.
    pub packet_size: u32,
    /// UDP and IP header bytes added on the wire.
    pub header_overhead: u32,
    pub data_rate_bps: u64,
    /// Per-source cap on application bytes sent.
    pub max_bytes: u64,
    /// Sources start uniformly within `[0, start_window_us)`.
    pub start_window_us: u64,
    pub stop_time_us: u64,
}

impl TrafficPlan {
    pub const PACKET_SIZE: u32 = 72;
    pub const HEADER_OVERHEAD: u32 = 28;
    pub const DATA_RATE_BPS: u64 = 160_000;
    pub const MAX_PACKETS: u64 = 20_000;

    pub fn for_scenario(config: &ScenarioConfig) -> Self {
        let stop = secs_to_us(config.total_time_secs - 0.01);
        Self {
            sources: (0..config.source_count).collect(),
            sinks: (0..config.sink_count).collect(),
            packet_size: Self::PACKET_SIZE,
            header_overhead: Self::HEADER_OVERHEAD,
            data_rate_bps: Self::DATA_RATE_BPS,
            max_bytes: Self::MAX_PACKETS * u64::from(Self::PACKET_SIZE),
            start_window_us: SECOND_US,
            stop_time_us: stop,
        }
    }

    /// Size of one datagram as the flow monitor sees it.
    pub fn wire_size(&self) -> u32 {
        self.packet_size + self.header_overhead
    }

    /// Gap between consecutive datagrams of one source.
    pub fn packet_interval_us(&self) -> u64 {
        if self.data_rate_bps == 0 {
            return u64::MAX;
        }
        u64::from(self.packet_size) * 8 * SECOND_US / self.data_rate_bps
    }

    /// Rate label used in trace names, e.g. `160kbps`.
    pub fn rate_label(&self) -> String {
        format!("{}kbps", self.data_rate_bps / 1000)
    }
}
