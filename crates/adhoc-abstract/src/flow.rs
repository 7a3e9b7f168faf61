use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Classifier-assigned flow identifier. Ids start at 1 in order of first transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(pub u32);

impl FlowId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// End-of-run counters the flow monitor keeps for a single flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Sum of end-to-end delays of every received packet.
    pub delay_sum: Duration,
}

impl FlowStats {
    pub fn record_tx(&mut self, bytes: u32) {
        self.tx_packets += 1;
        self.tx_bytes += u64::from(bytes);
    }

    pub fn record_rx(&mut self, bytes: u32, delay: Duration) {
        self.rx_packets += 1;
        self.rx_bytes += u64::from(bytes);
        self.delay_sum += delay;
    }
}

pub type FlowStatsMap = BTreeMap<FlowId, FlowStats>;
