use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("No such protocol: {0}")]
    UnknownProtocol(u32),
}

/// Routing behaviour installed on every node of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingProtocol {
    LinkState,
    OnDemandDistanceVector,
    DistanceSequencedDistanceVector,
    OnDemandSourceRouted,
}

impl RoutingProtocol {
    /// Map the command-line selector (1=OLSR, 2=AODV, 3=DSDV, 4=DSR).
    pub fn from_selector(selector: u32) -> Result<Self, ConfigError> {
        match selector {
            1 => Ok(RoutingProtocol::LinkState),
            2 => Ok(RoutingProtocol::OnDemandDistanceVector),
            3 => Ok(RoutingProtocol::DistanceSequencedDistanceVector),
            4 => Ok(RoutingProtocol::OnDemandSourceRouted),
            other => Err(ConfigError::UnknownProtocol(other)),
        }
    }

    pub fn selector(&self) -> u32 {
        match self {
            RoutingProtocol::LinkState => 1,
            RoutingProtocol::OnDemandDistanceVector => 2,
            RoutingProtocol::DistanceSequencedDistanceVector => 3,
            RoutingProtocol::OnDemandSourceRouted => 4,
        }
    }

    /// Short name written into CSV rows and trace file names.
    pub fn name(&self) -> &'static str {
        match self {
            RoutingProtocol::LinkState => "OLSR",
            RoutingProtocol::OnDemandDistanceVector => "AODV",
            RoutingProtocol::DistanceSequencedDistanceVector => "DSDV",
            RoutingProtocol::OnDemandSourceRouted => "DSR",
        }
    }

    /// Proactive protocols keep every route up to date on a fixed period.
    pub fn is_proactive(&self) -> bool {
        matches!(
            self,
            RoutingProtocol::LinkState | RoutingProtocol::DistanceSequencedDistanceVector
        )
    }
}

impl fmt::Display for RoutingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobilityParams {
    /// Lower bound of the uniform waypoint speed, m/s.
    pub min_speed: f64,
    /// Upper bound of the uniform waypoint speed, m/s.
    pub max_speed: f64,
    /// Pause at each waypoint, seconds.
    pub pause: f64,
}

impl Default for MobilityParams {
    fn default() -> Self {
        Self {
            min_speed: 1.0,
            max_speed: 12.0,
            pause: 0.0,
        }
    }
}

/// Topology parameters shared by every iteration of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub node_count: u32,
    pub sink_count: u32,
    pub source_count: u32,
    pub tx_power_dbm: f64,
    /// Side of the square area nodes move in, metres.
    pub area_bound: f64,
    pub mobility: MobilityParams,
    pub total_time_secs: f64,
    pub trace_mobility: bool,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            node_count: 75,
            sink_count: 1,
            source_count: 5,
            tx_power_dbm: -5.0,
            area_bound: 100.0,
            mobility: MobilityParams::default(),
            total_time_secs: 150.0,
            trace_mobility: false,
        }
    }
}

/// Partial parameter set loaded from a scenario file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ScenarioOverride {
    pub node_count: Option<u32>,
    pub sink_count: Option<u32>,
    pub source_count: Option<u32>,
    pub tx_power_dbm: Option<f64>,
    pub area_bound: Option<f64>,
    pub min_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub pause: Option<f64>,
    pub total_time_secs: Option<f64>,
}

impl ScenarioOverride {
    pub fn apply_to(&self, params: &mut ScenarioParams) {
        if let Some(v) = self.node_count {
            params.node_count = v;
        }
        if let Some(v) = self.sink_count {
            params.sink_count = v;
        }
        if let Some(v) = self.source_count {
            params.source_count = v;
        }
        if let Some(v) = self.tx_power_dbm {
            params.tx_power_dbm = v;
        }
        if let Some(v) = self.area_bound {
            params.area_bound = v;
        }
        if let Some(v) = self.min_speed {
            params.mobility.min_speed = v;
        }
        if let Some(v) = self.max_speed {
            params.mobility.max_speed = v;
        }
        if let Some(v) = self.pause {
            params.mobility.pause = v;
        }
        if let Some(v) = self.total_time_secs {
            params.total_time_secs = v;
        }
    }
}

/// Fully specified configuration of one run. Built once per iteration and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioConfig {
    pub protocol: RoutingProtocol,
    pub node_count: u32,
    pub sink_count: u32,
    pub source_count: u32,
    pub tx_power_dbm: f64,
    pub area_bound: f64,
    pub mobility: MobilityParams,
    pub stream_index: u64,
    pub total_time_secs: f64,
    pub trace_mobility: bool,
}

impl ScenarioConfig {
    /// Only the protocol selector is validated; every other parameter is passed through as given.
    pub fn build(
        protocol_selector: u32,
        params: &ScenarioParams,
        stream_index: u64,
    ) -> Result<Self, ConfigError> {
        let protocol = RoutingProtocol::from_selector(protocol_selector)?;
        Ok(Self {
            protocol,
            node_count: params.node_count,
            sink_count: params.sink_count,
            source_count: params.source_count,
            tx_power_dbm: params.tx_power_dbm,
            area_bound: params.area_bound,
            mobility: params.mobility.clone(),
            stream_index,
            total_time_secs: params.total_time_secs,
            trace_mobility: params.trace_mobility,
        })
    }

    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    /// Base name for per-iteration trace artifacts, e.g.
    /// `adhoc-rt-cmpr_AODV_75nodes_0iteration_0pause_160kbpsrate_100grid`.
    pub fn trace_name(&self, iteration: usize, rate: &str) -> String {
        format!(
            "adhoc-rt-cmpr_{}_{}nodes_{}iteration_{}pause_{}rate_{}grid",
            self.protocol.name(),
            self.node_count,
            iteration,
            self.mobility.pause,
            rate,
            self.area_bound
        )
    }
}
