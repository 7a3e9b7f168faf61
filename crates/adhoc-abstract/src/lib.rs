pub mod config;
pub mod flow;
pub mod interface;
pub mod traffic;

pub use config::{
    ConfigError, MobilityParams, RoutingProtocol, ScenarioConfig, ScenarioOverride, ScenarioParams,
};
pub use flow::{FlowId, FlowStats, FlowStatsMap};
pub use interface::{CourseChange, NetworkModel, SECOND_US, SimContext, secs_to_us, us_to_secs};
pub use traffic::TrafficPlan;
