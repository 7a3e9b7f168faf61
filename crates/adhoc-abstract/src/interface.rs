use serde::Serialize;

use crate::flow::FlowStatsMap;

/// Simulated time is kept in microseconds.
pub const SECOND_US: u64 = 1_000_000;

pub fn secs_to_us(secs: f64) -> u64 {
    (secs.max(0.0) * SECOND_US as f64).round() as u64
}

pub fn us_to_secs(us: u64) -> f64 {
    us as f64 / SECOND_US as f64
}

/// Kernel primitives available to a network model during a callback.
pub trait SimContext {
    /// Current simulated time in microseconds.
    fn now(&self) -> u64;

    /// Ask for `on_timer(token)` at absolute time `time_us`.
    /// Times in the past fire at the current instant.
    fn schedule_at(&mut self, time_us: u64, token: u64);

    fn schedule_in(&mut self, delay_us: u64, token: u64) {
        let at = self.now().saturating_add(delay_us);
        self.schedule_at(at, token);
    }

    /// Packet-receive notification, once per datagram delivered to a sink socket.
    fn receive_packet(&mut self, bytes: u32);

    /// Log a message to the simulator's debug output.
    fn log(&mut self, message: &str);
}

/// A node changed heading or speed. Recorded only when mobility tracing is on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseChange {
    pub time_us: u64,
    pub node: u32,
    pub position: (f64, f64),
    pub velocity: (f64, f64),
}

/// Topology, mobility, routing and traffic of one run, seen as a black box that
/// produces timers and receive notifications.
pub trait NetworkModel {
    /// Called once when the run starts, before any time advances.
    fn install(&mut self, ctx: &mut dyn SimContext);

    /// Called when a timer requested through `SimContext` fires.
    fn on_timer(&mut self, ctx: &mut dyn SimContext, token: u64);

    /// Per-flow statistics, queried once the run has stopped.
    fn flow_stats(&self) -> FlowStatsMap;

    fn course_changes(&self) -> &[CourseChange] {
        &[]
    }
}
