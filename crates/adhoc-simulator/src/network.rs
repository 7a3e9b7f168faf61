//! Built-in stand-in for the topology, mobility, routing and traffic collaborators.
//!
//! This is not an implementation of any routing protocol. Each protocol is reduced
//! to a forwarding profile (how routes are learnt, how long discovery takes, how
//! lossy a hop is) over a random-waypoint topology, which is enough to feed the
//! sampler and the flow statistics with plausible, reproducible traffic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use adhoc_abstract::{
    CourseChange, FlowId, FlowStatsMap, NetworkModel, RoutingProtocol, SECOND_US, ScenarioConfig,
    SimContext, TrafficPlan, secs_to_us, us_to_secs,
};

use crate::error::SimError;

/// Builds the network collaborator for one run.
pub trait NetworkFactory {
    fn build(
        &self,
        config: &ScenarioConfig,
        plan: &TrafficPlan,
    ) -> Result<Box<dyn NetworkModel>, SimError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticNetworkFactory;

impl NetworkFactory for SyntheticNetworkFactory {
    fn build(
        &self,
        config: &ScenarioConfig,
        plan: &TrafficPlan,
    ) -> Result<Box<dyn NetworkModel>, SimError> {
        Ok(Box::new(AdhocNetwork::new(config, plan)))
    }
}

// Log-distance path loss, reference loss at 1m and exponent.
const REFERENCE_LOSS_DB: f64 = 46.6777;
const PATH_LOSS_EXPONENT: f64 = 3.0;
const DETECTION_THRESHOLD_DBM: f64 = -96.0;

/// Distance at which a transmission at `tx_power_dbm` falls below the detection threshold.
pub fn radio_range(tx_power_dbm: f64) -> f64 {
    let budget = tx_power_dbm - REFERENCE_LOSS_DB - DETECTION_THRESHOLD_DBM;
    10f64.powf(budget / (10.0 * PATH_LOSS_EXPONENT))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ForwardingProfile {
    /// Proactive protocols recompute every route on this period.
    route_refresh_us: Option<u64>,
    /// Fixed cost of an on-demand route discovery.
    discovery_delay_us: u64,
    /// Repair the route and resend instead of dropping on a broken hop.
    salvage: bool,
    per_hop_loss: f64,
}

impl ForwardingProfile {
    fn for_protocol(protocol: RoutingProtocol) -> Self {
        if protocol.is_proactive() {
            let refresh_secs = match protocol {
                RoutingProtocol::LinkState => 2,
                _ => 15,
            };
            return Self {
                route_refresh_us: Some(refresh_secs * SECOND_US),
                discovery_delay_us: 0,
                salvage: false,
                per_hop_loss: 0.005,
            };
        }
        let source_routed = protocol == RoutingProtocol::OnDemandSourceRouted;
        Self {
            route_refresh_us: None,
            discovery_delay_us: if source_routed { 30_000 } else { 20_000 },
            salvage: source_routed,
            per_hop_loss: 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Waypoint(u32),
    Send(u32),
    Arrival(u32),
    RouteRefresh,
}

impl Timer {
    const KIND_SHIFT: u32 = 56;

    fn encode(self) -> u64 {
        let (kind, value) = match self {
            Timer::Waypoint(node) => (1u64, u64::from(node)),
            Timer::Send(source) => (2, u64::from(source)),
            Timer::Arrival(packet) => (3, u64::from(packet)),
            Timer::RouteRefresh => (4, 0),
        };
        (kind << Self::KIND_SHIFT) | value
    }

    fn decode(token: u64) -> Option<Self> {
        let value = (token & ((1 << Self::KIND_SHIFT) - 1)) as u32;
        match token >> Self::KIND_SHIFT {
            1 => Some(Timer::Waypoint(value)),
            2 => Some(Timer::Send(value)),
            3 => Some(Timer::Arrival(value)),
            4 => Some(Timer::RouteRefresh),
            _ => None,
        }
    }
}

type Position = (f64, f64);

/// Straight-line movement from `from` to `to`, then a pause until `resume_us`.
#[derive(Debug, Clone, Copy)]
struct Leg {
    depart_us: u64,
    arrive_us: u64,
    resume_us: u64,
    from: Position,
    to: Position,
}

impl Leg {
    fn stationary(at: Position) -> Self {
        Self {
            depart_us: 0,
            arrive_us: 0,
            resume_us: u64::MAX,
            from: at,
            to: at,
        }
    }

    fn position(&self, now_us: u64) -> Position {
        if now_us >= self.arrive_us || self.arrive_us == self.depart_us {
            return self.to;
        }
        let frac = now_us.saturating_sub(self.depart_us) as f64
            / (self.arrive_us - self.depart_us) as f64;
        (
            self.from.0 + (self.to.0 - self.from.0) * frac,
            self.from.1 + (self.to.1 - self.from.1) * frac,
        )
    }

    fn velocity(&self) -> Position {
        if self.arrive_us <= self.depart_us {
            return (0.0, 0.0);
        }
        let secs = (self.arrive_us - self.depart_us) as f64 / SECOND_US as f64;
        ((self.to.0 - self.from.0) / secs, (self.to.1 - self.from.1) / secs)
    }
}

#[derive(Debug)]
struct Source {
    node: usize,
    flow: Option<FlowId>,
    bytes_sent: u64,
    route: Option<Vec<usize>>,
}

#[derive(Debug)]
struct InFlight {
    flow: FlowId,
    sent_us: u64,
}

/// Draw from `[lo, hi)`. Empty or unbounded ranges collapse to `lo`.
fn uniform(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if hi > lo && (hi - lo).is_finite() {
        rng.random_range(lo..hi)
    } else {
        lo
    }
}

fn distance(a: Position, b: Position) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Random-waypoint ad-hoc network with constant-rate sources sending to the first sink.
///
/// Node indices: sinks first (`0..sink_count`), then mobile nodes.
pub struct AdhocNetwork {
    rng: StdRng,
    plan: TrafficPlan,
    profile: ForwardingProfile,
    range_m: f64,
    area: f64,
    min_speed: f64,
    max_speed: f64,
    pause_us: u64,
    sink_count: usize,
    sink: Option<usize>,

    legs: Vec<Leg>,
    sources: Vec<Source>,
    in_flight: HashMap<u32, InFlight>,
    next_packet: u32,

    next_flow: u32,
    flows: FlowStatsMap,

    trace_mobility: bool,
    course_changes: Vec<CourseChange>,
}

impl AdhocNetwork {
    pub fn new(config: &ScenarioConfig, plan: &TrafficPlan) -> Self {
        let mut rng = StdRng::seed_from_u64(config.stream_index);
        let area = config.area_bound;
        let sink_count = config.sink_count as usize;
        let mobile_count = config.node_count as usize;

        let centre = (area / 2.0, area / 2.0);
        let mut legs = vec![Leg::stationary(centre); sink_count];
        for _ in 0..mobile_count {
            let at = (uniform(&mut rng, 0.0, area), uniform(&mut rng, 0.0, area));
            legs.push(Leg::stationary(at));
        }

        let sources = plan
            .sources
            .iter()
            .map(|&s| s as usize)
            .filter(|&s| s < mobile_count)
            .map(|s| Source {
                node: sink_count + s,
                flow: None,
                bytes_sent: 0,
                route: None,
            })
            .collect();
        let sink = plan
            .sinks
            .first()
            .map(|&s| s as usize)
            .filter(|&s| s < sink_count);

        Self {
            rng,
            plan: plan.clone(),
            profile: ForwardingProfile::for_protocol(config.protocol),
            range_m: radio_range(config.tx_power_dbm),
            area,
            min_speed: config.mobility.min_speed,
            max_speed: config.mobility.max_speed,
            pause_us: secs_to_us(config.mobility.pause),
            sink_count,
            sink,
            legs,
            sources,
            in_flight: HashMap::new(),
            next_packet: 0,
            next_flow: 1,
            flows: FlowStatsMap::new(),
            trace_mobility: config.trace_mobility,
            course_changes: Vec::new(),
        }
    }

    fn position(&self, node: usize, now_us: u64) -> Position {
        self.legs[node].position(now_us)
    }

    fn in_range(&self, a: usize, b: usize, now_us: u64) -> bool {
        distance(self.position(a, now_us), self.position(b, now_us)) <= self.range_m
    }

    /// Fewest-hop path over the topology at `now_us`.
    fn shortest_path(&self, from: usize, to: usize, now_us: u64) -> Option<Vec<usize>> {
        let positions: Vec<Position> = (0..self.legs.len())
            .map(|n| self.position(n, now_us))
            .collect();
        let mut parent = vec![usize::MAX; positions.len()];
        let mut queue = VecDeque::from([from]);
        parent[from] = from;
        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut path = vec![to];
                let mut cur = to;
                while cur != from {
                    cur = parent[cur];
                    path.push(cur);
                }
                path.reverse();
                return Some(path);
            }
            for next in 0..positions.len() {
                if parent[next] == usize::MAX
                    && distance(positions[node], positions[next]) <= self.range_m
                {
                    parent[next] = node;
                    queue.push_back(next);
                }
            }
        }
        None
    }

    fn path_intact(&self, path: &[usize], now_us: u64) -> bool {
        path.windows(2).all(|hop| self.in_range(hop[0], hop[1], now_us))
    }

    fn start_leg(&mut self, ctx: &mut dyn SimContext, node: usize) {
        let now = ctx.now();
        let from = self.position(node, now);
        let to = (
            uniform(&mut self.rng, 0.0, self.area),
            uniform(&mut self.rng, 0.0, self.area),
        );
        let speed = uniform(&mut self.rng, self.min_speed, self.max_speed);

        // A node with nowhere to go and no pause would re-arm every microsecond.
        let moves = speed > 0.0 && speed.is_finite() && (from != to || self.pause_us > 0);
        let leg = if moves {
            let arrive_us = now.saturating_add(secs_to_us(distance(from, to) / speed));
            Leg {
                depart_us: now,
                arrive_us,
                resume_us: arrive_us.saturating_add(self.pause_us),
                from,
                to,
            }
        } else {
            Leg::stationary(from)
        };
        self.legs[node] = leg;

        if self.trace_mobility {
            self.course_changes.push(CourseChange {
                time_us: now,
                node: node as u32,
                position: from,
                velocity: leg.velocity(),
            });
        }
        if leg.resume_us != u64::MAX {
            // A zero-length leg still has to advance time before the next one.
            let resume = leg.resume_us.max(now + 1);
            ctx.schedule_at(resume, Timer::Waypoint(node as u32).encode());
        }
    }

    fn refresh_routes(&mut self, now_us: u64) {
        for i in 0..self.sources.len() {
            let route = self
                .sink
                .and_then(|sink| self.shortest_path(self.sources[i].node, sink, now_us));
            self.sources[i].route = route;
        }
    }

    fn classify(&mut self, source: usize) -> FlowId {
        if let Some(flow) = self.sources[source].flow {
            return flow;
        }
        let flow = FlowId::new(self.next_flow);
        self.next_flow += 1;
        self.sources[source].flow = Some(flow);
        flow
    }

    /// Pick the route for one datagram and the extra delay spent finding it.
    fn route_for(&mut self, ctx: &mut dyn SimContext, source: usize) -> Option<(Vec<usize>, u64)> {
        let now = ctx.now();
        let sink = self.sink?;
        let cached = self.sources[source].route.clone();
        if let Some(path) = cached {
            if self.path_intact(&path, now) {
                return Some((path, 0));
            }
            if self.profile.route_refresh_us.is_some() {
                // Stale proactive route: lost until the next refresh.
                return None;
            }
            self.sources[source].route = None;
            if !self.profile.salvage {
                ctx.log(&format!("route break at source {source}, datagram dropped"));
                return None;
            }
        } else if self.profile.route_refresh_us.is_some() {
            return None;
        }

        let path = self.shortest_path(self.sources[source].node, sink, now)?;
        let delay = self.profile.discovery_delay_us + (path.len() as u64 - 1) * 2_000;
        self.sources[source].route = Some(path.clone());
        Some((path, delay))
    }

    fn send(&mut self, ctx: &mut dyn SimContext, source: usize) {
        let now = ctx.now();
        let payload = u64::from(self.plan.packet_size);
        if now >= self.plan.stop_time_us
            || self.sources[source].bytes_sent + payload > self.plan.max_bytes
        {
            return;
        }
        self.sources[source].bytes_sent += payload;

        let flow = self.classify(source);
        let wire = self.plan.wire_size();
        self.flows.entry(flow).or_default().record_tx(wire);

        if let Some((path, discovery_us)) = self.route_for(ctx, source) {
            let mut delay = discovery_us;
            let mut lost = false;
            for _ in 1..path.len() {
                if self.rng.random::<f64>() < self.profile.per_hop_loss {
                    lost = true;
                    break;
                }
                delay += self.rng.random_range(200..1_500);
            }
            if !lost {
                let id = self.next_packet;
                self.next_packet += 1;
                self.in_flight.insert(id, InFlight { flow, sent_us: now });
                ctx.schedule_at(now + delay, Timer::Arrival(id).encode());
            }
        }

        ctx.schedule_in(self.plan.packet_interval_us(), Timer::Send(source as u32).encode());
    }

    fn arrive(&mut self, ctx: &mut dyn SimContext, packet: u32) {
        let Some(pkt) = self.in_flight.remove(&packet) else {
            return;
        };
        let delay = Duration::from_micros(ctx.now() - pkt.sent_us);
        self.flows
            .entry(pkt.flow)
            .or_default()
            .record_rx(self.plan.wire_size(), delay);
        ctx.receive_packet(self.plan.packet_size);
    }
}

impl NetworkModel for AdhocNetwork {
    fn install(&mut self, ctx: &mut dyn SimContext) {
        ctx.log(&format!("{} nodes, radio range {:.1}m", self.legs.len(), self.range_m));
        for node in self.sink_count..self.legs.len() {
            self.start_leg(ctx, node);
        }
        for source in 0..self.sources.len() {
            let start = self.rng.random_range(0..self.plan.start_window_us.max(1));
            ctx.schedule_at(start, Timer::Send(source as u32).encode());
        }
        if let Some(period) = self.profile.route_refresh_us {
            self.refresh_routes(ctx.now());
            ctx.schedule_in(period, Timer::RouteRefresh.encode());
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SimContext, token: u64) {
        match Timer::decode(token) {
            Some(Timer::Waypoint(node)) => self.start_leg(ctx, node as usize),
            Some(Timer::Send(source)) => self.send(ctx, source as usize),
            Some(Timer::Arrival(packet)) => self.arrive(ctx, packet),
            Some(Timer::RouteRefresh) => {
                self.refresh_routes(ctx.now());
                if let Some(period) = self.profile.route_refresh_us {
                    ctx.schedule_in(period, Timer::RouteRefresh.encode());
                }
            }
            None => ctx.log(&format!("unknown timer token {token:#x}")),
        }
    }

    fn flow_stats(&self) -> FlowStatsMap {
        self.flows.clone()
    }

    fn course_changes(&self) -> &[CourseChange] {
        &self.course_changes
    }
}

/// Render course changes in the ns-3 ascii mobility layout.
pub fn format_course_changes(changes: &[CourseChange]) -> String {
    changes
        .iter()
        .map(|c| {
            format!(
                "now={}s node={} pos={:.3}:{:.3}:0 vel={:.3}:{:.3}:0\n",
                us_to_secs(c.time_us),
                c.node,
                c.position.0,
                c.position.1,
                c.velocity.0,
                c.velocity.1
            )
        })
        .collect()
}
