use std::cmp::Ordering;
use std::collections::BinaryHeap;

use adhoc_abstract::{FlowStatsMap, NetworkModel, SimContext};
use tracing::{debug, info};

use crate::error::SimError;
use crate::sampler::{SamplerState, ThroughputSampler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    NetworkTimer { token: u64 },
    SamplerTick,
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // Unique ID to keep FIFO order among events at the same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Received-traffic counters shared by the packet-receive path (increments) and the
/// sampler (read then reset). Both run on the single-threaded event loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveCounters {
    window_bytes: u64,
    window_packets: u64,
    total_bytes: u64,
    total_packets: u64,
}

impl ReceiveCounters {
    pub fn on_receive(&mut self, bytes: u32) {
        self.window_bytes += u64::from(bytes);
        self.window_packets += 1;
        self.total_bytes += u64::from(bytes);
        self.total_packets += 1;
    }

    /// Return the current window and start a new one.
    pub fn take_window(&mut self) -> (u64, u64) {
        let window = (self.window_bytes, self.window_packets);
        self.window_bytes = 0;
        self.window_packets = 0;
        window
    }

    pub fn window_bytes(&self) -> u64 {
        self.window_bytes
    }

    pub fn window_packets(&self) -> u64 {
        self.window_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }
}

/// Actions buffered during a network model callback
#[derive(Default)]
struct ActionBuffer {
    timers: Vec<(u64, u64)>, // (time, token)
    received: Vec<u32>,
    logs: Vec<String>,
}

/// Context implementation passed to the network model
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl<'a> SimContext for ScopedContext<'a> {
    fn now(&self) -> u64 {
        self.now
    }

    fn schedule_at(&mut self, time_us: u64, token: u64) {
        self.buffer.timers.push((time_us.max(self.now), token));
    }

    fn receive_packet(&mut self, bytes: u32) {
        self.buffer.received.push(bytes);
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }
}

/// Discrete-event kernel for a single run.
///
/// A simulator is built per iteration and consumed by the run; nothing scheduled
/// in one run can fire in another.
pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    started: bool,

    network: Box<dyn NetworkModel>,
    sampler: Option<ThroughputSampler>,
    counters: ReceiveCounters,
}

impl Simulator {
    pub fn new(network: Box<dyn NetworkModel>) -> Self {
        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            started: false,
            network,
            sampler: None,
            counters: ReceiveCounters::default(),
        }
    }

    pub fn with_sampler(mut self, sampler: ThroughputSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    pub fn counters(&self) -> &ReceiveCounters {
        &self.counters
    }

    pub fn sampler(&self) -> Option<&ThroughputSampler> {
        self.sampler.as_ref()
    }

    pub fn network(&self) -> &dyn NetworkModel {
        self.network.as_ref()
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Schedule a network callback at an absolute time.
    pub fn schedule_at(&mut self, time_us: u64, token: u64) {
        let time = time_us.max(self.time);
        self.push_event(time, EventType::NetworkTimer { token });
    }

    /// Install the network and arm the sampler for an immediate first tick.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        let mut buffer = ActionBuffer::default();
        {
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now: self.time,
            };
            self.network.install(&mut ctx);
        }
        self.process_actions(buffer);

        if let Some(sampler) = self.sampler.as_mut() {
            sampler.arm(self.time);
            let now = self.time;
            self.push_event(now, EventType::SamplerTick);
        }
    }

    /// Process the next event. Returns false if the queue is empty.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return Ok(false),
        };

        self.time = event.time;
        debug!("Processing event at {}us: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::NetworkTimer { token } => {
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.network.on_timer(&mut ctx, token);
                }
                self.process_actions(buffer);
            }
            EventType::SamplerTick => {
                let next = match self.sampler.as_mut() {
                    Some(sampler) => sampler.tick(self.time, &mut self.counters)?,
                    None => None,
                };
                if let Some(next) = next {
                    self.push_event(next, EventType::SamplerTick);
                }
            }
        }
        Ok(true)
    }

    /// Dispatch every event due strictly before `stop_us`, then stop the run.
    /// Events still pending at the stop time are dropped.
    pub fn run_until(&mut self, stop_us: u64) -> Result<(), SimError> {
        self.start();
        while let Some(next) = self.peek_next_event_time() {
            if next >= stop_us {
                break;
            }
            self.step()?;
        }
        self.time = self.time.max(stop_us);

        let dropped = self.event_queue.len();
        self.event_queue.clear();
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.stop();
        }
        info!(
            "Run stopped at {}us ({} pending events dropped, {} packets received)",
            self.time, dropped, self.counters.total_packets
        );
        Ok(())
    }

    pub fn sampler_state(&self) -> Option<SamplerState> {
        self.sampler.as_ref().map(|s| s.state())
    }

    /// Flow statistics query, valid once the run has stopped.
    pub fn flow_stats(&self) -> FlowStatsMap {
        self.network.flow_stats()
    }

    fn process_actions(&mut self, buffer: ActionBuffer) {
        for log in buffer.logs {
            debug!("[network] {}", log);
        }

        for bytes in buffer.received {
            self.counters.on_receive(bytes);
        }

        for (time, token) in buffer.timers {
            self.push_event(time, EventType::NetworkTimer { token });
        }
    }
}
