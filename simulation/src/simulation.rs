//! Simulation driver
//!
//! The [`Simulation`] owns the event clock, the seeded generator, the
//! resolved topology, the channel bus and every node. Driver calls either
//! configure the run (topology, noise, boot, channels) or inject a
//! [`Command`] event at the current virtual time; nothing happens between
//! calls until [`Simulation::advance_time`] dispatches due events.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use motesim_core::{
    Channel, Command, EventClock, NodeId, RoutingError, SessionKey, SimError, SimResult, SimTime,
    TopologyError, TransportError,
};
use motesim_routing::{NeighborEntry, RouteEntry};
use motesim_transport::SessionState;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, debug_span, info, warn};

use crate::bus::{ChannelBus, DropReason};
use crate::config::SimConfig;
use crate::node::{InboxEntry, Node, NodeContext, SimEvent};
use crate::topology::{NoiseSpec, Topology, TopologySpec};
use crate::trace::{EventLog, SimStats, TraceEvent, TraceRecord};

/// A deterministic run over one topology
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    clock: EventClock<SimEvent>,
    rng: ChaCha8Rng,
    topology_spec: Option<TopologySpec>,
    noise: Option<NoiseSpec>,
    topology: Topology,
    bus: ChannelBus,
    nodes: BTreeMap<NodeId, Node>,
    log: EventLog,
    /// Set on the first boot; topology and noise are frozen from then on
    started: bool,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        info!(seed = config.seed, "Simulation created");
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            log: EventLog::new(config.trace),
            config,
            clock: EventClock::new(),
            topology_spec: None,
            noise: None,
            topology: Topology::default(),
            bus: ChannelBus::new(),
            nodes: BTreeMap::new(),
            started: false,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    // ---- setup ----

    /// Load the topology; allowed once, before any node boots
    pub fn load_topology(&mut self, spec: TopologySpec) -> SimResult<()> {
        if self.topology_spec.is_some() || self.started {
            return Err(SimError::AlreadyInitialized { what: "topology" });
        }
        self.topology = Topology::resolve(&spec, self.noise.as_ref())?;
        self.nodes = self
            .topology
            .node_ids()
            .into_iter()
            .map(|id| (id, Node::new(id, self.topology.position(id), &self.config)))
            .collect();
        self.topology_spec = Some(spec);
        info!(
            nodes = self.topology.node_count(),
            links = self.topology.link_count(),
            "Topology loaded"
        );
        Ok(())
    }

    pub fn load_topology_file(&mut self, path: impl AsRef<Path>) -> SimResult<()> {
        let spec = TopologySpec::from_file(path)?;
        self.load_topology(spec)
    }

    /// Load the noise model; allowed once, before any node boots
    ///
    /// An already loaded topology is re-resolved against the new floor.
    pub fn load_noise(&mut self, noise: NoiseSpec) -> SimResult<()> {
        if self.noise.is_some() || self.started {
            return Err(SimError::AlreadyInitialized { what: "noise model" });
        }
        let floor = noise.floor();
        if !floor.is_finite() {
            return Err(TopologyError::NonFiniteNoise { reading: floor }.into());
        }
        if let Some(spec) = &self.topology_spec {
            self.topology = Topology::resolve(spec, Some(&noise))?;
        }
        info!(floor = noise.floor(), factor = noise.factor(), "Noise model loaded");
        self.noise = Some(noise);
        Ok(())
    }

    pub fn load_noise_file(&mut self, path: impl AsRef<Path>) -> SimResult<()> {
        let noise = NoiseSpec::from_file(path)?;
        self.load_noise(noise)
    }

    /// Boot every node in id order; booted nodes are left alone
    pub fn boot_all(&mut self) -> SimResult<()> {
        for id in self.node_ids() {
            self.boot_node(id)?;
        }
        Ok(())
    }

    /// Boot one node and subscribe it to every enabled channel
    pub fn boot_node(&mut self, id: NodeId) -> SimResult<()> {
        let Self {
            clock,
            rng,
            topology,
            bus,
            nodes,
            log,
            started,
            ..
        } = self;
        let node = nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))?;
        if node.is_booted() {
            return Ok(());
        }
        *started = true;
        let channels: Vec<Channel> = bus.enabled_channels().collect();
        for channel in channels {
            bus.subscribe(id, channel);
        }
        log.record(clock.now(), TraceEvent::Boot { node: id });
        let mut ctx = NodeContext::new(id, clock, rng, topology, bus, log);
        node.boot(&mut ctx);
        Ok(())
    }

    /// Turn a node off: timers cancelled, sessions closed, tables and
    /// subscriptions dropped
    ///
    /// Delivered pings and transport data stay queryable.
    pub fn power_off(&mut self, id: NodeId) -> SimResult<()> {
        let Self {
            clock,
            rng,
            topology,
            bus,
            nodes,
            log,
            ..
        } = self;
        let node = nodes.get_mut(&id).ok_or(SimError::UnknownNode(id))?;
        if !node.is_booted() {
            return Err(SimError::NotBooted(id));
        }
        bus.unsubscribe_all(id);
        log.record(clock.now(), TraceEvent::PowerOff { node: id });
        let mut ctx = NodeContext::new(id, clock, rng, topology, bus, log);
        node.power_off(&mut ctx);
        Ok(())
    }

    /// Enable a channel and subscribe every booted node to it
    pub fn add_channel(&mut self, channel: Channel) {
        if self.bus.enable(channel) {
            self.log
                .record(self.clock.now(), TraceEvent::ChannelEnabled { channel });
            debug!(channel = %channel, "Channel enabled");
        }
        for node in self.nodes.values().filter(|n| n.is_booted()) {
            self.bus.subscribe(node.id(), channel);
        }
    }

    pub fn subscribe(&mut self, id: NodeId, channel: Channel) -> SimResult<()> {
        self.booted(id)?;
        self.bus.subscribe(id, channel);
        Ok(())
    }

    // ---- time ----

    /// Dispatch every event due within `duration`, then move the clock
    ///
    /// Returns the number of events dispatched.
    pub fn advance_time(&mut self, duration: Duration) -> SimResult<u64> {
        let Self {
            clock,
            rng,
            topology,
            bus,
            nodes,
            log,
            ..
        } = self;
        let fired = clock.advance(duration, |clock, _id, event| {
            dispatch(clock, rng, topology, bus, nodes, log, event)
        })?;
        motesim_logging::set_virtual_now(self.clock.now());
        debug!(now = %self.clock.now(), fired, "Time advanced");
        Ok(fired)
    }

    /// Run for whole seconds of virtual time
    pub fn run_time(&mut self, secs: u64) -> SimResult<u64> {
        self.advance_time(Duration::from_secs(secs))
    }

    /// Run until an absolute time, which must not be in the past
    pub fn advance_until(&mut self, target: SimTime) -> SimResult<u64> {
        let now = self.clock.now();
        if target < now {
            return Err(motesim_core::ClockError::InvalidTime { requested: target, now }.into());
        }
        self.advance_time(target.saturating_duration_since(now))
    }

    // ---- commands ----

    pub fn ping(&mut self, src: NodeId, dst: NodeId, payload: impl Into<Vec<u8>>) -> SimResult<()> {
        self.known(dst)?;
        self.inject(
            src,
            Command::Ping {
                destination: dst,
                payload: payload.into(),
            },
        )
    }

    pub fn initiate_tcp(&mut self, src: NodeId, dst: NodeId) -> SimResult<()> {
        self.known(dst)?;
        self.inject(src, Command::InitiateTcp { destination: dst })
    }

    /// Tear down the session `src` initiated toward `dst`
    ///
    /// Killing a session that is not active is a no-op once dispatched.
    pub fn kill_tcp(&mut self, src: NodeId, dst: NodeId) -> SimResult<()> {
        self.known(dst)?;
        self.inject(src, Command::KillTcp { destination: dst })
    }

    /// Queue bytes on the session `src` shares with `dst`
    pub fn tcp_send(&mut self, src: NodeId, dst: NodeId, payload: impl Into<Vec<u8>>) -> SimResult<()> {
        self.known(dst)?;
        self.inject(
            src,
            Command::TcpSend {
                destination: dst,
                payload: payload.into(),
            },
        )
    }

    fn inject(&mut self, node: NodeId, command: Command) -> SimResult<()> {
        self.booted(node)?;
        debug!(node = %node, command = command.kind(), "Command injected");
        self.clock
            .schedule_after(Duration::ZERO, SimEvent::Command { node, command });
        Ok(())
    }

    // ---- queries ----

    /// Payloads `dst` has received in order from `src` over any session they share
    pub fn tcp_received(&self, src: NodeId, dst: NodeId) -> SimResult<Vec<Vec<u8>>> {
        self.known(src)?;
        let transport = self.known(dst)?.transport();
        Ok([SessionKey::new(src, dst), SessionKey::new(dst, src)]
            .into_iter()
            .flat_map(|key| transport.delivered(key).iter().cloned())
            .collect())
    }

    /// State of session `(src, dst)` as seen by `node`
    pub fn session_state(&self, node: NodeId, src: NodeId, dst: NodeId) -> SimResult<SessionState> {
        Ok(self.known(node)?.transport().state(SessionKey::new(src, dst)))
    }

    /// Take every session failure raised since the last call, in node order
    pub fn drain_session_failures(&mut self) -> Vec<(NodeId, TransportError)> {
        let mut failures = Vec::new();
        for (id, node) in &mut self.nodes {
            for failure in node.take_session_failures() {
                warn!(node = %id, error = %failure, "Session failure surfaced");
                failures.push((*id, failure));
            }
        }
        failures
    }

    pub fn neighbor_discovery_dump(&self, id: NodeId) -> SimResult<Vec<NeighborEntry>> {
        let entries = self.known(id)?.neighbor_dump();
        info!(node = %id, count = entries.len(), "Neighbor dump");
        for entry in &entries {
            info!(
                node = %id,
                neighbor = %entry.neighbor,
                quality = entry.quality,
                last_seen = %entry.last_seen,
                "  neighbor"
            );
        }
        Ok(entries)
    }

    /// Next hop from `node` toward `destination`
    pub fn route(&self, node: NodeId, destination: NodeId) -> SimResult<NodeId> {
        Ok(self.known(node)?.route(destination)?)
    }

    /// Follow next hops from `src` to `dst`, both ends included
    pub fn route_path(&self, src: NodeId, dst: NodeId) -> SimResult<Vec<NodeId>> {
        self.known(dst)?;
        let mut path = vec![src];
        let mut current = src;
        while current != dst {
            if path.len() > usize::from(self.config.max_hops) {
                return Err(RoutingError::NoRoute { from: src, to: dst }.into());
            }
            let next = self.route(current, dst)?;
            if path.contains(&next) {
                debug!(src = %src, dst = %dst, at = %next, "Routing loop");
                return Err(RoutingError::NoRoute { from: src, to: dst }.into());
            }
            path.push(next);
            current = next;
        }
        Ok(path)
    }

    pub fn routing_table_dump(&self, id: NodeId) -> SimResult<Vec<RouteEntry>> {
        Ok(self.known(id)?.routing_table())
    }

    pub fn inbox(&self, id: NodeId) -> SimResult<&[InboxEntry]> {
        Ok(self.known(id)?.inbox())
    }

    pub fn trace(&self) -> &[TraceRecord] {
        self.log.records()
    }

    pub fn trace_json(&self) -> Result<String, serde_json::Error> {
        self.log.to_json_lines()
    }

    pub fn stats(&self) -> &SimStats {
        self.log.stats()
    }

    fn known(&self, id: NodeId) -> SimResult<&Node> {
        self.nodes.get(&id).ok_or(SimError::UnknownNode(id))
    }

    fn booted(&self, id: NodeId) -> SimResult<&Node> {
        let node = self.known(id)?;
        if !node.is_booted() {
            return Err(SimError::NotBooted(id));
        }
        Ok(node)
    }
}

/// Hand one due event to its node
fn dispatch(
    clock: &mut EventClock<SimEvent>,
    rng: &mut ChaCha8Rng,
    topology: &Topology,
    bus: &ChannelBus,
    nodes: &mut BTreeMap<NodeId, Node>,
    log: &mut EventLog,
    event: SimEvent,
) -> SimResult<()> {
    let now = clock.now();
    motesim_logging::set_virtual_now(now);
    log.count_dispatch();

    let target = event.target();
    let node = nodes
        .get_mut(&target)
        .ok_or_else(|| SimError::InvariantViolation(format!("event for unknown node {target}")))?;

    match &event {
        SimEvent::Arrival { to, frame } => {
            if !node.is_booted() || !bus.is_subscribed(*to, frame.channel) {
                log.record(
                    now,
                    TraceEvent::Drop {
                        from: frame.from,
                        to: *to,
                        channel: frame.channel,
                        message: frame.message.kind(),
                        reason: DropReason::ReceiverDown,
                    },
                );
                return Ok(());
            }
            log.record(
                now,
                TraceEvent::Arrival {
                    to: *to,
                    from: frame.from,
                    channel: frame.channel,
                    message: frame.message.kind(),
                },
            );
        }
        SimEvent::Timer { node: id, timer } => {
            if !node.is_booted() {
                return Err(SimError::InvariantViolation(format!(
                    "timer {timer:?} fired on powered-off node {id}"
                )));
            }
            log.record(now, TraceEvent::Timer { node: *id, timer: *timer });
        }
        SimEvent::Command { node: id, command } => {
            if !node.is_booted() {
                debug!(node = %id, command = command.kind(), "Command for powered-off node discarded");
                return Ok(());
            }
            log.record(
                now,
                TraceEvent::Command {
                    node: *id,
                    channel: Channel::Command,
                    command: command.kind(),
                },
            );
        }
    }

    let span = debug_span!("node", node = %target);
    let _enter = span.enter();
    let mut ctx = NodeContext::new(target, clock, rng, topology, bus, log);
    node.handle(event, &mut ctx)
}
