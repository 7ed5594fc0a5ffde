//! Node runtime
//!
//! A [`Node`] owns one mote's protocol state: neighbor discovery, the
//! distance-vector router, the flood filter, and the transport session
//! manager. It reacts to one [`SimEvent`] at a time and reaches the rest of
//! the world only through a [`NodeContext`], which turns sends into
//! channel-bus trials and timers into clock events.

use std::time::Duration;

use motesim_core::{
    Body, Channel, Command, Destination, EventClock, FloodPacket, Frame, Message, NodeEnv, NodeId,
    RoutedPacket, RoutingError, Segment, SessionKey, SimResult, SimTime, TimerId,
    TimerKind, TransportError, TransportIo,
};
use motesim_routing::{
    DiscoveryState, DistanceVectorRouter, FloodFilter, NeighborDiscovery, NeighborEntry, RouteEntry,
};
use motesim_transport::{SessionManager, TransportConfig};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::bus::ChannelBus;
use crate::config::SimConfig;
use crate::topology::Topology;
use crate::trace::{EventLog, TraceEvent};

/// Payload of a scheduled event
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A frame reaches a node
    Arrival { to: NodeId, frame: Frame },
    /// A node timer fires
    Timer { node: NodeId, timer: TimerKind },
    /// A driver command is injected into a node
    Command { node: NodeId, command: Command },
}

impl SimEvent {
    /// The node this event is dispatched to
    pub fn target(&self) -> NodeId {
        match self {
            SimEvent::Arrival { to, .. } => *to,
            SimEvent::Timer { node, .. } | SimEvent::Command { node, .. } => *node,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootState {
    Unbooted,
    Booted,
}

/// A ping delivered to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub source: NodeId,
    pub seq: u32,
    pub payload: Vec<u8>,
    pub received_at: SimTime,
    /// Arrived by flooding rather than along a route
    pub flooded: bool,
}

/// Forwarding counters for one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    pub forwarded: u64,
    pub ttl_expired: u64,
    pub unroutable: u64,
    pub flood_duplicates: u64,
    pub flood_rebroadcasts: u64,
}

/// The simulator as seen from one node while it handles an event
pub struct NodeContext<'a> {
    node: NodeId,
    clock: &'a mut EventClock<SimEvent>,
    rng: &'a mut ChaCha8Rng,
    topology: &'a Topology,
    bus: &'a ChannelBus,
    log: &'a mut EventLog,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        node: NodeId,
        clock: &'a mut EventClock<SimEvent>,
        rng: &'a mut ChaCha8Rng,
        topology: &'a Topology,
        bus: &'a ChannelBus,
        log: &'a mut EventLog,
    ) -> Self {
        Self {
            node,
            clock,
            rng,
            topology,
            bus,
            log,
        }
    }

    pub fn record(&mut self, event: TraceEvent) {
        self.log.record(self.clock.now(), event);
    }
}

impl NodeEnv for NodeContext<'_> {
    fn node(&self) -> NodeId {
        self.node
    }

    fn now(&self) -> SimTime {
        self.clock.now()
    }

    fn send(&mut self, destination: Destination, channel: Channel, message: Message) {
        let now = self.clock.now();
        let kind = message.kind();
        self.log.record(
            now,
            TraceEvent::Send {
                from: self.node,
                destination,
                channel,
                message: kind,
            },
        );

        let outcome = self
            .bus
            .transmit(self.topology, self.rng, self.node, destination, channel);
        for (to, reason) in outcome.drops {
            self.log.record(
                now,
                TraceEvent::Drop {
                    from: self.node,
                    to,
                    channel,
                    message: kind,
                    reason,
                },
            );
        }
        for delivery in outcome.deliveries {
            let frame = Frame {
                from: self.node,
                channel,
                message: message.clone(),
            };
            self.clock.schedule_after(
                delivery.delay,
                SimEvent::Arrival {
                    to: delivery.to,
                    frame,
                },
            );
        }
    }

    fn set_timer(&mut self, delay: Duration, timer: TimerKind) -> TimerId {
        self.clock.schedule_after(
            delay,
            SimEvent::Timer {
                node: self.node,
                timer,
            },
        )
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.clock.cancel(id).is_some()
    }

    fn random_unit(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

/// Carries transport segments hop by hop along the routing table
struct SegmentPath<'c, 'a> {
    ctx: &'c mut NodeContext<'a>,
    router: &'c DistanceVectorRouter,
    ttl: u8,
}

impl TransportIo for SegmentPath<'_, '_> {
    fn node(&self) -> NodeId {
        self.ctx.node()
    }

    fn now(&self) -> SimTime {
        self.ctx.now()
    }

    fn transmit(&mut self, to: NodeId, segment: Segment) -> Result<(), RoutingError> {
        let next_hop = self.router.route(to)?;
        let packet = RoutedPacket {
            source: self.ctx.node(),
            destination: to,
            ttl: self.ttl,
            body: Body::Segment(segment),
        };
        self.ctx.send(
            Destination::Unicast(next_hop),
            Channel::General,
            Message::Routed(packet),
        );
        Ok(())
    }

    fn set_retransmit_timer(&mut self, delay: Duration, key: SessionKey) -> TimerId {
        self.ctx.set_timer(delay, TimerKind::Retransmit(key))
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.ctx.cancel_timer(id)
    }
}

/// One simulated mote
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    position: Option<(f64, f64)>,
    state: BootState,
    discovery: NeighborDiscovery,
    router: DistanceVectorRouter,
    flood_filter: FloodFilter,
    transport: SessionManager,
    inbox: Vec<InboxEntry>,
    next_ping_seq: u32,
    next_flood_seq: u32,
    routed_ttl: u8,
    flood_ttl: u8,
    stats: NodeStats,
}

impl Node {
    pub fn new(id: NodeId, position: Option<(f64, f64)>, config: &SimConfig) -> Self {
        Self {
            id,
            position,
            state: BootState::Unbooted,
            discovery: NeighborDiscovery::new(config.neighbor()),
            router: DistanceVectorRouter::new(id, config.router()),
            flood_filter: FloodFilter::new(),
            transport: SessionManager::new(id, TransportConfig::from(&config.transport)),
            inbox: Vec::new(),
            next_ping_seq: 0,
            next_flood_seq: 0,
            routed_ttl: config.max_hops,
            flood_ttl: config.flood_ttl,
            stats: NodeStats::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.position
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn is_booted(&self) -> bool {
        self.state == BootState::Booted
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.state()
    }

    pub fn neighbor_dump(&self) -> Vec<NeighborEntry> {
        self.discovery.dump()
    }

    pub fn route(&self, destination: NodeId) -> Result<NodeId, RoutingError> {
        self.router.route(destination)
    }

    pub fn routing_table(&self) -> Vec<RouteEntry> {
        self.router.table().snapshot()
    }

    pub fn transport(&self) -> &SessionManager {
        &self.transport
    }

    pub(crate) fn take_session_failures(&mut self) -> Vec<TransportError> {
        self.transport.take_failures()
    }

    pub fn inbox(&self) -> &[InboxEntry] {
        &self.inbox
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Start beaconing and advertising; a booted node is left alone
    pub fn boot(&mut self, ctx: &mut NodeContext<'_>) {
        if self.is_booted() {
            return;
        }
        self.state = BootState::Booted;
        self.discovery.start(ctx);
        self.router.start(ctx);
        info!(node = %self.id, "Node booted");
    }

    /// Stop every protocol, cancel every timer, forget all soft state
    pub fn power_off(&mut self, ctx: &mut NodeContext<'_>) {
        if !self.is_booted() {
            return;
        }
        self.discovery.stop(ctx);
        self.router.stop(ctx);
        let mut path = SegmentPath {
            ctx,
            router: &self.router,
            ttl: self.routed_ttl,
        };
        self.transport.power_off(&mut path);
        self.flood_filter.clear();
        self.state = BootState::Unbooted;
        info!(node = %self.id, "Node powered off");
    }

    /// Dispatch one event addressed to this node
    ///
    /// Only an invariant violation surfaces as an error; protocol misses
    /// are handled here.
    pub fn handle(&mut self, event: SimEvent, ctx: &mut NodeContext<'_>) -> SimResult<()> {
        match event {
            SimEvent::Arrival { frame, .. } => self.handle_frame(frame, ctx),
            SimEvent::Timer { timer, .. } => {
                self.handle_timer(timer, ctx);
                Ok(())
            }
            SimEvent::Command { command, .. } => self.handle_command(command, ctx),
        }
    }

    fn handle_frame(&mut self, frame: Frame, ctx: &mut NodeContext<'_>) -> SimResult<()> {
        let now = ctx.now();
        match frame.message {
            Message::Beacon { seq } => {
                if self.discovery.on_beacon(frame.from, seq, now).is_some()
                    && let Some(entry) = self.discovery.table().get(frame.from)
                {
                    self.router.on_neighbor(entry, now);
                }
                Ok(())
            }
            Message::RouteAdvert { entries } => {
                self.router
                    .on_advert(frame.from, &entries, self.discovery.table(), now);
                Ok(())
            }
            Message::Routed(packet) => self.handle_routed(packet, ctx),
            Message::Flood(packet) => self.handle_flood(packet, ctx),
        }
    }

    fn handle_routed(&mut self, packet: RoutedPacket, ctx: &mut NodeContext<'_>) -> SimResult<()> {
        if packet.destination == self.id {
            return self.deliver(packet.source, packet.body, false, ctx);
        }
        if packet.ttl == 0 {
            self.stats.ttl_expired += 1;
            debug!(node = %self.id, source = %packet.source, destination = %packet.destination, "Routed packet TTL expired");
            return Ok(());
        }
        match self.router.route(packet.destination) {
            Ok(next_hop) => {
                self.stats.forwarded += 1;
                trace!(node = %self.id, destination = %packet.destination, next_hop = %next_hop, "Forwarding");
                let forwarded = RoutedPacket {
                    ttl: packet.ttl - 1,
                    ..packet
                };
                ctx.send(
                    Destination::Unicast(next_hop),
                    Channel::General,
                    Message::Routed(forwarded),
                );
            }
            Err(e) => {
                self.stats.unroutable += 1;
                debug!(node = %self.id, error = %e, "Routed packet dropped");
            }
        }
        Ok(())
    }

    fn handle_flood(&mut self, packet: FloodPacket, ctx: &mut NodeContext<'_>) -> SimResult<()> {
        if !self.flood_filter.check_and_record(packet.origin, packet.seq) {
            self.stats.flood_duplicates += 1;
            trace!(node = %self.id, origin = %packet.origin, seq = packet.seq, "Flood duplicate suppressed");
            return Ok(());
        }
        if packet.destination == self.id {
            return self.deliver(packet.origin, packet.body, true, ctx);
        }
        if packet.ttl == 0 {
            self.stats.ttl_expired += 1;
            return Ok(());
        }
        self.stats.flood_rebroadcasts += 1;
        let rebroadcast = FloodPacket {
            ttl: packet.ttl - 1,
            ..packet
        };
        ctx.send(Destination::Broadcast, Channel::Flooding, Message::Flood(rebroadcast));
        Ok(())
    }

    /// Hand a packet body addressed to this node to its consumer
    fn deliver(&mut self, source: NodeId, body: Body, flooded: bool, ctx: &mut NodeContext<'_>) -> SimResult<()> {
        match body {
            Body::Ping { seq, payload } => {
                info!(node = %self.id, source = %source, seq, flooded, "Ping received");
                ctx.record(TraceEvent::PingDelivered {
                    node: self.id,
                    source,
                    seq,
                    flooded,
                });
                self.inbox.push(InboxEntry {
                    source,
                    seq,
                    payload,
                    received_at: ctx.now(),
                    flooded,
                });
                Ok(())
            }
            Body::Segment(segment) => {
                let mut path = SegmentPath {
                    ctx,
                    router: &self.router,
                    ttl: self.routed_ttl,
                };
                self.transport.on_segment(segment, &mut path)?;
                Ok(())
            }
        }
    }

    fn handle_timer(&mut self, timer: TimerKind, ctx: &mut NodeContext<'_>) {
        match timer {
            TimerKind::Beacon => {
                for neighbor in self.discovery.on_timer(ctx) {
                    self.router.on_neighbor_lost(neighbor);
                }
            }
            TimerKind::RouteAdvert => {
                self.router.on_timer(ctx);
            }
            TimerKind::Retransmit(key) => {
                let mut path = SegmentPath {
                    ctx,
                    router: &self.router,
                    ttl: self.routed_ttl,
                };
                if let Some(TransportError::SessionTimeout { key, retries }) =
                    self.transport.on_timer(key, &mut path)
                {
                    ctx.record(TraceEvent::SessionFailed {
                        node: self.id,
                        key,
                        retries,
                    });
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command, ctx: &mut NodeContext<'_>) -> SimResult<()> {
        match command {
            Command::Ping {
                destination,
                payload,
            } => {
                self.originate_ping(destination, payload, ctx);
                Ok(())
            }
            Command::InitiateTcp { destination } => {
                let mut path = SegmentPath {
                    ctx,
                    router: &self.router,
                    ttl: self.routed_ttl,
                };
                self.transport.initiate(destination, &mut path)?;
                Ok(())
            }
            Command::KillTcp { destination } => {
                let key = SessionKey::new(self.id, destination);
                let mut path = SegmentPath {
                    ctx,
                    router: &self.router,
                    ttl: self.routed_ttl,
                };
                self.transport.kill(key, &mut path);
                Ok(())
            }
            Command::TcpSend {
                destination,
                payload,
            } => {
                let Some(key) = self.transport.find_key(destination) else {
                    warn!(node = %self.id, destination = %destination, "No session for data; dropped");
                    return Ok(());
                };
                let mut path = SegmentPath {
                    ctx,
                    router: &self.router,
                    ttl: self.routed_ttl,
                };
                self.transport.send(key, payload, &mut path);
                Ok(())
            }
        }
    }

    /// Route a ping if possible, flood it otherwise
    fn originate_ping(&mut self, destination: NodeId, payload: Vec<u8>, ctx: &mut NodeContext<'_>) {
        let seq = self.next_ping_seq;
        self.next_ping_seq = self.next_ping_seq.wrapping_add(1);
        let body = Body::Ping { seq, payload };

        if destination == self.id {
            // Loopback never touches the radio
            if let Err(e) = self.deliver(self.id, body, false, ctx) {
                warn!(node = %self.id, error = %e, "Loopback ping failed");
            }
            return;
        }

        match self.router.route(destination) {
            Ok(next_hop) => {
                debug!(node = %self.id, destination = %destination, next_hop = %next_hop, seq, "Ping routed");
                let packet = RoutedPacket {
                    source: self.id,
                    destination,
                    ttl: self.routed_ttl,
                    body,
                };
                ctx.send(
                    Destination::Unicast(next_hop),
                    Channel::General,
                    Message::Routed(packet),
                );
            }
            Err(_) => {
                let flood_seq = self.next_flood_seq;
                self.next_flood_seq = self.next_flood_seq.wrapping_add(1);
                self.flood_filter.check_and_record(self.id, flood_seq);
                debug!(node = %self.id, destination = %destination, seq, "No route; flooding ping");
                let packet = FloodPacket {
                    origin: self.id,
                    seq: flood_seq,
                    ttl: self.flood_ttl,
                    destination,
                    body,
                };
                ctx.send(Destination::Broadcast, Channel::Flooding, Message::Flood(packet));
            }
        }
    }
}
