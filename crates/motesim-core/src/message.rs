//! Frames and protocol messages
//!
//! Everything carried on the shared medium is a [`Frame`]: a channel tag
//! plus a [`Message`] variant. Protocol polymorphism is a single tagged
//! enum dispatched by the node runtime.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::identity::NodeId;

/// Link-layer destination of a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// One receiver; a single delivery trial
    Unicast(NodeId),
    /// Every subscribed neighbor; one independent trial each
    Broadcast,
}

/// A single transmission on the shared medium
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Transmitting node (link-layer source)
    pub from: NodeId,
    pub channel: Channel,
    pub message: Message,
}

/// Protocol message carried by a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Neighbor discovery beacon
    Beacon { seq: u32 },
    /// Distance-vector table advertisement
    RouteAdvert { entries: Vec<AdvertEntry> },
    /// Hop-by-hop routed packet
    Routed(RoutedPacket),
    /// Flooded packet with duplicate suppression
    Flood(FloodPacket),
}

impl Message {
    /// Short label for traces and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Beacon { .. } => "beacon",
            Message::RouteAdvert { .. } => "route-advert",
            Message::Routed(packet) => packet.body.kind(),
            Message::Flood(_) => "flood",
        }
    }
}

/// One row of a route advertisement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    pub hop_count: u8,
    /// Product of link qualities along the path
    pub quality: f64,
}

/// A packet forwarded along routing-table next hops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedPacket {
    pub source: NodeId,
    pub destination: NodeId,
    /// Remaining hops before the packet is discarded
    pub ttl: u8,
    pub body: Body,
}

/// A packet flooded to every node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodPacket {
    pub origin: NodeId,
    /// Per-origin sequence number used for duplicate suppression
    pub seq: u32,
    pub ttl: u8,
    pub destination: NodeId,
    pub body: Body,
}

/// End-to-end payload of routed and flooded packets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    Ping { seq: u32, payload: Vec<u8> },
    Segment(Segment),
}

impl Body {
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Ping { .. } => "ping",
            Body::Segment(segment) => segment.kind.label(),
        }
    }
}

/// Identifies a transport session by its ordered endpoint pair
///
/// `src` is the initiator. Both endpoints key the session the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub src: NodeId,
    pub dst: NodeId,
}

impl SessionKey {
    pub fn new(src: NodeId, dst: NodeId) -> Self {
        Self { src, dst }
    }

    /// The endpoint opposite `node`
    pub fn peer_of(&self, node: NodeId) -> NodeId {
        if node == self.src { self.dst } else { self.src }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// A transport segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub key: SessionKey,
    pub kind: SegmentKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Open request; `incarnation` tells a fresh session from a retry of the same one
    Syn { incarnation: u32 },
    /// Open reply echoing the SYN's incarnation
    SynAck { incarnation: u32 },
    /// Cumulative acknowledgment: every sequence number below `ack` arrived
    Ack { ack: u32 },
    Data { seq: u32, payload: Vec<u8> },
    Fin,
    FinAck,
}

impl SegmentKind {
    pub fn label(&self) -> &'static str {
        match self {
            SegmentKind::Syn { .. } => "syn",
            SegmentKind::SynAck { .. } => "syn-ack",
            SegmentKind::Ack { .. } => "ack",
            SegmentKind::Data { .. } => "data",
            SegmentKind::Fin => "fin",
            SegmentKind::FinAck => "fin-ack",
        }
    }
}

/// Per-node timers, all of which are cancellable scheduled events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerKind {
    /// Periodic neighbor beacon and aging sweep
    Beacon,
    /// Periodic distance-vector advertisement and route purge
    RouteAdvert,
    /// Transport retransmission for one session
    Retransmit(SessionKey),
}

/// Driver commands injected into a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Ping { destination: NodeId, payload: Vec<u8> },
    InitiateTcp { destination: NodeId },
    KillTcp { destination: NodeId },
    TcpSend { destination: NodeId, payload: Vec<u8> },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Ping { .. } => "ping",
            Command::InitiateTcp { .. } => "initiate-tcp",
            Command::KillTcp { .. } => "kill-tcp",
            Command::TcpSend { .. } => "tcp-send",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u16) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[test]
    fn test_session_key_peer() {
        let key = SessionKey::new(id(8), id(2));
        assert_eq!(key.peer_of(id(8)), id(2));
        assert_eq!(key.peer_of(id(2)), id(8));
        assert_eq!(key.to_string(), "8->2");
    }

    #[test]
    fn test_message_kind_labels() {
        let segment = Segment {
            key: SessionKey::new(id(1), id(2)),
            kind: SegmentKind::Data { seq: 0, payload: vec![1] },
        };
        let routed = Message::Routed(RoutedPacket {
            source: id(1),
            destination: id(2),
            ttl: 4,
            body: Body::Segment(segment),
        });
        assert_eq!(routed.kind(), "data");
        assert_eq!(Message::Beacon { seq: 0 }.kind(), "beacon");
    }
}
