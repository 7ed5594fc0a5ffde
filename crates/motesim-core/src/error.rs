//! Error types for motesim

use std::path::PathBuf;

use thiserror::Error;

use crate::identity::NodeId;
use crate::message::SessionKey;
use crate::time::SimTime;

/// Top-level error type surfaced to the simulation driver
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("{what} already initialized")]
    AlreadyInitialized { what: &'static str },

    #[error("Node {0} is not booted")]
    NotBooted(NodeId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

impl SimError {
    /// Whether this error reports a broken internal invariant
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SimError::InvariantViolation(_)
                | SimError::Transport(TransportError::DuplicateSession { .. })
        )
    }
}

/// Errors raised by the event clock
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("Cannot schedule event at {requested}: clock is already at {now}")]
    InvalidTime { requested: SimTime, now: SimTime },
}

/// Errors related to routing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No route is known from `from` to `to`; retriable once tables converge
    #[error("No route from {from} to {to}")]
    NoRoute { from: NodeId, to: NodeId },
}

/// Errors related to transport sessions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Retry budget exhausted; the session has been closed
    #[error("Session {key} timed out after {retries} retries")]
    SessionTimeout { key: SessionKey, retries: u32 },

    /// A second active session was about to be created for the same pair
    #[error("Duplicate active session {key} on node {node}")]
    DuplicateSession { node: NodeId, key: SessionKey },
}

/// Errors raised while loading a topology or noise description
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Invalid node id: {raw:?}")]
    InvalidNodeId { raw: String },

    #[error("Link {a}-{b} has quality {quality} outside [0, 1]")]
    InvalidQuality { a: NodeId, b: NodeId, quality: f64 },

    #[error("Link {a}-{b} has non-finite gain {gain}")]
    NonFiniteGain { a: NodeId, b: NodeId, gain: f64 },

    #[error("Noise reading {reading} is not finite")]
    NonFiniteNoise { reading: f64 },

    #[error("Self link on node {0}")]
    SelfLink(NodeId),

    #[error("Link {a}-{b} references a node missing from the topology")]
    DanglingLink { a: NodeId, b: NodeId },

    #[error("Noise description contains no readings")]
    EmptyNoise,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for driver-facing operations
pub type SimResult<T> = Result<T, SimError>;
