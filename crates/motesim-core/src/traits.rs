//! Core traits for motesim
//!
//! Protocol code never touches another node's state. Everything a node can
//! do to the outside world goes through one of these traits, which the
//! simulator implements on top of the channel bus and the event clock.
//!
//! ## Key Traits
//!
//! - [`NodeEnv`]: Link-layer sends, timers, and virtual time for one node
//! - [`TransportIo`]: Routed segment output for the transport layer

use std::time::Duration;

use crate::channel::Channel;
use crate::clock::EventId;
use crate::error::RoutingError;
use crate::identity::NodeId;
use crate::message::{Destination, Message, Segment, SessionKey, TimerKind};
use crate::time::SimTime;

/// Handle to a pending timer
pub type TimerId = EventId;

/// A node's view of the simulator
pub trait NodeEnv {
    /// The node this environment belongs to
    fn node(&self) -> NodeId;

    /// Current virtual time
    fn now(&self) -> SimTime;

    /// Transmit a message on a channel
    ///
    /// Delivery is best effort: loss is silent and arrival is delayed by the
    /// link model.
    fn send(&mut self, destination: Destination, channel: Channel, message: Message);

    /// Arm a timer that fires `delay` from now
    fn set_timer(&mut self, delay: Duration, timer: TimerKind) -> TimerId;

    /// Disarm a timer; returns false if it already fired or was cancelled
    fn cancel_timer(&mut self, id: TimerId) -> bool;

    /// Uniform sample in `[0, 1)` from the simulation's seeded generator
    fn random_unit(&mut self) -> f64;
}

/// Output side of the transport layer
///
/// `transmit` hands a segment to the routing layer; a routing miss comes
/// back as [`RoutingError::NoRoute`] and is retried by the session's
/// retransmission timer.
pub trait TransportIo {
    /// The local node
    fn node(&self) -> NodeId;

    /// Current virtual time
    fn now(&self) -> SimTime;

    /// Send a segment toward `to` over the routed substrate
    fn transmit(&mut self, to: NodeId, segment: Segment) -> Result<(), RoutingError>;

    /// Arm the retransmission timer for a session
    fn set_retransmit_timer(&mut self, delay: Duration, key: SessionKey) -> TimerId;

    /// Disarm a retransmission timer
    fn cancel_timer(&mut self, id: TimerId) -> bool;
}
