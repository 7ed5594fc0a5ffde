//! Recording environments for testing protocol logic
//!
//! [`RecordingEnv`] and [`RecordingIo`] capture every send and timer a
//! protocol component issues, without a clock or a channel bus behind them.
//! Tests drive time forward by hand with [`RecordingEnv::set_now`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use motesim_core::{NodeId, RecordingEnv};
//!
//! let mut env = RecordingEnv::new(NodeId::new(1).unwrap());
//! discovery.start(&mut env);
//! assert_eq!(env.armed_timers().len(), 1);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use crate::channel::Channel;
use crate::clock::EventId;
use crate::error::RoutingError;
use crate::identity::NodeId;
use crate::message::{Destination, Message, Segment, SessionKey, TimerKind};
use crate::time::SimTime;
use crate::traits::{NodeEnv, TimerId, TransportIo};

/// A message captured by [`RecordingEnv::send`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub destination: Destination,
    pub channel: Channel,
    pub message: Message,
}

/// Timer bookkeeping shared by the recording environments
#[derive(Debug)]
struct TimerBook<T> {
    next_seq: u64,
    armed: BTreeMap<TimerId, T>,
}

impl<T> Default for TimerBook<T> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            armed: BTreeMap::new(),
        }
    }
}

impl<T> TimerBook<T> {
    fn arm(&mut self, now: SimTime, delay: Duration, timer: T) -> TimerId {
        let id = EventId {
            fire_at: now + delay,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.armed.insert(id, timer);
        id
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        self.armed.remove(&id).is_some()
    }
}

/// In-memory [`NodeEnv`] that records instead of transmitting
#[derive(Debug)]
pub struct RecordingEnv {
    node: NodeId,
    now: SimTime,
    random: f64,
    sent: Vec<SentMessage>,
    timers: TimerBook<TimerKind>,
}

impl RecordingEnv {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            now: SimTime::ZERO,
            random: 0.5,
            sent: Vec::new(),
            timers: TimerBook::default(),
        }
    }

    /// Fix the value returned by [`NodeEnv::random_unit`]
    pub fn with_random(mut self, value: f64) -> Self {
        self.random = value;
        self
    }

    pub fn set_now(&mut self, now: SimTime) {
        self.now = now;
    }

    /// Messages sent so far
    pub fn sent(&self) -> &[SentMessage] {
        &self.sent
    }

    /// Drain the recorded messages
    pub fn take_sent(&mut self) -> Vec<SentMessage> {
        std::mem::take(&mut self.sent)
    }

    /// Timers that are armed and not cancelled
    pub fn armed_timers(&self) -> Vec<(TimerId, TimerKind)> {
        self.timers.armed.iter().map(|(id, t)| (*id, *t)).collect()
    }

    /// Forget a timer as if it had fired
    pub fn fire(&mut self, id: TimerId) -> Option<TimerKind> {
        self.timers.armed.remove(&id)
    }
}

impl NodeEnv for RecordingEnv {
    fn node(&self) -> NodeId {
        self.node
    }

    fn now(&self) -> SimTime {
        self.now
    }

    fn send(&mut self, destination: Destination, channel: Channel, message: Message) {
        self.sent.push(SentMessage {
            destination,
            channel,
            message,
        });
    }

    fn set_timer(&mut self, delay: Duration, timer: TimerKind) -> TimerId {
        self.timers.arm(self.now, delay, timer)
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    fn random_unit(&mut self) -> f64 {
        self.random
    }
}

/// In-memory [`TransportIo`] that records transmitted segments
#[derive(Debug)]
pub struct RecordingIo {
    node: NodeId,
    now: SimTime,
    reachable: bool,
    transmitted: Vec<(NodeId, Segment)>,
    timers: TimerBook<SessionKey>,
}

impl RecordingIo {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            now: SimTime::ZERO,
            reachable: true,
            transmitted: Vec::new(),
            timers: TimerBook::default(),
        }
    }

    pub fn set_now(&mut self, now: SimTime) {
        self.now = now;
    }

    /// Make every `transmit` fail with `NoRoute` (or succeed again)
    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    pub fn transmitted(&self) -> &[(NodeId, Segment)] {
        &self.transmitted
    }

    pub fn take_transmitted(&mut self) -> Vec<(NodeId, Segment)> {
        std::mem::take(&mut self.transmitted)
    }

    pub fn armed_timers(&self) -> Vec<(TimerId, SessionKey)> {
        self.timers.armed.iter().map(|(id, k)| (*id, *k)).collect()
    }

    pub fn fire(&mut self, id: TimerId) -> Option<SessionKey> {
        self.timers.armed.remove(&id)
    }
}

impl TransportIo for RecordingIo {
    fn node(&self) -> NodeId {
        self.node
    }

    fn now(&self) -> SimTime {
        self.now
    }

    fn transmit(&mut self, to: NodeId, segment: Segment) -> Result<(), RoutingError> {
        if !self.reachable {
            return Err(RoutingError::NoRoute {
                from: self.node,
                to,
            });
        }
        self.transmitted.push((to, segment));
        Ok(())
    }

    fn set_retransmit_timer(&mut self, delay: Duration, key: SessionKey) -> TimerId {
        self.timers.arm(self.now, delay, key)
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }
}
