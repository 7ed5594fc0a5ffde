//! Per-session transport state
//!
//! A session tracks one ordered `(src, dst)` pair on one endpoint: the
//! handshake state, the send window, the receive reorder buffer, and the
//! retransmission timer.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use motesim_core::{Segment, SegmentKind, SessionKey, SimTime, TimerId, TransportIo};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Configuration for transport sessions
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// First retransmission timeout; reset whenever the peer makes progress
    pub initial_rto: Duration,
    /// Upper bound for the backed-off timeout
    pub max_rto: Duration,
    /// Consecutive timeouts tolerated before the session fails
    pub max_retries: u32,
    /// Data segments in flight at once
    pub send_window: u32,
    /// Sequence numbers past the next expected one that the receiver buffers
    pub recv_window: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(500),
            max_rto: Duration::from_secs(8),
            max_retries: 5,
            send_window: 8,
            recv_window: 16,
        }
    }
}

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Closed,
    SynSent,
    Established,
    Closing,
}

/// Which side opened the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// Why a session reached CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Local teardown acknowledged by the peer
    Killed,
    /// Peer sent a teardown
    PeerClosed,
    /// Retry budget exhausted while opening or established
    TimedOut,
    /// Teardown never acknowledged; closed anyway
    ForcedClose,
    /// Local node powered off
    PoweredOff,
    /// Peer opened a new incarnation of the same key
    Superseded,
}

/// Read-only view of a session for the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub role: Role,
    pub state: SessionState,
    pub next_seq: u32,
    pub send_base: u32,
    pub in_flight: usize,
    pub queued: usize,
    pub recv_next: u32,
    pub buffered: usize,
    pub retries: u32,
    pub rto: Duration,
    pub opened_at: SimTime,
}

/// Counters shared by all sessions on a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub timeouts: u64,
    pub segments_sent: u64,
    pub retransmissions: u64,
    /// Segments the routing layer had no route for
    pub route_misses: u64,
    pub payloads_delivered: u64,
}

#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) key: SessionKey,
    pub(crate) role: Role,
    pub(crate) state: SessionState,
    /// Chosen by the initiator; carried on SYN and SYN-ACK
    pub(crate) incarnation: u32,
    next_seq: u32,
    send_base: u32,
    unacked: BTreeMap<u32, Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    recv_next: u32,
    reorder: BTreeMap<u32, Vec<u8>>,
    pub(crate) timer: Option<TimerId>,
    rto: Duration,
    pub(crate) retries: u32,
    opened_at: SimTime,
}

/// What the receive path did with a data segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Received {
    /// In-order data released to the application (possibly several segments)
    Delivered(Vec<Vec<u8>>),
    /// Buffered until the gap before it fills
    Buffered,
    /// Already delivered or already buffered
    Duplicate,
    /// Too far ahead of the receive window
    Discarded,
}

impl Session {
    pub(crate) fn new(
        key: SessionKey,
        role: Role,
        state: SessionState,
        incarnation: u32,
        rto: Duration,
        now: SimTime,
    ) -> Self {
        Self {
            key,
            role,
            state,
            incarnation,
            next_seq: 0,
            send_base: 0,
            unacked: BTreeMap::new(),
            pending: VecDeque::new(),
            recv_next: 0,
            reorder: BTreeMap::new(),
            timer: None,
            rto,
            retries: 0,
            opened_at: now,
        }
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            key: self.key,
            role: self.role,
            state: self.state,
            next_seq: self.next_seq,
            send_base: self.send_base,
            in_flight: self.unacked.len(),
            queued: self.pending.len(),
            recv_next: self.recv_next,
            buffered: self.reorder.len(),
            retries: self.retries,
            rto: self.rto,
            opened_at: self.opened_at,
        }
    }

    pub(crate) fn transmit<IO: TransportIo>(
        &self,
        kind: SegmentKind,
        io: &mut IO,
        stats: &mut TransportStats,
    ) {
        send_segment(self.key, kind, io, stats);
    }

    /// (Re)arm the retransmission timer at the current RTO
    pub(crate) fn restart_timer<IO: TransportIo>(&mut self, io: &mut IO) {
        if let Some(timer) = self.timer.take() {
            io.cancel_timer(timer);
        }
        self.timer = Some(io.set_retransmit_timer(self.rto, self.key));
    }

    pub(crate) fn cancel_timer<IO: TransportIo>(&mut self, io: &mut IO) {
        if let Some(timer) = self.timer.take() {
            io.cancel_timer(timer);
        }
    }

    /// Forget accumulated backoff after the peer made progress
    pub(crate) fn reset_backoff(&mut self, config: &TransportConfig) {
        self.retries = 0;
        self.rto = config.initial_rto;
    }

    /// Double the RTO up to the configured cap
    pub(crate) fn back_off(&mut self, config: &TransportConfig) {
        self.retries += 1;
        self.rto = (self.rto * 2).min(config.max_rto);
    }

    pub(crate) fn queue(&mut self, payload: Vec<u8>) {
        self.pending.push_back(payload);
    }

    /// Move queued data into the send window; arms the timer if anything went out
    pub(crate) fn fill_window<IO: TransportIo>(
        &mut self,
        config: &TransportConfig,
        io: &mut IO,
        stats: &mut TransportStats,
    ) {
        let mut sent_any = false;
        while (self.unacked.len() as u32) < config.send_window {
            let Some(payload) = self.pending.pop_front() else {
                break;
            };
            let seq = self.next_seq;
            self.next_seq += 1;
            self.unacked.insert(seq, payload.clone());
            self.transmit(SegmentKind::Data { seq, payload }, io, stats);
            sent_any = true;
        }
        if sent_any && self.timer.is_none() {
            self.restart_timer(io);
        }
    }

    /// Resend every unacknowledged data segment in sequence order
    pub(crate) fn retransmit_unacked<IO: TransportIo>(&self, io: &mut IO, stats: &mut TransportStats) {
        for (seq, payload) in &self.unacked {
            stats.retransmissions += 1;
            self.transmit(
                SegmentKind::Data {
                    seq: *seq,
                    payload: payload.clone(),
                },
                io,
                stats,
            );
        }
    }

    pub(crate) fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }

    /// Apply a cumulative acknowledgment; returns true if it acknowledged new data
    pub(crate) fn on_ack(&mut self, ack: u32) -> bool {
        if ack <= self.send_base || ack > self.next_seq {
            return false;
        }
        self.unacked.retain(|seq, _| *seq >= ack);
        self.send_base = ack;
        true
    }

    /// Receive path for a data segment
    pub(crate) fn on_data(&mut self, seq: u32, payload: Vec<u8>, config: &TransportConfig) -> Received {
        if seq < self.recv_next || self.reorder.contains_key(&seq) {
            return Received::Duplicate;
        }
        if seq >= self.recv_next.saturating_add(config.recv_window) {
            return Received::Discarded;
        }
        self.reorder.insert(seq, payload);

        let mut released = Vec::new();
        while let Some(payload) = self.reorder.remove(&self.recv_next) {
            released.push(payload);
            self.recv_next += 1;
        }
        if released.is_empty() {
            Received::Buffered
        } else {
            Received::Delivered(released)
        }
    }

    /// Cumulative acknowledgment for everything received in order
    pub(crate) fn ack_number(&self) -> u32 {
        self.recv_next
    }
}

/// Hand a segment to the routing layer; a miss is left to the retransmit timer
pub(crate) fn send_segment<IO: TransportIo>(
    key: SessionKey,
    kind: SegmentKind,
    io: &mut IO,
    stats: &mut TransportStats,
) {
    let label = kind.label();
    let to = key.peer_of(io.node());
    stats.segments_sent += 1;
    if let Err(e) = io.transmit(to, Segment { key, kind }) {
        stats.route_misses += 1;
        debug!(session = %key, segment = label, error = %e, "Segment not routed; waiting for retransmit");
    } else {
        trace!(session = %key, segment = label, to = %to, "Segment sent");
    }
}
