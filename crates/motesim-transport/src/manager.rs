//! Session manager
//!
//! One [`SessionManager`] per node owns every session that node takes part
//! in, either as initiator or as responder. It turns driver commands and
//! incoming segments into outgoing segments and timer operations through a
//! [`TransportIo`].

use std::collections::BTreeMap;

use motesim_core::{NodeId, Segment, SegmentKind, SessionKey, SimTime, TransportError, TransportIo};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use crate::session::{
    CloseReason, Received, Role, Session, SessionInfo, SessionState, TransportConfig, TransportStats,
    send_segment,
};

/// Record of a session that reached CLOSED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedSession {
    pub key: SessionKey,
    pub role: Role,
    pub reason: CloseReason,
    pub closed_at: SimTime,
}

/// Per-node transport state
#[derive(Debug)]
pub struct SessionManager {
    node: NodeId,
    config: TransportConfig,
    sessions: BTreeMap<SessionKey, Session>,
    /// Application data released in order, kept after the session closes
    delivered: BTreeMap<SessionKey, Vec<Vec<u8>>>,
    closed: Vec<ClosedSession>,
    failures: Vec<TransportError>,
    stats: TransportStats,
    /// Survives power cycles so a rebooted initiator never reuses one
    next_incarnation: u32,
}

impl SessionManager {
    pub fn new(node: NodeId, config: TransportConfig) -> Self {
        Self {
            node,
            config,
            sessions: BTreeMap::new(),
            delivered: BTreeMap::new(),
            closed: Vec::new(),
            failures: Vec::new(),
            stats: TransportStats::default(),
            next_incarnation: 0,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Insert a new active session; at most one may exist per key
    fn open(
        &mut self,
        key: SessionKey,
        role: Role,
        state: SessionState,
        incarnation: u32,
        now: SimTime,
    ) -> Result<(), TransportError> {
        if self.sessions.contains_key(&key) {
            return Err(TransportError::DuplicateSession { node: self.node, key });
        }
        self.sessions.insert(
            key,
            Session::new(key, role, state, incarnation, self.config.initial_rto, now),
        );
        self.stats.sessions_opened += 1;
        Ok(())
    }

    /// Remove a session, cancelling its timer
    fn close<IO: TransportIo>(&mut self, key: SessionKey, reason: CloseReason, io: &mut IO) {
        let Some(mut session) = self.sessions.remove(&key) else {
            return;
        };
        session.cancel_timer(io);
        self.stats.sessions_closed += 1;
        info!(node = %self.node, session = %key, reason = ?reason, "Session closed");
        self.closed.push(ClosedSession {
            key,
            role: session.role,
            reason,
            closed_at: io.now(),
        });
    }

    /// Open a session from this node to `peer`
    ///
    /// Returns `Ok(false)` without side effects if the session is already
    /// active.
    #[instrument(skip(self, io), fields(node = %self.node))]
    pub fn initiate<IO: TransportIo>(&mut self, peer: NodeId, io: &mut IO) -> Result<bool, TransportError> {
        let key = SessionKey::new(self.node, peer);
        if let Some(existing) = self.sessions.get(&key) {
            debug!(session = %key, state = ?existing.state, "Session already active");
            return Ok(false);
        }

        let incarnation = self.next_incarnation;
        self.next_incarnation = self.next_incarnation.wrapping_add(1);
        self.open(key, Role::Initiator, SessionState::SynSent, incarnation, io.now())?;
        let Some(session) = self.sessions.get_mut(&key) else {
            return Ok(false);
        };
        session.transmit(SegmentKind::Syn { incarnation }, io, &mut self.stats);
        session.restart_timer(io);
        info!(session = %key, incarnation, "Session opening");
        Ok(true)
    }

    /// Begin tearing down a session
    ///
    /// Returns false if the session is unknown or already closing.
    pub fn kill<IO: TransportIo>(&mut self, key: SessionKey, io: &mut IO) -> bool {
        let Some(session) = self.sessions.get_mut(&key) else {
            debug!(node = %self.node, session = %key, "Kill for inactive session ignored");
            return false;
        };
        match session.state {
            SessionState::SynSent | SessionState::Established => {
                session.state = SessionState::Closing;
                session.reset_backoff(&self.config);
                session.transmit(SegmentKind::Fin, io, &mut self.stats);
                session.restart_timer(io);
                info!(node = %self.node, session = %key, "Session closing");
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        }
    }

    /// Queue application data on a session
    ///
    /// Data queued before the handshake completes goes out once it does.
    /// Returns false if the session cannot carry data.
    pub fn send<IO: TransportIo>(&mut self, key: SessionKey, payload: Vec<u8>, io: &mut IO) -> bool {
        let Some(session) = self.sessions.get_mut(&key) else {
            return false;
        };
        match session.state {
            SessionState::SynSent => {
                session.queue(payload);
                true
            }
            SessionState::Established => {
                session.queue(payload);
                session.fill_window(&self.config, io, &mut self.stats);
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        }
    }

    /// Handle a segment addressed to this node
    pub fn on_segment<IO: TransportIo>(&mut self, segment: Segment, io: &mut IO) -> Result<(), TransportError> {
        let key = segment.key;
        trace!(node = %self.node, session = %key, segment = segment.kind.label(), "Segment received");
        match segment.kind {
            SegmentKind::Syn { incarnation } => return self.on_syn(key, incarnation, io),
            SegmentKind::SynAck { incarnation } => self.on_syn_ack(key, incarnation, io),
            SegmentKind::Data { seq, payload } => self.on_data(key, seq, payload, io),
            SegmentKind::Ack { ack } => self.on_ack(key, ack, io),
            SegmentKind::Fin => self.on_fin(key, io),
            SegmentKind::FinAck => self.on_fin_ack(key, io),
        }
        Ok(())
    }

    fn on_syn<IO: TransportIo>(
        &mut self,
        key: SessionKey,
        incarnation: u32,
        io: &mut IO,
    ) -> Result<(), TransportError> {
        if key.dst != self.node {
            warn!(node = %self.node, session = %key, "SYN for another responder dropped");
            return Ok(());
        }
        if let Some(session) = self.sessions.get(&key) {
            if session.incarnation == incarnation {
                // Our SYN-ACK was lost and the initiator retried
                if session.state == SessionState::Established {
                    session.transmit(SegmentKind::SynAck { incarnation }, io, &mut self.stats);
                }
                return Ok(());
            }
            // The initiator lost its end without our hearing a FIN
            debug!(
                node = %self.node,
                session = %key,
                stale = session.incarnation,
                incarnation,
                "Stale responder session replaced"
            );
            self.close(key, CloseReason::Superseded, io);
        }

        self.open(key, Role::Responder, SessionState::Established, incarnation, io.now())?;
        send_segment(key, SegmentKind::SynAck { incarnation }, io, &mut self.stats);
        info!(node = %self.node, session = %key, incarnation, "Session accepted");
        Ok(())
    }

    fn on_syn_ack<IO: TransportIo>(&mut self, key: SessionKey, incarnation: u32, io: &mut IO) {
        let Some(session) = self.sessions.get_mut(&key) else {
            return;
        };
        if session.state != SessionState::SynSent || session.incarnation != incarnation {
            return;
        }
        session.state = SessionState::Established;
        session.reset_backoff(&self.config);
        session.cancel_timer(io);
        info!(node = %self.node, session = %key, "Session established");
        session.fill_window(&self.config, io, &mut self.stats);
    }

    fn on_data<IO: TransportIo>(&mut self, key: SessionKey, seq: u32, payload: Vec<u8>, io: &mut IO) {
        let Some(session) = self.sessions.get_mut(&key) else {
            trace!(node = %self.node, session = %key, seq, "Data for inactive session dropped");
            return;
        };
        if session.state != SessionState::Established {
            return;
        }

        match session.on_data(seq, payload, &self.config) {
            Received::Delivered(payloads) => {
                self.stats.payloads_delivered += payloads.len() as u64;
                debug!(node = %self.node, session = %key, count = payloads.len(), "Data delivered in order");
                self.delivered.entry(key).or_default().extend(payloads);
            }
            Received::Buffered => trace!(node = %self.node, session = %key, seq, "Out-of-order data buffered"),
            Received::Duplicate => trace!(node = %self.node, session = %key, seq, "Duplicate data"),
            Received::Discarded => {
                // Left unacknowledged; the sender's timer resends it
                debug!(node = %self.node, session = %key, seq, "Data beyond receive window discarded");
                return;
            }
        }
        let ack = session.ack_number();
        session.transmit(SegmentKind::Ack { ack }, io, &mut self.stats);
    }

    fn on_ack<IO: TransportIo>(&mut self, key: SessionKey, ack: u32, io: &mut IO) {
        let Some(session) = self.sessions.get_mut(&key) else {
            return;
        };
        if session.state != SessionState::Established || !session.on_ack(ack) {
            return;
        }
        session.reset_backoff(&self.config);
        session.cancel_timer(io);
        session.fill_window(&self.config, io, &mut self.stats);
        if session.has_unacked() && session.timer.is_none() {
            session.restart_timer(io);
        }
    }

    fn on_fin<IO: TransportIo>(&mut self, key: SessionKey, io: &mut IO) {
        // Answer even without a session: the peer may be retrying after a lost FIN-ACK
        send_segment(key, SegmentKind::FinAck, io, &mut self.stats);
        self.close(key, CloseReason::PeerClosed, io);
    }

    fn on_fin_ack<IO: TransportIo>(&mut self, key: SessionKey, io: &mut IO) {
        if self.state(key) == SessionState::Closing {
            self.close(key, CloseReason::Killed, io);
        }
    }

    /// Handle an expired retransmission timer
    ///
    /// Returns the failure if this expiry exhausted the retry budget of an
    /// opening or established session. The failure is also kept for
    /// [`take_failures`](Self::take_failures).
    pub fn on_timer<IO: TransportIo>(&mut self, key: SessionKey, io: &mut IO) -> Option<TransportError> {
        let Some(session) = self.sessions.get_mut(&key) else {
            trace!(node = %self.node, session = %key, "Timer for inactive session ignored");
            return None;
        };
        session.timer = None;

        if session.retries >= self.config.max_retries {
            let retries = session.retries;
            if session.state == SessionState::Closing {
                self.close(key, CloseReason::ForcedClose, io);
                return None;
            }
            self.close(key, CloseReason::TimedOut, io);
            let failure = TransportError::SessionTimeout { key, retries };
            warn!(node = %self.node, error = %failure, "Session failed");
            self.stats.timeouts += 1;
            self.failures.push(failure.clone());
            return Some(failure);
        }

        if session.state == SessionState::Established && !session.has_unacked() {
            return None;
        }
        session.back_off(&self.config);
        match session.state {
            SessionState::SynSent => {
                self.stats.retransmissions += 1;
                let incarnation = session.incarnation;
                session.transmit(SegmentKind::Syn { incarnation }, io, &mut self.stats);
            }
            SessionState::Established => session.retransmit_unacked(io, &mut self.stats),
            SessionState::Closing => {
                self.stats.retransmissions += 1;
                session.transmit(SegmentKind::Fin, io, &mut self.stats);
            }
            SessionState::Closed => return None,
        }
        debug!(node = %self.node, session = %key, retries = session.retries, "Retransmitted");
        session.restart_timer(io);
        None
    }

    /// Drop every session, cancelling their timers
    pub fn power_off<IO: TransportIo>(&mut self, io: &mut IO) {
        let keys: Vec<SessionKey> = self.sessions.keys().copied().collect();
        for key in keys {
            self.close(key, CloseReason::PoweredOff, io);
        }
    }

    /// State of a session on this node; `Closed` if not active
    pub fn state(&self, key: SessionKey) -> SessionState {
        self.sessions
            .get(&key)
            .map(|s| s.state)
            .unwrap_or(SessionState::Closed)
    }

    pub fn info(&self, key: SessionKey) -> Option<SessionInfo> {
        self.sessions.get(&key).map(Session::info)
    }

    /// Every active session, ordered by key
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(Session::info).collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// The active session this node shares with `peer`, preferring the one it initiated
    pub fn find_key(&self, peer: NodeId) -> Option<SessionKey> {
        [SessionKey::new(self.node, peer), SessionKey::new(peer, self.node)]
            .into_iter()
            .find(|key| self.sessions.contains_key(key))
    }

    /// Data delivered in order on a session so far
    pub fn delivered(&self, key: SessionKey) -> &[Vec<u8>] {
        self.delivered.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn closed(&self) -> &[ClosedSession] {
        &self.closed
    }

    /// Drain the session failures recorded since the last call
    pub fn take_failures(&mut self) -> Vec<TransportError> {
        std::mem::take(&mut self.failures)
    }
}
