//! Deterministic event trace and run statistics
//!
//! Every observable step of a run (sends, drops, arrivals, timers, driver
//! commands) is appended to the [`EventLog`] with its virtual time. Two runs
//! with the same seed and the same driver calls produce identical logs.

use motesim_core::{Channel, Destination, NodeId, SessionKey, SimTime, TimerKind};
use serde::Serialize;
use tracing::trace;

use crate::bus::DropReason;

/// One observable step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Boot {
        node: NodeId,
    },
    PowerOff {
        node: NodeId,
    },
    ChannelEnabled {
        channel: Channel,
    },
    /// Driver command injected into a node
    Command {
        node: NodeId,
        channel: Channel,
        command: &'static str,
    },
    Send {
        from: NodeId,
        destination: Destination,
        channel: Channel,
        message: &'static str,
    },
    Drop {
        from: NodeId,
        to: NodeId,
        channel: Channel,
        message: &'static str,
        reason: DropReason,
    },
    Arrival {
        to: NodeId,
        from: NodeId,
        channel: Channel,
        message: &'static str,
    },
    Timer {
        node: NodeId,
        timer: TimerKind,
    },
    PingDelivered {
        node: NodeId,
        source: NodeId,
        seq: u32,
        flooded: bool,
    },
    SessionFailed {
        node: NodeId,
        key: SessionKey,
        retries: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub at: SimTime,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Run statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub events_dispatched: u64,
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub timers_fired: u64,
    pub commands: u64,
    pub pings_delivered: u64,
    pub session_failures: u64,
}

/// Append-only record of a run
#[derive(Debug, Clone)]
pub struct EventLog {
    records: Vec<TraceRecord>,
    stats: SimStats,
    keep_records: bool,
}

impl EventLog {
    /// A log that keeps records, or only counts them
    pub fn new(keep_records: bool) -> Self {
        Self {
            records: Vec::new(),
            stats: SimStats::default(),
            keep_records,
        }
    }

    pub fn record(&mut self, at: SimTime, event: TraceEvent) {
        match &event {
            TraceEvent::Send { .. } => self.stats.frames_sent += 1,
            TraceEvent::Drop { .. } => self.stats.frames_dropped += 1,
            TraceEvent::Arrival { .. } => self.stats.frames_delivered += 1,
            TraceEvent::Timer { .. } => self.stats.timers_fired += 1,
            TraceEvent::Command { .. } => self.stats.commands += 1,
            TraceEvent::PingDelivered { .. } => self.stats.pings_delivered += 1,
            TraceEvent::SessionFailed { .. } => self.stats.session_failures += 1,
            TraceEvent::Boot { .. } | TraceEvent::PowerOff { .. } | TraceEvent::ChannelEnabled { .. } => {}
        }
        trace!(at = %at, event = ?event, "Trace");
        if self.keep_records {
            self.records.push(TraceRecord { at, event });
        }
    }

    pub(crate) fn count_dispatch(&mut self) {
        self.stats.events_dispatched += 1;
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// One JSON object per line
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
