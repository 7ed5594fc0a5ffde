//! Neighbor discovery
//!
//! Each booted node runs a [`NeighborDiscovery`] instance. While
//! beaconing it broadcasts a sequenced beacon on the NEIGHBOR channel every
//! beacon interval and, on the same tick, sweeps out neighbors that have
//! been silent for longer than the expiry timeout.
//!
//! Link quality is estimated per neighbor as an exponential moving average
//! over beacon reception: every sequence number skipped since the last
//! beacon counts as a miss, the received beacon counts as a hit.

use std::collections::BTreeMap;
use std::time::Duration;

use motesim_core::{Channel, Destination, Message, NodeEnv, NodeId, SimTime, TimerId, TimerKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Misses folded into the estimate per gap are capped at this many
const MAX_COUNTED_MISSES: u32 = 32;

/// Configuration for neighbor discovery
#[derive(Debug, Clone)]
pub struct NeighborConfig {
    /// Period between beacons (`T_beacon`)
    pub beacon_interval: Duration,
    /// Silence timeout as a multiple of the beacon interval
    pub expire_multiplier: u32,
    /// Weight of the newest observation in the quality estimate
    pub ema_alpha: f64,
}

impl NeighborConfig {
    /// Silence after which a neighbor is removed (`T_expire`)
    pub fn expire_after(&self) -> Duration {
        self.beacon_interval * self.expire_multiplier
    }
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            beacon_interval: Duration::from_secs(1),
            expire_multiplier: 3,
            ema_alpha: 0.25,
        }
    }
}

/// One row of a node's neighbor table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub neighbor: NodeId,
    /// Virtual time the last beacon from this neighbor arrived
    pub last_seen: SimTime,
    /// Estimated beacon delivery ratio in `[0, 1]`
    pub quality: f64,
    /// Sequence number of the last beacon received
    pub last_seq: u32,
    pub beacons_received: u64,
}

/// Result of recording a beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborChange {
    /// First beacon from this neighbor (or first since it expired)
    Discovered,
    /// Known neighbor refreshed
    Refreshed,
}

/// A node's view of its one-hop neighborhood
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    entries: BTreeMap<NodeId, NeighborEntry>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a beacon from `neighbor`
    pub fn observe(&mut self, neighbor: NodeId, seq: u32, now: SimTime, alpha: f64) -> NeighborChange {
        match self.entries.get_mut(&neighbor) {
            Some(entry) => {
                if seq > entry.last_seq {
                    let missed = (seq - entry.last_seq - 1).min(MAX_COUNTED_MISSES);
                    let decay = (1.0 - alpha).powi(missed as i32);
                    entry.quality = entry.quality * decay * (1.0 - alpha) + alpha;
                } else if seq < entry.last_seq {
                    // Sequence restarted (neighbor rebooted); keep the estimate
                    entry.quality = entry.quality * (1.0 - alpha) + alpha;
                }
                entry.last_seq = seq;
                entry.last_seen = now;
                entry.beacons_received += 1;
                NeighborChange::Refreshed
            }
            None => {
                self.entries.insert(
                    neighbor,
                    NeighborEntry {
                        neighbor,
                        last_seen: now,
                        quality: 1.0,
                        last_seq: seq,
                        beacons_received: 1,
                    },
                );
                NeighborChange::Discovered
            }
        }
    }

    /// Remove neighbors silent for longer than `timeout`, returning them
    pub fn expire(&mut self, now: SimTime, timeout: Duration) -> Vec<NodeId> {
        let expired: Vec<NodeId> = self
            .entries
            .values()
            .filter(|e| now.saturating_duration_since(e.last_seen) > timeout)
            .map(|e| e.neighbor)
            .collect();
        for neighbor in &expired {
            self.entries.remove(neighbor);
        }
        expired
    }

    pub fn get(&self, neighbor: NodeId) -> Option<&NeighborEntry> {
        self.entries.get(&neighbor)
    }

    pub fn contains(&self, neighbor: NodeId) -> bool {
        self.entries.contains_key(&neighbor)
    }

    /// Quality estimate for a neighbor, if known
    pub fn quality(&self, neighbor: NodeId) -> Option<f64> {
        self.entries.get(&neighbor).map(|e| e.quality)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.values()
    }

    /// Copy of every entry, ordered by neighbor id
    pub fn snapshot(&self) -> Vec<NeighborEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Discovery state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryState {
    Idle,
    Beaconing,
}

/// Periodic beaconing state machine for one node
#[derive(Debug)]
pub struct NeighborDiscovery {
    config: NeighborConfig,
    state: DiscoveryState,
    table: NeighborTable,
    next_seq: u32,
    timer: Option<TimerId>,
    beacons_sent: u64,
}

impl NeighborDiscovery {
    pub fn new(config: NeighborConfig) -> Self {
        Self {
            config,
            state: DiscoveryState::Idle,
            table: NeighborTable::new(),
            next_seq: 0,
            timer: None,
            beacons_sent: 0,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn table(&self) -> &NeighborTable {
        &self.table
    }

    pub fn config(&self) -> &NeighborConfig {
        &self.config
    }

    pub fn beacons_sent(&self) -> u64 {
        self.beacons_sent
    }

    /// Start beaconing
    ///
    /// The first beacon goes out at a random offset within one interval so
    /// nodes booted together do not beacon in lockstep.
    pub fn start<E: NodeEnv>(&mut self, env: &mut E) {
        if self.state == DiscoveryState::Beaconing {
            return;
        }
        self.state = DiscoveryState::Beaconing;
        let offset = self.config.beacon_interval.mul_f64(env.random_unit());
        self.timer = Some(env.set_timer(offset, TimerKind::Beacon));
        debug!(node = %env.node(), offset = ?offset, "Neighbor discovery started");
    }

    /// Stop beaconing, cancel the pending beacon, and forget all neighbors
    pub fn stop<E: NodeEnv>(&mut self, env: &mut E) {
        if let Some(timer) = self.timer.take() {
            env.cancel_timer(timer);
        }
        self.state = DiscoveryState::Idle;
        self.table.clear();
        debug!(node = %env.node(), "Neighbor discovery stopped");
    }

    /// Beacon timer fired: broadcast, sweep, re-arm
    ///
    /// Returns the neighbors removed by the aging sweep.
    pub fn on_timer<E: NodeEnv>(&mut self, env: &mut E) -> Vec<NodeId> {
        if self.state != DiscoveryState::Beaconing {
            return Vec::new();
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        env.send(Destination::Broadcast, Channel::Neighbor, Message::Beacon { seq });
        self.beacons_sent += 1;
        trace!(node = %env.node(), seq, "Beacon sent");

        let expired = self.table.expire(env.now(), self.config.expire_after());
        for neighbor in &expired {
            debug!(node = %env.node(), neighbor = %neighbor, "Neighbor expired");
        }

        self.timer = Some(env.set_timer(self.config.beacon_interval, TimerKind::Beacon));
        expired
    }

    /// A beacon arrived from `from`
    ///
    /// Ignored while idle.
    pub fn on_beacon(&mut self, from: NodeId, seq: u32, now: SimTime) -> Option<NeighborChange> {
        if self.state != DiscoveryState::Beaconing {
            return None;
        }
        let change = self.table.observe(from, seq, now, self.config.ema_alpha);
        if change == NeighborChange::Discovered {
            debug!(neighbor = %from, at = %now, "Neighbor discovered");
        }
        Some(change)
    }

    /// Snapshot of the neighbor table; no side effects
    pub fn dump(&self) -> Vec<NeighborEntry> {
        self.table.snapshot()
    }
}
