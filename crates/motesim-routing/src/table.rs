//! Routing table
//!
//! The [`RoutingTable`] holds one route per destination. Routes carry the
//! virtual time they were last refreshed; anything older than the stale
//! timeout is purged on the next sweep.

use std::collections::BTreeMap;
use std::time::Duration;

use motesim_core::{NodeId, SimTime};
use serde::{Deserialize, Serialize};

/// A route to one destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    pub hop_count: u8,
    /// Product of link-quality estimates along the path
    pub quality: f64,
    pub updated_at: SimTime,
}

impl RouteEntry {
    /// Fewer hops wins; equal hops fall back to the better quality product
    pub fn is_better_than(&self, other: &RouteEntry) -> bool {
        self.hop_count < other.hop_count
            || (self.hop_count == other.hop_count && self.quality > other.quality)
    }
}

/// Outcome of offering a candidate route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// No previous route existed
    Added,
    /// A different route was replaced
    Replaced,
    /// The same next hop re-advertised the route
    Refreshed,
    /// The existing route is preferred
    Rejected,
}

/// Per-node routing table
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: BTreeMap<NodeId, RouteEntry>,
    stale_timeout: Duration,
}

impl RoutingTable {
    /// Create a table whose routes go stale after `stale_timeout`
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            routes: BTreeMap::new(),
            stale_timeout,
        }
    }

    /// Insert or overwrite the route to a destination
    pub fn insert(&mut self, entry: RouteEntry) {
        self.routes.insert(entry.destination, entry);
    }

    /// Offer a candidate route, applying the preference policy
    ///
    /// A candidate from the current next hop always replaces the existing
    /// entry, so a worsening path propagates instead of lingering.
    pub fn offer(&mut self, candidate: RouteEntry) -> RouteUpdate {
        match self.routes.get_mut(&candidate.destination) {
            None => {
                self.routes.insert(candidate.destination, candidate);
                RouteUpdate::Added
            }
            Some(current) if current.next_hop == candidate.next_hop => {
                *current = candidate;
                RouteUpdate::Refreshed
            }
            Some(current) if candidate.is_better_than(current) => {
                *current = candidate;
                RouteUpdate::Replaced
            }
            Some(_) => RouteUpdate::Rejected,
        }
    }

    pub fn get(&self, destination: NodeId) -> Option<&RouteEntry> {
        self.routes.get(&destination)
    }

    pub fn remove(&mut self, destination: NodeId) -> Option<RouteEntry> {
        self.routes.remove(&destination)
    }

    /// Whether the route to `destination` is missing or older than the stale timeout
    pub fn is_stale(&self, destination: NodeId, now: SimTime) -> bool {
        match self.routes.get(&destination) {
            None => true,
            Some(entry) => now.saturating_duration_since(entry.updated_at) > self.stale_timeout,
        }
    }

    /// Remove every stale route, returning the destinations dropped
    pub fn prune_stale(&mut self, now: SimTime) -> Vec<NodeId> {
        let timeout = self.stale_timeout;
        let stale: Vec<NodeId> = self
            .routes
            .values()
            .filter(|e| now.saturating_duration_since(e.updated_at) > timeout)
            .map(|e| e.destination)
            .collect();
        for destination in &stale {
            self.routes.remove(destination);
        }
        stale
    }

    /// Remove every route through `next_hop`, returning the destinations dropped
    pub fn remove_via(&mut self, next_hop: NodeId) -> Vec<NodeId> {
        let affected: Vec<NodeId> = self
            .routes
            .values()
            .filter(|e| e.next_hop == next_hop)
            .map(|e| e.destination)
            .collect();
        for destination in &affected {
            self.routes.remove(destination);
        }
        affected
    }

    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    /// Copy of every route, ordered by destination
    pub fn snapshot(&self) -> Vec<RouteEntry> {
        self.routes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }
}
