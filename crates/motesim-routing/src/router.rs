//! Distance-vector router
//!
//! The [`DistanceVectorRouter`] keeps a node's [`RoutingTable`] in step
//! with its neighbor table and with the tables its neighbors advertise on
//! the ROUTING channel.
//!
//! ## Relaxation
//!
//! 1. **DIRECT**: every neighbor is a one-hop route weighted by its quality estimate
//! 2. **ADVERT**: neighbor X advertising `(dest, hops, q)` offers `(hops + 1, q * q(X))` via X
//! 3. **SPLIT HORIZON**: rows whose next hop is this node are ignored
//! 4. **UNREACHABLE**: candidates at or beyond `max_hops` withdraw the route through X

use std::time::Duration;

use motesim_core::{
    AdvertEntry, Channel, Destination, Message, NodeEnv, NodeId, RoutingError, SimTime, TimerId,
    TimerKind,
};
use tracing::{debug, trace};

use crate::neighbor::{NeighborEntry, NeighborTable};
use crate::table::{RouteEntry, RouteUpdate, RoutingTable};

/// Configuration for the distance-vector router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Period between table advertisements
    pub advert_interval: Duration,
    /// Stale window as a multiple of the advert interval
    pub stale_multiplier: u32,
    /// Hop count treated as unreachable
    pub max_hops: u8,
}

impl RouterConfig {
    pub fn stale_after(&self) -> Duration {
        self.advert_interval * self.stale_multiplier
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            advert_interval: Duration::from_secs(1),
            stale_multiplier: 3,
            max_hops: 16,
        }
    }
}

/// Distance-vector routing state for one node
#[derive(Debug)]
pub struct DistanceVectorRouter {
    node: NodeId,
    config: RouterConfig,
    table: RoutingTable,
    timer: Option<TimerId>,
    adverts_sent: u64,
}

impl DistanceVectorRouter {
    pub fn new(node: NodeId, config: RouterConfig) -> Self {
        let table = RoutingTable::new(config.stale_after());
        Self {
            node,
            config,
            table,
            timer: None,
            adverts_sent: 0,
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn adverts_sent(&self) -> u64 {
        self.adverts_sent
    }

    /// Arm the advertisement timer at a random offset within one interval
    pub fn start<E: NodeEnv>(&mut self, env: &mut E) {
        if self.timer.is_some() {
            return;
        }
        let offset = self.config.advert_interval.mul_f64(env.random_unit());
        self.timer = Some(env.set_timer(offset, TimerKind::RouteAdvert));
    }

    /// Cancel the advertisement timer and drop every route
    pub fn stop<E: NodeEnv>(&mut self, env: &mut E) {
        if let Some(timer) = self.timer.take() {
            env.cancel_timer(timer);
        }
        self.table.clear();
    }

    /// Next hop toward `destination`
    ///
    /// A miss is [`RoutingError::NoRoute`]; callers retry once the tables
    /// have had time to converge.
    pub fn route(&self, destination: NodeId) -> Result<NodeId, RoutingError> {
        if destination == self.node {
            return Err(RoutingError::NoRoute {
                from: self.node,
                to: destination,
            });
        }
        self.table
            .get(destination)
            .map(|entry| entry.next_hop)
            .ok_or(RoutingError::NoRoute {
                from: self.node,
                to: destination,
            })
    }

    /// A neighbor was discovered or refreshed: install the direct route
    pub fn on_neighbor(&mut self, neighbor: &NeighborEntry, now: SimTime) {
        let direct = RouteEntry {
            destination: neighbor.neighbor,
            next_hop: neighbor.neighbor,
            hop_count: 1,
            quality: neighbor.quality,
            updated_at: now,
        };
        if self.table.offer(direct) == RouteUpdate::Added {
            debug!(node = %self.node, neighbor = %neighbor.neighbor, "Direct route added");
        }
    }

    /// A neighbor expired: withdraw it and every route through it
    pub fn on_neighbor_lost(&mut self, neighbor: NodeId) -> Vec<NodeId> {
        let mut dropped = self.table.remove_via(neighbor);
        if self.table.remove(neighbor).is_some() {
            dropped.push(neighbor);
        }
        if !dropped.is_empty() {
            debug!(node = %self.node, neighbor = %neighbor, routes = dropped.len(), "Routes withdrawn");
        }
        dropped
    }

    /// Relax the table against an advertisement from `from`
    ///
    /// Adverts from nodes that are not current neighbors are ignored.
    /// Returns the number of routes added or replaced.
    pub fn on_advert(
        &mut self,
        from: NodeId,
        entries: &[AdvertEntry],
        neighbors: &NeighborTable,
        now: SimTime,
    ) -> usize {
        let Some(link_quality) = neighbors.quality(from) else {
            trace!(node = %self.node, from = %from, "Advert from non-neighbor ignored");
            return 0;
        };

        let mut changed = 0;
        for entry in entries {
            if entry.destination == self.node || entry.next_hop == self.node {
                continue;
            }
            let hop_count = entry.hop_count.saturating_add(1);
            if hop_count >= self.config.max_hops {
                let via_sender = self
                    .table
                    .get(entry.destination)
                    .is_some_and(|current| current.next_hop == from);
                if via_sender {
                    self.table.remove(entry.destination);
                }
                continue;
            }
            let candidate = RouteEntry {
                destination: entry.destination,
                next_hop: from,
                hop_count,
                quality: entry.quality * link_quality,
                updated_at: now,
            };
            match self.table.offer(candidate) {
                RouteUpdate::Added | RouteUpdate::Replaced => changed += 1,
                RouteUpdate::Refreshed | RouteUpdate::Rejected => {}
            }
        }
        if changed > 0 {
            debug!(node = %self.node, from = %from, changed, "Routes relaxed from advert");
        }
        changed
    }

    /// Advert timer fired: purge stale routes, broadcast the table, re-arm
    pub fn on_timer<E: NodeEnv>(&mut self, env: &mut E) -> Vec<NodeId> {
        let purged = self.table.prune_stale(env.now());
        for destination in &purged {
            debug!(node = %self.node, destination = %destination, "Stale route purged");
        }

        let entries: Vec<AdvertEntry> = self
            .table
            .entries()
            .map(|route| AdvertEntry {
                destination: route.destination,
                next_hop: route.next_hop,
                hop_count: route.hop_count,
                quality: route.quality,
            })
            .collect();
        if !entries.is_empty() {
            env.send(
                Destination::Broadcast,
                Channel::Routing,
                Message::RouteAdvert { entries },
            );
            self.adverts_sent += 1;
        }

        self.timer = Some(env.set_timer(self.config.advert_interval, TimerKind::RouteAdvert));
        purged
    }
}
