//! Channel bus
//!
//! Per-channel delivery fabric. A frame sent on a channel reaches only
//! nodes subscribed to it, and only across links of the resolved
//! [`Topology`]. Each attempt is an independent Bernoulli trial on the
//! link's delivery probability; a success arrives after a quality-dependent
//! delay, a failure is a silent drop.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use motesim_core::{Channel, Destination, NodeId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::topology::Topology;

/// Fixed part of every hop's latency
const BASE_DELAY: Duration = Duration::from_millis(5);
/// Extra latency spread on a link of quality 0
const JITTER_SPAN: Duration = Duration::from_millis(20);

/// Hop latency for a link of quality `q`, given a uniform sample `u`
///
/// Higher quality means lower variance; `q = 1` is always [`BASE_DELAY`].
pub fn transmission_delay(quality: f64, u: f64) -> Duration {
    BASE_DELAY + JITTER_SPAN.mul_f64(u * (1.0 - quality.clamp(0.0, 1.0)))
}

/// One receiver reached by a transmission
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: NodeId,
    pub delay: Duration,
}

/// Why an attempt did not produce an arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The Bernoulli trial failed
    LinkLoss,
    /// No link between sender and receiver
    NoLink,
    /// Receiver not subscribed to the channel
    Unsubscribed,
    /// Channel not enabled
    ChannelDisabled,
    /// Receiver powered off while the frame was in flight
    ReceiverDown,
}

/// Outcome of one send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transmission {
    pub deliveries: Vec<Delivery>,
    pub drops: Vec<(NodeId, DropReason)>,
}

/// Channel subscriptions
#[derive(Debug, Clone, Default)]
pub struct ChannelBus {
    enabled: BTreeSet<Channel>,
    subscriptions: BTreeMap<Channel, BTreeSet<NodeId>>,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable cross-node delivery on a channel; returns false if already enabled
    pub fn enable(&mut self, channel: Channel) -> bool {
        self.enabled.insert(channel)
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled.contains(&channel)
    }

    pub fn enabled_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.enabled.iter().copied()
    }

    /// Register a node as a receiver on a channel
    ///
    /// Boot state is checked by the driver before calling this.
    pub fn subscribe(&mut self, node: NodeId, channel: Channel) -> bool {
        self.subscriptions.entry(channel).or_default().insert(node)
    }

    /// Drop every subscription a node holds
    pub fn unsubscribe_all(&mut self, node: NodeId) {
        for subscribers in self.subscriptions.values_mut() {
            subscribers.remove(&node);
        }
    }

    pub fn is_subscribed(&self, node: NodeId, channel: Channel) -> bool {
        self.subscriptions
            .get(&channel)
            .is_some_and(|subscribers| subscribers.contains(&node))
    }

    /// Channels a node is subscribed to
    pub fn channels_of(&self, node: NodeId) -> Vec<Channel> {
        self.subscriptions
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(&node))
            .map(|(channel, _)| *channel)
            .collect()
    }

    /// Decide which receivers a frame reaches
    ///
    /// Unicast is one trial on the `(from, to)` link. Broadcast is one
    /// independent trial per subscribed linked neighbor, in ascending id
    /// order, so the generator is consumed identically on every replay.
    pub fn transmit(
        &self,
        topology: &Topology,
        rng: &mut ChaCha8Rng,
        from: NodeId,
        destination: Destination,
        channel: Channel,
    ) -> Transmission {
        let mut outcome = Transmission::default();
        let receivers: Vec<NodeId> = match destination {
            Destination::Unicast(to) => vec![to],
            Destination::Broadcast => topology
                .neighbors(from)
                .filter(|n| self.is_subscribed(*n, channel))
                .collect(),
        };

        for to in receivers {
            if !self.is_enabled(channel) {
                outcome.drops.push((to, DropReason::ChannelDisabled));
                continue;
            }
            if !self.is_subscribed(to, channel) {
                outcome.drops.push((to, DropReason::Unsubscribed));
                continue;
            }
            let Some(probability) = topology.delivery_probability(from, to) else {
                outcome.drops.push((to, DropReason::NoLink));
                continue;
            };
            if rng.random::<f64>() >= probability {
                outcome.drops.push((to, DropReason::LinkLoss));
                continue;
            }
            let quality = topology.base_quality(from, to).unwrap_or(0.0);
            let delay = transmission_delay(quality, rng.random::<f64>());
            outcome.deliveries.push(Delivery { to, delay });
        }
        outcome
    }
}
