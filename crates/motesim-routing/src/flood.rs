//! Duplicate suppression for flooded packets
//!
//! Each origin stamps its flooded packets with an increasing sequence
//! number. A node remembers, per origin, the highest sequence seen and a
//! bitmap of the [`FLOOD_WINDOW`] sequence numbers below it. A packet is
//! forwarded at most once; packets older than the window are dropped.

use std::collections::BTreeMap;

use motesim_core::NodeId;

/// Number of sequence numbers tracked per origin
pub const FLOOD_WINDOW: u32 = 64;

#[derive(Debug, Clone, Copy)]
struct OriginWindow {
    highest: u32,
    /// Bit `i` set means `highest - i` was seen
    seen: u64,
}

/// Per-node record of flooded packets already handled
#[derive(Debug, Clone, Default)]
pub struct FloodFilter {
    origins: BTreeMap<NodeId, OriginWindow>,
}

impl FloodFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(origin, seq)`; returns true only the first time it is seen
    pub fn check_and_record(&mut self, origin: NodeId, seq: u32) -> bool {
        let Some(window) = self.origins.get_mut(&origin) else {
            self.origins.insert(origin, OriginWindow { highest: seq, seen: 1 });
            return true;
        };

        if seq > window.highest {
            let shift = seq - window.highest;
            window.seen = if shift >= FLOOD_WINDOW { 0 } else { window.seen << shift };
            window.seen |= 1;
            window.highest = seq;
            return true;
        }

        let offset = window.highest - seq;
        if offset >= FLOOD_WINDOW {
            return false;
        }
        let bit = 1u64 << offset;
        if window.seen & bit != 0 {
            return false;
        }
        window.seen |= bit;
        true
    }

    /// Forget everything (node power-off)
    pub fn clear(&mut self) {
        self.origins.clear();
    }
}
