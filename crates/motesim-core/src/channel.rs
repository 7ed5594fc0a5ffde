//! Logical delivery channels
//!
//! Every frame on the shared medium is tagged with a channel. Nodes
//! subscribe per channel, and the bus only delivers a frame to
//! subscribers of its channel.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A logical multiplexing domain on the shared medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// Driver commands injected into a node
    Command,
    /// Routed application traffic (pings, transport segments)
    General,
    /// Distance-vector route advertisements
    Routing,
    /// Flooded traffic for destinations without a route
    Flooding,
    /// Neighbor discovery beacons
    Neighbor,
}

impl Channel {
    /// All channels, in declaration order
    pub const ALL: [Channel; 5] = [
        Channel::Command,
        Channel::General,
        Channel::Routing,
        Channel::Flooding,
        Channel::Neighbor,
    ];

    /// Name used in traces and on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Command => "COMMAND",
            Channel::General => "GENERAL",
            Channel::Routing => "ROUTING",
            Channel::Flooding => "FLOODING",
            Channel::Neighbor => "NEIGHBOR",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a channel name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let normalized = normalized.trim_end_matches("_CHANNEL");
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse() {
        assert_eq!("neighbor".parse::<Channel>().unwrap(), Channel::Neighbor);
        assert_eq!("ROUTING_CHANNEL".parse::<Channel>().unwrap(), Channel::Routing);
        assert!("radio".parse::<Channel>().is_err());
    }

    #[test]
    fn test_channel_display_roundtrip() {
        for channel in Channel::ALL {
            assert_eq!(channel.to_string().parse::<Channel>().unwrap(), channel);
        }
    }
}
