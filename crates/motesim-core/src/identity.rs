//! Node identity
//!
//! Motes are addressed by small positive integers, matching the numbering
//! used in topology files (`1`, `2`, ...). Zero is reserved and rejected.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Unique identifier for a mote in the simulated network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u16);

impl NodeId {
    /// Create a node id, rejecting zero
    pub fn new(id: u16) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    /// Generate ids `1..=count`
    pub fn range_to(count: u16) -> Vec<Self> {
        (1..=count).map(Self).collect()
    }

    /// Get the raw numeric id
    pub fn get(self) -> u16 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u16 = s.trim().parse().map_err(|_| TopologyError::InvalidNodeId {
            raw: s.trim().to_string(),
        })?;
        Self::new(raw).ok_or_else(|| TopologyError::InvalidNodeId {
            raw: s.trim().to_string(),
        })
    }
}

impl TryFrom<u16> for NodeId {
    type Error = TopologyError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(TopologyError::InvalidNodeId {
            raw: value.to_string(),
        })
    }
}
