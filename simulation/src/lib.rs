//! # motesim
//!
//! A discrete-event wireless sensor-network simulator.
//!
//! ## Overview
//!
//! Motes are placed on a topology of lossy links and exchange frames on
//! logical channels. Every node runs the same protocol stack:
//!
//! - **Neighbor discovery**: periodic beacons build an aging neighbor table
//! - **Distance-vector routing**: adverts relax a per-node routing table
//! - **Flooding**: sequence-number duplicate suppression when no route exists
//! - **Transport**: a TCP-like session state machine with retransmission
//!
//! ## Architecture
//!
//! - **Topology** (`topology.rs`): topology and noise descriptions, link quality
//! - **Bus** (`bus.rs`): per-channel delivery with loss and delay
//! - **Node** (`node.rs`): one mote's protocol state and event handlers
//! - **Simulation** (`simulation.rs`): the driver API over the event clock
//! - **Trace** (`trace.rs`): deterministic event log and run statistics
//! - **Scenarios** (`scenarios.rs`): scripted driver sequences
//!
//! ## Example: two-node session
//!
//! ```rust,no_run
//! use motesim::{SimConfig, Simulation, TopologySpec};
//! use motesim_core::{Channel, NodeId};
//! use motesim_transport::SessionState;
//!
//! # fn main() -> Result<(), motesim_core::SimError> {
//! let (a, b) = (NodeId::new(1).unwrap(), NodeId::new(2).unwrap());
//! let mut sim = Simulation::new(SimConfig::default());
//! sim.load_topology(TopologySpec::from_links(&[(1, 2, 1.0)])?)?;
//! sim.boot_all()?;
//! for channel in Channel::ALL {
//!     sim.add_channel(channel);
//! }
//!
//! sim.initiate_tcp(a, b)?;
//! sim.run_time(10)?;
//! assert_eq!(sim.session_state(a, a, b)?, SessionState::Established);
//!
//! sim.kill_tcp(a, b)?;
//! sim.run_time(10)?;
//! assert_eq!(sim.session_state(a, a, b)?, SessionState::Closed);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod node;
pub mod scenarios;
pub mod simulation;
pub mod topology;
pub mod trace;

#[cfg(test)]
mod integration_scenarios;

pub use bus::{ChannelBus, DropReason, transmission_delay};
pub use config::{ConfigError, SimConfig, TransportSettings};
pub use node::{BootState, InboxEntry, Node, NodeStats, SimEvent};
pub use simulation::Simulation;
pub use topology::{LinkSignal, NoiseSpec, Topology, TopologySpec, gain_to_quality};
pub use trace::{EventLog, SimStats, TraceEvent, TraceRecord};
