//! Scripted driver sequences
//!
//! Each scenario replays a fixed series of driver calls against a
//! topology and noise model and returns what it observed. The CLI prints
//! the reports; the integration tests assert on them.

use motesim_core::{Channel, NodeId, SimResult, SimTime, TransportError};
use motesim_routing::NeighborEntry;
use motesim_transport::SessionState;
use serde::Serialize;
use tracing::info;

use crate::config::SimConfig;
use crate::simulation::Simulation;
use crate::topology::{NoiseSpec, TopologySpec};

/// Seconds left for neighbor discovery to settle before traffic starts
pub const STABILIZE_SECS: u64 = 60;
/// Seconds given to each transport phase
pub const PHASE_SECS: u64 = 10;
/// Seconds between per-node neighbor dumps
pub const DUMP_INTERVAL_SECS: u64 = 20;

/// Build a simulation with every channel enabled and every node booted
pub fn prepare(config: SimConfig, topology: TopologySpec, noise: Option<NoiseSpec>) -> SimResult<Simulation> {
    let mut sim = Simulation::new(config);
    sim.load_topology(topology)?;
    if let Some(noise) = noise {
        sim.load_noise(noise)?;
    }
    sim.boot_all()?;
    for channel in Channel::ALL {
        sim.add_channel(channel);
    }
    Ok(sim)
}

/// One neighbor dump taken during the discovery scenario
#[derive(Debug, Clone, Serialize)]
pub struct NeighborSnapshot {
    pub node: NodeId,
    pub at: SimTime,
    pub neighbors: Vec<NeighborEntry>,
}

/// Boot everything, let beacons run, then dump each node's table in turn
pub fn run_neighbor_discovery(
    config: SimConfig,
    topology: TopologySpec,
    noise: Option<NoiseSpec>,
) -> SimResult<(Simulation, Vec<NeighborSnapshot>)> {
    info!("=== Running neighbor discovery scenario ===");
    let mut sim = Simulation::new(config);
    // The network sits powered off for a moment before anything is loaded
    sim.run_time(1)?;
    sim.load_topology(topology)?;
    if let Some(noise) = noise {
        sim.load_noise(noise)?;
    }
    sim.boot_all()?;
    for channel in Channel::ALL {
        sim.add_channel(channel);
    }
    sim.run_time(2 * PHASE_SECS)?;

    let mut snapshots = Vec::new();
    for node in sim.node_ids() {
        let neighbors = sim.neighbor_discovery_dump(node)?;
        snapshots.push(NeighborSnapshot {
            node,
            at: sim.now(),
            neighbors,
        });
        sim.run_time(DUMP_INTERVAL_SECS)?;
    }
    sim.run_time(PHASE_SECS)?;
    info!(stats = ?sim.stats(), "Neighbor discovery scenario complete");
    Ok((sim, snapshots))
}

/// What the transport scenario observed
#[derive(Debug, Clone, Serialize)]
pub struct TcpReport {
    pub src: NodeId,
    pub dst: NodeId,
    pub path: Option<Vec<NodeId>>,
    pub after_open: SessionState,
    pub responder_after_open: SessionState,
    pub after_close: SessionState,
    pub responder_after_close: SessionState,
    #[serde(skip)]
    pub failures: Vec<(NodeId, TransportError)>,
}

impl TcpReport {
    /// Opened, then closed on both ends, with no session failures
    pub fn succeeded(&self) -> bool {
        self.after_open == SessionState::Established
            && self.after_close == SessionState::Closed
            && self.responder_after_close == SessionState::Closed
            && self.failures.is_empty()
    }
}

/// Stabilize, open a session, then tear it down
pub fn run_tcp(
    config: SimConfig,
    topology: TopologySpec,
    noise: Option<NoiseSpec>,
    src: NodeId,
    dst: NodeId,
) -> SimResult<(Simulation, TcpReport)> {
    info!(src = %src, dst = %dst, "=== Running transport scenario ===");
    let mut sim = Simulation::new(config);
    sim.run_time(PHASE_SECS)?;
    sim.load_topology(topology)?;
    if let Some(noise) = noise {
        sim.load_noise(noise)?;
    }
    sim.boot_all()?;
    for channel in Channel::ALL {
        sim.add_channel(channel);
    }
    sim.run_time(STABILIZE_SECS)?;
    let path = sim.route_path(src, dst).ok();
    info!(path = ?path, "Route before opening");

    sim.initiate_tcp(src, dst)?;
    sim.run_time(PHASE_SECS)?;
    let after_open = sim.session_state(src, src, dst)?;
    let responder_after_open = sim.session_state(dst, src, dst)?;
    info!(initiator = ?after_open, responder = ?responder_after_open, "Session after open");

    sim.kill_tcp(src, dst)?;
    sim.run_time(PHASE_SECS)?;
    let after_close = sim.session_state(src, src, dst)?;
    let responder_after_close = sim.session_state(dst, src, dst)?;
    info!(initiator = ?after_close, responder = ?responder_after_close, "Session after close");

    let failures = sim.drain_session_failures();
    let report = TcpReport {
        src,
        dst,
        path,
        after_open,
        responder_after_open,
        after_close,
        responder_after_close,
        failures,
    };
    Ok((sim, report))
}
