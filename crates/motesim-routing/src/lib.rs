//! # motesim routing
//!
//! Per-node network layer for motesim.
//!
//! ## Core Components
//!
//! - [`NeighborDiscovery`]: Beacon state machine that builds and ages the [`NeighborTable`]
//! - [`DistanceVectorRouter`]: Relaxes a [`RoutingTable`] from neighbor data and adverts
//! - [`FloodFilter`]: Sequence-number duplicate suppression for flooded packets
//!
//! ## Routing Policy
//!
//! 1. **NEIGHBORS**: every live neighbor is a one-hop route
//! 2. **ADVERTS**: neighbors' tables are relaxed with split horizon
//! 3. **PREFERENCE**: fewest hops, then highest path-quality product
//! 4. **PURGE**: routes not refreshed within the stale window are dropped
//!
//! All components talk to the simulator only through
//! [`NodeEnv`](motesim_core::NodeEnv); none of them can reach another
//! node's state.

pub mod flood;
pub mod neighbor;
pub mod router;
pub mod table;

pub use flood::{FLOOD_WINDOW, FloodFilter};
pub use neighbor::{
    DiscoveryState, NeighborChange, NeighborConfig, NeighborDiscovery, NeighborEntry,
    NeighborTable,
};
pub use router::{DistanceVectorRouter, RouterConfig};
pub use table::{RouteEntry, RouteUpdate, RoutingTable};

// Re-export core routing errors for convenience
pub use motesim_core::RoutingError;
