//! # motesim core
//!
//! Foundational types shared by every layer of the motesim stack.
//!
//! ## Key Types
//!
//! - [`NodeId`]: Identifier of a simulated mote
//! - [`Channel`]: Logical delivery channel (COMMAND, GENERAL, ROUTING, FLOODING, NEIGHBOR)
//! - [`SimTime`]: Virtual time, advanced only by the driver
//! - [`EventClock`]: Discrete-event scheduler with FIFO tie-breaking and cancellation
//! - [`Message`]: Tagged variant carried by every frame on the shared medium
//!
//! ## Key Traits
//!
//! - [`NodeEnv`]: A node's only view of the simulator (send, timers, time)
//! - [`TransportIo`]: Routed segment output used by the transport layer

pub mod channel;
pub mod clock;
pub mod error;
pub mod identity;
pub mod message;
pub mod mock_env;
pub mod time;
pub mod traits;

pub use channel::*;
pub use clock::*;
pub use error::*;
pub use identity::*;
pub use message::*;
pub use mock_env::*;
pub use time::*;
pub use traits::*;
