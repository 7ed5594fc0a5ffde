//! # motesim transport
//!
//! Reliable, ordered, connection-oriented sessions over best-effort
//! multi-hop delivery.
//!
//! ## Session Lifecycle
//!
//! ```text
//! initiate ──► SYN_SENT ──SYN-ACK──► ESTABLISHED ──kill──► CLOSING ──FIN-ACK──► CLOSED
//!                 │                       │                   │
//!                 └──retries exhausted────┴──► CLOSED         └──retries exhausted──► CLOSED
//! ```
//!
//! Data segments are numbered per session, acknowledged cumulatively, and
//! retransmitted with exponential backoff. The receiver buffers
//! out-of-order segments inside its receive window and hands data to the
//! application strictly in sequence order.
//!
//! The manager never blocks. Timeouts are timers armed through
//! [`TransportIo`](motesim_core::TransportIo) and every timer a session
//! owns is cancelled when the session closes.

pub mod manager;
pub mod session;

pub use manager::{ClosedSession, SessionManager};
pub use session::{CloseReason, Role, SessionInfo, SessionState, TransportConfig, TransportStats};

// Re-export core transport errors for convenience
pub use motesim_core::TransportError;
