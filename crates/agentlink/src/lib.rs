//! Dual-transport IPC bridge between a legacy in-process module and an
//! out-of-process agent.
//!
//! agentlink carries CBOR control requests and JSON or raw-struct data
//! samples over either a UDP socket pair or a shared-memory ring pair, with
//! request correlation, timeouts, and topic-based event fan-out on top.
//!
//! # Crate Structure
//!
//! - [`wire`] — Frame header, data envelope, and topic hashing
//! - [`shm`] — Shared-memory region layout, SPSC rings, and semaphore wakeups
//! - [`transport`] — The [`transport::DataTransport`] seam and its UDP/SHM
//!   implementations
//! - [`client`] — Request/response correlation and pub/sub dispatch

pub mod logging;

/// Re-export wire types.
pub mod wire {
    pub use agentlink_wire::*;
}

/// Re-export shared-memory types.
pub mod shm {
    pub use agentlink_shm::*;
}

/// Re-export transport types.
pub mod transport {
    pub use agentlink_transport::*;
}

/// Re-export client types.
pub mod client {
    pub use agentlink_client::*;
}
