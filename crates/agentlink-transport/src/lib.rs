//! Swappable frame transports for the agentlink bridge.
//!
//! Both transports speak the same contract: one [`agentlink_wire::FrameHeader`]
//! plus payload per send, delivered whole to an [`FrameHandler`] on a
//! background receive thread. The [`DataTransport`] trait is the seam that
//! lets the client swap UDP datagrams for the same-host shared-memory
//! channel without protocol changes; only latency, throughput, and the
//! same-host restriction differ.

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod shm;
pub mod traits;
pub mod udp;

pub use config::{create_transport, ShmConfig, ShmRole, ShmSide, TransportConfig, UdpConfig};
pub use error::{Result, TransportError};
#[cfg(unix)]
pub use shm::ShmTransport;
pub use traits::{now_ns, DataTransport, FrameHandler, TransportStats};
pub use udp::UdpTransport;
