use std::net::SocketAddr;

use crate::error::{Result, TransportError};
#[cfg(unix)]
use crate::shm::ShmTransport;
use crate::traits::DataTransport;
use crate::udp::UdpTransport;

/// Which end of the bridge this process is.
///
/// The two sides push and drain opposite rings: the agent sends on ring B
/// and receives on ring A, the legacy side the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmSide {
    Agent,
    Legacy,
}

/// Who owns the region lifecycle. The creator initializes the layout and
/// unlinks the names on close; joiners attach to what the creator built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmRole {
    Creator,
    Joiner,
}

/// Shared-memory channel parameters. Both ends must agree on every field
/// except `side`/`role`; a mismatch is a hard open failure.
#[derive(Debug, Clone)]
pub struct ShmConfig {
    /// POSIX shm object name, e.g. `/agentlink_chan0`.
    pub shm_name: String,
    /// Semaphore name for the legacy-to-agent direction (ring A).
    pub notify_la: String,
    /// Semaphore name for the agent-to-legacy direction (ring B).
    pub notify_al: String,
    /// Per-direction ring data size in bytes; must be a multiple of 16.
    pub ring_bytes: u32,
    /// Largest accepted frame (header + payload) in bytes.
    pub max_frame: u32,
    pub side: ShmSide,
    pub role: ShmRole,
    /// Receive-thread semaphore wait per iteration; 0 = wait forever.
    pub wait_ms: u32,
    /// Joiner-side bound on waiting for the creator to mark the region
    /// ready.
    pub ready_timeout_ms: u32,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            shm_name: "/agentlink".into(),
            notify_la: "/agentlink_la".into(),
            notify_al: "/agentlink_al".into(),
            ring_bytes: 64 * 1024,
            max_frame: 4096,
            side: ShmSide::Agent,
            role: ShmRole::Joiner,
            wait_ms: 100,
            ready_timeout_ms: 2000,
        }
    }
}

/// Connected-datagram channel parameters.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    /// Socket read timeout driving the receive loop's stop-flag checks.
    pub recv_timeout_ms: u32,
    /// Largest accepted payload in bytes.
    pub max_frame: u32,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            local_addr: "0.0.0.0:0".parse().unwrap_or_else(|_| unreachable!()),
            remote_addr: "127.0.0.1:7400".parse().unwrap_or_else(|_| unreachable!()),
            recv_timeout_ms: 100,
            max_frame: 4096,
        }
    }
}

/// Transport selection made by the embedding application.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Udp(UdpConfig),
    Shm(ShmConfig),
}

/// Build the configured transport behind the [`DataTransport`] seam.
pub fn create_transport(config: TransportConfig) -> Result<Box<dyn DataTransport>> {
    match config {
        TransportConfig::Udp(cfg) => {
            if cfg.max_frame == 0 {
                return Err(TransportError::InvalidConfig("max_frame must be > 0".into()));
            }
            Ok(Box::new(UdpTransport::new(cfg)))
        }
        TransportConfig::Shm(cfg) => {
            if cfg.max_frame == 0 {
                return Err(TransportError::InvalidConfig("max_frame must be > 0".into()));
            }
            if cfg.ring_bytes % 16 != 0 {
                return Err(TransportError::InvalidConfig(
                    "ring_bytes must be a multiple of 16".into(),
                ));
            }
            #[cfg(unix)]
            {
                Ok(Box::new(ShmTransport::new(cfg)))
            }
            #[cfg(not(unix))]
            {
                let _ = cfg;
                Err(TransportError::InvalidConfig(
                    "shared-memory transport requires a unix target".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_unaligned_ring() {
        let cfg = ShmConfig {
            ring_bytes: 4097,
            ..ShmConfig::default()
        };
        assert!(matches!(
            create_transport(TransportConfig::Shm(cfg)),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn factory_builds_udp() {
        let t = create_transport(TransportConfig::Udp(UdpConfig::default())).unwrap();
        assert!(!t.is_open());
        assert!(!t.is_running());
    }
}
