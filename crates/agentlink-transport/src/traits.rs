use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use agentlink_wire::FrameHeader;

use crate::error::Result;

/// Callback invoked on the transport's receive thread for every validated
/// inbound frame. The payload slice is valid only for the call's duration.
pub type FrameHandler = Arc<dyn Fn(&FrameHeader, &[u8]) + Send + Sync>;

/// Observability counters shared by both transports.
///
/// `epoch` is 0 for transports without a region epoch (UDP).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub epoch: u32,
    pub drops_tx: u64,
    pub drops_rx: u64,
}

/// The capability seam between the IPC client and a concrete transport.
///
/// Lifecycle: `set_on_frame` → `open` → `start` → (`send_frame` ...) →
/// `stop` → `close`. `stop` and `close` are idempotent. Implementations
/// must deliver each inbound frame exactly once and must never block in
/// `send_frame`.
pub trait DataTransport: Send {
    /// Acquire resources (socket / region / semaphores).
    fn open(&mut self) -> Result<()>;

    /// Release resources. Stops the receive thread first if needed.
    fn close(&mut self);

    /// Spawn the background receive thread.
    fn start(&mut self) -> Result<()>;

    /// Signal and join the receive thread.
    fn stop(&mut self);

    /// Register the inbound frame callback. Must be called before `start`.
    fn set_on_frame(&mut self, handler: FrameHandler);

    /// Frame and send one payload. Never blocks; a refused send surfaces
    /// as an error and the drop counters.
    fn send_frame(&self, frame_type: u16, corr_id: u32, payload: &[u8]) -> Result<()>;

    fn is_open(&self) -> bool;

    fn is_running(&self) -> bool;

    fn stats(&self) -> TransportStats;
}

/// Producer timestamp stamped into outbound frame headers.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
