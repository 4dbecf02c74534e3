/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Operation requires an opened transport.
    #[error("transport is not open")]
    NotOpen,

    /// `start` requires a frame handler to be registered first.
    #[error("no frame handler registered")]
    HandlerMissing,

    /// A socket operation failed.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Frame encoding/decoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] agentlink_wire::WireError),

    /// Shared-memory channel setup or operation failed.
    #[error("shm error: {0}")]
    Shm(#[from] agentlink_shm::ShmError),

    /// The outbound ring/socket refused the frame; it was dropped, not
    /// queued. Visible in the drop counters.
    #[error("outbound channel full, frame dropped")]
    ChannelFull,

    /// The configuration is rejected before any I/O.
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
