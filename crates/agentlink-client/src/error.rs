/// Errors surfaced synchronously by client operations.
///
/// Asynchronous outcomes (reply received, timed out, rejected by the peer)
/// are delivered through the per-request callback, never through this type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A caller-supplied argument was rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying transport refused or failed the operation.
    #[error("transport error: {0}")]
    Transport(#[from] agentlink_transport::TransportError),

    /// Frame or envelope encoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] agentlink_wire::WireError),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// No type adapter is registered for the requested topic/type.
    #[error("no type adapter registered for {topic}/{type_name}")]
    AdapterMissing { topic: String, type_name: String },

    /// A background thread could not be spawned.
    #[error("thread spawn failed: {0}")]
    Thread(#[from] std::io::Error),

    /// The client has been shut down.
    #[error("client is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
