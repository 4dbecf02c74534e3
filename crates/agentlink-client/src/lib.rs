//! Asynchronous IPC client for the agentlink bridge.
//!
//! Turns a [`agentlink_transport::DataTransport`] into a request/response
//! and publish/subscribe API: every operation allocates a correlation id,
//! registers a one-shot completion callback, and returns immediately. A
//! background sweeper expires requests whose reply never arrives, so no
//! callback is ever leaked. Events fan out to subscriptions by
//! `"topic/type"` key or topic hash, synchronously on the receive thread.

pub mod adapter;
pub mod client;
pub mod codec;
pub mod error;
pub mod pending;
pub mod request;
pub mod subs;

pub use adapter::{AdapterRegistry, TypeAdapter};
pub use client::{ClientConfig, ClientStats, IpcClient, DEFAULT_ABI_HASH};
pub use error::{ClientError, Result};
pub use pending::{PendingTable, ReplyCallback};
pub use request::{
    Event, Request, Response, Target, ERR_CLOSED, ERR_TIMEOUT, OP_CLEAR, OP_CREATE, OP_GET,
    OP_HELLO, OP_WRITE, PROTO_VERSION,
};
pub use subs::{EventCallback, SubscriptionTable, TypedEventCallback};
