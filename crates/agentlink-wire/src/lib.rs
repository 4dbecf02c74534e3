//! Wire-level codecs for the agentlink bridge protocol.
//!
//! Every exchange between the client and the Agent is one frame: a 24-byte
//! big-endian [`FrameHeader`] followed by `length` payload bytes. Control and
//! JSON-plane payloads are CBOR blobs; struct-plane payloads carry a
//! [`DataEnvelope`] sub-header in front of the raw struct bytes.
//!
//! This crate is pure data: no I/O, no threads, no allocation beyond the
//! output buffers handed in by callers.

pub mod envelope;
pub mod error;
pub mod frame;
pub mod hash;

pub use envelope::{
    DataEnvelope, DataRspStruct, ENVELOPE_MAGIC, ENVELOPE_SIZE, ENVELOPE_VERSION,
    KIND_EVENT, KIND_WRITE, RSP_STRUCT_SIZE,
};
pub use error::{Result, WireError};
pub use frame::{
    decode_frame, encode_frame, plane_of, role_of, FrameHeader, Plane, Role, HEADER_SIZE, MAGIC,
    TYPE_CTRL_EVT, TYPE_CTRL_REQ, TYPE_CTRL_RSP, TYPE_DATA_JSON_EVT, TYPE_DATA_JSON_REQ,
    TYPE_DATA_JSON_RSP, TYPE_DATA_STRUCT_EVT, TYPE_DATA_STRUCT_REQ, TYPE_DATA_STRUCT_RSP, VERSION,
};
pub use hash::fnv1a_32;
