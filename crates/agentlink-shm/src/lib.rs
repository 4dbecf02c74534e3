//! Shared-memory primitives for the agentlink SHM channel.
//!
//! Three layers, bottom up:
//! - [`ShmRegion`] / [`ShmNotify`]: platform glue. A named POSIX shared
//!   memory mapping and a named semaphore, with the creator/joiner
//!   asymmetry the channel contract requires. No protocol knowledge.
//! - [`layout`]: the `#[repr(C)]` structs that live inside the mapping
//!   (global header, per-ring header, per-record header), validated once
//!   at attach time.
//! - [`ShmRingSpsc`]: a single-producer/single-consumer lock-free byte
//!   ring over externally-owned memory, moving framed records with
//!   wraparound markers and drop accounting.
//!
//! The producer publishes `head` with a release store after all payload
//! bytes are written; the consumer acquires `head` before reading and
//! releases `tail` after. That pairing is the whole correctness argument
//! and must not be weakened.

pub mod error;
pub mod layout;
pub mod ring;

#[cfg(unix)]
pub mod notify;
#[cfg(unix)]
pub mod region;

pub use error::{Result, ShmError};
pub use layout::{
    align_record, region_size, ring_b_data_offset, RecordHdr, ShmGlobalHeader, ShmRingHeader,
    GLOBAL_HEADER_OFFSET, RECORD_ALIGN, RECORD_HDR_SIZE, RING_A_DATA_OFFSET, RING_A_HEADER_OFFSET,
    RING_B_HEADER_OFFSET, SHM_MAGIC, SHM_VERSION, STATE_READY, STATE_UNINIT,
};
pub use ring::{RingNotify, ShmRingSpsc};

#[cfg(unix)]
pub use notify::ShmNotify;
#[cfg(unix)]
pub use region::ShmRegion;
