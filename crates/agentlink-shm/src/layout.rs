//! Shared-memory resident layout.
//!
//! ```text
//! +--------------------------------------------------+ offset 0
//! | ShmGlobalHeader (padded to 64 bytes)             |
//! +--------------------------------------------------+ offset 64
//! | ShmRingHeader A  (legacy -> agent, 64 bytes)     |
//! +--------------------------------------------------+ offset 128
//! | ShmRingHeader B  (agent -> legacy, 64 bytes)     |
//! +--------------------------------------------------+ offset 192
//! | ring A data  (ring_bytes)                        |
//! +--------------------------------------------------+
//! | ring B data  (ring_bytes)                        |
//! +--------------------------------------------------+
//! ```
//!
//! The creator writes the global header once, initializes both ring
//! headers, then stores `state = STATE_READY` with release ordering.
//! Joiners spin on `state` with acquire loads, so every plain config
//! field is published before a joiner can read it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{Result, ShmError};

/// Global header magic: "ALNK".
pub const SHM_MAGIC: u32 = 0x414C_4E4B;

/// Layout revision; bumped on any incompatible change to these structs.
pub const SHM_VERSION: u16 = 1;

/// Region state: creator has not finished initialization.
pub const STATE_UNINIT: u32 = 0;
/// Region state: layout is initialized and rings are usable.
pub const STATE_READY: u32 = 1;

pub const GLOBAL_HEADER_OFFSET: usize = 0;
pub const RING_A_HEADER_OFFSET: usize = 64;
pub const RING_B_HEADER_OFFSET: usize = 128;
pub const RING_A_DATA_OFFSET: usize = 192;

/// Record header size preceding each framed payload in a ring.
pub const RECORD_HDR_SIZE: usize = 12;

/// Records are padded out to this alignment inside the ring.
pub const RECORD_ALIGN: usize = 16;

/// Total region size for the agreed per-direction ring size.
pub const fn region_size(ring_bytes: usize) -> usize {
    RING_A_DATA_OFFSET + 2 * ring_bytes
}

/// Byte offset of ring B's data area.
pub const fn ring_b_data_offset(ring_bytes: usize) -> usize {
    RING_A_DATA_OFFSET + ring_bytes
}

/// Round a record cost up to the ring's record alignment.
pub const fn align_record(len: usize) -> usize {
    (len + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

/// Written once by the creator; read-only for joiners.
#[repr(C, align(64))]
pub struct ShmGlobalHeader {
    pub magic: u32,
    pub version: u16,
    _pad: u16,
    /// `STATE_UNINIT` until the creator finishes layout initialization.
    pub state: AtomicU32,
    /// Bumped each time a creator re-initializes an existing region, so a
    /// stale joiner can detect discontinuity.
    pub epoch: AtomicU32,
    pub ring_bytes: u32,
    pub max_frame: u32,
}

impl ShmGlobalHeader {
    /// Initialize in place. `prev_epoch` is the epoch salvaged from an
    /// earlier creator run of the same channel (0 for a first run); the new
    /// region carries `prev_epoch + 1` so a stale joiner can detect the
    /// discontinuity.
    ///
    /// # Safety
    /// `ptr` must point to at least 64 writable bytes with 64-byte alignment,
    /// and no other thread or process may touch them during the call.
    pub unsafe fn init(
        ptr: *mut u8,
        ring_bytes: u32,
        max_frame: u32,
        prev_epoch: u32,
    ) -> &'static ShmGlobalHeader {
        let hdr = &mut *(ptr as *mut ShmGlobalHeader);
        hdr.magic = SHM_MAGIC;
        hdr.version = SHM_VERSION;
        hdr._pad = 0;
        hdr.ring_bytes = ring_bytes;
        hdr.max_frame = max_frame;
        hdr.epoch.store(prev_epoch.wrapping_add(1), Ordering::Relaxed);
        hdr.state.store(STATE_UNINIT, Ordering::Relaxed);
        hdr
    }

    /// Overlay an existing header without mutating it.
    ///
    /// # Safety
    /// `ptr` must point to at least 64 readable bytes with 64-byte alignment
    /// that stay mapped for `'static` use by the caller's owner object.
    pub unsafe fn attach(ptr: *const u8) -> &'static ShmGlobalHeader {
        &*(ptr as *const ShmGlobalHeader)
    }

    /// Validate magic and version, then check the agreed channel contract.
    pub fn validate(&self, ring_bytes: u32, max_frame: u32) -> Result<()> {
        if self.magic != SHM_MAGIC {
            return Err(ShmError::BadMagic {
                found: self.magic,
                expected: SHM_MAGIC,
            });
        }
        if self.version != SHM_VERSION {
            return Err(ShmError::BadVersion {
                found: self.version,
                expected: SHM_VERSION,
            });
        }
        if self.ring_bytes != ring_bytes {
            return Err(ShmError::ConfigMismatch {
                field: "ring_bytes",
                ours: ring_bytes,
                theirs: self.ring_bytes,
            });
        }
        if self.max_frame != max_frame {
            return Err(ShmError::ConfigMismatch {
                field: "max_frame",
                ours: max_frame,
                theirs: self.max_frame,
            });
        }
        Ok(())
    }

    pub fn mark_ready(&self) {
        self.state.store(STATE_READY, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_READY
    }

    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Relaxed)
    }
}

/// Per-direction ring control block, cache-line aligned.
///
/// `head` is only ever advanced by the producer, `tail` only by the
/// consumer; the peer merely reads the other cursor. Cursors are byte
/// offsets into the ring's own data area.
#[repr(C, align(64))]
pub struct ShmRingHeader {
    pub head: AtomicU32,
    pub tail: AtomicU32,
    pub capacity: u32,
    _pad: u32,
    /// Producer-side drops (push refused for lack of space).
    pub drops: AtomicU64,
    /// Records pushed since initialization.
    pub seq: AtomicU64,
}

impl ShmRingHeader {
    /// Initialize in place.
    ///
    /// # Safety
    /// Same contract as [`ShmGlobalHeader::init`].
    pub unsafe fn init(ptr: *mut u8, capacity: u32) -> &'static ShmRingHeader {
        let hdr = &mut *(ptr as *mut ShmRingHeader);
        hdr.head = AtomicU32::new(0);
        hdr.tail = AtomicU32::new(0);
        hdr.capacity = capacity;
        hdr._pad = 0;
        hdr.drops = AtomicU64::new(0);
        hdr.seq = AtomicU64::new(0);
        hdr
    }

    /// Overlay an existing ring header.
    ///
    /// # Safety
    /// Same contract as [`ShmGlobalHeader::attach`].
    pub unsafe fn attach(ptr: *const u8) -> &'static ShmRingHeader {
        &*(ptr as *const ShmRingHeader)
    }
}

/// Header immediately preceding each framed payload in the ring.
///
/// `total_len == 0` designates a WRAP marker: the consumer resets its read
/// cursor to offset 0 and continues. `crc32` is reserved for end-to-end
/// record checksums and currently written as 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHdr {
    pub total_len: u32,
    pub seq: u32,
    pub crc32: u32,
}

const _: () = assert!(std::mem::size_of::<RecordHdr>() == RECORD_HDR_SIZE);
const _: () = assert!(std::mem::size_of::<ShmGlobalHeader>() == 64);
const _: () = assert!(std::mem::size_of::<ShmRingHeader>() == 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(64))]
    struct Backing([u8; 256]);

    #[test]
    fn init_and_validate() {
        let mut mem = Backing([0u8; 256]);
        let hdr = unsafe { ShmGlobalHeader::init(mem.0.as_mut_ptr(), 4096, 256, 0) };

        assert!(!hdr.is_ready());
        assert_eq!(hdr.epoch(), 1);
        hdr.validate(4096, 256).unwrap();

        hdr.mark_ready();
        assert!(hdr.is_ready());
    }

    #[test]
    fn reinit_bumps_epoch() {
        let mut mem = Backing([0u8; 256]);
        let first = unsafe { ShmGlobalHeader::init(mem.0.as_mut_ptr(), 4096, 256, 0) };
        let salvaged = first.epoch();
        assert_eq!(salvaged, 1);

        let second = unsafe { ShmGlobalHeader::init(mem.0.as_mut_ptr(), 4096, 256, salvaged) };
        assert_eq!(second.epoch(), 2);
    }

    #[test]
    fn validate_rejects_mismatches() {
        let mut mem = Backing([0u8; 256]);
        let hdr = unsafe { ShmGlobalHeader::init(mem.0.as_mut_ptr(), 4096, 256, 0) };

        assert!(matches!(
            hdr.validate(8192, 256),
            Err(ShmError::ConfigMismatch {
                field: "ring_bytes",
                ..
            })
        ));
        assert!(matches!(
            hdr.validate(4096, 512),
            Err(ShmError::ConfigMismatch {
                field: "max_frame",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_garbage() {
        let mem = Backing([0xA5u8; 256]);
        let hdr = unsafe { ShmGlobalHeader::attach(mem.0.as_ptr()) };
        assert!(matches!(
            hdr.validate(4096, 256),
            Err(ShmError::BadMagic { .. })
        ));
    }

    #[test]
    fn record_alignment() {
        assert_eq!(align_record(0), 0);
        assert_eq!(align_record(1), 16);
        assert_eq!(align_record(16), 16);
        assert_eq!(align_record(RECORD_HDR_SIZE + 100), 112);
    }

    #[test]
    fn region_sizing() {
        assert_eq!(region_size(4096), 192 + 8192);
        assert_eq!(ring_b_data_offset(4096), 192 + 4096);
    }
}
