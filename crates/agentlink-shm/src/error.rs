/// Errors that can occur in shared-memory channel setup and operation.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// The object name violates POSIX naming rules.
    #[error("invalid shared object name: {0}")]
    InvalidName(String),

    /// Failed to create the shared memory object.
    #[error("failed to create shared memory object: {0}")]
    SegmentCreate(std::io::Error),

    /// Failed to open an existing shared memory object.
    #[error("failed to open shared memory object: {0}")]
    SegmentOpen(std::io::Error),

    /// The named object does not exist.
    #[error("shared object not found: {0}")]
    NotFound(String),

    /// Mapping the object into the address space failed.
    #[error("mmap failed: {0}")]
    Mmap(std::io::Error),

    /// A named semaphore operation failed.
    #[error("semaphore error: {0}")]
    Semaphore(std::io::Error),

    /// The region's global header magic does not match.
    #[error("bad region magic 0x{found:08x} (expected 0x{expected:08x})")]
    BadMagic { found: u32, expected: u32 },

    /// The region was initialized by an incompatible version.
    #[error("region version {found} not understood (expected {expected})")]
    BadVersion { found: u16, expected: u16 },

    /// Creator and joiner disagree on a channel parameter.
    ///
    /// There is no negotiation: any mismatch at join time is fatal.
    #[error("channel config mismatch on {field}: ours {ours}, region says {theirs}")]
    ConfigMismatch {
        field: &'static str,
        ours: u32,
        theirs: u32,
    },

    /// The creator never marked the region ready within the join timeout.
    #[error("region never became ready")]
    NotReady,

    /// The region is too small for the agreed layout.
    #[error("region too small ({have} bytes, layout needs {need})")]
    RegionTooSmall { have: usize, need: usize },

    /// A frame exceeds the agreed per-record limit.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ShmError>;
