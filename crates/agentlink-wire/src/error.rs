/// Errors that can occur during frame or envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic 0x{found:08x} (expected 0x{expected:08x})")]
    InvalidMagic { found: u32, expected: u32 },

    /// The frame header carries an unsupported protocol version.
    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The buffer ended before a complete header or payload was available.
    #[error("truncated frame ({have} bytes, need {need})")]
    Truncated { have: usize, need: usize },

    /// The header `length` field disagrees with the bytes that follow it.
    #[error("length mismatch (header says {declared}, payload has {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The struct-plane envelope carries an unknown ABI revision.
    #[error("envelope version {found} not understood (expected {expected})")]
    EnvelopeVersion { found: u8, expected: u8 },

    /// The struct-plane envelope kind byte is not a known discriminant.
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),
}

pub type Result<T> = std::result::Result<T, WireError>;
