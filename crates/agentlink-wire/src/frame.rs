use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Frame header: magic (4) + version (2) + type (2) + corr_id (4) + length (4) + ts_ns (8).
pub const HEADER_SIZE: usize = 24;

/// Magic: "LABF" (legacy-agent bridge frame).
pub const MAGIC: u32 = 0x4C41_4246;

/// Protocol version carried in every header.
pub const VERSION: u16 = 1;

/// Control-plane request (CBOR payload).
pub const TYPE_CTRL_REQ: u16 = 0x1000;
/// Control-plane response.
pub const TYPE_CTRL_RSP: u16 = 0x1001;
/// Control-plane event.
pub const TYPE_CTRL_EVT: u16 = 0x1002;
/// Data-plane JSON write request.
pub const TYPE_DATA_JSON_REQ: u16 = 0x2000;
/// Data-plane JSON write response.
pub const TYPE_DATA_JSON_RSP: u16 = 0x2001;
/// Data-plane JSON event.
pub const TYPE_DATA_JSON_EVT: u16 = 0x2002;
/// Data-plane struct write request (envelope + raw bytes).
pub const TYPE_DATA_STRUCT_REQ: u16 = 0x2100;
/// Data-plane struct write response (fixed [`crate::DataRspStruct`]).
pub const TYPE_DATA_STRUCT_RSP: u16 = 0x2101;
/// Data-plane struct event (envelope + raw bytes).
pub const TYPE_DATA_STRUCT_EVT: u16 = 0x2102;

/// Which plane a frame type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Control,
    DataJson,
    DataStruct,
}

/// Whether a frame is a request, a response, or an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Request,
    Response,
    Event,
}

/// Classify a frame type's plane, or `None` for unknown types.
pub fn plane_of(frame_type: u16) -> Option<Plane> {
    match frame_type & 0xFF00 {
        0x1000 => Some(Plane::Control),
        0x2000 => Some(Plane::DataJson),
        0x2100 => Some(Plane::DataStruct),
        _ => None,
    }
}

/// Classify a frame type's role, or `None` for unknown types.
pub fn role_of(frame_type: u16) -> Option<Role> {
    if plane_of(frame_type).is_none() {
        return None;
    }
    match frame_type & 0x000F {
        0 => Some(Role::Request),
        1 => Some(Role::Response),
        2 => Some(Role::Event),
        _ => None,
    }
}

/// The fixed control envelope preceding every payload on the wire.
///
/// All fields are big-endian on the wire. `corr_id` is 0 for fire-and-forget
/// sends and for inbound events; `length` must equal the payload byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u16,
    pub frame_type: u16,
    pub corr_id: u32,
    pub length: u32,
    pub ts_ns: u64,
}

impl FrameHeader {
    /// Build a header for `payload_len` bytes with the given type and id.
    pub fn new(frame_type: u16, corr_id: u32, payload_len: usize, ts_ns: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            frame_type,
            corr_id,
            length: payload_len as u32,
            ts_ns,
        }
    }

    /// Total wire size of the frame this header describes.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// Encode a header and payload into `dst`.
///
/// Wire format (big-endian):
/// ```text
/// magic:u32 | version:u16 | type:u16 | corr_id:u32 | length:u32 | ts_ns:u64 | payload
/// ```
pub fn encode_frame(header: &FrameHeader, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() != header.length as usize {
        return Err(WireError::LengthMismatch {
            declared: header.length as usize,
            actual: payload.len(),
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32(header.magic);
    dst.put_u16(header.version);
    dst.put_u16(header.frame_type);
    dst.put_u32(header.corr_id);
    dst.put_u32(header.length);
    dst.put_u64(header.ts_ns);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from the front of `src`, validating magic and version.
///
/// Returns the header and the payload byte range consumed from `src`.
/// `src` must hold exactly one frame's header plus at least its payload;
/// anything short is an error (datagram and ring transports deliver whole
/// records, so a short buffer means corruption, not "wait for more").
pub fn decode_frame(src: &[u8], max_payload: usize) -> Result<(FrameHeader, &[u8])> {
    if src.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            have: src.len(),
            need: HEADER_SIZE,
        });
    }

    let mut cur = src;
    let magic = cur.get_u32();
    if magic != MAGIC {
        return Err(WireError::InvalidMagic {
            found: magic,
            expected: MAGIC,
        });
    }
    let version = cur.get_u16();
    if version != VERSION {
        return Err(WireError::UnsupportedVersion {
            found: version,
            expected: VERSION,
        });
    }
    let frame_type = cur.get_u16();
    let corr_id = cur.get_u32();
    let length = cur.get_u32();
    let ts_ns = cur.get_u64();

    let payload_len = length as usize;
    if payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    if src.len() < HEADER_SIZE + payload_len {
        return Err(WireError::Truncated {
            have: src.len(),
            need: HEADER_SIZE + payload_len,
        });
    }

    let header = FrameHeader {
        magic,
        version,
        frame_type,
        corr_id,
        length,
        ts_ns,
    };
    Ok((header, &src[HEADER_SIZE..HEADER_SIZE + payload_len]))
}
