use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Envelope size on the wire, including the trailing reserved pad.
pub const ENVELOPE_SIZE: usize = 20;

/// Envelope magic: "DIPC".
pub const ENVELOPE_MAGIC: u32 = 0x4449_5043;

/// Envelope ABI discriminator.
pub const ENVELOPE_VERSION: u8 = 1;

/// Envelope kind: struct write request.
pub const KIND_WRITE: u8 = 1;
/// Envelope kind: struct event.
pub const KIND_EVENT: u8 = 2;

/// Size of the fixed struct-plane response body.
pub const RSP_STRUCT_SIZE: usize = 8;

/// Struct-plane sub-header embedded after the frame header for binary data.
///
/// The wire never carries the topic name for struct traffic; `topic_id` is
/// the FNV-1a hash of the name and must be reproducible by both ends.
/// `abi_hash` fingerprints the payload struct layout; a mismatch is a hard
/// error on the receive side, never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataEnvelope {
    pub kind: u8,
    pub topic_id: u32,
    pub abi_hash: u32,
    pub data_len: u32,
}

impl DataEnvelope {
    pub fn write_request(topic_id: u32, abi_hash: u32, data_len: usize) -> Self {
        Self {
            kind: KIND_WRITE,
            topic_id,
            abi_hash,
            data_len: data_len as u32,
        }
    }

    pub fn event(topic_id: u32, abi_hash: u32, data_len: usize) -> Self {
        Self {
            kind: KIND_EVENT,
            topic_id,
            abi_hash,
            data_len: data_len as u32,
        }
    }

    /// Encode the envelope followed by `data` into `dst`.
    pub fn encode(&self, data: &[u8], dst: &mut BytesMut) -> Result<()> {
        if data.len() != self.data_len as usize {
            return Err(WireError::LengthMismatch {
                declared: self.data_len as usize,
                actual: data.len(),
            });
        }
        dst.reserve(ENVELOPE_SIZE + data.len());
        dst.put_u32(ENVELOPE_MAGIC);
        dst.put_u8(ENVELOPE_VERSION);
        dst.put_u8(self.kind);
        dst.put_u32(self.topic_id);
        dst.put_u32(self.abi_hash);
        dst.put_u32(self.data_len);
        dst.put_u16(0); // reserved
        dst.put_slice(data);
        Ok(())
    }

    /// Decode an envelope and its payload from `src`.
    pub fn decode(src: &[u8]) -> Result<(DataEnvelope, &[u8])> {
        if src.len() < ENVELOPE_SIZE {
            return Err(WireError::Truncated {
                have: src.len(),
                need: ENVELOPE_SIZE,
            });
        }

        let mut cur = src;
        let magic = cur.get_u32();
        if magic != ENVELOPE_MAGIC {
            return Err(WireError::InvalidMagic {
                found: magic,
                expected: ENVELOPE_MAGIC,
            });
        }
        let ver = cur.get_u8();
        if ver != ENVELOPE_VERSION {
            return Err(WireError::EnvelopeVersion {
                found: ver,
                expected: ENVELOPE_VERSION,
            });
        }
        let kind = cur.get_u8();
        if kind != KIND_WRITE && kind != KIND_EVENT {
            return Err(WireError::UnknownKind(kind));
        }
        let topic_id = cur.get_u32();
        let abi_hash = cur.get_u32();
        let data_len = cur.get_u32();
        let _reserved = cur.get_u16();

        let need = ENVELOPE_SIZE + data_len as usize;
        if src.len() < need {
            return Err(WireError::Truncated {
                have: src.len(),
                need,
            });
        }

        let envelope = DataEnvelope {
            kind,
            topic_id,
            abi_hash,
            data_len,
        };
        Ok((envelope, &src[ENVELOPE_SIZE..need]))
    }
}

/// Fixed 8-byte struct-plane response: a status word plus the echoed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRspStruct {
    pub status: u32,
    pub corr_id: u32,
}

impl DataRspStruct {
    pub const STATUS_OK: u32 = 0;
    pub const STATUS_ABI_MISMATCH: u32 = 1;
    pub const STATUS_UNKNOWN_TOPIC: u32 = 2;
    pub const STATUS_ERROR: u32 = 3;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(RSP_STRUCT_SIZE);
        dst.put_u32(self.status);
        dst.put_u32(self.corr_id);
    }

    pub fn decode(src: &[u8]) -> Result<DataRspStruct> {
        if src.len() < RSP_STRUCT_SIZE {
            return Err(WireError::Truncated {
                have: src.len(),
                need: RSP_STRUCT_SIZE,
            });
        }
        let mut cur = src;
        Ok(DataRspStruct {
            status: cur.get_u32(),
            corr_id: cur.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::fnv1a_32;

    #[test]
    fn envelope_roundtrip() {
        let payload = [0x11u8, 0x22, 0x33, 0x44, 0x55];
        let topic_id = fnv1a_32("cannon/status");
        let env = DataEnvelope::write_request(topic_id, 0xDEAD_BEEF, payload.len());

        let mut buf = BytesMut::new();
        env.encode(&payload, &mut buf).unwrap();
        assert_eq!(buf.len(), ENVELOPE_SIZE + payload.len());

        let (decoded, body) = DataEnvelope::decode(&buf).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.topic_id, topic_id);
        assert_eq!(decoded.abi_hash, 0xDEAD_BEEF);
        assert_eq!(body, payload);
    }

    #[test]
    fn envelope_rejects_bad_magic() {
        let env = DataEnvelope::event(1, 2, 0);
        let mut buf = BytesMut::new();
        env.encode(b"", &mut buf).unwrap();
        buf[0] ^= 0xFF;
        assert!(matches!(
            DataEnvelope::decode(&buf),
            Err(WireError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn envelope_rejects_bad_version() {
        let env = DataEnvelope::event(1, 2, 0);
        let mut buf = BytesMut::new();
        env.encode(b"", &mut buf).unwrap();
        buf[4] = 9;
        assert!(matches!(
            DataEnvelope::decode(&buf),
            Err(WireError::EnvelopeVersion { found: 9, .. })
        ));
    }

    #[test]
    fn envelope_rejects_unknown_kind() {
        let env = DataEnvelope::event(1, 2, 0);
        let mut buf = BytesMut::new();
        env.encode(b"", &mut buf).unwrap();
        buf[5] = 7;
        assert!(matches!(
            DataEnvelope::decode(&buf),
            Err(WireError::UnknownKind(7))
        ));
    }

    #[test]
    fn envelope_rejects_short_payload() {
        let env = DataEnvelope::write_request(1, 2, 16);
        let mut buf = BytesMut::new();
        env.encode(&[0u8; 16], &mut buf).unwrap();
        buf.truncate(ENVELOPE_SIZE + 4);
        assert!(matches!(
            DataEnvelope::decode(&buf),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn rsp_struct_roundtrip() {
        let rsp = DataRspStruct {
            status: DataRspStruct::STATUS_ABI_MISMATCH,
            corr_id: 42,
        };
        let mut buf = BytesMut::new();
        rsp.encode(&mut buf);
        assert_eq!(buf.len(), RSP_STRUCT_SIZE);
        assert_eq!(DataRspStruct::decode(&buf).unwrap(), rsp);
    }
}
