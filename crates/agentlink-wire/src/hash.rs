//! Topic-name hashing.
//!
//! Struct-plane frames carry a 32-bit hash of the topic name instead of the
//! string. Both ends must use the same function, so the algorithm (FNV-1a)
//! is part of the wire contract.

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the topic's textual name.
pub fn fnv1a_32(name: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in name.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        // Reference values for the standard 32-bit FNV-1a parameters.
        assert_eq!(fnv1a_32(""), 0x811C_9DC5);
        assert_eq!(fnv1a_32("a"), 0xE40C_292C);
        assert_eq!(fnv1a_32("foobar"), 0xBF9C_F968);
    }

    #[test]
    fn distinct_topics_distinct_ids() {
        assert_ne!(fnv1a_32("cannon/status"), fnv1a_32("cannon/command"));
    }

    #[test]
    fn stable_across_calls() {
        assert_eq!(fnv1a_32("telemetry"), fnv1a_32("telemetry"));
    }
}
