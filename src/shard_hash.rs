use sha2::{Digest, Sha256};

/// Zero padding after the two-digit bucket prefix; hash keys are 128-bit
/// (32 hex digits).
const HASH_KEY_PADDING: &str = "000000000000000000000000000000";

/// Collapses arbitrary shard hashes onto `buckets` evenly spaced hash keys so
/// records with different keys still share batches.
///
/// The bucket comes from the first byte of the key's SHA-256 digest. Clients
/// that bucket with MD5 spread keys just as evenly but may put a given key
/// in a different bucket, so keys shared with such clients can land on
/// different shards.
#[derive(Debug, Clone, Copy)]
pub struct ShardHashAdjuster {
    mask: u8,
}

impl ShardHashAdjuster {
    /// `buckets` must be a power of two in `1..=256` (checked by
    /// [`ProducerConfig::validate`](crate::config::ProducerConfig::validate)).
    pub fn new(buckets: u32) -> Self {
        let reserved_bits = buckets.saturating_sub(1).count_ones().min(8);
        let mask = if reserved_bits == 0 {
            0
        } else {
            (0xFFu16 << (8 - reserved_bits)) as u8
        };
        ShardHashAdjuster { mask }
    }

    pub fn adjust(&self, shard_hash: &str) -> String {
        let digest = Sha256::digest(shard_hash.as_bytes());
        let prefix = digest[0] & self.mask;
        format!("{:02x}{}", prefix, HASH_KEY_PADDING)
    }
}
