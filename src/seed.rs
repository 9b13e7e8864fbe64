//! Per-item seed derivation.
//!
//! The partition tool is seeded per image so that a run can be reproduced
//! exactly, no matter which worker picks the image up or in what order the
//! queue drains. The seed depends only on the item identifier and the run's
//! global seed.

use sha2::{Digest, Sha256};

/// Item seeds are reduced into `[0, 2^31)` so any tool that parses a signed
/// 32-bit integer accepts them.
pub const ITEM_SEED_MODULUS: u64 = 1 << 31;

/// Derive the deterministic seed for one item.
///
/// Hashes `identifier ‖ global_seed` (the seed rendered in decimal) with
/// SHA-256, takes the first eight digest bytes as a big-endian integer and
/// reduces it modulo 2^31.
pub fn derive(identifier: &str, global_seed: u64) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update(global_seed.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % ITEM_SEED_MODULUS) as u32
}
