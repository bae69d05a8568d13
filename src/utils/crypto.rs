// src/utils/crypto.rs
//! Hashing helpers shared by the attribute encoding and the reference engine.
//!
//! Uses SHA-256 from `ring` for every operation.

use ring::digest::{Context, SHA256};

/// Computes a SHA-256 hash of the input data.
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    hash_parts(&[data])
}

/// Computes a SHA-256 hash over several length-prefixed parts.
///
/// Each part is prefixed with its length as a big-endian `u64`, so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut ctx = Context::new(&SHA256);
    for part in parts {
        ctx.update(&(part.len() as u64).to_be_bytes());
        ctx.update(part);
    }
    let digest = ctx.finish();
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}
