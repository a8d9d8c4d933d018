//! Hash primitive shared by lookups and construction.
//!
//! Tables are only compatible with each other when both sides agree on every
//! constant here, so none of them may change.

/// FNV-1a 64-bit offset basis.
pub const FNV_OFFSET_BASIS: u64 = 14695981039346656037;

/// FNV-1a 64-bit prime.
pub const FNV_PRIME: u64 = 1099511628211;

/// Bucket selector marking a bucket that no key maps to.
pub const EMPTY_BUCKET: u16 = u16::MAX;

/// FNV-1a over the raw key bytes.
#[inline]
pub fn fnv1a(key: &[u8]) -> u64 {
    let mut h = FNV_OFFSET_BASIS;
    for &b in key {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Primary hash of `key`, randomized by the table seed `r[0]`.
#[inline]
pub(crate) fn seeded_hash(key: &[u8], seed: u64) -> u64 {
    fnv1a(key) ^ seed
}

#[inline]
pub(crate) fn bucket_index(h0: u64, bucket_count: usize) -> usize {
    (h0 % bucket_count as u64) as usize
}

#[inline]
pub(crate) fn slot_index(h0: u64, displacement: u64, slot_count: usize) -> usize {
    ((h0 ^ displacement) % slot_count as u64) as usize
}
