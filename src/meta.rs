use serde::{Deserialize, Serialize};

/// Summary returned by [`ChdTable::info`](crate::ChdTable::info).
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Number of stored entries (`N`).
    pub entry_count: u64,
    /// Number of buckets (`M`).
    pub bucket_count: u64,
    /// Length of the displacement table including the seed (`R`).
    pub displacement_count: u64,
    /// Buckets that no key maps to.
    pub empty_buckets: u64,
    /// Total size of all keys in bytes.
    pub key_bytes: u64,
    /// Total size of all values in bytes.
    pub value_bytes: u64,
    /// Whether the table is served from a memory map.
    pub mapped: bool,
}
