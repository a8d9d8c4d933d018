use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{FormatError, Result};
use crate::hasher::EMPTY_BUCKET;
use crate::{ChdLookup, TableInfo};

/// Byte buffer backing a [`ChdTable`].
///
/// Either an owned heap buffer or a read-only memory map. A table keeps its
/// backing alive for as long as the table itself, so slices handed out by
/// lookups stay valid without copying.
pub enum TableBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl TableBytes {
    /// Memory-maps the file at `path` read-only.
    pub fn map_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // The mapping is read-only and owned by the table for its whole life.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(TableBytes::Mapped(mmap))
    }

    /// Reads the file at `path` fully into memory.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(TableBytes::Owned(std::fs::read(path.as_ref())?))
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, TableBytes::Mapped(_))
    }
}

impl Deref for TableBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            TableBytes::Owned(v) => v,
            TableBytes::Mapped(m) => m,
        }
    }
}

impl fmt::Debug for TableBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_mapped() { "Mapped" } else { "Owned" };
        f.debug_struct("TableBytes")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

impl From<Vec<u8>> for TableBytes {
    fn from(v: Vec<u8>) -> Self {
        TableBytes::Owned(v)
    }
}

impl From<&[u8]> for TableBytes {
    fn from(v: &[u8]) -> Self {
        TableBytes::Owned(v.to_vec())
    }
}

impl From<Mmap> for TableBytes {
    fn from(m: Mmap) -> Self {
        TableBytes::Mapped(m)
    }
}

/// Location of one key/value pair inside the backing buffer.
///
/// The value immediately follows the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub offset: usize,
    pub key_len: u32,
    pub value_len: u32,
}

impl Slot {
    fn key_end(&self) -> usize {
        self.offset + self.key_len as usize
    }

    fn value_end(&self) -> usize {
        self.key_end() + self.value_len as usize
    }
}

/// Immutable CHD perfect hash table.
///
/// Holds the displacement values `r` (with `r[0]` reserved as the global
/// seed), one displacement selector per bucket, and `N` key/value slots.
/// Tables are produced once by a [`TableLoader`](crate::TableLoader) or
/// [`ChdBuilder`](crate::ChdBuilder) and never modified afterwards.
///
/// Construction checks that the table is well-formed: non-empty `r` and
/// bucket table, every selector in range (or [`EMPTY_BUCKET`]), and every slot
/// inside the backing buffer. Whether it is a *valid* CHD table for its keys
/// is up to whoever built it.
pub struct ChdTable {
    r: Vec<u64>,
    indices: Vec<u16>,
    slots: Vec<Slot>,
    data: TableBytes,
}

impl ChdTable {
    /// Creates a table from its four logical arrays.
    ///
    /// Keys and values are copied into a single owned buffer in slot order.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when the arrays are not well-formed.
    pub fn new<K, V>(
        r: Vec<u64>,
        indices: Vec<u16>,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut data = Vec::new();
        let mut slots = Vec::new();
        for (key, value) in entries {
            let (key, value) = (key.as_ref(), value.as_ref());
            slots.push(Slot {
                offset: data.len(),
                key_len: checked_u32("key", key.len())?,
                value_len: checked_u32("value", value.len())?,
            });
            data.extend_from_slice(key);
            data.extend_from_slice(value);
        }
        Self::from_parts(r, indices, slots, TableBytes::Owned(data))
    }

    pub(crate) fn from_parts(
        r: Vec<u64>,
        indices: Vec<u16>,
        slots: Vec<Slot>,
        data: TableBytes,
    ) -> Result<Self> {
        if r.is_empty() {
            return Err(FormatError::EmptyDisplacements.into());
        }
        if r.len() > EMPTY_BUCKET as usize {
            return Err(FormatError::TooManyDisplacements(r.len()).into());
        }
        if indices.is_empty() {
            return Err(FormatError::EmptyBuckets.into());
        }
        for (bucket, &index) in indices.iter().enumerate() {
            if index != EMPTY_BUCKET && index as usize >= r.len() {
                return Err(FormatError::IndexOutOfRange {
                    bucket,
                    index: index as u64,
                    len: r.len(),
                }
                .into());
            }
        }
        if let Some(slot) = slots.iter().find(|s| s.value_end() > data.len()) {
            return Err(FormatError::Truncated {
                what: "slot",
                offset: slot.offset,
                needed: slot.value_end() - slot.offset,
                available: data.len().saturating_sub(slot.offset),
            }
            .into());
        }

        Ok(ChdTable {
            r,
            indices,
            slots,
            data,
        })
    }

    /// Displacement values; `r()[0]` is the global seed.
    pub fn r(&self) -> &[u64] {
        &self.r
    }

    /// Per-bucket displacement selectors.
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Number of stored entries `N`.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of buckets `M`.
    pub fn bucket_count(&self) -> usize {
        self.indices.len()
    }

    /// Key stored in slot `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    pub fn key(&self, i: usize) -> &[u8] {
        let slot = &self.slots[i];
        &self.data[slot.offset..slot.key_end()]
    }

    /// Value stored in slot `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    pub fn value(&self, i: usize) -> &[u8] {
        let slot = &self.slots[i];
        &self.data[slot.key_end()..slot.value_end()]
    }

    /// Whether keys and values are served from a memory map.
    pub fn is_mapped(&self) -> bool {
        self.data.is_mapped()
    }

    /// Query view over this table.
    pub fn lookup(&self) -> ChdLookup<'_> {
        ChdLookup::new(self)
    }

    /// Summary of the table's shape.
    pub fn info(&self) -> TableInfo {
        TableInfo {
            entry_count: self.len() as u64,
            bucket_count: self.bucket_count() as u64,
            displacement_count: self.r.len() as u64,
            empty_buckets: self.indices.iter().filter(|&&i| i == EMPTY_BUCKET).count() as u64,
            key_bytes: self.slots.iter().map(|s| s.key_len as u64).sum(),
            value_bytes: self.slots.iter().map(|s| s.value_len as u64).sum(),
            mapped: self.is_mapped(),
        }
    }
}

impl fmt::Debug for ChdTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChdTable")
            .field("r", &self.r.len())
            .field("buckets", &self.indices.len())
            .field("entries", &self.slots.len())
            .field("data", &self.data)
            .finish()
    }
}

impl PartialEq for ChdTable {
    fn eq(&self, other: &Self) -> bool {
        self.r == other.r
            && self.indices == other.indices
            && self.len() == other.len()
            && (0..self.len()).all(|i| self.key(i) == other.key(i) && self.value(i) == other.value(i))
    }
}

impl Eq for ChdTable {}

pub(crate) fn checked_u32(what: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| FormatError::TooLarge { what, len }.into())
}
