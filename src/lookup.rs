use std::iter::FusedIterator;
use std::ops::Range;

use crate::ChdTable;
use crate::hasher::{EMPTY_BUCKET, bucket_index, seeded_hash, slot_index};

/// Constant-time query view over a [`ChdTable`].
///
/// A lookup borrows its table and holds no other state, so it is `Copy` and
/// may be shared freely across threads. Every operation is a pure function of
/// the table and its arguments.
///
/// # Examples
///
/// ```
/// use chdmap::{ChdBuilder, ChdLookup};
///
/// # fn main() -> chdmap::Result<()> {
/// let table = ChdBuilder::default()
///     .with_seed(7)
///     .build([("a", "1"), ("b", "2"), ("c", "3")])?;
/// let lookup = ChdLookup::new(&table);
/// assert_eq!(lookup.get("a"), Some(&b"1"[..]));
/// assert_eq!(lookup.get("z"), None);
/// assert!(lookup.contains("b"));
/// assert_eq!(lookup.len(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ChdLookup<'a> {
    table: &'a ChdTable,
}

impl<'a> ChdLookup<'a> {
    pub fn new(table: &'a ChdTable) -> Self {
        ChdLookup { table }
    }

    /// Returns the value stored for `key`, or `None` if `key` was not part of
    /// the build set.
    ///
    /// The hash and displace steps map any key to some slot; the stored key at
    /// that slot is compared byte for byte before the value is returned.
    pub fn get<K: AsRef<[u8]> + ?Sized>(&self, key: &K) -> Option<&'a [u8]> {
        let key = key.as_ref();
        let slot = self.slot_for(key)?;
        if self.table.key(slot) == key {
            Some(self.table.value(slot))
        } else {
            None
        }
    }

    pub fn contains<K: AsRef<[u8]> + ?Sized>(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Looks up several keys, preserving their order in the result.
    pub fn batch_get<I>(&self, keys: I) -> Vec<Option<&'a [u8]>>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        keys.into_iter().map(|k| self.get(&k)).collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Keys in slot order.
    pub fn keys(&self) -> Keys<'a> {
        Keys { inner: self.items() }
    }

    /// Values in slot order.
    pub fn values(&self) -> Values<'a> {
        Values { inner: self.items() }
    }

    /// `(key, value)` pairs in slot order.
    ///
    /// Slot order is the only order a table has; it is neither the order keys
    /// were added in nor sorted.
    pub fn items(&self) -> Iter<'a> {
        Iter {
            table: self.table,
            range: 0..self.table.len(),
        }
    }

    fn slot_for(&self, key: &[u8]) -> Option<usize> {
        let n = self.table.len();
        if n == 0 {
            return None;
        }
        let r = self.table.r();
        let indices = self.table.indices();
        let h0 = seeded_hash(key, r[0]);
        let selector = indices[bucket_index(h0, indices.len())];
        if selector == EMPTY_BUCKET {
            return None;
        }
        Some(slot_index(h0, r[selector as usize], n))
    }
}

impl<'a> IntoIterator for &ChdLookup<'a> {
    type Item = (&'a [u8], &'a [u8]);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.items()
    }
}

impl<'a> IntoIterator for ChdLookup<'a> {
    type Item = (&'a [u8], &'a [u8]);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.items()
    }
}

/// Iterator over `(key, value)` pairs of a table in slot order.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    table: &'a ChdTable,
    range: Range<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.range.next()?;
        Some((self.table.key(i), self.table.value(i)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let i = self.range.nth(n)?;
        Some((self.table.key(i), self.table.value(i)))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let i = self.range.next_back()?;
        Some((self.table.key(i), self.table.value(i)))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl FusedIterator for Iter<'_> {}

/// Iterator over the keys of a table in slot order.
#[derive(Debug, Clone)]
pub struct Keys<'a> {
    inner: Iter<'a>,
}

impl<'a> Iterator for Keys<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for Keys<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, _)| k)
    }
}

impl ExactSizeIterator for Keys<'_> {}

impl FusedIterator for Keys<'_> {}

/// Iterator over the values of a table in slot order.
#[derive(Debug, Clone)]
pub struct Values<'a> {
    inner: Iter<'a>,
}

impl<'a> Iterator for Values<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for Values<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, v)| v)
    }
}

impl ExactSizeIterator for Values<'_> {}

impl FusedIterator for Values<'_> {}
