use std::io::{Cursor, Read};
use std::path::Path;

use serde::Deserialize;
use serde_bytes::ByteBuf;

use crate::error::{FormatError, Result};
use crate::hasher::EMPTY_BUCKET;
use crate::table::{Slot, TableBytes};
use crate::ChdTable;

/// Capability of turning a byte source into a [`ChdTable`].
///
/// Each implementation owns one on-disk encoding. Both produce the same
/// table shape, so lookups never depend on how a table was transmitted.
pub trait TableLoader {
    /// Decodes a table from `bytes`, taking ownership of the buffer.
    ///
    /// # Errors
    ///
    /// Returns a format error when the bytes do not describe a well-formed
    /// table. No partially decoded table is ever returned.
    fn load_bytes(&self, bytes: TableBytes) -> Result<ChdTable>;

    /// Decodes a table from a borrowed slice, copying it first.
    fn load_slice(&self, bytes: &[u8]) -> Result<ChdTable> {
        self.load_bytes(TableBytes::from(bytes))
    }

    /// Reads `reader` to the end and decodes the result.
    fn load_reader(&self, reader: &mut dyn Read) -> Result<ChdTable> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        self.load_bytes(TableBytes::Owned(buffer))
    }

    /// Opens the file at `path` and decodes it.
    fn load_file(&self, path: &Path) -> Result<ChdTable> {
        self.load_bytes(TableBytes::read_file(path)?)
    }
}

/// Loader for the raw little-endian layout:
///
/// ```text
/// u32 R, R x u64 r
/// u32 M, M x u16 indices
/// u32 N, N x { u32 key_len, u32 value_len, key, value }
/// ```
///
/// Keys and values are not copied; the table serves them straight from the
/// source buffer, which may be a memory map.
///
/// Selector `0xFFFF` marks an empty bucket, so `R` is at most 65535; larger
/// displacement tables are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBinaryLoader;

impl TableLoader for RawBinaryLoader {
    fn load_bytes(&self, bytes: TableBytes) -> Result<ChdTable> {
        let (r, indices, slots) = {
            let mut reader = SliceReader::new(&bytes);
            let count = reader.read_len("r length")?;
            let r = reader.read_u64_array(count, "r")?;
            let count = reader.read_len("indices length")?;
            let indices = reader.read_u16_array(count, "indices")?;
            let count = reader.read_len("entry count")?;
            let mut slots = Vec::with_capacity(count.min(reader.remaining() / 8));
            for _ in 0..count {
                let key_len = reader.read_u32("key length")?;
                let value_len = reader.read_u32("value length")?;
                let offset = reader.position();
                reader.skip(key_len as usize, "key")?;
                reader.skip(value_len as usize, "value")?;
                slots.push(Slot {
                    offset,
                    key_len,
                    value_len,
                });
            }
            if reader.remaining() > 0 {
                return Err(FormatError::TrailingBytes(reader.remaining()).into());
            }
            (r, indices, slots)
        };

        let table = ChdTable::from_parts(r, indices, slots, bytes)?;
        tracing::debug!(
            entries = table.len(),
            buckets = table.bucket_count(),
            mapped = table.is_mapped(),
            "loaded raw CHD table"
        );
        Ok(table)
    }

    fn load_file(&self, path: &Path) -> Result<ChdTable> {
        self.load_bytes(TableBytes::map_file(path)?)
    }
}

/// Loader for the structured encoding: a `u32` little-endian byte length
/// followed by one MessagePack message with the repeated fields `r`,
/// `indices`, `keys` and `values`.
///
/// Both the compact (array) and the named (map) struct encodings decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLoader;

#[derive(Deserialize)]
struct ChdMessage {
    r: Vec<u64>,
    indices: Vec<u64>,
    keys: Vec<ByteBuf>,
    values: Vec<ByteBuf>,
}

impl TableLoader for StructuredLoader {
    fn load_bytes(&self, bytes: TableBytes) -> Result<ChdTable> {
        let mut reader = SliceReader::new(&bytes);
        let length = reader.read_len("message length")?;
        let body = reader.read(length, "message")?;
        if reader.remaining() > 0 {
            return Err(FormatError::TrailingBytes(reader.remaining()).into());
        }

        let mut cursor = Cursor::new(body);
        let message = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            ChdMessage::deserialize(&mut de).map_err(FormatError::from)?
        };
        let consumed = cursor.position() as usize;
        if consumed < body.len() {
            return Err(FormatError::TrailingBytes(body.len() - consumed).into());
        }

        let ChdMessage {
            r,
            indices,
            keys,
            values,
        } = message;
        if keys.len() != values.len() {
            return Err(FormatError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            }
            .into());
        }
        let indices = narrow_indices(&indices, r.len())?;

        let table = ChdTable::new(r, indices, keys.into_iter().zip(values))?;
        tracing::debug!(
            entries = table.len(),
            buckets = table.bucket_count(),
            "loaded structured CHD table"
        );
        Ok(table)
    }
}

/// Converts wire selectors into the table's `u16` form.
fn narrow_indices(indices: &[u64], r_len: usize) -> Result<Vec<u16>> {
    indices
        .iter()
        .enumerate()
        .map(|(bucket, &index)| match u16::try_from(index) {
            Ok(i) if i == EMPTY_BUCKET || (i as usize) < r_len => Ok(i),
            _ => Err(FormatError::IndexOutOfRange {
                bucket,
                index,
                len: r_len,
            }
            .into()),
        })
        .collect()
}

/// Decodes a raw-layout table from any byte source.
pub fn load_raw(source: impl Into<TableBytes>) -> Result<ChdTable> {
    RawBinaryLoader.load_bytes(source.into())
}

/// Decodes a structured-encoding table from any byte source.
pub fn load_structured(source: impl Into<TableBytes>) -> Result<ChdTable> {
    StructuredLoader.load_bytes(source.into())
}

/// Bounds-checked little-endian cursor over a byte slice.
struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        SliceReader { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(FormatError::Truncated {
                what,
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            }
            .into());
        }
        let data = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(data)
    }

    fn skip(&mut self, len: usize, what: &'static str) -> Result<()> {
        self.read(len, what).map(|_| ())
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.read(4, what)?);
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_len(&mut self, what: &'static str) -> Result<usize> {
        self.read_u32(what).map(|n| n as usize)
    }

    fn read_array(&mut self, count: usize, width: usize, what: &'static str) -> Result<&'a [u8]> {
        let len = count.checked_mul(width).ok_or(FormatError::Truncated {
            what,
            offset: self.pos,
            needed: usize::MAX,
            available: self.remaining(),
        })?;
        self.read(len, what)
    }

    fn read_u64_array(&mut self, count: usize, what: &'static str) -> Result<Vec<u64>> {
        let data = self.read_array(count, 8, what)?;
        Ok(data
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    fn read_u16_array(&mut self, count: usize, what: &'static str) -> Result<Vec<u16>> {
        let data = self.read_array(count, 2, what)?;
        Ok(data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChdError;

    /// Hand-encoded raw table: r = [5, 9], indices = [1, 0xFFFF],
    /// entries = [("ab", "x"), ("c", "")].
    fn raw_fixture() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&5u64.to_le_bytes());
        buf.extend_from_slice(&9u64.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&0xFFFFu16.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(b"abx");
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"c");
        buf
    }

    #[test]
    fn test_load_raw_layout() {
        let table = load_raw(raw_fixture()).unwrap();
        assert_eq!(table.r(), &[5, 9]);
        assert_eq!(table.indices(), &[1, EMPTY_BUCKET]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.key(0), b"ab");
        assert_eq!(table.value(0), b"x");
        assert_eq!(table.key(1), b"c");
        assert_eq!(table.value(1), b"");
    }

    #[test]
    fn test_load_raw_truncated() {
        let data = raw_fixture();
        for len in 0..data.len() {
            let err = load_raw(&data[..len]).unwrap_err();
            assert!(
                matches!(err, ChdError::Format(FormatError::Truncated { .. })),
                "prefix of {len} bytes: {err}"
            );
        }
    }

    #[test]
    fn test_load_raw_malformed() {
        let mut data = raw_fixture();
        data.push(0);
        let err = load_raw(data).unwrap_err();
        assert!(matches!(err, ChdError::Format(FormatError::TrailingBytes(1))));

        // Selector 3 with only two displacement values.
        let mut data = raw_fixture();
        data[24..26].copy_from_slice(&3u16.to_le_bytes());
        let err = load_raw(data).unwrap_err();
        assert!(matches!(
            err,
            ChdError::Format(FormatError::IndexOutOfRange { bucket: 0, .. })
        ));

        // Declared r length far beyond the buffer.
        let mut data = raw_fixture();
        data[0..4].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = load_raw(data).unwrap_err();
        assert!(matches!(err, ChdError::Format(FormatError::Truncated { what: "r", .. })));

        let mut data = vec![0u8; 4];
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        let err = load_raw(data).unwrap_err();
        assert!(matches!(err, ChdError::Format(FormatError::EmptyDisplacements)));

        // 65536 displacement values leave no selector free for empty buckets.
        let mut data = 0x10000u32.to_le_bytes().to_vec();
        data.extend(std::iter::repeat_n(0u8, 0x10000 * 8));
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        let err = load_raw(data).unwrap_err();
        assert!(matches!(
            err,
            ChdError::Format(FormatError::TooManyDisplacements(0x10000))
        ));
    }

    #[test]
    fn test_load_structured_malformed() {
        let err = load_structured(&b"\x01\x00"[..]).unwrap_err();
        assert!(matches!(err, ChdError::Format(FormatError::Truncated { .. })));

        let mut data = 10u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"short");
        let err = load_structured(data).unwrap_err();
        assert!(matches!(err, ChdError::Format(FormatError::Truncated { what: "message", .. })));

        let mut data = 3u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        let err = load_structured(data).unwrap_err();
        assert!(matches!(err, ChdError::Format(FormatError::Decode(_))));
    }

    #[test]
    fn test_load_reader() {
        let mut cursor = Cursor::new(raw_fixture());
        let table = RawBinaryLoader.load_reader(&mut cursor).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!table.is_mapped());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.chd");
        std::fs::write(&path, raw_fixture()).unwrap();

        let table = RawBinaryLoader.load_file(&path).unwrap();
        assert!(table.is_mapped());
        assert_eq!(table.key(0), b"ab");

        std::fs::write(&path, &raw_fixture()[..10]).unwrap();
        let err = RawBinaryLoader.load_file(&path).unwrap_err();
        assert!(matches!(err, ChdError::Format(_)));

        let err = StructuredLoader
            .load_file(&dir.path().join("missing.chd"))
            .unwrap_err();
        assert!(matches!(err, ChdError::Io(_)));
    }
}
