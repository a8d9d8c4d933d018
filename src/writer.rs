use std::io::{BufWriter, Write};

use serde::Serialize;
use serde_bytes::Bytes;

use crate::ChdTable;
use crate::error::{FormatError, Result};
use crate::table::checked_u32;

/// Serializes `table` in the raw layout read by
/// [`RawBinaryLoader`](crate::RawBinaryLoader).
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Fails if an array or entry is too large for the `u32` length fields, or if
/// the underlying writer reports an IO failure.
pub fn write_raw<W: Write>(table: &ChdTable, writer: W) -> Result<u64> {
    let mut w = BufWriter::new(writer);
    let mut written = 0u64;
    let mut put = |w: &mut BufWriter<W>, data: &[u8]| -> Result<()> {
        w.write_all(data)?;
        written += data.len() as u64;
        Ok(())
    };

    put(&mut w, &checked_u32("r", table.r().len())?.to_le_bytes())?;
    for r in table.r() {
        put(&mut w, &r.to_le_bytes())?;
    }
    put(&mut w, &checked_u32("indices", table.indices().len())?.to_le_bytes())?;
    for i in table.indices() {
        put(&mut w, &i.to_le_bytes())?;
    }
    put(&mut w, &checked_u32("entries", table.len())?.to_le_bytes())?;
    for i in 0..table.len() {
        let (key, value) = (table.key(i), table.value(i));
        put(&mut w, &(key.len() as u32).to_le_bytes())?;
        put(&mut w, &(value.len() as u32).to_le_bytes())?;
        put(&mut w, key)?;
        put(&mut w, value)?;
    }
    w.flush()?;

    tracing::debug!(entries = table.len(), bytes = written, "wrote raw CHD table");
    Ok(written)
}

#[derive(Serialize)]
struct ChdMessageRef<'a> {
    r: &'a [u64],
    indices: Vec<u64>,
    keys: Vec<&'a Bytes>,
    values: Vec<&'a Bytes>,
}

/// Serializes `table` in the structured encoding read by
/// [`StructuredLoader`](crate::StructuredLoader), using compact MessagePack.
pub fn write_structured<W: Write>(table: &ChdTable, writer: W) -> Result<u64> {
    write_message(table, writer, false)
}

/// Like [`write_structured`], but emits MessagePack maps with field names.
pub fn write_structured_named<W: Write>(table: &ChdTable, writer: W) -> Result<u64> {
    write_message(table, writer, true)
}

fn write_message<W: Write>(table: &ChdTable, mut writer: W, named: bool) -> Result<u64> {
    let message = ChdMessageRef {
        r: table.r(),
        indices: table.indices().iter().map(|&i| i as u64).collect(),
        keys: (0..table.len()).map(|i| Bytes::new(table.key(i))).collect(),
        values: (0..table.len()).map(|i| Bytes::new(table.value(i))).collect(),
    };
    let body = if named {
        rmp_serde::to_vec_named(&message)
    } else {
        rmp_serde::to_vec(&message)
    }
    .map_err(FormatError::from)?;

    let length = checked_u32("message", body.len())?;
    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;

    let written = 4 + body.len() as u64;
    tracing::debug!(entries = table.len(), bytes = written, named, "wrote structured CHD table");
    Ok(written)
}
