//! Constant-time lookups in minimal perfect hash tables built by the
//! "Compress, Hash, and Displace" (CHD) algorithm.
//!
//! A CHD table maps its `N` keys onto `N` slots without collisions. Lookups
//! hash the key with FNV-1a, pick a bucket, apply that bucket's displacement
//! and compare the key stored in the resulting slot, so a query costs one hash
//! and a single key comparison whether or not the key is present.
//!
//! Tables are immutable. They are decoded by a [`TableLoader`] from one of two
//! encodings, the raw little-endian layout ([`RawBinaryLoader`], zero copy and
//! memory-mappable) or a length-prefixed MessagePack message
//! ([`StructuredLoader`]), and queried through a [`ChdLookup`]. [`ChdBuilder`]
//! constructs new tables and [`write_raw`] / [`write_structured`] persist them.
//!
//! ```
//! use chdmap::{ChdBuilder, load_raw, write_raw};
//!
//! # fn main() -> chdmap::Result<()> {
//! let table = ChdBuilder::default().build([("apple", "red"), ("banana", "yellow")])?;
//! let mut buf = Vec::new();
//! write_raw(&table, &mut buf)?;
//!
//! let table = load_raw(buf)?;
//! let lookup = table.lookup();
//! assert_eq!(lookup.get("banana"), Some(&b"yellow"[..]));
//! assert_eq!(lookup.get("cherry"), None);
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::{BuildError, ChdError, FormatError, Result};

mod hasher;
pub use hasher::{EMPTY_BUCKET, FNV_OFFSET_BASIS, FNV_PRIME, fnv1a};

mod meta;
pub use meta::TableInfo;

mod table;
pub use table::{ChdTable, TableBytes};

mod reader;
pub use reader::{RawBinaryLoader, StructuredLoader, TableLoader, load_raw, load_structured};

mod writer;
pub use writer::{write_raw, write_structured, write_structured_named};

mod lookup;
pub use lookup::{ChdLookup, Iter, Keys, Values};

mod config;
pub use config::{ChdBuildConfig, MAX_BUCKET_RATIO};

mod builder;
pub use builder::ChdBuilder;
