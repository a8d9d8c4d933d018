use std::io::{Error, ErrorKind};

use thiserror::Error;

/// Errors surfaced while loading, building or serializing a CHD table.
///
/// A missing key is never an error: lookups report absence with `None`.
#[derive(Debug, Error)]
pub enum ChdError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed table: {0}")]
    Format(#[from] FormatError),
    #[error("build failed: {0}")]
    Build(#[from] BuildError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Structural problems found while decoding a table.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("truncated {what} at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("{0} trailing bytes after table data")]
    TrailingBytes(usize),
    #[error("displacement table is empty")]
    EmptyDisplacements,
    #[error("{0} displacement values; selectors address at most {max}", max = crate::EMPTY_BUCKET)]
    TooManyDisplacements(usize),
    #[error("bucket table is empty")]
    EmptyBuckets,
    #[error("bucket {bucket} selects displacement {index}, table has {len}")]
    IndexOutOfRange { bucket: usize, index: u64, len: usize },
    #[error("{keys} keys but {values} values")]
    LengthMismatch { keys: usize, values: usize },
    #[error("{what} too large for the on-disk format: {len}")]
    TooLarge { what: &'static str, len: usize },
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Failures of [`ChdBuilder::build`](crate::ChdBuilder::build).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("duplicate key {}", String::from_utf8_lossy(.0))]
    DuplicateKey(Vec<u8>),
    #[error(
        "no collision-free displacement after {attempts} attempts for bucket {bucket} with {size} keys"
    )]
    DisplacementNotFound {
        bucket: usize,
        size: usize,
        attempts: u64,
    },
    #[error("displacement table exceeds {0} entries")]
    TooManyDisplacements(usize),
    #[error("{0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ChdError>;

impl From<ChdError> for Error {
    fn from(e: ChdError) -> Self {
        match e {
            ChdError::Io(e) => e,
            ChdError::Format(e) => Error::new(ErrorKind::InvalidData, e),
            ChdError::Build(e) => Error::new(ErrorKind::InvalidInput, e),
            ChdError::Config(e) => Error::new(ErrorKind::InvalidInput, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_io_error() {
        let err: Error = ChdError::from(FormatError::EmptyBuckets).into();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let err: Error = ChdError::from(Error::new(ErrorKind::NotFound, "gone")).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: Error = ChdError::from(BuildError::DuplicateKey(b"k".to_vec())).into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("duplicate key k"));
    }
}
