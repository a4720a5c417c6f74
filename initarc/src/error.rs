use std::io;

use thiserror::Error;

/// Errors generated from library
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("std io error: {0}")]
    StdIo(#[from] io::Error),

    /// End of input reached before the `TRAILER!!!` record
    #[error("archive truncated at offset {offset:#x}")]
    Truncated { offset: u64 },

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("deku error: {0:?}")]
    Deku(#[from] deku::DekuError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{name:?}: unsupported entry type {mode:#o}")]
    UnsupportedEntryType { name: String, mode: u32 },

    #[error("{0:?}: path escapes the extraction root")]
    UnsafePath(String),

    #[error("{name:?}: expected {expected} bytes, found {actual}")]
    SizeMismatch { name: String, expected: u64, actual: u64 },

    /// A previous read failed, the stream position can no longer be trusted
    #[error("archive reader is unusable after a previous error")]
    Unusable,
}

/// Bytes that do not follow the archive grammar
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("header is {0} bytes, expected 110")]
    HeaderLength(usize),

    #[error("not a recognized archive: unexpected magic {found:02x?}")]
    BadMagic { found: [u8; 6] },

    #[error("field {field}: invalid hex {text:?}")]
    InvalidField { field: &'static str, text: String },

    #[error("name size is zero")]
    EmptyName,

    #[error("name is not NUL terminated")]
    UnterminatedName,

    #[error("name is not valid utf-8: {0:02x?}")]
    InvalidName(Vec<u8>),

    #[error("invalid vtoc length prefix {0:?}")]
    InvalidVtocLength(String),

    #[error("vtoc of {0} bytes does not fit the length prefix")]
    VtocTooLarge(usize),

    #[error("{0:?}: symlink without a target")]
    MissingLinkTarget(String),
}

impl ArchiveError {
    /// Map a short read into [`ArchiveError::Truncated`], keep anything else as io
    pub(crate) fn from_read(err: io::Error, offset: u64) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated { offset }
        } else {
            Self::StdIo(err)
        }
    }
}
