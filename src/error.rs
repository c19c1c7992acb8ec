use std::num::ParseIntError;
use thiserror::Error;

/// Errors produced while framing, parsing or assembling a stream.
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reached end of data")]
    OutOfData,

    #[error("truncated unit: declared {declared} bytes, {available} available")]
    TruncatedUnit { declared: u64, available: u64 },

    #[error("missing {kind} with id {id}")]
    MissingParameterSet { kind: &'static str, id: u32 },

    #[error("no start code or unit header at file position {0}")]
    SeekMisaligned(u64),

    #[error("frame with poc {poc} on layer {layer_id} already exists")]
    DuplicateFrame { poc: i64, layer_id: u32 },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl DemuxError {
    /// Returns true if the error only invalidates the unit being parsed.
    ///
    /// Unit-local errors are reported through the parse result and the
    /// session keeps going. Anything else stops the parse loop.
    pub fn is_unit_local(&self) -> bool {
        !matches!(self, DemuxError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, DemuxError>;
