//! Unit framing for elementary stream files.
//!
//! - [`annexb::AnnexBFramer`] splits start-code delimited byte streams
//!   (H.264, H.265, H.266) into NAL units.
//! - [`obu::ObuFramer`] splits size-prefixed AV1 low overhead bitstreams
//!   into OBUs.
//! - [`extradata`] reads and writes container codec configuration records.

use bytes::Bytes;

use crate::av::ByteRange;
use crate::Result;

pub mod annexb;
pub mod extradata;
pub mod obu;

/// A unit as cut out of the source, before any header is decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawUnit {
    /// Running index in framing order
    pub index: u64,
    /// Inclusive file range, including the start code or OBU header
    pub range: ByteRange,
    pub data: Bytes,
    /// True for the final unit of the file
    pub last: bool,
}

/// Common trait for unit framers
pub trait UnitSource: Send {
    /// Returns the next unit or `None` at the end of the file.
    fn next_unit(&mut self) -> Result<Option<RawUnit>>;

    /// Repositions the framer at a unit boundary.
    ///
    /// Fails with `SeekMisaligned` if no unit starts at `pos`.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// File offset of the next unit that will be returned.
    fn position(&self) -> u64;

    fn file_size(&self) -> u64;

    /// Bytes skipped before the first unit of the file.
    fn bytes_before_first_unit(&self) -> u64 {
        0
    }
}

pub use self::annexb::AnnexBFramer;
pub use self::obu::{ObuFramer, ObuHeader, ObuType};
