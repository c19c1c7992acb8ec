//! # H.264/AVC
//!
//! Annex B NAL unit parsing for AVC streams:
//!
//! - NAL unit headers and slice types
//! - Sequence and picture parameter sets, including VUI and HRD parameters
//! - Slice headers and picture order count derivation (8.2.1)
//! - Buffering period and picture timing SEI messages
//!
//! ## Example
//!
//! ```rust
//! use esdemux::codec::h264::{NalHeader, NalUnitType};
//!
//! let header = NalHeader::parse(&[0x67, 0x42]).unwrap();
//! assert_eq!(header.nal_unit_type, NalUnitType::Sps);
//! assert_eq!(header.nal_ref_idc, 3);
//! ```

/// Access unit assembly and stream level state
pub mod parser;
pub mod sei;
pub mod slice;
/// Parameter sets
pub mod sps;
pub mod types;

#[cfg(test)]
mod parser_test;

#[doc(inline)]
pub use parser::AvcParser;
pub use slice::{DecodeContext, PictureOrder, SliceHeader};
pub use sps::{Pps, Sps};
pub use types::{NalHeader, NalUnitType, SliceType};
