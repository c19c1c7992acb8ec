//! # H.265/HEVC
//!
//! Annex B parsing for HEVC streams:
//!
//! - Two byte NAL unit headers with layer and temporal ids
//! - VPS (up to the timing info), SPS (up to the coding block sizes) and
//!   the slice header relevant part of the PPS
//! - Slice segment headers up to `slice_pic_order_cnt_lsb`
//! - Picture order count (8.3.1), made unique across IRAP pictures
//!
//! ## Example
//!
//! ```rust
//! use esdemux::codec::h265::{NalHeader, NalUnitType};
//!
//! let header = NalHeader::parse(&[0x40, 0x01]).unwrap();
//! assert_eq!(header.nal_unit_type, NalUnitType::Vps);
//! assert!(header.nal_unit_type.is_parameter_set());
//! ```

/// Access unit assembly for HEVC streams
pub mod parser;
/// Parameter sets
pub mod ps;
pub mod slice;
/// NAL unit header and type definitions
pub mod types;

#[cfg(test)]
mod tests;

pub use parser::HevcParser;
pub use ps::{Pps, ProfileTierLevel, Sps, Vps};
pub use slice::{DecodeContext, PictureOrder, SliceSegmentHeader};
pub use types::{NalHeader, NalUnitType, SliceType};
