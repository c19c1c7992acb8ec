//! H.266/VVC support.
//!
//! Only NAL unit headers are decoded. Access units are split at the unit
//! types that may open one and at slices carrying their own picture
//! header, and pictures are numbered in decoding order.

pub mod parser;
pub mod types;

pub use parser::VvcParser;
pub use types::{NalHeader, NalUnitType};
