//! # AV1
//!
//! OBU level parsing for AV1 low overhead bitstreams:
//!
//! - Sequence header OBUs, including timing, decoder model and colour
//!   configuration
//! - Uncompressed frame headers up to `refresh_frame_flags`
//! - POC reconstruction from `order_hint` and `show_existing_frame`
//!
//! OBU headers themselves are decoded by [`crate::format::obu`].

pub mod frame;
pub mod parser;
pub mod sequence;

#[cfg(test)]
mod tests;

pub use frame::{DecodeContext, FrameHeader, FrameType};
pub use parser::Av1Parser;
pub use sequence::{ColorConfig, SequenceHeader};
