//! # Utility Functions and Types
//!
//! Bit-level reading and writing shared by every codec parser.
//!
//! ```rust
//! use esdemux::utils::{BitReader, BitWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = BitWriter::new();
//! writer.write_golomb(5);
//! writer.write_bits(0b101, 3);
//! let data = writer.into_bytes();
//!
//! let mut reader = BitReader::new(&data);
//! assert_eq!(reader.read_golomb()?, 5);
//! assert_eq!(reader.read_bits(3)?, 0b101);
//! # Ok(())
//! # }
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

pub use bits::*;
