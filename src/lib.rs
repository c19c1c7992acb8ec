#![doc(html_root_url = "https://docs.rs/esdemux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # esdemux - elementary video stream demuxer
//!
//! `esdemux` splits raw compressed video files into coded units, tracks
//! their parameter sets, groups units into frames and access units with
//! picture order numbering, and simulates the decoder's coded picture
//! buffer.
//!
//! ## Supported streams
//!
//! - H.264/AVC Annex B byte streams, including HRD buffer simulation
//! - H.265/HEVC Annex B byte streams
//! - AV1 low overhead bitstreams (size-prefixed OBUs)
//! - H.266/VVC Annex B byte streams (headers and access units only, flagged
//!   as incomplete)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esdemux::codec::Codec;
//! use esdemux::session::Session;
//!
//! fn main() -> esdemux::Result<()> {
//!     let mut session = Session::open("stream.264", Codec::Avc)?;
//!     let summary = session.run()?;
//!
//!     for entry in &summary.bitrate {
//!         println!("AU {} POC {}: {} bytes {}", entry.dts, entry.pts, entry.byte_size,
//!             entry.frame_type_summary);
//!     }
//!     for warning in &summary.warnings {
//!         println!("HRD: {}", warning.message);
//!     }
//!
//!     // Everything needed to start decoding at display frame 10
//!     if let Some(seek) = session.closest_seek_point(10, None) {
//!         let info = session.seek_info(seek.frame_index);
//!         println!("{:?}", info.map(|i| i.file_pos));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Long parses can run on a tokio blocking worker with
//! [`session::spawn_parse`] and be stopped through a
//! [`session::CancelToken`].
//!
//! ## Module Overview
//!
//! - `utils`: bit level reading and writing with emulation prevention
//! - `format`: unit framers for Annex B and OBU files, configuration records
//! - `codec`: per codec parsers, parameter set registry, access unit assembly
//! - `av`: frames, byte ranges, bitrate and HRD timeline entries
//! - `hrd`: coded picture buffer simulation
//! - `trace`: optional tree of every decoded syntax element
//! - `session`: the public parsing operations
//! - `config`: process wide defaults from environment and config file

/// Frame, byte range and timeline types
pub mod av;

/// Codec parsers and access unit assembly
pub mod codec;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Unit framers and configuration records
pub mod format;

/// Coded picture buffer simulation
pub mod hrd;

/// Parsing sessions
pub mod session;

/// Syntax element trace
pub mod trace;

/// Common utilities and helper functions
pub mod utils;

pub use error::{DemuxError, Result};
