//! Frame, byte range and timeline types shared by framers, parsers and the
//! HRD simulator.

mod frame;
mod timeline;

pub use frame::*;
pub use timeline::*;
