//! Codec specific unit parsing.
//!
//! Every codec implements [`StreamParser`]. A parser decodes unit headers
//! and parameter sets, keeps its own decoding context (POC state, active
//! parameter sets) and drives a shared [`AccessUnitAssembler`] that groups
//! units into frames and access units.

use bytes::Bytes;
use std::fmt;

use crate::av::{ByteRange, FrameList};
use crate::format::ObuHeader;
use crate::trace::TraceScope;
use crate::Result;

pub mod assembler;
pub mod av1;
pub mod h264;
pub mod h265;
pub mod registry;
pub mod vvc;

pub use assembler::{AccessUnitAssembler, AccessUnitEnd, AssemblerState};
pub use registry::ParameterSetRegistry;

/// Supported elementary stream formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// H.264 Annex B byte stream
    Avc,
    /// H.265 Annex B byte stream
    Hevc,
    /// AV1 low overhead bitstream (size-prefixed OBUs)
    Av1,
    /// H.266 Annex B byte stream (incomplete support)
    Vvc,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Avc => "AVC",
            Codec::Hevc => "HEVC",
            Codec::Av1 => "AV1",
            Codec::Vvc => "VVC",
        }
    }

    /// True for start code delimited formats.
    pub fn is_annexb(&self) -> bool {
        !matches!(self, Codec::Av1)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded unit header, one variant per codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitKind {
    Avc(h264::NalHeader),
    Hevc(h265::NalHeader),
    Av1Obu(ObuHeader),
    Vvc(vvc::NalHeader),
}

impl UnitKind {
    pub fn name(&self) -> &'static str {
        match self {
            UnitKind::Avc(h) => h.nal_unit_type.name(),
            UnitKind::Hevc(h) => h.nal_unit_type.name(),
            UnitKind::Av1Obu(h) => h.obu_type.name(),
            UnitKind::Vvc(h) => h.nal_unit_type.name(),
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        match self {
            UnitKind::Avc(h) => h.nal_unit_type.is_parameter_set(),
            UnitKind::Hevc(h) => h.nal_unit_type.is_parameter_set(),
            UnitKind::Av1Obu(h) => h.obu_type == crate::format::ObuType::SequenceHeader,
            UnitKind::Vvc(h) => h.nal_unit_type.is_parameter_set(),
        }
    }

    /// True if the header alone marks a random access picture.
    pub fn is_random_access(&self) -> bool {
        match self {
            UnitKind::Avc(h) => h.nal_unit_type == h264::NalUnitType::CodedSliceIdr,
            UnitKind::Hevc(h) => h.nal_unit_type.is_irap(),
            UnitKind::Av1Obu(_) => false,
            UnitKind::Vvc(h) => h.nal_unit_type.is_irap(),
        }
    }
}

/// A framed unit with its decoded header.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub index: u64,
    pub kind: UnitKind,
    pub range: Option<ByteRange>,
    /// Kept for parameter sets and random access slices only
    pub payload: Option<Bytes>,
}

/// A unit handed to [`StreamParser::parse_unit`].
#[derive(Debug, Clone, Copy)]
pub struct UnitInput<'a> {
    pub index: u64,
    /// Unit bytes, with or without start code
    pub data: &'a [u8],
    pub range: Option<ByteRange>,
}

/// What a parser learned from one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub kind: UnitKind,
    /// Display name, e.g. `"SPS(0)"` or `"Slice(POC 4)"`
    pub name: String,
    /// First unit of a random access picture
    pub random_access_point: bool,
}

impl UnitOutcome {
    pub fn new(kind: UnitKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            random_access_point: false,
        }
    }

    pub fn with_random_access(mut self, random_access_point: bool) -> Self {
        self.random_access_point = random_access_point;
        self
    }
}

/// Result of the external `parse_unit` operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub success: bool,
    pub unit_type_name: String,
    pub byte_size: usize,
    /// Entry of the access unit that ended before this unit, if any
    pub bitrate_entry: Option<crate::av::BitrateEntry>,
    pub failure: Option<String>,
}

/// Parameter sets and file position needed to start decoding at a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeekInfo {
    /// Parameter set units including their start codes
    pub parameter_sets: Vec<Bytes>,
    pub file_pos: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaFormat {
    Monochrome,
    Yuv420,
    Yuv422,
    Yuv444,
}

impl ChromaFormat {
    pub fn from_idc(idc: u32) -> Option<Self> {
        match idc {
            0 => Some(ChromaFormat::Monochrome),
            1 => Some(ChromaFormat::Yuv420),
            2 => Some(ChromaFormat::Yuv422),
            3 => Some(ChromaFormat::Yuv444),
            _ => None,
        }
    }

    /// Horizontal and vertical chroma subsampling factors
    pub fn subsampling(&self) -> (u32, u32) {
        match self {
            ChromaFormat::Monochrome | ChromaFormat::Yuv444 => (1, 1),
            ChromaFormat::Yuv420 => (2, 2),
            ChromaFormat::Yuv422 => (2, 1),
        }
    }
}

/// Stream properties taken from the active parameter sets.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub codec: Codec,
    pub profile: Option<u32>,
    pub level: Option<u32>,
    /// Display size after cropping
    pub frame_size: Option<(u32, u32)>,
    pub chroma_format: Option<ChromaFormat>,
    /// Luma and chroma bit depth
    pub bit_depth: Option<(u8, u8)>,
    pub frame_rate: Option<f64>,
    pub sample_aspect_ratio: Option<(u32, u32)>,
    pub unit_count: u64,
    pub frame_count: usize,
    pub file_size: u64,
    pub bytes_before_first_unit: u64,
    /// Set when access units and POCs are not fully derived for this codec
    pub incomplete: bool,
}

impl StreamInfo {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            profile: None,
            level: None,
            frame_size: None,
            chroma_format: None,
            bit_depth: None,
            frame_rate: None,
            sample_aspect_ratio: None,
            unit_count: 0,
            frame_count: 0,
            file_size: 0,
            bytes_before_first_unit: 0,
            incomplete: false,
        }
    }
}

const SAR_WIDTHS: [u32; 17] = [0, 1, 12, 10, 16, 40, 24, 20, 32, 80, 18, 15, 64, 160, 4, 3, 2];
const SAR_HEIGHTS: [u32; 17] = [0, 1, 11, 11, 11, 33, 11, 11, 11, 33, 11, 11, 33, 99, 3, 2, 1];

/// Maps `aspect_ratio_idc` (H.264 Table E-1, shared by H.265 and H.266)
/// to a sample aspect ratio. 255 selects the explicit value.
pub fn sample_aspect_ratio(idc: u8, explicit: (u16, u16)) -> Option<(u32, u32)> {
    match idc {
        1..=16 => Some((SAR_WIDTHS[idc as usize], SAR_HEIGHTS[idc as usize])),
        255 if explicit.0 > 0 && explicit.1 > 0 => Some((explicit.0 as u32, explicit.1 as u32)),
        _ => None,
    }
}

/// Returns `data` without a leading `00 00 01` or `00 00 00 01`.
pub fn strip_start_code(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0, 0, 1]) {
        &data[3..]
    } else if data.starts_with(&[0, 0, 0, 1]) {
        &data[4..]
    } else {
        data
    }
}

/// Returns `data` with a four byte start code in front.
pub fn with_start_code(data: &[u8]) -> Bytes {
    let payload = strip_start_code(data);
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.extend_from_slice(&[0, 0, 0, 1]);
    out.extend_from_slice(payload);
    Bytes::from(out)
}

/// Common trait for codec stream parsers
pub trait StreamParser: Send {
    fn codec(&self) -> Codec;

    /// Decodes only the unit header.
    fn classify(&self, data: &[u8]) -> Result<UnitKind>;

    /// Parses one unit and updates frames and access units.
    ///
    /// On error the unit's bytes still count toward the current access
    /// unit and the open frame is left untouched.
    fn parse_unit(&mut self, input: UnitInput<'_>, trace: &mut TraceScope<'_>)
        -> Result<UnitOutcome>;

    /// Closes the last access unit and frame. Calling it again is a no-op.
    fn finalize(&mut self) -> Result<()>;

    fn assembler(&self) -> &AccessUnitAssembler;

    fn assembler_mut(&mut self) -> &mut AccessUnitAssembler;

    fn seek_info(&self, frame_index: usize) -> Option<SeekInfo>;

    /// Container configuration record built from the active parameter sets.
    fn extradata(&self) -> Option<Bytes>;

    fn stream_info(&self) -> StreamInfo;

    fn frames(&self) -> &FrameList {
        self.assembler().frames()
    }

    /// Takes the access units completed since the last call.
    fn drain_access_units(&mut self) -> Vec<AccessUnitEnd> {
        self.assembler_mut().drain_completed()
    }
}

/// Creates the parser for `codec`.
pub fn parser_for(codec: Codec, frame_limit: Option<usize>) -> Box<dyn StreamParser> {
    let assembler = AccessUnitAssembler::new().with_frame_limit(frame_limit);
    match codec {
        Codec::Avc => Box::new(h264::AvcParser::with_assembler(assembler)),
        Codec::Hevc => Box::new(h265::HevcParser::with_assembler(assembler)),
        Codec::Av1 => Box::new(av1::Av1Parser::with_assembler(assembler)),
        Codec::Vvc => Box::new(vvc::VvcParser::with_assembler(assembler)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sample_aspect_ratio() {
        assert_eq!(sample_aspect_ratio(1, (0, 0)), Some((1, 1)));
        assert_eq!(sample_aspect_ratio(2, (0, 0)), Some((12, 11)));
        assert_eq!(sample_aspect_ratio(16, (0, 0)), Some((2, 1)));
        assert_eq!(sample_aspect_ratio(255, (4, 3)), Some((4, 3)));
        assert_eq!(sample_aspect_ratio(0, (4, 3)), None);
        assert_eq!(sample_aspect_ratio(17, (0, 0)), None);
    }

    #[test]
    fn test_strip_start_code() {
        assert_eq!(strip_start_code(&[0, 0, 1, 0x67]), &[0x67]);
        assert_eq!(strip_start_code(&[0, 0, 0, 1, 0x67]), &[0x67]);
        assert_eq!(strip_start_code(&[0x67, 0x00]), &[0x67, 0x00]);
        assert_eq!(&with_start_code(&[0, 0, 1, 0x68])[..], &[0, 0, 0, 1, 0x68]);
    }
}
