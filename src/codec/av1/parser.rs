use bytes::Bytes;

use super::frame::{DecodeContext, FrameHeader};
use super::sequence::SequenceHeader;
use crate::av::{ByteRange, Frame};
use crate::codec::{
    AccessUnitAssembler, Codec, ParameterSetRegistry, SeekInfo, StreamInfo, StreamParser,
    UnitInput, UnitKind, UnitOutcome,
};
use crate::error::Result;
use crate::format::extradata::write_av1c;
use crate::format::{ObuHeader, ObuType};
use crate::trace::TraceScope;
use crate::utils::BitReader;

#[derive(Debug, Clone)]
enum SeekingUnit {
    SequenceHeader { data: Bytes },
    Frame { poc: i64, file_pos: Option<u64> },
}

/// AV1 low overhead bitstream parser.
///
/// A temporal unit is one access unit. Units of a temporal unit that come
/// before its shown frame (delimiter, sequence header, hidden frames) are
/// added to the range of that frame.
#[derive(Debug)]
pub struct Av1Parser {
    assembler: AccessUnitAssembler,
    sequence_headers: ParameterSetRegistry<SequenceHeader>,
    /// Complete OBU of the active sequence header
    sequence_header_obu: Option<Bytes>,
    context: DecodeContext,
    seeking: Vec<SeekingUnit>,
    delimiter_present: bool,
    shown_in_au: bool,
    pending_range: Option<ByteRange>,
}

impl Default for Av1Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Av1Parser {
    pub fn new() -> Self {
        Self::with_assembler(AccessUnitAssembler::new())
    }

    pub fn with_assembler(assembler: AccessUnitAssembler) -> Self {
        Self {
            assembler,
            sequence_headers: ParameterSetRegistry::new("sequence header"),
            sequence_header_obu: None,
            context: DecodeContext::default(),
            seeking: Vec::new(),
            delimiter_present: false,
            shown_in_au: false,
            pending_range: None,
        }
    }

    pub fn sequence_header(&self) -> Option<&SequenceHeader> {
        self.sequence_headers.lookup(0)
    }

    fn is_boundary(&self, header: &ObuHeader) -> bool {
        match header.obu_type {
            ObuType::TemporalDelimiter => true,
            // A frame header OBU while tile data is outstanding is a copy
            ObuType::FrameHeader if self.context.seen_frame_header() => false,
            ObuType::FrameHeader | ObuType::Frame => !self.delimiter_present && self.shown_in_au,
            _ => false,
        }
    }

    fn add_to_range(&mut self, range: Option<ByteRange>) {
        if self.shown_in_au {
            self.assembler.extend_frame(range);
            return;
        }
        self.pending_range = match (self.pending_range, range) {
            (Some(mut pending), Some(range)) => {
                pending.end = pending.end.max(range.end);
                Some(pending)
            }
            (pending, range) => pending.or(range),
        };
    }

    fn parse_frame_header(
        &mut self,
        input: &UnitInput<'_>,
        header: ObuHeader,
        payload: &[u8],
        trace: &mut TraceScope<'_>,
    ) -> Result<UnitOutcome> {
        let kind = UnitKind::Av1Obu(header);
        if header.obu_type == ObuType::FrameHeader && self.context.seen_frame_header() {
            return Ok(UnitOutcome::new(kind, "Frame Header (copy)"));
        }

        let seq = self.sequence_headers.require(0)?;
        let mut reader = BitReader::new(payload);
        let frame = FrameHeader::parse(
            &mut reader,
            seq,
            &self.context.ref_frame_types(),
            header.temporal_id,
            header.spatial_id,
            &mut trace.child("uncompressed_header"),
        )?;
        let poc = self.context.picture_order(&frame, seq);
        trace.field("poc", poc);
        self.context
            .set_seen_frame_header(header.obu_type == ObuType::FrameHeader && !frame.show_existing_frame);

        let label = if frame.show_existing_frame {
            self.assembler
                .record_slice("SHOW_EXISTING", frame.frame_type.is_intra());
            format!("{}(show existing POC {})", header.obu_type, poc)
        } else {
            self.assembler
                .record_slice(frame.frame_type.name(), frame.frame_type.is_intra());
            let hidden = if frame.show_frame { "" } else { " hidden" };
            format!("{}({} POC {}{})", header.obu_type, frame.frame_type, poc, hidden)
        };

        let rap = frame.is_random_access();
        if frame.show_frame {
            let range = self.pending_range.take().or(input.range);
            if rap {
                self.seeking.push(SeekingUnit::Frame {
                    poc,
                    file_pos: range.map(|r| r.start),
                });
            }
            self.shown_in_au = true;
            self.assembler.open_frame(
                Frame::new(poc)
                    .with_layer(header.spatial_id as u32)
                    .with_range(range)
                    .with_random_access(rap),
            )?;
        } else {
            log::debug!("hidden {} frame poc {}", frame.frame_type, poc);
        }
        Ok(UnitOutcome::new(kind, label).with_random_access(rap))
    }
}

impl StreamParser for Av1Parser {
    fn codec(&self) -> Codec {
        Codec::Av1
    }

    fn classify(&self, data: &[u8]) -> Result<UnitKind> {
        Ok(UnitKind::Av1Obu(ObuHeader::parse(data)?.0))
    }

    fn parse_unit(
        &mut self,
        input: UnitInput<'_>,
        trace: &mut TraceScope<'_>,
    ) -> Result<UnitOutcome> {
        let (header, header_len) = match ObuHeader::parse(input.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.assembler.add_bytes(input.data.len());
                return Err(e);
            }
        };
        trace.field("obu_type", header.obu_type);
        if header.has_extension {
            trace.field("temporal_id", header.temporal_id);
            trace.field("spatial_id", header.spatial_id);
        }

        if self.is_boundary(&header) {
            self.assembler.end_access_unit(None);
            self.shown_in_au = false;
            self.pending_range = None;
        }
        self.assembler.add_bytes(input.data.len());
        self.add_to_range(input.range);

        let end = header
            .obu_size
            .map(|size| header_len + size as usize)
            .unwrap_or(input.data.len())
            .min(input.data.len());
        let payload = &input.data[header_len..end];
        let kind = UnitKind::Av1Obu(header);

        match header.obu_type {
            ObuType::TemporalDelimiter => {
                self.delimiter_present = true;
                self.context.set_seen_frame_header(false);
                Ok(UnitOutcome::new(kind, header.obu_type.name()))
            }
            ObuType::SequenceHeader => {
                let mut reader = BitReader::new(payload);
                let seq =
                    SequenceHeader::parse(&mut reader, &mut trace.child("sequence_header_obu"))?;
                let (width, height) = seq.max_frame_size();
                log::debug!(
                    "sequence header profile {} {}x{} order hint bits {}",
                    seq.seq_profile,
                    width,
                    height,
                    seq.order_hint_bits
                );
                self.sequence_headers.register(0, seq);
                let data = Bytes::copy_from_slice(&input.data[..end]);
                self.sequence_header_obu = Some(data.clone());
                self.seeking.push(SeekingUnit::SequenceHeader { data });
                Ok(UnitOutcome::new(kind, header.obu_type.name()))
            }
            ObuType::FrameHeader | ObuType::Frame => {
                self.parse_frame_header(&input, header, payload, trace)
            }
            ObuType::TileGroup => {
                self.context.set_seen_frame_header(false);
                Ok(UnitOutcome::new(kind, header.obu_type.name()))
            }
            _ => Ok(UnitOutcome::new(kind, header.obu_type.name())),
        }
    }

    fn finalize(&mut self) -> Result<()> {
        self.assembler.finalize(None)
    }

    fn assembler(&self) -> &AccessUnitAssembler {
        &self.assembler
    }

    fn assembler_mut(&mut self) -> &mut AccessUnitAssembler {
        &mut self.assembler
    }

    fn seek_info(&self, frame_index: usize) -> Option<SeekInfo> {
        let target = self.assembler.frames().display(frame_index)?.poc;
        let mut sequence_header = None;
        for unit in &self.seeking {
            match unit {
                SeekingUnit::SequenceHeader { data } => sequence_header = Some(data.clone()),
                SeekingUnit::Frame { poc, file_pos } if *poc == target => {
                    return Some(SeekInfo {
                        parameter_sets: sequence_header.into_iter().collect(),
                        file_pos: *file_pos,
                    });
                }
                SeekingUnit::Frame { .. } => {}
            }
        }
        None
    }

    fn extradata(&self) -> Option<Bytes> {
        let seq = self.sequence_header()?;
        let obu = self.sequence_header_obu.as_ref()?;
        let (level, tier) = seq.level();
        let color = &seq.color_config;
        Some(write_av1c(
            seq.seq_profile,
            level,
            tier,
            color.high_bitdepth,
            color.twelve_bit,
            color.mono_chrome,
            (color.subsampling_x, color.subsampling_y),
            color.chroma_sample_position,
            obu,
        ))
    }

    fn stream_info(&self) -> StreamInfo {
        let mut info = StreamInfo::new(Codec::Av1);
        info.frame_count = self.assembler.frames().len();
        if let Some(seq) = self.sequence_header() {
            info.profile = Some(seq.seq_profile as u32);
            info.level = Some(seq.level().0 as u32);
            info.frame_size = Some(seq.max_frame_size());
            info.chroma_format = Some(seq.color_config.chroma_format());
            let depth = seq.color_config.bit_depth;
            info.bit_depth = Some((depth, depth));
            info.frame_rate = seq.frame_rate();
        }
        info
    }
}
