use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use super::ps::{Pps, Sps, Vps};
use super::slice::{DecodeContext, SliceSegmentHeader};
use super::types::{NalHeader, NalUnitType};
use crate::av::Frame;
use crate::codec::h264::sei::split_messages;
use crate::codec::{
    strip_start_code, with_start_code, AccessUnitAssembler, ChromaFormat, Codec,
    ParameterSetRegistry, SeekInfo, StreamInfo, StreamParser, UnitInput, UnitKind, UnitOutcome,
};
use crate::error::Result;
use crate::trace::TraceScope;
use crate::utils::{unescape_rbsp, BitReader};

#[derive(Debug, Clone)]
enum SeekingUnit {
    Vps { id: u32, data: Bytes },
    Sps { id: u32, data: Bytes },
    Pps { id: u32, data: Bytes },
    Slice { poc: i64, file_pos: Option<u64> },
}

/// H.265 Annex B stream parser.
///
/// Access units are split per 7.4.2.4.4, which only needs the NAL header
/// and the first bit of a slice segment, so the boundary is known before
/// the unit body is parsed.
#[derive(Debug)]
pub struct HevcParser {
    assembler: AccessUnitAssembler,
    vps: ParameterSetRegistry<Vps>,
    sps: ParameterSetRegistry<Sps>,
    pps: ParameterSetRegistry<Pps>,
    context: DecodeContext,
    seeking: Vec<SeekingUnit>,
    /// A VCL unit was counted since the last boundary
    au_has_vcl: bool,
    current_sps_id: Option<u32>,
}

impl Default for HevcParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HevcParser {
    pub fn new() -> Self {
        Self::with_assembler(AccessUnitAssembler::new())
    }

    pub fn with_assembler(assembler: AccessUnitAssembler) -> Self {
        Self {
            assembler,
            vps: ParameterSetRegistry::new("VPS"),
            sps: ParameterSetRegistry::new("SPS"),
            pps: ParameterSetRegistry::new("PPS"),
            context: DecodeContext::default(),
            seeking: Vec::new(),
            au_has_vcl: false,
            current_sps_id: None,
        }
    }

    pub fn sps(&self) -> &ParameterSetRegistry<Sps> {
        &self.sps
    }

    fn is_boundary(&self, header: &NalHeader, payload: &[u8]) -> bool {
        if !self.au_has_vcl {
            return false;
        }
        let nal_type = header.nal_unit_type;
        if nal_type.starts_access_unit() {
            return true;
        }
        // first_slice_segment_in_pic_flag is the first payload bit
        nal_type.is_vcl() && payload.first().map(|b| b & 0x80 != 0).unwrap_or(false)
    }

    fn parse_nal(
        &mut self,
        input: &UnitInput<'_>,
        header: NalHeader,
        payload: &[u8],
        trace: &mut TraceScope<'_>,
    ) -> Result<UnitOutcome> {
        let kind = UnitKind::Hevc(header);
        let nal_type = header.nal_unit_type;
        match nal_type {
            NalUnitType::Vps => {
                let mut reader = BitReader::with_emulation_prevention(payload);
                let vps = Vps::parse(&mut reader, &mut trace.child("video_parameter_set_rbsp"))?;
                let id = vps.vps_video_parameter_set_id;
                log::debug!("VPS {}", id);
                self.vps.register(id, vps);
                self.seeking.push(SeekingUnit::Vps {
                    id,
                    data: with_start_code(input.data),
                });
                Ok(UnitOutcome::new(kind, format!("VPS({})", id)))
            }
            NalUnitType::Sps => {
                let mut reader = BitReader::with_emulation_prevention(payload);
                let sps = Sps::parse(&mut reader, &mut trace.child("seq_parameter_set_rbsp"))?;
                let id = sps.sps_seq_parameter_set_id;
                log::debug!(
                    "SPS {} {}x{}",
                    id,
                    sps.pic_width_in_luma_samples,
                    sps.pic_height_in_luma_samples
                );
                self.sps.register(id, sps);
                self.seeking.push(SeekingUnit::Sps {
                    id,
                    data: with_start_code(input.data),
                });
                Ok(UnitOutcome::new(kind, format!("SPS({})", id)))
            }
            NalUnitType::Pps => {
                let mut reader = BitReader::with_emulation_prevention(payload);
                let pps = Pps::parse(&mut reader, &mut trace.child("pic_parameter_set_rbsp"))?;
                let id = pps.pps_pic_parameter_set_id;
                log::debug!("PPS {} referencing SPS {}", id, pps.pps_seq_parameter_set_id);
                self.pps.register(id, pps);
                self.seeking.push(SeekingUnit::Pps {
                    id,
                    data: with_start_code(input.data),
                });
                Ok(UnitOutcome::new(kind, format!("PPS({})", id)))
            }
            NalUnitType::PrefixSei | NalUnitType::SuffixSei => {
                let messages = split_messages(&unescape_rbsp(payload))?;
                let mut scope = trace.child("sei_rbsp");
                for message in &messages {
                    scope.field("payload_type", message.payload_type);
                }
                Ok(UnitOutcome::new(kind, format!("SEI(x{})", messages.len())))
            }
            NalUnitType::Eos => {
                self.context.end_of_sequence();
                Ok(UnitOutcome::new(kind, nal_type.name()))
            }
            t if t.is_slice() => self.parse_slice(input, header, payload, trace),
            t if t.is_vcl() => {
                self.assembler.extend_frame(input.range);
                Ok(UnitOutcome::new(kind, nal_type.name()))
            }
            _ => Ok(UnitOutcome::new(kind, nal_type.name())),
        }
    }

    fn parse_slice(
        &mut self,
        input: &UnitInput<'_>,
        header: NalHeader,
        payload: &[u8],
        trace: &mut TraceScope<'_>,
    ) -> Result<UnitOutcome> {
        let mut reader = BitReader::with_emulation_prevention(payload);
        let slice = SliceSegmentHeader::parse(
            &mut reader,
            &header,
            &self.sps,
            &self.pps,
            &mut trace.child("slice_segment_header"),
        )?;
        let sps = self.sps.require(slice.seq_parameter_set_id)?;
        let order = self.context.picture_order(&slice, &header, sps)?;
        let poc = order.global_poc;
        trace.field("PicOrderCntVal", order.pic_order_cnt_val);
        trace.field("global_poc", poc);
        self.current_sps_id = Some(slice.seq_parameter_set_id);

        let irap = header.nal_unit_type.is_irap();
        if let Some(slice_type) = slice.slice_type {
            self.assembler.record_slice(slice_type.name(), irap);
        }

        let mut name = format!("Slice(POC {})", poc);
        if slice.first_slice_segment_in_pic_flag {
            if self.context.is_random_access_skip(&header, &order) {
                log::debug!("leading picture POC {} precedes the first random access point", poc);
                trace.field("random_access_skip", 1);
                name.push_str(" skipped");
            }
            if irap {
                self.seeking.push(SeekingUnit::Slice {
                    poc,
                    file_pos: input.range.map(|r| r.start),
                });
            }
            self.assembler.open_frame(
                Frame::new(poc)
                    .with_layer(header.nuh_layer_id as u32)
                    .with_range(input.range)
                    .with_random_access(irap),
            )?;
        } else {
            self.assembler.extend_frame(input.range);
        }
        Ok(UnitOutcome::new(UnitKind::Hevc(header), name)
            .with_random_access(irap && slice.first_slice_segment_in_pic_flag))
    }

    fn active_sps(&self) -> Option<&Sps> {
        self.current_sps_id
            .and_then(|id| self.sps.lookup(id))
            .or_else(|| self.sps.first())
    }
}

impl StreamParser for HevcParser {
    fn codec(&self) -> Codec {
        Codec::Hevc
    }

    fn classify(&self, data: &[u8]) -> Result<UnitKind> {
        Ok(UnitKind::Hevc(NalHeader::parse(strip_start_code(data))?))
    }

    fn parse_unit(
        &mut self,
        input: UnitInput<'_>,
        trace: &mut TraceScope<'_>,
    ) -> Result<UnitOutcome> {
        let data = strip_start_code(input.data);
        let header = match NalHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                self.assembler.add_bytes(input.data.len());
                return Err(e);
            }
        };
        trace.field("nal_unit_type", header);
        let payload = &data[2..];

        if self.is_boundary(&header, payload) {
            self.assembler.end_access_unit(None);
            self.au_has_vcl = false;
        }
        self.assembler.add_bytes(input.data.len());
        if header.nal_unit_type.is_vcl() {
            self.au_has_vcl = true;
        }
        self.parse_nal(&input, header, payload, trace)
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
        let mut vps = BTreeMap::new();
        let mut sps = BTreeMap::new();
        let mut pps = BTreeMap::new();
        for unit in &self.seeking {
            match unit {
                SeekingUnit::Vps { id, data } => {
                    vps.insert(*id, data.clone());
                }
                SeekingUnit::Sps { id, data } => {
                    sps.insert(*id, data.clone());
                }
                SeekingUnit::Pps { id, data } => {
                    pps.insert(*id, data.clone());
                }
                SeekingUnit::Slice { poc, file_pos } if *poc == target => {
                    return Some(SeekInfo {
                        parameter_sets: vps
                            .into_values()
                            .chain(sps.into_values())
                            .chain(pps.into_values())
                            .collect(),
                        file_pos: *file_pos,
                    });
                }
                SeekingUnit::Slice { .. } => {}
            }
        }
        None
    }

    fn extradata(&self) -> Option<Bytes> {
        let vps = self.seeking.iter().find_map(|u| match u {
            SeekingUnit::Vps { data, .. } => Some(data),
            _ => None,
        })?;
        let sps = self.seeking.iter().find_map(|u| match u {
            SeekingUnit::Sps { data, .. } => Some(data),
            _ => None,
        })?;
        let pps = self.seeking.iter().find_map(|u| match u {
            SeekingUnit::Pps { data, .. } => Some(data),
            _ => None,
        })?;
        let mut out = BytesMut::with_capacity(vps.len() + sps.len() + pps.len());
        out.extend_from_slice(vps);
        out.extend_from_slice(sps);
        out.extend_from_slice(pps);
        Some(out.freeze())
    }

    fn stream_info(&self) -> StreamInfo {
        let mut info = StreamInfo::new(Codec::Hevc);
        info.frame_count = self.assembler.frames().len();
        if let Some(sps) = self.active_sps() {
            let ptl = sps.profile_tier_level;
            info.profile = Some(ptl.general_profile_idc as u32);
            info.level = Some(ptl.general_level_idc as u32);
            info.frame_size = Some(sps.frame_size());
            info.chroma_format = ChromaFormat::from_idc(sps.chroma_format_idc);
            info.bit_depth = Some((sps.bit_depth_luma, sps.bit_depth_chroma));
            info.frame_rate = self
                .vps
                .lookup(sps.sps_video_parameter_set_id)
                .and_then(|vps| vps.frame_rate());
        }
        info
    }
}
