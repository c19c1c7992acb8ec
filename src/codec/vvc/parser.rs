use bytes::{Bytes, BytesMut};

use super::types::{NalHeader, NalUnitType};
use crate::av::Frame;
use crate::codec::{
    strip_start_code, with_start_code, AccessUnitAssembler, Codec, SeekInfo, StreamInfo,
    StreamParser, UnitInput, UnitKind, UnitOutcome,
};
use crate::error::Result;
use crate::trace::TraceScope;
use crate::utils::BitReader;

#[derive(Debug, Clone)]
enum SeekingUnit {
    ParameterSet {
        nal_type: NalUnitType,
        id: u32,
        data: Bytes,
    },
    Picture {
        poc: i64,
        file_pos: Option<u64>,
    },
}

/// H.266 Annex B stream parser.
///
/// Only NAL headers and parameter set ids are decoded. Pictures are
/// numbered in decoding order instead of by POC, which
/// [`StreamInfo::incomplete`] reports.
#[derive(Debug)]
pub struct VvcParser {
    assembler: AccessUnitAssembler,
    seeking: Vec<SeekingUnit>,
    /// A VCL unit was counted since the last boundary
    au_has_vcl: bool,
    /// A picture header unit announced the next picture
    picture_header_pending: bool,
    pictures: i64,
}

impl Default for VvcParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VvcParser {
    pub fn new() -> Self {
        Self::with_assembler(AccessUnitAssembler::new())
    }

    pub fn with_assembler(assembler: AccessUnitAssembler) -> Self {
        Self {
            assembler,
            seeking: Vec::new(),
            au_has_vcl: false,
            picture_header_pending: false,
            pictures: 0,
        }
    }

    /// `sh_picture_header_in_slice_header_flag` is the first slice payload bit.
    fn picture_header_in_slice(payload: &[u8]) -> bool {
        payload.first().map(|b| b & 0x80 != 0).unwrap_or(false)
    }

    fn is_boundary(&self, header: &NalHeader, payload: &[u8]) -> bool {
        if !self.au_has_vcl {
            return false;
        }
        let nal_type = header.nal_unit_type;
        nal_type.starts_access_unit()
            || (nal_type.is_slice() && Self::picture_header_in_slice(payload))
    }

    fn parameter_set_id(nal_type: NalUnitType, payload: &[u8], trace: &mut TraceScope<'_>) -> Result<u32> {
        let mut reader = BitReader::with_emulation_prevention(payload);
        match nal_type {
            NalUnitType::Vps => trace.bits(&mut reader, 4, "vps_video_parameter_set_id"),
            NalUnitType::Sps => trace.bits(&mut reader, 4, "sps_seq_parameter_set_id"),
            _ => trace.bits(&mut reader, 6, "pps_pic_parameter_set_id"),
        }
    }

    fn parse_slice(
        &mut self,
        input: &UnitInput<'_>,
        header: NalHeader,
        payload: &[u8],
    ) -> Result<UnitOutcome> {
        let kind = UnitKind::Vvc(header);
        let nal_type = header.nal_unit_type;
        self.assembler.record_slice(nal_type.name(), nal_type.is_irap());

        if !(self.picture_header_pending || Self::picture_header_in_slice(payload)) {
            self.assembler.extend_frame(input.range);
            return Ok(UnitOutcome::new(kind, nal_type.name()));
        }

        self.picture_header_pending = false;
        let poc = self.pictures;
        self.pictures += 1;
        let rap = nal_type.is_irap();
        if rap {
            self.seeking.push(SeekingUnit::Picture {
                poc,
                file_pos: input.range.map(|r| r.start),
            });
        }
        self.assembler.open_frame(
            Frame::new(poc)
                .with_layer(header.nuh_layer_id as u32)
                .with_range(input.range)
                .with_random_access(rap),
        )?;
        Ok(UnitOutcome::new(kind, format!("{}(picture {})", nal_type.name(), poc))
            .with_random_access(rap))
    }
}

impl StreamParser for VvcParser {
    fn codec(&self) -> Codec {
        Codec::Vvc
    }

    fn classify(&self, data: &[u8]) -> Result<UnitKind> {
        Ok(UnitKind::Vvc(NalHeader::parse(strip_start_code(data))?))
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

        let nal_type = header.nal_unit_type;
        if nal_type.is_vcl() {
            self.au_has_vcl = true;
        }
        let kind = UnitKind::Vvc(header);
        match nal_type {
            t if t.is_parameter_set() => {
                let id = Self::parameter_set_id(t, payload, trace)?;
                self.seeking.push(SeekingUnit::ParameterSet {
                    nal_type: t,
                    id,
                    data: with_start_code(input.data),
                });
                Ok(UnitOutcome::new(kind, format!("{}({})", t.name(), id)))
            }
            NalUnitType::PictureHeader => {
                self.picture_header_pending = true;
                Ok(UnitOutcome::new(kind, nal_type.name()))
            }
            t if t.is_slice() => self.parse_slice(&input, header, payload),
            t if t.is_vcl() => {
                self.assembler.extend_frame(input.range);
                Ok(UnitOutcome::new(kind, t.name()))
            }
            _ => Ok(UnitOutcome::new(kind, nal_type.name())),
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
        let mut sets: Vec<(NalUnitType, u32, Bytes)> = Vec::new();
        for unit in &self.seeking {
            match unit {
                SeekingUnit::ParameterSet { nal_type, id, data } => {
                    sets.retain(|(t, i, _)| !(t == nal_type && i == id));
                    sets.push((*nal_type, *id, data.clone()));
                }
                SeekingUnit::Picture { poc, file_pos } if *poc == target => {
                    sets.sort_by_key(|(t, i, _)| (t.id(), *i));
                    return Some(SeekInfo {
                        parameter_sets: sets.into_iter().map(|(_, _, data)| data).collect(),
                        file_pos: *file_pos,
                    });
                }
                SeekingUnit::Picture { .. } => {}
            }
        }
        None
    }

    /// The first VPS, SPS and PPS with start codes.
    fn extradata(&self) -> Option<Bytes> {
        let first = |wanted: NalUnitType| {
            self.seeking.iter().find_map(|u| match u {
                SeekingUnit::ParameterSet { nal_type, data, .. } if *nal_type == wanted => {
                    Some(data.clone())
                }
                _ => None,
            })
        };
        let sps = first(NalUnitType::Sps)?;
        let pps = first(NalUnitType::Pps)?;
        let mut out = BytesMut::new();
        if let Some(vps) = first(NalUnitType::Vps) {
            out.extend_from_slice(&vps);
        }
        out.extend_from_slice(&sps);
        out.extend_from_slice(&pps);
        Some(out.freeze())
    }

    fn stream_info(&self) -> StreamInfo {
        let mut info = StreamInfo::new(Codec::Vvc);
        info.frame_count = self.assembler.frames().len();
        info.incomplete = true;
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::ByteRange;
    use pretty_assertions::assert_eq;

    fn nal(nal_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0, 0, 0, 1, 0x00, (nal_type << 3) | 0x01];
        data.extend_from_slice(payload);
        data
    }

    fn feed(parser: &mut VvcParser, units: &[Vec<u8>]) -> Vec<Result<UnitOutcome>> {
        let mut pos = 0u64;
        units
            .iter()
            .enumerate()
            .map(|(index, data)| {
                let range = ByteRange::new(pos, pos + data.len() as u64 - 1);
                pos += data.len() as u64;
                let input = UnitInput {
                    index: index as u64,
                    data,
                    range: Some(range),
                };
                parser.parse_unit(input, &mut TraceScope::disabled())
            })
            .collect()
    }

    #[test]
    fn test_nal_header() {
        // SPS on layer 2
        let header = NalHeader::parse(&[0x02, 0x79]).unwrap();
        assert_eq!(header.nal_unit_type, NalUnitType::Sps);
        assert_eq!(header.nuh_layer_id, 2);
        assert_eq!(header.temporal_id(), 0);
        assert!(NalHeader::parse(&[0x80, 0x79]).is_err());
        for id in 0..32u8 {
            assert_eq!(NalUnitType::from(id).id(), id);
        }
    }

    #[test]
    fn test_pictures_numbered_in_decoding_order() {
        let units = [
            nal(15, &[0x00, 0x80]), // SPS 0
            nal(16, &[0x00, 0x80]), // PPS 0
            nal(7, &[0x80, 0x11]),  // IDR with picture header in slice
            nal(0, &[0x00, 0x22]),  // second slice of the same picture
            nal(19, &[0x80]),       // picture header
            nal(0, &[0x00, 0x33]),
            nal(0, &[0x80, 0x44]),
        ];
        let mut parser = VvcParser::new();
        let results = feed(&mut parser, &units);
        assert_eq!(results[0].as_ref().unwrap().name, "SPS(0)");
        assert!(results[2].as_ref().unwrap().random_access_point);
        assert_eq!(results[6].as_ref().unwrap().name, "TRAIL(picture 2)");
        parser.finalize().unwrap();

        let pocs: Vec<i64> = parser.frames().display_order().map(|f| f.poc).collect();
        assert_eq!(pocs, vec![0, 1, 2]);
        let entries = parser.drain_access_units();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].bitrate.byte_size,
            units[..4].iter().map(|u| u.len() as u64).sum::<u64>()
        );
        assert!(parser.stream_info().incomplete);

        let info = parser.seek_info(0).unwrap();
        assert_eq!(info.parameter_sets.len(), 2);
        assert_eq!(info.file_pos, Some((units[0].len() + units[1].len()) as u64));
        assert!(parser.extradata().is_some());
    }
}
