use bytes::Bytes;

use super::sei::{self, BufferingPeriod, Deferred, PicTiming};
use super::slice::{DecodeContext, SliceHeader};
use super::sps::{Pps, Sps};
use super::types::{NalHeader, NalUnitType};
use crate::av::Frame;
use crate::codec::{
    strip_start_code, with_start_code, AccessUnitAssembler, ChromaFormat, Codec,
    ParameterSetRegistry, SeekInfo, StreamInfo, StreamParser, UnitInput, UnitKind, UnitOutcome,
};
use crate::error::{DemuxError, Result};
use crate::format::extradata::write_avcc;
use crate::hrd::HrdAuTiming;
use crate::trace::TraceScope;
use crate::utils::{unescape_rbsp, BitReader};

/// Units needed to restart decoding at a random access point.
#[derive(Debug, Clone)]
enum SeekingUnit {
    Sps { id: u32, data: Bytes },
    Pps { id: u32, data: Bytes },
    Slice { poc: i64, file_pos: Option<u64> },
}

/// H.264 Annex B stream parser.
#[derive(Debug)]
pub struct AvcParser {
    assembler: AccessUnitAssembler,
    sps: ParameterSetRegistry<Sps>,
    pps: ParameterSetRegistry<Pps>,
    context: DecodeContext,
    seeking: Vec<SeekingUnit>,
    delimiter_present: bool,
    last_slice_poc: Option<i64>,
    last_unit_vcl: bool,
    partition_a_seen: bool,
    /// SPS of the most recent slice
    current_sps_id: Option<u32>,
    buffering_period: Option<BufferingPeriod>,
    pic_timing: Option<PicTiming>,
    pending_buffering_period: Option<Deferred<BufferingPeriod>>,
    pending_pic_timing: Option<Deferred<PicTiming>>,
    au_has_buffering_period: bool,
    unit_counted: bool,
}

impl Default for AvcParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AvcParser {
    pub fn new() -> Self {
        Self::with_assembler(AccessUnitAssembler::new())
    }

    pub fn with_assembler(assembler: AccessUnitAssembler) -> Self {
        Self {
            assembler,
            sps: ParameterSetRegistry::new("SPS"),
            pps: ParameterSetRegistry::new("PPS"),
            context: DecodeContext::default(),
            seeking: Vec::new(),
            delimiter_present: false,
            last_slice_poc: None,
            last_unit_vcl: false,
            partition_a_seen: false,
            current_sps_id: None,
            buffering_period: None,
            pic_timing: None,
            pending_buffering_period: None,
            pending_pic_timing: None,
            au_has_buffering_period: false,
            unit_counted: false,
        }
    }

    pub fn sps(&self) -> &ParameterSetRegistry<Sps> {
        &self.sps
    }

    pub fn pps(&self) -> &ParameterSetRegistry<Pps> {
        &self.pps
    }

    /// Counts the unit, closing the current access unit first if the unit
    /// starts a new one.
    fn account(&mut self, boundary: bool, len: usize) {
        if boundary {
            let timing = self.hrd_timing();
            self.assembler.end_access_unit(timing);
            self.au_has_buffering_period = false;
            self.partition_a_seen = false;
            // the next slice opens a new access unit without comparing POCs
            self.last_slice_poc = None;
        }
        self.assembler.add_bytes(len);
        self.unit_counted = true;
    }

    /// Moves SEI values parsed in this unit into effect, after the access
    /// unit boundary was handled.
    fn apply_pending_sei(&mut self) {
        match self.pending_buffering_period.take() {
            Some(Deferred::Ready(bp)) => {
                self.buffering_period = Some(bp);
                self.au_has_buffering_period = true;
            }
            other => self.pending_buffering_period = other,
        }
        match self.pending_pic_timing.take() {
            Some(Deferred::Ready(pt)) => self.pic_timing = Some(pt),
            other => self.pending_pic_timing = other,
        }
    }

    /// Parses SEI messages that waited for the active SPS.
    fn resolve_deferred_sei(&mut self, sps_id: u32, trace: &mut TraceScope<'_>) {
        if let Some(Deferred::Waiting(payload)) = self.pending_buffering_period.clone() {
            let mut scope = trace.child("buffering_period (deferred)");
            self.pending_buffering_period =
                match BufferingPeriod::parse(&payload, &self.sps, &mut scope) {
                    Ok(bp) => Some(Deferred::Ready(bp)),
                    Err(e) => {
                        log::warn!("dropping deferred buffering period: {}", e);
                        scope.fail(&e);
                        None
                    }
                };
        }
        if let Some(Deferred::Waiting(payload)) = self.pending_pic_timing.clone() {
            let mut scope = trace.child("pic_timing (deferred)");
            let parsed = self
                .sps
                .require(sps_id)
                .and_then(|sps| PicTiming::parse(&payload, sps, &mut scope));
            self.pending_pic_timing = match parsed {
                Ok(pt) => Some(Deferred::Ready(pt)),
                Err(e) => {
                    log::warn!("dropping deferred pic timing: {}", e);
                    scope.fail(&e);
                    None
                }
            };
        }
    }

    /// HRD timing of the current access unit, if the stream signals NAL HRD
    /// parameters and both timing SEIs were seen.
    fn hrd_timing(&self) -> Option<HrdAuTiming> {
        let bp = self.buffering_period.as_ref()?;
        let pt = self.pic_timing.as_ref()?;
        let sps = self.sps.lookup(bp.seq_parameter_set_id)?;
        let vui = sps.vui.as_ref()?;
        let hrd = vui.nal_hrd.as_ref()?;
        let schedule = hrd.schedules.first()?;
        let timing = vui.timing?;
        let delay = bp.nal.first()?;
        if timing.time_scale == 0 {
            return None;
        }
        Some(HrdAuTiming {
            clock_tick: timing.num_units_in_tick as f64 / timing.time_scale as f64,
            bit_rate: schedule.bit_rate,
            cpb_size: schedule.cpb_size,
            cbr: schedule.cbr,
            low_delay: vui.low_delay_hrd_flag,
            initial_cpb_removal_delay: delay.delay,
            initial_cpb_removal_delay_offset: delay.offset,
            cpb_removal_delay: pt.cpb_removal_delay.unwrap_or(0),
            first_in_buffering_period: self.au_has_buffering_period
                || self.assembler.au_counter() == 0,
        })
    }

    fn parse_nal(
        &mut self,
        input: &UnitInput<'_>,
        header: NalHeader,
        trace: &mut TraceScope<'_>,
    ) -> Result<UnitOutcome> {
        let kind = UnitKind::Avc(header);
        let data = strip_start_code(input.data);
        let len = input.data.len();
        let payload = &data[1..];

        match header.nal_unit_type {
            NalUnitType::Sps => {
                self.account(!self.delimiter_present && self.last_unit_vcl, len);
                self.last_unit_vcl = false;
                let mut reader = BitReader::with_emulation_prevention(payload);
                let sps = Sps::parse(&mut reader, &mut trace.child("seq_parameter_set_rbsp"))?;
                let id = sps.seq_parameter_set_id;
                log::debug!("SPS {} profile {} level {}", id, sps.profile_idc, sps.level_idc);
                self.sps.register(id, sps);
                self.seeking.push(SeekingUnit::Sps {
                    id,
                    data: with_start_code(input.data),
                });
                Ok(UnitOutcome::new(kind, format!("SPS({})", id)))
            }
            NalUnitType::Pps => {
                self.account(!self.delimiter_present && self.last_unit_vcl, len);
                self.last_unit_vcl = false;
                let mut reader = BitReader::with_emulation_prevention(payload);
                let pps = Pps::parse(&mut reader, &mut trace.child("pic_parameter_set_rbsp"))?;
                let id = pps.pic_parameter_set_id;
                log::debug!("PPS {} referencing SPS {}", id, pps.seq_parameter_set_id);
                self.pps.register(id, pps);
                self.seeking.push(SeekingUnit::Pps {
                    id,
                    data: with_start_code(input.data),
                });
                Ok(UnitOutcome::new(kind, format!("PPS({})", id)))
            }
            NalUnitType::Sei => {
                self.account(!self.delimiter_present && self.last_unit_vcl, len);
                self.last_unit_vcl = false;
                let rbsp = unescape_rbsp(payload);
                let messages = sei::split_messages(&rbsp)?;
                let mut scope = trace.child("sei_rbsp");
                for message in &messages {
                    let mut msg_scope = scope.child(message.type_name());
                    msg_scope.field("payload_size", message.payload.len());
                    match message.payload_type {
                        sei::BUFFERING_PERIOD => {
                            self.pending_buffering_period = Some(
                                match BufferingPeriod::parse(&message.payload, &self.sps, &mut msg_scope) {
                                    Ok(bp) => Deferred::Ready(bp),
                                    Err(DemuxError::MissingParameterSet { .. }) => {
                                        Deferred::Waiting(message.payload.clone())
                                    }
                                    Err(e) => return Err(e),
                                },
                            );
                        }
                        sei::PIC_TIMING => {
                            let sps = self.current_sps_id.and_then(|id| self.sps.lookup(id));
                            self.pending_pic_timing = Some(match sps {
                                Some(sps) => {
                                    Deferred::Ready(PicTiming::parse(&message.payload, sps, &mut msg_scope)?)
                                }
                                None => {
                                    msg_scope.field("deferred", "no active SPS");
                                    Deferred::Waiting(message.payload.clone())
                                }
                            });
                        }
                        _ => {}
                    }
                }
                Ok(UnitOutcome::new(kind, format!("SEI(x{})", messages.len())))
            }
            NalUnitType::AccessUnitDelimiter => {
                self.delimiter_present = true;
                self.account(true, len);
                self.last_unit_vcl = false;
                Ok(UnitOutcome::new(kind, "AUD"))
            }
            NalUnitType::CodedSliceNonIdr
            | NalUnitType::CodedSliceIdr
            | NalUnitType::CodedSliceDataPartitionA => {
                let mut reader = BitReader::with_emulation_prevention(payload);
                let slice = SliceHeader::parse(
                    &mut reader,
                    &header,
                    &self.sps,
                    &self.pps,
                    &mut trace.child("slice_header"),
                )?;
                let sps_id = slice.seq_parameter_set_id;
                self.resolve_deferred_sei(sps_id, trace);
                let sps = self.sps.require(sps_id)?;

                let order = self.context.picture_order(&slice, sps);
                let poc = order.global_poc;
                trace.field("global_poc", poc);
                self.context.update(&slice, order);

                let boundary = !self.delimiter_present
                    && self.last_slice_poc.map(|last| last != poc).unwrap_or(false);
                self.account(boundary, len);
                self.last_slice_poc = Some(poc);
                self.last_unit_vcl = true;
                self.current_sps_id = Some(sps_id);
                if header.nal_unit_type == NalUnitType::CodedSliceDataPartitionA {
                    self.partition_a_seen = true;
                }

                let rap = slice.is_random_access();
                self.assembler.record_slice(slice.slice_type.name(), rap);
                let first_slice = slice.first_mb_in_slice == 0;
                if first_slice && rap {
                    self.seeking.push(SeekingUnit::Slice {
                        poc,
                        file_pos: input.range.map(|r| r.start),
                    });
                }
                let outcome = UnitOutcome::new(kind, format!("Slice(POC {})", poc))
                    .with_random_access(first_slice && rap);
                if first_slice {
                    self.assembler.open_frame(
                        Frame::new(poc)
                            .with_range(input.range)
                            .with_random_access(rap),
                    )?;
                } else {
                    self.assembler.extend_frame(input.range);
                }
                Ok(outcome)
            }
            NalUnitType::CodedSliceDataPartitionB | NalUnitType::CodedSliceDataPartitionC => {
                self.account(false, len);
                self.last_unit_vcl = true;
                if !self.partition_a_seen {
                    return Err(DemuxError::InvalidData("no partition A slice header found".into()));
                }
                self.assembler.extend_frame(input.range);
                Ok(UnitOutcome::new(kind, header.nal_unit_type.name()))
            }
            _ => {
                self.account(false, len);
                self.last_unit_vcl = false;
                Ok(UnitOutcome::new(kind, header.nal_unit_type.name()))
            }
        }
    }

    fn active_sps(&self) -> Option<&Sps> {
        self.current_sps_id
            .and_then(|id| self.sps.lookup(id))
            .or_else(|| self.sps.first())
    }
}

impl StreamParser for AvcParser {
    fn codec(&self) -> Codec {
        Codec::Avc
    }

    fn classify(&self, data: &[u8]) -> Result<UnitKind> {
        Ok(UnitKind::Avc(NalHeader::parse(strip_start_code(data))?))
    }

    fn parse_unit(
        &mut self,
        input: UnitInput<'_>,
        trace: &mut TraceScope<'_>,
    ) -> Result<UnitOutcome> {
        self.unit_counted = false;
        let result = match NalHeader::parse(strip_start_code(input.data)) {
            Ok(header) => {
                trace.field("nal_ref_idc", header.nal_ref_idc);
                trace.field("nal_unit_type", header);
                self.parse_nal(&input, header, trace)
            }
            Err(e) => Err(e),
        };
        if !self.unit_counted {
            self.assembler.add_bytes(input.data.len());
        }
        self.apply_pending_sei();
        result
    }

    fn finalize(&mut self) -> Result<()> {
        let timing = self.hrd_timing();
        self.assembler.finalize(timing)
    }

    fn assembler(&self) -> &AccessUnitAssembler {
        &self.assembler
    }

    fn assembler_mut(&mut self) -> &mut AccessUnitAssembler {
        &mut self.assembler
    }

    fn seek_info(&self, frame_index: usize) -> Option<SeekInfo> {
        let target = self.assembler.frames().display(frame_index)?.poc;
        let mut active_sps = std::collections::BTreeMap::new();
        let mut active_pps = std::collections::BTreeMap::new();
        for unit in &self.seeking {
            match unit {
                SeekingUnit::Sps { id, data } => {
                    active_sps.insert(*id, data.clone());
                }
                SeekingUnit::Pps { id, data } => {
                    active_pps.insert(*id, data.clone());
                }
                SeekingUnit::Slice { poc, file_pos } if *poc == target => {
                    return Some(SeekInfo {
                        parameter_sets: active_sps.into_values().chain(active_pps.into_values()).collect(),
                        file_pos: *file_pos,
                    });
                }
                SeekingUnit::Slice { .. } => {}
            }
        }
        None
    }

    fn extradata(&self) -> Option<Bytes> {
        let sps = self.seeking.iter().find_map(|u| match u {
            SeekingUnit::Sps { data, .. } => Some(data),
            _ => None,
        })?;
        let pps = self.seeking.iter().find_map(|u| match u {
            SeekingUnit::Pps { data, .. } => Some(data),
            _ => None,
        })?;
        write_avcc(sps, pps).ok()
    }

    fn stream_info(&self) -> StreamInfo {
        let mut info = StreamInfo::new(Codec::Avc);
        info.frame_count = self.assembler.frames().len();
        if let Some(sps) = self.active_sps() {
            info.profile = Some(sps.profile_idc as u32);
            info.level = Some(sps.level_idc as u32);
            info.frame_size = Some(sps.frame_size());
            info.chroma_format = ChromaFormat::from_idc(sps.chroma_format_idc);
            info.bit_depth = Some((sps.bit_depth_luma, sps.bit_depth_chroma));
            info.frame_rate = sps.frame_rate();
            info.sample_aspect_ratio = sps.sample_aspect_ratio();
        }
        info
    }
}
