use std::fmt;

use super::sequence::{SequenceHeader, SELECT_TOOLS};
use crate::error::Result;
use crate::trace::TraceScope;
use crate::utils::BitReader;

pub const NUM_REF_FRAMES: usize = 8;
const ALL_FRAMES: u8 = 0xFF;
const PRIMARY_REF_NONE: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    Key,
    Inter,
    IntraOnly,
    Switch,
}

impl FrameType {
    fn from_bits(value: u32) -> Self {
        match value & 0x03 {
            0 => FrameType::Key,
            1 => FrameType::Inter,
            2 => FrameType::IntraOnly,
            _ => FrameType::Switch,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Key => "KEY",
            FrameType::Inter => "INTER",
            FrameType::IntraOnly => "INTRA_ONLY",
            FrameType::Switch => "SWITCH",
        }
    }

    pub fn is_intra(&self) -> bool {
        matches!(self, FrameType::Key | FrameType::IntraOnly)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `uncompressed_header()` up to `refresh_frame_flags`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: Option<u8>,
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub showable_frame: bool,
    pub error_resilient_mode: bool,
    pub disable_cdf_update: bool,
    pub allow_screen_content_tools: bool,
    pub force_integer_mv: bool,
    pub current_frame_id: Option<u32>,
    pub frame_size_override_flag: bool,
    pub order_hint: u32,
    pub primary_ref_frame: u8,
    pub refresh_frame_flags: u8,
}

impl FrameHeader {
    /// Parses the header of a frame or frame header OBU.
    ///
    /// `ref_frame_types` holds the frame type stored in each reference slot,
    /// which a `show_existing_frame` header inherits.
    pub fn parse(
        reader: &mut BitReader<'_>,
        seq: &SequenceHeader,
        ref_frame_types: &[FrameType; NUM_REF_FRAMES],
        temporal_id: u8,
        spatial_id: u8,
        trace: &mut TraceScope<'_>,
    ) -> Result<Self> {
        let mut header = FrameHeader {
            primary_ref_frame: PRIMARY_REF_NONE,
            ..Default::default()
        };
        let id_len = seq.frame_id_length();
        let equal_picture_interval = seq
            .timing_info
            .map(|t| t.equal_picture_interval)
            .unwrap_or(false);

        if seq.reduced_still_picture_header {
            header.show_frame = true;
            header.error_resilient_mode = true;
        } else {
            header.show_existing_frame = trace.flag(reader, "show_existing_frame")?;
            if header.show_existing_frame {
                let idx = trace.bits(reader, 3, "frame_to_show_map_idx")? as u8;
                header.frame_to_show_map_idx = Some(idx);
                if let Some(model) = seq.decoder_model_info {
                    if !equal_picture_interval {
                        let n = model.frame_presentation_time_length_minus_1 as u32 + 1;
                        trace.bits(reader, n, "frame_presentation_time")?;
                    }
                }
                if let Some(len) = id_len {
                    trace.bits(reader, len, "display_frame_id")?;
                }
                header.frame_type = ref_frame_types[idx as usize];
                header.show_frame = true;
                if header.frame_type == FrameType::Key {
                    header.refresh_frame_flags = ALL_FRAMES;
                }
                return Ok(header);
            }

            header.frame_type = FrameType::from_bits(trace.bits(reader, 2, "frame_type")?);
            header.show_frame = trace.flag(reader, "show_frame")?;
            if header.show_frame {
                if let Some(model) = seq.decoder_model_info {
                    if !equal_picture_interval {
                        let n = model.frame_presentation_time_length_minus_1 as u32 + 1;
                        trace.bits(reader, n, "frame_presentation_time")?;
                    }
                }
                header.showable_frame = header.frame_type != FrameType::Key;
            } else {
                header.showable_frame = trace.flag(reader, "showable_frame")?;
            }
            header.error_resilient_mode = header.frame_type == FrameType::Switch
                || (header.frame_type == FrameType::Key && header.show_frame)
                || trace.flag(reader, "error_resilient_mode")?;
        }

        header.disable_cdf_update = trace.flag(reader, "disable_cdf_update")?;
        header.allow_screen_content_tools = if seq.seq_force_screen_content_tools == SELECT_TOOLS {
            trace.flag(reader, "allow_screen_content_tools")?
        } else {
            seq.seq_force_screen_content_tools != 0
        };
        if header.allow_screen_content_tools {
            header.force_integer_mv = if seq.seq_force_integer_mv == SELECT_TOOLS {
                trace.flag(reader, "force_integer_mv")?
            } else {
                seq.seq_force_integer_mv != 0
            };
        }
        if header.frame_type.is_intra() {
            header.force_integer_mv = true;
        }

        if let Some(len) = id_len {
            header.current_frame_id = Some(trace.bits(reader, len, "current_frame_id")?);
        }

        header.frame_size_override_flag = match header.frame_type {
            FrameType::Switch => true,
            _ if seq.reduced_still_picture_header => false,
            _ => trace.flag(reader, "frame_size_override_flag")?,
        };
        header.order_hint = trace.bits(reader, seq.order_hint_bits, "order_hint")?;

        if !header.frame_type.is_intra() && !header.error_resilient_mode {
            header.primary_ref_frame = trace.bits(reader, 3, "primary_ref_frame")? as u8;
        }

        if let Some(model) = seq.decoder_model_info {
            if trace.flag(reader, "buffer_removal_time_present_flag")? {
                let n = model.buffer_removal_time_length_minus_1 as u32 + 1;
                for op in seq.operating_points.iter().filter(|op| op.decoder_model_present) {
                    let in_temporal_layer = (op.idc >> temporal_id) & 1 != 0;
                    let in_spatial_layer = (op.idc >> (spatial_id + 8)) & 1 != 0;
                    if op.idc == 0 || (in_temporal_layer && in_spatial_layer) {
                        trace.bits(reader, n, "buffer_removal_time")?;
                    }
                }
            }
        }

        header.refresh_frame_flags = if header.frame_type == FrameType::Switch
            || (header.frame_type == FrameType::Key && header.show_frame)
        {
            ALL_FRAMES
        } else {
            trace.bits(reader, 8, "refresh_frame_flags")? as u8
        };
        Ok(header)
    }

    /// A shown key frame, where decoding can start.
    pub fn is_random_access(&self) -> bool {
        self.frame_type == FrameType::Key && self.show_frame && !self.show_existing_frame
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RefSlot {
    frame_type: FrameType,
    poc: i64,
}

/// Decoding state carried from frame header to frame header.
///
/// The POC is rebuilt from `order_hint`, which wraps at
/// `2^OrderHintBits`. Each shown key frame restarts the count above the
/// highest POC so far, so POCs stay unique over the whole stream.
#[derive(Debug)]
pub struct DecodeContext {
    ref_slots: [RefSlot; NUM_REF_FRAMES],
    prev_order_hint: Option<u32>,
    order_hint_msb: i64,
    poc_offset: i64,
    max_poc: i64,
    /// Frame headers since the last shown key frame
    frames_since_key: i64,
    /// A frame header was parsed and its tile data is still outstanding
    seen_frame_header: bool,
}

impl Default for DecodeContext {
    fn default() -> Self {
        Self {
            ref_slots: [RefSlot::default(); NUM_REF_FRAMES],
            prev_order_hint: None,
            order_hint_msb: 0,
            poc_offset: 0,
            max_poc: -1,
            frames_since_key: 0,
            seen_frame_header: false,
        }
    }
}

impl DecodeContext {
    pub fn ref_frame_types(&self) -> [FrameType; NUM_REF_FRAMES] {
        self.ref_slots.map(|slot| slot.frame_type)
    }

    pub fn seen_frame_header(&self) -> bool {
        self.seen_frame_header
    }

    pub fn set_seen_frame_header(&mut self, seen: bool) {
        self.seen_frame_header = seen;
    }

    /// POC of the frame described by `header`, updating the reference slots.
    pub fn picture_order(&mut self, header: &FrameHeader, seq: &SequenceHeader) -> i64 {
        if let Some(idx) = header.frame_to_show_map_idx {
            let slot = self.ref_slots[idx as usize];
            if slot.frame_type == FrameType::Key {
                self.ref_slots = [slot; NUM_REF_FRAMES];
            }
            return slot.poc;
        }

        let hint = if seq.enable_order_hint {
            header.order_hint as i64
        } else {
            // Without order hints frames count in decoding order
            self.frames_since_key
        };

        if header.is_random_access() {
            if self.max_poc >= 0 {
                self.poc_offset = self.max_poc + 1;
                self.max_poc = -1;
            }
            self.order_hint_msb = 0;
            self.frames_since_key = 0;
        } else if let (true, Some(prev)) = (seq.enable_order_hint, self.prev_order_hint) {
            let max_hint = 1i64 << seq.order_hint_bits;
            let prev = prev as i64;
            if hint < prev && prev - hint >= max_hint / 2 {
                self.order_hint_msb += max_hint;
            } else if hint > prev && hint - prev > max_hint / 2 {
                self.order_hint_msb -= max_hint;
            }
        }
        self.prev_order_hint = Some(header.order_hint);
        self.frames_since_key += 1;

        let poc = self.poc_offset + self.order_hint_msb + hint;
        self.max_poc = self.max_poc.max(poc);

        let slot = RefSlot {
            frame_type: header.frame_type,
            poc,
        };
        for (i, ref_slot) in self.ref_slots.iter_mut().enumerate() {
            if header.refresh_frame_flags & (1 << i) != 0 {
                *ref_slot = slot;
            }
        }
        poc
    }
}
