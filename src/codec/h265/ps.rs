use crate::codec::ChromaFormat;
use crate::error::{DemuxError, Result};
use crate::trace::TraceScope;
use crate::utils::BitReader;

/// General part of `profile_tier_level()`. Sub-layer fields are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_level_idc: u8,
}

impl ProfileTierLevel {
    pub fn parse(
        reader: &mut BitReader<'_>,
        max_sub_layers_minus1: u32,
        trace: &mut TraceScope<'_>,
    ) -> Result<Self> {
        let general_profile_space = trace.bits(reader, 2, "general_profile_space")? as u8;
        let general_tier_flag = trace.flag(reader, "general_tier_flag")?;
        let general_profile_idc = trace.bits(reader, 5, "general_profile_idc")? as u8;
        let general_profile_compatibility_flags =
            trace.bits(reader, 32, "general_profile_compatibility_flags")?;
        trace.flag(reader, "general_progressive_source_flag")?;
        trace.flag(reader, "general_interlaced_source_flag")?;
        trace.flag(reader, "general_non_packed_constraint_flag")?;
        trace.flag(reader, "general_frame_only_constraint_flag")?;
        // constraint flags and general_inbld_flag
        reader.skip_bits(44)?;
        let general_level_idc = trace.bits(reader, 8, "general_level_idc")? as u8;

        let mut present = Vec::with_capacity(max_sub_layers_minus1 as usize);
        for _ in 0..max_sub_layers_minus1 {
            let profile = trace.flag(reader, "sub_layer_profile_present_flag")?;
            let level = trace.flag(reader, "sub_layer_level_present_flag")?;
            present.push((profile, level));
        }
        if max_sub_layers_minus1 > 0 {
            reader.skip_bits(2 * (8 - max_sub_layers_minus1))?;
        }
        for (profile, level) in present {
            if profile {
                reader.skip_bits(88)?;
            }
            if level {
                trace.bits(reader, 8, "sub_layer_level_idc")?;
            }
        }

        Ok(Self {
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_profile_compatibility_flags,
            general_level_idc,
        })
    }
}

fn skip_sub_layer_ordering_info(
    reader: &mut BitReader<'_>,
    max_sub_layers_minus1: u32,
    trace: &mut TraceScope<'_>,
) -> Result<()> {
    let present = trace.flag(reader, "sub_layer_ordering_info_present_flag")?;
    let first = if present { 0 } else { max_sub_layers_minus1 };
    for _ in first..=max_sub_layers_minus1 {
        trace.ue(reader, "max_dec_pic_buffering_minus1")?;
        trace.ue(reader, "max_num_reorder_pics")?;
        trace.ue(reader, "max_latency_increase_plus1")?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpsTiming {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
}

/// Video parameter set, parsed up to the timing info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vps {
    pub vps_video_parameter_set_id: u32,
    pub max_layers_minus1: u32,
    pub max_sub_layers_minus1: u32,
    pub profile_tier_level: ProfileTierLevel,
    pub timing: Option<VpsTiming>,
}

impl Vps {
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let vps_video_parameter_set_id = trace.bits(reader, 4, "vps_video_parameter_set_id")?;
        trace.flag(reader, "vps_base_layer_internal_flag")?;
        trace.flag(reader, "vps_base_layer_available_flag")?;
        let max_layers_minus1 = trace.bits(reader, 6, "vps_max_layers_minus1")?;
        let max_sub_layers_minus1 = trace.bits(reader, 3, "vps_max_sub_layers_minus1")?;
        if max_sub_layers_minus1 > 6 {
            return Err(DemuxError::InvalidData(format!(
                "vps_max_sub_layers_minus1 {}",
                max_sub_layers_minus1
            )));
        }
        trace.flag(reader, "vps_temporal_id_nesting_flag")?;
        let reserved = trace.bits(reader, 16, "vps_reserved_0xffff_16bits")?;
        if reserved != 0xFFFF {
            log::warn!("vps_reserved_0xffff_16bits is {:#x}", reserved);
        }
        let profile_tier_level = ProfileTierLevel::parse(
            reader,
            max_sub_layers_minus1,
            &mut trace.child("profile_tier_level"),
        )?;
        skip_sub_layer_ordering_info(reader, max_sub_layers_minus1, trace)?;

        let max_layer_id = trace.bits(reader, 6, "vps_max_layer_id")?;
        let num_layer_sets = trace.ue(reader, "vps_num_layer_sets_minus1")? + 1;
        if num_layer_sets > 1024 {
            return Err(DemuxError::InvalidData(format!(
                "vps_num_layer_sets_minus1 {}",
                num_layer_sets - 1
            )));
        }
        for _ in 1..num_layer_sets {
            reader.skip_bits(max_layer_id + 1)?;
        }

        let timing = if trace.flag(reader, "vps_timing_info_present_flag")? {
            Some(VpsTiming {
                num_units_in_tick: trace.bits(reader, 32, "vps_num_units_in_tick")?,
                time_scale: trace.bits(reader, 32, "vps_time_scale")?,
            })
        } else {
            None
        };

        Ok(Self {
            vps_video_parameter_set_id,
            max_layers_minus1,
            max_sub_layers_minus1,
            profile_tier_level,
            timing,
        })
    }

    pub fn frame_rate(&self) -> Option<f64> {
        let timing = self.timing?;
        if timing.num_units_in_tick == 0 {
            return None;
        }
        Some(timing.time_scale as f64 / timing.num_units_in_tick as f64)
    }
}

/// Sequence parameter set, parsed up to the coding block sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub sps_video_parameter_set_id: u32,
    pub max_sub_layers_minus1: u32,
    pub profile_tier_level: ProfileTierLevel,
    pub sps_seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    /// Left, right, top and bottom offsets in chroma units
    pub conformance_window: Option<(u32, u32, u32, u32)>,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub log2_min_luma_coding_block_size: u32,
    pub log2_ctb_size: u32,
}

impl Sps {
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let sps_video_parameter_set_id = trace.bits(reader, 4, "sps_video_parameter_set_id")?;
        let max_sub_layers_minus1 = trace.bits(reader, 3, "sps_max_sub_layers_minus1")?;
        if max_sub_layers_minus1 > 6 {
            return Err(DemuxError::InvalidData(format!(
                "sps_max_sub_layers_minus1 {}",
                max_sub_layers_minus1
            )));
        }
        trace.flag(reader, "sps_temporal_id_nesting_flag")?;
        let profile_tier_level = ProfileTierLevel::parse(
            reader,
            max_sub_layers_minus1,
            &mut trace.child("profile_tier_level"),
        )?;
        let sps_seq_parameter_set_id = trace.ue(reader, "sps_seq_parameter_set_id")?;
        if sps_seq_parameter_set_id > 15 {
            return Err(DemuxError::InvalidData(format!(
                "sps_seq_parameter_set_id {}",
                sps_seq_parameter_set_id
            )));
        }
        let chroma_format_idc = trace.ue(reader, "chroma_format_idc")?;
        if chroma_format_idc > 3 {
            return Err(DemuxError::InvalidData(format!(
                "chroma_format_idc {}",
                chroma_format_idc
            )));
        }
        let separate_colour_plane_flag = if chroma_format_idc == 3 {
            trace.flag(reader, "separate_colour_plane_flag")?
        } else {
            false
        };
        let pic_width_in_luma_samples = trace.ue(reader, "pic_width_in_luma_samples")?;
        let pic_height_in_luma_samples = trace.ue(reader, "pic_height_in_luma_samples")?;
        let conformance_window = if trace.flag(reader, "conformance_window_flag")? {
            Some((
                trace.ue(reader, "conf_win_left_offset")?,
                trace.ue(reader, "conf_win_right_offset")?,
                trace.ue(reader, "conf_win_top_offset")?,
                trace.ue(reader, "conf_win_bottom_offset")?,
            ))
        } else {
            None
        };
        let bit_depth_luma = trace.ue(reader, "bit_depth_luma_minus8")? as u8 + 8;
        let bit_depth_chroma = trace.ue(reader, "bit_depth_chroma_minus8")? as u8 + 8;
        let log2_max_pic_order_cnt_lsb =
            trace.ue(reader, "log2_max_pic_order_cnt_lsb_minus4")? + 4;
        if log2_max_pic_order_cnt_lsb > 16 {
            return Err(DemuxError::InvalidData(format!(
                "log2_max_pic_order_cnt_lsb_minus4 {}",
                log2_max_pic_order_cnt_lsb - 4
            )));
        }
        skip_sub_layer_ordering_info(reader, max_sub_layers_minus1, trace)?;
        let log2_min_luma_coding_block_size =
            trace.ue(reader, "log2_min_luma_coding_block_size_minus3")? + 3;
        let log2_ctb_size = log2_min_luma_coding_block_size
            + trace.ue(reader, "log2_diff_max_min_luma_coding_block_size")?;
        if log2_ctb_size > 6 {
            return Err(DemuxError::InvalidData(format!("CtbLog2SizeY {}", log2_ctb_size)));
        }

        Ok(Self {
            sps_video_parameter_set_id,
            max_sub_layers_minus1,
            profile_tier_level,
            sps_seq_parameter_set_id,
            chroma_format_idc,
            separate_colour_plane_flag,
            pic_width_in_luma_samples,
            pic_height_in_luma_samples,
            conformance_window,
            bit_depth_luma,
            bit_depth_chroma,
            log2_max_pic_order_cnt_lsb,
            log2_min_luma_coding_block_size,
            log2_ctb_size,
        })
    }

    pub fn max_pic_order_cnt_lsb(&self) -> i64 {
        1 << self.log2_max_pic_order_cnt_lsb
    }

    /// `PicSizeInCtbsY`
    pub fn pic_size_in_ctbs(&self) -> u32 {
        let ctb = 1u32 << self.log2_ctb_size;
        self.pic_width_in_luma_samples.div_ceil(ctb) * self.pic_height_in_luma_samples.div_ceil(ctb)
    }

    /// Picture size after applying the conformance window.
    pub fn frame_size(&self) -> (u32, u32) {
        let (width, height) = (self.pic_width_in_luma_samples, self.pic_height_in_luma_samples);
        let Some((left, right, top, bottom)) = self.conformance_window else {
            return (width, height);
        };
        let (sub_width, sub_height) = if self.separate_colour_plane_flag {
            (1, 1)
        } else {
            ChromaFormat::from_idc(self.chroma_format_idc)
                .map(|c| c.subsampling())
                .unwrap_or((1, 1))
        };
        (
            width.saturating_sub(sub_width * (left + right)),
            height.saturating_sub(sub_height * (top + bottom)),
        )
    }
}

/// The part of the picture parameter set that the slice header depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pps_pic_parameter_set_id: u32,
    pub pps_seq_parameter_set_id: u32,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u32,
}

impl Pps {
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let pps_pic_parameter_set_id = trace.ue(reader, "pps_pic_parameter_set_id")?;
        let pps_seq_parameter_set_id = trace.ue(reader, "pps_seq_parameter_set_id")?;
        if pps_pic_parameter_set_id > 63 || pps_seq_parameter_set_id > 15 {
            return Err(DemuxError::InvalidData(format!(
                "parameter set ids {}/{}",
                pps_pic_parameter_set_id, pps_seq_parameter_set_id
            )));
        }
        let dependent_slice_segments_enabled_flag =
            trace.flag(reader, "dependent_slice_segments_enabled_flag")?;
        let output_flag_present_flag = trace.flag(reader, "output_flag_present_flag")?;
        let num_extra_slice_header_bits = trace.bits(reader, 3, "num_extra_slice_header_bits")?;
        Ok(Self {
            pps_pic_parameter_set_id,
            pps_seq_parameter_set_id,
            dependent_slice_segments_enabled_flag,
            output_flag_present_flag,
            num_extra_slice_header_bits,
        })
    }
}
