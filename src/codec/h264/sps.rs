use crate::codec::{sample_aspect_ratio, ChromaFormat};
use crate::error::{DemuxError, Result};
use crate::trace::TraceScope;
use crate::utils::BitReader;

const HIGH_PROFILES: [u8; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

/// One `SchedSelIdx` entry of the HRD parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrdSchedule {
    /// Bits per second
    pub bit_rate: u64,
    /// Bits
    pub cpb_size: u64,
    pub cbr: bool,
}

/// `hrd_parameters()` of Annex E.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrdParameters {
    pub bit_rate_scale: u32,
    pub cpb_size_scale: u32,
    pub schedules: Vec<HrdSchedule>,
    pub initial_cpb_removal_delay_length: u32,
    pub cpb_removal_delay_length: u32,
    pub dpb_output_delay_length: u32,
    pub time_offset_length: u32,
}

impl HrdParameters {
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let cpb_cnt = trace.ue(reader, "cpb_cnt_minus1")? + 1;
        if cpb_cnt > 32 {
            return Err(DemuxError::InvalidData(format!("cpb_cnt_minus1 {}", cpb_cnt - 1)));
        }
        let bit_rate_scale = trace.bits(reader, 4, "bit_rate_scale")?;
        let cpb_size_scale = trace.bits(reader, 4, "cpb_size_scale")?;

        let mut schedules = Vec::with_capacity(cpb_cnt as usize);
        for _ in 0..cpb_cnt {
            let bit_rate_value = trace.ue(reader, "bit_rate_value_minus1")? as u64 + 1;
            let cpb_size_value = trace.ue(reader, "cpb_size_value_minus1")? as u64 + 1;
            let cbr = trace.flag(reader, "cbr_flag")?;
            schedules.push(HrdSchedule {
                bit_rate: bit_rate_value << (6 + bit_rate_scale),
                cpb_size: cpb_size_value << (4 + cpb_size_scale),
                cbr,
            });
        }

        Ok(Self {
            bit_rate_scale,
            cpb_size_scale,
            schedules,
            initial_cpb_removal_delay_length: trace
                .bits(reader, 5, "initial_cpb_removal_delay_length_minus1")?
                + 1,
            cpb_removal_delay_length: trace.bits(reader, 5, "cpb_removal_delay_length_minus1")?
                + 1,
            dpb_output_delay_length: trace.bits(reader, 5, "dpb_output_delay_length_minus1")? + 1,
            time_offset_length: trace.bits(reader, 5, "time_offset_length")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,
}

/// `vui_parameters()` of Annex E.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vui {
    pub aspect_ratio_idc: u8,
    pub sar: (u16, u16),
    pub video_full_range_flag: bool,
    /// colour_primaries, transfer_characteristics, matrix_coefficients
    pub colour_description: Option<(u8, u8, u8)>,
    pub timing: Option<TimingInfo>,
    pub nal_hrd: Option<HrdParameters>,
    pub vcl_hrd: Option<HrdParameters>,
    pub low_delay_hrd_flag: bool,
    pub pic_struct_present_flag: bool,
    pub max_num_reorder_frames: Option<u32>,
    pub max_dec_frame_buffering: Option<u32>,
}

impl Vui {
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let mut vui = Vui::default();

        if trace.flag(reader, "aspect_ratio_info_present_flag")? {
            vui.aspect_ratio_idc = trace.bits(reader, 8, "aspect_ratio_idc")? as u8;
            if vui.aspect_ratio_idc == 255 {
                vui.sar = (
                    trace.bits(reader, 16, "sar_width")? as u16,
                    trace.bits(reader, 16, "sar_height")? as u16,
                );
            }
        }
        if trace.flag(reader, "overscan_info_present_flag")? {
            trace.flag(reader, "overscan_appropriate_flag")?;
        }
        if trace.flag(reader, "video_signal_type_present_flag")? {
            trace.bits(reader, 3, "video_format")?;
            vui.video_full_range_flag = trace.flag(reader, "video_full_range_flag")?;
            if trace.flag(reader, "colour_description_present_flag")? {
                vui.colour_description = Some((
                    trace.bits(reader, 8, "colour_primaries")? as u8,
                    trace.bits(reader, 8, "transfer_characteristics")? as u8,
                    trace.bits(reader, 8, "matrix_coefficients")? as u8,
                ));
            }
        }
        if trace.flag(reader, "chroma_loc_info_present_flag")? {
            trace.ue(reader, "chroma_sample_loc_type_top_field")?;
            trace.ue(reader, "chroma_sample_loc_type_bottom_field")?;
        }
        if trace.flag(reader, "timing_info_present_flag")? {
            vui.timing = Some(TimingInfo {
                num_units_in_tick: trace.bits(reader, 32, "num_units_in_tick")?,
                time_scale: trace.bits(reader, 32, "time_scale")?,
                fixed_frame_rate_flag: trace.flag(reader, "fixed_frame_rate_flag")?,
            });
        }
        if trace.flag(reader, "nal_hrd_parameters_present_flag")? {
            vui.nal_hrd = Some(HrdParameters::parse(reader, &mut trace.child("nal_hrd"))?);
        }
        if trace.flag(reader, "vcl_hrd_parameters_present_flag")? {
            vui.vcl_hrd = Some(HrdParameters::parse(reader, &mut trace.child("vcl_hrd"))?);
        }
        if vui.nal_hrd.is_some() || vui.vcl_hrd.is_some() {
            vui.low_delay_hrd_flag = trace.flag(reader, "low_delay_hrd_flag")?;
        }
        vui.pic_struct_present_flag = trace.flag(reader, "pic_struct_present_flag")?;
        if trace.flag(reader, "bitstream_restriction_flag")? {
            trace.flag(reader, "motion_vectors_over_pic_boundaries_flag")?;
            trace.ue(reader, "max_bytes_per_pic_denom")?;
            trace.ue(reader, "max_bits_per_mb_denom")?;
            trace.ue(reader, "log2_max_mv_length_horizontal")?;
            trace.ue(reader, "log2_max_mv_length_vertical")?;
            vui.max_num_reorder_frames = Some(trace.ue(reader, "max_num_reorder_frames")?);
            vui.max_dec_frame_buffering = Some(trace.ue(reader, "max_dec_frame_buffering")?);
        }
        Ok(vui)
    }
}

/// Sequence parameter set (7.3.2.1.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    /// constraint_set0..5 flags and the reserved bits
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub delta_pic_order_always_zero_flag: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub offset_for_ref_frame: Vec<i32>,
    pub max_num_ref_frames: u32,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    /// Left, right, top and bottom crop offsets in crop units
    pub frame_crop: Option<(u32, u32, u32, u32)>,
    pub vui: Option<Vui>,
}

impl Sps {
    /// Parses the SPS payload following the NAL header byte.
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let profile_idc = trace.bits(reader, 8, "profile_idc")? as u8;
        let constraint_flags = trace.bits(reader, 8, "constraint_set_flags")? as u8;
        let level_idc = trace.bits(reader, 8, "level_idc")? as u8;
        let seq_parameter_set_id = trace.ue(reader, "seq_parameter_set_id")?;
        if seq_parameter_set_id > 31 {
            return Err(DemuxError::InvalidData(format!(
                "seq_parameter_set_id {}",
                seq_parameter_set_id
            )));
        }

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane_flag = false;
        let mut bit_depth_luma = 8;
        let mut bit_depth_chroma = 8;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = trace.ue(reader, "chroma_format_idc")?;
            if chroma_format_idc > 3 {
                return Err(DemuxError::InvalidData(format!(
                    "chroma_format_idc {}",
                    chroma_format_idc
                )));
            }
            if chroma_format_idc == 3 {
                separate_colour_plane_flag = trace.flag(reader, "separate_colour_plane_flag")?;
            }
            bit_depth_luma = trace.ue(reader, "bit_depth_luma_minus8")? as u8 + 8;
            bit_depth_chroma = trace.ue(reader, "bit_depth_chroma_minus8")? as u8 + 8;
            trace.flag(reader, "qpprime_y_zero_transform_bypass_flag")?;
            if trace.flag(reader, "seq_scaling_matrix_present_flag")? {
                let count = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..count {
                    if reader.read_flag()? {
                        skip_scaling_list(reader, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let log2_max_frame_num = trace.ue(reader, "log2_max_frame_num_minus4")? + 4;
        let pic_order_cnt_type = trace.ue(reader, "pic_order_cnt_type")?;
        let mut log2_max_pic_order_cnt_lsb = 0;
        let mut delta_pic_order_always_zero_flag = false;
        let mut offset_for_non_ref_pic = 0;
        let mut offset_for_top_to_bottom_field = 0;
        let mut offset_for_ref_frame = Vec::new();
        match pic_order_cnt_type {
            0 => {
                log2_max_pic_order_cnt_lsb =
                    trace.ue(reader, "log2_max_pic_order_cnt_lsb_minus4")? + 4;
            }
            1 => {
                delta_pic_order_always_zero_flag =
                    trace.flag(reader, "delta_pic_order_always_zero_flag")?;
                offset_for_non_ref_pic = trace.se(reader, "offset_for_non_ref_pic")?;
                offset_for_top_to_bottom_field =
                    trace.se(reader, "offset_for_top_to_bottom_field")?;
                let cycle = trace.ue(reader, "num_ref_frames_in_pic_order_cnt_cycle")?;
                if cycle > 255 {
                    return Err(DemuxError::InvalidData(format!(
                        "num_ref_frames_in_pic_order_cnt_cycle {}",
                        cycle
                    )));
                }
                for _ in 0..cycle {
                    offset_for_ref_frame.push(trace.se(reader, "offset_for_ref_frame")?);
                }
            }
            2 => {}
            other => {
                return Err(DemuxError::InvalidData(format!("pic_order_cnt_type {}", other)));
            }
        }
        if log2_max_frame_num > 16 || log2_max_pic_order_cnt_lsb > 16 {
            return Err(DemuxError::InvalidData("frame_num or POC lsb length above 16".into()));
        }

        let max_num_ref_frames = trace.ue(reader, "max_num_ref_frames")?;
        trace.flag(reader, "gaps_in_frame_num_value_allowed_flag")?;
        let pic_width_in_mbs = trace.ue(reader, "pic_width_in_mbs_minus1")? + 1;
        let pic_height_in_map_units = trace.ue(reader, "pic_height_in_map_units_minus1")? + 1;
        let frame_mbs_only_flag = trace.flag(reader, "frame_mbs_only_flag")?;
        let mb_adaptive_frame_field_flag = if !frame_mbs_only_flag {
            trace.flag(reader, "mb_adaptive_frame_field_flag")?
        } else {
            false
        };
        trace.flag(reader, "direct_8x8_inference_flag")?;
        let frame_crop = if trace.flag(reader, "frame_cropping_flag")? {
            Some((
                trace.ue(reader, "frame_crop_left_offset")?,
                trace.ue(reader, "frame_crop_right_offset")?,
                trace.ue(reader, "frame_crop_top_offset")?,
                trace.ue(reader, "frame_crop_bottom_offset")?,
            ))
        } else {
            None
        };
        let vui = if trace.flag(reader, "vui_parameters_present_flag")? {
            Some(Vui::parse(reader, &mut trace.child("vui_parameters"))?)
        } else {
            None
        };

        Ok(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            seq_parameter_set_id,
            chroma_format_idc,
            separate_colour_plane_flag,
            bit_depth_luma,
            bit_depth_chroma,
            log2_max_frame_num,
            pic_order_cnt_type,
            log2_max_pic_order_cnt_lsb,
            delta_pic_order_always_zero_flag,
            offset_for_non_ref_pic,
            offset_for_top_to_bottom_field,
            offset_for_ref_frame,
            max_num_ref_frames,
            pic_width_in_mbs,
            pic_height_in_map_units,
            frame_mbs_only_flag,
            mb_adaptive_frame_field_flag,
            frame_crop,
            vui,
        })
    }

    /// `ChromaArrayType`: 0 when the colour planes are coded separately.
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    pub fn max_frame_num(&self) -> i64 {
        1 << self.log2_max_frame_num
    }

    pub fn max_pic_order_cnt_lsb(&self) -> i64 {
        1 << self.log2_max_pic_order_cnt_lsb
    }

    /// `ExpectedDeltaPerPicOrderCntCycle`
    pub fn expected_delta_per_cycle(&self) -> i64 {
        self.offset_for_ref_frame.iter().map(|&o| o as i64).sum()
    }

    /// Decoded picture size after cropping.
    pub fn frame_size(&self) -> (u32, u32) {
        let width = self.pic_width_in_mbs * 16;
        let frame_height_in_mbs =
            (2 - self.frame_mbs_only_flag as u32) * self.pic_height_in_map_units;
        let height = frame_height_in_mbs * 16;

        let Some((left, right, top, bottom)) = self.frame_crop else {
            return (width, height);
        };
        let (crop_unit_x, crop_unit_y) = match self.chroma_array_type() {
            0 => (1, 2 - self.frame_mbs_only_flag as u32),
            _ => {
                let (sub_width, sub_height) = ChromaFormat::from_idc(self.chroma_format_idc)
                    .map(|c| c.subsampling())
                    .unwrap_or((2, 2));
                (sub_width, sub_height * (2 - self.frame_mbs_only_flag as u32))
            }
        };
        (
            width.saturating_sub(crop_unit_x * (left + right)),
            height.saturating_sub(crop_unit_y * (top + bottom)),
        )
    }

    pub fn frame_rate(&self) -> Option<f64> {
        let timing = self.vui.as_ref()?.timing?;
        if timing.num_units_in_tick == 0 {
            return None;
        }
        Some(timing.time_scale as f64 / (2.0 * timing.num_units_in_tick as f64))
    }

    pub fn sample_aspect_ratio(&self) -> Option<(u32, u32)> {
        let vui = self.vui.as_ref()?;
        sample_aspect_ratio(vui.aspect_ratio_idc, vui.sar)
    }

    pub fn nal_hrd(&self) -> Option<&HrdParameters> {
        self.vui.as_ref()?.nal_hrd.as_ref()
    }

    pub fn vcl_hrd(&self) -> Option<&HrdParameters> {
        self.vui.as_ref()?.vcl_hrd.as_ref()
    }

    /// `CpbDpbDelaysPresentFlag`
    pub fn cpb_dpb_delays_present(&self) -> bool {
        self.nal_hrd().is_some() || self.vcl_hrd().is_some()
    }

    /// HRD parameters used for the removal delay lengths in SEI messages.
    pub fn any_hrd(&self) -> Option<&HrdParameters> {
        self.nal_hrd().or_else(|| self.vcl_hrd())
    }
}

fn skip_scaling_list(reader: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;

    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.read_signed_golomb()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        last_scale = if next_scale == 0 { last_scale } else { next_scale };
    }

    Ok(())
}

/// Picture parameter set (7.3.2.2) up to `redundant_pic_cnt_present_flag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_slice_groups: u32,
    pub slice_group_map_type: u32,
    pub slice_group_change_rate: u32,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u32,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
}

impl Pps {
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let pic_parameter_set_id = trace.ue(reader, "pic_parameter_set_id")?;
        let seq_parameter_set_id = trace.ue(reader, "seq_parameter_set_id")?;
        if pic_parameter_set_id > 255 || seq_parameter_set_id > 31 {
            return Err(DemuxError::InvalidData(format!(
                "parameter set ids {}/{}",
                pic_parameter_set_id, seq_parameter_set_id
            )));
        }
        let entropy_coding_mode_flag = trace.flag(reader, "entropy_coding_mode_flag")?;
        let bottom_field_pic_order_in_frame_present_flag =
            trace.flag(reader, "bottom_field_pic_order_in_frame_present_flag")?;
        let num_slice_groups = trace.ue(reader, "num_slice_groups_minus1")? + 1;

        let mut slice_group_map_type = 0;
        let mut slice_group_change_rate = 0;
        if num_slice_groups > 1 {
            if num_slice_groups > 8 {
                return Err(DemuxError::InvalidData(format!(
                    "num_slice_groups_minus1 {}",
                    num_slice_groups - 1
                )));
            }
            slice_group_map_type = trace.ue(reader, "slice_group_map_type")?;
            match slice_group_map_type {
                0 => {
                    for _ in 0..num_slice_groups {
                        trace.ue(reader, "run_length_minus1")?;
                    }
                }
                2 => {
                    for _ in 0..num_slice_groups - 1 {
                        trace.ue(reader, "top_left")?;
                        trace.ue(reader, "bottom_right")?;
                    }
                }
                3..=5 => {
                    trace.flag(reader, "slice_group_change_direction_flag")?;
                    slice_group_change_rate =
                        trace.ue(reader, "slice_group_change_rate_minus1")? + 1;
                }
                6 => {
                    let pic_size_in_map_units =
                        trace.ue(reader, "pic_size_in_map_units_minus1")? + 1;
                    let id_bits = 32 - (num_slice_groups - 1).leading_zeros();
                    for _ in 0..pic_size_in_map_units {
                        reader.read_u32(id_bits)?;
                    }
                }
                _ => {}
            }
        }

        let num_ref_idx_l0_default_active =
            trace.ue(reader, "num_ref_idx_l0_default_active_minus1")? + 1;
        let num_ref_idx_l1_default_active =
            trace.ue(reader, "num_ref_idx_l1_default_active_minus1")? + 1;
        let weighted_pred_flag = trace.flag(reader, "weighted_pred_flag")?;
        let weighted_bipred_idc = trace.bits(reader, 2, "weighted_bipred_idc")?;
        trace.se(reader, "pic_init_qp_minus26")?;
        trace.se(reader, "pic_init_qs_minus26")?;
        trace.se(reader, "chroma_qp_index_offset")?;
        let deblocking_filter_control_present_flag =
            trace.flag(reader, "deblocking_filter_control_present_flag")?;
        let constrained_intra_pred_flag = trace.flag(reader, "constrained_intra_pred_flag")?;
        let redundant_pic_cnt_present_flag =
            trace.flag(reader, "redundant_pic_cnt_present_flag")?;

        Ok(Self {
            pic_parameter_set_id,
            seq_parameter_set_id,
            entropy_coding_mode_flag,
            bottom_field_pic_order_in_frame_present_flag,
            num_slice_groups,
            slice_group_map_type,
            slice_group_change_rate,
            num_ref_idx_l0_default_active,
            num_ref_idx_l1_default_active,
            weighted_pred_flag,
            weighted_bipred_idc,
            deblocking_filter_control_present_flag,
            constrained_intra_pred_flag,
            redundant_pic_cnt_present_flag,
        })
    }
}
