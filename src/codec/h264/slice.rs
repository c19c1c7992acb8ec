use super::sps::{Pps, Sps};
use super::types::{NalHeader, NalUnitType, SliceType};
use crate::codec::ParameterSetRegistry;
use crate::error::{DemuxError, Result};
use crate::trace::TraceScope;
use crate::utils::BitReader;

/// Slice header fields (7.3.3) needed for frame and POC tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    pub pic_parameter_set_id: u32,
    /// The SPS referenced through the PPS
    pub seq_parameter_set_id: u32,
    pub colour_plane_id: Option<u32>,
    pub frame_num: u32,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub idr_pic_id: Option<u32>,
    pub pic_order_cnt_lsb: u32,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
    pub redundant_pic_cnt: u32,
    pub num_ref_idx_active: (u32, u32),
    /// Set if `dec_ref_pic_marking()` contains memory_management_control_operation 5
    pub mmco5: bool,
    pub nal_ref_idc: u8,
    pub idr: bool,
}

impl SliceHeader {
    pub fn parse(
        reader: &mut BitReader<'_>,
        nal: &NalHeader,
        sps_set: &ParameterSetRegistry<Sps>,
        pps_set: &ParameterSetRegistry<Pps>,
        trace: &mut TraceScope<'_>,
    ) -> Result<Self> {
        let idr = nal.nal_unit_type == NalUnitType::CodedSliceIdr;
        let first_mb_in_slice = trace.ue(reader, "first_mb_in_slice")?;
        let slice_type_id = trace.ue(reader, "slice_type")?;
        let slice_type = SliceType::from_id(slice_type_id)?;
        let pic_parameter_set_id = trace.ue(reader, "pic_parameter_set_id")?;
        let pps = pps_set.require(pic_parameter_set_id)?;
        let sps = sps_set.require(pps.seq_parameter_set_id)?;

        let colour_plane_id = if sps.separate_colour_plane_flag {
            Some(trace.bits(reader, 2, "colour_plane_id")?)
        } else {
            None
        };
        let frame_num = trace.bits(reader, sps.log2_max_frame_num, "frame_num")?;
        let mut field_pic_flag = false;
        let mut bottom_field_flag = false;
        if !sps.frame_mbs_only_flag {
            field_pic_flag = trace.flag(reader, "field_pic_flag")?;
            if field_pic_flag {
                bottom_field_flag = trace.flag(reader, "bottom_field_flag")?;
            }
        }
        let idr_pic_id = if idr {
            Some(trace.ue(reader, "idr_pic_id")?)
        } else {
            None
        };

        let mut pic_order_cnt_lsb = 0;
        let mut delta_pic_order_cnt_bottom = 0;
        let mut delta_pic_order_cnt = [0; 2];
        if sps.pic_order_cnt_type == 0 {
            pic_order_cnt_lsb =
                trace.bits(reader, sps.log2_max_pic_order_cnt_lsb, "pic_order_cnt_lsb")?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                delta_pic_order_cnt_bottom = trace.se(reader, "delta_pic_order_cnt_bottom")?;
            }
        }
        if sps.pic_order_cnt_type == 1 && !sps.delta_pic_order_always_zero_flag {
            delta_pic_order_cnt[0] = trace.se(reader, "delta_pic_order_cnt[0]")?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                delta_pic_order_cnt[1] = trace.se(reader, "delta_pic_order_cnt[1]")?;
            }
        }
        let redundant_pic_cnt = if pps.redundant_pic_cnt_present_flag {
            trace.ue(reader, "redundant_pic_cnt")?
        } else {
            0
        };
        if slice_type == SliceType::B {
            trace.flag(reader, "direct_spatial_mv_pred_flag")?;
        }

        let mut num_ref_idx_active = (
            pps.num_ref_idx_l0_default_active,
            pps.num_ref_idx_l1_default_active,
        );
        if matches!(slice_type, SliceType::P | SliceType::Sp | SliceType::B)
            && trace.flag(reader, "num_ref_idx_active_override_flag")?
        {
            num_ref_idx_active.0 = trace.ue(reader, "num_ref_idx_l0_active_minus1")? + 1;
            if slice_type == SliceType::B {
                num_ref_idx_active.1 = trace.ue(reader, "num_ref_idx_l1_active_minus1")? + 1;
            }
        }
        if num_ref_idx_active.0 > 32 || num_ref_idx_active.1 > 32 {
            return Err(DemuxError::InvalidData(format!(
                "num_ref_idx_active {:?}",
                num_ref_idx_active
            )));
        }

        // nal_unit_type 20/21 use ref_pic_list_mvc_modification, never reached here
        ref_pic_list_modification(reader, slice_type, &mut trace.child("ref_pic_list_modification"))?;

        if (pps.weighted_pred_flag && matches!(slice_type, SliceType::P | SliceType::Sp))
            || (pps.weighted_bipred_idc == 1 && slice_type == SliceType::B)
        {
            pred_weight_table(
                reader,
                sps,
                slice_type,
                num_ref_idx_active,
                &mut trace.child("pred_weight_table"),
            )?;
        }

        let mut mmco5 = false;
        if nal.nal_ref_idc != 0 {
            mmco5 = dec_ref_pic_marking(reader, idr, &mut trace.child("dec_ref_pic_marking"))?;
        }

        if pps.entropy_coding_mode_flag && !matches!(slice_type, SliceType::I | SliceType::Si) {
            trace.ue(reader, "cabac_init_idc")?;
        }
        trace.se(reader, "slice_qp_delta")?;
        if matches!(slice_type, SliceType::Sp | SliceType::Si) {
            if slice_type == SliceType::Sp {
                trace.flag(reader, "sp_for_switch_flag")?;
            }
            trace.se(reader, "slice_qs_delta")?;
        }
        if pps.deblocking_filter_control_present_flag {
            let disable_deblocking_filter_idc = trace.ue(reader, "disable_deblocking_filter_idc")?;
            if disable_deblocking_filter_idc != 1 {
                trace.se(reader, "slice_alpha_c0_offset_div2")?;
                trace.se(reader, "slice_beta_offset_div2")?;
            }
        }
        if pps.num_slice_groups > 1 && (3..=5).contains(&pps.slice_group_map_type) {
            let pic_size_in_map_units = sps.pic_width_in_mbs * sps.pic_height_in_map_units;
            let rate = pps.slice_group_change_rate.max(1);
            let cycles = pic_size_in_map_units.div_ceil(rate) + 1;
            let bits = 32 - (cycles - 1).leading_zeros();
            trace.bits(reader, bits, "slice_group_change_cycle")?;
        }

        Ok(Self {
            first_mb_in_slice,
            slice_type,
            pic_parameter_set_id,
            seq_parameter_set_id: pps.seq_parameter_set_id,
            colour_plane_id,
            frame_num,
            field_pic_flag,
            bottom_field_flag,
            idr_pic_id,
            pic_order_cnt_lsb,
            delta_pic_order_cnt_bottom,
            delta_pic_order_cnt,
            redundant_pic_cnt,
            num_ref_idx_active,
            mmco5,
            nal_ref_idc: nal.nal_ref_idc,
            idr,
        })
    }

    /// IDR pictures and I slices can start decoding.
    pub fn is_random_access(&self) -> bool {
        self.idr || self.slice_type == SliceType::I
    }
}

fn ref_pic_list_modification(
    reader: &mut BitReader<'_>,
    slice_type: SliceType,
    trace: &mut TraceScope<'_>,
) -> Result<()> {
    let lists = match slice_type {
        SliceType::I | SliceType::Si => 0,
        SliceType::B => 2,
        _ => 1,
    };
    for list in 0..lists {
        if !trace.flag(reader, &format!("ref_pic_list_modification_flag_l{}", list))? {
            continue;
        }
        loop {
            let idc = trace.ue(reader, "modification_of_pic_nums_idc")?;
            match idc {
                0 | 1 => {
                    trace.ue(reader, "abs_diff_pic_num_minus1")?;
                }
                2 => {
                    trace.ue(reader, "long_term_pic_num")?;
                }
                3 => break,
                other => {
                    return Err(DemuxError::InvalidData(format!(
                        "modification_of_pic_nums_idc {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(())
}

fn pred_weight_table(
    reader: &mut BitReader<'_>,
    sps: &Sps,
    slice_type: SliceType,
    num_ref_idx_active: (u32, u32),
    trace: &mut TraceScope<'_>,
) -> Result<()> {
    trace.ue(reader, "luma_log2_weight_denom")?;
    let chroma = sps.chroma_array_type() != 0;
    if chroma {
        trace.ue(reader, "chroma_log2_weight_denom")?;
    }
    let mut lists = vec![num_ref_idx_active.0];
    if slice_type == SliceType::B {
        lists.push(num_ref_idx_active.1);
    }
    for count in lists {
        for _ in 0..count {
            if trace.flag(reader, "luma_weight_flag")? {
                trace.se(reader, "luma_weight")?;
                trace.se(reader, "luma_offset")?;
            }
            if chroma && trace.flag(reader, "chroma_weight_flag")? {
                for _ in 0..2 {
                    trace.se(reader, "chroma_weight")?;
                    trace.se(reader, "chroma_offset")?;
                }
            }
        }
    }
    Ok(())
}

/// Returns true if the marking contains memory_management_control_operation 5.
fn dec_ref_pic_marking(
    reader: &mut BitReader<'_>,
    idr: bool,
    trace: &mut TraceScope<'_>,
) -> Result<bool> {
    if idr {
        trace.flag(reader, "no_output_of_prior_pics_flag")?;
        trace.flag(reader, "long_term_reference_flag")?;
        return Ok(false);
    }
    let mut mmco5 = false;
    if trace.flag(reader, "adaptive_ref_pic_marking_mode_flag")? {
        loop {
            let operation = trace.ue(reader, "memory_management_control_operation")?;
            match operation {
                0 => break,
                1 => {
                    trace.ue(reader, "difference_of_pic_nums_minus1")?;
                }
                2 => {
                    trace.ue(reader, "long_term_pic_num")?;
                }
                3 => {
                    trace.ue(reader, "difference_of_pic_nums_minus1")?;
                    trace.ue(reader, "long_term_frame_idx")?;
                }
                4 => {
                    trace.ue(reader, "max_long_term_frame_idx_plus1")?;
                }
                5 => mmco5 = true,
                6 => {
                    trace.ue(reader, "long_term_frame_idx")?;
                }
                other => {
                    return Err(DemuxError::InvalidData(format!(
                        "memory_management_control_operation {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(mmco5)
}

/// POC state of the first slice of a picture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PictureOrder {
    pub frame_num: i64,
    pub first_mb_in_slice: u32,
    pub bottom_field_flag: bool,
    pub mmco5: bool,
    pub pic_order_cnt_msb: i64,
    pub pic_order_cnt_lsb: i64,
    pub prev_pic_order_cnt_msb: i64,
    pub prev_pic_order_cnt_lsb: i64,
    pub frame_num_offset: i64,
    pub top_field_order_cnt: i64,
    pub bottom_field_order_cnt: i64,
    /// POC made unique across IDR pictures
    pub global_poc: i64,
    pub global_poc_last_idr: i64,
    pub global_poc_highest: i64,
}

/// Decoding state carried from slice to slice.
#[derive(Debug, Default)]
pub struct DecodeContext {
    /// First slice of the last picture, the `prevPic` of 8.2.1
    pub last_picture_first_slice: Option<PictureOrder>,
}

impl DecodeContext {
    /// Derives the picture order count of a slice (8.2.1) and makes it
    /// unique across IDR pictures.
    pub fn picture_order(&self, slice: &SliceHeader, sps: &Sps) -> PictureOrder {
        let prev = self.last_picture_first_slice.as_ref();
        let mut order = PictureOrder {
            frame_num: slice.frame_num as i64,
            first_mb_in_slice: slice.first_mb_in_slice,
            bottom_field_flag: slice.bottom_field_flag,
            mmco5: slice.mmco5,
            pic_order_cnt_lsb: slice.pic_order_cnt_lsb as i64,
            ..Default::default()
        };
        let intra = slice.slice_type == SliceType::I;
        let prev_mmco5 = prev.map(|p| p.mmco5).unwrap_or(false);

        if sps.pic_order_cnt_type == 0 {
            let mut computable = true;
            if slice.idr || (intra && prev.is_none()) {
                order.prev_pic_order_cnt_msb = 0;
                order.prev_pic_order_cnt_lsb = 0;
            } else if let Some(prev) = prev {
                if slice.first_mb_in_slice == 0 {
                    if prev_mmco5 {
                        order.prev_pic_order_cnt_msb = 0;
                        order.prev_pic_order_cnt_lsb = if prev.bottom_field_flag {
                            0
                        } else {
                            prev.top_field_order_cnt
                        };
                    } else {
                        order.prev_pic_order_cnt_msb = prev.pic_order_cnt_msb;
                        order.prev_pic_order_cnt_lsb = prev.pic_order_cnt_lsb;
                    }
                } else {
                    order.prev_pic_order_cnt_msb = prev.prev_pic_order_cnt_msb;
                    order.prev_pic_order_cnt_lsb = prev.prev_pic_order_cnt_lsb;
                }
            } else {
                log::debug!("no previous picture, POC of non-intra slice is unknown");
                computable = false;
            }

            if computable {
                let max_lsb = sps.max_pic_order_cnt_lsb();
                let lsb = order.pic_order_cnt_lsb;
                let prev_lsb = order.prev_pic_order_cnt_lsb;
                order.pic_order_cnt_msb = if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
                    order.prev_pic_order_cnt_msb + max_lsb
                } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
                    order.prev_pic_order_cnt_msb - max_lsb
                } else {
                    order.prev_pic_order_cnt_msb
                };

                if !slice.bottom_field_flag {
                    order.top_field_order_cnt = order.pic_order_cnt_msb + lsb;
                    if !slice.field_pic_flag {
                        order.bottom_field_order_cnt =
                            order.top_field_order_cnt + slice.delta_pic_order_cnt_bottom as i64;
                    }
                } else {
                    order.bottom_field_order_cnt = order.pic_order_cnt_msb + lsb;
                }
            }
        } else if slice.idr || intra || prev.is_some() {
            let prev_frame_num = prev.map(|p| p.frame_num).unwrap_or(-1);
            let prev_frame_num_offset = match prev {
                Some(prev) if !slice.idr && !prev_mmco5 => prev.frame_num_offset,
                _ => 0,
            };
            order.frame_num_offset = if slice.idr {
                0
            } else if prev_frame_num > order.frame_num {
                prev_frame_num_offset + sps.max_frame_num()
            } else {
                prev_frame_num_offset
            };

            if sps.pic_order_cnt_type == 1 {
                let cycle_len = sps.offset_for_ref_frame.len() as i64;
                let mut abs_frame_num = if cycle_len != 0 {
                    order.frame_num_offset + order.frame_num
                } else {
                    0
                };
                if slice.nal_ref_idc == 0 && abs_frame_num > 0 {
                    abs_frame_num -= 1;
                }
                let mut expected = 0i64;
                if abs_frame_num > 0 {
                    let cycle_cnt = (abs_frame_num - 1) / cycle_len;
                    let in_cycle = (abs_frame_num - 1) % cycle_len;
                    expected = cycle_cnt * sps.expected_delta_per_cycle();
                    for offset in &sps.offset_for_ref_frame[..=in_cycle as usize] {
                        expected += *offset as i64;
                    }
                }
                if slice.nal_ref_idc == 0 {
                    expected += sps.offset_for_non_ref_pic as i64;
                }
                let delta = slice.delta_pic_order_cnt;
                let top_to_bottom = sps.offset_for_top_to_bottom_field as i64;
                if !slice.field_pic_flag {
                    order.top_field_order_cnt = expected + delta[0] as i64;
                    order.bottom_field_order_cnt =
                        order.top_field_order_cnt + top_to_bottom + delta[1] as i64;
                } else if !slice.bottom_field_flag {
                    order.top_field_order_cnt = expected + delta[0] as i64;
                } else {
                    order.bottom_field_order_cnt = expected + top_to_bottom + delta[0] as i64;
                }
            } else {
                let temp = if slice.idr {
                    0
                } else if slice.nal_ref_idc == 0 {
                    2 * (order.frame_num_offset + order.frame_num) - 1
                } else {
                    2 * (order.frame_num_offset + order.frame_num)
                };
                if !slice.field_pic_flag {
                    order.top_field_order_cnt = temp;
                    order.bottom_field_order_cnt = temp;
                } else if slice.bottom_field_flag {
                    order.bottom_field_order_cnt = temp;
                } else {
                    order.top_field_order_cnt = temp;
                }
            }
        } else {
            log::debug!("no previous picture, POC of non-intra slice is unknown");
        }

        let field_poc = if slice.field_pic_flag && slice.bottom_field_flag {
            order.bottom_field_order_cnt
        } else {
            order.top_field_order_cnt
        };
        match prev {
            None if intra => {
                order.global_poc = field_poc;
                order.global_poc_highest = field_poc;
                order.global_poc_last_idr = 0;
            }
            None => {}
            Some(prev) if slice.first_mb_in_slice != 0 => {
                order.global_poc = prev.global_poc;
                order.global_poc_last_idr = prev.global_poc_last_idr;
                order.global_poc_highest = prev.global_poc_highest;
            }
            Some(prev) if slice.idr => {
                order.global_poc = prev.global_poc_highest + 2;
                order.global_poc_last_idr = order.global_poc;
                order.global_poc_highest = order.global_poc;
            }
            Some(prev) => {
                order.global_poc = prev.global_poc_last_idr + field_poc;
                order.global_poc_highest = prev.global_poc_highest.max(order.global_poc);
                order.global_poc_last_idr = prev.global_poc_last_idr;
            }
        }
        order
    }

    /// Remembers `order` as `prevPic` if it starts a new picture.
    pub fn update(&mut self, slice: &SliceHeader, order: PictureOrder) {
        if slice.bottom_field_flag || slice.first_mb_in_slice != 0 {
            return;
        }
        let replace = match &self.last_picture_first_slice {
            None => true,
            Some(last) => {
                last.top_field_order_cnt != order.top_field_order_cnt || slice.is_random_access()
            }
        };
        if replace {
            self.last_picture_first_slice = Some(order);
        }
    }
}
