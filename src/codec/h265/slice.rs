use super::ps::{Pps, Sps};
use super::types::{NalHeader, SliceType};
use crate::codec::ParameterSetRegistry;
use crate::error::{DemuxError, Result};
use crate::trace::TraceScope;
use crate::utils::BitReader;

/// Slice segment header up to `slice_pic_order_cnt_lsb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSegmentHeader {
    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub slice_pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub dependent_slice_segment_flag: bool,
    pub slice_segment_address: u32,
    /// Not present in dependent slice segments
    pub slice_type: Option<SliceType>,
    pub pic_output_flag: bool,
    /// `None` for IDR pictures and dependent slice segments
    pub slice_pic_order_cnt_lsb: Option<u32>,
}

impl SliceSegmentHeader {
    pub fn parse(
        reader: &mut BitReader<'_>,
        nal: &NalHeader,
        sps_set: &ParameterSetRegistry<Sps>,
        pps_set: &ParameterSetRegistry<Pps>,
        trace: &mut TraceScope<'_>,
    ) -> Result<Self> {
        let first_slice_segment_in_pic_flag =
            trace.flag(reader, "first_slice_segment_in_pic_flag")?;
        let no_output_of_prior_pics_flag = if nal.nal_unit_type.is_irap() {
            trace.flag(reader, "no_output_of_prior_pics_flag")?
        } else {
            false
        };
        let slice_pic_parameter_set_id = trace.ue(reader, "slice_pic_parameter_set_id")?;
        if slice_pic_parameter_set_id > 63 {
            return Err(DemuxError::InvalidData(format!(
                "slice_pic_parameter_set_id {}",
                slice_pic_parameter_set_id
            )));
        }
        let pps = pps_set.require(slice_pic_parameter_set_id)?;
        let sps = sps_set.require(pps.pps_seq_parameter_set_id)?;

        let mut dependent_slice_segment_flag = false;
        let mut slice_segment_address = 0;
        if !first_slice_segment_in_pic_flag {
            if pps.dependent_slice_segments_enabled_flag {
                dependent_slice_segment_flag = trace.flag(reader, "dependent_slice_segment_flag")?;
            }
            let size = sps.pic_size_in_ctbs();
            let bits = 32 - size.saturating_sub(1).leading_zeros();
            slice_segment_address = trace.bits(reader, bits, "slice_segment_address")?;
        }

        let mut header = Self {
            first_slice_segment_in_pic_flag,
            no_output_of_prior_pics_flag,
            slice_pic_parameter_set_id,
            seq_parameter_set_id: pps.pps_seq_parameter_set_id,
            dependent_slice_segment_flag,
            slice_segment_address,
            slice_type: None,
            pic_output_flag: true,
            slice_pic_order_cnt_lsb: None,
        };
        if dependent_slice_segment_flag {
            return Ok(header);
        }

        for _ in 0..pps.num_extra_slice_header_bits {
            trace.flag(reader, "slice_reserved_flag")?;
        }
        header.slice_type = Some(SliceType::from_id(trace.ue(reader, "slice_type")?)?);
        if pps.output_flag_present_flag {
            header.pic_output_flag = trace.flag(reader, "pic_output_flag")?;
        }
        if sps.separate_colour_plane_flag {
            trace.bits(reader, 2, "colour_plane_id")?;
        }
        if !nal.nal_unit_type.is_idr() {
            header.slice_pic_order_cnt_lsb = Some(trace.bits(
                reader,
                sps.log2_max_pic_order_cnt_lsb,
                "slice_pic_order_cnt_lsb",
            )?);
        }
        Ok(header)
    }
}

/// POC of one picture (8.3.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureOrder {
    pub pic_order_cnt_lsb: i64,
    pub pic_order_cnt_msb: i64,
    pub pic_order_cnt_val: i64,
    pub no_rasl_output_flag: bool,
    /// POC made unique across IRAP pictures that reset the count
    pub global_poc: i64,
}

/// Decoding state carried from picture to picture.
#[derive(Debug)]
pub struct DecodeContext {
    first_picture: bool,
    /// `(slice_pic_order_cnt_lsb, PicOrderCntMsb)` of `prevTid0Pic`
    prev_tid0: (i64, i64),
    /// Set after an end of sequence unit
    after_end_of_sequence: bool,
    poc_offset: i64,
    max_poc: i64,
    /// `None` until the first picture; `i64::MIN` after an IDR start
    first_random_access_poc: Option<i64>,
    current: Option<PictureOrder>,
}

impl Default for DecodeContext {
    fn default() -> Self {
        Self {
            first_picture: true,
            prev_tid0: (0, 0),
            after_end_of_sequence: false,
            poc_offset: 0,
            max_poc: -1,
            first_random_access_poc: None,
            current: None,
        }
    }
}

impl DecodeContext {
    pub fn end_of_sequence(&mut self) {
        self.after_end_of_sequence = true;
    }

    /// POC of the picture the slice segment belongs to.
    ///
    /// Only the first slice segment of a picture derives a new POC; later
    /// segments reuse it.
    pub fn picture_order(
        &mut self,
        slice: &SliceSegmentHeader,
        nal: &NalHeader,
        sps: &Sps,
    ) -> Result<PictureOrder> {
        if !slice.first_slice_segment_in_pic_flag {
            return self.current.ok_or_else(|| {
                DemuxError::InvalidData("slice segment without a first segment in the picture".into())
            });
        }

        let nal_type = nal.nal_unit_type;
        let no_rasl_output_flag = nal_type.is_idr()
            || nal_type.is_bla()
            || self.first_picture
            || self.after_end_of_sequence;
        let irap_reset = nal_type.is_irap() && no_rasl_output_flag;

        let lsb = slice.slice_pic_order_cnt_lsb.unwrap_or(0) as i64;
        let msb = if irap_reset {
            0
        } else {
            let (prev_lsb, prev_msb) = self.prev_tid0;
            let max_lsb = sps.max_pic_order_cnt_lsb();
            if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
                prev_msb + max_lsb
            } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
                prev_msb - max_lsb
            } else {
                prev_msb
            }
        };
        let pic_order_cnt_val = msb + lsb;

        if irap_reset && self.max_poc >= 0 {
            self.poc_offset = self.max_poc + 1;
            self.max_poc = -1;
        }
        let global_poc = self.poc_offset + pic_order_cnt_val;
        self.max_poc = self.max_poc.max(global_poc);

        if nal.temporal_id() == 0
            && !nal_type.is_rasl()
            && !nal_type.is_radl()
            && !nal_type.is_sub_layer_non_reference()
        {
            self.prev_tid0 = (lsb, msb);
        }

        let order = PictureOrder {
            pic_order_cnt_lsb: lsb,
            pic_order_cnt_msb: msb,
            pic_order_cnt_val,
            no_rasl_output_flag,
            global_poc,
        };
        self.first_picture = false;
        self.after_end_of_sequence = false;
        self.current = Some(order);
        Ok(order)
    }

    /// Returns true if the picture is a leading picture that cannot be
    /// decoded when decoding starts at the first random access point.
    pub fn is_random_access_skip(&mut self, nal: &NalHeader, order: &PictureOrder) -> bool {
        let nal_type = nal.nal_unit_type;
        match self.first_random_access_poc {
            None => {
                if nal_type.is_idr() {
                    self.first_random_access_poc = Some(i64::MIN);
                    false
                } else if nal_type.is_irap() {
                    self.first_random_access_poc = Some(order.pic_order_cnt_val);
                    false
                } else {
                    true
                }
            }
            Some(first) => nal_type.is_rasl() && order.pic_order_cnt_val < first,
        }
    }
}
