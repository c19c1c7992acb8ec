use crate::codec::ChromaFormat;
use crate::error::{DemuxError, Result};
use crate::trace::TraceScope;
use crate::utils::BitReader;

/// `seq_force_screen_content_tools` / `seq_force_integer_mv` value that
/// leaves the choice to each frame header.
pub const SELECT_TOOLS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_display_tick: u32,
    pub time_scale: u32,
    pub equal_picture_interval: bool,
    pub num_ticks_per_picture_minus_1: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderModelInfo {
    pub buffer_delay_length_minus_1: u8,
    pub num_units_in_decoding_tick: u32,
    pub buffer_removal_time_length_minus_1: u8,
    pub frame_presentation_time_length_minus_1: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingPoint {
    pub idc: u16,
    pub seq_level_idx: u8,
    pub seq_tier: bool,
    pub decoder_model_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorConfig {
    pub bit_depth: u8,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub mono_chrome: bool,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub color_range: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub separate_uv_delta_q: bool,
}

impl ColorConfig {
    fn parse(
        reader: &mut BitReader<'_>,
        seq_profile: u8,
        trace: &mut TraceScope<'_>,
    ) -> Result<Self> {
        let high_bitdepth = trace.flag(reader, "high_bitdepth")?;
        let mut twelve_bit = false;
        let bit_depth = if seq_profile == 2 && high_bitdepth {
            twelve_bit = trace.flag(reader, "twelve_bit")?;
            if twelve_bit {
                12
            } else {
                10
            }
        } else if high_bitdepth {
            10
        } else {
            8
        };
        let mono_chrome = if seq_profile == 1 {
            false
        } else {
            trace.flag(reader, "mono_chrome")?
        };

        // 2 means unspecified for all three
        let (mut color_primaries, mut transfer_characteristics, mut matrix_coefficients) =
            (2, 2, 2);
        if trace.flag(reader, "color_description_present_flag")? {
            color_primaries = trace.bits(reader, 8, "color_primaries")? as u8;
            transfer_characteristics = trace.bits(reader, 8, "transfer_characteristics")? as u8;
            matrix_coefficients = trace.bits(reader, 8, "matrix_coefficients")? as u8;
        }

        let mut config = Self {
            bit_depth,
            high_bitdepth,
            twelve_bit,
            mono_chrome,
            color_primaries,
            transfer_characteristics,
            matrix_coefficients,
            color_range: false,
            subsampling_x: true,
            subsampling_y: true,
            chroma_sample_position: 0,
            separate_uv_delta_q: false,
        };

        if mono_chrome {
            config.color_range = trace.flag(reader, "color_range")?;
            return Ok(config);
        }
        // BT.709 primaries, sRGB transfer, identity matrix
        if color_primaries == 1 && transfer_characteristics == 13 && matrix_coefficients == 0 {
            config.color_range = true;
            config.subsampling_x = false;
            config.subsampling_y = false;
        } else {
            config.color_range = trace.flag(reader, "color_range")?;
            match seq_profile {
                0 => {}
                1 => {
                    config.subsampling_x = false;
                    config.subsampling_y = false;
                }
                _ if bit_depth == 12 => {
                    config.subsampling_x = trace.flag(reader, "subsampling_x")?;
                    config.subsampling_y = if config.subsampling_x {
                        trace.flag(reader, "subsampling_y")?
                    } else {
                        false
                    };
                }
                _ => config.subsampling_y = false,
            }
            if config.subsampling_x && config.subsampling_y {
                config.chroma_sample_position = trace.bits(reader, 2, "chroma_sample_position")? as u8;
            }
        }
        config.separate_uv_delta_q = trace.flag(reader, "separate_uv_delta_q")?;
        Ok(config)
    }

    pub fn chroma_format(&self) -> ChromaFormat {
        match (self.mono_chrome, self.subsampling_x, self.subsampling_y) {
            (true, _, _) => ChromaFormat::Monochrome,
            (false, true, true) => ChromaFormat::Yuv420,
            (false, true, false) => ChromaFormat::Yuv422,
            (false, false, _) => ChromaFormat::Yuv444,
        }
    }
}

/// A parsed `sequence_header_obu()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub seq_profile: u8,
    pub still_picture: bool,
    pub reduced_still_picture_header: bool,
    pub timing_info: Option<TimingInfo>,
    pub decoder_model_info: Option<DecoderModelInfo>,
    pub operating_points: Vec<OperatingPoint>,
    pub max_frame_width_minus_1: u32,
    pub max_frame_height_minus_1: u32,
    pub frame_id_numbers_present_flag: bool,
    pub delta_frame_id_length_minus_2: u8,
    pub additional_frame_id_length_minus_1: u8,
    pub use_128x128_superblock: bool,
    pub enable_order_hint: bool,
    /// `OrderHintBits`, 0 if order hints are disabled
    pub order_hint_bits: u32,
    pub seq_force_screen_content_tools: u8,
    pub seq_force_integer_mv: u8,
    pub enable_superres: bool,
    pub enable_cdef: bool,
    pub enable_restoration: bool,
    pub color_config: ColorConfig,
    pub film_grain_params_present: bool,
}

impl SequenceHeader {
    /// Parses the OBU payload (after the OBU header and size).
    pub fn parse(reader: &mut BitReader<'_>, trace: &mut TraceScope<'_>) -> Result<Self> {
        let seq_profile = trace.bits(reader, 3, "seq_profile")? as u8;
        if seq_profile > 2 {
            return Err(DemuxError::Unsupported(format!("seq_profile {}", seq_profile)));
        }
        let still_picture = trace.flag(reader, "still_picture")?;
        let reduced_still_picture_header = trace.flag(reader, "reduced_still_picture_header")?;

        let mut timing_info = None;
        let mut decoder_model_info = None;
        let mut operating_points = Vec::new();
        if reduced_still_picture_header {
            operating_points.push(OperatingPoint {
                idc: 0,
                seq_level_idx: trace.bits(reader, 5, "seq_level_idx")? as u8,
                seq_tier: false,
                decoder_model_present: false,
            });
        } else {
            if trace.flag(reader, "timing_info_present_flag")? {
                let mut scope = trace.child("timing_info");
                let num_units_in_display_tick =
                    scope.bits(reader, 32, "num_units_in_display_tick")?;
                let time_scale = scope.bits(reader, 32, "time_scale")?;
                let equal_picture_interval = scope.flag(reader, "equal_picture_interval")?;
                let num_ticks_per_picture_minus_1 = if equal_picture_interval {
                    let value = reader.read_uvlc()?;
                    scope.field("num_ticks_per_picture_minus_1", value);
                    value
                } else {
                    0
                };
                timing_info = Some(TimingInfo {
                    num_units_in_display_tick,
                    time_scale,
                    equal_picture_interval,
                    num_ticks_per_picture_minus_1,
                });

                if trace.flag(reader, "decoder_model_info_present_flag")? {
                    let mut scope = trace.child("decoder_model_info");
                    decoder_model_info = Some(DecoderModelInfo {
                        buffer_delay_length_minus_1: scope
                            .bits(reader, 5, "buffer_delay_length_minus_1")?
                            as u8,
                        num_units_in_decoding_tick: scope
                            .bits(reader, 32, "num_units_in_decoding_tick")?,
                        buffer_removal_time_length_minus_1: scope
                            .bits(reader, 5, "buffer_removal_time_length_minus_1")?
                            as u8,
                        frame_presentation_time_length_minus_1: scope
                            .bits(reader, 5, "frame_presentation_time_length_minus_1")?
                            as u8,
                    });
                }
            }

            let initial_display_delay_present_flag =
                trace.flag(reader, "initial_display_delay_present_flag")?;
            let count = trace.bits(reader, 5, "operating_points_cnt_minus_1")? + 1;
            for _ in 0..count {
                let idc = trace.bits(reader, 12, "operating_point_idc")? as u16;
                let seq_level_idx = trace.bits(reader, 5, "seq_level_idx")? as u8;
                let seq_tier = if seq_level_idx > 7 {
                    trace.flag(reader, "seq_tier")?
                } else {
                    false
                };
                let mut decoder_model_present = false;
                if let Some(model) = decoder_model_info {
                    decoder_model_present = trace.flag(reader, "decoder_model_present_for_this_op")?;
                    if decoder_model_present {
                        let n = model.buffer_delay_length_minus_1 as u32 + 1;
                        trace.bits(reader, n, "decoder_buffer_delay")?;
                        trace.bits(reader, n, "encoder_buffer_delay")?;
                        trace.flag(reader, "low_delay_mode_flag")?;
                    }
                }
                if initial_display_delay_present_flag
                    && trace.flag(reader, "initial_display_delay_present_for_this_op")?
                {
                    trace.bits(reader, 4, "initial_display_delay_minus_1")?;
                }
                operating_points.push(OperatingPoint {
                    idc,
                    seq_level_idx,
                    seq_tier,
                    decoder_model_present,
                });
            }
        }

        let frame_width_bits = trace.bits(reader, 4, "frame_width_bits_minus_1")? + 1;
        let frame_height_bits = trace.bits(reader, 4, "frame_height_bits_minus_1")? + 1;
        let max_frame_width_minus_1 = trace.bits(reader, frame_width_bits, "max_frame_width_minus_1")?;
        let max_frame_height_minus_1 =
            trace.bits(reader, frame_height_bits, "max_frame_height_minus_1")?;

        let frame_id_numbers_present_flag = if reduced_still_picture_header {
            false
        } else {
            trace.flag(reader, "frame_id_numbers_present_flag")?
        };
        let (mut delta_frame_id_length_minus_2, mut additional_frame_id_length_minus_1) = (0, 0);
        if frame_id_numbers_present_flag {
            delta_frame_id_length_minus_2 = trace.bits(reader, 4, "delta_frame_id_length_minus_2")? as u8;
            additional_frame_id_length_minus_1 =
                trace.bits(reader, 3, "additional_frame_id_length_minus_1")? as u8;
        }
        let use_128x128_superblock = trace.flag(reader, "use_128x128_superblock")?;
        trace.flag(reader, "enable_filter_intra")?;
        trace.flag(reader, "enable_intra_edge_filter")?;

        let mut enable_order_hint = false;
        let mut order_hint_bits = 0;
        let mut seq_force_screen_content_tools = SELECT_TOOLS;
        let mut seq_force_integer_mv = SELECT_TOOLS;
        if !reduced_still_picture_header {
            trace.flag(reader, "enable_interintra_compound")?;
            trace.flag(reader, "enable_masked_compound")?;
            trace.flag(reader, "enable_warped_motion")?;
            trace.flag(reader, "enable_dual_filter")?;
            enable_order_hint = trace.flag(reader, "enable_order_hint")?;
            if enable_order_hint {
                trace.flag(reader, "enable_jnt_comp")?;
                trace.flag(reader, "enable_ref_frame_mvs")?;
            }
            if !trace.flag(reader, "seq_choose_screen_content_tools")? {
                seq_force_screen_content_tools =
                    trace.bits(reader, 1, "seq_force_screen_content_tools")? as u8;
            }
            if seq_force_screen_content_tools > 0 {
                if !trace.flag(reader, "seq_choose_integer_mv")? {
                    seq_force_integer_mv = trace.bits(reader, 1, "seq_force_integer_mv")? as u8;
                }
            } else {
                seq_force_integer_mv = SELECT_TOOLS;
            }
            if enable_order_hint {
                order_hint_bits = trace.bits(reader, 3, "order_hint_bits_minus_1")? + 1;
            }
        }
        trace.field("OrderHintBits", order_hint_bits);

        let enable_superres = trace.flag(reader, "enable_superres")?;
        let enable_cdef = trace.flag(reader, "enable_cdef")?;
        let enable_restoration = trace.flag(reader, "enable_restoration")?;
        let color_config = ColorConfig::parse(reader, seq_profile, &mut trace.child("color_config"))?;
        let film_grain_params_present = trace.flag(reader, "film_grain_params_present")?;

        Ok(Self {
            seq_profile,
            still_picture,
            reduced_still_picture_header,
            timing_info,
            decoder_model_info,
            operating_points,
            max_frame_width_minus_1,
            max_frame_height_minus_1,
            frame_id_numbers_present_flag,
            delta_frame_id_length_minus_2,
            additional_frame_id_length_minus_1,
            use_128x128_superblock,
            enable_order_hint,
            order_hint_bits,
            seq_force_screen_content_tools,
            seq_force_integer_mv,
            enable_superres,
            enable_cdef,
            enable_restoration,
            color_config,
            film_grain_params_present,
        })
    }

    /// `idLen` of the frame header, if frame ids are present
    pub fn frame_id_length(&self) -> Option<u32> {
        self.frame_id_numbers_present_flag.then(|| {
            self.additional_frame_id_length_minus_1 as u32
                + self.delta_frame_id_length_minus_2 as u32
                + 3
        })
    }

    pub fn max_frame_size(&self) -> (u32, u32) {
        (self.max_frame_width_minus_1 + 1, self.max_frame_height_minus_1 + 1)
    }

    pub fn frame_rate(&self) -> Option<f64> {
        let timing = self.timing_info?;
        if timing.num_units_in_display_tick == 0 {
            return None;
        }
        let ticks = if timing.equal_picture_interval {
            timing.num_ticks_per_picture_minus_1 as f64 + 1.0
        } else {
            1.0
        };
        Some(timing.time_scale as f64 / (timing.num_units_in_display_tick as f64 * ticks))
    }

    /// Level and tier of operating point 0
    pub fn level(&self) -> (u8, bool) {
        self.operating_points
            .first()
            .map(|op| (op.seq_level_idx, op.seq_tier))
            .unwrap_or((0, false))
    }
}
