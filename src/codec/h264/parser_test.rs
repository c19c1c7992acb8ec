#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::av::ByteRange;
    use crate::codec::{StreamParser, UnitInput};
    use crate::error::DemuxError;
    use crate::trace::{TraceScope, TraceTree};
    use crate::utils::{escape_rbsp, BitWriter};
    use pretty_assertions::assert_eq;

    fn nal(header: u8, mut body: BitWriter) -> Vec<u8> {
        body.write_trailing_bits();
        let mut out = vec![0, 0, 0, 1, header];
        out.extend(escape_rbsp(&body.into_bytes()));
        out
    }

    fn write_sps(w: &mut BitWriter, vui: Option<fn(&mut BitWriter)>) {
        w.write_bits(66, 8); // baseline
        w.write_bits(0, 8);
        w.write_bits(30, 8);
        w.write_golomb(0); // sps id
        w.write_golomb(0); // log2_max_frame_num_minus4
        w.write_golomb(0); // pic_order_cnt_type
        w.write_golomb(2); // log2_max_pic_order_cnt_lsb_minus4
        w.write_golomb(1); // max_num_ref_frames
        w.write_flag(false);
        w.write_golomb(19); // 320
        w.write_golomb(14); // 240
        w.write_flag(true); // frame_mbs_only_flag
        w.write_flag(true); // direct_8x8_inference_flag
        w.write_flag(false); // frame_cropping_flag
        w.write_flag(vui.is_some());
        if let Some(write_vui) = vui {
            write_vui(w);
        }
    }

    fn sps() -> Vec<u8> {
        let mut w = BitWriter::new();
        write_sps(&mut w, None);
        nal(0x67, w)
    }

    /// VUI with 25 fps timing and one NAL HRD schedule of 64000 bit/s.
    fn hrd_vui(vui: &mut BitWriter) {
        vui.write_flag(false); // aspect_ratio_info_present_flag
        vui.write_flag(false); // overscan_info_present_flag
        vui.write_flag(false); // video_signal_type_present_flag
        vui.write_flag(false); // chroma_loc_info_present_flag
        vui.write_flag(true); // timing_info_present_flag
        vui.write_bits(1, 32);
        vui.write_bits(50, 32);
        vui.write_flag(true);
        vui.write_flag(true); // nal_hrd_parameters_present_flag
        vui.write_golomb(0); // cpb_cnt_minus1
        vui.write_bits(0, 4);
        vui.write_bits(0, 4);
        vui.write_golomb(999); // bit_rate_value_minus1
        vui.write_golomb(3999); // cpb_size_value_minus1
        vui.write_flag(false);
        vui.write_bits(23, 5);
        vui.write_bits(23, 5);
        vui.write_bits(23, 5);
        vui.write_bits(24, 5);
        vui.write_flag(false); // vcl_hrd_parameters_present_flag
        vui.write_flag(false); // low_delay_hrd_flag
        vui.write_flag(false); // pic_struct_present_flag
        vui.write_flag(false); // bitstream_restriction_flag
    }

    fn sps_with_hrd() -> Vec<u8> {
        let mut w = BitWriter::new();
        write_sps(&mut w, Some(hrd_vui));
        nal(0x67, w)
    }

    fn pps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_flag(false);
        w.write_flag(false);
        w.write_golomb(0); // num_slice_groups_minus1
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_flag(false);
        w.write_bits(0, 2);
        w.write_signed_golomb(0);
        w.write_signed_golomb(0);
        w.write_signed_golomb(0);
        w.write_flag(false);
        w.write_flag(false);
        w.write_flag(false);
        nal(0x68, w)
    }

    fn idr_slice(poc_lsb: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(0); // first_mb_in_slice
        w.write_golomb(7); // I
        w.write_golomb(0); // pps id
        w.write_bits(0, 4); // frame_num
        w.write_golomb(0); // idr_pic_id
        w.write_bits(poc_lsb, 6);
        w.write_flag(false); // no_output_of_prior_pics_flag
        w.write_flag(false); // long_term_reference_flag
        w.write_signed_golomb(0); // slice_qp_delta
        nal(0x65, w)
    }

    fn p_slice(first_mb: u32, frame_num: u64, poc_lsb: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(first_mb);
        w.write_golomb(5); // P
        w.write_golomb(0);
        w.write_bits(frame_num, 4);
        w.write_bits(poc_lsb, 6);
        w.write_flag(false); // num_ref_idx_active_override_flag
        w.write_flag(false); // ref_pic_list_modification_flag_l0
        w.write_flag(false); // adaptive_ref_pic_marking_mode_flag
        w.write_signed_golomb(0);
        nal(0x41, w)
    }

    fn sei(messages: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1, 0x06];
        let mut rbsp = Vec::new();
        for (payload_type, payload) in messages {
            rbsp.push(*payload_type);
            rbsp.push(payload.len() as u8);
            rbsp.extend_from_slice(payload);
        }
        rbsp.push(0x80);
        out.extend(escape_rbsp(&rbsp));
        out
    }

    fn buffering_period(delay: u64, offset: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(0);
        w.write_bits(delay, 24);
        w.write_bits(offset, 24);
        w.into_bytes()
    }

    fn pic_timing(cpb_removal_delay: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(cpb_removal_delay, 24);
        w.write_bits(0, 24);
        w.into_bytes()
    }

    /// Feeds units with consecutive byte ranges and returns the results.
    fn feed(parser: &mut AvcParser, units: &[Vec<u8>]) -> Vec<crate::Result<String>> {
        let mut pos = 0u64;
        let mut results = Vec::new();
        for (index, data) in units.iter().enumerate() {
            let range = ByteRange::new(pos, pos + data.len() as u64 - 1);
            pos += data.len() as u64;
            let input = UnitInput {
                index: index as u64,
                data,
                range: Some(range),
            };
            let mut trace = TraceScope::disabled();
            results.push(parser.parse_unit(input, &mut trace).map(|o| o.name));
        }
        results
    }

    #[test]
    fn test_parse_simple_stream() {
        let mut parser = AvcParser::new();
        let names: Vec<String> = feed(
            &mut parser,
            &[sps(), pps(), idr_slice(0), p_slice(0, 1, 8), p_slice(0, 2, 4)],
        )
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
        assert_eq!(
            names,
            vec!["SPS(0)", "PPS(0)", "Slice(POC 0)", "Slice(POC 8)", "Slice(POC 4)"]
        );
        parser.finalize().unwrap();

        let frames = parser.frames();
        assert_eq!(frames.len(), 3);
        let display: Vec<i64> = frames.display_order().map(|f| f.poc).collect();
        assert_eq!(display, vec![0, 4, 8]);
        assert!(frames.display(0).unwrap().random_access_point);

        let entries = parser.drain_access_units();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].bitrate.keyframe);
        assert!(!entries[1].bitrate.keyframe);
        assert_eq!(entries[1].bitrate.pts, 8);
        assert!(entries.iter().all(|e| e.hrd.is_none()));
    }

    #[test]
    fn test_slices_of_one_picture_share_a_frame() {
        let mut parser = AvcParser::new();
        let results = feed(
            &mut parser,
            &[sps(), pps(), idr_slice(0), p_slice(0, 1, 2), p_slice(40, 1, 2)],
        );
        assert!(results.iter().all(|r| r.is_ok()));
        parser.finalize().unwrap();
        assert_eq!(parser.frames().len(), 2);
        assert_eq!(parser.drain_access_units().len(), 2);
    }

    #[test]
    fn test_access_unit_delimiters_mark_boundaries() {
        let aud = nal(0x09, {
            let mut w = BitWriter::new();
            w.write_bits(0, 3);
            w
        });
        let mut parser = AvcParser::new();
        let results = feed(
            &mut parser,
            &[
                aud.clone(),
                sps(),
                pps(),
                idr_slice(0),
                aud.clone(),
                p_slice(0, 1, 2),
                aud,
                p_slice(0, 2, 4),
            ],
        );
        assert_eq!(results[0].as_deref().unwrap(), "AUD");
        parser.finalize().unwrap();
        let entries = parser.drain_access_units();
        assert_eq!(entries.len(), 3);
        let first_size = (6 + sps().len() + pps().len() + idr_slice(0).len()) as u64;
        assert_eq!(entries[0].bitrate.byte_size, first_size);
    }

    #[test]
    fn test_slice_without_pps_fails() {
        let mut parser = AvcParser::new();
        let results = feed(&mut parser, &[sps(), idr_slice(0)]);
        assert!(matches!(
            results[1],
            Err(DemuxError::MissingParameterSet { kind: "PPS", id: 0 })
        ));
        // failed units still count towards the access unit
        assert_eq!(
            parser.assembler().au_bytes(),
            (sps().len() + idr_slice(0).len()) as u64
        );
    }

    #[test]
    fn test_partition_b_requires_partition_a() {
        let partition_b = vec![0, 0, 0, 1, 0x23, 0x80];
        let mut parser = AvcParser::new();
        let results = feed(&mut parser, &[sps(), pps(), partition_b]);
        assert!(matches!(results[2], Err(DemuxError::InvalidData(_))));
    }

    #[test]
    fn test_seek_info_and_extradata() {
        let units = [sps(), pps(), idr_slice(0), p_slice(0, 1, 2)];
        let idr_pos = (units[0].len() + units[1].len()) as u64;
        let mut parser = AvcParser::new();
        feed(&mut parser, &units);
        parser.finalize().unwrap();

        let info = parser.seek_info(0).unwrap();
        assert_eq!(info.file_pos, Some(idr_pos));
        assert_eq!(info.parameter_sets.len(), 2);
        assert_eq!(&info.parameter_sets[0][..], &sps()[..]);
        assert!(parser.seek_info(1).is_none());

        let avcc = parser.extradata().unwrap();
        assert_eq!(avcc[0], 1);
        assert_eq!(avcc[1], 66);
        assert_eq!(avcc[3], 30);
    }

    #[test]
    fn test_stream_info() {
        let mut parser = AvcParser::new();
        feed(&mut parser, &[sps_with_hrd(), pps(), idr_slice(0)]);
        let info = parser.stream_info();
        assert_eq!(info.profile, Some(66));
        assert_eq!(info.level, Some(30));
        assert_eq!(info.frame_size, Some((320, 240)));
        assert_eq!(info.bit_depth, Some((8, 8)));
        assert_eq!(info.frame_rate, Some(25.0));
    }

    #[test]
    fn test_hrd_timing_follows_sei() {
        let mut parser = AvcParser::new();
        let results = feed(
            &mut parser,
            &[
                sps_with_hrd(),
                pps(),
                sei(&[(0, buffering_period(45000, 0)), (1, pic_timing(0))]),
                idr_slice(0),
                sei(&[(1, pic_timing(2))]),
                p_slice(0, 1, 2),
            ],
        );
        assert_eq!(results[2].as_deref().unwrap(), "SEI(x2)");
        assert!(results.iter().all(|r| r.is_ok()));
        parser.finalize().unwrap();

        let entries = parser.drain_access_units();
        assert_eq!(entries.len(), 2);
        let first = entries[0].hrd.unwrap();
        assert!(first.timing.first_in_buffering_period);
        assert_eq!(first.timing.initial_cpb_removal_delay, 45000);
        assert_eq!(first.timing.bit_rate, 64000);
        assert_eq!(first.timing.cpb_size, 64000);
        assert_eq!(first.timing.clock_tick, 0.02);
        assert_eq!(first.bits, entries[0].bitrate.byte_size * 8);

        let second = entries[1].hrd.unwrap();
        assert!(!second.timing.first_in_buffering_period);
        assert_eq!(second.timing.cpb_removal_delay, 2);
    }

    #[test]
    fn test_trace_records_fields() {
        let mut parser = AvcParser::new();
        let mut tree = TraceTree::new();
        let node = tree.add_child(TraceTree::ROOT, "unit 0", None);
        {
            let mut trace = TraceScope::new(&mut tree, node);
            let data = sps();
            let input = UnitInput {
                index: 0,
                data: &data,
                range: None,
            };
            parser.parse_unit(input, &mut trace).unwrap();
        }
        let text = tree.to_string();
        assert!(text.contains("profile_idc = 66"));
        assert!(text.contains("pic_width_in_mbs_minus1 = 19"));
    }
}
