use super::*;
use crate::av::ByteRange;
use crate::codec::{ChromaFormat, StreamParser, UnitInput};
use crate::error::DemuxError;
use crate::trace::{TraceScope, TraceTree};
use crate::utils::BitWriter;
use pretty_assertions::assert_eq;

const OBU_SEQUENCE_HEADER: u8 = 1;
const OBU_TEMPORAL_DELIMITER: u8 = 2;
const OBU_FRAME_HEADER: u8 = 3;
const OBU_TILE_GROUP: u8 = 4;
const OBU_FRAME: u8 = 6;

fn obu(obu_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(((obu_type << 3) | 0x02) as u64, 8);
    w.write_leb128(payload.len() as u64);
    let mut data = w.into_bytes();
    data.extend_from_slice(payload);
    data
}

fn temporal_delimiter() -> Vec<u8> {
    obu(OBU_TEMPORAL_DELIMITER, &[])
}

/// Main profile, level 8, 320x180 at 30 fps, 7 bit order hints.
fn sequence_header() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(0, 3); // seq_profile
    w.write_flag(false); // still_picture
    w.write_flag(false); // reduced_still_picture_header
    w.write_flag(true); // timing_info_present_flag
    w.write_bits(1, 32);
    w.write_bits(30, 32);
    w.write_flag(true); // equal_picture_interval
    w.write_flag(true); // uvlc 0
    w.write_flag(false); // decoder_model_info_present_flag
    w.write_flag(false); // initial_display_delay_present_flag
    w.write_bits(0, 5);
    w.write_bits(0, 12); // operating_point_idc
    w.write_bits(8, 5); // seq_level_idx
    w.write_flag(false); // seq_tier
    w.write_bits(8, 4);
    w.write_bits(7, 4);
    w.write_bits(319, 9);
    w.write_bits(179, 8);
    w.write_flag(false); // frame_id_numbers_present_flag
    w.write_bits(0, 3); // superblock size, filter intra, intra edge
    w.write_bits(0, 4); // interintra, masked, warped, dual filter
    w.write_flag(true); // enable_order_hint
    w.write_bits(0, 2); // jnt comp, ref frame mvs
    w.write_flag(true); // seq_choose_screen_content_tools
    w.write_flag(true); // seq_choose_integer_mv
    w.write_bits(6, 3); // order_hint_bits_minus_1
    w.write_bits(0, 3); // superres, cdef, restoration
    w.write_flag(false); // high_bitdepth
    w.write_flag(false); // mono_chrome
    w.write_flag(false); // color_description_present_flag
    w.write_flag(false); // color_range
    w.write_bits(0, 2); // chroma_sample_position
    w.write_flag(false); // separate_uv_delta_q
    w.write_flag(false); // film_grain_params_present
    w.write_trailing_bits();
    obu(OBU_SEQUENCE_HEADER, &w.into_bytes())
}

fn key_frame(order_hint: u64) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_flag(false); // show_existing_frame
    w.write_bits(0, 2);
    w.write_flag(true); // show_frame
    w.write_flag(false); // disable_cdf_update
    w.write_flag(false); // allow_screen_content_tools
    w.write_flag(false); // frame_size_override_flag
    w.write_bits(order_hint, 7);
    w.write_trailing_bits();
    let mut payload = w.into_bytes();
    payload.extend_from_slice(&[0x5A; 6]);
    obu(OBU_FRAME, &payload)
}

/// Key frame split into a frame header OBU and a tile group OBU.
fn key_frame_header(order_hint: u64) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_flag(false);
    w.write_bits(0, 2);
    w.write_flag(true);
    w.write_flag(false);
    w.write_flag(false);
    w.write_flag(false);
    w.write_bits(order_hint, 7);
    w.write_trailing_bits();
    obu(OBU_FRAME_HEADER, &w.into_bytes())
}

fn tile_group() -> Vec<u8> {
    obu(OBU_TILE_GROUP, &[0x3C; 8])
}

fn inter_frame(order_hint: u64, show: bool, refresh: u8) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_flag(false);
    w.write_bits(1, 2);
    w.write_flag(show);
    if !show {
        w.write_flag(true); // showable_frame
    }
    w.write_flag(false); // error_resilient_mode
    w.write_flag(false);
    w.write_flag(false);
    w.write_flag(false);
    w.write_bits(order_hint, 7);
    w.write_bits(0, 3); // primary_ref_frame
    w.write_bits(refresh as u64, 8);
    w.write_trailing_bits();
    let mut payload = w.into_bytes();
    payload.extend_from_slice(&[0xA5; 4]);
    obu(OBU_FRAME, &payload)
}

fn show_existing(slot: u64) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_flag(true);
    w.write_bits(slot, 3);
    w.write_trailing_bits();
    obu(OBU_FRAME_HEADER, &w.into_bytes())
}

fn feed(parser: &mut Av1Parser, units: &[Vec<u8>]) -> Vec<crate::Result<String>> {
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
            parser
                .parse_unit(input, &mut TraceScope::disabled())
                .map(|o| o.name)
        })
        .collect()
}

fn display_pocs(parser: &Av1Parser) -> Vec<i64> {
    parser.frames().display_order().map(|f| f.poc).collect()
}

#[test]
fn test_sequence_header() {
    let data = sequence_header();
    let mut tree = TraceTree::new();
    let mut reader = crate::utils::BitReader::new(&data[2..]);
    let seq = SequenceHeader::parse(&mut reader, &mut TraceScope::new(&mut tree, 0)).unwrap();
    assert_eq!(seq.order_hint_bits, 7);
    assert_eq!(seq.max_frame_size(), (320, 180));
    assert_eq!(seq.frame_rate(), Some(30.0));
    assert_eq!(seq.level(), (8, false));
    assert_eq!(seq.color_config.chroma_format(), ChromaFormat::Yuv420);
    assert_eq!(seq.color_config.bit_depth, 8);
    assert!(tree.find_child(0, "seq_profile").is_some());
}

#[test]
fn test_temporal_units_with_hidden_frame() {
    let _ = env_logger::builder().is_test(true).try_init();
    let units = [
        temporal_delimiter(),
        sequence_header(),
        key_frame(0),
        temporal_delimiter(),
        inter_frame(3, false, 0x02),
        inter_frame(1, true, 0x04),
        temporal_delimiter(),
        inter_frame(2, true, 0x08),
        temporal_delimiter(),
        show_existing(1),
    ];
    let mut parser = Av1Parser::new();
    let names: Vec<String> = feed(&mut parser, &units)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(names[2], "Frame(KEY POC 0)");
    assert_eq!(names[4], "Frame(INTER POC 3 hidden)");
    assert_eq!(names[9], "Frame Header(show existing POC 3)");
    parser.finalize().unwrap();

    assert_eq!(display_pocs(&parser), vec![0, 1, 2, 3]);
    let frames = parser.frames().coding_order();
    assert!(frames[0].random_access_point);
    assert_eq!(frames[0].range.map(|r| r.start), Some(0));
    // The hidden frame belongs to the shown frame of its temporal unit
    let second_tu = (units[0].len() + units[1].len() + units[2].len()) as u64;
    assert_eq!(frames[1].range.map(|r| r.start), Some(second_tu));

    let entries = parser.drain_access_units();
    assert_eq!(entries.len(), 4);
    assert!(entries[0].bitrate.keyframe);
    assert_eq!(entries[1].bitrate.frame_type_summary, "2 INTER");
    assert_eq!(entries[3].bitrate.frame_type_summary, "1 SHOW_EXISTING");
}

#[test]
fn test_access_units_without_delimiters() {
    let units = [sequence_header(), key_frame(0), inter_frame(1, true, 0x01), inter_frame(2, true, 0x01)];
    let mut parser = Av1Parser::new();
    assert!(feed(&mut parser, &units).iter().all(|r| r.is_ok()));
    parser.finalize().unwrap();

    let entries = parser.drain_access_units();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].bitrate.byte_size, (units[0].len() + units[1].len()) as u64);
    assert_eq!(display_pocs(&parser), vec![0, 1, 2]);
}

#[test]
fn test_order_hint_wraps_and_key_frames_stay_unique() {
    let units = [
        sequence_header(),
        key_frame(120),
        inter_frame(126, true, 0x01),
        inter_frame(2, true, 0x01),
        key_frame(0),
        inter_frame(1, true, 0x01),
    ];
    let mut parser = Av1Parser::new();
    assert!(feed(&mut parser, &units).iter().all(|r| r.is_ok()));
    parser.finalize().unwrap();
    assert_eq!(display_pocs(&parser), vec![120, 126, 130, 131, 132]);
}

#[test]
fn test_frame_before_sequence_header() {
    let mut parser = Av1Parser::new();
    let results = feed(&mut parser, &[temporal_delimiter(), key_frame(0)]);
    assert!(matches!(
        results[1],
        Err(DemuxError::MissingParameterSet {
            kind: "sequence header",
            id: 0
        })
    ));
}

#[test]
fn test_seek_info_extradata_and_stream_info() {
    let units = [
        temporal_delimiter(),
        sequence_header(),
        key_frame(0),
        temporal_delimiter(),
        inter_frame(1, true, 0x01),
    ];
    let mut parser = Av1Parser::new();
    feed(&mut parser, &units);
    parser.finalize().unwrap();

    let info = parser.seek_info(0).unwrap();
    assert_eq!(info.parameter_sets, vec![bytes::Bytes::from(sequence_header())]);
    assert_eq!(info.file_pos, Some(0));
    assert!(parser.seek_info(1).is_none());

    let av1c = parser.extradata().unwrap();
    assert_eq!(&av1c[..4], &[0x81, 0x08, 0x0C, 0x00]);
    assert_eq!(&av1c[4..], &sequence_header()[..]);

    let info = parser.stream_info();
    assert_eq!(info.frame_size, Some((320, 180)));
    assert_eq!(info.frame_rate, Some(30.0));
    assert_eq!(info.level, Some(8));
    assert_eq!(info.frame_count, 2);
}

#[test]
fn test_repeated_frame_header_without_delimiters() {
    let units = [
        sequence_header(),
        key_frame_header(0),
        key_frame_header(0),
        tile_group(),
        inter_frame(1, true, 0x01),
    ];
    let mut parser = Av1Parser::new();
    let names: Vec<String> = feed(&mut parser, &units)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(names[1], "Frame Header(KEY POC 0)");
    assert_eq!(names[2], "Frame Header (copy)");
    parser.finalize().unwrap();

    let first_tu: u64 = units[..4].iter().map(|u| u.len() as u64).sum();
    let frames = parser.frames().coding_order();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].range, Some(ByteRange::new(0, first_tu - 1)));
    assert_eq!(frames[1].range.map(|r| r.start), Some(first_tu));

    let entries = parser.drain_access_units();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].bitrate.byte_size, first_tu);
    assert_eq!(entries[0].bitrate.frame_type_summary, "1 KEY");
}

#[test]
fn test_hidden_frame_without_delimiters() {
    let units = [
        sequence_header(),
        key_frame(0),
        inter_frame(3, false, 0x02),
        inter_frame(1, true, 0x04),
        inter_frame(2, true, 0x08),
    ];
    let mut parser = Av1Parser::new();
    assert!(feed(&mut parser, &units).iter().all(|r| r.is_ok()));
    parser.finalize().unwrap();

    assert_eq!(display_pocs(&parser), vec![0, 1, 2]);
    let frames = parser.frames().coding_order();
    // The hidden frame opens the second temporal unit
    let second_tu = (units[0].len() + units[1].len()) as u64;
    let third_tu = second_tu + (units[2].len() + units[3].len()) as u64;
    assert_eq!(frames[1].range, Some(ByteRange::new(second_tu, third_tu - 1)));

    let entries = parser.drain_access_units();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].bitrate.byte_size, third_tu - second_tu);
    assert_eq!(entries[1].bitrate.frame_type_summary, "2 INTER");
}
