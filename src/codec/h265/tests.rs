use super::*;
use crate::av::ByteRange;
use crate::codec::{StreamParser, UnitInput};
use crate::error::DemuxError;
use crate::trace::TraceScope;
use crate::utils::{escape_rbsp, BitWriter};
use pretty_assertions::assert_eq;

const IDR_W_RADL: u8 = 19;
const CRA: u8 = 21;
const TRAIL_R: u8 = 1;
const RASL_N: u8 = 8;

fn create_test_nalu(nal_type: u8, mut body: BitWriter) -> Vec<u8> {
    body.write_trailing_bits();
    let mut data = vec![0, 0, 0, 1, nal_type << 1, 0x01];
    data.extend(escape_rbsp(&body.into_bytes()));
    data
}

/// Main profile, level 3.1, no sub-layers.
fn write_profile_tier_level(w: &mut BitWriter) {
    w.write_bits(0, 2);
    w.write_flag(false);
    w.write_bits(1, 5);
    w.write_bits(0x6000_0000, 32);
    w.write_bits(0b1001, 4);
    w.write_bits(0, 44);
    w.write_bits(93, 8);
}

fn write_ordering_info(w: &mut BitWriter) {
    w.write_flag(true);
    w.write_golomb(4);
    w.write_golomb(0);
    w.write_golomb(0);
}

fn vps() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(0, 4);
    w.write_flag(true);
    w.write_flag(true);
    w.write_bits(0, 6);
    w.write_bits(0, 3);
    w.write_flag(true);
    w.write_bits(0xFFFF, 16);
    write_profile_tier_level(&mut w);
    write_ordering_info(&mut w);
    w.write_bits(0, 6); // vps_max_layer_id
    w.write_golomb(0); // vps_num_layer_sets_minus1
    w.write_flag(true); // vps_timing_info_present_flag
    w.write_bits(1, 32);
    w.write_bits(25, 32);
    w.write_flag(false); // vps_poc_proportional_to_timing_flag
    w.write_golomb(0); // vps_num_hrd_parameters
    w.write_flag(false); // vps_extension_flag
    create_test_nalu(32, w)
}

/// 416x240 coded, 416x232 after the conformance window, 64x64 CTBs.
fn sps() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(0, 4);
    w.write_bits(0, 3);
    w.write_flag(true);
    write_profile_tier_level(&mut w);
    w.write_golomb(0); // sps_seq_parameter_set_id
    w.write_golomb(1); // chroma_format_idc
    w.write_golomb(416);
    w.write_golomb(240);
    w.write_flag(true); // conformance_window_flag
    w.write_golomb(0);
    w.write_golomb(0);
    w.write_golomb(0);
    w.write_golomb(4);
    w.write_golomb(0);
    w.write_golomb(0);
    w.write_golomb(4); // 8 bit POC lsb
    write_ordering_info(&mut w);
    w.write_golomb(0);
    w.write_golomb(3);
    create_test_nalu(33, w)
}

fn pps() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_golomb(0);
    w.write_golomb(0);
    w.write_flag(false);
    w.write_flag(false);
    w.write_bits(0, 3);
    create_test_nalu(34, w)
}

fn slice(nal_type: u8, slice_type: u32, poc_lsb: Option<u64>, address: Option<u64>) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_flag(address.is_none());
    if (16..=23).contains(&nal_type) {
        w.write_flag(false);
    }
    w.write_golomb(0);
    if let Some(address) = address {
        w.write_bits(address, 5);
    }
    w.write_golomb(slice_type);
    if let Some(lsb) = poc_lsb {
        w.write_bits(lsb, 8);
    }
    create_test_nalu(nal_type, w)
}

fn feed(parser: &mut HevcParser, units: &[Vec<u8>]) -> Vec<crate::Result<String>> {
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

#[test]
fn test_parameter_sets() {
    let mut parser = HevcParser::new();
    let results = feed(&mut parser, &[vps(), sps(), pps()]);
    let names: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(names, vec!["VPS(0)", "SPS(0)", "PPS(0)"]);

    let sps = parser.sps().lookup(0).unwrap();
    assert_eq!(sps.profile_tier_level.general_level_idc, 93);
    assert_eq!(sps.pic_size_in_ctbs(), 28);

    let info = parser.stream_info();
    assert_eq!(info.profile, Some(1));
    assert_eq!(info.frame_size, Some((416, 232)));
    assert_eq!(info.frame_rate, Some(25.0));
    assert_eq!(info.bit_depth, Some((8, 8)));
}

#[test]
fn test_access_units_and_poc() {
    let mut parser = HevcParser::new();
    let results = feed(
        &mut parser,
        &[
            vps(),
            sps(),
            pps(),
            slice(IDR_W_RADL, 2, None, None),
            slice(TRAIL_R, 1, Some(4), None),
            slice(TRAIL_R, 0, Some(2), None),
            slice(TRAIL_R, 0, Some(2), Some(14)),
        ],
    );
    assert_eq!(results[3].as_deref().unwrap(), "Slice(POC 0)");
    assert_eq!(results[6].as_deref().unwrap(), "Slice(POC 2)");
    parser.finalize().unwrap();

    let pocs: Vec<i64> = parser.frames().display_order().map(|f| f.poc).collect();
    assert_eq!(pocs, vec![0, 2, 4]);

    let entries = parser.drain_access_units();
    assert_eq!(entries.len(), 3);
    assert!(entries[0].bitrate.keyframe);
    let first_size = (vps().len() + sps().len() + pps().len()) as u64
        + slice(IDR_W_RADL, 2, None, None).len() as u64;
    assert_eq!(entries[0].bitrate.byte_size, first_size);
    assert_eq!(entries[2].bitrate.frame_type_summary, "2 B");
}

#[test]
fn test_consecutive_idr_pictures_get_unique_pocs() {
    let mut parser = HevcParser::new();
    let idr = slice(IDR_W_RADL, 2, None, None);
    let results = feed(&mut parser, &[vps(), sps(), pps(), idr.clone(), idr.clone(), idr]);
    assert!(results.iter().all(|r| r.is_ok()));
    parser.finalize().unwrap();
    let pocs: Vec<i64> = parser.frames().display_order().map(|f| f.poc).collect();
    assert_eq!(pocs, vec![0, 1, 2]);
}

#[test]
fn test_leading_pictures_before_first_cra_are_skipped() {
    let mut parser = HevcParser::new();
    let results = feed(
        &mut parser,
        &[
            vps(),
            sps(),
            pps(),
            slice(CRA, 2, Some(8), None),
            slice(RASL_N, 0, Some(6), None),
            slice(TRAIL_R, 1, Some(12), None),
        ],
    );
    assert!(results[4].as_deref().unwrap().ends_with("skipped"));
    parser.finalize().unwrap();
    let pocs: Vec<i64> = parser.frames().display_order().map(|f| f.poc).collect();
    assert_eq!(pocs, vec![8, 12]);
    assert_eq!(parser.frames().first_random_access_poc(), Some(8));
}

#[test]
fn test_seek_info_and_extradata() {
    let units = [vps(), sps(), pps(), slice(IDR_W_RADL, 2, None, None)];
    let mut parser = HevcParser::new();
    feed(&mut parser, &units);
    parser.finalize().unwrap();

    let info = parser.seek_info(0).unwrap();
    assert_eq!(info.parameter_sets.len(), 3);
    assert_eq!(
        info.file_pos,
        Some((units[0].len() + units[1].len() + units[2].len()) as u64)
    );

    let extradata = parser.extradata().unwrap();
    assert_eq!(&extradata[..6], &[0, 0, 0, 1, 0x40, 0x01]);
    assert_eq!(extradata.len(), units[0].len() + units[1].len() + units[2].len());
}

#[test]
fn test_slice_without_pps_fails() {
    let mut parser = HevcParser::new();
    let results = feed(&mut parser, &[vps(), sps(), slice(IDR_W_RADL, 2, None, None)]);
    assert!(matches!(
        results[2],
        Err(DemuxError::MissingParameterSet { kind: "PPS", id: 0 })
    ));
}
