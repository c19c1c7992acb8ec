//! Synthetic elementary streams for the integration tests.

#![allow(dead_code)]

use esdemux::utils::{escape_rbsp, BitWriter};
use std::io::Write;
use tempfile::NamedTempFile;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn write_stream(units: &[Vec<u8>]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for unit in units {
        file.write_all(unit).unwrap();
    }
    file.flush().unwrap();
    file
}

pub mod avc {
    use super::*;

    fn nal(header: u8, mut body: BitWriter) -> Vec<u8> {
        body.write_trailing_bits();
        let mut out = vec![0, 0, 0, 1, header];
        out.extend(escape_rbsp(&body.into_bytes()));
        out
    }

    /// Baseline 320x240, 6 bit POC lsb. With `hrd` the VUI carries 50 Hz
    /// timing and a 64000 bit/s NAL HRD with a 64000 bit CPB.
    pub fn sps(hrd: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(66, 8);
        w.write_bits(0, 8);
        w.write_bits(30, 8);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(2);
        w.write_golomb(1);
        w.write_flag(false);
        w.write_golomb(19);
        w.write_golomb(14);
        w.write_flag(true);
        w.write_flag(true);
        w.write_flag(false);
        w.write_flag(hrd); // vui_parameters_present_flag
        if hrd {
            w.write_bits(0, 4);
            w.write_flag(true); // timing_info_present_flag
            w.write_bits(1, 32);
            w.write_bits(50, 32);
            w.write_flag(true);
            w.write_flag(true); // nal_hrd_parameters_present_flag
            w.write_golomb(0);
            w.write_bits(0, 4);
            w.write_bits(0, 4);
            w.write_golomb(999);
            w.write_golomb(3999);
            w.write_flag(false);
            w.write_bits(23, 5);
            w.write_bits(23, 5);
            w.write_bits(23, 5);
            w.write_bits(24, 5);
            w.write_flag(false);
            w.write_flag(false); // low_delay_hrd_flag
            w.write_flag(false);
            w.write_flag(false);
        }
        nal(0x67, w)
    }

    pub fn pps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_flag(false);
        w.write_flag(false);
        w.write_golomb(0);
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

    pub fn idr(poc_lsb: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(0);
        w.write_golomb(7);
        w.write_golomb(0);
        w.write_bits(0, 4);
        w.write_golomb(0);
        w.write_bits(poc_lsb, 6);
        w.write_flag(false);
        w.write_flag(false);
        w.write_signed_golomb(0);
        nal(0x65, w)
    }

    pub fn p_slice(frame_num: u64, poc_lsb: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(0);
        w.write_golomb(5);
        w.write_golomb(0);
        w.write_bits(frame_num, 4);
        w.write_bits(poc_lsb, 6);
        w.write_flag(false);
        w.write_flag(false);
        w.write_flag(false);
        w.write_signed_golomb(0);
        // Some residual bytes so access units differ in size
        for _ in 0..(frame_num * 8) {
            w.write_bits(0xA5, 8);
        }
        nal(0x41, w)
    }

    /// SEI with a buffering period (if `initial_delay` is set) and a
    /// picture timing message.
    pub fn timing_sei(initial_delay: Option<u64>, cpb_removal_delay: u64) -> Vec<u8> {
        let mut rbsp = Vec::new();
        if let Some(delay) = initial_delay {
            let mut w = BitWriter::new();
            w.write_golomb(0);
            w.write_bits(delay, 24);
            w.write_bits(0, 24);
            let payload = w.into_bytes();
            rbsp.push(0);
            rbsp.push(payload.len() as u8);
            rbsp.extend_from_slice(&payload);
        }
        let mut w = BitWriter::new();
        w.write_bits(cpb_removal_delay, 24);
        w.write_bits(0, 24);
        let payload = w.into_bytes();
        rbsp.push(1);
        rbsp.push(payload.len() as u8);
        rbsp.extend_from_slice(&payload);
        rbsp.push(0x80);

        let mut out = vec![0, 0, 0, 1, 0x06];
        out.extend(escape_rbsp(&rbsp));
        out
    }
}

pub mod hevc {
    use super::*;

    fn nalu(nal_type: u8, mut body: BitWriter) -> Vec<u8> {
        body.write_trailing_bits();
        let mut data = vec![0, 0, 0, 1, nal_type << 1, 0x01];
        data.extend(escape_rbsp(&body.into_bytes()));
        data
    }

    fn profile_tier_level(w: &mut BitWriter) {
        w.write_bits(0, 2);
        w.write_flag(false);
        w.write_bits(1, 5);
        w.write_bits(0x6000_0000, 32);
        w.write_bits(0b1001, 4);
        w.write_bits(0, 44);
        w.write_bits(93, 8);
    }

    fn ordering_info(w: &mut BitWriter) {
        w.write_flag(true);
        w.write_golomb(4);
        w.write_golomb(0);
        w.write_golomb(0);
    }

    /// 25 fps timing info.
    pub fn vps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(0, 4);
        w.write_flag(true);
        w.write_flag(true);
        w.write_bits(0, 6);
        w.write_bits(0, 3);
        w.write_flag(true);
        w.write_bits(0xFFFF, 16);
        profile_tier_level(&mut w);
        ordering_info(&mut w);
        w.write_bits(0, 6);
        w.write_golomb(0);
        w.write_flag(true);
        w.write_bits(1, 32);
        w.write_bits(25, 32);
        w.write_flag(false);
        w.write_golomb(0);
        w.write_flag(false);
        nalu(32, w)
    }

    /// 416x232 after cropping, 8 bit POC lsb, 64x64 CTBs.
    pub fn sps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(0, 4);
        w.write_bits(0, 3);
        w.write_flag(true);
        profile_tier_level(&mut w);
        w.write_golomb(0);
        w.write_golomb(1);
        w.write_golomb(416);
        w.write_golomb(240);
        w.write_flag(true);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(4);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_golomb(4);
        ordering_info(&mut w);
        w.write_golomb(0);
        w.write_golomb(3);
        nalu(33, w)
    }

    pub fn pps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_flag(false);
        w.write_flag(false);
        w.write_bits(0, 3);
        nalu(34, w)
    }

    pub fn idr() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_flag(true);
        w.write_flag(false);
        w.write_golomb(0);
        w.write_golomb(2);
        nalu(19, w)
    }

    /// TRAIL_R B slice.
    pub fn trail(poc_lsb: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_flag(true);
        w.write_golomb(0);
        w.write_golomb(0);
        w.write_bits(poc_lsb, 8);
        nalu(1, w)
    }
}

pub mod av1 {
    use super::*;

    fn obu(obu_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(((obu_type << 3) | 0x02) as u64, 8);
        w.write_leb128(payload.len() as u64);
        let mut data = w.into_bytes();
        data.extend_from_slice(payload);
        data
    }

    pub fn temporal_delimiter() -> Vec<u8> {
        obu(2, &[])
    }

    /// Main profile, level 8, 320x180 at 30 fps, 7 bit order hints.
    pub fn sequence_header() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(0, 3);
        w.write_flag(false);
        w.write_flag(false);
        w.write_flag(true);
        w.write_bits(1, 32);
        w.write_bits(30, 32);
        w.write_flag(true);
        w.write_flag(true);
        w.write_flag(false);
        w.write_flag(false);
        w.write_bits(0, 5);
        w.write_bits(0, 12);
        w.write_bits(8, 5);
        w.write_flag(false);
        w.write_bits(8, 4);
        w.write_bits(7, 4);
        w.write_bits(319, 9);
        w.write_bits(179, 8);
        w.write_flag(false);
        w.write_bits(0, 7);
        w.write_flag(true); // enable_order_hint
        w.write_bits(0, 2);
        w.write_flag(true);
        w.write_flag(true);
        w.write_bits(6, 3);
        w.write_bits(0, 3);
        w.write_bits(0, 4); // 8 bit, not mono, no colour description, limited range
        w.write_bits(0, 2);
        w.write_flag(false);
        w.write_flag(false);
        w.write_trailing_bits();
        obu(1, &w.into_bytes())
    }

    pub fn key_frame(order_hint: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_flag(false);
        w.write_bits(0, 2);
        w.write_flag(true);
        w.write_flag(false);
        w.write_flag(false);
        w.write_flag(false);
        w.write_bits(order_hint, 7);
        w.write_trailing_bits();
        let mut payload = w.into_bytes();
        payload.extend_from_slice(&[0x5A; 6]);
        obu(6, &payload)
    }

    pub fn inter_frame(order_hint: u64) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_flag(false);
        w.write_bits(1, 2);
        w.write_flag(true);
        w.write_flag(false);
        w.write_flag(false);
        w.write_flag(false);
        w.write_flag(false);
        w.write_bits(order_hint, 7);
        w.write_bits(0, 3);
        w.write_bits(0x01, 8);
        w.write_trailing_bits();
        let mut payload = w.into_bytes();
        payload.extend_from_slice(&[0xA5; 4]);
        obu(6, &payload)
    }
}
