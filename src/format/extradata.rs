//! Codec configuration records as stored in MP4/MKV containers.
//!
//! The parsers return the contained parameter set NAL units so they can be
//! fed to a stream parser like any other unit.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DemuxError, Result};
use crate::utils::BitReader;

/// NAL units taken from a configuration record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    /// Size in bytes of the NAL length prefix used by the container samples
    pub nal_length_size: u8,
    /// NAL units without start code, in record order
    pub nal_units: Vec<Bytes>,
}

/// Strips a leading start code and trailing zero bytes from a NAL unit.
pub fn strip_nal(data: &[u8]) -> &[u8] {
    let mut start = 0;
    while start < data.len() && data[start] == 0 {
        start += 1;
    }
    if start >= 2 && start < data.len() && data[start] == 1 {
        start += 1;
    } else {
        start = 0;
    }
    let mut end = data.len();
    while end > start && data[end - 1] == 0 {
        end -= 1;
    }
    &data[start..end]
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let available = data.len().saturating_sub(*pos);
    if len > available {
        return Err(DemuxError::TruncatedUnit {
            declared: len as u64,
            available: available as u64,
        });
    }
    let slice = &data[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

fn take_u16(data: &[u8], pos: &mut usize) -> Result<usize> {
    let bytes = take(data, pos, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
}

/// Builds an `AVCDecoderConfigurationRecord` from one SPS and one PPS.
///
/// Both units may carry a start code. Profile, compatibility and level are
/// copied from the SPS.
pub fn write_avcc(sps: &[u8], pps: &[u8]) -> Result<Bytes> {
    let sps = strip_nal(sps);
    let pps = strip_nal(pps);
    if sps.len() < 4 {
        return Err(DemuxError::InvalidData("SPS too short for avcC".into()));
    }
    let mut out = BytesMut::with_capacity(11 + sps.len() + pps.len());
    out.put_u8(1);
    out.put_u8(sps[1]); // profile_idc
    out.put_u8(sps[2]); // constraint flags
    out.put_u8(sps[3]); // level_idc
    out.put_u8(0xFF); // 4 byte NAL length
    out.put_u8(0xE1); // one SPS
    out.put_u16(sps.len() as u16);
    out.extend_from_slice(sps);
    out.put_u8(1);
    out.put_u16(pps.len() as u16);
    out.extend_from_slice(pps);
    Ok(out.freeze())
}

/// Parses an `AVCDecoderConfigurationRecord`.
pub fn parse_avcc(data: &[u8]) -> Result<ConfigRecord> {
    let mut reader = BitReader::new(data);
    let version = reader.read_u8(8)?;
    if version != 1 {
        return Err(DemuxError::Unsupported(format!("avcC version {}", version)));
    }
    reader.skip_bits(24)?; // profile, compatibility, level
    reader.skip_bits(6)?;
    let nal_length_size = reader.read_u8(2)? + 1;
    reader.skip_bits(3)?;
    let num_sps = reader.read_u32(5)?;

    let mut pos = 6;
    let mut nal_units = Vec::new();
    for _ in 0..num_sps {
        let len = take_u16(data, &mut pos)?;
        nal_units.push(Bytes::copy_from_slice(take(data, &mut pos, len)?));
    }
    let num_pps = take(data, &mut pos, 1)?[0];
    for _ in 0..num_pps {
        let len = take_u16(data, &mut pos)?;
        nal_units.push(Bytes::copy_from_slice(take(data, &mut pos, len)?));
    }

    Ok(ConfigRecord {
        nal_length_size,
        nal_units,
    })
}

/// Parses an `HEVCDecoderConfigurationRecord`.
///
/// Version 0 records, as written by some muxers, carry raw Annex B data
/// instead and are split on start codes.
pub fn parse_hvcc(data: &[u8]) -> Result<ConfigRecord> {
    let version = *data.first().ok_or(DemuxError::OutOfData)?;
    if version == 0 {
        return Ok(ConfigRecord {
            nal_length_size: 4,
            nal_units: split_annexb(data),
        });
    }
    if version != 1 {
        return Err(DemuxError::Unsupported(format!("hvcC version {}", version)));
    }

    let mut reader = BitReader::new(data);
    reader.skip_bits(8)?; // configurationVersion
    reader.skip_bits(2 + 1 + 5)?; // profile space, tier, profile idc
    reader.skip_bits(32)?; // compatibility flags
    reader.skip_bits(48)?; // constraint indicator flags
    reader.skip_bits(8)?; // level
    reader.skip_bits(4 + 12)?; // min_spatial_segmentation_idc
    reader.skip_bits(6 + 2)?; // parallelismType
    reader.skip_bits(6 + 2)?; // chroma format
    reader.skip_bits(5 + 3)?; // luma bit depth
    reader.skip_bits(5 + 3)?; // chroma bit depth
    reader.skip_bits(16)?; // avgFrameRate
    reader.skip_bits(2 + 3 + 1)?; // constantFrameRate, numTemporalLayers, temporalIdNested
    let nal_length_size = reader.read_u8(2)? + 1;
    let num_arrays = reader.read_u32(8)?;

    let mut pos = 23;
    let mut nal_units = Vec::new();
    for _ in 0..num_arrays {
        let header = take(data, &mut pos, 1)?[0];
        let nal_type = header & 0x3f;
        let num_nalus = take_u16(data, &mut pos)?;
        log::debug!("hvcC array of {} NAL units of type {}", num_nalus, nal_type);
        for _ in 0..num_nalus {
            let len = take_u16(data, &mut pos)?;
            nal_units.push(Bytes::copy_from_slice(take(data, &mut pos, len)?));
        }
    }

    Ok(ConfigRecord {
        nal_length_size,
        nal_units,
    })
}

/// Splits a buffer of start-code delimited NAL units, dropping the start codes.
pub fn split_annexb(data: &[u8]) -> Vec<Bytes> {
    let mut starts = Vec::new();
    let mut zeros = 0;
    for (i, &byte) in data.iter().enumerate() {
        match byte {
            0 => zeros += 1,
            1 if zeros >= 2 => {
                starts.push((i + 1, zeros.min(3) + 1));
                zeros = 0;
            }
            _ => zeros = 0,
        }
    }

    let mut units = Vec::new();
    for (n, &(payload_start, _)) in starts.iter().enumerate() {
        let end = starts
            .get(n + 1)
            .map(|&(next, start_code_len)| next - start_code_len)
            .unwrap_or(data.len());
        let unit = strip_nal(&data[payload_start..end.max(payload_start)]);
        if !unit.is_empty() {
            units.push(Bytes::copy_from_slice(unit));
        }
    }
    units
}

/// Builds an `AV1CodecConfigurationRecord` followed by the sequence header OBU.
#[allow(clippy::too_many_arguments)]
pub fn write_av1c(
    seq_profile: u8,
    seq_level_idx_0: u8,
    seq_tier_0: bool,
    high_bitdepth: bool,
    twelve_bit: bool,
    monochrome: bool,
    chroma_subsampling: (bool, bool),
    chroma_sample_position: u8,
    sequence_header_obu: &[u8],
) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + sequence_header_obu.len());
    out.put_u8(0x81); // marker, version 1
    out.put_u8((seq_profile << 5) | (seq_level_idx_0 & 0x1f));
    out.put_u8(
        ((seq_tier_0 as u8) << 7)
            | ((high_bitdepth as u8) << 6)
            | ((twelve_bit as u8) << 5)
            | ((monochrome as u8) << 4)
            | ((chroma_subsampling.0 as u8) << 3)
            | ((chroma_subsampling.1 as u8) << 2)
            | (chroma_sample_position & 0x03),
    );
    out.put_u8(0); // no initial presentation delay
    out.extend_from_slice(sequence_header_obu);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SPS: [u8; 8] = [0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9, 0x40, 0x50];
    const PPS: [u8; 4] = [0x68, 0xEB, 0xE3, 0xCB];

    #[test]
    fn test_avcc_write_and_parse() {
        let mut sps_with_start_code = vec![0, 0, 0, 1];
        sps_with_start_code.extend_from_slice(&SPS);
        sps_with_start_code.extend_from_slice(&[0, 0]);

        let avcc = write_avcc(&sps_with_start_code, &PPS).unwrap();
        assert_eq!(&avcc[..8], &[1, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x08]);
        assert_eq!(&avcc[8..16], &SPS);
        assert_eq!(&avcc[16..19], &[0x01, 0x00, 0x04]);

        let record = parse_avcc(&avcc).unwrap();
        assert_eq!(record.nal_length_size, 4);
        assert_eq!(record.nal_units, vec![Bytes::from_static(&SPS), Bytes::from_static(&PPS)]);
    }

    #[test]
    fn test_avcc_truncated() {
        let avcc = write_avcc(&SPS, &PPS).unwrap();
        assert!(matches!(
            parse_avcc(&avcc[..12]),
            Err(DemuxError::TruncatedUnit { .. })
        ));
    }

    #[test]
    fn test_hvcc_parse() {
        let vps = [0x40, 0x01, 0x0C];
        let sps = [0x42, 0x01, 0x01, 0x60];
        let mut hvcc = vec![1u8];
        hvcc.extend_from_slice(&[0; 20]);
        hvcc.push(0x0F); // lengthSizeMinusOne = 3
        hvcc.push(2); // numOfArrays
        hvcc.extend_from_slice(&[0x80 | 32, 0x00, 0x01, 0x00, 0x03]);
        hvcc.extend_from_slice(&vps);
        hvcc.extend_from_slice(&[0x80 | 33, 0x00, 0x01, 0x00, 0x04]);
        hvcc.extend_from_slice(&sps);

        let record = parse_hvcc(&hvcc).unwrap();
        assert_eq!(record.nal_length_size, 4);
        assert_eq!(record.nal_units.len(), 2);
        assert_eq!(&record.nal_units[1][..], &sps);
    }

    #[test]
    fn test_split_annexb() {
        let data = [0, 0, 0, 1, 0x40, 0x01, 0, 0, 1, 0x42, 0x01, 0x00, 0, 0, 0, 1, 0x44, 0x01];
        let units = split_annexb(&data);
        assert_eq!(
            units,
            vec![
                Bytes::from_static(&[0x40, 0x01]),
                Bytes::from_static(&[0x42, 0x01]),
                Bytes::from_static(&[0x44, 0x01]),
            ]
        );
    }
}
