use std::fmt;

use crate::error::{DemuxError, Result};

/// `nal_unit_type` values of H.266 Table 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    Trail,
    Stsa,
    Radl,
    Rasl,
    ReservedVcl(u8),
    IdrWRadl,
    IdrNLp,
    Cra,
    Gdr,
    ReservedIrap,
    Opi,
    Dci,
    Vps,
    Sps,
    Pps,
    PrefixAps,
    SuffixAps,
    PictureHeader,
    Aud,
    Eos,
    Eob,
    PrefixSei,
    SuffixSei,
    FillerData,
    ReservedNonVcl(u8),
    Unspecified(u8),
}

impl From<u8> for NalUnitType {
    fn from(value: u8) -> Self {
        use NalUnitType::*;
        match value {
            0 => Trail,
            1 => Stsa,
            2 => Radl,
            3 => Rasl,
            4..=6 => ReservedVcl(value),
            7 => IdrWRadl,
            8 => IdrNLp,
            9 => Cra,
            10 => Gdr,
            11 => ReservedIrap,
            12 => Opi,
            13 => Dci,
            14 => Vps,
            15 => Sps,
            16 => Pps,
            17 => PrefixAps,
            18 => SuffixAps,
            19 => PictureHeader,
            20 => Aud,
            21 => Eos,
            22 => Eob,
            23 => PrefixSei,
            24 => SuffixSei,
            25 => FillerData,
            26 | 27 => ReservedNonVcl(value),
            other => Unspecified(other),
        }
    }
}

impl NalUnitType {
    pub fn id(&self) -> u8 {
        use NalUnitType::*;
        match *self {
            Trail => 0,
            Stsa => 1,
            Radl => 2,
            Rasl => 3,
            IdrWRadl => 7,
            IdrNLp => 8,
            Cra => 9,
            Gdr => 10,
            ReservedIrap => 11,
            Opi => 12,
            Dci => 13,
            Vps => 14,
            Sps => 15,
            Pps => 16,
            PrefixAps => 17,
            SuffixAps => 18,
            PictureHeader => 19,
            Aud => 20,
            Eos => 21,
            Eob => 22,
            PrefixSei => 23,
            SuffixSei => 24,
            FillerData => 25,
            ReservedVcl(v) | ReservedNonVcl(v) | Unspecified(v) => v,
        }
    }

    pub fn name(&self) -> &'static str {
        use NalUnitType::*;
        match self {
            Trail => "TRAIL",
            Stsa => "STSA",
            Radl => "RADL",
            Rasl => "RASL",
            ReservedVcl(_) => "Reserved VCL",
            IdrWRadl | IdrNLp => "IDR",
            Cra => "CRA",
            Gdr => "GDR",
            ReservedIrap => "Reserved IRAP",
            Opi => "OPI",
            Dci => "DCI",
            Vps => "VPS",
            Sps => "SPS",
            Pps => "PPS",
            PrefixAps => "Prefix APS",
            SuffixAps => "Suffix APS",
            PictureHeader => "PH",
            Aud => "AUD",
            Eos => "EOS",
            Eob => "EOB",
            PrefixSei => "Prefix SEI",
            SuffixSei => "Suffix SEI",
            FillerData => "Filler",
            ReservedNonVcl(_) => "Reserved",
            Unspecified(_) => "Unspecified",
        }
    }

    pub fn is_vcl(&self) -> bool {
        self.id() <= 11
    }

    /// Coded slice of a defined VCL type
    pub fn is_slice(&self) -> bool {
        matches!(self.id(), 0..=3 | 7..=10)
    }

    pub fn is_irap(&self) -> bool {
        matches!(
            self,
            NalUnitType::IdrWRadl | NalUnitType::IdrNLp | NalUnitType::Cra
        )
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NalUnitType::Vps | NalUnitType::Sps | NalUnitType::Pps)
    }

    /// Types that start a new access unit when they follow a VCL unit.
    pub fn starts_access_unit(&self) -> bool {
        matches!(self.id(), 12..=17 | 19 | 20 | 23 | 26 | 28 | 29)
    }
}

/// The two byte H.266 NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_unit_type: NalUnitType,
    pub nuh_layer_id: u8,
    pub nuh_temporal_id_plus1: u8,
}

impl NalHeader {
    /// Parses the header at the start of `data` (no start code).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(DemuxError::OutOfData);
        }
        if data[0] & 0x80 != 0 {
            return Err(DemuxError::InvalidData("forbidden_zero_bit is set".into()));
        }
        let nuh_temporal_id_plus1 = data[1] & 0x07;
        if nuh_temporal_id_plus1 == 0 {
            return Err(DemuxError::InvalidData("nuh_temporal_id_plus1 is 0".into()));
        }
        Ok(Self {
            nal_unit_type: NalUnitType::from(data[1] >> 3),
            nuh_layer_id: data[0] & 0x3F,
            nuh_temporal_id_plus1,
        })
    }

    pub fn temporal_id(&self) -> u8 {
        self.nuh_temporal_id_plus1 - 1
    }
}

impl fmt::Display for NalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) layer {} tid {}",
            self.nal_unit_type.name(),
            self.nal_unit_type.id(),
            self.nuh_layer_id,
            self.temporal_id()
        )
    }
}
