use std::fmt;

use crate::error::{DemuxError, Result};

/// `nal_unit_type` values of H.265 Table 7-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    TrailN,
    TrailR,
    TsaN,
    TsaR,
    StsaN,
    StsaR,
    RadlN,
    RadlR,
    RaslN,
    RaslR,
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    IdrWRadl,
    IdrNLp,
    Cra,
    /// Reserved IRAP types 22 and 23
    ReservedIrap(u8),
    ReservedVcl(u8),
    Vps,
    Sps,
    Pps,
    Aud,
    Eos,
    Eob,
    FillerData,
    PrefixSei,
    SuffixSei,
    ReservedNonVcl(u8),
    Unspecified(u8),
}

impl From<u8> for NalUnitType {
    fn from(value: u8) -> Self {
        use NalUnitType::*;
        match value {
            0 => TrailN,
            1 => TrailR,
            2 => TsaN,
            3 => TsaR,
            4 => StsaN,
            5 => StsaR,
            6 => RadlN,
            7 => RadlR,
            8 => RaslN,
            9 => RaslR,
            16 => BlaWLp,
            17 => BlaWRadl,
            18 => BlaNLp,
            19 => IdrWRadl,
            20 => IdrNLp,
            21 => Cra,
            22 | 23 => ReservedIrap(value),
            10..=15 | 24..=31 => ReservedVcl(value),
            32 => Vps,
            33 => Sps,
            34 => Pps,
            35 => Aud,
            36 => Eos,
            37 => Eob,
            38 => FillerData,
            39 => PrefixSei,
            40 => SuffixSei,
            41..=47 => ReservedNonVcl(value),
            other => Unspecified(other),
        }
    }
}

impl NalUnitType {
    pub fn name(&self) -> &'static str {
        use NalUnitType::*;
        match self {
            TrailN | TrailR => "TRAIL",
            TsaN | TsaR => "TSA",
            StsaN | StsaR => "STSA",
            RadlN | RadlR => "RADL",
            RaslN | RaslR => "RASL",
            BlaWLp | BlaWRadl | BlaNLp => "BLA",
            IdrWRadl | IdrNLp => "IDR",
            Cra => "CRA",
            ReservedIrap(_) => "Reserved IRAP",
            ReservedVcl(_) => "Reserved VCL",
            Vps => "VPS",
            Sps => "SPS",
            Pps => "PPS",
            Aud => "AUD",
            Eos => "EOS",
            Eob => "EOB",
            FillerData => "Filler",
            PrefixSei => "Prefix SEI",
            SuffixSei => "Suffix SEI",
            ReservedNonVcl(_) => "Reserved",
            Unspecified(62) | Unspecified(63) => "Dolby Vision",
            Unspecified(_) => "Unspecified",
        }
    }

    pub fn id(&self) -> u8 {
        use NalUnitType::*;
        match *self {
            TrailN => 0,
            TrailR => 1,
            TsaN => 2,
            TsaR => 3,
            StsaN => 4,
            StsaR => 5,
            RadlN => 6,
            RadlR => 7,
            RaslN => 8,
            RaslR => 9,
            BlaWLp => 16,
            BlaWRadl => 17,
            BlaNLp => 18,
            IdrWRadl => 19,
            IdrNLp => 20,
            Cra => 21,
            Vps => 32,
            Sps => 33,
            Pps => 34,
            Aud => 35,
            Eos => 36,
            Eob => 37,
            FillerData => 38,
            PrefixSei => 39,
            SuffixSei => 40,
            ReservedIrap(v) | ReservedVcl(v) | ReservedNonVcl(v) | Unspecified(v) => v,
        }
    }

    pub fn is_vcl(&self) -> bool {
        self.id() < 32
    }

    /// Coded slice segment of a defined VCL type
    pub fn is_slice(&self) -> bool {
        matches!(self.id(), 0..=9 | 16..=21)
    }

    pub fn is_irap(&self) -> bool {
        (16..=23).contains(&self.id())
    }

    pub fn is_idr(&self) -> bool {
        matches!(self, NalUnitType::IdrWRadl | NalUnitType::IdrNLp)
    }

    pub fn is_bla(&self) -> bool {
        matches!(
            self,
            NalUnitType::BlaWLp | NalUnitType::BlaWRadl | NalUnitType::BlaNLp
        )
    }

    pub fn is_rasl(&self) -> bool {
        matches!(self, NalUnitType::RaslN | NalUnitType::RaslR)
    }

    pub fn is_radl(&self) -> bool {
        matches!(self, NalUnitType::RadlN | NalUnitType::RadlR)
    }

    /// Sub-layer non-reference picture (even types below 16)
    pub fn is_sub_layer_non_reference(&self) -> bool {
        let id = self.id();
        id < 16 && id % 2 == 0
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NalUnitType::Vps | NalUnitType::Sps | NalUnitType::Pps)
    }

    /// Types that start a new access unit when they follow a VCL unit
    /// (7.4.2.4.4).
    pub fn starts_access_unit(&self) -> bool {
        matches!(self.id(), 32..=35 | 39 | 41..=44 | 48..=55)
    }
}

/// The two byte H.265 NAL unit header.
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
            nal_unit_type: NalUnitType::from((data[0] >> 1) & 0x3F),
            nuh_layer_id: ((data[0] & 0x01) << 5) | (data[1] >> 3),
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

/// `slice_type` of H.265 Table 7-7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    B,
    P,
    I,
}

impl SliceType {
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(SliceType::B),
            1 => Ok(SliceType::P),
            2 => Ok(SliceType::I),
            other => Err(DemuxError::InvalidData(format!("slice_type {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SliceType::B => "B",
            SliceType::P => "P",
            SliceType::I => "I",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_nal_header() {
        // VPS, layer 0, tid 0
        let header = NalHeader::parse(&[0x40, 0x01]).unwrap();
        assert_eq!(header.nal_unit_type, NalUnitType::Vps);
        assert_eq!(header.nuh_layer_id, 0);
        assert_eq!(header.temporal_id(), 0);

        // CRA on layer 1, tid 2
        let header = NalHeader::parse(&[0x2A, 0x0B]).unwrap();
        assert_eq!(header.nal_unit_type, NalUnitType::Cra);
        assert_eq!(header.nuh_layer_id, 1);
        assert_eq!(header.temporal_id(), 2);
        assert!(header.nal_unit_type.is_irap());

        assert!(NalHeader::parse(&[0x40, 0x00]).is_err());
    }

    #[test]
    fn test_type_classes() {
        assert!(NalUnitType::from(9).is_rasl());
        assert!(NalUnitType::from(0).is_sub_layer_non_reference());
        assert!(!NalUnitType::from(1).is_sub_layer_non_reference());
        assert!(NalUnitType::from(39).starts_access_unit());
        assert!(!NalUnitType::from(40).starts_access_unit());
        assert!(NalUnitType::from(22).is_irap());
        assert!(!NalUnitType::from(22).is_slice());
        for id in 0..64u8 {
            assert_eq!(NalUnitType::from(id).id(), id);
        }
    }
}
