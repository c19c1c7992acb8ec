use std::fmt;

use crate::error::{DemuxError, Result};

/// `nal_unit_type` values of H.264 Table 7-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    Unspecified,
    CodedSliceNonIdr,
    CodedSliceDataPartitionA,
    CodedSliceDataPartitionB,
    CodedSliceDataPartitionC,
    CodedSliceIdr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    FillerData,
    SpsExtension,
    PrefixNal,
    SubsetSps,
    DepthParameterSet,
    CodedSliceAuxiliary,
    CodedSliceExtension,
    CodedSliceExtensionDepth,
    Reserved(u8),
}

impl From<u8> for NalUnitType {
    fn from(value: u8) -> Self {
        match value {
            0 => NalUnitType::Unspecified,
            1 => NalUnitType::CodedSliceNonIdr,
            2 => NalUnitType::CodedSliceDataPartitionA,
            3 => NalUnitType::CodedSliceDataPartitionB,
            4 => NalUnitType::CodedSliceDataPartitionC,
            5 => NalUnitType::CodedSliceIdr,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::FillerData,
            13 => NalUnitType::SpsExtension,
            14 => NalUnitType::PrefixNal,
            15 => NalUnitType::SubsetSps,
            16 => NalUnitType::DepthParameterSet,
            19 => NalUnitType::CodedSliceAuxiliary,
            20 => NalUnitType::CodedSliceExtension,
            21 => NalUnitType::CodedSliceExtensionDepth,
            other => NalUnitType::Reserved(other),
        }
    }
}

impl NalUnitType {
    pub fn name(&self) -> &'static str {
        match self {
            NalUnitType::Unspecified => "Unspecified",
            NalUnitType::CodedSliceNonIdr => "Slice",
            NalUnitType::CodedSliceDataPartitionA => "Slice-PartA",
            NalUnitType::CodedSliceDataPartitionB => "Slice-PartB",
            NalUnitType::CodedSliceDataPartitionC => "Slice-PartC",
            NalUnitType::CodedSliceIdr => "IDR",
            NalUnitType::Sei => "SEI",
            NalUnitType::Sps => "SPS",
            NalUnitType::Pps => "PPS",
            NalUnitType::AccessUnitDelimiter => "AUD",
            NalUnitType::EndOfSequence => "EOS",
            NalUnitType::EndOfStream => "EOB",
            NalUnitType::FillerData => "Filler",
            NalUnitType::SpsExtension => "SPS-Ext",
            NalUnitType::PrefixNal => "Prefix",
            NalUnitType::SubsetSps => "Subset-SPS",
            NalUnitType::DepthParameterSet => "DPS",
            NalUnitType::CodedSliceAuxiliary => "Slice-Aux",
            NalUnitType::CodedSliceExtension => "Slice-Ext",
            NalUnitType::CodedSliceExtensionDepth => "Slice-Ext-Depth",
            NalUnitType::Reserved(_) => "Reserved",
        }
    }

    /// Slices that carry a slice header this parser decodes.
    pub fn has_slice_header(&self) -> bool {
        matches!(
            self,
            NalUnitType::CodedSliceNonIdr
                | NalUnitType::CodedSliceIdr
                | NalUnitType::CodedSliceDataPartitionA
        )
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NalUnitType::Sps | NalUnitType::Pps)
    }
}

/// The one byte H.264 NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_ref_idc: u8,
    pub nal_unit_type: NalUnitType,
    /// The raw 5 bit type value
    pub nal_unit_type_id: u8,
}

impl NalHeader {
    /// Parses the header byte at the start of `data` (no start code).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = *data.first().ok_or(DemuxError::OutOfData)?;
        if header & 0x80 != 0 {
            return Err(DemuxError::InvalidData("forbidden_zero_bit is set".into()));
        }
        let nal_unit_type_id = header & 0x1F;
        Ok(Self {
            nal_ref_idc: (header >> 5) & 0x03,
            nal_unit_type: NalUnitType::from(nal_unit_type_id),
            nal_unit_type_id,
        })
    }
}

impl fmt::Display for NalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.nal_unit_type.name(), self.nal_unit_type_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    /// Maps `slice_type` (0..=9) to the slice type.
    pub fn from_id(id: u32) -> Result<Self> {
        match id % 5 {
            0 if id < 10 => Ok(SliceType::P),
            1 if id < 10 => Ok(SliceType::B),
            2 if id < 10 => Ok(SliceType::I),
            3 if id < 10 => Ok(SliceType::Sp),
            4 if id < 10 => Ok(SliceType::Si),
            _ => Err(DemuxError::InvalidData(format!("slice_type {}", id))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SliceType::P => "P",
            SliceType::B => "B",
            SliceType::I => "I",
            SliceType::Sp => "SP",
            SliceType::Si => "SI",
        }
    }

    pub fn is_intra(&self) -> bool {
        matches!(self, SliceType::I | SliceType::Si)
    }
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
