use bytes::Bytes;
use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};

use super::{RawUnit, UnitSource};
use crate::av::ByteRange;
use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{DemuxError, Result};

/// AV1 OBU type values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObuType {
    SequenceHeader,
    TemporalDelimiter,
    FrameHeader,
    TileGroup,
    Metadata,
    Frame,
    RedundantFrameHeader,
    TileList,
    Padding,
    Reserved(u8),
}

impl ObuType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ObuType::SequenceHeader,
            2 => ObuType::TemporalDelimiter,
            3 => ObuType::FrameHeader,
            4 => ObuType::TileGroup,
            5 => ObuType::Metadata,
            6 => ObuType::Frame,
            7 => ObuType::RedundantFrameHeader,
            8 => ObuType::TileList,
            15 => ObuType::Padding,
            other => ObuType::Reserved(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ObuType::SequenceHeader => 1,
            ObuType::TemporalDelimiter => 2,
            ObuType::FrameHeader => 3,
            ObuType::TileGroup => 4,
            ObuType::Metadata => 5,
            ObuType::Frame => 6,
            ObuType::RedundantFrameHeader => 7,
            ObuType::TileList => 8,
            ObuType::Padding => 15,
            ObuType::Reserved(other) => other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObuType::SequenceHeader => "Sequence Header",
            ObuType::TemporalDelimiter => "Temporal Delimiter",
            ObuType::FrameHeader => "Frame Header",
            ObuType::TileGroup => "Tile Group",
            ObuType::Metadata => "Metadata",
            ObuType::Frame => "Frame",
            ObuType::RedundantFrameHeader => "Redundant Frame Header",
            ObuType::TileList => "Tile List",
            ObuType::Padding => "Padding",
            ObuType::Reserved(_) => "Reserved",
        }
    }

    /// True for the OBU types that start with an uncompressed frame header.
    pub fn has_frame_header(&self) -> bool {
        matches!(
            self,
            ObuType::FrameHeader | ObuType::Frame | ObuType::RedundantFrameHeader
        )
    }
}

impl fmt::Display for ObuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded `obu_header()` plus the optional `obu_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObuHeader {
    pub obu_type: ObuType,
    pub has_extension: bool,
    pub has_size_field: bool,
    pub temporal_id: u8,
    pub spatial_id: u8,
    /// Payload size if `has_size_field` is set
    pub obu_size: Option<u64>,
}

impl ObuHeader {
    /// Parses the header at the start of `data`.
    ///
    /// Returns the header and its length in bytes including the size field.
    pub fn parse(data: &[u8]) -> Result<(ObuHeader, usize)> {
        let first = *data.first().ok_or(DemuxError::OutOfData)?;
        if first & 0x80 != 0 {
            return Err(DemuxError::InvalidData("obu_forbidden_bit is set".into()));
        }
        let obu_type = ObuType::from_u8((first >> 3) & 0x0f);
        let has_extension = first & 0x04 != 0;
        let has_size_field = first & 0x02 != 0;

        let mut len = 1;
        let (mut temporal_id, mut spatial_id) = (0, 0);
        if has_extension {
            let ext = *data.get(1).ok_or(DemuxError::OutOfData)?;
            temporal_id = ext >> 5;
            spatial_id = (ext >> 3) & 0x03;
            len += 1;
        }

        let obu_size = if has_size_field {
            let (size, size_len) = read_leb128(&data[len..])?;
            len += size_len;
            Some(size)
        } else {
            None
        };

        Ok((
            ObuHeader {
                obu_type,
                has_extension,
                has_size_field,
                temporal_id,
                spatial_id,
                obu_size,
            },
            len,
        ))
    }
}

/// Reads a leb128 value from the start of `data`, returning the value and
/// the number of bytes used.
pub fn read_leb128(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for i in 0..8 {
        let byte = *data.get(i).ok_or(DemuxError::OutOfData)?;
        value |= ((byte & 0x7f) as u64) << (i * 7);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Ok((value, 8))
}

/// Splits a buffer of size-delimited OBUs, e.g. the payload of a container
/// sample or the config OBUs of an `av1C` record.
///
/// An OBU without a size field extends to the end of the buffer.
pub fn split_obus(data: &[u8]) -> Result<Vec<(ObuHeader, &[u8])>> {
    let mut obus = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let (header, header_len) = ObuHeader::parse(&data[pos..])?;
        let available = (data.len() - pos - header_len) as u64;
        let payload_len = header.obu_size.unwrap_or(available);
        if payload_len > available {
            return Err(DemuxError::TruncatedUnit {
                declared: payload_len,
                available,
            });
        }
        let end = pos + header_len + payload_len as usize;
        obus.push((header, &data[pos..end]));
        pos = end;
    }
    Ok(obus)
}

/// Splits an AV1 low overhead bitstream (`.obu`) into OBUs.
///
/// Each returned unit holds the complete OBU including its header.
pub struct ObuFramer<R: Read + Seek> {
    reader: BufReader<R>,
    position: u64,
    file_size: u64,
    unit_index: u64,
}

impl<R: Read + Seek + Send> ObuFramer<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_buffer_size(reader, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(mut reader: R, buffer_size: usize) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::with_capacity(buffer_size.max(16), reader),
            position: 0,
            file_size,
            unit_index: 0,
        })
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn truncated(&self, declared: u64, have: u64) -> DemuxError {
        DemuxError::TruncatedUnit {
            declared,
            available: have,
        }
    }
}

impl<R: Read + Seek + Send> UnitSource for ObuFramer<R> {
    fn next_unit(&mut self) -> Result<Option<RawUnit>> {
        let start = self.position;
        let Some(first) = self.read_byte()? else {
            return Ok(None);
        };

        let mut data = vec![first];
        if first & 0x04 != 0 {
            let ext = self.read_byte()?.ok_or_else(|| self.truncated(2, 1))?;
            data.push(ext);
        }
        if first & 0x02 != 0 {
            for _ in 0..8 {
                let byte = self
                    .read_byte()?
                    .ok_or_else(|| self.truncated(data.len() as u64 + 1, data.len() as u64))?;
                data.push(byte);
                if byte & 0x80 == 0 {
                    break;
                }
            }
        }

        let (header, header_len) = ObuHeader::parse(&data)?;
        let available = self.file_size.saturating_sub(start + header_len as u64);
        let payload_len = match header.obu_size {
            Some(size) => size,
            None => {
                log::debug!("obu at {} has no size field, extends to end of file", start);
                available
            }
        };
        if payload_len > available {
            return Err(self.truncated(payload_len, available));
        }

        data.resize(header_len + payload_len as usize, 0);
        if let Err(e) = self.reader.read_exact(&mut data[header_len..]) {
            return Err(if e.kind() == ErrorKind::UnexpectedEof {
                self.truncated(payload_len, available)
            } else {
                e.into()
            });
        }

        self.position = start + data.len() as u64;
        let unit = RawUnit {
            index: self.unit_index,
            range: ByteRange::new(start, self.position - 1),
            data: Bytes::from(data),
            last: self.position >= self.file_size,
        };
        self.unit_index += 1;
        Ok(Some(unit))
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos))?;
        self.position = pos;
        if pos >= self.file_size {
            return Ok(());
        }
        let first = self.reader.fill_buf()?.first().copied();
        match first {
            // forbidden bit and reserved bit must be zero
            Some(byte) if byte & 0x81 == 0 => Ok(()),
            _ => Err(DemuxError::SeekMisaligned(pos)),
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }
}
