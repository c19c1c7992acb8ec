use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use super::{RawUnit, UnitSource};
use crate::av::ByteRange;
use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{DemuxError, Result};

/// Splits an Annex B byte stream into NAL units.
///
/// The stream is read through a fixed read-ahead buffer. Every returned unit
/// includes its own start code (`00 00 01` or `00 00 00 01`). Zero bytes
/// between the end of a unit's payload and the next start code stay with
/// the unit.
///
/// A start code that straddles two buffer refills is found through a zero
/// counter carried across the refill. The start code bytes already copied
/// into the current unit are split off again and become the prefix of the
/// next unit.
pub struct AnnexBFramer<R: Read + Seek> {
    reader: R,
    buffer: Vec<u8>,
    /// Valid bytes in `buffer`
    filled: usize,
    /// Read position in `buffer`
    pos: usize,
    /// File offset of `buffer[0]`
    buffer_start: u64,
    file_size: u64,
    /// File offset of the start code of the next unit
    next_start: Option<u64>,
    /// Start code bytes of the next unit
    pending: Vec<u8>,
    unit_index: u64,
    bytes_before_first_unit: u64,
    started: bool,
}

impl<R: Read + Seek + Send> AnnexBFramer<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_buffer_size(reader, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(mut reader: R, buffer_size: usize) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            buffer: vec![0; buffer_size.max(4)],
            filled: 0,
            pos: 0,
            buffer_start: 0,
            file_size,
            next_start: None,
            pending: Vec::with_capacity(4),
            unit_index: 0,
            bytes_before_first_unit: 0,
            started: false,
        })
    }

    /// Reads more bytes behind the valid part of the buffer.
    fn fill_more(&mut self) -> Result<usize> {
        loop {
            match self.reader.read(&mut self.buffer[self.filled..]) {
                Ok(n) => {
                    self.filled += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drops the consumed buffer and reads the next chunk.
    /// Returns false at the end of the file.
    fn refill(&mut self) -> Result<bool> {
        self.buffer_start += self.filled as u64;
        self.filled = 0;
        self.pos = 0;
        Ok(self.fill_more()? > 0)
    }

    fn file_pos(&self) -> u64 {
        self.buffer_start + self.pos as u64
    }

    /// Skips everything before the first start code.
    fn find_first_start_code(&mut self) -> Result<()> {
        self.started = true;
        let mut zeros = 0usize;
        loop {
            if self.pos == self.filled && !self.refill()? {
                log::warn!("no start code found in {} bytes", self.file_size);
                return Ok(());
            }
            let byte = self.buffer[self.pos];
            self.pos += 1;
            match byte {
                0 => zeros += 1,
                1 if zeros >= 2 => {
                    let start_code_len = zeros.min(3) + 1;
                    let start = self.file_pos() - start_code_len as u64;
                    self.pending.clear();
                    self.pending.resize(start_code_len - 1, 0);
                    self.pending.push(1);
                    self.next_start = Some(start);
                    self.bytes_before_first_unit = start;
                    if start > 0 {
                        log::debug!("skipped {} bytes before the first start code", start);
                    }
                    return Ok(());
                }
                _ => zeros = 0,
            }
        }
    }

    /// Reads the bytes of all units overlapping `range`, normalizing every
    /// start code to four bytes.
    ///
    /// This moves the read position of the framer.
    pub fn read_frame_data(&mut self, range: ByteRange) -> Result<Bytes> {
        self.seek(range.start)?;
        let mut data = BytesMut::with_capacity(range.len() as usize + 16);
        while let Some(unit) = self.next_unit()? {
            if unit.range.start > range.end {
                break;
            }
            if unit.data.starts_with(&[0, 0, 1]) {
                data.put_u8(0);
            }
            data.extend_from_slice(&unit.data);
            if unit.last {
                break;
            }
        }
        Ok(data.freeze())
    }

    fn emit(&mut self, start: u64, data: Vec<u8>, last: bool) -> RawUnit {
        let end = start + (data.len() as u64).max(1) - 1;
        let unit = RawUnit {
            index: self.unit_index,
            range: ByteRange::new(start, end),
            data: Bytes::from(data),
            last,
        };
        self.unit_index += 1;
        unit
    }
}

impl<R: Read + Seek + Send> UnitSource for AnnexBFramer<R> {
    fn next_unit(&mut self) -> Result<Option<RawUnit>> {
        if !self.started {
            self.find_first_start_code()?;
        }
        let Some(start) = self.next_start.take() else {
            return Ok(None);
        };

        let mut data = std::mem::take(&mut self.pending);
        let mut zeros = 0usize;
        loop {
            if self.pos == self.filled && !self.refill()? {
                return Ok(Some(self.emit(start, data, true)));
            }

            let chunk_start = self.pos;
            let mut found = None;
            while self.pos < self.filled {
                let byte = self.buffer[self.pos];
                self.pos += 1;
                match byte {
                    0 => zeros += 1,
                    1 if zeros >= 2 => {
                        found = Some(zeros.min(3) + 1);
                        break;
                    }
                    _ => zeros = 0,
                }
            }
            data.extend_from_slice(&self.buffer[chunk_start..self.pos]);

            if let Some(start_code_len) = found {
                let split = data.len() - start_code_len;
                self.pending = data.split_off(split);
                self.next_start = Some(start + split as u64);
                return Ok(Some(self.emit(start, data, false)));
            }
        }
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos))?;
        self.buffer_start = pos;
        self.filled = 0;
        self.pos = 0;
        self.pending.clear();
        self.next_start = None;

        if pos == 0 {
            self.started = false;
            return Ok(());
        }

        self.started = true;
        while self.filled < 4 {
            if self.fill_more()? == 0 {
                break;
            }
        }
        let head = &self.buffer[..self.filled];
        let start_code_len = if head.starts_with(&[0, 0, 1]) {
            3
        } else if head.starts_with(&[0, 0, 0, 1]) {
            4
        } else {
            return Err(DemuxError::SeekMisaligned(pos));
        };
        self.pending.extend_from_slice(&head[..start_code_len]);
        self.pos = start_code_len;
        self.next_start = Some(pos);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.next_start.unwrap_or(self.file_size)
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn bytes_before_first_unit(&self) -> u64 {
        self.bytes_before_first_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;
    use std::io::Cursor;

    /// Returns the data in two reads split at a fixed offset.
    struct TwoChunks {
        inner: Cursor<Vec<u8>>,
        split: u64,
    }

    impl Read for TwoChunks {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let pos = self.inner.position();
            if pos < self.split {
                let limit = ((self.split - pos) as usize).min(buf.len());
                self.inner.read(&mut buf[..limit])
            } else {
                self.inner.read(buf)
            }
        }
    }

    impl Seek for TwoChunks {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn collect<R: Read + Seek + Send>(framer: &mut AnnexBFramer<R>) -> Vec<RawUnit> {
        let mut units = Vec::new();
        while let Some(unit) = framer.next_unit().unwrap() {
            units.push(unit);
        }
        units
    }

    fn sample_stream() -> Vec<u8> {
        vec![
            0xAA, 0xBB, // garbage
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, // 4 byte start code
            0x00, 0x00, 0x01, 0x68, 0xCE, // 3 byte start code
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x00, 0x00, 0x03, 0x01, 0x00,
        ]
    }

    #[test]
    fn test_units_and_ranges() {
        let data = sample_stream();
        let mut framer = AnnexBFramer::with_buffer_size(Cursor::new(data.clone()), 8).unwrap();
        let units = collect(&mut framer);

        assert_eq!(framer.bytes_before_first_unit(), 2);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].range, ByteRange::new(2, 7));
        assert_eq!(&units[0].data[..], &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42]);
        // The zero byte after 0x42 is the leading zero of a 4 byte start code
        assert_eq!(units[1].range, ByteRange::new(8, 13));
        assert_eq!(&units[1].data[..], &[0x00, 0x00, 0x00, 0x01, 0x68, 0xCE]);
        assert_eq!(units[2].range, ByteRange::new(14, data.len() as u64 - 1));
        assert!(units[2].last);
        assert!(!units[1].last);
        for unit in &units {
            assert_eq!(unit.range.len() as usize, unit.data.len());
        }
    }

    #[quickcheck]
    fn prop_two_chunk_split_invariance(split: u16, payload: Vec<u8>) -> bool {
        let mut data = sample_stream();
        data.extend_from_slice(&[0, 0, 1]);
        data.extend_from_slice(&payload);
        let split = split as u64 % (data.len() as u64 + 1);

        let mut reference = AnnexBFramer::new(Cursor::new(data.clone())).unwrap();
        let expected: Vec<_> = collect(&mut reference)
            .into_iter()
            .map(|u| (u.range, u.data))
            .collect();

        let reader = TwoChunks {
            inner: Cursor::new(data),
            split,
        };
        let mut framer = AnnexBFramer::new(reader).unwrap();
        let actual: Vec<_> = collect(&mut framer)
            .into_iter()
            .map(|u| (u.range, u.data))
            .collect();
        actual == expected
    }

    #[test]
    fn test_small_buffer_matches_large_buffer() {
        let data = sample_stream();
        let mut big = AnnexBFramer::new(Cursor::new(data.clone())).unwrap();
        for size in 4..12 {
            let mut small = AnnexBFramer::with_buffer_size(Cursor::new(data.clone()), size).unwrap();
            let a: Vec<_> = collect(&mut small).into_iter().map(|u| u.range).collect();
            big.seek(0).unwrap();
            let b: Vec<_> = collect(&mut big).into_iter().map(|u| u.range).collect();
            assert_eq!(a, b, "buffer size {}", size);
        }
    }

    #[test]
    fn test_seek() {
        let data = sample_stream();
        let mut framer = AnnexBFramer::new(Cursor::new(data)).unwrap();
        framer.seek(9).unwrap();
        let unit = framer.next_unit().unwrap().unwrap();
        assert_eq!(unit.range, ByteRange::new(9, 13));

        assert!(matches!(framer.seek(10), Err(DemuxError::SeekMisaligned(10))));

        framer.seek(0).unwrap();
        let unit = framer.next_unit().unwrap().unwrap();
        assert_eq!(unit.range.start, 2);
    }

    #[test]
    fn test_read_frame_data() {
        let data = sample_stream();
        let mut framer = AnnexBFramer::new(Cursor::new(data)).unwrap();
        let frame = framer.read_frame_data(ByteRange::new(2, 13)).unwrap();
        assert_eq!(
            &frame[..],
            &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x00, 0x00, 0x01, 0x68, 0xCE]
        );
    }

    #[test]
    fn test_no_start_code() {
        let mut framer = AnnexBFramer::new(Cursor::new(vec![1u8, 2, 3, 0, 0])).unwrap();
        assert!(framer.next_unit().unwrap().is_none());
    }
}
