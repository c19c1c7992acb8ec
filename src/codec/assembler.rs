use crate::av::{BitrateEntry, ByteRange, Frame, FrameList, SliceTypeCounts};
use crate::error::Result;
use crate::hrd::{HrdAuInput, HrdAuTiming};

/// Lifecycle of the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    BeforeFirstUnit,
    InsideAccessUnit,
    End,
}

/// A completed access unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessUnitEnd {
    pub bitrate: BitrateEntry,
    /// Present if the stream signals NAL HRD parameters
    pub hrd: Option<HrdAuInput>,
}

/// Groups units into frames and access units.
///
/// Codec parsers decide where access units start and which unit opens a
/// new frame. The assembler keeps the byte counts and slice statistics and
/// feeds finished frames into the [`FrameList`].
#[derive(Debug)]
pub struct AccessUnitAssembler {
    frames: FrameList,
    open: Option<Frame>,
    state: AssemblerState,
    au_bytes: u64,
    au_counter: u64,
    all_intra: bool,
    slice_types: SliceTypeCounts,
    completed: Vec<AccessUnitEnd>,
    frame_limit: Option<usize>,
    last_poc: i64,
}

impl Default for AccessUnitAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self {
            frames: FrameList::new(),
            open: None,
            state: AssemblerState::BeforeFirstUnit,
            au_bytes: 0,
            au_counter: 0,
            all_intra: true,
            slice_types: SliceTypeCounts::default(),
            completed: Vec::new(),
            frame_limit: None,
            last_poc: 0,
        }
    }

    /// Stop accepting frames once `limit` frames were collected.
    pub fn with_frame_limit(mut self, limit: Option<usize>) -> Self {
        self.frame_limit = limit;
        self
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Counts `n` bytes toward the current access unit.
    pub fn add_bytes(&mut self, n: usize) {
        if self.state == AssemblerState::BeforeFirstUnit {
            self.state = AssemblerState::InsideAccessUnit;
        }
        self.au_bytes += n as u64;
    }

    pub fn au_bytes(&self) -> u64 {
        self.au_bytes
    }

    /// Number of access units completed so far
    pub fn au_counter(&self) -> u64 {
        self.au_counter
    }

    /// Records a slice of the current access unit.
    pub fn record_slice(&mut self, slice_type: &'static str, intra: bool) {
        self.slice_types.add(slice_type);
        self.all_intra &= intra;
    }

    /// Closes the current access unit.
    ///
    /// Nothing is emitted for an empty access unit. The presentation time
    /// is the POC of the open frame.
    pub fn end_access_unit(&mut self, hrd_timing: Option<HrdAuTiming>) {
        if self.au_bytes == 0 {
            return;
        }
        let pts = self.open.as_ref().map(|f| f.poc).unwrap_or(self.last_poc);
        let bitrate = BitrateEntry {
            pts,
            dts: self.au_counter as i64,
            duration: 1,
            byte_size: self.au_bytes,
            keyframe: self.all_intra,
            frame_type_summary: self.slice_types.to_string(),
        };
        log::trace!(
            "access unit {} pts {} {} bytes {}",
            self.au_counter,
            pts,
            self.au_bytes,
            bitrate.frame_type_summary
        );
        let hrd = hrd_timing.map(|timing| HrdAuInput {
            bits: self.au_bytes * 8,
            poc: pts,
            timing,
        });
        self.completed.push(AccessUnitEnd { bitrate, hrd });
        self.au_counter += 1;
        self.au_bytes = 0;
        self.all_intra = true;
        self.slice_types.clear();
    }

    /// Opens a new frame, closing the previous one.
    ///
    /// A duplicate of an accepted frame is dropped and reported, the new
    /// frame is opened either way.
    pub fn open_frame(&mut self, frame: Frame) -> Result<()> {
        let previous = self.open.replace(frame);
        match previous {
            Some(previous) => self.close(previous),
            None => Ok(()),
        }
    }

    /// Extends the open frame to cover `range`.
    pub fn extend_frame(&mut self, range: Option<ByteRange>) {
        if let Some(frame) = self.open.as_mut() {
            frame.extend_to(range);
        }
    }

    pub fn open_frame_poc(&self) -> Option<i64> {
        self.open.as_ref().map(|f| f.poc)
    }

    fn close(&mut self, frame: Frame) -> Result<()> {
        self.last_poc = frame.poc;
        if self.limit_reached() {
            return Ok(());
        }
        self.frames.add(frame).map(|_| ())
    }

    /// Ends the last access unit and frame and sorts the frame list.
    pub fn finalize(&mut self, hrd_timing: Option<HrdAuTiming>) -> Result<()> {
        if self.state == AssemblerState::End {
            return Ok(());
        }
        self.end_access_unit(hrd_timing);
        self.state = AssemblerState::End;
        let result = match self.open.take() {
            Some(frame) => self.close(frame),
            None => Ok(()),
        };
        self.frames.sort();
        result
    }

    pub fn frames(&self) -> &FrameList {
        &self.frames
    }

    pub fn drain_completed(&mut self) -> Vec<AccessUnitEnd> {
        std::mem::take(&mut self.completed)
    }

    pub fn limit_reached(&self) -> bool {
        self.frame_limit
            .map(|limit| self.frames.len() >= limit)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DemuxError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_access_unit_entries() {
        let mut assembler = AccessUnitAssembler::new();
        assembler.add_bytes(20);
        assembler
            .open_frame(Frame::new(0).with_random_access(true))
            .unwrap();
        assembler.record_slice("I", true);
        assembler.add_bytes(100);
        assembler.end_access_unit(None);

        assembler.open_frame(Frame::new(2)).unwrap();
        assembler.record_slice("P", false);
        assembler.record_slice("P", false);
        assembler.add_bytes(40);
        assembler.finalize(None).unwrap();

        let units = assembler.drain_completed();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].bitrate.byte_size, 120);
        assert!(units[0].bitrate.keyframe);
        assert_eq!(units[0].bitrate.frame_type_summary, "1 I");
        assert_eq!(units[1].bitrate.pts, 2);
        assert_eq!(units[1].bitrate.dts, 1);
        assert!(!units[1].bitrate.keyframe);
        assert_eq!(units[1].bitrate.frame_type_summary, "2 P");
        assert_eq!(assembler.frames().len(), 2);
        assert_eq!(assembler.state(), AssemblerState::End);
    }

    #[test]
    fn test_empty_access_unit_is_skipped() {
        let mut assembler = AccessUnitAssembler::new();
        assembler.end_access_unit(None);
        assert!(assembler.drain_completed().is_empty());
        assert_eq!(assembler.au_counter(), 0);
    }

    #[test]
    fn test_duplicate_frame_reported() {
        let mut assembler = AccessUnitAssembler::new();
        assembler
            .open_frame(Frame::new(0).with_random_access(true))
            .unwrap();
        assembler.open_frame(Frame::new(0)).unwrap();
        assert!(matches!(
            assembler.open_frame(Frame::new(1)),
            Err(DemuxError::DuplicateFrame { poc: 0, .. })
        ));
        assembler.finalize(None).unwrap();
        assert_eq!(assembler.frames().len(), 2);
    }

    #[test]
    fn test_frame_limit() {
        let mut assembler = AccessUnitAssembler::new().with_frame_limit(Some(1));
        for poc in 0..3 {
            assembler
                .open_frame(Frame::new(poc).with_random_access(true))
                .unwrap();
        }
        assert!(assembler.limit_reached());
        assembler.finalize(None).unwrap();
        assert_eq!(assembler.frames().len(), 1);
    }

    #[test]
    fn test_hrd_input_uses_bits() {
        let mut assembler = AccessUnitAssembler::new();
        assembler.open_frame(Frame::new(4)).unwrap();
        assembler.add_bytes(10);
        let timing = HrdAuTiming {
            clock_tick: 0.04,
            bit_rate: 1000,
            cpb_size: 1000,
            cbr: false,
            low_delay: false,
            initial_cpb_removal_delay: 0,
            initial_cpb_removal_delay_offset: 0,
            cpb_removal_delay: 0,
            first_in_buffering_period: true,
        };
        assembler.end_access_unit(Some(timing));
        let hrd = assembler.drain_completed()[0].hrd.unwrap();
        assert_eq!(hrd.bits, 80);
        assert_eq!(hrd.poc, 4);
    }
}
