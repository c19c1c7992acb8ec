use std::fmt;

use crate::error::{DemuxError, Result};

/// Inclusive byte range `[start, end]` of a unit or frame in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(end >= start);
        Self { start, end }
    }

    /// Number of bytes covered by the range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.start && pos <= self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// A picture (access unit) found in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub poc: i64,
    pub layer_id: u32,
    pub range: Option<ByteRange>,
    pub random_access_point: bool,
}

impl Frame {
    pub fn new(poc: i64) -> Self {
        Self {
            poc,
            layer_id: 0,
            range: None,
            random_access_point: false,
        }
    }

    pub fn with_layer(mut self, layer_id: u32) -> Self {
        self.layer_id = layer_id;
        self
    }

    pub fn with_range(mut self, range: Option<ByteRange>) -> Self {
        self.range = range;
        self
    }

    pub fn with_random_access(mut self, random_access_point: bool) -> Self {
        self.random_access_point = random_access_point;
        self
    }

    /// Moves the end of the frame to the end of `range`.
    pub fn extend_to(&mut self, range: Option<ByteRange>) {
        match (&mut self.range, range) {
            (Some(own), Some(other)) if other.end > own.end => own.end = other.end,
            (None, Some(other)) => self.range = Some(other),
            _ => {}
        }
    }
}

/// Where to start decoding to reach a target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    /// Index of the random access frame in display order
    pub frame_index: usize,
    /// Frames to decode in coding order from the seek point up to the target
    pub distance_in_coding_order: usize,
}

/// All frames of a stream in coding order plus a display order index.
///
/// Frames are accepted once the first random access point was seen and
/// only if their POC does not precede it.
#[derive(Debug, Default, Clone)]
pub struct FrameList {
    coding_order: Vec<Frame>,
    display_order: Vec<usize>,
    sorted: bool,
    first_rap_poc: Option<i64>,
}

impl FrameList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a finished frame.
    ///
    /// Returns `Ok(false)` if the frame was discarded because it precedes
    /// the first random access point and `DuplicateFrame` if a frame with
    /// the same POC and layer was already accepted.
    pub fn add(&mut self, frame: Frame) -> Result<bool> {
        if self
            .coding_order
            .iter()
            .any(|f| f.poc == frame.poc && f.layer_id == frame.layer_id)
        {
            return Err(DemuxError::DuplicateFrame {
                poc: frame.poc,
                layer_id: frame.layer_id,
            });
        }

        if self.first_rap_poc.is_none() && frame.random_access_point {
            self.first_rap_poc = Some(frame.poc);
        }

        match self.first_rap_poc {
            Some(first) if frame.poc >= first => {
                log::debug!(
                    "frame poc {} layer {} range {:?}{}",
                    frame.poc,
                    frame.layer_id,
                    frame.range,
                    if frame.random_access_point { " rap" } else { "" }
                );
                self.display_order.push(self.coding_order.len());
                self.coding_order.push(frame);
                self.sorted = false;
                Ok(true)
            }
            _ => {
                log::debug!("discarding frame poc {} before first random access point", frame.poc);
                Ok(false)
            }
        }
    }

    /// Sorts the display order by POC, then layer.
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        let frames = &self.coding_order;
        self.display_order
            .sort_by_key(|&i| (frames[i].poc, frames[i].layer_id));
        self.sorted = true;
    }

    pub fn len(&self) -> usize {
        self.coding_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coding_order.is_empty()
    }

    pub fn first_random_access_poc(&self) -> Option<i64> {
        self.first_rap_poc
    }

    /// Frames in coding order
    pub fn coding_order(&self) -> &[Frame] {
        &self.coding_order
    }

    /// Frame at `index` in display order. Call [`sort`](Self::sort) first.
    pub fn display(&self, index: usize) -> Option<&Frame> {
        self.display_order
            .get(index)
            .and_then(|&i| self.coding_order.get(i))
    }

    /// Iterates the frames in display order.
    pub fn display_order(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.display_order.iter().map(move |&i| &self.coding_order[i])
    }

    fn display_index_of_coding(&self, coding_index: usize) -> Option<usize> {
        self.display_order.iter().position(|&i| i == coding_index)
    }

    /// Finds the random access point to start decoding from to show the
    /// frame at display index `target`.
    ///
    /// Returns `None` if there is no usable random access point or if the
    /// frame at display index `current` already lies between the seek point
    /// and the target, in which case decoding can simply continue.
    pub fn closest_seek_point(&self, target: usize, current: Option<usize>) -> Option<SeekPoint> {
        let target_frame = self.display(target)?;
        let target_coding = self.display_order[target];

        let (rap_coding, rap) = self
            .coding_order
            .iter()
            .enumerate()
            .take(target_coding + 1)
            .filter(|(_, f)| f.random_access_point && f.poc <= target_frame.poc)
            .last()?;

        if let Some(current_frame) = current.and_then(|c| self.display(c)) {
            if current_frame.poc >= rap.poc && current_frame.poc < target_frame.poc {
                return None;
            }
        }

        Some(SeekPoint {
            frame_index: self.display_index_of_coding(rap_coding)?,
            distance_in_coding_order: target_coding - rap_coding,
        })
    }
}
