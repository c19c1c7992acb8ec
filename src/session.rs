//! Parsing sessions over one elementary stream file.
//!
//! A [`Session`] owns the unit framer for the file, the codec parser, the
//! HRD simulator and the optional trace tree. Units can be pulled one at a
//! time with [`Session::parse_next`] or the whole file parsed with
//! [`Session::run`].
//!
//! ```rust,no_run
//! use esdemux::codec::Codec;
//! use esdemux::session::Session;
//!
//! fn main() -> esdemux::Result<()> {
//!     let mut session = Session::open("stream.264", Codec::Avc)?;
//!     let summary = session.run()?;
//!     println!("{} frames, {} access units", summary.frames.len(), summary.bitrate.len());
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::av::{BitrateEntry, ByteRange, Frame, HrdEntry, SeekPoint};
use crate::codec::{
    parser_for, Codec, ParseResult, SeekInfo, StreamInfo, StreamParser, Unit, UnitInput,
};
use crate::config::{self, Config};
use crate::error::{DemuxError, Result};
use crate::format::extradata::{parse_avcc, parse_hvcc, split_annexb};
use crate::format::obu::split_obus;
use crate::format::{AnnexBFramer, ObuFramer, RawUnit, UnitSource};
use crate::hrd::{ConformanceWarning, HrdSimulator};
use crate::trace::{TraceScope, TraceTree};

/// Options for a new [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub buffer_size: usize,
    pub trace: bool,
    pub frame_limit: Option<usize>,
    pub hrd: bool,
}

impl SessionOptions {
    /// Options from the process wide configuration.
    pub fn from_config() -> Self {
        config::current().into()
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_frame_limit(mut self, frame_limit: Option<usize>) -> Self {
        self.frame_limit = frame_limit;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Config::default().into()
    }
}

impl From<Config> for SessionOptions {
    fn from(config: Config) -> Self {
        Self {
            buffer_size: config.buffer_size,
            trace: config.trace,
            frame_limit: config.frame_limit,
            hrd: config.hrd,
        }
    }
}

/// Cooperative cancellation flag, checked once per unit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub units: u64,
    pub frames: usize,
    /// File offset reached by the framer
    pub bytes: u64,
    pub file_size: u64,
}

impl ProgressSnapshot {
    /// Progress in percent of the file size
    pub fn percent(&self) -> f64 {
        if self.file_size == 0 {
            return 100.0;
        }
        self.bytes as f64 * 100.0 / self.file_size as f64
    }
}

/// Shared progress of a running parse.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<Mutex<ProgressSnapshot>>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.0.lock()
    }

    fn store(&self, snapshot: ProgressSnapshot) {
        *self.0.lock() = snapshot;
    }
}

/// Everything a completed [`Session::run`] produced.
#[derive(Debug, Clone)]
pub struct ParseSummary {
    /// Frames in display order
    pub frames: Vec<Frame>,
    /// One entry per access unit in decoding order
    pub bitrate: Vec<BitrateEntry>,
    pub hrd: Vec<HrdEntry>,
    pub warnings: Vec<ConformanceWarning>,
    pub stream_info: StreamInfo,
    pub unit_count: u64,
    /// Units whose parsing failed
    pub failed_units: u64,
    pub cancelled: bool,
    pub limit_reached: bool,
}

/// Parsing state for one elementary stream file.
pub struct Session {
    path: PathBuf,
    codec: Codec,
    options: SessionOptions,
    source: Box<dyn UnitSource>,
    parser: Box<dyn StreamParser>,
    hrd: Option<HrdSimulator>,
    bitrate: Vec<BitrateEntry>,
    trace: Option<TraceTree>,
    unit_count: u64,
    failed_units: u64,
    extradata_units: u64,
    finalized: bool,
    cancel: CancelToken,
    progress: Progress,
}

impl Session {
    /// Opens `path` with the options of the current configuration.
    pub fn open(path: impl AsRef<Path>, codec: Codec) -> Result<Self> {
        Self::open_with(path, codec, SessionOptions::from_config())
    }

    pub fn open_with(path: impl AsRef<Path>, codec: Codec, options: SessionOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let source: Box<dyn UnitSource> = if codec.is_annexb() {
            Box::new(AnnexBFramer::with_buffer_size(file, options.buffer_size)?)
        } else {
            Box::new(ObuFramer::with_buffer_size(file, options.buffer_size)?)
        };
        log::info!(
            "opened {} as {} ({} bytes)",
            path.display(),
            codec,
            source.file_size()
        );

        Ok(Self {
            parser: parser_for(codec, options.frame_limit),
            hrd: options.hrd.then(HrdSimulator::new),
            trace: options.trace.then(TraceTree::new),
            path,
            codec,
            options,
            source,
            bitrate: Vec::new(),
            unit_count: 0,
            failed_units: 0,
            extradata_units: 0,
            finalized: false,
            cancel: CancelToken::new(),
            progress: Progress::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Frames the next unit and decodes its header without parsing it.
    ///
    /// The payload is kept for parameter sets and random access slices.
    pub fn next_unit(&mut self) -> Result<Option<Unit>> {
        let Some(raw) = self.source.next_unit()? else {
            return Ok(None);
        };
        let kind = self.parser.classify(&raw.data)?;
        let keep = kind.is_parameter_set() || kind.is_random_access();
        Ok(Some(Unit {
            index: raw.index,
            kind,
            range: Some(raw.range),
            payload: keep.then_some(raw.data),
        }))
    }

    /// Moves the framer to the unit starting at file offset `pos`.
    ///
    /// Parser state is kept, so this is meant for reading units again
    /// (e.g. starting at a [`SeekInfo::file_pos`]) rather than for
    /// continuing a parse.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.source.seek(pos)
    }

    /// Parses one unit and feeds completed access units to the HRD model.
    ///
    /// Unit errors never escape: they are reported in the result and the
    /// session stays usable.
    pub fn parse_unit(&mut self, index: u64, data: &[u8], range: Option<ByteRange>) -> ParseResult {
        let input = UnitInput { index, data, range };
        let outcome = match self.trace.as_mut() {
            Some(tree) => {
                let node = tree.add_child(TraceTree::ROOT, &format!("unit {}", index), None);
                let result = {
                    let mut scope = TraceScope::new(tree, node);
                    let result = self.parser.parse_unit(input, &mut scope);
                    if let Err(e) = &result {
                        scope.fail(e);
                    }
                    result
                };
                if let Ok(outcome) = &result {
                    tree.set_value(node, outcome.name.clone());
                }
                result
            }
            None => self.parser.parse_unit(input, &mut TraceScope::disabled()),
        };
        self.unit_count += 1;
        let bitrate_entry = self.collect_access_units();

        match outcome {
            Ok(outcome) => {
                log::debug!("unit {} {} ({} bytes)", index, outcome.name, data.len());
                ParseResult {
                    success: true,
                    unit_type_name: outcome.name,
                    byte_size: data.len(),
                    bitrate_entry,
                    failure: None,
                }
            }
            Err(e) => {
                self.failed_units += 1;
                let unit_type_name = self
                    .parser
                    .classify(data)
                    .map(|kind| kind.name().to_string())
                    .unwrap_or_else(|_| "Unknown".to_string());
                log::warn!("skipping unit {} ({}): {}", index, unit_type_name, e);
                ParseResult {
                    success: false,
                    unit_type_name,
                    byte_size: data.len(),
                    bitrate_entry,
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    /// Frames and parses the next unit. Returns `None` at the end of the file.
    pub fn parse_next(&mut self) -> Result<Option<ParseResult>> {
        let Some(RawUnit {
            index, range, data, ..
        }) = self.source.next_unit()?
        else {
            return Ok(None);
        };
        let result = self.parse_unit(index, &data, Some(range));
        self.progress.store(ProgressSnapshot {
            units: self.unit_count,
            frames: self.parser.frames().len(),
            bytes: self.source.position(),
            file_size: self.source.file_size(),
        });
        Ok(Some(result))
    }

    /// Drains finished access units into the bitrate list and the HRD
    /// simulator. Returns the last one.
    fn collect_access_units(&mut self) -> Option<BitrateEntry> {
        let mut last = None;
        for au in self.parser.drain_access_units() {
            if let (Some(hrd), Some(input)) = (self.hrd.as_mut(), au.hrd.as_ref()) {
                hrd.add_au(input);
            }
            self.bitrate.push(au.bitrate.clone());
            last = Some(au.bitrate);
        }
        last
    }

    /// Feeds the parameter sets of a container configuration record.
    ///
    /// Accepts `avcC`, `hvcC` and `av1C` records as well as raw start code
    /// delimited units. Returns the number of units parsed successfully.
    pub fn parse_extradata(&mut self, data: &[u8]) -> Result<usize> {
        let units: Vec<Bytes> = match self.codec {
            _ if data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1]) => {
                split_annexb(data)
            }
            Codec::Avc => parse_avcc(data)?.nal_units,
            Codec::Hevc => parse_hvcc(data)?.nal_units,
            Codec::Av1 => {
                if data.len() < 4 || data[0] & 0x80 == 0 {
                    return Err(DemuxError::InvalidData("not an av1C record".into()));
                }
                split_obus(&data[4..])?
                    .into_iter()
                    .map(|(_, obu)| Bytes::copy_from_slice(obu))
                    .collect()
            }
            Codec::Vvc => {
                return Err(DemuxError::Unsupported("vvcC configuration records".into()))
            }
        };

        let mut parsed = 0;
        for unit in units {
            // Extradata units get indices counting down from the top so
            // they never collide with file units
            let index = u64::MAX - self.extradata_units;
            self.extradata_units += 1;
            if self.parse_unit(index, &unit, None).success {
                parsed += 1;
            }
        }
        log::debug!("parsed {} units from {} bytes of extradata", parsed, data.len());
        Ok(parsed)
    }

    /// Parses the rest of the file.
    ///
    /// Stops early when the [`CancelToken`] fires or the frame limit is
    /// reached. I/O errors abort the run, a unit the framer cannot cut
    /// ends it.
    pub fn run(&mut self) -> Result<ParseSummary> {
        log::info!("parsing {} as {}", self.path.display(), self.codec);
        let mut cancelled = false;
        loop {
            if self.cancel.is_cancelled() {
                log::info!("parsing {} cancelled", self.path.display());
                cancelled = true;
                break;
            }
            if self.parser.assembler().limit_reached() {
                log::debug!("frame limit reached");
                break;
            }
            match self.parse_next() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) if e.is_unit_local() => {
                    log::warn!(
                        "stopping at file position {}: {}",
                        self.source.position(),
                        e
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.finalize();

        let summary = self.summary(cancelled);
        log::info!(
            "parsed {} units, {} frames, {} access units, {} HRD warnings",
            summary.unit_count,
            summary.frames.len(),
            summary.bitrate.len(),
            summary.warnings.len()
        );
        Ok(summary)
    }

    /// Closes the last access unit and drains the HRD queue.
    ///
    /// Called by [`Session::run`]. Calling it again does nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        if let Err(e) = self.parser.finalize() {
            log::warn!("closing the last frame: {}", e);
        }
        self.collect_access_units();
        if let Some(hrd) = self.hrd.as_mut() {
            hrd.end_of_stream();
        }
    }

    fn summary(&self, cancelled: bool) -> ParseSummary {
        let (hrd, warnings) = match &self.hrd {
            Some(sim) => (sim.entries().to_vec(), sim.warnings().to_vec()),
            None => (Vec::new(), Vec::new()),
        };
        ParseSummary {
            frames: self.parser.frames().display_order().cloned().collect(),
            bitrate: self.bitrate.clone(),
            hrd,
            warnings,
            stream_info: self.stream_info(),
            unit_count: self.unit_count,
            failed_units: self.failed_units,
            cancelled,
            limit_reached: self.parser.assembler().limit_reached(),
        }
    }

    /// Parameter sets and file position to start decoding at the frame
    /// with display index `frame_index`.
    pub fn seek_info(&self, frame_index: usize) -> Option<SeekInfo> {
        self.parser.seek_info(frame_index)
    }

    /// Container configuration record (`avcC`, `av1C`, or raw parameter
    /// sets for HEVC and VVC).
    pub fn extradata(&self) -> Option<Bytes> {
        self.parser.extradata()
    }

    pub fn closest_seek_point(&self, target: usize, current: Option<usize>) -> Option<SeekPoint> {
        self.parser.frames().closest_seek_point(target, current)
    }

    /// Reads the bytes of the frame at display index `frame_index`.
    ///
    /// Annex B data comes back with four byte start codes. The file is
    /// read through a second handle, so the parse position is untouched.
    pub fn frame_data(&self, frame_index: usize) -> Result<Bytes> {
        let frame = self
            .parser
            .frames()
            .display(frame_index)
            .ok_or_else(|| DemuxError::InvalidData(format!("no frame {}", frame_index)))?;
        let range = frame
            .range
            .ok_or_else(|| DemuxError::InvalidData(format!("frame {} has no file range", frame_index)))?;

        let mut file = File::open(&self.path)?;
        if self.codec.is_annexb() {
            return AnnexBFramer::with_buffer_size(file, self.options.buffer_size)?
                .read_frame_data(range);
        }
        file.seek(SeekFrom::Start(range.start))?;
        let mut data = vec![0u8; range.len() as usize];
        file.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }

    pub fn frames(&self) -> &[Frame] {
        self.parser.frames().coding_order()
    }

    pub fn bitrate_entries(&self) -> &[BitrateEntry] {
        &self.bitrate
    }

    pub fn hrd(&self) -> Option<&HrdSimulator> {
        self.hrd.as_ref()
    }

    pub fn stream_info(&self) -> StreamInfo {
        let mut info = self.parser.stream_info();
        info.unit_count = self.unit_count;
        info.file_size = self.source.file_size();
        info.bytes_before_first_unit = self.source.bytes_before_first_unit();
        info
    }

    /// The syntax trace, if tracing is enabled.
    pub fn trace(&self) -> Option<&TraceTree> {
        self.trace.as_ref()
    }
}

/// Parses `path` on a blocking tokio worker.
///
/// Must be called from within a Tokio runtime, since the work is handed to
/// [`tokio::task::spawn_blocking`].
pub fn spawn_parse(
    path: impl Into<PathBuf>,
    codec: Codec,
    cancel: CancelToken,
) -> tokio::task::JoinHandle<Result<ParseSummary>> {
    spawn_parse_with(path, codec, SessionOptions::from_config(), cancel, Progress::new())
}

/// [`spawn_parse`] with explicit options and a shared [`Progress`].
///
/// Like [`spawn_parse`], this panics outside a Tokio runtime.
pub fn spawn_parse_with(
    path: impl Into<PathBuf>,
    codec: Codec,
    options: SessionOptions,
    cancel: CancelToken,
    progress: Progress,
) -> tokio::task::JoinHandle<Result<ParseSummary>> {
    let path = path.into();
    tokio::task::spawn_blocking(move || {
        Session::open_with(&path, codec, options)?
            .with_cancel(cancel)
            .with_progress(progress)
            .run()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_options_follow_config() {
        let mut config = Config::default();
        config.apply_file("trace = true\nframe_limit = 3\nhrd = false\n");
        let options = SessionOptions::from(config);
        assert_eq!(
            options,
            SessionOptions {
                buffer_size: crate::config::DEFAULT_BUFFER_SIZE,
                trace: true,
                frame_limit: Some(3),
                hrd: false,
            }
        );
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_progress_percent() {
        let snapshot = ProgressSnapshot {
            units: 3,
            frames: 1,
            bytes: 250,
            file_size: 1000,
        };
        assert_eq!(snapshot.percent(), 25.0);
        assert_eq!(ProgressSnapshot::default().percent(), 100.0);
    }

    #[tokio::test]
    async fn test_cancelled_spawned_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0, 0, 0, 1, 0x09, 0x10]).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let handle = spawn_parse_with(
            file.path(),
            Codec::Avc,
            SessionOptions::default(),
            cancel,
            Progress::new(),
        );
        let summary = tokio_test::assert_ok!(handle.await.unwrap());
        assert!(summary.cancelled);
        assert_eq!(summary.unit_count, 0);
        assert_eq!(summary.stream_info.file_size, 6);
    }
}
