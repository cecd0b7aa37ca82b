pub mod frame;

use std::fs;
use std::io::Write;
use std::ops::Index;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{IngestError, Result};
use crate::ingest::SourceKind;
use crate::metadata::{AcquisitionMetadata, FieldValue};
use crate::naming::{metadata_stem, sanitize};
use crate::sink::SinkOutcome;
use frame::{CHANNELS, Frame};

const FALLBACK_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Index(usize),
    /// A metadata field name (`patient_id`) or source keyword (`PatientID`).
    Field(&'a str),
}

impl From<usize> for Key<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(field: &'a str) -> Self {
        Self::Field(field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry<'a> {
    Frame(&'a Frame),
    Field(FieldValue),
}

pub trait FrameDisplay {
    fn show(&mut self, index: usize, frame: &Frame) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Headless display printing one line per frame.
pub struct TerminalDisplay<W: Write> {
    out: W,
    title: String,
}

impl<W: Write> TerminalDisplay<W> {
    pub fn new(out: W, title: impl Into<String>) -> Self {
        Self {
            out,
            title: title.into(),
        }
    }

    fn io(err: std::io::Error) -> IngestError {
        IngestError::io("<display>", err)
    }
}

impl<W: Write> FrameDisplay for TerminalDisplay<W> {
    fn show(&mut self, index: usize, frame: &Frame) -> Result<()> {
        let pixels = (frame.width() as u64 * frame.height() as u64).max(1);
        let mut sums = [0u64; CHANNELS];
        for pixel in frame.as_bytes().chunks_exact(CHANNELS) {
            for (sum, &value) in sums.iter_mut().zip(pixel) {
                *sum += u64::from(value);
            }
        }
        writeln!(
            self.out,
            "{} frame {index}: {}x{} mean rgb ({}, {}, {})",
            self.title,
            frame.width(),
            frame.height(),
            sums[0] / pixels,
            sums[1] / pixels,
            sums[2] / pixels
        )
        .map_err(Self::io)
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush().map_err(Self::io)
    }
}

/// Serializable overview used by the CLI `info` command.
#[derive(Debug, Serialize)]
pub struct ContainerSummary<'a> {
    pub source: &'a Path,
    pub kind: SourceKind,
    pub is_video: bool,
    pub frames: usize,
    pub frame_size: Option<(u32, u32)>,
    pub channels: Option<usize>,
    pub metadata: Option<&'a AcquisitionMetadata>,
    pub output: Option<&'a SinkOutcome>,
    pub warnings: &'a [Warning],
}

#[derive(Debug)]
pub struct VideoContainer {
    source: PathBuf,
    kind: SourceKind,
    metadata: Option<AcquisitionMetadata>,
    frames: Vec<Frame>,
    is_video: bool,
    diagnostics: Diagnostics,
    output: Option<SinkOutcome>,
}

impl VideoContainer {
    pub(crate) fn new(source: &Path, kind: SourceKind, frames: Vec<Frame>) -> Self {
        Self {
            source: source.to_path_buf(),
            kind,
            metadata: None,
            frames,
            is_video: true,
            diagnostics: Diagnostics::new(),
            output: None,
        }
    }

    pub(crate) fn with_metadata(mut self, metadata: Option<AcquisitionMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub(crate) fn with_output(mut self, output: Option<SinkOutcome>) -> Self {
        self.output = output;
        self
    }

    pub(crate) fn still(mut self) -> Self {
        self.is_video = false;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// `false` for single-picture structured sources.
    pub fn is_video(&self) -> bool {
        self.is_video
    }

    pub fn metadata(&self) -> Option<&AcquisitionMetadata> {
        self.metadata.as_ref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn output(&self) -> Option<&SinkOutcome> {
        self.output.as_ref()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn get<'k>(&self, key: impl Into<Key<'k>>) -> Option<Entry<'_>> {
        match key.into() {
            Key::Index(index) => self.frames.get(index).map(Entry::Frame),
            Key::Field(name) => self.metadata.as_ref()?.field(name).map(Entry::Field),
        }
    }

    /// `(height, width)` of the stored frames.
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.frames
            .first()
            .map(|frame| (frame.height(), frame.width()))
    }

    pub fn channels(&self) -> Option<usize> {
        self.frames.first().map(|_| CHANNELS)
    }

    fn frame_delay(&self) -> Duration {
        self.metadata
            .as_ref()
            .map(|metadata| metadata.frame_delay_ms)
            .filter(|delay| delay.is_finite() && *delay > 0.0)
            .map(|delay| Duration::from_secs_f64(delay / 1000.0))
            .unwrap_or(FALLBACK_DELAY)
    }

    /// Shows every frame in order, pausing one frame delay between them, until
    /// the last frame or until `cancel` is raised. Returns the frames shown.
    pub fn play(&self, display: &mut dyn FrameDisplay, cancel: &AtomicBool) -> Result<usize> {
        let delay = self.frame_delay();
        let mut shown = 0;
        for (index, frame) in self.frames.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                debug!(shown, "playback interrupted");
                break;
            }
            display.show(index, frame)?;
            shown += 1;
            thread::sleep(delay);
        }
        display.close()?;
        Ok(shown)
    }

    pub fn stem(&self) -> String {
        match &self.metadata {
            Some(metadata) => metadata_stem(metadata),
            None => sanitize(
                &self
                    .source
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Writes every frame as a zero-padded PNG into a new directory under
    /// `dir`, or under the working directory when `dir` is not a directory.
    pub fn save_images(&self, dir: &Path) -> Result<PathBuf> {
        let base = if dir.as_os_str().is_empty() || !dir.is_dir() {
            std::env::current_dir().map_err(|err| IngestError::io(dir, err))?
        } else {
            dir.to_path_buf()
        };
        let target = base.join(self.stem());
        fs::create_dir_all(&target).map_err(|err| IngestError::io(&target, err))?;

        let pad = self.frames.len().to_string().len();
        for (index, frame) in self.frames.iter().enumerate() {
            let path = target.join(format!("{index:0pad$}.png"));
            frame.to_rgb_image().save(&path)?;
        }
        info!(
            directory = %target.display(),
            frames = self.frames.len(),
            "frames exported"
        );
        Ok(target)
    }

    pub fn summary(&self) -> ContainerSummary<'_> {
        ContainerSummary {
            source: &self.source,
            kind: self.kind,
            is_video: self.is_video,
            frames: self.len(),
            frame_size: self.frame_size(),
            channels: self.channels(),
            metadata: self.metadata.as_ref(),
            output: self.output.as_ref(),
            warnings: self.diagnostics.warnings(),
        }
    }
}

impl Index<usize> for VideoContainer {
    type Output = Frame;

    fn index(&self, index: usize) -> &Frame {
        &self.frames[index]
    }
}

impl<'a> IntoIterator for &'a VideoContainer {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}
