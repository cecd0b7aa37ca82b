use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::color::{self, ColorSpace, YbrTables};
use crate::error::Result;
use crate::region::Roi;
use crate::sink::{SinkOpener, SinkOutcome};
use crate::video::frame::{CHANNELS, Frame, RawVideo, crop_rows};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessMode {
    #[default]
    Reference,
    Accelerated,
}

pub trait FrameTransform {
    /// Crops `roi` out of a packed frame `source_width` pixels wide and maps
    /// the result to RGB. `roi` is already validated against the frame.
    fn transform(&self, source: &[u8], source_width: u32, roi: &Roi) -> Frame;
}

pub struct ReferenceTransform {
    space: ColorSpace,
}

impl ReferenceTransform {
    pub fn new(space: ColorSpace) -> Self {
        Self { space }
    }
}

impl FrameTransform for ReferenceTransform {
    fn transform(&self, source: &[u8], source_width: u32, roi: &Roi) -> Frame {
        color::convert(self.space, crop_rows(source, source_width, roi))
    }
}

pub struct TableTransform {
    tables: Option<YbrTables>,
}

impl TableTransform {
    pub fn new(space: ColorSpace) -> Self {
        Self {
            tables: (!space.is_identity()).then(YbrTables::new),
        }
    }
}

impl FrameTransform for TableTransform {
    fn transform(&self, source: &[u8], source_width: u32, roi: &Roi) -> Frame {
        let Some(tables) = &self.tables else {
            return crop_rows(source, source_width, roi);
        };
        let stride = source_width as usize * CHANNELS;
        let row_start = roi.x0 as usize * CHANNELS;
        let row_bytes = roi.width() as usize * CHANNELS;
        let mut frame = Frame::filled(roi.width(), roi.height(), [0; 3]);
        let target = frame.as_bytes_mut();
        for (row, y) in (roi.y0 as usize..roi.y1 as usize).enumerate() {
            let offset = y * stride + row_start;
            tables.convert_row(
                &source[offset..offset + row_bytes],
                &mut target[row * row_bytes..(row + 1) * row_bytes],
            );
        }
        frame
    }
}

#[derive(Debug)]
pub struct Preprocessed {
    pub frames: Vec<Frame>,
    pub output: Option<SinkOutcome>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FramePreprocessor {
    mode: PreprocessMode,
}

impl FramePreprocessor {
    pub fn new(mode: PreprocessMode) -> Self {
        Self { mode }
    }

    fn transform(&self, space: ColorSpace) -> Box<dyn FrameTransform> {
        match self.mode {
            PreprocessMode::Reference => Box::new(ReferenceTransform::new(space)),
            PreprocessMode::Accelerated => Box::new(TableTransform::new(space)),
        }
    }

    /// The ROI and the color space label are checked before any frame is
    /// touched and before the sink is opened. The sink receives frame `i`
    /// before frame `i + 1` is processed; if anything fails the sink is
    /// dropped unfinished and its partial output removed.
    pub fn run(
        &self,
        raw: &RawVideo,
        roi: &Roi,
        color_space: &str,
        sink: Option<&dyn SinkOpener>,
    ) -> Result<Preprocessed> {
        roi.validate(raw.width, raw.height)?;
        let space: ColorSpace = color_space.parse()?;
        let transform = self.transform(space);

        let mut sink = sink
            .map(|opener| opener.open(roi.width(), roi.height()))
            .transpose()?;

        debug!(
            mode = ?self.mode,
            color_space = %space,
            %roi,
            frames = raw.len(),
            "preprocessing frames"
        );
        let mut frames = Vec::with_capacity(raw.len());
        for source in raw.frames() {
            frames.push(transform.transform(source, raw.width, roi));
            if let (Some(sink), Some(frame)) = (sink.as_mut(), frames.last()) {
                sink.write_frame(frame)?;
            }
        }

        let output = sink.map(|sink| sink.finish()).transpose()?;
        Ok(Preprocessed { frames, output })
    }
}
