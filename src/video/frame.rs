use image::RgbImage;
use serde::Serialize;

use crate::error::{IngestError, Result};
use crate::region::Roi;

pub const CHANNELS: usize = 3;

/// One decoded picture: `height` rows of `width` interleaved 8-bit triples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(IngestError::UnsupportedPixelData(format!(
                "frame buffer holds {} bytes, expected {expected} for {width}x{height}x{CHANNELS}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, pixel: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let data = pixel.iter().copied().cycle().take(count * CHANNELS).collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, CHANNELS)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * CHANNELS;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

/// Copies a validated `roi` out of a packed `source_width`-wide buffer.
pub(crate) fn crop_rows(source: &[u8], source_width: u32, roi: &Roi) -> Frame {
    let stride = source_width as usize * CHANNELS;
    let row_start = roi.x0 as usize * CHANNELS;
    let row_end = roi.x1 as usize * CHANNELS;
    let mut data = Vec::with_capacity(roi.width() as usize * roi.height() as usize * CHANNELS);
    for y in roi.y0 as usize..roi.y1 as usize {
        let offset = y * stride;
        data.extend_from_slice(&source[offset + row_start..offset + row_end]);
    }
    Frame {
        width: roi.width(),
        height: roi.height(),
        data,
    }
}

/// Contiguous multi-frame pixel buffer as decoded from a structured source.
#[derive(Debug, Clone, Serialize)]
pub struct RawVideo {
    pub width: u32,
    pub height: u32,
    /// Frame count announced by the source header, if any.
    pub declared_frames: Option<usize>,
    #[serde(skip)]
    data: Vec<u8>,
}

impl RawVideo {
    pub fn new(width: u32, height: u32, declared_frames: Option<usize>, mut data: Vec<u8>) -> Self {
        let frame_len = width as usize * height as usize * CHANNELS;
        if frame_len == 0 {
            data.clear();
        } else {
            data.truncate(data.len() - data.len() % frame_len);
        }
        Self {
            width,
            height,
            declared_frames,
            data,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    pub fn len(&self) -> usize {
        match self.frame_len() {
            0 => 0,
            frame_len => self.data.len() / frame_len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn truncate(&mut self, frames: usize) {
        let keep = frames.saturating_mul(self.frame_len());
        self.data.truncate(keep);
    }

    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len() {
            return None;
        }
        let frame_len = self.frame_len();
        Some(&self.data[index * frame_len..(index + 1) * frame_len])
    }

    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        let frame_len = self.frame_len().max(1);
        self.data.chunks_exact(frame_len)
    }

    pub fn into_frames(self) -> Vec<Frame> {
        let (width, height) = (self.width, self.height);
        self.frames()
            .map(|bytes| Frame {
                width,
                height,
                data: bytes.to_vec(),
            })
            .collect()
    }
}
