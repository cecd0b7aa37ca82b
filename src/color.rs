use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::IngestError;
use crate::video::frame::{CHANNELS, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColorSpace {
    Rgb,
    YbrFull,
    /// Full-range luma/chroma with horizontally shared chroma. Decoders
    /// upsample to one triple per pixel, so conversion matches `YbrFull`.
    YbrFull422,
}

impl ColorSpace {
    pub const ALL: [ColorSpace; 3] = [Self::Rgb, Self::YbrFull, Self::YbrFull422];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rgb => "RGB",
            Self::YbrFull => "YBR_FULL",
            Self::YbrFull422 => "YBR_FULL_422",
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Rgb)
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ColorSpace {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_end_matches('\0').trim();
        Self::ALL
            .into_iter()
            .find(|space| space.label().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| IngestError::UnsupportedColorSpace(normalized.to_string()))
    }
}

// BT.601 full-range coefficients in 16.16 fixed point.
const FIX_SHIFT: i32 = 16;
const FIX_HALF: i32 = 1 << (FIX_SHIFT - 1);
const CR_TO_R: i32 = 91_881;
const CB_TO_G: i32 = 22_554;
const CR_TO_G: i32 = 46_802;
const CB_TO_B: i32 = 116_130;

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[inline]
pub fn ybr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = i32::from(y);
    let cb = i32::from(cb) - 128;
    let cr = i32::from(cr) - 128;
    [
        clamp_u8(y + ((CR_TO_R * cr + FIX_HALF) >> FIX_SHIFT)),
        clamp_u8(y + ((-CB_TO_G * cb - CR_TO_G * cr + FIX_HALF) >> FIX_SHIFT)),
        clamp_u8(y + ((CB_TO_B * cb + FIX_HALF) >> FIX_SHIFT)),
    ]
}

/// Maps `frame` from `space` into RGB. `Rgb` returns the frame untouched.
pub fn convert(space: ColorSpace, mut frame: Frame) -> Frame {
    convert_in_place(space, frame.as_bytes_mut());
    frame
}

pub fn convert_in_place(space: ColorSpace, pixels: &mut [u8]) {
    if space.is_identity() {
        return;
    }
    for pixel in pixels.chunks_exact_mut(CHANNELS) {
        let rgb = ybr_to_rgb(pixel[0], pixel[1], pixel[2]);
        pixel.copy_from_slice(&rgb);
    }
}

/// Precomputed chroma contributions; produces the same bytes as
/// [`ybr_to_rgb`] without per-pixel multiplications.
pub struct YbrTables {
    cr_r: [i32; 256],
    cb_b: [i32; 256],
    cb_g: [i32; 256],
    cr_g: [i32; 256],
}

impl YbrTables {
    pub fn new() -> Self {
        let mut tables = Self {
            cr_r: [0; 256],
            cb_b: [0; 256],
            cb_g: [0; 256],
            cr_g: [0; 256],
        };
        for value in 0..256usize {
            let centered = value as i32 - 128;
            tables.cr_r[value] = (CR_TO_R * centered + FIX_HALF) >> FIX_SHIFT;
            tables.cb_b[value] = (CB_TO_B * centered + FIX_HALF) >> FIX_SHIFT;
            tables.cb_g[value] = -CB_TO_G * centered;
            tables.cr_g[value] = -CR_TO_G * centered;
        }
        tables
    }

    pub fn convert_row(&self, source: &[u8], target: &mut [u8]) {
        for (src, dst) in source
            .chunks_exact(CHANNELS)
            .zip(target.chunks_exact_mut(CHANNELS))
        {
            let y = i32::from(src[0]);
            let cb = src[1] as usize;
            let cr = src[2] as usize;
            dst[0] = clamp_u8(y + self.cr_r[cr]);
            dst[1] = clamp_u8(y + ((self.cb_g[cb] + self.cr_g[cr] + FIX_HALF) >> FIX_SHIFT));
            dst[2] = clamp_u8(y + self.cb_b[cb]);
        }
    }
}

impl Default for YbrTables {
    fn default() -> Self {
        Self::new()
    }
}
