use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{self, FieldError, IngestError};
use crate::source::{AttributeSource, require_f64, require_i64};

pub const REGION_SEQUENCE: &str = "SequenceOfUltrasoundRegions";

/// Crop rectangle in source pixel coordinates, half-open on the max side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Roi {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_degenerate(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    /// Checks ordering and containment in a `width`x`height` frame.
    pub fn validate(&self, width: u32, height: u32) -> error::Result<()> {
        if self.is_degenerate() {
            return Err(IngestError::InvalidGeometry(*self));
        }
        if self.x1 > width || self.y1 > height {
            return Err(IngestError::RoiOutOfBounds {
                roi: *self,
                width,
                height,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x0, self.y0, self.x1, self.y1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalUnit {
    None,
    Percent,
    Decibel,
    #[default]
    Centimeter,
    Second,
    Hertz,
    DecibelPerSecond,
    CentimeterPerSecond,
    SquareCentimeter,
    SquareCentimeterPerSecond,
    CubicCentimeter,
    CubicCentimeterPerSecond,
    Degree,
}

impl PhysicalUnit {
    pub fn from_code(code: i64) -> Option<Self> {
        let unit = match code {
            0x0 => Self::None,
            0x1 => Self::Percent,
            0x2 => Self::Decibel,
            0x3 => Self::Centimeter,
            0x4 => Self::Second,
            0x5 => Self::Hertz,
            0x6 => Self::DecibelPerSecond,
            0x7 => Self::CentimeterPerSecond,
            0x8 => Self::SquareCentimeter,
            0x9 => Self::SquareCentimeterPerSecond,
            0xA => Self::CubicCentimeter,
            0xB => Self::CubicCentimeterPerSecond,
            0xC => Self::Degree,
            _ => return None,
        };
        Some(unit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelScale {
    pub delta_x: f64,
    pub delta_y: f64,
    pub unit_x: PhysicalUnit,
    pub unit_y: PhysicalUnit,
}

/// The first ultrasound region descriptor, if the source lists any.
pub fn first_region(source: &dyn AttributeSource) -> Result<&dyn AttributeSource, FieldError> {
    source
        .item(REGION_SEQUENCE, 0)
        .ok_or(FieldError::Missing(REGION_SEQUENCE))
}

pub fn extract_roi(region: &dyn AttributeSource) -> Result<Roi, FieldError> {
    Ok(Roi {
        x0: coordinate(region, "RegionLocationMinX0")?,
        y0: coordinate(region, "RegionLocationMinY0")?,
        x1: coordinate(region, "RegionLocationMaxX1")?,
        y1: coordinate(region, "RegionLocationMaxY1")?,
    })
}

pub fn extract_delta(region: &dyn AttributeSource, keyword: &'static str) -> Result<f64, FieldError> {
    require_f64(region, keyword)
}

pub fn extract_unit(
    region: &dyn AttributeSource,
    keyword: &'static str,
) -> Result<PhysicalUnit, FieldError> {
    let code = require_i64(region, keyword)?;
    PhysicalUnit::from_code(code)
        .ok_or_else(|| FieldError::malformed(keyword, format!("unknown unit code {code}")))
}

fn coordinate(region: &dyn AttributeSource, keyword: &'static str) -> Result<u32, FieldError> {
    let value = require_i64(region, keyword)?;
    u32::try_from(value)
        .map_err(|_| FieldError::malformed(keyword, format!("{value} is not a pixel coordinate")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::AttributeSet;

    fn region() -> AttributeSet {
        AttributeSet::new()
            .with("RegionLocationMinX0", 10i64)
            .with("RegionLocationMinY0", 20i64)
            .with("RegionLocationMaxX1", 110i64)
            .with("RegionLocationMaxY1", 220i64)
            .with("PhysicalUnitsXDirection", 3i64)
            .with("PhysicalDeltaX", 0.0125)
    }

    #[test]
    fn roi_reads_region_bounds() {
        let roi = extract_roi(&region()).unwrap();
        assert_eq!(roi, Roi::new(10, 20, 110, 220));
        assert_eq!((roi.width(), roi.height()), (100, 200));
    }

    #[test]
    fn roi_extraction_does_not_validate_ordering() {
        let reversed = region().with("RegionLocationMaxX1", 5i64);
        let roi = extract_roi(&reversed).unwrap();
        assert!(roi.is_degenerate());
    }

    #[test]
    fn negative_coordinates_are_malformed() {
        let bad = region().with("RegionLocationMinX0", -1i64);
        assert!(matches!(
            extract_roi(&bad),
            Err(FieldError::Malformed { keyword: "RegionLocationMinX0", .. })
        ));
    }

    #[test]
    fn validate_rejects_degenerate_and_out_of_frame() {
        assert!(matches!(
            Roi::new(5, 5, 5, 10).validate(64, 64),
            Err(IngestError::InvalidGeometry(_))
        ));
        assert!(matches!(
            Roi::new(0, 0, 65, 10).validate(64, 64),
            Err(IngestError::RoiOutOfBounds { .. })
        ));
        assert!(Roi::new(0, 0, 64, 64).validate(64, 64).is_ok());
    }

    #[test]
    fn unit_codes_map_to_units() {
        assert_eq!(
            extract_unit(&region(), "PhysicalUnitsXDirection").unwrap(),
            PhysicalUnit::Centimeter
        );
        assert_eq!(PhysicalUnit::from_code(0xC), Some(PhysicalUnit::Degree));
        assert_eq!(PhysicalUnit::from_code(42), None);
    }
}
