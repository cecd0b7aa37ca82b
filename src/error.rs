use std::path::PathBuf;

use thiserror::Error;

use crate::region::Roi;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Conditions that abort ingestion. Per-field metadata problems never surface
/// here; they are recorded as [`crate::diagnostics::Warning`]s instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("degenerate region of interest {0}: expected x0 < x1 and y0 < y1")]
    InvalidGeometry(Roi),

    #[error("region of interest {roi} exceeds frame bounds {width}x{height}")]
    RoiOutOfBounds { roi: Roi, width: u32, height: u32 },

    #[error("unsupported color space '{0}'")]
    UnsupportedColorSpace(String),

    #[error("unsupported pixel data: {0}")]
    UnsupportedPixelData(String),

    #[error("invalid metadata override for {field}: {reason}")]
    InvalidOverride { field: &'static str, reason: String },

    #[error("unsupported output format '{0}'")]
    UnsupportedOutput(String),

    #[error("failed to read structured source {}: {message}", .path.display())]
    Dicom { path: PathBuf, message: String },

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("video encoder error: {0}")]
    Encode(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to resolve a single metadata field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("attribute '{0}' is missing")]
    Missing(&'static str),

    #[error("attribute '{keyword}' is malformed: {reason}")]
    Malformed {
        keyword: &'static str,
        reason: String,
    },
}

impl FieldError {
    pub(crate) fn malformed(keyword: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            keyword,
            reason: reason.into(),
        }
    }
}
