use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use dicom_core::value::DicomValueType;
use dicom_core::{PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemElement;
use dicom_object::{DefaultDicomObject, InMemDicomObject, open_file};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::source::{AttributeSource, AttributeValue};
use crate::video::frame::{CHANNELS, RawVideo};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// Whether `path` carries the Part 10 preamble and `DICM` magic.
pub fn has_dicom_magic(path: &Path) -> Result<bool> {
    let mut file = File::open(path).map_err(|err| IngestError::io(path, err))?;
    let mut header = [0u8; PREAMBLE_LEN + 4];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(IngestError::io(path, err)),
        }
    }
    Ok(filled == header.len() && &header[PREAMBLE_LEN..] == MAGIC)
}

pub struct StructuredFile {
    path: PathBuf,
    object: DefaultDicomObject,
}

impl StructuredFile {
    pub fn open(path: &Path) -> Result<Self> {
        let object = open_file(path).map_err(|err| IngestError::Dicom {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        debug!(
            path = %path.display(),
            transfer_syntax = object.meta().transfer_syntax(),
            "structured source opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            object,
        })
    }

    /// Multi-frame objects announce `NumberOfFrames`; stills do not.
    pub fn is_multi_frame(&self) -> bool {
        self.attribute("NumberOfFrames").is_some()
    }

    /// Whether pixels carry three samples. Single-sample (grayscale) data is
    /// kept as plain frames without crop or color conversion.
    pub fn is_color(&self) -> bool {
        matches!(
            self.layout_value("SamplesPerPixel", Some(1)),
            Ok(samples) if samples == CHANNELS as u32
        )
    }

    /// Unpacks the pixel data into a packed `frames x rows x columns x 3`
    /// buffer. Grayscale samples are replicated into all three channels.
    pub fn pixel_data(&self) -> Result<RawVideo> {
        let rows = self.layout_value("Rows", None)?;
        let columns = self.layout_value("Columns", None)?;
        let samples = self.layout_value("SamplesPerPixel", Some(1))?;
        let bits = self.layout_value("BitsAllocated", Some(8))?;
        let planar = self.layout_value("PlanarConfiguration", Some(0))?;
        let declared = self
            .attribute("NumberOfFrames")
            .and_then(|value| value.as_i64())
            .and_then(|count| usize::try_from(count).ok());
        let photometric = self
            .attribute("PhotometricInterpretation")
            .and_then(|value| value.as_text())
            .unwrap_or_default();

        if samples != 1 && samples != CHANNELS as u32 {
            return Err(IngestError::UnsupportedPixelData(format!(
                "{samples} sample(s) per pixel, expected 1 or {CHANNELS}"
            )));
        }
        if bits != 8 {
            return Err(IngestError::UnsupportedPixelData(format!(
                "{bits} bits allocated, expected 8"
            )));
        }

        let element = self
            .object
            .element(tags::PIXEL_DATA)
            .map_err(|_| IngestError::UnsupportedPixelData("no pixel data element".into()))?;
        let bytes = element_bytes(element)?;

        let data = if samples == 1 {
            replicate_gray(&bytes, columns, rows)
        } else if photometric.eq_ignore_ascii_case("YBR_FULL_422") {
            expand_422(&bytes, columns, rows)?
        } else if planar == 1 {
            interleave_planes(&bytes, columns, rows)
        } else {
            bytes.into_owned()
        };

        let raw = RawVideo::new(columns, rows, declared, data);
        debug!(
            path = %self.path.display(),
            declared = ?declared,
            decoded = raw.len(),
            rows,
            columns,
            "pixel data unpacked"
        );
        Ok(raw)
    }

    fn layout_value(&self, keyword: &str, default: Option<u32>) -> Result<u32> {
        match self.attribute(keyword).and_then(|value| value.as_i64()) {
            Some(value) => u32::try_from(value).map_err(|_| {
                IngestError::UnsupportedPixelData(format!("{keyword} = {value} is out of range"))
            }),
            None => default.ok_or_else(|| {
                IngestError::UnsupportedPixelData(format!("{keyword} is missing"))
            }),
        }
    }
}

impl AttributeSource for StructuredFile {
    fn attribute(&self, keyword: &str) -> Option<AttributeValue> {
        AttributeSource::attribute(&*self.object, keyword)
    }

    fn item(&self, keyword: &str, index: usize) -> Option<&dyn AttributeSource> {
        AttributeSource::item(&*self.object, keyword, index)
    }
}

impl AttributeSource for InMemDicomObject {
    fn attribute(&self, keyword: &str) -> Option<AttributeValue> {
        let element = self.element_by_name(keyword).ok()?;
        Some(element_value(element))
    }

    fn item(&self, keyword: &str, index: usize) -> Option<&dyn AttributeSource> {
        let element = self.element_by_name(keyword).ok()?;
        element
            .items()?
            .get(index)
            .map(|item| item as &dyn AttributeSource)
    }
}

fn element_value(element: &InMemElement) -> AttributeValue {
    let value = match element.vr() {
        VR::FL | VR::FD => element.to_float64().map(AttributeValue::Float),
        VR::US | VR::UL | VR::SS | VR::SL | VR::UV | VR::SV => {
            element.to_int::<i64>().map(AttributeValue::Int)
        }
        _ => element
            .to_str()
            .map(|text| AttributeValue::Text(text.into_owned())),
    };
    value.unwrap_or(AttributeValue::Empty)
}

fn element_bytes(element: &InMemElement) -> Result<Cow<'_, [u8]>> {
    let value = element.value().primitive().ok_or_else(|| {
        IngestError::UnsupportedPixelData("encapsulated (compressed) pixel data".into())
    })?;
    match value {
        PrimitiveValue::U8(bytes) => Ok(Cow::Borrowed(&bytes[..])),
        PrimitiveValue::U16(words) => Ok(Cow::Owned(
            words.iter().flat_map(|word| word.to_le_bytes()).collect(),
        )),
        other => Err(IngestError::UnsupportedPixelData(format!(
            "pixel data stored as {:?}",
            other.value_type()
        ))),
    }
}

/// Expands `Y0 Y1 Cb Cr` pixel pairs into two full Y/Cb/Cr triples.
fn expand_422(bytes: &[u8], columns: u32, rows: u32) -> Result<Vec<u8>> {
    if columns % 2 != 0 {
        return Err(IngestError::UnsupportedPixelData(format!(
            "YBR_FULL_422 requires an even column count, got {columns}"
        )));
    }
    let pixels_per_frame = columns as usize * rows as usize;
    let packed_frame = pixels_per_frame * 2;
    let frames = if packed_frame == 0 {
        0
    } else {
        bytes.len() / packed_frame
    };
    let mut data = Vec::with_capacity(frames * pixels_per_frame * CHANNELS);
    for quad in bytes[..frames * packed_frame].chunks_exact(4) {
        let (y0, y1, cb, cr) = (quad[0], quad[1], quad[2], quad[3]);
        data.extend_from_slice(&[y0, cb, cr, y1, cb, cr]);
    }
    Ok(data)
}

fn replicate_gray(bytes: &[u8], columns: u32, rows: u32) -> Vec<u8> {
    let plane = columns as usize * rows as usize;
    if plane == 0 {
        return Vec::new();
    }
    let whole = bytes.len() - bytes.len() % plane;
    bytes[..whole]
        .iter()
        .flat_map(|&gray| [gray; CHANNELS])
        .collect()
}

fn interleave_planes(bytes: &[u8], columns: u32, rows: u32) -> Vec<u8> {
    let plane = columns as usize * rows as usize;
    let frame_len = plane * CHANNELS;
    if frame_len == 0 {
        return Vec::new();
    }
    let mut data = Vec::with_capacity(bytes.len() - bytes.len() % frame_len);
    for frame in bytes.chunks_exact(frame_len) {
        for index in 0..plane {
            data.extend_from_slice(&[
                frame[index],
                frame[plane + index],
                frame[2 * plane + index],
            ]);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ybr_422_pairs_share_chroma() {
        let packed = [10, 20, 100, 200, 30, 40, 101, 201];
        let expanded = expand_422(&packed, 2, 2).unwrap();
        assert_eq!(
            expanded,
            [10, 100, 200, 20, 100, 200, 30, 101, 201, 40, 101, 201]
        );
        assert!(expand_422(&packed, 3, 1).is_err());
    }

    #[test]
    fn planar_frames_are_interleaved() {
        let planar = [1, 2, 10, 20, 100, 200];
        assert_eq!(interleave_planes(&planar, 2, 1), [1, 10, 100, 2, 20, 200]);
    }

    #[test]
    fn gray_samples_fill_every_channel() {
        assert_eq!(replicate_gray(&[7, 9, 1], 2, 1), [7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn magic_detection_requires_preamble_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let dicom = dir.path().join("a.dcm");
        let mut bytes = vec![0u8; PREAMBLE_LEN];
        bytes.extend_from_slice(MAGIC);
        std::fs::write(&dicom, &bytes).unwrap();
        assert!(has_dicom_magic(&dicom).unwrap());

        let short = dir.path().join("b.bin");
        std::fs::write(&short, b"DICM").unwrap();
        assert!(!has_dicom_magic(&short).unwrap());
    }
}
