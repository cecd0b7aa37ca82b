#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
const US_MULTIFRAME_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.3.1";

/// Describes a synthetic ultrasound recording.
pub struct Recording {
    pub rows: u16,
    pub columns: u16,
    pub declared_frames: Option<usize>,
    pub stored_frames: usize,
    pub photometric: &'static str,
    pub frame_time: Option<&'static str>,
    pub roi: Option<[u32; 4]>,
    pub patient_name: &'static str,
}

impl Default for Recording {
    fn default() -> Self {
        Self {
            rows: 120,
            columns: 120,
            declared_frames: Some(10),
            stored_frames: 10,
            photometric: "RGB",
            frame_time: Some("33.3"),
            roi: Some([10, 10, 110, 110]),
            patient_name: "DOE^JANE",
        }
    }
}

impl Recording {
    /// Pixel `(x, y)` of frame `index`, chosen so crops and order are checkable.
    pub fn sample(index: usize, x: usize, y: usize) -> [u8; 3] {
        [index as u8, x as u8, y as u8]
    }

    /// Gray level of pixel `(x, y)` in frame `index` of a grayscale recording.
    pub fn gray(index: usize, x: usize) -> u8 {
        (index + x) as u8
    }

    fn samples_per_pixel(&self) -> u16 {
        if self.photometric.starts_with("MONOCHROME") { 1 } else { 3 }
    }

    fn pixel_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for index in 0..self.stored_frames {
            for y in 0..self.rows as usize {
                for x in 0..self.columns as usize {
                    match self.photometric {
                        "RGB" => data.extend_from_slice(&Self::sample(index, x, y)),
                        "MONOCHROME1" | "MONOCHROME2" => data.push(Self::gray(index, x)),
                        // Pairs of `Y0 Y1 Cb Cr` with neutral chroma.
                        "YBR_FULL_422" if x % 2 == 0 => {
                            data.extend_from_slice(&[y as u8, y as u8, 128, 128])
                        }
                        "YBR_FULL_422" => {}
                        // Neutral chroma: converts to gray level `y`.
                        _ => data.extend_from_slice(&[y as u8, 128, 128]),
                    }
                }
            }
        }
        data
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut object = InMemDicomObject::new_empty();
        let mut put = |tag: Tag, vr: VR, value: PrimitiveValue| {
            object.put(DataElement::new(tag, vr, value));
        };
        put(tags::SOP_CLASS_UID, VR::UI, US_MULTIFRAME_STORAGE.into());
        put(tags::SOP_INSTANCE_UID, VR::UI, "1.2.826.0.1.3680043.2.1143.7".into());
        put(tags::PATIENT_NAME, VR::PN, self.patient_name.into());
        put(tags::PATIENT_ID, VR::LO, "P-001".into());
        put(tags::PATIENT_BIRTH_DATE, VR::DA, "19800214".into());
        put(
            tags::PERFORMED_PROCEDURE_STEP_DESCRIPTION,
            VR::LO,
            "Carotid".into(),
        );
        put(tags::CONTENT_DATE, VR::DA, "20240305".into());
        put(tags::CONTENT_TIME, VR::TM, "140709.25".into());
        if let Some(frame_time) = self.frame_time {
            put(tags::FRAME_TIME, VR::DS, frame_time.into());
        }
        if let Some(frames) = self.declared_frames {
            put(tags::NUMBER_OF_FRAMES, VR::IS, frames.to_string().into());
        }
        put(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(self.samples_per_pixel()));
        put(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, self.photometric.into());
        put(tags::PLANAR_CONFIGURATION, VR::US, PrimitiveValue::from(0_u16));
        put(tags::ROWS, VR::US, PrimitiveValue::from(self.rows));
        put(tags::COLUMNS, VR::US, PrimitiveValue::from(self.columns));
        put(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(8_u16));
        put(tags::BITS_STORED, VR::US, PrimitiveValue::from(8_u16));
        put(tags::HIGH_BIT, VR::US, PrimitiveValue::from(7_u16));
        put(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16));
        put(tags::PIXEL_DATA, VR::OB, PrimitiveValue::from(self.pixel_data()));

        if let Some([x0, y0, x1, y1]) = self.roi {
            let mut region = InMemDicomObject::new_empty();
            region.put(DataElement::new(tags::PHYSICAL_DELTA_X, VR::FD, PrimitiveValue::from(0.01_f64)));
            region.put(DataElement::new(tags::PHYSICAL_DELTA_Y, VR::FD, PrimitiveValue::from(0.02_f64)));
            region.put(DataElement::new(tags::PHYSICAL_UNITS_X_DIRECTION, VR::US, PrimitiveValue::from(3_u16)));
            region.put(DataElement::new(tags::PHYSICAL_UNITS_Y_DIRECTION, VR::US, PrimitiveValue::from(3_u16)));
            region.put(DataElement::new(tags::REGION_LOCATION_MIN_X0, VR::UL, PrimitiveValue::from(x0)));
            region.put(DataElement::new(tags::REGION_LOCATION_MIN_Y0, VR::UL, PrimitiveValue::from(y0)));
            region.put(DataElement::new(tags::REGION_LOCATION_MAX_X1, VR::UL, PrimitiveValue::from(x1)));
            region.put(DataElement::new(tags::REGION_LOCATION_MAX_Y1, VR::UL, PrimitiveValue::from(y1)));
            object.put(DataElement::new(
                tags::SEQUENCE_OF_ULTRASOUND_REGIONS,
                VR::SQ,
                DataSetSequence::from(vec![region]),
            ));
        }

        let file = object.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(EXPLICIT_VR_LE)
                .media_storage_sop_class_uid(US_MULTIFRAME_STORAGE)
                .media_storage_sop_instance_uid("1.2.826.0.1.3680043.2.1143.7"),
        )?;
        file.write_to_file(path)?;
        Ok(())
    }
}
