use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::error::{FieldError, IngestError, Result};
use crate::region::{
    PhysicalUnit, PixelScale, Roi, extract_delta, extract_roi, extract_unit, first_region,
};
use crate::source::{AttributeSource, require, require_f64, require_text};

pub const DEFAULT_COLOR_SPACE: &str = "RGB";
pub const DEFAULT_TRANSDUCER: &str = "linear";

pub fn sentinel_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    /// Frames per second; `frame_rate * frame_delay_ms == 1000` whenever
    /// either is known, both are zero otherwise.
    pub frame_rate: f64,
    pub frame_delay_ms: f64,
    pub patient_id: String,
    pub patient_name: String,
    pub date_of_birth: NaiveDate,
    pub procedure: String,
    pub acquisition_start: NaiveDateTime,
    pub color_space: String,
    pub pixel_scale: PixelScale,
    pub roi: Roi,
    pub transducer: String,
}

impl Default for AcquisitionMetadata {
    fn default() -> Self {
        Self {
            frame_rate: 0.0,
            frame_delay_ms: 0.0,
            patient_id: String::new(),
            patient_name: String::new(),
            date_of_birth: sentinel_date(),
            procedure: String::new(),
            acquisition_start: sentinel_date().and_time(NaiveTime::MIN),
            color_space: DEFAULT_COLOR_SPACE.to_string(),
            pixel_scale: PixelScale::default(),
            roi: Roi::default(),
            transducer: DEFAULT_TRANSDUCER.to_string(),
        }
    }
}

impl AcquisitionMetadata {
    pub fn resolve(source: &dyn AttributeSource, diagnostics: &mut Diagnostics) -> Self {
        let mut metadata = Self::default();
        for (field, resolver) in RESOLVERS {
            match resolver(source, &mut metadata) {
                Ok(()) => debug!(field, "metadata field resolved"),
                Err(err) => diagnostics.field(field, &err),
            }
        }
        metadata
    }

    pub fn set_frame_delay(&mut self, delay_ms: f64) -> Result<()> {
        if !delay_ms.is_finite() || delay_ms <= 0.0 {
            return Err(IngestError::InvalidOverride {
                field: "frame_delay_ms",
                reason: format!("{delay_ms} is not a positive duration"),
            });
        }
        self.frame_delay_ms = delay_ms;
        self.frame_rate = 1000.0 / delay_ms;
        Ok(())
    }

    pub fn set_frame_rate(&mut self, frame_rate: f64) -> Result<()> {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(IngestError::InvalidOverride {
                field: "frame_rate",
                reason: format!("{frame_rate} is not a positive rate"),
            });
        }
        self.frame_rate = frame_rate;
        self.frame_delay_ms = 1000.0 / frame_rate;
        Ok(())
    }

    /// Looks a field up by its name or by the source keyword it comes from.
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        let value = match key {
            "frame_rate" | "fps" => FieldValue::Number(self.frame_rate),
            "frame_delay_ms" | "frame_delay" | "FrameTime" => {
                FieldValue::Number(self.frame_delay_ms)
            }
            "patient_id" | "pid" | "PatientID" => FieldValue::Text(self.patient_id.clone()),
            "patient_name" | "name" | "PatientName" => {
                FieldValue::Text(self.patient_name.clone())
            }
            "date_of_birth" | "dob" | "PatientBirthDate" => FieldValue::Date(self.date_of_birth),
            "procedure" | "PerformedProcedureStepDescription" => {
                FieldValue::Text(self.procedure.clone())
            }
            "acquisition_start" | "start_time" => FieldValue::DateTime(self.acquisition_start),
            "color_space" | "PhotometricInterpretation" => {
                FieldValue::Text(self.color_space.clone())
            }
            "delta_x" | "PhysicalDeltaX" => FieldValue::Number(self.pixel_scale.delta_x),
            "delta_y" | "PhysicalDeltaY" => FieldValue::Number(self.pixel_scale.delta_y),
            "unit_x" | "PhysicalUnitsXDirection" => FieldValue::Unit(self.pixel_scale.unit_x),
            "unit_y" | "PhysicalUnitsYDirection" => FieldValue::Unit(self.pixel_scale.unit_y),
            "roi" => FieldValue::Roi(self.roi),
            "transducer" => FieldValue::Text(self.transducer.clone()),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Unit(PhysicalUnit),
    Roi(Roi),
}

type Resolver = fn(&dyn AttributeSource, &mut AcquisitionMetadata) -> std::result::Result<(), FieldError>;

/// Field name and extraction function, in resolution order.
pub const RESOLVERS: &[(&str, Resolver)] = &[
    ("frame_rate", resolve_frame_timing),
    ("date_of_birth", resolve_birth_date),
    ("patient_id", |source, meta| {
        meta.patient_id = require_text(source, "PatientID")?;
        Ok(())
    }),
    ("patient_name", |source, meta| {
        meta.patient_name = require_text(source, "PatientName")?;
        Ok(())
    }),
    ("procedure", |source, meta| {
        meta.procedure = require_text(source, "PerformedProcedureStepDescription")?;
        Ok(())
    }),
    ("acquisition_start", resolve_acquisition_start),
    ("color_space", |source, meta| {
        meta.color_space = require_text(source, "PhotometricInterpretation")?;
        Ok(())
    }),
    ("delta_x", |source, meta| {
        meta.pixel_scale.delta_x = extract_delta(first_region(source)?, "PhysicalDeltaX")?;
        Ok(())
    }),
    ("delta_y", |source, meta| {
        meta.pixel_scale.delta_y = extract_delta(first_region(source)?, "PhysicalDeltaY")?;
        Ok(())
    }),
    ("unit_x", |source, meta| {
        meta.pixel_scale.unit_x = extract_unit(first_region(source)?, "PhysicalUnitsXDirection")?;
        Ok(())
    }),
    ("unit_y", |source, meta| {
        meta.pixel_scale.unit_y = extract_unit(first_region(source)?, "PhysicalUnitsYDirection")?;
        Ok(())
    }),
    ("roi", |source, meta| {
        meta.roi = extract_roi(first_region(source)?)?;
        Ok(())
    }),
];

fn resolve_frame_timing(
    source: &dyn AttributeSource,
    meta: &mut AcquisitionMetadata,
) -> std::result::Result<(), FieldError> {
    let delay = require_f64(source, "FrameTime")?;
    if !delay.is_finite() || delay <= 0.0 {
        return Err(FieldError::malformed(
            "FrameTime",
            format!("{delay} is not a positive frame time"),
        ));
    }
    meta.frame_delay_ms = delay;
    meta.frame_rate = 1000.0 / delay;
    Ok(())
}

fn resolve_birth_date(
    source: &dyn AttributeSource,
    meta: &mut AcquisitionMetadata,
) -> std::result::Result<(), FieldError> {
    let raw = source
        .attribute("PatientBirthDate")
        .and_then(|value| value.as_text())
        .unwrap_or_default();
    meta.date_of_birth = if raw.is_empty() {
        sentinel_date()
    } else {
        parse_date(&raw).map_err(|reason| FieldError::malformed("PatientBirthDate", reason))?
    };
    Ok(())
}

fn resolve_acquisition_start(
    source: &dyn AttributeSource,
    meta: &mut AcquisitionMetadata,
) -> std::result::Result<(), FieldError> {
    let date = require(source, "ContentDate")?.as_text().unwrap_or_default();
    let time = source
        .attribute("ContentTime")
        .and_then(|value| value.as_text())
        .unwrap_or_default();
    let day = parse_date(&date).map_err(|reason| FieldError::malformed("ContentDate", reason))?;
    let clock = if time.trim().is_empty() {
        NaiveTime::MIN
    } else {
        parse_time(&time).map_err(|reason| FieldError::malformed("ContentTime", reason))?
    };
    meta.acquisition_start = day.and_time(clock);
    Ok(())
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    let raw = raw.trim();
    let compact = raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit());
    if !compact && raw.len() != 10 {
        return Err(format!("'{raw}' is not a date"));
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|err| format!("'{raw}' is not a date: {err}"))
}

/// Parses `YYYYMMDD` followed by an optional `HH[MM[SS[.FFFFFF]]]` time.
pub fn parse_timestamp(raw: &str) -> std::result::Result<NaiveDateTime, String> {
    let raw = raw.trim();
    let split = raw.len().min(8);
    if !raw.is_char_boundary(split) {
        return Err(format!("'{raw}' is not a timestamp"));
    }
    let (date, time) = raw.split_at(split);
    let date = parse_date(date)?;
    if time.is_empty() {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Ok(date.and_time(parse_time(time)?))
}

fn parse_time(raw: &str) -> std::result::Result<NaiveTime, String> {
    let raw = raw.trim();
    let (clock, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if !clock.bytes().all(|b| b.is_ascii_digit()) || !matches!(clock.len(), 2 | 4 | 6) {
        return Err(format!("'{raw}' is not a time of day"));
    }
    let field = |range: std::ops::Range<usize>| -> u32 {
        clock.get(range).and_then(|s| s.parse().ok()).unwrap_or(0)
    };
    let micros = if fraction.is_empty() {
        0
    } else {
        if fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{fraction}' is not a fractional second"));
        }
        format!("{fraction:0<6}").parse::<u32>().unwrap_or(0)
    };
    NaiveTime::from_hms_micro_opt(field(0..2), field(2..4), field(4..6), micros)
        .ok_or_else(|| format!("'{raw}' is out of range"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataOverrides {
    pub frame_rate: Option<f64>,
    pub frame_delay_ms: Option<f64>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub procedure: Option<String>,
    pub acquisition_start: Option<NaiveDateTime>,
    pub color_space: Option<String>,
    pub pixel_scale: Option<PixelScale>,
    pub roi: Option<Roi>,
    pub transducer: Option<String>,
}

impl MetadataOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies every override. A frame rate wins over a frame delay.
    pub fn apply(&self, meta: &mut AcquisitionMetadata) -> Result<()> {
        if let Some(rate) = self.frame_rate {
            meta.set_frame_rate(rate)?;
        } else if let Some(delay) = self.frame_delay_ms {
            meta.set_frame_delay(delay)?;
        }
        if let Some(value) = &self.patient_id {
            meta.patient_id = value.clone();
        }
        if let Some(value) = &self.patient_name {
            meta.patient_name = value.clone();
        }
        if let Some(value) = self.date_of_birth {
            meta.date_of_birth = value;
        }
        if let Some(value) = &self.procedure {
            meta.procedure = value.clone();
        }
        if let Some(value) = self.acquisition_start {
            meta.acquisition_start = value;
        }
        if let Some(value) = &self.color_space {
            meta.color_space = value.clone();
        }
        if let Some(value) = self.pixel_scale {
            meta.pixel_scale = value;
        }
        if let Some(value) = self.roi {
            meta.roi = value;
        }
        if let Some(value) = &self.transducer {
            meta.transducer = value.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Warning;
    use crate::region::REGION_SEQUENCE;
    use crate::source::AttributeSet;

    fn complete_source() -> AttributeSet {
        AttributeSet::new()
            .with("FrameTime", "33.3333")
            .with("PatientBirthDate", "19800214")
            .with("PatientID", "PID-001")
            .with("PatientName", "DOE^JANE")
            .with("PerformedProcedureStepDescription", "Lung")
            .with("ContentDate", "20240131")
            .with("ContentTime", "142501.25")
            .with("PhotometricInterpretation", "YBR_FULL_422")
            .with_sequence(
                REGION_SEQUENCE,
                vec![
                    AttributeSet::new()
                        .with("PhysicalDeltaX", 0.01)
                        .with("PhysicalDeltaY", 0.02)
                        .with("PhysicalUnitsXDirection", 3i64)
                        .with("PhysicalUnitsYDirection", 4i64)
                        .with("RegionLocationMinX0", 10i64)
                        .with("RegionLocationMinY0", 12i64)
                        .with("RegionLocationMaxX1", 110i64)
                        .with("RegionLocationMaxY1", 112i64),
                ],
            )
    }

    #[test]
    fn complete_source_resolves_without_warnings() {
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&complete_source(), &mut diagnostics);

        assert!(diagnostics.is_empty(), "{:?}", diagnostics.warnings());
        assert!((meta.frame_rate * meta.frame_delay_ms - 1000.0).abs() < 1e-9);
        assert!((meta.frame_rate - 30.0).abs() < 1e-3);
        assert_eq!(meta.patient_id, "PID-001");
        assert_eq!(meta.patient_name, "DOE^JANE");
        assert_eq!(meta.procedure, "Lung");
        assert_eq!(meta.date_of_birth, NaiveDate::from_ymd_opt(1980, 2, 14).unwrap());
        assert_eq!(
            meta.acquisition_start,
            NaiveDate::from_ymd_opt(2024, 1, 31)
                .unwrap()
                .and_hms_micro_opt(14, 25, 1, 250_000)
                .unwrap()
        );
        assert_eq!(meta.color_space, "YBR_FULL_422");
        assert_eq!(meta.pixel_scale.delta_y, 0.02);
        assert_eq!(meta.pixel_scale.unit_y, PhysicalUnit::Second);
        assert_eq!(meta.roi, Roi::new(10, 12, 110, 112));
    }

    #[test]
    fn single_missing_field_keeps_default_and_warns_once() {
        let mut source = complete_source();
        source.remove("PatientID");
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&source, &mut diagnostics);

        assert_eq!(meta.patient_id, "");
        assert_eq!(meta.patient_name, "DOE^JANE");
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            &diagnostics.warnings()[0],
            Warning::Field { field, .. } if field == "patient_id"
        ));
    }

    #[test]
    fn missing_birth_date_uses_sentinel_silently() {
        let mut source = complete_source();
        source.remove("PatientBirthDate");
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&source, &mut diagnostics);
        assert_eq!(meta.date_of_birth, sentinel_date());
        assert!(diagnostics.is_empty());

        let source = complete_source().with("PatientBirthDate", "");
        let meta = AcquisitionMetadata::resolve(&source, &mut diagnostics);
        assert_eq!(meta.date_of_birth, sentinel_date());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn absent_content_time_collapses_to_date() {
        let mut source = complete_source();
        source.remove("ContentTime");
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&source, &mut diagnostics);
        assert!(diagnostics.is_empty());
        assert_eq!(
            meta.acquisition_start,
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap().and_time(NaiveTime::MIN)
        );
    }

    #[test]
    fn malformed_content_time_fails_only_that_field() {
        let source = complete_source().with("ContentTime", "25xx");
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&source, &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(meta.acquisition_start, AcquisitionMetadata::default().acquisition_start);
        assert_eq!(meta.patient_id, "PID-001");
    }

    #[test]
    fn malformed_content_date_is_reported_against_the_date() {
        let source = complete_source().with("ContentDate", "2024-13");
        let mut diagnostics = Diagnostics::new();
        AcquisitionMetadata::resolve(&source, &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            &diagnostics.warnings()[0],
            Warning::Field { field, reason }
                if field == "acquisition_start" && reason.contains("'ContentDate'")
        ));

        let source = complete_source().with("ContentTime", "25xx");
        let mut diagnostics = Diagnostics::new();
        AcquisitionMetadata::resolve(&source, &mut diagnostics);
        assert!(matches!(
            &diagnostics.warnings()[0],
            Warning::Field { reason, .. } if reason.contains("'ContentTime'")
        ));
    }

    #[test]
    fn missing_region_list_warns_for_every_region_field() {
        let mut source = complete_source();
        source.remove(REGION_SEQUENCE);
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&source, &mut diagnostics);

        let fields: Vec<_> = diagnostics
            .warnings()
            .iter()
            .filter_map(|warning| match warning {
                Warning::Field { field, .. } => Some(field.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fields, ["delta_x", "delta_y", "unit_x", "unit_y", "roi"]);
        assert_eq!(meta.roi, Roi::default());
        assert_eq!(meta.pixel_scale, PixelScale::default());
    }

    #[test]
    fn zero_frame_time_is_malformed() {
        let source = complete_source().with("FrameTime", "0");
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&source, &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(meta.frame_rate, 0.0);
        assert_eq!(meta.frame_delay_ms, 0.0);
    }

    #[test]
    fn timestamps_accept_partial_times() {
        let parsed = parse_timestamp("202401311425").unwrap();
        assert_eq!(parsed.format("%H:%M:%S").to_string(), "14:25:00");
        assert!(parse_timestamp("2024013").is_err());
        assert!(parse_timestamp("20240131256000").is_err());
    }

    #[test]
    fn overrides_keep_timing_consistent() {
        let mut meta = AcquisitionMetadata::default();
        let overrides = MetadataOverrides {
            frame_delay_ms: Some(40.0),
            patient_name: Some("Anon".into()),
            ..Default::default()
        };
        overrides.apply(&mut meta).unwrap();
        assert_eq!(meta.frame_rate, 25.0);
        assert_eq!(meta.patient_name, "Anon");

        let bad = MetadataOverrides {
            frame_rate: Some(-1.0),
            ..Default::default()
        };
        assert!(bad.apply(&mut meta).is_err());
    }

    #[test]
    fn fields_are_addressable_by_name_and_keyword() {
        let mut diagnostics = Diagnostics::new();
        let meta = AcquisitionMetadata::resolve(&complete_source(), &mut diagnostics);
        assert_eq!(meta.field("PatientID"), Some(FieldValue::Text("PID-001".into())));
        assert_eq!(meta.field("pid"), meta.field("patient_id"));
        assert_eq!(meta.field("roi"), Some(FieldValue::Roi(Roi::new(10, 12, 110, 112))));
        assert_eq!(meta.field("Nonexistent"), None);
    }
}
