use chrono::NaiveDateTime;

use crate::metadata::AcquisitionMetadata;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Replaces anything outside `[A-Za-z0-9.-]` with `_` and trims the ends.
pub fn sanitize(component: &str) -> String {
    let mapped: String = component
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `{name}_{patient_id}_{YYYYMMDD-HHMMSS}`, where `name` falls back to the
/// procedure description when the patient name is blank.
pub fn format_stem(
    patient_name: &str,
    procedure: &str,
    patient_id: &str,
    start: NaiveDateTime,
) -> String {
    let name = if patient_name.trim().is_empty() {
        procedure
    } else {
        patient_name
    };
    format!(
        "{}_{}_{}",
        sanitize(name),
        sanitize(patient_id),
        start.format(TIMESTAMP_FORMAT)
    )
}

pub fn metadata_stem(metadata: &AcquisitionMetadata) -> String {
    format_stem(
        &metadata.patient_name,
        &metadata.procedure,
        &metadata.patient_id,
        metadata.acquisition_start,
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap()
    }

    #[test]
    fn person_name_separators_become_underscores() {
        assert_eq!(
            format_stem("DOE^JANE", "Carotid", "P 001/2", start()),
            "DOE_JANE_P_001_2_20240305-140709"
        );
    }

    #[test]
    fn blank_name_falls_back_to_procedure() {
        assert_eq!(
            format_stem("  ", "Thyroid scan", "17", start()),
            "Thyroid_scan_17_20240305-140709"
        );
        assert_eq!(sanitize("../"), "unknown");
    }
}
