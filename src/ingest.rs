use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::IngestOptions;
use crate::diagnostics::{Diagnostics, Warning};
use crate::dicom::{StructuredFile, has_dicom_magic};
use crate::error::Result;
use crate::metadata::AcquisitionMetadata;
use crate::naming::metadata_stem;
use crate::observability::MetricsCollector;
use crate::preprocess::FramePreprocessor;
use crate::raw::{self, open_stream};
use crate::sink::{OutputTarget, SinkOpener, SinkOutcome};
use crate::video::VideoContainer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Structured,
    Raw,
}

/// Classifies `path` by its header. Fails only when the file cannot be read.
pub fn probe(path: &Path) -> Result<SourceKind> {
    if has_dicom_magic(path)? {
        Ok(SourceKind::Structured)
    } else {
        Ok(SourceKind::Raw)
    }
}

pub fn ingest(path: &Path, options: &IngestOptions) -> Result<VideoContainer> {
    Ingestor::new(options.clone()).ingest(path)
}

/// Reusable ingestion front-end sharing one metrics collector across files.
#[derive(Debug, Clone, Default)]
pub struct Ingestor {
    options: IngestOptions,
    metrics: MetricsCollector,
}

impl Ingestor {
    pub fn new(options: IngestOptions) -> Self {
        Self {
            options,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn ingest(&self, path: &Path) -> Result<VideoContainer> {
        let started = Instant::now();
        let kind = {
            let _timer = self.metrics.start_stage("probe");
            probe(path)?
        };
        debug!(?kind, "source classified");

        let video = match kind {
            SourceKind::Structured => self.ingest_structured(path)?,
            SourceKind::Raw => self.ingest_raw(path)?,
        };
        self.metrics.record_total_duration(started.elapsed());
        self.metrics
            .record_source(video.len(), video.diagnostics().len());
        Ok(video)
    }

    fn ingest_structured(&self, path: &Path) -> Result<VideoContainer> {
        let mut diagnostics = Diagnostics::new();
        let file = StructuredFile::open(path)?;

        let mut metadata = {
            let _timer = self.metrics.start_stage("resolve_metadata");
            AcquisitionMetadata::resolve(&file, &mut diagnostics)
        };
        self.options.overrides.apply(&mut metadata)?;

        let mut raw = {
            let _timer = self.metrics.start_stage("decode_pixels");
            file.pixel_data()?
        };
        if let Some(declared) = raw.declared_frames {
            let decoded = raw.len();
            if declared < decoded {
                raw.truncate(declared);
            } else if declared > decoded {
                diagnostics.record(Warning::FrameShortfall { declared, decoded });
            }
        }

        if !file.is_multi_frame() || !file.is_color() {
            debug!("stored as plain frames without crop or color conversion");
            return Ok(VideoContainer::new(path, SourceKind::Structured, raw.into_frames())
                .with_metadata(Some(metadata))
                .with_diagnostics(diagnostics)
                .still());
        }

        let target = self.options.output.as_ref().map(|config| OutputTarget {
            config,
            stem: metadata_stem(&metadata),
            frame_delay_ms: metadata.frame_delay_ms,
        });
        let processed = {
            let _timer = self.metrics.start_stage("preprocess");
            FramePreprocessor::new(self.options.mode).run(
                &raw,
                &metadata.roi,
                &metadata.color_space,
                target.as_ref().map(|target| target as &dyn SinkOpener),
            )?
        };
        if let Some(SinkOutcome::Discarded { path: discarded }) = &processed.output {
            diagnostics.record(Warning::DiscardedOutput {
                path: discarded.display().to_string(),
            });
        }

        Ok(
            VideoContainer::new(path, SourceKind::Structured, processed.frames)
                .with_metadata(Some(metadata))
                .with_diagnostics(diagnostics)
                .with_output(processed.output),
        )
    }

    fn ingest_raw(&self, path: &Path) -> Result<VideoContainer> {
        let mut diagnostics = Diagnostics::new();
        let frames = {
            let _timer = self.metrics.start_stage("raw_ingest");
            raw::ingest_raw(
                open_stream(path).as_mut(),
                &path.display().to_string(),
                &mut diagnostics,
            )
        };
        if self.options.output.is_some() {
            debug!("encoded output applies to structured sources only");
        }

        let metadata = if self.options.overrides.is_empty() {
            None
        } else {
            let mut metadata = AcquisitionMetadata::default();
            self.options.overrides.apply(&mut metadata)?;
            Some(metadata)
        };

        Ok(VideoContainer::new(path, SourceKind::Raw, frames)
            .with_metadata(metadata)
            .with_diagnostics(diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_tells_structured_from_raw() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let structured = dir.path().join("scan.dcm");
        let mut header = vec![0u8; 128];
        header.extend_from_slice(b"DICM");
        std::fs::write(&structured, &header)?;
        let raw = dir.path().join("scan.gif");
        std::fs::write(&raw, b"GIF89a")?;

        assert_eq!(probe(&structured)?, SourceKind::Structured);
        assert_eq!(probe(&raw)?, SourceKind::Raw);
        assert!(probe(&dir.path().join("missing.dcm")).is_err());
        Ok(())
    }

    #[test]
    fn raw_overrides_create_metadata() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, b"not a picture")?;

        let mut options = IngestOptions::default();
        let plain = ingest(&path, &options)?;
        assert!(plain.metadata().is_none());
        assert!(plain.is_empty());
        assert_eq!(plain.diagnostics().len(), 1);

        options.overrides.patient_id = Some("ANON".into());
        options.overrides.frame_rate = Some(20.0);
        let video = ingest(&path, &options)?;
        let metadata = video.metadata().expect("override metadata");
        assert_eq!(metadata.patient_id, "ANON");
        assert!((metadata.frame_delay_ms - 50.0).abs() < 1e-9);
        Ok(())
    }
}
