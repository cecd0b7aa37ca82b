use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::error::FieldError;

/// Advisory conditions met during ingestion. None of them stop construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    Field { field: String, reason: String },
    FrameShortfall { declared: usize, decoded: usize },
    /// No frames could be decoded, with the failure that ended the stream.
    EmptyResult {
        source: String,
        reason: Option<String>,
    },
    DiscardedOutput { path: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { field, reason } => {
                write!(f, "unable to resolve '{field}': {reason}")
            }
            Self::FrameShortfall { declared, decoded } => write!(
                f,
                "source declares {declared} frame(s) but only {decoded} could be decoded"
            ),
            Self::EmptyResult {
                source,
                reason: Some(reason),
            } => write!(f, "no frames decoded from {source} ({reason}); video is empty"),
            Self::EmptyResult {
                source,
                reason: None,
            } => write!(f, "no frames decoded from {source}; video is empty"),
            Self::DiscardedOutput { path } => {
                write!(f, "no frames written to {path}; output discarded")
            }
        }
    }
}

/// Collected warnings, each also emitted through `tracing` when recorded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, warning: Warning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn field(&mut self, field: &str, error: &FieldError) {
        self.record(Warning::Field {
            field: field.to_string(),
            reason: error.to_string(),
        });
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }
}
