pub mod color;
pub mod config;
pub mod diagnostics;
pub mod dicom;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod naming;
pub mod observability;
pub mod preprocess;
pub mod raw;
pub mod region;
pub mod sink;
pub mod source;
pub mod video;

pub use config::IngestOptions;
pub use error::{IngestError, Result};
pub use ingest::{Ingestor, SourceKind, ingest, probe};
pub use metadata::{AcquisitionMetadata, MetadataOverrides};
pub use preprocess::PreprocessMode;
pub use video::frame::Frame;
pub use video::{Entry, Key, VideoContainer};
