use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::metadata::MetadataOverrides;
use crate::preprocess::PreprocessMode;
use crate::sink::SinkConfig;

/// Everything that shapes one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestOptions {
    pub overrides: MetadataOverrides,
    pub output: Option<SinkConfig>,
    pub mode: PreprocessMode,
}

impl IngestOptions {
    /// Reads options from a YAML (`.yaml`, `.yml`) or JSON (`.json`) file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file: {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let options = match extension.as_deref() {
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse options YAML: {}", path.display()))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse options JSON: {}", path.display()))?,
            _ => bail!(
                "Unsupported options file '{}': expected .yaml, .yml or .json",
                path.display()
            ),
        };
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::sink::VideoFormat;

    #[test]
    fn yaml_and_json_describe_the_same_options() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let yaml = dir.path().join("opts.yaml");
        std::fs::write(
            &yaml,
            "mode: accelerated\noverrides:\n  patient_id: ANON-7\n  frame_rate: 25.0\noutput:\n  directory: out\n",
        )?;
        let json = dir.path().join("opts.json");
        std::fs::write(
            &json,
            r#"{"mode":"accelerated","overrides":{"patient_id":"ANON-7","frame_rate":25.0},"output":{"directory":"out"}}"#,
        )?;

        let from_yaml = IngestOptions::load(&yaml)?;
        assert_eq!(from_yaml, IngestOptions::load(&json)?);
        assert_eq!(from_yaml.mode, PreprocessMode::Accelerated);
        assert_eq!(from_yaml.overrides.patient_id.as_deref(), Some("ANON-7"));
        let output = from_yaml.output.expect("output configured");
        assert_eq!(output.directory, PathBuf::from("out"));
        assert_eq!(output.format, VideoFormat::Gif);
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("opts.yml");
        std::fs::write(&path, "overrides:\n  patient_age: 40\n")?;
        assert!(IngestOptions::load(&path).is_err());

        let toml = dir.path().join("opts.toml");
        std::fs::write(&toml, "mode = 'reference'")?;
        assert!(IngestOptions::load(&toml).is_err());
        Ok(())
    }
}
